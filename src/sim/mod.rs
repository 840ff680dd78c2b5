//! The simulator aggregate: processor, memory and MEC stepped together.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::SimConfig;
use crate::cpu::trap::Trap;
use crate::cpu::{Bus, Cpu, SOFTWARE_BREAKPOINT};
use crate::csr::psr;
use crate::debug;
use crate::event::WakeReason;
use crate::mec::irq::{IrqHandler, IrqRoute};
use crate::mec::uart::UartPair;
use crate::mec::{self, Mec};
use crate::mem::{self, MEC_START, MemError, MemoryMap, RAM_START, Width, asi};

/// Why [`Simulator::step`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The instruction budget ran out.
    TimedOut,
    /// A hardware breakpoint address was reached, or `ta 1` was fetched.
    BreakpointHit,
    /// The host raised the stop flag.
    Interrupted,
    /// The processor is in error mode.
    FatalError,
}

/// Register numbers of the unified debugger view.
pub mod regnum {
    pub const FP_BASE: usize = 32;
    pub const Y: usize = 64;
    pub const PSR: usize = 65;
    pub const WIM: usize = 66;
    pub const TBR: usize = 67;
    pub const PC: usize = 68;
    pub const NPC: usize = 69;
    pub const FSR: usize = 70;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stats {
    pub instructions: u64,
    /// Cycles spent executing, stalls included.
    pub cycles: u64,
    pub hold_cycles: u64,
    pub fp_hold_cycles: u64,
    /// Cycles spent in power-down.
    pub idle_cycles: u64,
    pub loads: u64,
    pub stores: u64,
    pub fp_ops: u64,
    pub traps: u64,
}

impl Stats {
    pub fn total_cycles(&self) -> u64 {
        self.cycles + self.idle_cycles
    }

    pub fn simulated_seconds(&self, freq_mhz: f64) -> f64 {
        self.total_cycles() as f64 / (freq_mhz * 1e6)
    }

    pub fn cpi(&self) -> f64 {
        if self.instructions == 0 {
            0.0
        } else {
            self.cycles as f64 / self.instructions as f64
        }
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, " Instructions : {:>12}", self.instructions)?;
        writeln!(f, " Cycles       : {:>12}", self.cycles)?;
        writeln!(f, "   hold       : {:>12}", self.hold_cycles)?;
        writeln!(f, "   fp hold    : {:>12}", self.fp_hold_cycles)?;
        writeln!(f, " Idle cycles  : {:>12}", self.idle_cycles)?;
        writeln!(f, " Loads        : {:>12}", self.loads)?;
        writeln!(f, " Stores       : {:>12}", self.stores)?;
        writeln!(f, " FP ops       : {:>12}", self.fp_ops)?;
        writeln!(f, " Traps        : {:>12}", self.traps)?;
        write!(f, " CPI          : {:>12.2}", self.cpi())
    }
}

/// Memory plus the MEC seen through the processor bus.
struct SystemBus<'a> {
    mem: &'a mut MemoryMap,
    mec: &'a mut Mec,
}

impl Bus for SystemBus<'_> {
    fn read(&mut self, asi: u8, addr: u32, width: Width) -> Result<(u32, u32), MemError> {
        self.mem.read(&mut *self.mec, asi, addr, width)
    }

    fn write(&mut self, asi: u8, addr: u32, value: u32, width: Width) -> Result<u32, MemError> {
        self.mem.write(&mut *self.mec, asi, addr, value, width)
    }

    fn now(&self) -> u64 {
        self.mec.now()
    }

    fn read_double(&mut self, asi: u8, addr: u32) -> Result<([u32; 2], u32), MemError> {
        self.mem.read_double(&mut *self.mec, asi, addr)
    }

    fn write_double(&mut self, asi: u8, addr: u32, data: [u32; 2]) -> Result<u32, MemError> {
        self.mem.write_double(&mut *self.mec, asi, addr, data)
    }
}

pub struct Simulator {
    pub cpu: Cpu,
    pub mem: MemoryMap,
    pub mec: Mec,
    config: SimConfig,
    breakpoints: HashSet<u32>,
    stop: Arc<AtomicBool>,
    booted: bool,
    stats: Stats,
}

impl Simulator {
    /// A simulator whose UARTs are not connected.
    pub fn new(config: SimConfig) -> Self {
        Self::with_uarts(config, UartPair::default())
    }

    pub fn with_uarts(config: SimConfig, uart: UartPair) -> Self {
        let mut sim = Self {
            cpu: Cpu::new(config.fpu_present),
            mem: MemoryMap::new(),
            mec: Mec::new(config.event_pool, uart),
            config,
            breakpoints: HashSet::new(),
            stop: Arc::new(AtomicBool::new(false)),
            booted: false,
            stats: Stats::default(),
        };
        sim.reset();
        sim
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Power-on reset of the processor, the memory controller and the MEC.
    /// Memory contents, breakpoints and interrupt handler registrations survive.
    pub fn reset(&mut self) {
        self.cpu = Cpu::new(self.config.fpu_present);
        self.cpu.rev0_trap_ps = self.config.rev0_trap_ps;
        self.mem.reset_controller();
        self.mec.reset();
        self.mec.devices.rev0_timer_irq = self.config.rev0_timer_irq;
        self.booted = false;
        self.stats = Stats::default();
        self.stop.store(false, Ordering::Relaxed);
    }

    /// Cold reset on the next step, like a watchdog expiry.
    pub fn force_reset(&mut self) {
        self.system_reset();
    }

    fn system_reset(&mut self) {
        self.mem.reset_controller();
        self.mec.reset();
        self.cpu.reset();
        self.cpu.trap = Some(Trap::ColdReset);
    }

    /// Flag polled once per instruction; raising it makes `step` return
    /// [`StopReason::Interrupted`].
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn add_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints.insert(addr)
    }

    pub fn remove_breakpoint(&mut self, addr: u32) -> bool {
        self.breakpoints.remove(&addr)
    }

    pub fn breakpoints(&self) -> impl Iterator<Item = &u32> {
        self.breakpoints.iter()
    }

    /// Routes an interrupt level to an external handler instead of the processor.
    pub fn register_interrupt(&mut self, level: u8, handler: impl IrqHandler + 'static) {
        self.mec.irq().register(level, IrqRoute::External(Box::new(handler)));
    }

    pub fn now(&self) -> u64 {
        self.mec.now()
    }

    pub fn stats(&self) -> Stats {
        let c = self.cpu.counters;
        Stats {
            loads: c.loads,
            stores: c.stores,
            traps: c.traps,
            fp_ops: self.cpu.fpu.ops,
            ..self.stats
        }
    }

    pub fn read_memory_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        self.mem.read_bytes(addr, len)
    }

    /// Returns how many bytes were written.
    pub fn write_memory_bytes(&mut self, addr: u32, bytes: &[u8]) -> usize {
        self.mem.write_bytes(addr, bytes)
    }

    /// Unified register view: 0-7 globals, 8-31 current window, 32-63 FP,
    /// then Y, PSR, WIM, TBR, PC, NPC, FSR.
    pub fn get_register(&self, index: usize) -> Option<u32> {
        let cpu = &self.cpu;
        let v = match index {
            0..=31 => cpu.reg(index as u8),
            32..=63 => cpu.fpu.read_word(index - regnum::FP_BASE),
            regnum::Y => cpu.csr.y,
            regnum::PSR => cpu.csr.psr.0,
            regnum::WIM => cpu.csr.wim,
            regnum::TBR => cpu.csr.tbr,
            regnum::PC => cpu.pc,
            regnum::NPC => cpu.npc,
            regnum::FSR => cpu.fpu.fsr,
            _ => return None,
        };
        Some(v)
    }

    /// Raw register write, no architectural masking. Returns false for an
    /// unknown index.
    pub fn set_register(&mut self, index: usize, value: u32) -> bool {
        let cpu = &mut self.cpu;
        match index {
            0..=31 => cpu.set_reg(index as u8, value),
            32..=63 => cpu.fpu.write_word(index - regnum::FP_BASE, value),
            regnum::Y => cpu.csr.y = value,
            regnum::PSR => cpu.csr.psr.0 = value,
            regnum::WIM => cpu.csr.wim = value,
            regnum::TBR => cpu.csr.tbr = value,
            regnum::PC => cpu.pc = value,
            regnum::NPC => cpu.npc = value,
            regnum::FSR => cpu.fpu.fsr = value,
            _ => return false,
        }
        true
    }

    fn bus(&mut self) -> SystemBus<'_> {
        SystemBus { mem: &mut self.mem, mec: &mut self.mec }
    }

    fn write_mec(&mut self, offset: u32, value: u32) {
        if let Err(err) = self.bus().write(asi::SUPER_DATA, MEC_START + offset, value, Width::Word) {
            tracing::warn!(%err, offset, "boot register write failed");
        }
    }

    /// Does the ROM monitor's job for a program loaded straight into RAM.
    fn boot_init(&mut self) {
        tracing::debug!(pc = format_args!("0x{:08x}", self.cpu.pc), "boot initialisation");
        self.write_mec(mem::reg::WCR, 0);
        self.write_mec(mec::reg::TRAPD, 0);
        self.write_mec(mem::reg::MEMCFG, (3 << 18) | (4 << 10));
        let mcr = self.mem.mcr | 1;
        self.write_mec(mem::reg::MCR, mcr);

        let cpu = &mut self.cpu;
        cpu.csr.wim = 2;
        let mut v = psr::IMPL_VER | psr::EF | psr::S | psr::PS | psr::ET;
        if !self.config.fpu_present {
            v &= !psr::EF;
        }
        cpu.csr.psr.0 = v;
        let top = RAM_START + self.mem.ram_size();
        cpu.set_reg(30, top);
        cpu.set_reg(14, top - 384);
    }

    /// Executes up to `count` instructions.
    pub fn step(&mut self, count: u64, trace: bool) -> StopReason {
        if self.cpu.error_mode {
            return StopReason::FatalError;
        }
        if !self.booted {
            self.booted = true;
            if self.cpu.pc != 0 && self.mec.now() == 0 {
                self.boot_init();
            }
        }

        for executed in 0..count {
            if self.stop.swap(false, Ordering::Relaxed) {
                return StopReason::Interrupted;
            }
            if self.cpu.trap.is_some() && self.cpu.dispatch_trap().is_err() {
                return StopReason::FatalError;
            }
            // A breakpoint on the resume address does not stop again.
            if executed > 0 && self.breakpoints.contains(&self.cpu.pc) {
                return StopReason::BreakpointHit;
            }
            if let Some(reason) = self.execute_one(trace) {
                return reason;
            }
        }
        StopReason::TimedOut
    }

    fn execute_one(&mut self, trace: bool) -> Option<StopReason> {
        self.cpu.begin();
        if self.cpu.annul {
            self.cpu.skip_annulled();
        } else {
            let now = self.mec.now();
            let sw_breakpoints = self.config.sw_breakpoints;
            let cpu = &mut self.cpu;
            let mut bus = SystemBus { mem: &mut self.mem, mec: &mut self.mec };
            match cpu.fetch(&mut bus) {
                Ok(inst) => {
                    if sw_breakpoints && inst == SOFTWARE_BREAKPOINT {
                        return Some(StopReason::BreakpointHit);
                    }
                    if trace {
                        debug::trace(now, cpu.pc, inst, cpu.csr.psr);
                    }
                    if let Err(trap) = cpu.execute(&mut bus, inst) {
                        cpu.trap = Some(trap);
                    }
                }
                Err(trap) => cpu.trap = Some(trap),
            }
            self.stats.instructions += 1;
        }

        if self.cpu.trap.is_none() {
            let irl = self.mec.devices.irq.irl();
            if let Some(level) = self.cpu.interrupt_request(irl) {
                self.cpu.trap = Some(Trap::Interrupt { level });
                self.mec.irq().acknowledge(level);
            }
        }
        let fatal = self.cpu.dispatch_trap().is_err();

        let cycles = self.cpu.cycles();
        self.stats.cycles += cycles;
        self.stats.hold_cycles += self.cpu.hold;
        self.stats.fp_hold_cycles += self.cpu.fpu.fhold;
        self.mec.advance(cycles);
        if fatal {
            return Some(StopReason::FatalError);
        }

        if let Some(cause) = self.mec.take_reset_request() {
            tracing::info!(?cause, "processor reset");
            self.system_reset();
        } else if self.mec.take_power_down() {
            let (idle, why) = self.mec.wait_until_interrupt(&self.stop);
            self.stats.idle_cycles += idle;
            if why == WakeReason::Cancelled {
                self.stop.store(false, Ordering::Relaxed);
                return Some(StopReason::Interrupted);
            }
        }
        None
    }
}

impl fmt::Debug for Simulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Simulator")
            .field("pc", &format_args!("0x{:08x}", self.cpu.pc))
            .field("npc", &format_args!("0x{:08x}", self.cpu.npc))
            .field("time", &self.mec.now())
            .field("error_mode", &self.cpu.error_mode)
            .finish()
    }
}
