pub mod decode;
pub mod exec;
pub mod regs;
pub mod trap;

use crate::csr::CsrFile;
use crate::fpu::Fpu;
use crate::mem::{DOUBLE_WS, MemError, Width, asi};
use regs::RegisterFile;
use trap::{Trap, WithPc};

/// Base cycle counts.
pub mod timing {
    pub const T_LD: u64 = 2;
    pub const T_LDD: u64 = 3;
    pub const T_ST: u64 = 3;
    pub const T_STD: u64 = 4;
    pub const T_LDST: u64 = 4;
    pub const T_JMPL: u64 = 2;
    pub const T_RETT: u64 = 2;
    pub const T_MUL: u64 = 5;
    pub const T_DIV: u64 = 35;
    /// Cycles to enter a trap.
    pub const TRAP_C: u64 = 3;
}

/// `ta 1`, used by debuggers as a software breakpoint.
pub const SOFTWARE_BREAKPOINT: u32 = 0x91d0_2001;

/// The processor's view of the system bus.
pub trait Bus {
    /// Returns the value and the wait states the access cost.
    fn read(&mut self, asi: u8, addr: u32, width: Width) -> Result<(u32, u32), MemError>;
    /// Returns the wait states the access cost.
    fn write(&mut self, asi: u8, addr: u32, value: u32, width: Width) -> Result<u32, MemError>;
    /// Current simulated time.
    fn now(&self) -> u64;

    fn read_double(&mut self, asi: u8, addr: u32) -> Result<([u32; 2], u32), MemError> {
        let (hi, ws0) = self.read(asi, addr, Width::Word)?;
        let (lo, ws1) = self.read(asi, addr.wrapping_add(4), Width::Word)?;
        Ok(([hi, lo], ws0 + ws1 + DOUBLE_WS))
    }

    fn write_double(&mut self, asi: u8, addr: u32, data: [u32; 2]) -> Result<u32, MemError> {
        let ws0 = self.write(asi, addr, data[0], Width::Word)?;
        let ws1 = self.write(asi, addr.wrapping_add(4), data[1], Width::Word)?;
        Ok(ws0 + ws1 + DOUBLE_WS)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub loads: u64,
    pub stores: u64,
    pub traps: u64,
}

#[derive(Debug)]
pub struct Cpu {
    pub regs: RegisterFile,
    pub csr: CsrFile,
    pub fpu: Fpu,
    pub pc: u32,
    pub npc: u32,

    /// Trap raised by the current instruction or interrupt, not yet dispatched.
    pub trap: Option<Trap>,
    /// The next instruction is skipped.
    pub annul: bool,
    /// Halted: a trap occurred with traps disabled.
    pub error_mode: bool,

    /// Cycles of the current instruction and its stall cycles.
    pub icnt: u64,
    pub hold: u64,
    ild_reg: u8,
    ild_time: u64,

    /// PS |= S on trap entry instead of PS = S.
    pub rev0_trap_ps: bool,
    pub counters: Counters,
}

impl Cpu {
    pub fn new(fpu_present: bool) -> Self {
        let mut cpu = Self {
            regs: RegisterFile::default(),
            csr: CsrFile::new(fpu_present),
            fpu: Fpu::new(fpu_present),
            pc: 0,
            npc: 4,
            trap: None,
            annul: false,
            error_mode: false,
            icnt: 0,
            hold: 0,
            ild_reg: 0,
            ild_time: 0,
            rev0_trap_ps: false,
            counters: Counters::default(),
        };
        cpu.reset();
        cpu
    }

    /// Processor reset: supervisor, traps off, PC at the reset vector.
    pub fn reset(&mut self) {
        self.csr.reset();
        self.fpu.reset();
        self.pc = 0;
        self.npc = 4;
        self.trap = None;
        self.annul = false;
        self.error_mode = false;
        self.icnt = 0;
        self.hold = 0;
        self.ild_reg = 0;
        self.ild_time = 0;
    }

    #[inline]
    pub fn cwp(&self) -> usize {
        self.csr.psr.cwp()
    }

    /// Logical register in the current window.
    #[inline]
    pub fn reg(&self, r: u8) -> u32 {
        self.regs.get(self.cwp(), r as usize)
    }

    #[inline]
    pub fn set_reg(&mut self, r: u8, v: u32) {
        self.regs.set(self.cwp(), r as usize, v);
    }

    /// Starts the cycle accounting of a new instruction.
    pub fn begin(&mut self) {
        self.icnt = 1;
        self.hold = 0;
        self.fpu.fhold = 0;
    }

    /// Cycles consumed by the instruction just completed.
    pub fn cycles(&self) -> u64 {
        self.icnt + self.hold + self.fpu.fhold
    }

    /// Skips an annulled delay slot.
    pub fn skip_annulled(&mut self) {
        self.annul = false;
        self.pc = self.npc;
        self.npc = self.npc.wrapping_add(4);
    }

    /// Level of the interrupt to take now, given the highest requested level.
    pub fn interrupt_request(&self, irl: u8) -> Option<u8> {
        let psr = self.csr.psr;
        if irl == 0 || !psr.et() || self.trap.is_some() {
            return None;
        }
        (irl == 15 || irl > psr.pil()).then_some(irl)
    }

    pub fn fetch(&mut self, bus: &mut dyn Bus) -> Result<u32, Trap> {
        let asi = if self.csr.psr.s() { asi::SUPER_INSN } else { asi::USER_INSN };
        let pc = self.pc;
        let (inst, ws) = bus
            .read(asi, pc, Width::Word)
            .map_err(|_| Trap::InstructionAccess { pc })?;
        self.hold += ws as u64;
        Ok(inst)
    }

    /// Decodes and executes `inst` at the current PC.
    pub fn execute(&mut self, bus: &mut dyn Bus, inst: u32) -> Result<(), Trap> {
        let decoded = decode::decode(inst).with_pc(self.pc)?;
        exec::execute(self, bus, inst, decoded)
    }

    /// Load-use interlock: one stall cycle when `r` is the destination of the
    /// load that completed just before this instruction.
    pub(crate) fn interlock(&mut self, now: u64, r: &[u8]) {
        if self.ild_reg != 0 && now <= self.ild_time && r.contains(&self.ild_reg) {
            self.hold += 1;
        }
    }

    pub(crate) fn clear_load(&mut self) {
        self.ild_reg = 0;
    }

    pub(crate) fn note_load(&mut self, rd: u8, now: u64) {
        self.ild_reg = rd;
        self.ild_time = now + self.hold + self.icnt;
    }

    /// Dispatches the pending trap.
    ///
    /// Returns the trap back as an error when traps were disabled; the processor
    /// is then in error mode.
    pub fn dispatch_trap(&mut self) -> Result<(), Trap> {
        let Some(trap) = self.trap.take() else {
            return Ok(());
        };
        if trap == Trap::ColdReset {
            self.pc = 0;
            self.npc = 4;
            return Ok(());
        }
        if !self.csr.psr.et() {
            tracing::info!(%trap, "trap with traps disabled, entering error mode");
            self.error_mode = true;
            return Err(trap);
        }
        let tt = trap.tt();
        tracing::debug!(tt, pc = format_args!("0x{:08x}", self.pc), "trap");
        self.counters.traps += 1;

        let csr = &mut self.csr;
        csr.tbr = (csr.tbr & 0xffff_f000) | (tt << 4);
        csr.psr.set_et(false);
        let s = csr.psr.s();
        if self.rev0_trap_ps {
            let ps = csr.psr.ps();
            csr.psr.set_ps(ps || s);
        } else {
            csr.psr.set_ps(s);
        }
        self.annul = false;

        let cwp = (csr.psr.cwp() + regs::NWINDOWS - 1) % regs::NWINDOWS;
        csr.psr.set_cwp(cwp);
        self.regs.set(cwp, 17, self.pc);
        self.regs.set(cwp, 18, self.npc);
        csr.psr.set_s(true);
        self.pc = csr.tbr;
        self.npc = csr.tbr.wrapping_add(4);
        self.icnt = timing::TRAP_C;
        Ok(())
    }
}
