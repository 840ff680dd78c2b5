//! Floating-point unit: register file, FSR, the deferred-exception state
//! machine and the pipeline timing used for hazard stalls.

pub mod ieee;

use std::collections::VecDeque;

use crate::cpu::trap::Trap;
use crate::csr::fsr;
use ieee::{BinOp, Rounded, Rounding};

/// FPop opcodes (opf field).
pub mod opf {
    pub const FMOVS: u16 = 0x01;
    pub const FNEGS: u16 = 0x05;
    pub const FABSS: u16 = 0x09;
    pub const FSQRTS: u16 = 0x29;
    pub const FSQRTD: u16 = 0x2a;
    pub const FADDS: u16 = 0x41;
    pub const FADDD: u16 = 0x42;
    pub const FSUBS: u16 = 0x45;
    pub const FSUBD: u16 = 0x46;
    pub const FMULS: u16 = 0x49;
    pub const FMULD: u16 = 0x4a;
    pub const FDIVS: u16 = 0x4d;
    pub const FDIVD: u16 = 0x4e;
    pub const FITOS: u16 = 0xc4;
    pub const FDTOS: u16 = 0xc6;
    pub const FITOD: u16 = 0xc8;
    pub const FSTOD: u16 = 0xc9;
    pub const FSTOI: u16 = 0xd1;
    pub const FDTOI: u16 = 0xd2;
    pub const FCMPS: u16 = 0x51;
    pub const FCMPD: u16 = 0x52;
    pub const FCMPES: u16 = 0x55;
    pub const FCMPED: u16 = 0x56;
}

/// Cycles until the result of `opf` is available. `None` for unimplemented opcodes.
pub fn latency(op: u16) -> Option<u64> {
    let cycles = match op {
        opf::FABSS | opf::FMOVS | opf::FNEGS => 2,
        opf::FADDS | opf::FADDD | opf::FSUBS | opf::FSUBD => 4,
        opf::FCMPS | opf::FCMPD | opf::FCMPES | opf::FCMPED => 4,
        opf::FDIVS => 20,
        opf::FDIVD => 35,
        opf::FMULS => 5,
        opf::FMULD => 9,
        opf::FSQRTS => 37,
        opf::FSQRTD => 65,
        opf::FDTOI => 7,
        opf::FDTOS => 3,
        opf::FITOS | opf::FITOD | opf::FSTOI => 6,
        opf::FSTOD => 2,
        _ => return None,
    };
    Some(cycles)
}

/// Deferred-exception state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FpState {
    #[default]
    Executing,
    /// An exception was detected; the next FP instruction takes the trap.
    Pending,
    /// The trap was taken; FPops are rejected until the queue is drained.
    ExceptionMode,
}

/// Entry of the floating-point deferred-trap queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpQueueEntry {
    pub addr: u32,
    pub inst: u32,
}

/// Decoded FPop fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FpOp {
    pub opf: u16,
    pub rd: u8,
    pub rs1: u8,
    pub rs2: u8,
}

#[derive(Debug)]
pub struct Fpu {
    pub present: bool,
    regs: [u32; 32],
    pub fsr: u32,
    pub state: FpState,
    pub queue: VecDeque<FpQueueEntry>,

    /// Time at which the operation in flight retires.
    pub ftime: u64,
    /// Time at which the last FP load lands, and its destination.
    pub ltime: u64,
    flrd: u8,
    frd: u8,
    frs1: u8,
    frs2: u8,
    /// Stall cycles charged to the current instruction.
    pub fhold: u64,
    pub ops: u64,
}

impl Fpu {
    pub fn new(present: bool) -> Self {
        Self {
            present,
            regs: [0; 32],
            fsr: 0,
            state: FpState::Executing,
            queue: VecDeque::with_capacity(2),
            ftime: 0,
            ltime: 0,
            flrd: 0,
            frd: 0,
            frs1: 0,
            frs2: 0,
            fhold: 0,
            ops: 0,
        }
    }

    /// Clears status and timing. Register contents are kept.
    pub fn reset(&mut self) {
        self.fsr = 0;
        self.state = FpState::Executing;
        self.queue.clear();
        self.ftime = 0;
        self.ltime = 0;
        self.flrd = 0;
        self.frd = 0;
        self.frs1 = 0;
        self.frs2 = 0;
        self.fhold = 0;
    }

    pub fn read_word(&self, i: usize) -> u32 {
        self.regs[i & 31]
    }

    pub fn write_word(&mut self, i: usize, v: u32) {
        self.regs[i & 31] = v;
    }

    pub fn read_single(&self, i: usize) -> f32 {
        f32::from_bits(self.read_word(i))
    }

    pub fn write_single(&mut self, i: usize, v: f32) {
        self.write_word(i, v.to_bits());
    }

    /// Double in the even/odd pair containing `i`; the even register holds the high word.
    pub fn read_double(&self, i: usize) -> f64 {
        let even = i & 30;
        f64::from_bits(((self.regs[even] as u64) << 32) | self.regs[even + 1] as u64)
    }

    pub fn write_double(&mut self, i: usize, v: f64) {
        let even = i & 30;
        let bits = v.to_bits();
        self.regs[even] = (bits >> 32) as u32;
        self.regs[even + 1] = bits as u32;
    }

    pub fn fcc(&self) -> u32 {
        (self.fsr & fsr::FCC) >> fsr::FCC_SHIFT
    }

    fn rounding(&self) -> Rounding {
        Rounding::from_fsr(self.fsr)
    }

    fn set_ftt(&mut self, ftt: u32) {
        self.fsr = (self.fsr & !fsr::FTT) | ftt;
    }

    fn enqueue(&mut self, addr: u32, inst: u32) {
        if self.queue.len() == 2 {
            self.queue.pop_front();
        }
        self.queue.push_back(FpQueueEntry { addr, inst });
        self.fsr |= fsr::QNE;
    }

    /// Reports a pending deferred exception. Any FP instruction calls this first.
    pub fn take_deferred(&mut self, pc: u32) -> Result<(), Trap> {
        if self.state == FpState::Pending {
            self.state = FpState::ExceptionMode;
            return Err(Trap::FpException { pc });
        }
        Ok(())
    }

    /// Stalls until the operation in flight retires if it touches any of `regs`.
    pub fn wait_for_regs(&mut self, now: u64, regs: &[u8]) {
        if self.ftime > now && regs.iter().any(|&r| r == self.frd || r == self.frs1 || r == self.frs2) {
            self.fhold += self.ftime - now;
        }
    }

    /// Stalls until the operation in flight retires.
    pub fn wait_all(&mut self, now: u64) {
        if self.ftime > now {
            self.fhold += self.ftime - now;
        }
    }

    /// Records an FP load so that a dependent FPop can be held back.
    pub fn note_load(&mut self, rd: u8, lands_at: u64) {
        self.flrd = rd;
        self.ltime = lands_at;
    }

    /// LDFSR: the version, trap type and queue flag are not writable.
    pub fn load_fsr(&mut self, v: u32) {
        self.fsr = (self.fsr & fsr::LD_PRESERVED) | (v & !fsr::LD_PRESERVED);
    }

    /// STDFQ: pops the oldest queue entry. `None` means the queue was empty,
    /// which raises a sequence error.
    pub fn pop_queue(&mut self) -> Option<FpQueueEntry> {
        let Some(e) = self.queue.pop_front() else {
            self.set_ftt(fsr::FTT_SEQ_ERR);
            return None;
        };
        if self.queue.is_empty() {
            self.fsr &= !fsr::QNE;
            self.state = FpState::Executing;
        }
        Some(e)
    }

    /// Executes one FPop. `hold` is the integer-unit hold already charged to
    /// this instruction.
    pub fn fpop(&mut self, pc: u32, inst: u32, op: FpOp, now: u64, hold: u64) -> Result<(), Trap> {
        match self.state {
            FpState::ExceptionMode => {
                self.set_ftt(fsr::FTT_SEQ_ERR);
                self.state = FpState::Pending;
                return Ok(());
            }
            FpState::Pending => {
                self.state = FpState::ExceptionMode;
                return Err(Trap::FpException { pc });
            }
            FpState::Executing => {}
        }

        if self.ftime > now {
            self.fhold += self.ftime - now;
        } else if self.ltime > now && (op.rs1 == self.flrd || op.rs2 == self.flrd) {
            self.fhold += 1;
        }
        self.frd = op.rd;
        self.frs1 = op.rs1;
        self.frs2 = op.rs2;
        self.ops += 1;

        let Some(lat) = latency(op.opf) else {
            tracing::debug!(pc = format_args!("0x{pc:08x}"), opf = op.opf, "unimplemented FPop");
            self.set_ftt(fsr::FTT_UNIMP);
            self.state = FpState::Pending;
            self.enqueue(pc, inst);
            self.ftime = now + hold + self.fhold;
            return Ok(());
        };
        self.ftime = now + hold + self.fhold + lat;

        let exc = self.compute(op);
        let tem = (self.fsr & fsr::TEM) >> fsr::TEM_SHIFT;
        if tem & exc != 0 {
            self.state = FpState::Pending;
            self.enqueue(pc, inst);
            self.set_ftt(fsr::FTT_IEEE);
            self.fsr = (self.fsr & !fsr::CEXC) | exc;
        } else {
            self.set_ftt(0);
            let aexc = (self.fsr & fsr::AEXC) | (exc << fsr::AEXC_SHIFT);
            self.fsr = (self.fsr & !(fsr::CEXC | fsr::AEXC)) | aexc | exc;
        }
        Ok(())
    }

    /// Performs the arithmetic. The destination is only written when no
    /// enabled exception was raised.
    fn compute(&mut self, op: FpOp) -> u32 {
        let (rd, rs1, rs2) = (op.rd as usize, op.rs1 as usize, op.rs2 as usize);
        let rnd = self.rounding();
        let tem = (self.fsr & fsr::TEM) >> fsr::TEM_SHIFT;
        let (s1, s2) = (self.read_single(rs1), self.read_single(rs2));
        let (d1, d2) = (self.read_double(rs1), self.read_double(rs2));
        let w2 = self.read_word(rs2);

        let out = match op.opf {
            opf::FMOVS => Output::Word(Rounded { value: w2, exc: 0 }),
            opf::FNEGS => Output::Word(Rounded { value: w2 ^ 0x8000_0000, exc: 0 }),
            opf::FABSS => Output::Word(Rounded { value: w2 & 0x7fff_ffff, exc: 0 }),
            opf::FADDS => Output::Single(ieee::binary_s(BinOp::Add, s1, s2, rnd)),
            opf::FSUBS => Output::Single(ieee::binary_s(BinOp::Sub, s1, s2, rnd)),
            opf::FMULS => Output::Single(ieee::binary_s(BinOp::Mul, s1, s2, rnd)),
            opf::FDIVS => Output::Single(ieee::binary_s(BinOp::Div, s1, s2, rnd)),
            opf::FADDD => Output::Double(ieee::binary_d(BinOp::Add, d1, d2, rnd)),
            opf::FSUBD => Output::Double(ieee::binary_d(BinOp::Sub, d1, d2, rnd)),
            opf::FMULD => Output::Double(ieee::binary_d(BinOp::Mul, d1, d2, rnd)),
            opf::FDIVD => Output::Double(ieee::binary_d(BinOp::Div, d1, d2, rnd)),
            opf::FSQRTS => Output::Single(ieee::sqrt_s(s2, rnd)),
            opf::FSQRTD => Output::Double(ieee::sqrt_d(d2, rnd)),
            opf::FITOS => Output::Single(ieee::int_to_s(w2 as i32, rnd)),
            opf::FITOD => Output::Double(ieee::int_to_d(w2 as i32)),
            opf::FSTOD => Output::Double(ieee::s_to_d(s2)),
            opf::FDTOS => Output::Single(ieee::d_to_s(d2, rnd)),
            opf::FSTOI => Output::int(ieee::to_int_s(s2)),
            opf::FDTOI => Output::int(ieee::to_int_d(d2)),
            opf::FCMPS => Output::Fcc(ieee::compare_s(s1, s2, false)),
            opf::FCMPES => Output::Fcc(ieee::compare_s(s1, s2, true)),
            opf::FCMPD => Output::Fcc(ieee::compare_d(d1, d2, false)),
            opf::FCMPED => Output::Fcc(ieee::compare_d(d1, d2, true)),
            _ => return 0,
        };

        let exc = out.exc();
        if exc & tem != 0 {
            return exc;
        }
        match out {
            Output::Word(r) => self.write_word(rd, r.value),
            Output::Single(r) => self.write_single(rd, r.value),
            Output::Double(r) => self.write_double(rd, r.value),
            Output::Fcc(r) => self.fsr = (self.fsr & !fsr::FCC) | (r.value << fsr::FCC_SHIFT),
        }
        exc
    }
}

/// Where an FPop result goes.
enum Output {
    Word(Rounded<u32>),
    Single(Rounded<f32>),
    Double(Rounded<f64>),
    Fcc(Rounded<u32>),
}

impl Output {
    fn int(r: Rounded<i32>) -> Self {
        Output::Word(Rounded { value: r.value as u32, exc: r.exc })
    }

    fn exc(&self) -> u32 {
        match self {
            Output::Word(r) | Output::Fcc(r) => r.exc,
            Output::Single(r) => r.exc,
            Output::Double(r) => r.exc,
        }
    }
}
