use super::decode::{AluOp, Instr, MemOp, Operand, ShiftOp};
use super::regs::NWINDOWS;
use super::timing::*;
use super::trap::{Trap, WithPc};
use super::{Bus, Cpu};
use crate::csr::{Psr, psr};
use crate::fpu::FpOp;
use crate::mem::{Width, asi};

#[inline]
fn nz(r: u32) -> u32 {
    let mut icc = 0;
    if r & 0x8000_0000 != 0 {
        icc |= psr::N;
    }
    if r == 0 {
        icc |= psr::Z;
    }
    icc
}

/// Condition codes of `r = a + b (+ carry)`, in PSR position.
pub fn add_cc(a: u32, b: u32, r: u32) -> u32 {
    let mut icc = nz(r);
    if ((a & b & !r) | (!a & !b & r)) & 0x8000_0000 != 0 {
        icc |= psr::V;
    }
    if ((a & b) | ((a | b) & !r)) & 0x8000_0000 != 0 {
        icc |= psr::C;
    }
    icc
}

/// Condition codes of `r = a - b (- carry)`, in PSR position.
pub fn sub_cc(a: u32, b: u32, r: u32) -> u32 {
    let mut icc = nz(r);
    if ((a & !b & !r) | (!a & b & r)) & 0x8000_0000 != 0 {
        icc |= psr::V;
    }
    if ((!a & b) | ((!a | b) & r)) & 0x8000_0000 != 0 {
        icc |= psr::C;
    }
    icc
}

/// Logical operations clear V and C.
pub fn logic_cc(r: u32) -> u32 {
    nz(r)
}

/// Bicc/Ticc condition.
pub fn icc_condition(cond: u8, psr: Psr) -> bool {
    let (n, z, v, c) = (psr.n(), psr.z(), psr.v(), psr.c());
    let t = match cond & 7 {
        0 => false,
        1 => z,
        2 => z || (n ^ v),
        3 => n ^ v,
        4 => c || z,
        5 => c,
        6 => n,
        _ => v,
    };
    if cond & 8 != 0 { !t } else { t }
}

/// FBfcc condition. Bit `fcc` of each mask is set when the branch is taken
/// (0 equal, 1 less, 2 greater, 3 unordered).
pub fn fcc_condition(cond: u8, fcc: u32) -> bool {
    const TAKEN: [u8; 16] = [
        0b0000, // fbn
        0b1110, // fbne
        0b0110, // fblg
        0b1010, // fbul
        0b0010, // fbl
        0b1100, // fbug
        0b0100, // fbg
        0b1000, // fbu
        0b1111, // fba
        0b0001, // fbe
        0b1001, // fbue
        0b0101, // fbge
        0b1101, // fbuge
        0b0011, // fble
        0b1011, // fbule
        0b0111, // fbo
    ];
    TAKEN[(cond & 15) as usize] >> (fcc & 3) & 1 != 0
}

/// Integer registers read by `instr`, zero where unused.
fn sources(instr: &Instr) -> [u8; 3] {
    let reg = |op2: &Operand| match op2 {
        Operand::Reg(r) => *r,
        Operand::Imm(_) => 0,
    };
    match instr {
        Instr::Alu { rs1, op2, .. }
        | Instr::Tagged { rs1, op2, .. }
        | Instr::MulScc { rs1, op2, .. }
        | Instr::Shift { rs1, op2, .. }
        | Instr::Wr { rs1, op2, .. }
        | Instr::Jmpl { rs1, op2, .. }
        | Instr::Rett { rs1, op2 }
        | Instr::Ticc { rs1, op2, .. }
        | Instr::Flush { rs1, op2 }
        | Instr::Save { rs1, op2, .. }
        | Instr::Restore { rs1, op2, .. } => [*rs1, reg(op2), 0],
        Instr::Mem { op, rd, rs1, op2, .. } => {
            let stores = matches!(op, MemOp::St | MemOp::Stb | MemOp::Sth | MemOp::Std | MemOp::Swap);
            [*rs1, reg(op2), if stores { *rd } else { 0 }]
        }
        _ => [0; 3],
    }
}

fn fp_enabled(cpu: &Cpu, pc: u32) -> Result<(), Trap> {
    if cpu.csr.psr.ef() && cpu.fpu.present {
        Ok(())
    } else {
        Err(Trap::FpDisabled { pc })
    }
}

/// Delayed control transfer. An untaken annulling branch skips its delay
/// slot, and so does a taken `ba,a`.
fn branch(cpu: &mut Cpu, target: u32, cond: u8, taken: bool, annul: bool) {
    let npc = cpu.npc;
    cpu.pc = npc;
    if taken {
        cpu.npc = target;
        cpu.annul = annul && cond == 8;
    } else {
        cpu.npc = npc.wrapping_add(4);
        cpu.annul = annul;
    }
}

pub fn execute(cpu: &mut Cpu, bus: &mut dyn Bus, inst: u32, instr: Instr) -> Result<(), Trap> {
    let pc = cpu.pc;
    let npc = cpu.npc;
    let now = bus.now();

    let r = |cpu: &Cpu, idx: u8| -> u32 { cpu.reg(idx) };
    let operand = |cpu: &Cpu, op2: Operand| -> u32 {
        match op2 {
            Operand::Reg(rs2) => cpu.reg(rs2),
            Operand::Imm(imm) => imm as u32,
        }
    };
    let next = |cpu: &mut Cpu| {
        cpu.pc = npc;
        cpu.npc = npc.wrapping_add(4);
    };

    cpu.interlock(now, &sources(&instr));
    cpu.clear_load();

    match instr {
        Instr::Call { disp } => {
            cpu.set_reg(15, pc);
            cpu.pc = npc;
            cpu.npc = pc.wrapping_add(disp as u32);
        }
        Instr::Sethi { rd, imm } => {
            cpu.set_reg(rd, imm);
            next(cpu);
        }
        Instr::Bicc { cond, annul, disp } => {
            let taken = icc_condition(cond, cpu.csr.psr);
            branch(cpu, pc.wrapping_add(disp as u32), cond, taken, annul);
        }
        Instr::FBfcc { cond, annul, disp } => {
            fp_enabled(cpu, pc)?;
            cpu.fpu.wait_all(now);
            let taken = fcc_condition(cond, cpu.fpu.fcc());
            branch(cpu, pc.wrapping_add(disp as u32), cond, taken, annul);
        }
        Instr::CBccc | Instr::CPop => return Err(Trap::CpDisabled { pc }),

        Instr::Alu { op, cc, rd, rs1, op2 } => {
            let a = r(cpu, rs1);
            let b = operand(cpu, op2);
            let carry = cpu.csr.psr.c() as u32;
            let (res, icc) = match op {
                AluOp::Add => {
                    let v = a.wrapping_add(b);
                    (v, add_cc(a, b, v))
                }
                AluOp::AddX => {
                    let v = a.wrapping_add(b).wrapping_add(carry);
                    (v, add_cc(a, b, v))
                }
                AluOp::Sub => {
                    let v = a.wrapping_sub(b);
                    (v, sub_cc(a, b, v))
                }
                AluOp::SubX => {
                    let v = a.wrapping_sub(b).wrapping_sub(carry);
                    (v, sub_cc(a, b, v))
                }
                AluOp::And => (a & b, logic_cc(a & b)),
                AluOp::AndN => (a & !b, logic_cc(a & !b)),
                AluOp::Or => (a | b, logic_cc(a | b)),
                AluOp::OrN => (a | !b, logic_cc(a | !b)),
                AluOp::Xor => (a ^ b, logic_cc(a ^ b)),
                AluOp::XNor => (a ^ !b, logic_cc(a ^ !b)),
                AluOp::UMul | AluOp::SMul => {
                    let product = if op == AluOp::UMul {
                        a as u64 * b as u64
                    } else {
                        (a as i32 as i64 * b as i32 as i64) as u64
                    };
                    cpu.csr.y = (product >> 32) as u32;
                    cpu.icnt = T_MUL;
                    (product as u32, nz(product as u32))
                }
                AluOp::UDiv | AluOp::SDiv => {
                    if b == 0 {
                        return Err(Trap::DivisionByZero { pc });
                    }
                    let dividend = ((cpu.csr.y as u64) << 32) | a as u64;
                    let (q, overflow) = if op == AluOp::UDiv {
                        let q = dividend / b as u64;
                        if q > u32::MAX as u64 { (u32::MAX, true) } else { (q as u32, false) }
                    } else {
                        let q = (dividend as i64).wrapping_div(b as i32 as i64);
                        if q > i32::MAX as i64 {
                            (i32::MAX as u32, true)
                        } else if q < i32::MIN as i64 {
                            (i32::MIN as u32, true)
                        } else {
                            (q as i32 as u32, false)
                        }
                    };
                    cpu.icnt = T_DIV;
                    (q, nz(q) | if overflow { psr::V } else { 0 })
                }
            };
            if cc {
                cpu.csr.psr.set_icc(icc);
            }
            cpu.set_reg(rd, res);
            next(cpu);
        }
        Instr::Tagged { sub, trap_ov, rd, rs1, op2 } => {
            let a = r(cpu, rs1);
            let b = operand(cpu, op2);
            let (res, mut icc) = if sub {
                let v = a.wrapping_sub(b);
                (v, sub_cc(a, b, v))
            } else {
                let v = a.wrapping_add(b);
                (v, add_cc(a, b, v))
            };
            if (a | b) & 3 != 0 {
                icc |= psr::V;
            }
            if trap_ov && icc & psr::V != 0 {
                return Err(Trap::TagOverflow { pc });
            }
            cpu.csr.psr.set_icc(icc);
            cpu.set_reg(rd, res);
            next(cpu);
        }
        Instr::MulScc { rd, rs1, op2 } => {
            let a = r(cpu, rs1);
            let p = cpu.csr.psr;
            let op1 = (a >> 1) | (((p.n() ^ p.v()) as u32) << 31);
            let addend = if cpu.csr.y & 1 != 0 { operand(cpu, op2) } else { 0 };
            let res = op1.wrapping_add(addend);
            cpu.csr.psr.set_icc(add_cc(op1, addend, res));
            cpu.csr.y = (a << 31) | (cpu.csr.y >> 1);
            cpu.set_reg(rd, res);
            next(cpu);
        }
        Instr::Shift { op, rd, rs1, op2 } => {
            let a = r(cpu, rs1);
            let count = operand(cpu, op2) & 31;
            let res = match op {
                ShiftOp::Sll => a << count,
                ShiftOp::Srl => a >> count,
                ShiftOp::Sra => ((a as i32) >> count) as u32,
            };
            cpu.set_reg(rd, res);
            next(cpu);
        }

        Instr::Rd { csr, rd } => {
            let v = cpu.csr.read(csr).with_pc(pc)?;
            cpu.set_reg(rd, v);
            next(cpu);
        }
        Instr::Wr { csr, rs1, op2 } => {
            let v = r(cpu, rs1) ^ operand(cpu, op2);
            cpu.csr.write(csr, v).with_pc(pc)?;
            next(cpu);
        }
        Instr::Stbar | Instr::Flush { .. } => next(cpu),

        Instr::FPop1 { opf, rd, rs1, rs2 } | Instr::FPop2 { opf, rd, rs1, rs2 } => {
            fp_enabled(cpu, pc)?;
            let hold = cpu.hold;
            cpu.fpu.fpop(pc, inst, FpOp { opf, rd, rs1, rs2 }, now, hold)?;
            next(cpu);
        }

        Instr::Jmpl { rd, rs1, op2 } => {
            let target = r(cpu, rs1).wrapping_add(operand(cpu, op2));
            if target & 3 != 0 {
                return Err(Trap::Unaligned { pc, addr: target });
            }
            cpu.set_reg(rd, pc);
            cpu.pc = npc;
            cpu.npc = target;
            cpu.icnt = T_JMPL;
        }
        Instr::Rett { rs1, op2 } => {
            let p = cpu.csr.psr;
            if !p.s() {
                return Err(Trap::PrivilegedInstruction { pc });
            }
            if p.et() {
                return Err(Trap::IllegalInstruction { pc, inst });
            }
            let cwp = (p.cwp() + 1) % NWINDOWS;
            if cpu.csr.window_invalid(cwp) {
                return Err(Trap::WindowUnderflow { pc });
            }
            let target = r(cpu, rs1).wrapping_add(operand(cpu, op2));
            if target & 3 != 0 {
                return Err(Trap::Unaligned { pc, addr: target });
            }
            let state = &mut cpu.csr.psr;
            state.set_cwp(cwp);
            state.set_s(p.ps());
            state.set_et(true);
            cpu.pc = npc;
            cpu.npc = target;
            cpu.icnt = T_RETT;
        }
        Instr::Ticc { cond, rs1, op2 } => {
            if icc_condition(cond, cpu.csr.psr) {
                let number = (r(cpu, rs1).wrapping_add(operand(cpu, op2)) & 0x7f) as u8;
                return Err(Trap::Software { pc, number });
            }
            next(cpu);
        }
        Instr::Save { rd, rs1, op2 } => {
            let cwp = (cpu.cwp() + NWINDOWS - 1) % NWINDOWS;
            if cpu.csr.window_invalid(cwp) {
                return Err(Trap::WindowOverflow { pc });
            }
            let v = r(cpu, rs1).wrapping_add(operand(cpu, op2));
            cpu.csr.psr.set_cwp(cwp);
            cpu.set_reg(rd, v);
            next(cpu);
        }
        Instr::Restore { rd, rs1, op2 } => {
            let cwp = (cpu.cwp() + 1) % NWINDOWS;
            if cpu.csr.window_invalid(cwp) {
                return Err(Trap::WindowUnderflow { pc });
            }
            let v = r(cpu, rs1).wrapping_add(operand(cpu, op2));
            cpu.csr.psr.set_cwp(cwp);
            cpu.set_reg(rd, v);
            next(cpu);
        }

        Instr::Mem { op, rd, rs1, op2, asi } => {
            let addr = r(cpu, rs1).wrapping_add(operand(cpu, op2));
            memory(cpu, bus, now, MemAccess { op, rd, addr, asi })?;
            next(cpu);
        }
    }
    Ok(())
}

struct MemAccess {
    op: MemOp,
    rd: u8,
    addr: u32,
    asi: Option<u8>,
}

fn memory(cpu: &mut Cpu, bus: &mut dyn Bus, now: u64, access: MemAccess) -> Result<(), Trap> {
    let MemAccess { op, rd, addr, asi } = access;
    let pc = cpu.pc;
    let supervisor = cpu.csr.psr.s();

    if asi.is_some() && !supervisor {
        return Err(Trap::PrivilegedInstruction { pc });
    }
    if op.is_fp() {
        fp_enabled(cpu, pc)?;
        cpu.fpu.take_deferred(pc)?;
    }
    if addr & (op.align() - 1) != 0 {
        return Err(Trap::Unaligned { pc, addr });
    }
    let asi = asi.unwrap_or(if supervisor { asi::SUPER_DATA } else { asi::USER_DATA });
    let even = rd & !1;
    let odd = rd | 1;

    match op {
        MemOp::Ld | MemOp::Ldub | MemOp::Lduh | MemOp::Ldsb | MemOp::Ldsh => {
            let width = match op {
                MemOp::Ld => Width::Word,
                MemOp::Lduh | MemOp::Ldsh => Width::Half,
                _ => Width::Byte,
            };
            let (raw, ws) = bus.read(asi, addr, width).with_pc(pc)?;
            let value = match op {
                MemOp::Ldsb => raw as u8 as i8 as i32 as u32,
                MemOp::Ldsh => raw as u16 as i16 as i32 as u32,
                _ => raw,
            };
            cpu.hold += ws as u64;
            cpu.icnt = T_LD;
            cpu.set_reg(rd, value);
            cpu.note_load(rd, now);
            cpu.counters.loads += 1;
        }
        MemOp::Ldd => {
            let ([hi, lo], ws) = bus.read_double(asi, addr).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_LDD;
            cpu.set_reg(even, hi);
            cpu.set_reg(odd, lo);
            cpu.note_load(odd, now);
            cpu.counters.loads += 1;
        }
        MemOp::St | MemOp::Stb | MemOp::Sth => {
            let width = match op {
                MemOp::St => Width::Word,
                MemOp::Sth => Width::Half,
                _ => Width::Byte,
            };
            let ws = bus.write(asi, addr, cpu.reg(rd), width).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_ST;
            cpu.counters.stores += 1;
        }
        MemOp::Std => {
            let data = [cpu.reg(even), cpu.reg(odd)];
            let ws = bus.write_double(asi, addr, data).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_STD;
            cpu.counters.stores += 1;
        }
        MemOp::Ldstub | MemOp::Swap => {
            let (width, store) = if op == MemOp::Ldstub {
                (Width::Byte, 0xff)
            } else {
                (Width::Word, cpu.reg(rd))
            };
            let (old, rws) = bus.read(asi, addr, width).with_pc(pc)?;
            let wws = bus.write(asi, addr, store, width).with_pc(pc)?;
            cpu.hold += (rws + wws) as u64;
            cpu.icnt = T_LDST;
            cpu.set_reg(rd, old);
            cpu.note_load(rd, now);
            cpu.counters.loads += 1;
            cpu.counters.stores += 1;
        }

        MemOp::Ldf => {
            cpu.fpu.wait_for_regs(now, &[rd]);
            let (v, ws) = bus.read(asi, addr, Width::Word).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_LD;
            cpu.fpu.write_word(rd as usize, v);
            cpu.fpu.note_load(rd, now + cpu.hold + cpu.icnt);
            cpu.counters.loads += 1;
        }
        MemOp::Lddf => {
            cpu.fpu.wait_for_regs(now, &[even, odd]);
            let ([hi, lo], ws) = bus.read_double(asi, addr).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_LDD;
            cpu.fpu.write_word(even as usize, hi);
            cpu.fpu.write_word(odd as usize, lo);
            cpu.fpu.note_load(odd, now + cpu.hold + cpu.icnt);
            cpu.counters.loads += 1;
        }
        MemOp::Ldfsr => {
            cpu.fpu.wait_all(now);
            let (v, ws) = bus.read(asi, addr, Width::Word).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_LD;
            cpu.fpu.load_fsr(v);
            cpu.counters.loads += 1;
        }
        MemOp::Stf => {
            cpu.fpu.wait_for_regs(now, &[rd]);
            let ws = bus.write(asi, addr, cpu.fpu.read_word(rd as usize), Width::Word).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_ST;
            cpu.counters.stores += 1;
        }
        MemOp::Stdf => {
            cpu.fpu.wait_for_regs(now, &[even, odd]);
            let data = [cpu.fpu.read_word(even as usize), cpu.fpu.read_word(odd as usize)];
            let ws = bus.write_double(asi, addr, data).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_STD;
            cpu.counters.stores += 1;
        }
        MemOp::Stfsr => {
            cpu.fpu.wait_all(now);
            let ws = bus.write(asi, addr, cpu.fpu.fsr, Width::Word).with_pc(pc)?;
            cpu.hold += ws as u64;
            cpu.icnt = T_ST;
            cpu.counters.stores += 1;
        }
        MemOp::Stdfq => {
            if !supervisor {
                return Err(Trap::PrivilegedInstruction { pc });
            }
            cpu.icnt = T_STD;
            if let Some(entry) = cpu.fpu.pop_queue() {
                let ws = bus.write_double(asi, addr, [entry.addr, entry.inst]).with_pc(pc)?;
                cpu.hold += ws as u64;
                cpu.counters.stores += 1;
            }
        }
        MemOp::Coproc => return Err(Trap::CpDisabled { pc }),
    }
    Ok(())
}
