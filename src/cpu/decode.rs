use std::fmt;

use crate::csr::Csr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    InvalidOpcode { inst: u32 },
    /// UNIMP, or an alternate-space access with an immediate operand.
    Unimplemented { inst: u32 },
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidOpcode { inst } => write!(f, "invalid opcode: 0x{:08x}", inst),
            DecodeError::Unimplemented { inst } => write!(f, "unimplemented instruction: 0x{:08x}", inst),
        }
    }
}

/// Second ALU operand: a register or a sign-extended 13-bit immediate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operand {
    Reg(u8),
    Imm(i32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AluOp {
    Add,
    And,
    Or,
    Xor,
    Sub,
    AndN,
    OrN,
    XNor,
    AddX,
    UMul,
    SMul,
    SubX,
    UDiv,
    SDiv,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShiftOp {
    Sll,
    Srl,
    Sra,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemOp {
    Ld,
    Ldub,
    Lduh,
    Ldd,
    St,
    Stb,
    Sth,
    Std,
    Ldsb,
    Ldsh,
    Ldstub,
    Swap,
    Ldf,
    Ldfsr,
    Lddf,
    Stf,
    Stfsr,
    Stdfq,
    Stdf,
    /// Coprocessor load/store; always traps on this machine.
    Coproc,
}

impl MemOp {
    /// Required alignment in bytes.
    pub fn align(self) -> u32 {
        match self {
            MemOp::Ldub | MemOp::Ldsb | MemOp::Stb | MemOp::Ldstub => 1,
            MemOp::Lduh | MemOp::Ldsh | MemOp::Sth => 2,
            MemOp::Ldd | MemOp::Std | MemOp::Lddf | MemOp::Stdf | MemOp::Stdfq => 8,
            _ => 4,
        }
    }

    pub fn is_fp(self) -> bool {
        matches!(
            self,
            MemOp::Ldf | MemOp::Ldfsr | MemOp::Lddf | MemOp::Stf | MemOp::Stfsr | MemOp::Stdfq | MemOp::Stdf
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Instr {
    // format 1
    Call { disp: i32 },

    // format 2
    Sethi { rd: u8, imm: u32 },
    Bicc { cond: u8, annul: bool, disp: i32 },
    FBfcc { cond: u8, annul: bool, disp: i32 },
    CBccc,

    // format 3, op = 2
    Alu { op: AluOp, cc: bool, rd: u8, rs1: u8, op2: Operand },
    Tagged { sub: bool, trap_ov: bool, rd: u8, rs1: u8, op2: Operand },
    MulScc { rd: u8, rs1: u8, op2: Operand },
    Shift { op: ShiftOp, rd: u8, rs1: u8, op2: Operand },
    Rd { csr: Csr, rd: u8 },
    Stbar,
    Wr { csr: Csr, rs1: u8, op2: Operand },
    FPop1 { opf: u16, rd: u8, rs1: u8, rs2: u8 },
    FPop2 { opf: u16, rd: u8, rs1: u8, rs2: u8 },
    CPop,
    Jmpl { rd: u8, rs1: u8, op2: Operand },
    Rett { rs1: u8, op2: Operand },
    Ticc { cond: u8, rs1: u8, op2: Operand },
    Flush { rs1: u8, op2: Operand },
    Save { rd: u8, rs1: u8, op2: Operand },
    Restore { rd: u8, rs1: u8, op2: Operand },

    // format 3, op = 3
    Mem { op: MemOp, rd: u8, rs1: u8, op2: Operand, asi: Option<u8> },
}

fn sign_extend(value: u32, bits: u32) -> i32 {
    let shift = 32 - bits;
    ((value << shift) as i32) >> shift
}

fn operand2(inst: u32) -> Operand {
    if inst & 0x2000 != 0 {
        Operand::Imm(sign_extend(inst & 0x1fff, 13))
    } else {
        Operand::Reg((inst & 0x1f) as u8)
    }
}

pub fn decode(inst: u32) -> Result<Instr, DecodeError> {
    let op = inst >> 30;
    let rd = ((inst >> 25) & 0x1f) as u8;
    let rs1 = ((inst >> 14) & 0x1f) as u8;
    let rs2 = (inst & 0x1f) as u8;
    let op3 = (inst >> 19) & 0x3f;

    match op {
        1 => Ok(Instr::Call { disp: (inst << 2) as i32 }),
        0 => {
            let op2 = (inst >> 22) & 7;
            let cond = ((inst >> 25) & 0xf) as u8;
            let annul = inst & 0x2000_0000 != 0;
            let disp = sign_extend(inst & 0x003f_ffff, 22) << 2;
            match op2 {
                0 => Err(DecodeError::Unimplemented { inst }),
                2 => Ok(Instr::Bicc { cond, annul, disp }),
                4 => Ok(Instr::Sethi { rd, imm: inst << 10 }),
                6 => Ok(Instr::FBfcc { cond, annul, disp }),
                7 => Ok(Instr::CBccc),
                _ => Err(DecodeError::InvalidOpcode { inst }),
            }
        }
        2 => {
            let op2 = operand2(inst);
            let alu = |op, cc| Ok(Instr::Alu { op, cc, rd, rs1, op2 });
            let cc = op3 & 0x10 != 0;
            match op3 {
                0x00 | 0x10 => alu(AluOp::Add, cc),
                0x01 | 0x11 => alu(AluOp::And, cc),
                0x02 | 0x12 => alu(AluOp::Or, cc),
                0x03 | 0x13 => alu(AluOp::Xor, cc),
                0x04 | 0x14 => alu(AluOp::Sub, cc),
                0x05 | 0x15 => alu(AluOp::AndN, cc),
                0x06 | 0x16 => alu(AluOp::OrN, cc),
                0x07 | 0x17 => alu(AluOp::XNor, cc),
                0x08 | 0x18 => alu(AluOp::AddX, cc),
                0x0a | 0x1a => alu(AluOp::UMul, cc),
                0x0b | 0x1b => alu(AluOp::SMul, cc),
                0x0c | 0x1c => alu(AluOp::SubX, cc),
                0x0e | 0x1e => alu(AluOp::UDiv, cc),
                0x0f | 0x1f => alu(AluOp::SDiv, cc),
                0x20..=0x23 => Ok(Instr::Tagged { sub: op3 & 1 != 0, trap_ov: op3 & 2 != 0, rd, rs1, op2 }),
                0x24 => Ok(Instr::MulScc { rd, rs1, op2 }),
                0x25 => Ok(Instr::Shift { op: ShiftOp::Sll, rd, rs1, op2 }),
                0x26 => Ok(Instr::Shift { op: ShiftOp::Srl, rd, rs1, op2 }),
                0x27 => Ok(Instr::Shift { op: ShiftOp::Sra, rd, rs1, op2 }),
                0x28 => match rs1 {
                    0 => Ok(Instr::Rd { csr: Csr::Y, rd }),
                    15 if rd == 0 => Ok(Instr::Stbar),
                    _ => Err(DecodeError::InvalidOpcode { inst }),
                },
                0x29 => Ok(Instr::Rd { csr: Csr::Psr, rd }),
                0x2a => Ok(Instr::Rd { csr: Csr::Wim, rd }),
                0x2b => Ok(Instr::Rd { csr: Csr::Tbr, rd }),
                0x30 if rd == 0 => Ok(Instr::Wr { csr: Csr::Y, rs1, op2 }),
                0x31 => Ok(Instr::Wr { csr: Csr::Psr, rs1, op2 }),
                0x32 => Ok(Instr::Wr { csr: Csr::Wim, rs1, op2 }),
                0x33 => Ok(Instr::Wr { csr: Csr::Tbr, rs1, op2 }),
                0x34 => Ok(Instr::FPop1 { opf: ((inst >> 5) & 0x1ff) as u16, rd, rs1, rs2 }),
                0x35 => Ok(Instr::FPop2 { opf: ((inst >> 5) & 0x1ff) as u16, rd, rs1, rs2 }),
                0x36 | 0x37 => Ok(Instr::CPop),
                0x38 => Ok(Instr::Jmpl { rd, rs1, op2 }),
                0x39 => Ok(Instr::Rett { rs1, op2 }),
                0x3a => Ok(Instr::Ticc { cond: rd & 0xf, rs1, op2 }),
                0x3b => Ok(Instr::Flush { rs1, op2 }),
                0x3c => Ok(Instr::Save { rd, rs1, op2 }),
                0x3d => Ok(Instr::Restore { rd, rs1, op2 }),
                _ => Err(DecodeError::InvalidOpcode { inst }),
            }
        }
        _ => {
            let op2 = operand2(inst);
            let alternate = (0x10..0x20).contains(&op3);
            let asi = if alternate {
                if matches!(op2, Operand::Imm(_)) {
                    return Err(DecodeError::Unimplemented { inst });
                }
                Some(((inst >> 5) & 0xff) as u8)
            } else {
                None
            };
            let mem_op = match op3 & !0x10 {
                _ if op3 >= 0x30 => MemOp::Coproc,
                0x00 => MemOp::Ld,
                0x01 => MemOp::Ldub,
                0x02 => MemOp::Lduh,
                0x03 => MemOp::Ldd,
                0x04 => MemOp::St,
                0x05 => MemOp::Stb,
                0x06 => MemOp::Sth,
                0x07 => MemOp::Std,
                0x09 => MemOp::Ldsb,
                0x0a => MemOp::Ldsh,
                0x0d => MemOp::Ldstub,
                0x0f => MemOp::Swap,
                0x20 => MemOp::Ldf,
                0x21 => MemOp::Ldfsr,
                0x23 => MemOp::Lddf,
                0x24 => MemOp::Stf,
                0x25 => MemOp::Stfsr,
                0x26 => MemOp::Stdfq,
                0x27 => MemOp::Stdf,
                _ => return Err(DecodeError::InvalidOpcode { inst }),
            };
            Ok(Instr::Mem { op: mem_op, rd, rs1, op2, asi })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_immediate_operand() {
        // add %g1, -1, %g2
        let inst = (2 << 30) | (2 << 25) | (1 << 14) | 0x2000 | 0x1fff;
        assert_eq!(
            decode(inst),
            Ok(Instr::Alu { op: AluOp::Add, cc: false, rd: 2, rs1: 1, op2: Operand::Imm(-1) })
        );
    }

    #[test]
    fn branch_displacement_is_word_scaled() {
        // ba,a .-4
        let inst = (0b1000 << 25) | (1 << 29) | (2 << 22) | 0x003f_ffff;
        assert_eq!(decode(inst), Ok(Instr::Bicc { cond: 8, annul: true, disp: -4 }));
    }

    #[test]
    fn alternate_space_with_immediate_is_rejected() {
        // lda [%g1 + 4] , %g2 with i = 1
        let inst = (3 << 30) | (2 << 25) | (0x10 << 19) | (1 << 14) | 0x2000 | 4;
        assert!(matches!(decode(inst), Err(DecodeError::Unimplemented { .. })));
    }

    #[test]
    fn ldsb_and_ldsba() {
        let ldsb = (3 << 30) | (1 << 25) | (0x09 << 19) | (2 << 14) | 3;
        assert!(matches!(decode(ldsb), Ok(Instr::Mem { op: MemOp::Ldsb, asi: None, .. })));
        let ldsba = (3 << 30) | (1 << 25) | (0x19 << 19) | (2 << 14) | (0x0b << 5) | 3;
        assert!(matches!(decode(ldsba), Ok(Instr::Mem { op: MemOp::Ldsb, asi: Some(0x0b), .. })));
    }

    #[test]
    fn unimp_is_unimplemented() {
        assert_eq!(decode(0), Err(DecodeError::Unimplemented { inst: 0 }));
    }
}
