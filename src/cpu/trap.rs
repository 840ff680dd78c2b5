use crate::mem::MemError;
use thiserror::Error;

/// SPARC trap type numbers.
pub mod tt {
    pub const INSTRUCTION_ACCESS: u32 = 0x01;
    pub const ILLEGAL_INSTRUCTION: u32 = 0x02;
    pub const PRIVILEGED_INSTRUCTION: u32 = 0x03;
    pub const FP_DISABLED: u32 = 0x04;
    pub const WINDOW_OVERFLOW: u32 = 0x05;
    pub const WINDOW_UNDERFLOW: u32 = 0x06;
    pub const UNALIGNED: u32 = 0x07;
    pub const FP_EXCEPTION: u32 = 0x08;
    pub const DATA_ACCESS: u32 = 0x09;
    pub const TAG_OVERFLOW: u32 = 0x0a;
    pub const INTERRUPT_BASE: u32 = 0x10;
    pub const CP_DISABLED: u32 = 0x24;
    pub const DIVISION_BY_ZERO: u32 = 0x2a;
    pub const SOFTWARE_BASE: u32 = 0x80;
    /// Not an architectural trap: forces the processor to the reset vector.
    pub const COLD_RESET: u32 = 0x100;
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trap {
    #[error("instruction access fault at pc=0x{pc:08x}")]
    InstructionAccess { pc: u32 },

    #[error("illegal instruction at pc=0x{pc:08x} inst=0x{inst:08x}")]
    IllegalInstruction { pc: u32, inst: u32 },

    #[error("privileged instruction at pc=0x{pc:08x}")]
    PrivilegedInstruction { pc: u32 },

    #[error("floating-point disabled at pc=0x{pc:08x}")]
    FpDisabled { pc: u32 },

    #[error("window overflow at pc=0x{pc:08x}")]
    WindowOverflow { pc: u32 },

    #[error("window underflow at pc=0x{pc:08x}")]
    WindowUnderflow { pc: u32 },

    #[error("unaligned access at pc=0x{pc:08x}, addr=0x{addr:08x}")]
    Unaligned { pc: u32, addr: u32 },

    #[error("floating-point exception at pc=0x{pc:08x}")]
    FpException { pc: u32 },

    #[error("data access fault at pc=0x{pc:08x}: {err}")]
    DataAccess { pc: u32, err: MemError },

    #[error("tag overflow at pc=0x{pc:08x}")]
    TagOverflow { pc: u32 },

    #[error("coprocessor disabled at pc=0x{pc:08x}")]
    CpDisabled { pc: u32 },

    #[error("division by zero at pc=0x{pc:08x}")]
    DivisionByZero { pc: u32 },

    #[error("interrupt level {level}")]
    Interrupt { level: u8 },

    #[error("software trap {number} at pc=0x{pc:08x}")]
    Software { pc: u32, number: u8 },

    #[error("cold reset")]
    ColdReset,
}

impl Trap {
    /// Trap type number written into TBR.tt.
    pub fn tt(&self) -> u32 {
        match self {
            Trap::InstructionAccess { .. } => tt::INSTRUCTION_ACCESS,
            Trap::IllegalInstruction { .. } => tt::ILLEGAL_INSTRUCTION,
            Trap::PrivilegedInstruction { .. } => tt::PRIVILEGED_INSTRUCTION,
            Trap::FpDisabled { .. } => tt::FP_DISABLED,
            Trap::WindowOverflow { .. } => tt::WINDOW_OVERFLOW,
            Trap::WindowUnderflow { .. } => tt::WINDOW_UNDERFLOW,
            Trap::Unaligned { .. } => tt::UNALIGNED,
            Trap::FpException { .. } => tt::FP_EXCEPTION,
            Trap::DataAccess { .. } => tt::DATA_ACCESS,
            Trap::TagOverflow { .. } => tt::TAG_OVERFLOW,
            Trap::CpDisabled { .. } => tt::CP_DISABLED,
            Trap::DivisionByZero { .. } => tt::DIVISION_BY_ZERO,
            Trap::Interrupt { level } => tt::INTERRUPT_BASE + *level as u32,
            Trap::Software { number, .. } => tt::SOFTWARE_BASE + (*number as u32 & 0x7f),
            Trap::ColdReset => tt::COLD_RESET,
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Trap::Interrupt { .. })
    }
}

/// Trait for adding PC context to errors that can become Traps
pub trait WithPc<T> {
    fn with_pc(self, pc: u32) -> Result<T, Trap>;
}

impl<T> WithPc<T> for Result<T, MemError> {
    fn with_pc(self, pc: u32) -> Result<T, Trap> {
        self.map_err(|err| Trap::DataAccess { pc, err })
    }
}

impl<T> WithPc<T> for Result<T, crate::csr::CsrError> {
    fn with_pc(self, pc: u32) -> Result<T, Trap> {
        self.map_err(|_err| Trap::PrivilegedInstruction { pc })
    }
}

impl<T> WithPc<T> for Result<T, crate::cpu::decode::DecodeError> {
    fn with_pc(self, pc: u32) -> Result<T, Trap> {
        self.map_err(|err| match err {
            crate::cpu::decode::DecodeError::InvalidOpcode { inst }
            | crate::cpu::decode::DecodeError::Unimplemented { inst } => Trap::IllegalInstruction { pc, inst },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trap_numbers() {
        assert_eq!(Trap::Interrupt { level: 13 }.tt(), 0x1d);
        assert_eq!(Trap::Software { pc: 0, number: 1 }.tt(), 0x81);
        assert_eq!(Trap::ColdReset.tt(), 256);
        assert_eq!(Trap::DataAccess { pc: 0, err: MemError::Unimplemented(0) }.tt(), 9);
    }
}
