use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrError {
    /// Supervisor-only register touched in user mode.
    Privileged(Csr),
}

impl fmt::Display for CsrError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CsrError::Privileged(csr) => write!(f, "privileged access to {:?} in user mode", csr),
        }
    }
}

/// State registers reachable through RDxxx/WRxxx.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Csr {
    Y,
    Psr,
    Wim,
    Tbr,
}

/// PSR bit layout.
pub mod psr {
    pub const N: u32 = 0x0080_0000;
    pub const Z: u32 = 0x0040_0000;
    pub const V: u32 = 0x0020_0000;
    pub const C: u32 = 0x0010_0000;
    pub const ICC: u32 = N | Z | V | C;
    pub const EF: u32 = 0x0000_1000;
    pub const PIL: u32 = 0x0000_0f00;
    pub const S: u32 = 0x0000_0080;
    pub const PS: u32 = 0x0000_0040;
    pub const ET: u32 = 0x0000_0020;
    pub const CWP: u32 = 0x0000_001f;
    /// Implementation and version fields of the ERC32 integer unit.
    pub const IMPL_VER: u32 = 0x1100_0000;
    /// Bits writable by WRPSR.
    pub const WRITABLE: u32 = 0x00f0_3fff;
}

/// FSR bit layout.
pub mod fsr {
    pub const RD: u32 = 0xc000_0000;
    pub const RD_SHIFT: u32 = 30;
    pub const TEM: u32 = 0x0f80_0000;
    pub const TEM_SHIFT: u32 = 23;
    pub const NS: u32 = 0x0040_0000;
    pub const FTT: u32 = 0x0001_c000;
    pub const FTT_IEEE: u32 = 1 << 14;
    pub const FTT_UNIMP: u32 = 3 << 14;
    pub const FTT_SEQ_ERR: u32 = 4 << 14;
    pub const QNE: u32 = 0x0000_2000;
    pub const FCC: u32 = 0x0000_0c00;
    pub const FCC_SHIFT: u32 = 10;
    pub const AEXC: u32 = 0x0000_03e0;
    pub const AEXC_SHIFT: u32 = 5;
    pub const CEXC: u32 = 0x0000_001f;
    /// Fields LDFSR leaves alone (ver, ftt, qne).
    pub const LD_PRESERVED: u32 = 0x000f_e000;
}

/// Processor state register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Psr(pub u32);

impl Psr {
    #[inline]
    pub fn cwp(self) -> usize {
        (self.0 & 7) as usize
    }

    #[inline]
    pub fn set_cwp(&mut self, cwp: usize) {
        self.0 = (self.0 & !psr::CWP) | (cwp as u32 & 7);
    }

    #[inline]
    fn bit(self, mask: u32) -> bool {
        self.0 & mask != 0
    }

    #[inline]
    fn set_bit(&mut self, mask: u32, on: bool) {
        if on {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
    }

    pub fn s(self) -> bool {
        self.bit(psr::S)
    }

    pub fn set_s(&mut self, on: bool) {
        self.set_bit(psr::S, on)
    }

    pub fn ps(self) -> bool {
        self.bit(psr::PS)
    }

    pub fn set_ps(&mut self, on: bool) {
        self.set_bit(psr::PS, on)
    }

    pub fn et(self) -> bool {
        self.bit(psr::ET)
    }

    pub fn set_et(&mut self, on: bool) {
        self.set_bit(psr::ET, on)
    }

    pub fn ef(self) -> bool {
        self.bit(psr::EF)
    }

    pub fn pil(self) -> u8 {
        ((self.0 & psr::PIL) >> 8) as u8
    }

    pub fn n(self) -> bool {
        self.bit(psr::N)
    }

    pub fn z(self) -> bool {
        self.bit(psr::Z)
    }

    pub fn v(self) -> bool {
        self.bit(psr::V)
    }

    pub fn c(self) -> bool {
        self.bit(psr::C)
    }

    /// Replaces the integer condition codes with `icc` (already in PSR position).
    #[inline]
    pub fn set_icc(&mut self, icc: u32) {
        self.0 = (self.0 & !psr::ICC) | (icc & psr::ICC);
    }
}

#[derive(Debug)]
pub struct CsrFile {
    pub psr: Psr,
    pub wim: u32,
    pub tbr: u32,
    pub y: u32,
    /// Whether PSR.EF may be set.
    pub fpu_present: bool,
}

impl Default for CsrFile {
    fn default() -> Self {
        Self::new(true)
    }
}

impl CsrFile {
    pub fn new(fpu_present: bool) -> Self {
        let mut csr = Self { psr: Psr(0), wim: 0, tbr: 0, y: 0, fpu_present };
        csr.reset();
        csr
    }

    /// Supervisor mode, traps disabled. Condition codes and window survive.
    pub fn reset(&mut self) {
        self.psr.0 = (self.psr.0 & 0x00f0_3fdf) | psr::IMPL_VER | psr::S;
        if !self.fpu_present {
            self.psr.0 &= !psr::EF;
        }
    }

    fn check(&self, csr: Csr) -> Result<(), CsrError> {
        if csr != Csr::Y && !self.psr.s() {
            return Err(CsrError::Privileged(csr));
        }
        Ok(())
    }

    pub fn read(&self, csr: Csr) -> Result<u32, CsrError> {
        self.check(csr)?;
        Ok(match csr {
            Csr::Y => self.y,
            Csr::Psr => self.psr.0,
            Csr::Wim => self.wim,
            Csr::Tbr => self.tbr,
        })
    }

    pub fn write(&mut self, csr: Csr, value: u32) -> Result<(), CsrError> {
        self.check(csr)?;
        match csr {
            Csr::Y => self.y = value,
            Csr::Psr => self.write_psr(value),
            Csr::Wim => self.wim = value & 0xff,
            Csr::Tbr => self.tbr = (self.tbr & 0xfff) | (value & 0xffff_f000),
        }
        Ok(())
    }

    /// WRPSR semantics without the privilege check.
    pub fn write_psr(&mut self, value: u32) {
        let mut v = (self.psr.0 & 0xff00_0000) | (value & psr::WRITABLE);
        v &= !0x18; // CWP is taken modulo 8
        if !self.fpu_present {
            v &= !psr::EF;
        }
        self.psr.0 = v;
    }

    /// Whether window `w` is marked invalid.
    pub fn window_invalid(&self, w: usize) -> bool {
        self.wim & (1 << (w & 7)) != 0
    }
}
