/// Number of register windows.
pub const NWINDOWS: usize = 8;
/// Physical windowed registers: 16 per window, ins overlapping the next window's outs.
pub const NWINREGS: usize = NWINDOWS * 16;

/// Physical slot of logical register `reg` (8..=31) in window `window`.
#[inline]
pub fn physical_index(window: usize, reg: usize) -> usize {
    ((window & (NWINDOWS - 1)) * 16 + reg) % NWINREGS
}

/// Globals plus the windowed ring.
#[derive(Debug, Clone)]
pub struct RegisterFile {
    globals: [u32; 8],
    windows: [u32; NWINREGS],
}

impl Default for RegisterFile {
    fn default() -> Self {
        Self { globals: [0; 8], windows: [0; NWINREGS] }
    }
}

impl RegisterFile {
    /// Reads logical register `reg` as seen from window `cwp`. %g0 reads zero.
    #[inline]
    pub fn get(&self, cwp: usize, reg: usize) -> u32 {
        match reg {
            0 => 0,
            1..=7 => self.globals[reg],
            _ => self.windows[physical_index(cwp, reg & 31)],
        }
    }

    /// Writes logical register `reg` as seen from window `cwp`. Writes to %g0 are dropped.
    #[inline]
    pub fn set(&mut self, cwp: usize, reg: usize, value: u32) {
        match reg {
            0 => {}
            1..=7 => self.globals[reg] = value,
            _ => self.windows[physical_index(cwp, reg & 31)] = value,
        }
    }

    /// Direct access to a physical windowed slot.
    pub fn physical(&self, index: usize) -> u32 {
        self.windows[index % NWINREGS]
    }

    pub fn set_physical(&mut self, index: usize, value: u32) {
        self.windows[index % NWINREGS] = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn g0_is_hardwired() {
        let mut r = RegisterFile::default();
        r.set(0, 0, 0xdead_beef);
        assert_eq!(r.get(0, 0), 0);
    }

    #[test]
    fn outs_become_ins_of_the_next_window() {
        let mut r = RegisterFile::default();
        for w in 0..NWINDOWS {
            let callee = (w + NWINDOWS - 1) % NWINDOWS;
            r.set(w, 8 + 3, w as u32 + 100);
            assert_eq!(r.get(callee, 24 + 3), w as u32 + 100);
        }
    }

    #[test]
    fn locals_are_private() {
        let mut r = RegisterFile::default();
        for w in 0..NWINDOWS {
            r.set(w, 16, w as u32);
        }
        for w in 0..NWINDOWS {
            assert_eq!(r.get(w, 16), w as u32);
        }
    }
}
