use thiserror::Error;

/// Base of the MEC register window.
pub const MEC_START: u32 = 0x01f8_0000;
/// End (exclusive) of the MEC register window.
pub const MEC_END: u32 = 0x01f8_0100;
/// Base of on-board RAM.
pub const RAM_START: u32 = 0x0200_0000;
/// Backing store sizes. The decoded window from MEMCFG never exceeds these.
pub const ROM_CAPACITY: u32 = 0x0010_0000;
pub const RAM_CAPACITY: u32 = 0x0040_0000;

/// Wait states charged for a faulting access.
pub const MEM_EX_WS: u32 = 1;
/// Extra wait state charged on every double-word access.
pub const DOUBLE_WS: u32 = 1;

/// Address space identifiers.
pub mod asi {
    pub const USER_INSN: u8 = 0x8;
    pub const SUPER_INSN: u8 = 0x9;
    pub const USER_DATA: u8 = 0xa;
    pub const SUPER_DATA: u8 = 0xb;
}

/// Memory-controller register offsets handled by the memory map itself.
pub mod reg {
    pub const MCR: u32 = 0x00;
    pub const MEMCFG: u32 = 0x10;
    pub const IOCR: u32 = 0x14;
    pub const WCR: u32 = 0x18;
    pub const SFSR: u32 = 0xa0;
    pub const FFAR: u32 = 0xa4;
    pub const WPMASK: u32 = 0xc8;
}

/// Fault classes latched into SFSR.
mod fault {
    pub const PROT_EXC: u32 = 0x3;
    pub const UIMP_ACC: u32 = 0x4;
    pub const MEC_ACC: u32 = 0x6;
}

const MCR_RESET: u32 = 0x0135_0014;
const MEMCFG_RESET: u32 = 0x0001_0000;
const SFSR_RESET: u32 = 0x78;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    #[error("unimplemented access at 0x{0:08x}")]
    Unimplemented(u32),
    #[error("write to ROM at 0x{0:08x}")]
    RomWrite(u32),
    #[error("write protection violation at 0x{0:08x}")]
    Protection(u32),
    #[error("illegal MEC register access at 0x{0:08x}")]
    MecAccess(u32),
}

impl MemError {
    pub fn addr(&self) -> u32 {
        match *self {
            MemError::Unimplemented(a)
            | MemError::RomWrite(a)
            | MemError::Protection(a)
            | MemError::MecAccess(a) => a,
        }
    }

    fn class(&self) -> u32 {
        match self {
            MemError::Unimplemented(_) | MemError::RomWrite(_) => fault::UIMP_ACC,
            MemError::Protection(_) => fault::PROT_EXC,
            MemError::MecAccess(_) => fault::MEC_ACC,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    Byte,
    Half,
    Word,
}

impl Width {
    pub fn bytes(self) -> u32 {
        match self {
            Width::Byte => 1,
            Width::Half => 2,
            Width::Word => 4,
        }
    }

    /// Bit shift of the addressed lane inside its big-endian word, and the lane mask.
    fn lane(self, addr: u32) -> (u32, u32) {
        match self {
            Width::Byte => ((3 - (addr & 3)) * 8, 0xff),
            Width::Half => ((2 - (addr & 2)) * 8, 0xffff),
            Width::Word => (0, 0xffff_ffff),
        }
    }
}

/// Memory-controller state the MEC peripherals may inspect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemControl {
    pub mcr: u32,
}

impl MemControl {
    pub fn power_down_enabled(&self) -> bool {
        self.mcr & 1 != 0
    }

    pub fn software_reset_enabled(&self) -> bool {
        self.mcr & 2 != 0
    }

    pub fn block_protection(&self) -> bool {
        self.mcr & 8 != 0
    }
}

/// Registers in the MEC window that the memory map does not own itself.
pub trait Mmio {
    /// Reads a register. `None` means the offset is not mapped.
    fn mmio_read(&mut self, offset: u32) -> Option<u32>;
    /// Writes a register. Returns false when the offset is not mapped.
    fn mmio_write(&mut self, offset: u32, value: u32, ctl: MemControl) -> bool;
}

/// Register block with nothing mapped, for tests and raw setups.
pub struct NoMmio;

impl Mmio for NoMmio {
    fn mmio_read(&mut self, _offset: u32) -> Option<u32> {
        None
    }

    fn mmio_write(&mut self, _offset: u32, _value: u32, _ctl: MemControl) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
struct WaitStates {
    ram_read: u32,
    ram_write: u32,
    rom_read: u32,
    rom_write: u32,
}

/// Flat address space: ROM, RAM and the memory-controller part of the MEC.
#[derive(Debug)]
pub struct MemoryMap {
    rom: Vec<u32>,
    ram: Vec<u32>,
    rom_size: u32,
    ram_size: u32,
    ws: WaitStates,
    bank_log: u32,

    pub mcr: u32,
    pub memcfg: u32,
    pub iocr: u32,
    pub wcr: u32,
    pub wp_mask: u32,
    pub sfsr: u32,
    pub ffar: u32,
}

impl Default for MemoryMap {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryMap {
    pub fn new() -> Self {
        let mut mem = Self {
            rom: vec![0; (ROM_CAPACITY / 4) as usize],
            ram: vec![0; (RAM_CAPACITY / 4) as usize],
            rom_size: 0,
            ram_size: 0,
            ws: WaitStates::default(),
            bank_log: 0,
            mcr: 0,
            memcfg: 0,
            iocr: 0,
            wcr: 0,
            wp_mask: 0,
            sfsr: 0,
            ffar: 0,
        };
        mem.reset_controller();
        mem
    }

    /// Restores the memory-controller registers to their power-on values.
    /// Memory contents are preserved.
    pub fn reset_controller(&mut self) {
        self.mcr = MCR_RESET;
        self.memcfg = MEMCFG_RESET;
        self.iocr = 0;
        self.wcr = 0xffff_ffff;
        self.wp_mask = 0xffff_ffff;
        self.sfsr = SFSR_RESET;
        self.ffar = 0;
        self.decode_memcfg();
        self.decode_wcr();
    }

    pub fn control(&self) -> MemControl {
        MemControl { mcr: self.mcr }
    }

    pub fn rom_size(&self) -> u32 {
        self.rom_size
    }

    pub fn ram_size(&self) -> u32 {
        self.ram_size
    }

    /// RAM bank size expressed as a power of two.
    pub fn bank_log(&self) -> u32 {
        self.bank_log
    }

    fn decode_memcfg(&mut self) {
        let mut ram = (256 * 1024u32) << ((self.memcfg >> 10) & 7);
        let rom = (128 * 1024u32) << ((self.memcfg >> 18) & 7);
        if ram > RAM_CAPACITY {
            tracing::warn!(
                decoded = ram,
                capacity = RAM_CAPACITY,
                "MEMCFG decodes a RAM window larger than the backing store, clamping"
            );
            ram = RAM_CAPACITY;
        }
        self.ram_size = ram;
        self.rom_size = rom.min(ROM_CAPACITY);
        // 32 protection banks across the RAM window.
        self.bank_log = ram.trailing_zeros().saturating_sub(5);
        tracing::debug!(
            ram_kib = self.ram_size >> 10,
            rom_kib = self.rom_size >> 10,
            bank_log = self.bank_log,
            "memory configuration"
        );
    }

    fn decode_wcr(&mut self) {
        self.ws = WaitStates {
            ram_read: self.wcr & 3,
            ram_write: (self.wcr >> 2) & 3,
            rom_read: (self.wcr >> 4) & 0xf,
            rom_write: (self.wcr >> 8) & 0xf,
        };
        tracing::debug!(ws = ?self.ws, "wait states");
    }

    fn in_ram(&self, addr: u32) -> bool {
        addr >= RAM_START && addr - RAM_START < self.ram_size
    }

    fn in_mec(addr: u32) -> bool {
        (MEC_START..MEC_END).contains(&addr)
    }

    fn latch_fault(&mut self, err: MemError, asi: u8, write: bool) -> MemError {
        if asi == asi::USER_DATA || asi == asi::SUPER_DATA {
            self.ffar = err.addr();
            self.sfsr = (err.class() << 3) | ((write as u32) << 15) | 0x4;
            if asi == asi::SUPER_DATA {
                self.sfsr |= 0x1000;
            }
        }
        err
    }

    /// Reads `width` bytes at `addr`, returning the zero-extended value and the
    /// number of wait states the access costs.
    pub fn read(
        &mut self,
        io: &mut dyn Mmio,
        asi: u8,
        addr: u32,
        width: Width,
    ) -> Result<(u32, u32), MemError> {
        let (shift, mask) = width.lane(addr);
        if self.in_ram(addr) {
            let word = self.ram[((addr - RAM_START) >> 2) as usize];
            return Ok(((word >> shift) & mask, self.ws.ram_read));
        }
        if Self::in_mec(addr) {
            let offset = addr - MEC_START;
            if width != Width::Word || (asi != asi::SUPER_DATA && asi != asi::SUPER_INSN) {
                return Err(self.latch_fault(MemError::MecAccess(addr), asi, false));
            }
            let value = match offset {
                reg::MCR => Some(self.mcr),
                reg::MEMCFG => Some(self.memcfg),
                reg::IOCR => Some(self.iocr),
                reg::WCR => Some(self.wcr),
                reg::SFSR => Some(self.sfsr),
                reg::FFAR => Some(self.ffar),
                reg::WPMASK => Some(self.wp_mask),
                _ => io.mmio_read(offset),
            };
            return match value {
                Some(v) => Ok((v, 0)),
                None => Err(self.latch_fault(MemError::MecAccess(addr), asi, false)),
            };
        }
        if addr < self.rom_size {
            let word = self.rom[(addr >> 2) as usize];
            return Ok(((word >> shift) & mask, self.ws.rom_read));
        }
        tracing::debug!(addr = format_args!("0x{addr:08x}"), "read from unmapped address");
        Err(self.latch_fault(MemError::Unimplemented(addr), asi, false))
    }

    /// Writes the low `width` bytes of `value` at `addr`, returning wait states.
    pub fn write(
        &mut self,
        io: &mut dyn Mmio,
        asi: u8,
        addr: u32,
        value: u32,
        width: Width,
    ) -> Result<u32, MemError> {
        if self.in_ram(addr) {
            let offset = addr - RAM_START;
            if self.block_protected(offset) {
                tracing::debug!(addr = format_args!("0x{addr:08x}"), "write protection violation");
                return Err(self.latch_fault(MemError::Protection(addr), asi, true));
            }
            let (shift, mask) = width.lane(addr);
            let cell = &mut self.ram[(offset >> 2) as usize];
            *cell = (*cell & !(mask << shift)) | ((value & mask) << shift);
            return Ok(self.ws.ram_write);
        }
        if Self::in_mec(addr) {
            if width != Width::Word || asi != asi::SUPER_DATA {
                return Err(self.latch_fault(MemError::MecAccess(addr), asi, true));
            }
            let offset = addr - MEC_START;
            tracing::debug!(offset = format_args!("0x{offset:02x}"), value = format_args!("0x{value:08x}"), "MEC write");
            let handled = match offset {
                reg::MCR => {
                    self.mcr = value;
                    true
                }
                reg::MEMCFG => {
                    self.memcfg = value;
                    self.decode_memcfg();
                    true
                }
                reg::IOCR => {
                    self.iocr = value;
                    true
                }
                reg::WCR => {
                    self.wcr = value;
                    self.decode_wcr();
                    true
                }
                // Any write clears the latched fault status.
                reg::SFSR => {
                    self.sfsr = SFSR_RESET;
                    true
                }
                reg::WPMASK => {
                    self.wp_mask = value;
                    true
                }
                _ => io.mmio_write(offset, value, self.control()),
            };
            return if handled {
                Ok(0)
            } else {
                Err(self.latch_fault(MemError::MecAccess(addr), asi, true))
            };
        }
        if addr < self.rom_size {
            return Err(self.latch_fault(MemError::RomWrite(addr), asi, true));
        }
        tracing::debug!(addr = format_args!("0x{addr:08x}"), "write to unmapped address");
        Err(self.latch_fault(MemError::Unimplemented(addr), asi, true))
    }

    fn block_protected(&self, ram_offset: u32) -> bool {
        if !self.control().block_protection() {
            return false;
        }
        let bank = (ram_offset >> self.bank_log) & 31;
        self.wp_mask & (1 << bank) == 0
    }

    /// Reads an aligned double word as two word accesses.
    pub fn read_double(
        &mut self,
        io: &mut dyn Mmio,
        asi: u8,
        addr: u32,
    ) -> Result<([u32; 2], u32), MemError> {
        let (hi, ws0) = self.read(io, asi, addr, Width::Word)?;
        let (lo, ws1) = self.read(io, asi, addr.wrapping_add(4), Width::Word)?;
        Ok(([hi, lo], ws0 + ws1 + DOUBLE_WS))
    }

    /// Writes an aligned double word as two word accesses.
    pub fn write_double(
        &mut self,
        io: &mut dyn Mmio,
        asi: u8,
        addr: u32,
        data: [u32; 2],
    ) -> Result<u32, MemError> {
        let ws0 = self.write(io, asi, addr, data[0], Width::Word)?;
        let ws1 = self.write(io, asi, addr.wrapping_add(4), data[1], Width::Word)?;
        Ok(ws0 + ws1 + DOUBLE_WS)
    }

    fn backing_mut(&mut self, addr: u32) -> Option<&mut u32> {
        if addr >= RAM_START && addr - RAM_START < RAM_CAPACITY {
            self.ram.get_mut(((addr - RAM_START) >> 2) as usize)
        } else if addr < ROM_CAPACITY {
            self.rom.get_mut((addr >> 2) as usize)
        } else {
            None
        }
    }

    fn backing(&self, addr: u32) -> Option<u32> {
        if addr >= RAM_START && addr - RAM_START < RAM_CAPACITY {
            self.ram.get(((addr - RAM_START) >> 2) as usize).copied()
        } else if addr < ROM_CAPACITY {
            self.rom.get((addr >> 2) as usize).copied()
        } else {
            None
        }
    }

    /// Raw byte read for loaders and debuggers: no wait states, no faults.
    /// Stops at the first byte outside ROM/RAM backing store.
    pub fn read_bytes(&self, addr: u32, len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        for i in 0..len as u32 {
            let a = addr.wrapping_add(i);
            let Some(word) = self.backing(a) else { break };
            out.push(word.to_be_bytes()[(a & 3) as usize]);
        }
        out
    }

    /// Raw byte write for loaders and debuggers. ROM is writable this way.
    /// Returns the number of bytes written.
    pub fn write_bytes(&mut self, addr: u32, bytes: &[u8]) -> usize {
        for (i, &b) in bytes.iter().enumerate() {
            let a = addr.wrapping_add(i as u32);
            let Some(cell) = self.backing_mut(a) else { return i };
            let mut be = cell.to_be_bytes();
            be[(a & 3) as usize] = b;
            *cell = u32::from_be_bytes(be);
        }
        bytes.len()
    }
}
