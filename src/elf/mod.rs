use crate::sim::Simulator;
use goblin::elf::{
    Elf,
    header::{self, ELFCLASS32, ELFDATA2MSB, EM_SPARC, EM_SPARC32PLUS, ET_EXEC},
    program_header::PT_LOAD,
};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("cannot read image: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed ELF: {0}")]
    Parse(#[from] goblin::error::Error),

    #[error("expected a 32-bit big-endian ELF")]
    WrongFormat,

    #[error("expected a SPARC executable, found machine {0}")]
    WrongMachine(u16),

    #[error("segment at file offset 0x{offset:x} lies outside the file")]
    SegmentOutsideFile { offset: u64 },

    #[error("segment [0x{start:08x},0x{end:08x}) is not backed by ROM or RAM")]
    SegmentOutsideMemory { start: u64, end: u64 },
}

/// Loads `path` and points PC/NPC at its entry.
pub fn load_elf(path: &Path, sim: &mut Simulator) -> Result<u32, LoadError> {
    let bytes = fs::read(path)?;
    load_elf_bytes(&bytes, sim)
}

/// Copies every PT_LOAD segment into simulator memory, zero-filling bss.
pub fn load_elf_bytes(bytes: &[u8], sim: &mut Simulator) -> Result<u32, LoadError> {
    let elf = Elf::parse(bytes)?;

    if elf.header.e_ident[header::EI_CLASS] != ELFCLASS32 || elf.header.e_ident[header::EI_DATA] != ELFDATA2MSB {
        return Err(LoadError::WrongFormat);
    }
    if elf.header.e_machine != EM_SPARC && elf.header.e_machine != EM_SPARC32PLUS {
        return Err(LoadError::WrongMachine(elf.header.e_machine));
    }
    if elf.header.e_type != ET_EXEC {
        tracing::warn!(e_type = elf.header.e_type, "image is not ET_EXEC, loading anyway");
    }

    for ph in elf.program_headers.iter().filter(|ph| ph.p_type == PT_LOAD) {
        let offset = ph.p_offset;
        let file = offset
            .checked_add(ph.p_filesz)
            .filter(|&end| end <= bytes.len() as u64 && ph.p_memsz >= ph.p_filesz)
            .map(|end| &bytes[offset as usize..end as usize])
            .ok_or(LoadError::SegmentOutsideFile { offset })?;

        let start = ph.p_paddr;
        let end = start + ph.p_memsz;
        let outside = LoadError::SegmentOutsideMemory { start, end };
        if end > u32::MAX as u64 + 1 {
            return Err(outside);
        }
        let addr = start as u32;
        if sim.write_memory_bytes(addr, file) != file.len() {
            return Err(outside);
        }
        let bss = (ph.p_memsz - ph.p_filesz) as usize;
        if bss > 0 && sim.write_memory_bytes(addr + file.len() as u32, &vec![0; bss]) != bss {
            return Err(outside);
        }
        tracing::debug!(
            addr = format_args!("0x{addr:08x}"),
            filesz = ph.p_filesz,
            memsz = ph.p_memsz,
            "loaded segment"
        );
    }

    let entry = elf.entry as u32;
    sim.cpu.pc = entry;
    sim.cpu.npc = entry.wrapping_add(4);
    Ok(entry)
}
