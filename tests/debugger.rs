mod common;

use std::sync::atomic::Ordering;

use common::*;
use erc32_sim::cpu::SOFTWARE_BREAKPOINT;
use erc32_sim::elf::{LoadError, load_elf_bytes};
use erc32_sim::mem::{RAM_CAPACITY, RAM_START};
use erc32_sim::sim::regnum;
use erc32_sim::{SimConfig, Simulator, StopReason};
use proptest::prelude::*;

proptest! {
    #[test]
    fn every_register_index_round_trips(index in 0usize..=regnum::FSR, value: u32) {
        let mut sim = sim_with(&SPIN);
        prop_assert!(sim.set_register(index, value));
        let expected = if index == 0 { 0 } else { value };
        prop_assert_eq!(sim.get_register(index), Some(expected));
    }

    #[test]
    fn indices_past_the_view_are_rejected(index in regnum::FSR + 1..1000, value: u32) {
        let mut sim = sim_with(&SPIN);
        prop_assert!(!sim.set_register(index, value));
        prop_assert_eq!(sim.get_register(index), None);
    }
}

#[test]
fn memory_access_stops_at_end_of_ram() {
    let mut sim = Simulator::new(SimConfig::default());
    let last = RAM_START + RAM_CAPACITY - 2;
    assert_eq!(sim.write_memory_bytes(last, &[1, 2, 3, 4]), 2);
    assert_eq!(sim.read_memory_bytes(last, 8), vec![1, 2]);
    assert!(sim.read_memory_bytes(0x1000_0000, 4).is_empty());
}

#[test]
fn hardware_breakpoint_stops_before_execution() {
    let mut sim = sim_with(&[NOP, NOP, NOP, SPIN[0], SPIN[1]]);
    assert!(sim.add_breakpoint(PROG + 8));
    assert_eq!(sim.step(100, false), StopReason::BreakpointHit);
    assert_eq!(sim.cpu.pc, PROG + 8);
    assert_eq!(sim.stats().instructions, 2);

    // Resuming from the breakpoint address does not stop at once.
    assert_eq!(sim.step(10, false), StopReason::TimedOut);
    assert!(sim.remove_breakpoint(PROG + 8));
    assert_eq!(sim.breakpoints().count(), 0);
}

#[test]
fn software_breakpoint_instruction() {
    let mut sim = sim_with(&[NOP, SOFTWARE_BREAKPOINT, SPIN[0], SPIN[1]]);
    assert_eq!(sim.step(10, false), StopReason::BreakpointHit);
    assert_eq!(sim.cpu.pc, PROG + 4);
    assert_eq!(sim.stats().instructions, 1);
    assert_eq!(sim.stats().traps, 0);
}

#[test]
fn software_breakpoints_can_be_turned_off() {
    let config = SimConfig { sw_breakpoints: false, ..SimConfig::default() };
    let mut sim = sim_with_config(config, &[SOFTWARE_BREAKPOINT]);
    assert_eq!(sim.step(1, false), StopReason::TimedOut);
    assert_eq!(tt(&sim), 0x81);
}

#[test]
fn stop_flag_interrupts_a_run() {
    let mut sim = sim_with(&SPIN);
    let stop = sim.stop_handle();
    stop.store(true, Ordering::Relaxed);
    assert_eq!(sim.step(1000, false), StopReason::Interrupted);
    assert_eq!(sim.stats().instructions, 0);
    // The flag is consumed.
    assert_eq!(sim.step(4, false), StopReason::TimedOut);
}

#[test]
fn forced_reset_restarts_at_zero() {
    let mut sim = sim_with(&SPIN);
    load_words(&mut sim, 0, &SPIN);
    sim.step(6, false);
    sim.force_reset();
    assert_eq!(sim.now(), 0);
    assert_eq!(sim.mem.wcr, 0xffff_ffff);

    sim.step(2, false);
    assert!(sim.cpu.pc < 8);
    assert!(sim.cpu.csr.psr.s());
    assert!(!sim.cpu.csr.psr.et());
    assert_eq!(sim.stats().instructions, 8);
}

#[test]
fn error_mode_is_sticky() {
    let mut sim = sim_with(&[0]);
    let psr = reg(&sim, regnum::PSR as u32) & !erc32_sim::csr::psr::ET;
    set_reg(&mut sim, regnum::PSR as u32, psr);
    assert_eq!(sim.step(5, false), StopReason::FatalError);
    assert_eq!(sim.step(5, false), StopReason::FatalError);
    sim.reset();
    assert!(!sim.cpu.error_mode);
}

/// Minimal big-endian ELF32 image with one PT_LOAD segment.
fn elf_image(machine: u16, entry: u32, words: &[u32], memsz: u32) -> Vec<u8> {
    let data: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    let mut out = vec![0x7f, b'E', b'L', b'F', 1, 2, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];
    let u16s = |out: &mut Vec<u8>, v: u16| out.extend_from_slice(&v.to_be_bytes());
    let u32s = |out: &mut Vec<u8>, v: u32| out.extend_from_slice(&v.to_be_bytes());
    u16s(&mut out, 2); // ET_EXEC
    u16s(&mut out, machine);
    u32s(&mut out, 1);
    u32s(&mut out, entry);
    u32s(&mut out, 52); // phoff
    u32s(&mut out, 0); // shoff
    u32s(&mut out, 0); // flags
    u16s(&mut out, 52);
    u16s(&mut out, 32);
    u16s(&mut out, 1);
    u16s(&mut out, 40);
    u16s(&mut out, 0);
    u16s(&mut out, 0);
    assert_eq!(out.len(), 52);

    u32s(&mut out, 1); // PT_LOAD
    u32s(&mut out, 84); // offset
    u32s(&mut out, entry);
    u32s(&mut out, entry);
    u32s(&mut out, data.len() as u32);
    u32s(&mut out, memsz);
    u32s(&mut out, 5);
    u32s(&mut out, 8);
    out.extend_from_slice(&data);
    out
}

#[test]
fn elf_segments_load_and_set_entry() {
    let mut sim = Simulator::new(SimConfig::default());
    let bss = PROG + 8;
    load_words(&mut sim, bss, &[0xffff_ffff, 0xffff_ffff]);
    let image = elf_image(2, PROG, &SPIN, 16);

    assert_eq!(load_elf_bytes(&image, &mut sim).unwrap(), PROG);
    assert_eq!(sim.cpu.pc, PROG);
    assert_eq!(sim.cpu.npc, PROG + 4);
    assert_eq!(sim.read_memory_bytes(PROG, 4), SPIN[0].to_be_bytes());
    assert_eq!(sim.read_memory_bytes(bss, 8), vec![0; 8]);
    assert_eq!(sim.step(10, false), StopReason::TimedOut);
}

#[test]
fn elf_for_another_machine_is_rejected() {
    let mut sim = Simulator::new(SimConfig::default());
    let image = elf_image(3, PROG, &SPIN, 8);
    assert!(matches!(load_elf_bytes(&image, &mut sim), Err(LoadError::WrongMachine(3))));
}
