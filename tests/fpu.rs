mod common;

use common::*;
use erc32_sim::SimConfig;
use erc32_sim::csr::fsr;
use erc32_sim::fpu::ieee::exc;
use erc32_sim::fpu::{FpState, opf};
use erc32_sim::sim::regnum;

const DATA: u32 = PROG + 0x200;
const STDFQ: u32 = 0x26;

fn set_f(sim: &mut erc32_sim::Simulator, i: u32, v: f32) {
    set_reg(sim, regnum::FP_BASE as u32 + i, v.to_bits());
}

fn f(sim: &erc32_sim::Simulator, i: u32) -> f32 {
    f32::from_bits(reg(sim, regnum::FP_BASE as u32 + i))
}

fn set_d(sim: &mut erc32_sim::Simulator, i: u32, v: f64) {
    let bits = v.to_bits();
    set_reg(sim, regnum::FP_BASE as u32 + i, (bits >> 32) as u32);
    set_reg(sim, regnum::FP_BASE as u32 + i + 1, bits as u32);
}

fn d(sim: &erc32_sim::Simulator, i: u32) -> f64 {
    let hi = reg(sim, regnum::FP_BASE as u32 + i) as u64;
    let lo = reg(sim, regnum::FP_BASE as u32 + i + 1) as u64;
    f64::from_bits(hi << 32 | lo)
}

#[test]
fn dependent_multiplies_wait_for_latency() {
    let mut sim = sim_with(&[
        fpop1(opf::FMULD as u32, 0, 2, 4),
        fpop1(opf::FMULD as u32, 6, 0, 4),
    ]);
    sim.step(2, false);
    assert_eq!(sim.stats().fp_hold_cycles, 8);
    assert_eq!(sim.cpu.fpu.ftime, 18);
    assert_eq!(sim.now(), 10);
    assert_eq!(sim.stats().fp_ops, 2);
}

#[test]
fn fpop_without_fpu_is_disabled_trap() {
    let config = SimConfig { fpu_present: false, ..SimConfig::default() };
    let mut sim = sim_with_config(config, &[fpop1(opf::FADDS as u32, 0, 1, 2)]);
    assert!(!sim.cpu.csr.psr.ef());
    sim.step(1, false);
    assert_eq!(tt(&sim), 0x04);
}

#[test]
fn compare_feeds_floating_branch() {
    let mut sim = sim_with(&[
        fpop2(opf::FCMPS as u32, 0, 1, 2),
        fbfcc(4, false, 3), // fbl
        NOP,
        alu_i(op3::OR, r::G2, r::G0, 1),
        alu_i(op3::OR, r::G3, r::G0, 2),
    ]);
    set_f(&mut sim, 1, 1.0);
    set_f(&mut sim, 2, 2.0);
    sim.step(4, false);
    assert_eq!(sim.cpu.fpu.fcc(), 1);
    assert_eq!(reg(&sim, r::G2), 0);
    assert_eq!(reg(&sim, r::G3), 2);
}

#[test]
fn divide_by_zero_trap_is_deferred_to_next_fpop() {
    let tbr = PROG + 0x1000;
    let fdivs = fpop1(opf::FDIVS as u32, 3, 1, 2);
    let mut sim = sim_with(&[fdivs, NOP, fpop1(opf::FMOVS as u32, 4, 0, 1)]);
    load_words(&mut sim, tbr + 0x80, &[mem_i(STDFQ, r::G0, r::G1, 0), SPIN[0], SPIN[1]]);
    set_reg(&mut sim, regnum::TBR as u32, tbr);
    set_reg(&mut sim, regnum::FSR as u32, exc::DZ << fsr::TEM_SHIFT);
    set_reg(&mut sim, r::G1, DATA);
    set_f(&mut sim, 1, 1.0);
    set_f(&mut sim, 2, 0.0);
    set_f(&mut sim, 3, 42.0);

    sim.step(2, false);
    assert_eq!(sim.stats().traps, 0);
    assert_eq!(sim.cpu.fpu.state, FpState::Pending);

    sim.step(1, false);
    assert_eq!(tt(&sim), 0x08);
    let status = reg(&sim, regnum::FSR as u32);
    assert_eq!(status & fsr::FTT, fsr::FTT_IEEE);
    assert_ne!(status & fsr::QNE, 0);
    assert_eq!(status & fsr::CEXC, exc::DZ);
    // Destination untouched.
    assert_eq!(f(&sim, 3), 42.0);

    // The handler drains the queue.
    sim.step(1, false);
    let saved = sim.read_memory_bytes(DATA, 8);
    assert_eq!(saved[..4], PROG.to_be_bytes());
    assert_eq!(saved[4..], fdivs.to_be_bytes());
    assert_eq!(sim.cpu.fpu.state, FpState::Executing);
    assert_eq!(reg(&sim, regnum::FSR as u32) & fsr::QNE, 0);
}

#[test]
fn single_precision_load_store() {
    let mut sim = sim_with(&[
        mem_i(mem3::LDF, 5, r::G1, 0),
        fpop1(opf::FNEGS as u32, 6, 0, 5),
        mem_i(mem3::STF, 6, r::G1, 4),
    ]);
    load_words(&mut sim, DATA, &[1.5f32.to_bits()]);
    set_reg(&mut sim, r::G1, DATA);
    sim.step(3, false);
    assert_eq!(f(&sim, 5), 1.5);
    assert_eq!(sim.read_memory_bytes(DATA + 4, 4), (-1.5f32).to_bits().to_be_bytes());
}

#[test]
fn store_fsr_waits_for_pending_op() {
    let mut sim = sim_with(&[
        fpop1(opf::FDIVS as u32, 3, 1, 2),
        mem_i(0x25, 0, r::G1, 0), // stfsr
    ]);
    set_f(&mut sim, 1, 1.0);
    set_f(&mut sim, 2, 3.0);
    set_reg(&mut sim, r::G1, DATA);
    sim.step(2, false);
    // fdivs retires at 20; the store starts at 1 and waits.
    assert_eq!(sim.stats().fp_hold_cycles, 19);
    let word = sim.read_memory_bytes(DATA, 4);
    let stored = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    assert_eq!(stored & fsr::CEXC, exc::NX);
}

#[test]
fn tiny_product_accrues_underflow() {
    let mut sim = sim_with(&[fpop1(opf::FMULD as u32, 4, 0, 2), NOP]);
    set_d(&mut sim, 0, 1e-200);
    set_d(&mut sim, 2, 1e-200);
    set_d(&mut sim, 4, 1.0);
    sim.step(2, false);
    assert_eq!(d(&sim, 4).to_bits(), 0);
    let status = reg(&sim, regnum::FSR as u32);
    assert_eq!(status & fsr::CEXC, exc::UF | exc::NX);
    assert_eq!(status & fsr::AEXC, (exc::UF | exc::NX) << fsr::AEXC_SHIFT);
}

#[test]
fn enabled_underflow_traps_on_next_fpop() {
    let tbr = PROG + 0x1000;
    let mut sim = sim_with(&[fpop1(opf::FMULD as u32, 4, 0, 2), NOP, fpop1(opf::FMOVS as u32, 6, 0, 1)]);
    load_words(&mut sim, tbr + 0x80, &SPIN);
    set_reg(&mut sim, regnum::TBR as u32, tbr);
    set_reg(&mut sim, regnum::FSR as u32, exc::UF << fsr::TEM_SHIFT);
    set_d(&mut sim, 0, 1e-200);
    set_d(&mut sim, 2, 1e-200);
    set_d(&mut sim, 4, 1.0);

    sim.step(2, false);
    assert_eq!(sim.cpu.fpu.state, FpState::Pending);
    sim.step(1, false);
    assert_eq!(tt(&sim), 0x08);
    let status = reg(&sim, regnum::FSR as u32);
    assert_eq!(status & fsr::FTT, fsr::FTT_IEEE);
    assert_eq!(status & fsr::CEXC, exc::UF | exc::NX);
    assert_eq!(d(&sim, 4), 1.0);
}
