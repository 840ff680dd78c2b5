#![allow(dead_code)]

use erc32_sim::mem::{MEC_START, RAM_START, Width, asi};
use erc32_sim::{SimConfig, Simulator};

/// Where test programs are loaded.
pub const PROG: u32 = RAM_START;

pub const NOP: u32 = 0x0100_0000;

/// Register numbers.
pub mod r {
    pub const G0: u32 = 0;
    pub const G1: u32 = 1;
    pub const G2: u32 = 2;
    pub const G3: u32 = 3;
    pub const O0: u32 = 8;
    pub const SP: u32 = 14;
    pub const O7: u32 = 15;
    pub const L0: u32 = 16;
    pub const L1: u32 = 17;
    pub const L2: u32 = 18;
    pub const I0: u32 = 24;
    pub const FP: u32 = 30;
}

/// op3 values of format-3 arithmetic instructions.
pub mod op3 {
    pub const ADD: u32 = 0x00;
    pub const OR: u32 = 0x02;
    pub const ADDCC: u32 = 0x10;
    pub const SUBCC: u32 = 0x14;
    pub const ADDXCC: u32 = 0x18;
    pub const UMUL: u32 = 0x0a;
    pub const UDIV: u32 = 0x0e;
    pub const SDIVCC: u32 = 0x1f;
    pub const TADDCC: u32 = 0x20;
    pub const TADDCCTV: u32 = 0x22;
    pub const MULSCC: u32 = 0x24;
    pub const SLL: u32 = 0x25;
    pub const SRA: u32 = 0x27;
    pub const RDPSR: u32 = 0x29;
    pub const WRPSR: u32 = 0x31;
    pub const JMPL: u32 = 0x38;
    pub const RETT: u32 = 0x39;
    pub const TICC: u32 = 0x3a;
    pub const SAVE: u32 = 0x3c;
    pub const RESTORE: u32 = 0x3d;
}

/// op3 values of load/store instructions.
pub mod mem3 {
    pub const LD: u32 = 0x00;
    pub const LDUB: u32 = 0x01;
    pub const LDUH: u32 = 0x02;
    pub const LDD: u32 = 0x03;
    pub const ST: u32 = 0x04;
    pub const STB: u32 = 0x05;
    pub const LDSB: u32 = 0x09;
    pub const LDSTUB: u32 = 0x0d;
    pub const SWAP: u32 = 0x0f;
    pub const LDA: u32 = 0x10;
    pub const LDF: u32 = 0x20;
    pub const STF: u32 = 0x24;
}

pub fn alu(op3: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    (2 << 30) | (rd << 25) | (op3 << 19) | (rs1 << 14) | rs2
}

pub fn alu_i(op3: u32, rd: u32, rs1: u32, imm: i32) -> u32 {
    (2 << 30) | (rd << 25) | (op3 << 19) | (rs1 << 14) | 0x2000 | (imm as u32 & 0x1fff)
}

pub fn mem_i(op3: u32, rd: u32, rs1: u32, imm: i32) -> u32 {
    (3 << 30) | (rd << 25) | (op3 << 19) | (rs1 << 14) | 0x2000 | (imm as u32 & 0x1fff)
}

pub fn mem_asi(op3: u32, rd: u32, rs1: u32, rs2: u32, asi: u8) -> u32 {
    (3 << 30) | (rd << 25) | (op3 << 19) | (rs1 << 14) | ((asi as u32) << 5) | rs2
}

pub fn sethi(rd: u32, value: u32) -> u32 {
    (rd << 25) | (4 << 22) | (value >> 10)
}

/// Bicc with a displacement in words.
pub fn bicc(cond: u32, annul: bool, disp: i32) -> u32 {
    ((annul as u32) << 29) | (cond << 25) | (2 << 22) | (disp as u32 & 0x003f_ffff)
}

pub fn fbfcc(cond: u32, annul: bool, disp: i32) -> u32 {
    ((annul as u32) << 29) | (cond << 25) | (6 << 22) | (disp as u32 & 0x003f_ffff)
}

pub fn call(disp: i32) -> u32 {
    (1 << 30) | (disp as u32 & 0x3fff_ffff)
}

/// `t<cond> imm`
pub fn ticc(cond: u32, imm: i32) -> u32 {
    alu_i(op3::TICC, cond, 0, imm)
}

pub fn fpop1(opf: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    (2 << 30) | (rd << 25) | (0x34 << 19) | (rs1 << 14) | (opf << 5) | rs2
}

pub fn fpop2(opf: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
    (2 << 30) | (rd << 25) | (0x35 << 19) | (rs1 << 14) | (opf << 5) | rs2
}

/// `ba .; nop`: spins forever without trapping.
pub const SPIN: [u32; 2] = [0x1080_0000, NOP];

pub fn load_words(sim: &mut Simulator, addr: u32, words: &[u32]) {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_be_bytes()).collect();
    assert_eq!(sim.write_memory_bytes(addr, &bytes), bytes.len());
}

/// Simulator with `program` at [`PROG`], booted as if loaded into RAM.
pub fn sim_with_config(config: SimConfig, program: &[u32]) -> Simulator {
    let mut sim = Simulator::new(config);
    load_words(&mut sim, PROG, program);
    sim.cpu.pc = PROG;
    sim.cpu.npc = PROG + 4;
    // An empty step runs the boot initialisation.
    sim.step(0, false);
    sim
}

pub fn sim_with(program: &[u32]) -> Simulator {
    sim_with_config(SimConfig::default(), program)
}

pub fn mec_write(sim: &mut Simulator, offset: u32, value: u32) {
    sim.mem
        .write(&mut sim.mec, asi::SUPER_DATA, MEC_START + offset, value, Width::Word)
        .unwrap();
}

pub fn mec_read(sim: &mut Simulator, offset: u32) -> u32 {
    sim.mem.read(&mut sim.mec, asi::SUPER_DATA, MEC_START + offset, Width::Word).unwrap().0
}

pub fn reg(sim: &Simulator, index: u32) -> u32 {
    sim.get_register(index as usize).unwrap()
}

pub fn set_reg(sim: &mut Simulator, index: u32, value: u32) {
    assert!(sim.set_register(index as usize, value));
}

/// Trap type latched in TBR.
pub fn tt(sim: &Simulator) -> u32 {
    (sim.cpu.csr.tbr >> 4) & 0xff
}
