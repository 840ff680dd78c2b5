//! Instruction-level simulator of the ERC32 SPARC V7 processor and its MEC
//! peripheral complex (memory controller, interrupt controller, timers,
//! watchdog and UARTs), cycle-counted and driven by a discrete-event scheduler.

pub mod config;
pub mod cpu;
pub mod csr;
pub mod debug;
pub mod elf;
pub mod event;
pub mod fpu;
pub mod mec;
pub mod mem;
pub mod sim;

pub use config::SimConfig;
pub use sim::{Simulator, Stats, StopReason};
