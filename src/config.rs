use std::path::PathBuf;

use crate::event::DEFAULT_POOL;

/// Simulator configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SimConfig {
    /// Processor clock in MHz.
    ///
    /// Only used to turn cycle counts into seconds in the statistics;
    /// simulated timing is always counted in cycles.
    pub freq_mhz: f64,

    /// Whether the floating-point unit is fitted.
    ///
    /// Without it, FP instructions trap with fp_disabled and PSR.EF stays clear.
    pub fpu_present: bool,

    /// Device or file backing UART A. Consumed by the front end, which builds
    /// the serial port and hands it to the simulator.
    pub uart_a: Option<PathBuf>,
    /// Device or file backing UART B.
    pub uart_b: Option<PathBuf>,

    /// Legacy timer behaviour: a timer whose interrupt is still pending drops
    /// further carries instead of reloading.
    pub rev0_timer_irq: bool,

    /// Legacy trap entry: PSR.PS is OR-ed with PSR.S instead of assigned.
    pub rev0_trap_ps: bool,

    /// Capacity of the event scheduler.
    pub event_pool: usize,

    /// Stop on `ta 1` instead of executing it.
    pub sw_breakpoints: bool,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            freq_mhz: 14.0,
            fpu_present: true,
            uart_a: None,
            uart_b: None,
            rev0_timer_irq: false,
            rev0_trap_ps: false,
            event_pool: DEFAULT_POOL,
            sw_breakpoints: true,
        }
    }
}
