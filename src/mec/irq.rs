//! MEC interrupt controller.
//!
//! Levels 1..=15, higher numbers win. A level is *posted* once while it stays
//! pending and unmasked; the post is cleared by [`InterruptController::acknowledge`].

/// Interrupt levels used by the built-in peripherals.
pub mod level {
    pub const UART_A: u8 = 4;
    pub const UART_B: u8 = 5;
    pub const UART_ERROR: u8 = 7;
    pub const GPT: u8 = 12;
    pub const RTC: u8 = 13;
    pub const WATCHDOG: u8 = 15;
}

/// Receives a posted interrupt level.
pub trait IrqHandler: Send {
    fn raise(&mut self, level: u8);
}

impl<F: FnMut(u8) + Send> IrqHandler for F {
    fn raise(&mut self, level: u8) {
        self(level)
    }
}

/// Where a posted level is delivered.
#[derive(Default)]
pub enum IrqRoute {
    /// Drives the processor interrupt request lines.
    #[default]
    Processor,
    External(Box<dyn IrqHandler>),
}

impl std::fmt::Debug for IrqRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IrqRoute::Processor => f.write_str("Processor"),
            IrqRoute::External(_) => f.write_str("External"),
        }
    }
}

const LEVEL_MASK: u16 = 0xfffe;

#[derive(Debug)]
pub struct InterruptController {
    pub pending: u16,
    pub mask: u16,
    pub force: u16,
    posted: u16,
    /// When set, forced levels are acknowledged by clearing the force register.
    pub force_mode: bool,
    routes: [IrqRoute; 16],
}

impl Default for InterruptController {
    fn default() -> Self {
        Self::new()
    }
}

impl InterruptController {
    pub fn new() -> Self {
        Self {
            pending: 0,
            mask: 0x7ffe,
            force: 0,
            posted: 0,
            force_mode: false,
            routes: Default::default(),
        }
    }

    /// Power-on register values. Handler registrations survive.
    pub fn reset(&mut self) {
        self.pending = 0;
        self.mask = 0x7ffe;
        self.force = 0;
        self.posted = 0;
        self.force_mode = false;
    }

    /// Routes `level` to `route`, replacing the previous owner.
    pub fn register(&mut self, level: u8, route: IrqRoute) {
        if (1..=15).contains(&level) {
            self.routes[level as usize] = route;
        } else {
            tracing::warn!(level, "ignoring handler registration for invalid interrupt level");
        }
    }

    fn active(&self) -> u16 {
        let raw = if self.force_mode { self.pending | self.force } else { self.pending };
        raw & !self.mask & LEVEL_MASK
    }

    /// Posts every pending, unmasked level that has not been posted yet, from
    /// level 15 down. Levels no longer active lose their post.
    pub fn check_pending(&mut self) {
        let active = self.active();
        self.posted &= active;
        for l in (1..=15u8).rev() {
            let bit = 1u16 << l;
            if active & bit == 0 || self.posted & bit != 0 {
                continue;
            }
            self.posted |= bit;
            tracing::debug!(level = l, "interrupt posted");
            if let IrqRoute::External(handler) = &mut self.routes[l as usize] {
                handler.raise(l);
            }
        }
    }

    /// Latches `level` as pending and re-evaluates.
    pub fn post(&mut self, level: u8) {
        self.pending |= (1u16 << level) & LEVEL_MASK;
        self.check_pending();
    }

    /// Called once per taken interrupt trap.
    pub fn acknowledge(&mut self, level: u8) {
        let bit = 1u16 << level;
        if self.force_mode && self.force & bit != 0 {
            self.force &= !bit;
        } else {
            self.pending &= !bit;
        }
        self.posted &= !bit;
        tracing::debug!(level, "interrupt acknowledged");
        self.check_pending();
    }

    pub fn is_posted(&self, level: u8) -> bool {
        self.posted & (1 << level) != 0
    }

    /// Highest posted level routed to the processor, 0 if none.
    pub fn irl(&self) -> u8 {
        let cpu = (1..=15u8)
            .filter(|&l| matches!(self.routes[l as usize], IrqRoute::Processor))
            .fold(0u16, |m, l| m | (1 << l));
        let lines = self.posted & cpu;
        if lines == 0 { 0 } else { 15 - lines.leading_zeros() as u8 }
    }

    pub fn write_mask(&mut self, value: u32) {
        self.mask = value as u16 & 0x7ffe;
        self.check_pending();
    }

    /// Interrupt clear register: drops pending bits, except levels that are also
    /// latched in the force register while force mode is on.
    pub fn write_clear(&mut self, value: u32) {
        let mut clear = value as u16 & LEVEL_MASK;
        if self.force_mode {
            clear &= !self.force;
        }
        self.pending &= !clear;
        self.check_pending();
    }

    pub fn write_force(&mut self, value: u32) {
        self.force = value as u16 & LEVEL_MASK;
        self.check_pending();
    }
}
