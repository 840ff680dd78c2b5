//! Real-time clock, general-purpose timer and watchdog.
//!
//! The timers do not own the event queue. `tick`/`start` return the delay after
//! which the caller must fire the next tick, or `None` when the timer stops.

use super::irq::InterruptController;

/// Down-counter with a prescaler. RTC and GPT differ only in scaler width and level.
#[derive(Debug, Clone)]
pub struct Timer {
    pub name: &'static str,
    level: u8,
    scaler_mask: u32,

    pub counter: u32,
    pub reload: u32,
    pub scaler: u32,
    pub continuous: bool,
    /// Schedule enable.
    pub se: bool,
    pub enabled: bool,
    scaler_start: u64,
    dropped_carries: u64,
}

impl Timer {
    pub fn rtc() -> Self {
        Self::new("rtc", super::irq::level::RTC, 0xff)
    }

    pub fn gpt() -> Self {
        Self::new("gpt", super::irq::level::GPT, 0xffff)
    }

    fn new(name: &'static str, level: u8, scaler_mask: u32) -> Self {
        let mut t = Self {
            name,
            level,
            scaler_mask,
            counter: 0,
            reload: 0,
            scaler: 0,
            continuous: false,
            se: false,
            enabled: false,
            scaler_start: 0,
            dropped_carries: 0,
        };
        t.reset();
        t
    }

    pub fn reset(&mut self) {
        self.counter = 0xffff_ffff;
        self.reload = 0xffff_ffff;
        self.scaler = self.scaler_mask;
        self.continuous = false;
        self.se = false;
        self.enabled = false;
        self.scaler_start = 0;
    }

    pub fn level(&self) -> u8 {
        self.level
    }

    /// Carries dropped by the legacy interrupt-once behaviour.
    pub fn dropped_carries(&self) -> u64 {
        self.dropped_carries
    }

    fn period(&self) -> u64 {
        self.scaler as u64 + 1
    }

    pub fn start(&mut self, now: u64) -> u64 {
        self.enabled = true;
        self.scaler_start = now;
        tracing::debug!(timer = self.name, scaler = self.scaler, counter = self.counter, "timer started");
        self.period()
    }

    /// One scaler period elapsed.
    pub fn tick(&mut self, now: u64, irq: &mut InterruptController, legacy: bool) -> Option<u64> {
        if self.counter == 0 {
            let unacknowledged = irq.pending & (1 << self.level) != 0;
            if legacy && unacknowledged {
                self.dropped_carries += 1;
                tracing::warn!(timer = self.name, level = self.level, "previous timer interrupt not acknowledged, carry dropped");
            } else {
                irq.post(self.level);
            }
            if self.continuous {
                self.counter = self.reload;
            } else {
                self.se = false;
            }
        } else {
            self.counter -= 1;
        }
        if self.se && self.enabled {
            self.scaler_start = now;
            Some(self.period())
        } else {
            self.enabled = false;
            tracing::debug!(timer = self.name, "timer stopped");
            None
        }
    }

    /// Scaler register as software sees it: the remaining count while running.
    pub fn read_scaler(&self, now: u64) -> u32 {
        if self.enabled {
            let elapsed = now.saturating_sub(self.scaler_start).min(self.scaler as u64) as u32;
            self.scaler - elapsed
        } else {
            self.scaler
        }
    }

    pub fn write_scaler(&mut self, value: u32) {
        self.scaler = value & self.scaler_mask;
    }

    /// Applies this timer's half of the timer control register. Returns the first
    /// tick delay when the write starts a stopped timer.
    pub fn control(&mut self, continuous: bool, load: bool, enable: bool, now: u64) -> Option<u64> {
        self.continuous = continuous;
        if load {
            self.counter = self.reload;
        }
        self.se = enable;
        if self.se && !self.enabled { Some(self.start(now)) } else { None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogStatus {
    /// Just reset, not yet configured.
    Init,
    /// Turned off through the trap door before the first tick.
    Disabled,
    Enabled,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogAction {
    Idle,
    Reschedule(u64),
    /// The reset delay expired: the whole machine must be reset.
    Reset,
}

#[derive(Debug, Clone)]
pub struct Watchdog {
    pub status: WatchdogStatus,
    pub scaler: u32,
    pub counter: u32,
    pub rst_delay: u32,
    /// Armed by the first expiry; the next expiry resets the system.
    pub rston: bool,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    pub fn new() -> Self {
        Self {
            status: WatchdogStatus::Init,
            scaler: 255,
            counter: 0xffff,
            rst_delay: 255,
            rston: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn period(&self) -> u64 {
        self.scaler as u64 + 1
    }

    pub fn start(&self) -> u64 {
        tracing::debug!(scaler = self.scaler, counter = self.counter, "watchdog started");
        self.period()
    }

    pub fn tick(&mut self, irq: &mut InterruptController) -> WatchdogAction {
        if self.status == WatchdogStatus::Disabled {
            self.status = WatchdogStatus::Stopped;
            return WatchdogAction::Idle;
        }
        if self.counter > 0 {
            self.counter -= 1;
        } else if self.rston {
            tracing::info!("watchdog reset");
            return WatchdogAction::Reset;
        } else {
            irq.post(super::irq::level::WATCHDOG);
            self.rston = true;
            self.counter = self.rst_delay;
        }
        WatchdogAction::Reschedule(self.period())
    }

    /// Re-arms the watchdog. Returns a tick delay if it had stopped.
    pub fn write(&mut self, data: u32) -> Option<u64> {
        self.scaler = (data >> 16) & 0xff;
        self.counter = data & 0xffff;
        self.rst_delay = data >> 24;
        self.rston = false;
        let restart = self.status == WatchdogStatus::Stopped;
        self.status = WatchdogStatus::Enabled;
        restart.then(|| self.start())
    }

    /// Trap-door register: disables the watchdog if written before it was configured.
    pub fn trap_door(&mut self) {
        if self.status == WatchdogStatus::Init {
            self.status = WatchdogStatus::Disabled;
        }
    }
}
