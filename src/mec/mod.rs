//! Memory and error controller peripherals: interrupt controller, timers,
//! watchdog and UARTs, all clocked by one event queue.

pub mod irq;
pub mod timer;
pub mod uart;

use std::sync::atomic::AtomicBool;

use crate::event::{EventQueue, WakeReason};
use crate::mem::{MemControl, Mmio};
use irq::InterruptController;
use timer::{Timer, Watchdog, WatchdogAction};
use uart::{RX_TIME, SerialPort, UartPair};

/// Peripheral register offsets inside the MEC window.
pub mod reg {
    pub const SFR: u32 = 0x04;
    pub const PWDR: u32 = 0x08;
    pub const ISR: u32 = 0x44;
    pub const IPR: u32 = 0x48;
    pub const IMR: u32 = 0x4c;
    pub const ICR: u32 = 0x50;
    pub const IFR: u32 = 0x54;
    pub const WDOG: u32 = 0x60;
    pub const TRAPD: u32 = 0x64;
    pub const RTC_COUNTER: u32 = 0x80;
    pub const RTC_SCALER: u32 = 0x84;
    pub const GPT_COUNTER: u32 = 0x88;
    pub const GPT_SCALER: u32 = 0x8c;
    pub const TIMER_CTRL: u32 = 0x98;
    pub const ERSR: u32 = 0xb0;
    pub const TCR: u32 = 0xd0;
    pub const UART_A: u32 = 0xe0;
    pub const UART_B: u32 = 0xe4;
    pub const UART_STATUS: u32 = 0xe8;
}

/// Timer control register bits.
pub mod tcr {
    pub const GACR: u32 = 0x001;
    pub const GACL: u32 = 0x002;
    pub const GASE: u32 = 0x004;
    pub const RTCR: u32 = 0x100;
    pub const RTCL: u32 = 0x200;
    pub const RTSE: u32 = 0x400;
}

/// Test control register bit enabling the interrupt force register.
const TCR_FORCE: u32 = 0x0008_0000;
const TCR_MASK: u32 = 0x001e_003f;

const ERSR_SOFTWARE: u32 = 0x4000;
const ERSR_WATCHDOG: u32 = 0xc000;

/// Everything the MEC schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MecEvent {
    RtcTick,
    GptTick,
    WatchdogTick,
    UartTx(u8),
    UartRxPoll,
}

/// Why the MEC wants the processor reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetCause {
    Software,
    Watchdog,
}

/// MEC register state. Kept apart from the event queue so that event handlers
/// can borrow both.
#[derive(Debug)]
pub struct Devices {
    pub irq: InterruptController,
    pub rtc: Timer,
    pub gpt: Timer,
    pub wdog: Watchdog,
    pub uart: UartPair,
    pub ersr: u32,
    pub tcr: u32,
    pub isr: u32,
    /// Legacy timer behaviour: carries are dropped while the previous one is unacknowledged.
    pub rev0_timer_irq: bool,
    reset_request: Option<ResetCause>,
    power_down: bool,
}

impl Devices {
    fn new(uart: UartPair) -> Self {
        Self {
            irq: InterruptController::new(),
            rtc: Timer::rtc(),
            gpt: Timer::gpt(),
            wdog: Watchdog::new(),
            uart,
            ersr: 0,
            tcr: 0,
            isr: 0,
            rev0_timer_irq: false,
            reset_request: None,
            power_down: false,
        }
    }

    fn reset(&mut self) {
        self.irq.reset();
        self.rtc.reset();
        self.gpt.reset();
        self.wdog.reset();
        self.uart.reset();
        self.tcr = 0;
        self.isr = 0;
        self.reset_request = None;
        self.power_down = false;
    }

    /// Dispatches one event. Returns true when a processor interrupt is posted afterwards.
    fn fire(&mut self, events: &mut EventQueue<MecEvent>, ev: MecEvent) -> bool {
        let now = events.now();
        match ev {
            MecEvent::RtcTick => {
                if let Some(d) = self.rtc.tick(now, &mut self.irq, self.rev0_timer_irq) {
                    events.schedule(MecEvent::RtcTick, d);
                }
            }
            MecEvent::GptTick => {
                if let Some(d) = self.gpt.tick(now, &mut self.irq, self.rev0_timer_irq) {
                    events.schedule(MecEvent::GptTick, d);
                }
            }
            MecEvent::WatchdogTick => match self.wdog.tick(&mut self.irq) {
                WatchdogAction::Idle => {}
                WatchdogAction::Reschedule(d) => {
                    events.schedule(MecEvent::WatchdogTick, d);
                }
                WatchdogAction::Reset => {
                    self.ersr = ERSR_WATCHDOG;
                    self.reset_request = Some(ResetCause::Watchdog);
                }
            },
            MecEvent::UartTx(ch) => {
                if let Some(d) = self.uart.channel_mut(ch as usize).tx_complete(&mut self.irq) {
                    events.schedule(MecEvent::UartTx(ch), d);
                }
            }
            MecEvent::UartRxPoll => {
                if self.uart.poll(&mut self.irq) {
                    events.schedule(MecEvent::UartRxPoll, RX_TIME);
                }
            }
        }
        self.irq.irl() != 0
    }
}

#[derive(Debug)]
pub struct Mec {
    pub events: EventQueue<MecEvent>,
    pub devices: Devices,
}

impl Default for Mec {
    fn default() -> Self {
        Self::new(crate::event::DEFAULT_POOL, UartPair::default())
    }
}

impl Mec {
    pub fn new(event_pool: usize, uart: UartPair) -> Self {
        Self {
            events: EventQueue::new(event_pool),
            devices: Devices::new(uart),
        }
    }

    pub fn now(&self) -> u64 {
        self.events.now()
    }

    pub fn irq(&mut self) -> &mut InterruptController {
        &mut self.devices.irq
    }

    /// Attaches a host port. A receiving port starts the receive poll if it
    /// isn't already running.
    pub fn set_uart_port(&mut self, channel: usize, port: Box<dyn SerialPort>) {
        self.devices.uart.channel_mut(channel).set_port(port);
        let polling = self.events.iter().any(|e| e.kind == MecEvent::UartRxPoll);
        if self.devices.uart.can_receive() && !polling {
            self.events.schedule(MecEvent::UartRxPoll, RX_TIME);
        }
    }

    /// Power-on reset of every peripheral. Restarts time and the free-running
    /// watchdog and receive poll.
    pub fn reset(&mut self) {
        self.events.clear();
        self.devices.reset();
        if self.devices.uart.can_receive() {
            self.events.schedule(MecEvent::UartRxPoll, RX_TIME);
        }
        let d = self.devices.wdog.start();
        self.events.schedule(MecEvent::WatchdogTick, d);
    }

    /// Runs peripherals for `cycles`.
    pub fn advance(&mut self, cycles: u64) {
        let Mec { events, devices } = self;
        events.advance(cycles, |q, ev| {
            devices.fire(q, ev);
        });
    }

    /// Power-down: runs peripherals until an interrupt reaches the processor.
    pub fn wait_until_interrupt(&mut self, cancel: &AtomicBool) -> (u64, WakeReason) {
        let Mec { events, devices } = self;
        if devices.irq.irl() != 0 {
            return (0, WakeReason::Interrupt);
        }
        let (idle, why) = events.wait_until_interrupt(cancel, |q, ev| devices.fire(q, ev));
        if why == WakeReason::Empty {
            tracing::warn!("power-down mode with no pending events, processor will not wake");
        }
        (idle, why)
    }

    pub fn take_reset_request(&mut self) -> Option<ResetCause> {
        self.devices.reset_request.take()
    }

    pub fn take_power_down(&mut self) -> bool {
        std::mem::take(&mut self.devices.power_down)
    }

    fn write_timer_ctrl(&mut self, v: u32) {
        let now = self.events.now();
        let d = &mut self.devices;
        if let Some(delay) = d.rtc.control(v & tcr::RTCR != 0, v & tcr::RTCL != 0, v & tcr::RTSE != 0, now) {
            self.events.schedule(MecEvent::RtcTick, delay);
        }
        if let Some(delay) = d.gpt.control(v & tcr::GACR != 0, v & tcr::GACL != 0, v & tcr::GASE != 0, now) {
            self.events.schedule(MecEvent::GptTick, delay);
        }
    }
}

impl Mmio for Mec {
    fn mmio_read(&mut self, offset: u32) -> Option<u32> {
        let now = self.events.now();
        let d = &mut self.devices;
        let v = match offset {
            reg::ISR => d.isr,
            reg::IPR => d.irq.pending as u32,
            reg::IMR => d.irq.mask as u32,
            reg::IFR => d.irq.force as u32,
            reg::WDOG => d.wdog.counter,
            reg::RTC_COUNTER => d.rtc.counter,
            reg::RTC_SCALER => d.rtc.read_scaler(now),
            reg::GPT_COUNTER => d.gpt.counter,
            reg::GPT_SCALER => d.gpt.read_scaler(now),
            reg::ERSR => d.ersr,
            reg::TCR => d.tcr,
            reg::UART_A => d.uart.a.read_data(),
            reg::UART_B => d.uart.b.read_data(),
            reg::UART_STATUS => d.uart.status(),
            _ => return None,
        };
        Some(v)
    }

    fn mmio_write(&mut self, offset: u32, value: u32, ctl: MemControl) -> bool {
        let d = &mut self.devices;
        match offset {
            reg::SFR => {
                if ctl.software_reset_enabled() {
                    tracing::info!("software reset requested");
                    d.ersr = ERSR_SOFTWARE;
                    d.reset_request = Some(ResetCause::Software);
                }
            }
            reg::PWDR => {
                if ctl.power_down_enabled() {
                    d.power_down = true;
                }
            }
            reg::ISR => d.isr = value,
            reg::IMR => d.irq.write_mask(value),
            reg::ICR => d.irq.write_clear(value),
            reg::IFR => {
                if d.irq.force_mode {
                    d.irq.write_force(value);
                }
            }
            reg::WDOG => {
                if let Some(delay) = d.wdog.write(value) {
                    self.events.schedule(MecEvent::WatchdogTick, delay);
                }
            }
            reg::TRAPD => d.wdog.trap_door(),
            reg::RTC_COUNTER => d.rtc.reload = value,
            reg::RTC_SCALER => d.rtc.write_scaler(value),
            reg::GPT_COUNTER => d.gpt.reload = value,
            reg::GPT_SCALER => d.gpt.write_scaler(value),
            reg::TIMER_CTRL => self.write_timer_ctrl(value),
            reg::TCR => {
                d.tcr = value & TCR_MASK;
                d.irq.force_mode = d.tcr & TCR_FORCE != 0;
                d.irq.check_pending();
            }
            reg::UART_A | reg::UART_B => {
                let ch = ((offset - reg::UART_A) / 4) as u8;
                if let Some(delay) = d.uart.channel_mut(ch as usize).write_data(value) {
                    self.events.schedule(MecEvent::UartTx(ch), delay);
                }
            }
            reg::UART_STATUS => d.uart.write_status(value),
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemoryMap;
    use uart::BufferedPort;

    fn ctl() -> MemControl {
        MemoryMap::new().control()
    }

    #[test]
    fn rtc_interrupts_every_ten_cycles() {
        let mut mec = Mec::default();
        mec.reset();
        mec.mmio_write(reg::TRAPD, 0, ctl());
        mec.mmio_write(reg::IMR, 0, ctl());
        mec.mmio_write(reg::RTC_COUNTER, 9, ctl());
        mec.mmio_write(reg::RTC_SCALER, 0, ctl());
        mec.mmio_write(reg::TIMER_CTRL, tcr::RTCR | tcr::RTCL | tcr::RTSE, ctl());
        let mut hits = vec![];
        for _ in 0..50 {
            mec.advance(1);
            if mec.devices.irq.is_posted(irq::level::RTC) {
                hits.push(mec.now());
                mec.irq().acknowledge(irq::level::RTC);
            }
        }
        assert_eq!(hits, vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn uart_transmits_after_fixed_latency() {
        let port = BufferedPort::new();
        let mut mec = Mec::new(16, UartPair::new(Box::new(port.clone()), Box::new(uart::NullPort)));
        mec.reset();
        mec.mmio_write(reg::UART_A, b'!' as u32, ctl());
        mec.advance(uart::TX_TIME - 1);
        assert!(port.take_output().is_empty());
        mec.advance(1);
        assert_eq!(port.take_output(), b"!");
    }

    #[test]
    fn port_attached_after_reset_is_polled() {
        let mut mec = Mec::default();
        mec.reset();
        assert!(!mec.events.iter().any(|e| e.kind == MecEvent::UartRxPoll));

        let port = BufferedPort::new();
        port.push_input(b"z");
        mec.set_uart_port(0, Box::new(port.clone()));
        mec.set_uart_port(0, Box::new(port.clone()));
        let polls = mec.events.iter().filter(|e| e.kind == MecEvent::UartRxPoll).count();
        assert_eq!(polls, 1);

        mec.advance(RX_TIME);
        assert_ne!(mec.mmio_read(reg::UART_STATUS).unwrap_or(0) & uart::status::DR, 0);
        assert_eq!(mec.mmio_read(reg::UART_A).map(|d| d & 0xff), Some(b'z' as u32));
    }

    #[test]
    fn software_reset_needs_mcr_enable() {
        let mut mec = Mec::default();
        mec.reset();
        mec.mmio_write(reg::SFR, 0, MemControl { mcr: 0 });
        assert_eq!(mec.take_reset_request(), None);
        mec.mmio_write(reg::SFR, 0, MemControl { mcr: 2 });
        assert_eq!(mec.take_reset_request(), Some(ResetCause::Software));
        assert_eq!(mec.mmio_read(reg::ERSR), Some(ERSR_SOFTWARE));
    }

    #[test]
    fn power_down_wakes_on_timer() {
        let mut mec = Mec::default();
        mec.reset();
        mec.mmio_write(reg::TRAPD, 0, ctl());
        mec.mmio_write(reg::IMR, 0, ctl());
        mec.mmio_write(reg::GPT_COUNTER, 4, ctl());
        mec.mmio_write(reg::GPT_SCALER, 9, ctl());
        mec.mmio_write(reg::TIMER_CTRL, tcr::GACL | tcr::GASE, ctl());
        mec.mmio_write(reg::PWDR, 0, MemControl { mcr: 1 });
        assert!(mec.take_power_down());
        let cancel = AtomicBool::new(false);
        let (idle, why) = mec.wait_until_interrupt(&cancel);
        assert_eq!(why, WakeReason::Interrupt);
        // five counter periods of ten cycles
        assert_eq!(idle, 50);
        assert_eq!(mec.devices.irq.irl(), irq::level::GPT);
    }

    #[test]
    fn force_register_needs_test_mode() {
        let mut mec = Mec::default();
        mec.reset();
        mec.mmio_write(reg::IFR, 1 << 9, ctl());
        assert_eq!(mec.mmio_read(reg::IFR), Some(0));
        mec.mmio_write(reg::TCR, TCR_FORCE, ctl());
        mec.mmio_write(reg::IMR, 0, ctl());
        mec.mmio_write(reg::IFR, 1 << 9, ctl());
        assert_eq!(mec.devices.irq.irl(), 9);
    }
}
