//! The two MEC serial channels and their host-side backends.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use super::irq::{InterruptController, level};

/// Cycles to shift one character out.
pub const TX_TIME: u64 = 1000;
/// Cycles between receive polls.
pub const RX_TIME: u64 = 1000;

/// UART A bits of the status register; UART B uses the same bits shifted by 16.
pub mod status {
    pub const DR: u32 = 0x01;
    pub const SRE: u32 = 0x02;
    pub const HRE: u32 = 0x04;
    pub const OR: u32 = 0x40;
    pub const CLR: u32 = 0x80;
}

/// Status bits mirrored in the data register.
mod data {
    pub const DR: u32 = 0x100;
    pub const TSE: u32 = 0x200;
    pub const THE: u32 = 0x400;
}

/// Host end of a serial channel.
pub trait SerialPort: Send {
    /// Next received byte, if any. Must not block.
    fn read_byte(&mut self) -> Option<u8>;
    fn write_byte(&mut self, byte: u8);
    /// Whether this port can ever deliver input. Ports that can't are never polled.
    fn can_receive(&self) -> bool {
        true
    }
}

/// Discards output, never receives.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullPort;

impl SerialPort for NullPort {
    fn read_byte(&mut self) -> Option<u8> {
        None
    }

    fn write_byte(&mut self, _byte: u8) {}

    fn can_receive(&self) -> bool {
        false
    }
}

/// Waits for the buffer; a panic on the other side leaves its data usable.
fn lock<T>(buf: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    match buf.write() {
        Ok(g) => g,
        Err(e) => e.into_inner(),
    }
}

/// Port backed by shared in-memory buffers.
#[derive(Debug, Default, Clone)]
pub struct BufferedPort {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Arc<RwLock<Vec<u8>>>,
}

impl BufferedPort {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(&self) -> &Arc<RwLock<VecDeque<u8>>> {
        &self.input
    }

    pub fn output(&self) -> &Arc<RwLock<Vec<u8>>> {
        &self.output
    }

    /// Queues bytes for the simulated program to receive.
    pub fn push_input(&self, bytes: &[u8]) {
        lock(&self.input).extend(bytes);
    }

    /// Everything the simulated program transmitted so far.
    pub fn take_output(&self) -> Vec<u8> {
        std::mem::take(&mut *lock(&self.output))
    }
}

impl SerialPort for BufferedPort {
    fn read_byte(&mut self) -> Option<u8> {
        lock(&self.input).pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        lock(&self.output).push(byte);
    }
}

/// Port over a host stream. A reader thread fills the receive buffer so that
/// polling never blocks the simulation.
pub struct StreamPort {
    input: Arc<RwLock<VecDeque<u8>>>,
    output: Box<dyn Write + Send>,
}

impl StreamPort {
    pub fn new(reader: impl Read + Send + 'static, output: impl Write + Send + 'static) -> Self {
        let input = Arc::new(RwLock::new(VecDeque::new()));
        let sink = Arc::clone(&input);
        std::thread::spawn(move || {
            let mut reader = reader;
            let mut buf = [0u8; 64];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        lock(&sink).extend(&buf[..n]);
                    }
                }
            }
        });
        Self { input, output: Box::new(output) }
    }

    pub fn stdio() -> Self {
        Self::new(std::io::stdin(), std::io::stdout())
    }

    /// Opens a host device or file for both directions.
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let rx = File::open(path)?;
        let tx = std::fs::OpenOptions::new().write(true).open(path)?;
        Ok(Self::new(rx, tx))
    }
}

impl SerialPort for StreamPort {
    fn read_byte(&mut self) -> Option<u8> {
        lock(&self.input).pop_front()
    }

    fn write_byte(&mut self, byte: u8) {
        if let Err(e) = self.output.write_all(&[byte]).and_then(|_| self.output.flush()) {
            tracing::warn!(error = %e, "serial output failed");
        }
    }
}

/// One serial channel: a shift and a hold register for transmit, one latch for receive.
pub struct UartChannel {
    pub name: char,
    level: u8,
    shift: u8,
    hold: u8,
    rx: u8,
    sre: bool,
    hre: bool,
    dr: bool,
    overrun: bool,
    port: Box<dyn SerialPort>,
}

impl std::fmt::Debug for UartChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UartChannel")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("rx", &self.rx)
            .finish_non_exhaustive()
    }
}

impl UartChannel {
    fn new(name: char, level: u8, port: Box<dyn SerialPort>) -> Self {
        Self {
            name,
            level,
            shift: 0,
            hold: 0,
            rx: 0,
            sre: true,
            hre: true,
            dr: false,
            overrun: false,
            port,
        }
    }

    pub fn reset(&mut self) {
        self.sre = true;
        self.hre = true;
        self.dr = false;
        self.overrun = false;
        self.rx = 0;
    }

    pub fn set_port(&mut self, port: Box<dyn SerialPort>) {
        self.port = port;
    }

    pub fn can_receive(&self) -> bool {
        self.port.can_receive()
    }

    /// Status bits in UART A position.
    pub fn status(&self) -> u32 {
        let mut s = 0;
        if self.dr {
            s |= status::DR;
        }
        if self.sre {
            s |= status::SRE;
        }
        if self.hre {
            s |= status::HRE;
        }
        if self.overrun {
            s |= status::OR;
        }
        s
    }

    /// Reading the data register consumes the received byte.
    pub fn read_data(&mut self) -> u32 {
        let mut v = self.rx as u32;
        if self.dr {
            v |= data::DR;
        }
        if self.sre {
            v |= data::TSE;
        }
        if self.hre {
            v |= data::THE;
        }
        self.dr = false;
        v
    }

    /// Returns the transmit delay when the byte went straight into the shift register.
    pub fn write_data(&mut self, value: u32) -> Option<u64> {
        let byte = value as u8;
        if self.sre {
            self.shift = byte;
            self.sre = false;
            Some(TX_TIME)
        } else {
            self.hold = byte;
            self.hre = false;
            None
        }
    }

    /// The shift register finished sending. Returns the delay for the next
    /// completion when the hold register had a byte waiting.
    pub fn tx_complete(&mut self, irq: &mut InterruptController) -> Option<u64> {
        self.port.write_byte(self.shift);
        let next = if self.hre {
            self.sre = true;
            None
        } else {
            self.shift = self.hold;
            self.hre = true;
            Some(TX_TIME)
        };
        irq.post(self.level);
        next
    }

    /// One receive poll.
    pub fn poll(&mut self, irq: &mut InterruptController) {
        let Some(byte) = self.port.read_byte() else { return };
        if self.dr {
            self.overrun = true;
            tracing::debug!(channel = %self.name, "receive overrun");
            irq.post(level::UART_ERROR);
        }
        self.rx = byte;
        self.dr = true;
        irq.post(self.level);
    }

    fn clear(&mut self) {
        self.dr = false;
        self.overrun = false;
        self.sre = true;
        self.hre = true;
    }
}

#[derive(Debug)]
pub struct UartPair {
    pub a: UartChannel,
    pub b: UartChannel,
}

impl Default for UartPair {
    fn default() -> Self {
        Self::new(Box::new(NullPort), Box::new(NullPort))
    }
}

impl UartPair {
    pub fn new(a: Box<dyn SerialPort>, b: Box<dyn SerialPort>) -> Self {
        Self {
            a: UartChannel::new('A', level::UART_A, a),
            b: UartChannel::new('B', level::UART_B, b),
        }
    }

    pub fn reset(&mut self) {
        self.a.reset();
        self.b.reset();
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut UartChannel {
        if index == 0 { &mut self.a } else { &mut self.b }
    }

    pub fn can_receive(&self) -> bool {
        self.a.can_receive() || self.b.can_receive()
    }

    pub fn status(&self) -> u32 {
        self.a.status() | (self.b.status() << 16)
    }

    pub fn write_status(&mut self, value: u32) {
        if value & status::CLR != 0 {
            self.a.clear();
        }
        if value & (status::CLR << 16) != 0 {
            self.b.clear();
        }
    }

    /// Polls both receivers. Returns true while another poll should be scheduled.
    pub fn poll(&mut self, irq: &mut InterruptController) -> bool {
        self.a.poll(irq);
        self.b.poll(irq);
        self.can_receive()
    }
}
