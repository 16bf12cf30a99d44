//! In-memory ports for unit tests.
//!
//! [`ScriptedPort`] plays back fixed reply bytes. [`SimBootloader`] decodes
//! the frames it receives and answers like a device, keeping a sparse flash
//! model and a log of everything the host sent.

use crate::error::Result;
use crate::port::Port;
use crate::protocol::ack::{ACK, ERROR, NACK};
use crate::protocol::crc::crc8;
use crate::protocol::frame::{Command, Frame, FrameLayout, SYNC};
use std::collections::{HashMap, VecDeque};
use std::io::{self, Read, Write};
use std::time::Duration;

fn timed_out() -> io::Error {
    io::Error::new(io::ErrorKind::TimedOut, "no data")
}

/// Port that returns canned bytes and records writes.
pub struct ScriptedPort {
    rx: VecDeque<u8>,
    pub tx: Vec<u8>,
    timeout: Duration,
}

impl ScriptedPort {
    pub fn new(replies: &[u8]) -> Self {
        Self {
            rx: replies.iter().copied().collect(),
            tx: Vec::new(),
            timeout: Duration::from_millis(1000),
        }
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.rx.pop_front() {
            Some(b) if !buf.is_empty() => {
                buf[0] = b;
                Ok(1)
            },
            Some(b) => {
                self.rx.push_front(b);
                Ok(0)
            },
            None => Err(timed_out()),
        }
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.tx.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Misbehaviour injected for one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Reply NACK.
    Nack,
    /// Reply ERROR.
    DeviceError,
    /// Say nothing.
    Silent,
    /// ACK a READ but send a wrong checksum.
    CorruptChecksum,
    /// ACK a READ but stop halfway through the payload.
    Truncate,
}

/// Simulated bootloader.
pub struct SimBootloader {
    layout: FrameLayout,
    rx: Vec<u8>,
    tx: VecDeque<u8>,
    timeout: Duration,
    /// Sparse flash; unset addresses read as 0xFF.
    pub flash: HashMap<u32, u8>,
    /// Every frame received, in order.
    pub frames: Vec<Frame>,
    /// Number of CONNECT bytes received.
    pub connect_bytes: usize,
    /// Port timeout in force when each frame arrived.
    pub frame_timeouts: Vec<(Command, Duration)>,
    /// Every timeout the host set.
    pub timeout_log: Vec<Duration>,
    /// Number of CONNECT bytes answered with NACK before the first ACK.
    pub connect_nacks: usize,
    /// Never answer CONNECT.
    pub connect_silent: bool,
    /// Faults keyed by frame index. A fault is consumed when it fires.
    pub faults: HashMap<usize, Fault>,
    /// Bytes returned by GET_VERSION.
    pub version: [u8; 3],
    /// Bytes that were not part of any frame.
    pub stray: Vec<u8>,
    pub closed: bool,
}

impl SimBootloader {
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            rx: Vec::new(),
            tx: VecDeque::new(),
            timeout: Duration::from_millis(1000),
            flash: HashMap::new(),
            frames: Vec::new(),
            connect_bytes: 0,
            frame_timeouts: Vec::new(),
            timeout_log: Vec::new(),
            connect_nacks: 0,
            connect_silent: false,
            faults: HashMap::new(),
            version: [1, 2, 0],
            stray: Vec::new(),
            closed: false,
        }
    }

    /// Inject a fault for the frame with the given 0-based index.
    #[must_use]
    pub fn with_fault(mut self, index: usize, fault: Fault) -> Self {
        self.faults.insert(index, fault);
        self
    }

    /// Preload flash contents.
    pub fn load(&mut self, address: u32, data: &[u8]) {
        for (i, &b) in data.iter().enumerate() {
            self.flash.insert(address + i as u32, b);
        }
    }

    /// Flash contents over a range.
    pub fn dump(&self, address: u32, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| {
                self.flash
                    .get(&(address + i as u32))
                    .copied()
                    .unwrap_or(0xFF)
            })
            .collect()
    }

    /// Block frames received so far as `(command, address, size)`.
    pub fn block_log(&self) -> Vec<(Command, u32, u32)> {
        self.frames
            .iter()
            .map(|f| (f.command(), f.address(), f.size()))
            .collect()
    }

    fn reply(&mut self, bytes: &[u8]) {
        self.tx.extend(bytes.iter().copied());
    }

    fn process(&mut self) {
        loop {
            let Some(&first) = self.rx.first() else {
                return;
            };
            if first == Command::Connect.code() {
                self.rx.remove(0);
                self.connect_bytes += 1;
                if self.connect_silent {
                    continue;
                }
                if self.connect_bytes <= self.connect_nacks {
                    self.reply(&[NACK]);
                } else {
                    self.reply(&[ACK]);
                }
                continue;
            }
            if first != SYNC {
                self.stray.push(self.rx.remove(0));
                continue;
            }
            let Some(&len) = self.rx.get(1) else {
                return;
            };
            let total = usize::from(len) + 2;
            if self.rx.len() < total {
                return;
            }
            let bytes: Vec<u8> = self.rx.drain(..total).collect();
            match Frame::decode(&bytes, self.layout) {
                Ok(frame) => self.handle(frame),
                Err(_) => self.reply(&[NACK]),
            }
        }
    }

    fn handle(&mut self, frame: Frame) {
        let index = self.frames.len();
        let command = frame.command();
        self.frame_timeouts.push((command, self.timeout));
        self.frames.push(frame.clone());

        let fault = self.faults.remove(&index);
        match fault {
            Some(Fault::Nack) => return self.reply(&[NACK]),
            Some(Fault::DeviceError) => return self.reply(&[ERROR]),
            Some(Fault::Silent) => return,
            _ => {},
        }

        match command {
            Command::Write => {
                self.load(frame.address(), frame.payload());
                self.reply(&[ACK]);
            },
            Command::Verify => {
                let matches =
                    self.dump(frame.address(), frame.payload().len()) == frame.payload();
                self.reply(&[if matches { ACK } else { NACK }]);
            },
            Command::Read => {
                let data = self.dump(frame.address(), frame.size() as usize);
                let crc = crc8(&data);
                self.reply(&[ACK]);
                match fault {
                    Some(Fault::CorruptChecksum) => {
                        self.reply(&data);
                        self.reply(&[crc ^ 0x5A]);
                    },
                    Some(Fault::Truncate) => self.reply(&data[..data.len() / 2]),
                    _ => {
                        self.reply(&data);
                        self.reply(&[crc]);
                    },
                }
            },
            Command::FastRead => {
                let data = self.dump(frame.address(), frame.size() as usize);
                self.reply(&[ACK]);
                match fault {
                    Some(Fault::Truncate) => self.reply(&data[..data.len() / 2]),
                    _ => self.reply(&data),
                }
            },
            Command::Erase => {
                self.flash.clear();
                self.reply(&[ACK]);
            },
            Command::GetVersion => {
                let version = self.version;
                self.reply(&[ACK]);
                self.reply(&version);
                self.reply(&[crc8(&version)]);
            },
            Command::Reset | Command::Jump => self.reply(&[ACK]),
            Command::Connect | Command::Help => self.reply(&[NACK]),
        }
    }
}

impl Read for SimBootloader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.tx.is_empty() {
            return Err(timed_out());
        }
        let n = buf.len().min(self.tx.len());
        for (slot, byte) in buf.iter_mut().zip(self.tx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimBootloader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "port closed"));
        }
        self.rx.extend_from_slice(buf);
        self.process();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimBootloader {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout_log.push(timeout);
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_buffers(&mut self) -> Result<()> {
        self.tx.clear();
        Ok(())
    }

    fn name(&self) -> &str {
        "sim"
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        Ok(())
    }
}
