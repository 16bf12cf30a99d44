//! Port abstraction for the serial link to the bootloader.
//!
//! The protocol layer never touches a concrete serial driver. It talks to a
//! [`Port`], which adds the two timed reads the half-duplex exchange needs on
//! top of `Read + Write`:
//!
//! ```text
//! +---------------------------+
//! |  Flasher / BlockTransfer  |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |        Port trait         |
//! +-------------+-------------+
//!               |
//!               v
//! +-------------+-------------+
//! |  NativePort (serialport)  |
//! +---------------------------+
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use stm32bl::port::Port;
//!
//! fn poke<P: Port>(port: &mut P) -> stm32bl::Result<()> {
//!     port.write_all_bytes(&[0x7F])?;
//!     match port.read_byte(Duration::from_millis(100))? {
//!         Some(byte) => println!("reply 0x{byte:02X}"),
//!         None => println!("no reply"),
//!     }
//!     Ok(())
//! }
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod sim;

use std::io::{self, Read, Write};
use std::time::Duration;

use crate::error::{Error, Result};

/// Settings used to open the serial link.
///
/// The bootloader UART is fixed at 8 data bits, no parity, one stop bit and
/// no flow control, so only the name, speed and timeout vary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyUSB0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Initial read/write timeout.
    pub timeout: Duration,
}

impl SerialConfig {
    /// Configuration for `port_name` at `baud_rate` with a one second timeout.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            timeout: Duration::from_secs(1),
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Serial port information.
#[derive(Debug, Clone)]
pub struct PortInfo {
    /// Port name/path.
    pub name: String,
    /// USB vendor ID (if available).
    pub vid: Option<u16>,
    /// USB product ID (if available).
    pub pid: Option<u16>,
    /// Product string (if available).
    pub product: Option<String>,
}

/// Transport used by the protocol layer.
///
/// Reads are bounded per call: a read that sees no data within the current
/// timeout returns `Ok(0)` or an `io::ErrorKind::TimedOut` error, and the
/// timed helpers below turn either into "nothing received".
pub trait Port: Read + Write + Send {
    /// Set the read/write timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current timeout.
    fn timeout(&self) -> Duration;

    /// Drop any stale bytes in both directions.
    fn clear_buffers(&mut self) -> Result<()>;

    /// Port name, for log messages.
    fn name(&self) -> &str;

    /// Release the device. Further I/O fails; closing again is a no-op.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }

    /// Fill `buf`, waiting at most `timeout` for each read.
    ///
    /// Returns the number of bytes received. Anything short of `buf.len()`
    /// means the device went quiet.
    fn read_exact_timeout(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.timeout() != timeout {
            self.set_timeout(timeout)?;
        }

        let mut filled = 0;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(filled)
    }

    /// Read a single byte, or `None` if nothing arrived within `timeout`.
    fn read_byte(&mut self, timeout: Duration) -> Result<Option<u8>> {
        let mut buf = [0u8; 1];
        let n = self.read_exact_timeout(&mut buf, timeout)?;
        Ok((n == 1).then_some(buf[0]))
    }
}

/// Trait for listing available serial ports.
pub trait PortEnumerator {
    /// List all available serial ports.
    fn list_ports() -> Result<Vec<PortInfo>>;
}

#[cfg(feature = "native")]
pub use native::{NativePort, NativePortEnumerator};
