//! Bootloader session.
//!
//! A [`Flasher`] owns the port for one invocation. It performs the optional
//! CONNECT handshake and then runs exactly one operation:
//!
//! ```text
//!  Idle --connect()--> Connected --op--> Executing(op) --+--> Done
//!                                                        +--> Failed
//! ```
//!
//! Anything issued out of order is refused with [`Error::NotConnected`] or
//! [`Error::InvalidState`] before a byte is written.
//!
//! ## Example
//!
//! ```rust,no_run
//! use stm32bl::{Flasher, Profile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = std::fs::read("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut flasher = Flasher::open("/dev/ttyUSB0", 115_200, Profile::default())?;
//!         flasher.connect()?;
//!         let summary = flasher.write(0x0800_8000, &image, &mut |p| {
//!             println!("{}/{} bytes", p.done, p.total);
//!         })?;
//!         println!("{} blocks", summary.blocks);
//!         flasher.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

use crate::bootloader::profile::Profile;
use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{
    BlockTransfer, Command, Frame, Progress, TransferSummary, decode_ack, decode_payload,
};
use log::{debug, info, trace, warn};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Port open, no handshake yet.
    Idle,
    /// Ready for one operation.
    Connected,
    /// Running an operation.
    Executing(Command),
    /// The operation succeeded.
    Done,
    /// The handshake or the operation failed.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connected => write!(f, "connected"),
            Self::Executing(command) => write!(f, "executing {command}"),
            Self::Done => write!(f, "done"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Bootloader session over a port.
pub struct Flasher<P: Port> {
    port: P,
    profile: Profile,
    state: SessionState,
    cancel: Option<Arc<AtomicBool>>,
}

impl<P: Port> Flasher<P> {
    /// Create a session on an already opened port.
    pub fn new(port: P, profile: Profile) -> Self {
        Self {
            port,
            profile,
            state: SessionState::Idle,
            cancel: None,
        }
    }

    /// Stop block transfers when `flag` becomes true.
    #[must_use]
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Protocol profile in use.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Get a reference to the underlying port.
    pub fn port(&self) -> &P {
        &self.port
    }

    /// Get a mutable reference to the underlying port.
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    /// Consume the session and return the underlying port.
    pub fn into_port(self) -> P {
        self.port
    }

    /// Establish the session.
    ///
    /// With the handshake enabled, sends the CONNECT byte until the device
    /// answers ACK or the attempt budget runs out. No other byte is sent.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != SessionState::Idle {
            return Err(Error::InvalidState(format!(
                "connect requested while {}",
                self.state
            )));
        }
        self.profile.validate()?;

        if !self.profile.handshake {
            debug!("Handshake disabled, session ready");
            self.state = SessionState::Connected;
            return Ok(());
        }

        let attempts = self.profile.connect_attempts;
        info!("Connecting to bootloader on {}...", self.port.name());

        for attempt in 1..=attempts {
            if self.cancel_requested() {
                debug!("Handshake cancelled before attempt {attempt}");
                self.state = SessionState::Failed;
                return Err(Error::Cancelled { address: None });
            }
            if attempt > 1 {
                info!("Connection attempt {attempt}/{attempts}");
            }

            self.port.clear_buffers()?;
            self.port.write_all_bytes(&[Command::Connect.code()])?;

            let ack = decode_ack(&mut self.port, self.profile.connect_timeout)?;
            if ack.is_acked() {
                info!("Connected to target");
                self.state = SessionState::Connected;
                return Ok(());
            }

            if attempt < attempts {
                warn!("No ACK (attempt {attempt}/{attempts}): {ack:?}");
                thread::sleep(self.profile.connect_retry_delay);
            }
        }

        self.state = SessionState::Failed;
        Err(Error::ConnectionFailed { attempts })
    }

    fn cancel_requested(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
            || crate::is_interrupted_requested()
    }

    fn begin(&mut self, command: Command) -> Result<()> {
        match self.state {
            SessionState::Connected => {},
            SessionState::Idle if !self.profile.handshake => self.profile.validate()?,
            SessionState::Idle => return Err(Error::NotConnected),
            state => {
                return Err(Error::InvalidState(format!(
                    "{command} requested while {state}; one operation per session"
                )));
            },
        }
        trace!("Session executing {command}");
        self.state = SessionState::Executing(command);
        Ok(())
    }

    fn finish<T>(&mut self, result: Result<T>) -> Result<T> {
        self.state = if result.is_ok() {
            SessionState::Done
        } else {
            SessionState::Failed
        };
        result
    }

    fn transfer(&mut self) -> BlockTransfer<'_, P> {
        let config = self.profile.transfer_config(self.cancel.clone());
        BlockTransfer::with_config(&mut self.port, config)
    }

    /// Program `data` at `address`.
    pub fn write(
        &mut self,
        address: u32,
        data: &[u8],
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferSummary> {
        self.begin(Command::Write)?;
        info!("Writing {} bytes at 0x{address:08X}", data.len());
        let result = self
            .transfer()
            .send(Command::Write, address, data, progress);
        self.finish(result)
    }

    /// Compare `data` against flash at `address`.
    pub fn verify(
        &mut self,
        address: u32,
        data: &[u8],
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferSummary> {
        self.begin(Command::Verify)?;
        info!("Verifying {} bytes at 0x{address:08X}", data.len());
        let result = self
            .transfer()
            .send(Command::Verify, address, data, progress);
        self.finish(result)
    }

    /// Read `len` bytes from `address`, one block per request.
    pub fn read(
        &mut self,
        address: u32,
        len: usize,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<(Vec<u8>, TransferSummary)> {
        self.begin(Command::Read)?;
        info!("Reading {len} bytes at 0x{address:08X}");
        let result = self.transfer().receive(address, len, progress);
        self.finish(result)
    }

    /// Read `len` bytes from `address` with a single streamed request.
    pub fn fast_read(
        &mut self,
        address: u32,
        len: usize,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<(Vec<u8>, TransferSummary)> {
        self.begin(Command::FastRead)?;
        info!("Fast reading {len} bytes at 0x{address:08X}");
        let result = self.transfer().fast_read(address, len, progress);
        self.finish(result)
    }

    fn control(&mut self, command: Command, timeout: Duration) -> Result<()> {
        let bytes = Frame::control(command).encode(self.profile.layout)?;
        trace!("TX {command} {bytes:02X?}");
        self.port.write_all_bytes(&bytes)?;
        decode_ack(&mut self.port, timeout)?.into_result(command, None)
    }

    /// Erase the application area.
    ///
    /// Waits for the acknowledgment with the erase timeout and puts the
    /// previous port timeout back afterwards, whatever the outcome.
    pub fn erase(&mut self) -> Result<()> {
        self.begin(Command::Erase)?;
        info!("Erasing flash...");

        let previous = self.port.timeout();
        let erase_timeout = self.profile.erase_timeout;
        let result = self
            .port
            .set_timeout(erase_timeout)
            .and_then(|()| self.control(Command::Erase, erase_timeout));
        let restored = self.port.set_timeout(previous);

        let result = result.and(restored);
        if result.is_ok() {
            info!("Flash erased");
        }
        self.finish(result)
    }

    /// Reset the microcontroller.
    pub fn reset(&mut self) -> Result<()> {
        self.begin(Command::Reset)?;
        info!("Resetting device...");
        let result = self.control(Command::Reset, self.profile.ack_timeout);
        self.finish(result)
    }

    /// Start the user application.
    pub fn jump(&mut self) -> Result<()> {
        self.begin(Command::Jump)?;
        info!("Jumping to application...");
        let result = self.control(Command::Jump, self.profile.ack_timeout);
        self.finish(result)
    }

    /// Query the bootloader version as `[major, minor, patch]`.
    pub fn get_version(&mut self) -> Result<[u8; 3]> {
        self.begin(Command::GetVersion)?;
        let result = self.query_version();
        self.finish(result)
    }

    fn query_version(&mut self) -> Result<[u8; 3]> {
        let timeout = self.profile.ack_timeout;
        self.control(Command::GetVersion, timeout)?;
        let mut version = [0u8; 3];
        decode_payload(&mut self.port, &mut version, timeout)?
            .into_result(Command::GetVersion, None)?;
        debug!(
            "Bootloader version {}.{}.{}",
            version[0], version[1], version[2]
        );
        Ok(version)
    }

    /// Close the port.
    ///
    /// Safe to call more than once.
    pub fn close(&mut self) -> Result<()> {
        self.port.close()
    }
}

#[cfg(feature = "native")]
mod native_impl {
    use super::{Flasher, Profile, Result, debug, thread, warn};
    use crate::port::{NativePort, SerialConfig};
    use std::time::Duration;

    impl Flasher<NativePort> {
        /// Open `port_name` at `baud_rate` and create a session on it.
        pub fn open(port_name: &str, baud_rate: u32, profile: Profile) -> Result<Self> {
            const MAX_OPEN_PORT_ATTEMPTS: usize = 3;
            const OPEN_RETRY_DELAY: Duration = Duration::from_millis(200);

            let config = SerialConfig::new(port_name, baud_rate).with_timeout(profile.ack_timeout);
            let mut attempt = 1;
            loop {
                match NativePort::open(&config) {
                    Ok(port) => {
                        if attempt > 1 {
                            debug!("Port opened on attempt {attempt}");
                        }
                        return Ok(Self::new(port, profile));
                    },
                    Err(e) if attempt < MAX_OPEN_PORT_ATTEMPTS => {
                        warn!(
                            "Failed to open port {port_name} (attempt {attempt}/{MAX_OPEN_PORT_ATTEMPTS}): {e}"
                        );
                        thread::sleep(OPEN_RETRY_DELAY);
                        attempt += 1;
                    },
                    Err(e) => return Err(e),
                }
            }
        }
    }
}
