//! # stm32bl
//!
//! A library for programming microcontroller flash through a resident serial
//! bootloader.
//!
//! This crate provides the host side of the bootloader protocol:
//!
//! - CRC-8 (Dow/Maxim) checksum
//! - Frame codec for the word-aligned and compact frame layouts
//! - Chunked WRITE / VERIFY / READ transfers and FAST_READ streaming
//! - CONNECT handshake with bounded retry
//! - ERASE, RESET, JUMP and GET_VERSION control commands
//!
//! ## Features
//!
//! - `native` (default): Native serial port support via the `serialport` crate
//! - `serde`: Serialization support for profile types
//!
//! ## Example
//!
//! ```rust,no_run
//! use stm32bl::{FirmwareImage, Flasher, Profile};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let image = FirmwareImage::from_file("app.bin")?;
//!
//!     #[cfg(feature = "native")]
//!     {
//!         let mut flasher = Flasher::open("/dev/ttyUSB0", 115_200, Profile::default())?;
//!         flasher.connect()?;
//!         flasher.write(0x0800_8000, image.data(), &mut |p| {
//!             println!("0x{:08X}: {}/{}", p.address, p.done, p.total);
//!         })?;
//!         flasher.close()?;
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::sync::{Arc, OnceLock};

pub mod bootloader;
pub mod error;
pub mod image;
pub mod port;
pub mod protocol;

static INTERRUPT_CHECKER: OnceLock<Arc<dyn Fn() -> bool + Send + Sync>> = OnceLock::new();

/// Register a global interruption checker polled between transfer blocks.
///
/// The checker should return `true` when the current operation should stop
/// (for example after receiving Ctrl-C in CLI applications). Only the first
/// registration takes effect.
pub fn set_interrupt_checker<F>(checker: F)
where
    F: Fn() -> bool + Send + Sync + 'static,
{
    let _ = INTERRUPT_CHECKER.set(Arc::new(checker));
}

/// Returns whether interruption was requested by the embedding application.
#[must_use]
pub fn is_interrupted_requested() -> bool {
    INTERRUPT_CHECKER
        .get()
        .is_some_and(|checker| checker())
}

// Re-exports for convenience
#[cfg(feature = "native")]
pub use port::{NativePort, NativePortEnumerator};
pub use {
    bootloader::{DEFAULT_ADDRESS, DEFAULT_READ_SIZE, Flasher, Profile, SessionState},
    error::{Error, Result},
    image::{FirmwareImage, save_capture},
    port::{Port, PortEnumerator, PortInfo, SerialConfig},
    protocol::{
        Ack, Command, Frame, FrameLayout, MismatchPolicy, Progress, TransferSummary, crc8,
    },
};
