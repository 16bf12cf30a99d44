//! Error types for stm32bl.

use crate::protocol::Command;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for stm32bl operations.
pub type Result<T> = std::result::Result<T, Error>;

fn at(address: Option<u32>) -> String {
    address.map_or_else(String::new, |a| format!(" at 0x{a:08X}"))
}

/// Error type for stm32bl operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No reply arrived before the read timeout expired.
    #[error("{command} timed out waiting for the device{}", at(*.address))]
    Timeout {
        /// Command that was waiting for a reply.
        command: Command,
        /// Target address of the failing block, if any.
        address: Option<u32>,
    },

    /// The device answered NACK or an unrecognised byte.
    #[error("{command} rejected by the device{} (reply 0x{reply:02X})", at(*.address))]
    Rejected {
        /// Command that was rejected.
        command: Command,
        /// Target address of the failing block, if any.
        address: Option<u32>,
        /// Raw reply byte.
        reply: u8,
    },

    /// The device reported an internal fault.
    #[error("{command} failed with a device error{}", at(*.address))]
    DeviceError {
        /// Command that failed.
        command: Command,
        /// Target address of the failing block, if any.
        address: Option<u32>,
    },

    /// Payload checksum did not match the trailing checksum byte.
    #[error("Checksum mismatch at 0x{address:08X}: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch {
        /// Address of the corrupted block.
        address: u32,
        /// Checksum computed over the received payload.
        expected: u8,
        /// Checksum byte sent by the device.
        actual: u8,
    },

    /// The CONNECT handshake never got an ACK.
    #[error("Could not connect to the bootloader after {attempts} attempts")]
    ConnectionFailed {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Firmware image could not be opened or sized.
    #[error("Cannot open image {}: {source}", .path.display())]
    SourceUnavailable {
        /// Path of the image.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// An operation was issued before the required handshake.
    #[error("Not connected: the CONNECT handshake must succeed first")]
    NotConnected,

    /// The session cannot run the requested operation in its current state.
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// The operation was cancelled between two blocks or handshake attempts.
    #[error("Cancelled{}", at(*.address))]
    Cancelled {
        /// Address of the next block that would have been sent.
        address: Option<u32>,
    },

    /// Frame layout or length violation.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Command not available in the selected frame layout.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Address of the block at which a transfer failed, when known.
    pub fn address(&self) -> Option<u32> {
        match self {
            Self::Timeout { address, .. }
            | Self::Rejected { address, .. }
            | Self::DeviceError { address, .. }
            | Self::Cancelled { address } => *address,
            Self::ChecksumMismatch { address, .. } => Some(*address),
            _ => None,
        }
    }
}
