//! Protocol profile.
//!
//! A profile collects the knobs that differ between bootloader builds: the
//! frame layout, block size, whether the CONNECT handshake is required, and
//! the timing of each exchange.

use crate::error::{Error, Result};
use crate::protocol::{FrameLayout, MismatchPolicy, TransferConfig};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Duration;

/// Default application base address.
pub const DEFAULT_ADDRESS: u32 = 0x0800_8000;

/// Default number of bytes captured by READ.
pub const DEFAULT_READ_SIZE: usize = 480_000;

/// Default CONNECT attempts.
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 10;

/// Default acknowledgment timeout.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Default ERASE acknowledgment timeout.
pub const DEFAULT_ERASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between CONNECT attempts.
pub const DEFAULT_CONNECT_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Bootloader protocol profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    /// Block command layout.
    pub layout: FrameLayout,
    /// Largest payload per block.
    pub block_size: usize,
    /// Whether CONNECT must succeed before any command.
    pub handshake: bool,
    /// Number of CONNECT bytes sent before giving up.
    pub connect_attempts: u32,
    /// Wait for each CONNECT reply.
    pub connect_timeout: Duration,
    /// Pause between CONNECT attempts.
    pub connect_retry_delay: Duration,
    /// Wait for each acknowledgment or payload.
    pub ack_timeout: Duration,
    /// Wait for the ERASE acknowledgment.
    pub erase_timeout: Duration,
    /// READ checksum mismatch handling.
    pub mismatch: MismatchPolicy,
}

impl Profile {
    /// Profile with the defaults of the given layout.
    pub fn new(layout: FrameLayout) -> Self {
        Self {
            layout,
            block_size: layout.default_block_size(),
            handshake: true,
            connect_attempts: DEFAULT_CONNECT_ATTEMPTS,
            connect_timeout: DEFAULT_ACK_TIMEOUT,
            connect_retry_delay: DEFAULT_CONNECT_RETRY_DELAY,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            erase_timeout: DEFAULT_ERASE_TIMEOUT,
            mismatch: MismatchPolicy::default(),
        }
    }

    /// Profile by layout name (`word-aligned` or `compact`).
    pub fn from_name(name: &str) -> Option<Self> {
        FrameLayout::from_name(name).map(Self::new)
    }

    /// Set the block size.
    #[must_use]
    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    /// Require or skip the CONNECT handshake.
    #[must_use]
    pub fn with_handshake(mut self, handshake: bool) -> Self {
        self.handshake = handshake;
        self
    }

    /// Set the number of CONNECT attempts.
    #[must_use]
    pub fn with_connect_attempts(mut self, attempts: u32) -> Self {
        self.connect_attempts = attempts;
        self
    }

    /// Set the CONNECT reply timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the pause between CONNECT attempts.
    #[must_use]
    pub fn with_connect_retry_delay(mut self, delay: Duration) -> Self {
        self.connect_retry_delay = delay;
        self
    }

    /// Set the acknowledgment timeout.
    #[must_use]
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the ERASE timeout.
    #[must_use]
    pub fn with_erase_timeout(mut self, timeout: Duration) -> Self {
        self.erase_timeout = timeout;
        self
    }

    /// Set the READ checksum mismatch policy.
    #[must_use]
    pub fn with_mismatch_policy(mut self, policy: MismatchPolicy) -> Self {
        self.mismatch = policy;
        self
    }

    /// Check the profile for values the wire format or the port cannot use.
    pub fn validate(&self) -> Result<()> {
        let max = self.layout.max_payload();
        if self.block_size == 0 || self.block_size > max {
            return Err(Error::Config(format!(
                "block size {} is outside 1..={max} for the {} layout",
                self.block_size, self.layout
            )));
        }
        if self.handshake && self.connect_attempts == 0 {
            return Err(Error::Config(
                "connect attempts must be at least 1 when the handshake is enabled".into(),
            ));
        }
        let timeouts = [
            ("ack", self.ack_timeout, true),
            ("erase", self.erase_timeout, true),
            ("connect", self.connect_timeout, self.handshake),
        ];
        for (name, timeout, used) in timeouts {
            if used && timeout.is_zero() {
                return Err(Error::Config(format!("{name} timeout must be non-zero")));
            }
        }
        Ok(())
    }

    /// Transfer settings derived from this profile.
    pub fn transfer_config(&self, cancel: Option<Arc<AtomicBool>>) -> TransferConfig {
        TransferConfig {
            layout: self.layout,
            block_size: self.block_size,
            ack_timeout: self.ack_timeout,
            mismatch: self.mismatch,
            cancel,
        }
    }
}

impl Default for Profile {
    fn default() -> Self {
        Self::new(FrameLayout::default())
    }
}
