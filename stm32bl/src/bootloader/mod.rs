//! Bootloader session and protocol profile.

pub mod flasher;
pub mod profile;

pub use flasher::{Flasher, SessionState};
pub use profile::{
    DEFAULT_ACK_TIMEOUT, DEFAULT_ADDRESS, DEFAULT_CONNECT_ATTEMPTS, DEFAULT_ERASE_TIMEOUT,
    DEFAULT_READ_SIZE, Profile,
};
