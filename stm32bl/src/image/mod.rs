//! Firmware image source and capture sink.

pub mod binary;

pub use binary::{FirmwareImage, save_capture};
