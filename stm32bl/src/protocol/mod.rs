//! Bootloader wire protocol.

pub mod ack;
pub mod crc;
pub mod frame;
pub mod transfer;

// Re-export common types
pub use ack::{ACK, Ack, ERROR, NACK, decode_ack, decode_payload};
pub use crc::crc8;
pub use frame::{Command, Frame, FrameLayout, SYNC};
pub use transfer::{
    BlockTransfer, MismatchPolicy, Progress, TransferConfig, TransferSummary, plan_blocks,
};
