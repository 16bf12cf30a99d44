//! Acknowledgment and payload replies.
//!
//! The bootloader answers every frame with a single status byte. READ is
//! followed by the requested bytes and a CRC8 over them:
//!
//! ```text
//! +------+---------------------+-------+
//! | 0x90 |  payload (n bytes)  | CRC8  |
//! +------+---------------------+-------+
//! ```

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::crc::crc8;
use crate::protocol::frame::Command;
use log::trace;
use std::time::Duration;

/// Positive acknowledgment.
pub const ACK: u8 = 0x90;

/// Negative acknowledgment.
pub const NACK: u8 = 0x91;

/// Device-side fault.
pub const ERROR: u8 = 0x92;

/// Outcome of one request/response exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// The device accepted the command.
    Acked,
    /// NACK, or a byte that is not a known reply.
    Rejected(u8),
    /// The device reported an internal fault.
    DeviceError,
    /// Nothing arrived before the timeout.
    Timeout,
    /// A READ payload failed its checksum.
    ChecksumMismatch {
        /// Checksum computed over the received payload.
        expected: u8,
        /// Checksum byte sent by the device.
        actual: u8,
    },
}

impl Ack {
    /// Classify a reply byte. Unknown bytes count as rejection.
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            ACK => Self::Acked,
            ERROR => Self::DeviceError,
            other => Self::Rejected(other),
        }
    }

    /// Whether the exchange succeeded.
    pub fn is_acked(self) -> bool {
        self == Self::Acked
    }

    /// Turn a non-`Acked` outcome into the matching error.
    pub fn into_result(self, command: Command, address: Option<u32>) -> Result<()> {
        match self {
            Self::Acked => Ok(()),
            Self::Rejected(reply) => Err(Error::Rejected {
                command,
                address,
                reply,
            }),
            Self::DeviceError => Err(Error::DeviceError { command, address }),
            Self::Timeout => Err(Error::Timeout { command, address }),
            Self::ChecksumMismatch { expected, actual } => Err(Error::ChecksumMismatch {
                address: address.unwrap_or_default(),
                expected,
                actual,
            }),
        }
    }
}

/// Wait up to `timeout` for the status byte.
///
/// Only transport failures are errors; every protocol outcome is an [`Ack`].
pub fn decode_ack<P: Port + ?Sized>(port: &mut P, timeout: Duration) -> Result<Ack> {
    let ack = match port.read_byte(timeout)? {
        Some(byte) => {
            trace!("Reply 0x{byte:02X}");
            Ack::from_byte(byte)
        },
        None => Ack::Timeout,
    };
    Ok(ack)
}

/// Receive `buf.len()` payload bytes and the trailing checksum.
///
/// Called after the status byte was `Acked`. Returns `Acked` only when the
/// full payload arrived and its checksum matches.
pub fn decode_payload<P: Port + ?Sized>(
    port: &mut P,
    buf: &mut [u8],
    timeout: Duration,
) -> Result<Ack> {
    let received = port.read_exact_timeout(buf, timeout)?;
    if received < buf.len() {
        trace!("Payload cut short: {received}/{} bytes", buf.len());
        return Ok(Ack::Timeout);
    }

    let Some(actual) = port.read_byte(timeout)? else {
        trace!("Payload checksum missing");
        return Ok(Ack::Timeout);
    };

    let expected = crc8(buf);
    if expected == actual {
        Ok(Ack::Acked)
    } else {
        Ok(Ack::ChecksumMismatch { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::sim::ScriptedPort;

    const T: Duration = Duration::from_millis(100);

    #[test]
    fn test_from_byte() {
        assert_eq!(Ack::from_byte(ACK), Ack::Acked);
        assert_eq!(Ack::from_byte(NACK), Ack::Rejected(NACK));
        assert_eq!(Ack::from_byte(ERROR), Ack::DeviceError);
        assert_eq!(Ack::from_byte(0x79), Ack::Rejected(0x79));
        assert!(!Ack::from_byte(0x00).is_acked());
    }

    #[test]
    fn test_decode_ack_outcomes() {
        let mut port = ScriptedPort::new(&[ACK, NACK, ERROR, 0x42]);
        assert_eq!(decode_ack(&mut port, T).unwrap(), Ack::Acked);
        assert_eq!(decode_ack(&mut port, T).unwrap(), Ack::Rejected(NACK));
        assert_eq!(decode_ack(&mut port, T).unwrap(), Ack::DeviceError);
        assert_eq!(decode_ack(&mut port, T).unwrap(), Ack::Rejected(0x42));
        assert_eq!(decode_ack(&mut port, T).unwrap(), Ack::Timeout);
        // Decoding only listens.
        assert!(port.tx.is_empty());
    }

    #[test]
    fn test_decode_ack_applies_timeout() {
        let mut port = ScriptedPort::new(&[ACK]);
        decode_ack(&mut port, Duration::from_secs(3)).unwrap();
        assert_eq!(port.timeout(), Duration::from_secs(3));
    }

    #[test]
    fn test_decode_payload_valid() {
        let payload = [0xDE, 0xAD, 0xBE, 0xEF];
        let mut reply = payload.to_vec();
        reply.push(crc8(&payload));
        let mut port = ScriptedPort::new(&reply);

        let mut buf = [0u8; 4];
        assert_eq!(decode_payload(&mut port, &mut buf, T).unwrap(), Ack::Acked);
        assert_eq!(buf, payload);
    }

    #[test]
    fn test_decode_payload_checksum_mismatch() {
        let payload = [1, 2, 3];
        let good = crc8(&payload);
        let mut reply = payload.to_vec();
        reply.push(good ^ 0xFF);
        let mut port = ScriptedPort::new(&reply);

        let mut buf = [0u8; 3];
        assert_eq!(
            decode_payload(&mut port, &mut buf, T).unwrap(),
            Ack::ChecksumMismatch {
                expected: good,
                actual: good ^ 0xFF
            }
        );
    }

    #[test]
    fn test_decode_payload_short() {
        let mut port = ScriptedPort::new(&[1, 2]);
        let mut buf = [0u8; 3];
        assert_eq!(decode_payload(&mut port, &mut buf, T).unwrap(), Ack::Timeout);

        let mut port = ScriptedPort::new(&[1, 2, 3]);
        assert_eq!(decode_payload(&mut port, &mut buf, T).unwrap(), Ack::Timeout);
    }

    #[test]
    fn test_into_result() {
        assert!(Ack::Acked.into_result(Command::Jump, None).is_ok());
        assert!(matches!(
            Ack::Timeout.into_result(Command::Read, Some(0x0800_8000)),
            Err(Error::Timeout {
                command: Command::Read,
                address: Some(0x0800_8000)
            })
        ));
        assert!(matches!(
            Ack::ChecksumMismatch {
                expected: 1,
                actual: 2
            }
            .into_result(Command::Read, Some(0x10)),
            Err(Error::ChecksumMismatch { address: 0x10, .. })
        ));
    }
}
