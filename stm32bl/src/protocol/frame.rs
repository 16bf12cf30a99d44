//! Bootloader command frames.
//!
//! Every command except CONNECT travels in the same envelope:
//!
//! ```text
//! +------+--------+---------------------------------------+-------+
//! | Sync | Length |                 Body                  | CRC8  |
//! +------+--------+---------------------------------------+-------+
//! | '$'  | 1 byte | command + command-specific fields     | 1     |
//! +------+--------+---------------------------------------+-------+
//! ```
//!
//! `Length` counts the body including the trailing CRC8, which covers every
//! body byte before it. The block commands come in two layouts:
//!
//! ```text
//! word-aligned:  cmd | n | 0x00 | 0x00 | addr (4, BE) | payload (n) | crc
//! compact:       cmd | addr (4, BE) | n | payload (n) | crc
//! ```
//!
//! READ uses the same header without a payload. ERASE, RESET, JUMP and
//! GET_VERSION are a lone command byte followed by its CRC. FAST_READ
//! (compact only) carries a 4-byte big-endian size instead of `n`.

use crate::error::{Error, Result};
use crate::protocol::crc::crc8;
use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use std::fmt;

/// Frame start marker.
pub const SYNC: u8 = b'$';

/// Largest value the length byte can hold.
const MAX_BODY_LEN: usize = u8::MAX as usize;

/// Bootloader command identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Program a block of flash (0x50).
    Write,
    /// Read back a block of flash (0x51).
    Read,
    /// Erase the application area (0x52).
    Erase,
    /// Reset the microcontroller (0x53).
    Reset,
    /// Jump to the user application (0x54).
    Jump,
    /// Compare a block against flash contents (0x55).
    Verify,
    /// Stream a whole range in one request (0x56, compact layout).
    FastRead,
    /// Query the bootloader version (0x56, word-aligned layout).
    GetVersion,
    /// Auto-baud connect byte (0x7F), sent bare.
    Connect,
    /// Host-side help (0x40), never sent.
    Help,
}

impl Command {
    /// Wire value of the command byte.
    pub const fn code(self) -> u8 {
        match self {
            Self::Write => 0x50,
            Self::Read => 0x51,
            Self::Erase => 0x52,
            Self::Reset => 0x53,
            Self::Jump => 0x54,
            Self::Verify => 0x55,
            Self::FastRead | Self::GetVersion => 0x56,
            Self::Connect => 0x7F,
            Self::Help => 0x40,
        }
    }

    /// Look up a command byte. 0x56 depends on the layout.
    pub fn from_code(code: u8, layout: FrameLayout) -> Option<Self> {
        match code {
            0x50 => Some(Self::Write),
            0x51 => Some(Self::Read),
            0x52 => Some(Self::Erase),
            0x53 => Some(Self::Reset),
            0x54 => Some(Self::Jump),
            0x55 => Some(Self::Verify),
            0x56 => Some(match layout {
                FrameLayout::WordAligned => Self::GetVersion,
                FrameLayout::Compact => Self::FastRead,
            }),
            0x7F => Some(Self::Connect),
            0x40 => Some(Self::Help),
            _ => None,
        }
    }

    /// Whether the command only exists on the host.
    pub const fn is_host_only(self) -> bool {
        matches!(self, Self::Help)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Write => "WRITE",
            Self::Read => "READ",
            Self::Erase => "ERASE",
            Self::Reset => "RESET",
            Self::Jump => "JUMP",
            Self::Verify => "VERIFY",
            Self::FastRead => "FAST_READ",
            Self::GetVersion => "GET_VERSION",
            Self::Connect => "CONNECT",
            Self::Help => "HELP",
        };
        f.write_str(name)
    }
}

/// Arrangement of the block command header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum FrameLayout {
    /// Size byte and two padding bytes before the address.
    #[default]
    WordAligned,
    /// Address first, then the size byte; no padding.
    Compact,
}

impl FrameLayout {
    /// Body bytes preceding the payload of a block command.
    pub const fn block_header_len(self) -> usize {
        match self {
            Self::WordAligned => 8,
            Self::Compact => 6,
        }
    }

    /// Largest payload a single block frame can carry.
    pub const fn max_payload(self) -> usize {
        MAX_BODY_LEN - self.block_header_len() - 1
    }

    /// Block size used by the bootloaders speaking this layout.
    pub const fn default_block_size(self) -> usize {
        match self {
            Self::WordAligned => 240,
            Self::Compact => 248,
        }
    }

    /// Whether `command` can be framed in this layout.
    pub const fn supports(self, command: Command) -> bool {
        match command {
            Command::FastRead => matches!(self, Self::Compact),
            Command::GetVersion => matches!(self, Self::WordAligned),
            Command::Connect | Command::Help => false,
            _ => true,
        }
    }

    /// Parse a layout name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "word-aligned" | "aligned" | "padded" => Some(Self::WordAligned),
            "compact" | "packed" => Some(Self::Compact),
            _ => None,
        }
    }
}

impl fmt::Display for FrameLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WordAligned => write!(f, "word-aligned"),
            Self::Compact => write!(f, "compact"),
        }
    }
}

/// A command frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    command: Command,
    address: u32,
    size: u32,
    payload: Vec<u8>,
}

impl Frame {
    fn new(command: Command, address: u32, size: u32, payload: Vec<u8>) -> Self {
        Self {
            command,
            address,
            size,
            payload,
        }
    }

    /// WRITE `payload` at `address`.
    pub fn write(address: u32, payload: &[u8]) -> Self {
        Self::new(Command::Write, address, payload.len() as u32, payload.to_vec())
    }

    /// VERIFY `payload` against flash at `address`.
    pub fn verify(address: u32, payload: &[u8]) -> Self {
        Self::new(Command::Verify, address, payload.len() as u32, payload.to_vec())
    }

    /// READ `len` bytes from `address`.
    pub fn read(address: u32, len: u8) -> Self {
        Self::new(Command::Read, address, u32::from(len), Vec::new())
    }

    /// FAST_READ `len` bytes from `address` in a single request.
    pub fn fast_read(address: u32, len: u32) -> Self {
        Self::new(Command::FastRead, address, len, Vec::new())
    }

    /// A command with no fields (ERASE, RESET, JUMP, GET_VERSION).
    pub fn control(command: Command) -> Self {
        Self::new(command, 0, 0, Vec::new())
    }

    /// Command carried by this frame.
    pub fn command(&self) -> Command {
        self.command
    }

    /// Target address (zero for control frames).
    pub fn address(&self) -> u32 {
        self.address
    }

    /// Declared or requested size.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Outbound payload.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Build the body including its trailing checksum.
    pub fn body(&self, layout: FrameLayout) -> Result<Vec<u8>> {
        let command = self.command;
        if command.is_host_only() || command == Command::Connect {
            return Err(Error::Protocol(format!("{command} is never sent as a frame")));
        }
        if !layout.supports(command) {
            return Err(Error::Unsupported(format!(
                "{command} is not available in the {layout} layout"
            )));
        }

        let mut body = Vec::with_capacity(layout.block_header_len() + self.payload.len() + 1);
        body.push(command.code());

        match command {
            Command::Write | Command::Verify | Command::Read => {
                if self.payload.len() > layout.max_payload() {
                    return Err(Error::Protocol(format!(
                        "{command} payload of {} bytes exceeds the {} byte limit",
                        self.payload.len(),
                        layout.max_payload()
                    )));
                }
                let n = u8::try_from(self.size).map_err(|_| {
                    Error::Protocol(format!("{command} size {} does not fit one byte", self.size))
                })?;
                match layout {
                    FrameLayout::WordAligned => {
                        body.push(n);
                        body.extend_from_slice(&[0x00, 0x00]);
                        body.write_u32::<BigEndian>(self.address)?;
                    },
                    FrameLayout::Compact => {
                        body.write_u32::<BigEndian>(self.address)?;
                        body.push(n);
                    },
                }
                body.extend_from_slice(&self.payload);
            },
            Command::FastRead => {
                body.write_u32::<BigEndian>(self.address)?;
                body.write_u32::<BigEndian>(self.size)?;
            },
            _ => {},
        }

        body.push(crc8(&body));
        Ok(body)
    }

    /// Encode the complete frame: sync, length and body.
    pub fn encode(&self, layout: FrameLayout) -> Result<Vec<u8>> {
        let body = self.body(layout)?;
        let len = u8::try_from(body.len())
            .map_err(|_| Error::Protocol(format!("frame body of {} bytes", body.len())))?;

        let mut frame = Vec::with_capacity(body.len() + 2);
        frame.push(SYNC);
        frame.push(len);
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Parse and validate a complete frame.
    pub fn decode(bytes: &[u8], layout: FrameLayout) -> Result<Self> {
        let [sync, len, body @ ..] = bytes else {
            return Err(Error::Protocol(format!("frame of {} bytes", bytes.len())));
        };
        if *sync != SYNC {
            return Err(Error::Protocol(format!("bad sync byte 0x{sync:02X}")));
        }
        if body.len() != usize::from(*len) {
            return Err(Error::Protocol(format!(
                "length byte says {len}, body has {} bytes",
                body.len()
            )));
        }
        let Some((&crc, content)) = body.split_last() else {
            return Err(Error::Protocol("empty frame body".into()));
        };
        let Some(&code) = content.first() else {
            return Err(Error::Protocol("frame body has no command byte".into()));
        };
        let expected = crc8(content);
        if crc != expected {
            return Err(Error::Protocol(format!(
                "frame checksum 0x{crc:02X}, computed 0x{expected:02X}"
            )));
        }

        let command = Command::from_code(code, layout)
            .ok_or_else(|| Error::Protocol(format!("unknown command 0x{code:02X}")))?;

        let shape_error = || {
            Error::Protocol(format!(
                "{command} frame with a {} byte body",
                content.len() + 1
            ))
        };

        match command {
            Command::Write | Command::Verify | Command::Read => {
                let header = layout.block_header_len();
                if content.len() < header {
                    return Err(shape_error());
                }
                let (n, address) = match layout {
                    FrameLayout::WordAligned => {
                        if content[2..4] != [0, 0] {
                            return Err(Error::Protocol(format!(
                                "{command} frame with padding {:02X?}",
                                &content[2..4]
                            )));
                        }
                        (content[1], BigEndian::read_u32(&content[4..8]))
                    },
                    FrameLayout::Compact => (content[5], BigEndian::read_u32(&content[1..5])),
                };
                let payload = &content[header..];
                let expected_payload = if command == Command::Read {
                    0
                } else {
                    usize::from(n)
                };
                if payload.len() != expected_payload {
                    return Err(shape_error());
                }
                Ok(Self::new(command, address, u32::from(n), payload.to_vec()))
            },
            Command::FastRead => {
                if content.len() != 9 {
                    return Err(shape_error());
                }
                Ok(Self::fast_read(
                    BigEndian::read_u32(&content[1..5]),
                    BigEndian::read_u32(&content[5..9]),
                ))
            },
            Command::Erase | Command::Reset | Command::Jump | Command::GetVersion => {
                if content.len() != 1 {
                    return Err(shape_error());
                }
                Ok(Self::control(command))
            },
            Command::Connect | Command::Help => Err(Error::Protocol(format!(
                "{command} is never sent as a frame"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const APP: u32 = 0x0800_8000;

    #[test]
    fn test_command_codes() {
        assert_eq!(Command::Write.code(), 0x50);
        assert_eq!(Command::Verify.code(), 0x55);
        assert_eq!(Command::Connect.code(), 0x7F);
        assert_eq!(
            Command::from_code(0x56, FrameLayout::Compact),
            Some(Command::FastRead)
        );
        assert_eq!(
            Command::from_code(0x56, FrameLayout::WordAligned),
            Some(Command::GetVersion)
        );
        assert_eq!(Command::from_code(0x99, FrameLayout::Compact), None);
    }

    #[test]
    fn test_word_aligned_write_bytes() {
        let data = Frame::write(APP, &[0xAA, 0xBB, 0xCC])
            .encode(FrameLayout::WordAligned)
            .unwrap();
        let body = [0x50, 3, 0x00, 0x00, 0x08, 0x00, 0x80, 0x00, 0xAA, 0xBB, 0xCC];
        assert_eq!(data[0], SYNC);
        assert_eq!(data[1], 12);
        assert_eq!(&data[2..13], &body);
        assert_eq!(data[13], crc8(&body));
        assert_eq!(data.len(), 14);
    }

    #[test]
    fn test_compact_write_bytes() {
        let data = Frame::write(APP, &[0x01, 0x02])
            .encode(FrameLayout::Compact)
            .unwrap();
        assert_eq!(data[1], 9);
        assert_eq!(&data[2..10], &[0x50, 0x08, 0x00, 0x80, 0x00, 2, 0x01, 0x02]);
    }

    #[test]
    fn test_read_frame_length() {
        let aligned = Frame::read(APP, 240)
            .encode(FrameLayout::WordAligned)
            .unwrap();
        assert_eq!(aligned[1], 9);
        assert_eq!(aligned.len(), 11);
        assert_eq!(&aligned[2..6], &[0x51, 240, 0x00, 0x00]);

        let compact = Frame::read(APP, 248).encode(FrameLayout::Compact).unwrap();
        assert_eq!(compact[1], 7);
        assert_eq!(compact[7], 248);
    }

    #[test]
    fn test_control_frame() {
        for command in [Command::Erase, Command::Reset, Command::Jump] {
            let data = Frame::control(command)
                .encode(FrameLayout::WordAligned)
                .unwrap();
            assert_eq!(data, vec![SYNC, 2, command.code(), crc8(&[command.code()])]);
        }
    }

    #[test]
    fn test_fast_read_frame() {
        let data = Frame::fast_read(APP, 480_000)
            .encode(FrameLayout::Compact)
            .unwrap();
        assert_eq!(data[1], 10);
        assert_eq!(&data[3..7], &[0x08, 0x00, 0x80, 0x00]);
        assert_eq!(&data[7..11], &480_000u32.to_be_bytes());
    }

    #[test]
    fn test_layout_restrictions() {
        assert!(matches!(
            Frame::fast_read(APP, 16).encode(FrameLayout::WordAligned),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            Frame::control(Command::GetVersion).encode(FrameLayout::Compact),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            Frame::control(Command::Help).encode(FrameLayout::WordAligned),
            Err(Error::Protocol(_))
        ));
        assert!(matches!(
            Frame::control(Command::Connect).encode(FrameLayout::Compact),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let payload = vec![0u8; FrameLayout::WordAligned.max_payload() + 1];
        assert!(matches!(
            Frame::write(APP, &payload).encode(FrameLayout::WordAligned),
            Err(Error::Protocol(_))
        ));
        assert_eq!(FrameLayout::WordAligned.max_payload(), 246);
        assert_eq!(FrameLayout::Compact.max_payload(), 248);
    }

    #[test]
    fn test_round_trip_all_kinds() {
        for layout in [FrameLayout::WordAligned, FrameLayout::Compact] {
            let max = layout.default_block_size();
            let mut frames = vec![
                Frame::control(Command::Erase),
                Frame::control(Command::Reset),
                Frame::control(Command::Jump),
            ];
            for n in [0, 1, max] {
                let payload: Vec<u8> = (0..n).map(|i| i as u8).collect();
                frames.push(Frame::write(APP + n as u32, &payload));
                frames.push(Frame::verify(APP, &payload));
                frames.push(Frame::read(APP, n as u8));
            }
            match layout {
                FrameLayout::WordAligned => frames.push(Frame::control(Command::GetVersion)),
                FrameLayout::Compact => frames.push(Frame::fast_read(APP, 0x0007_5300)),
            }

            for frame in frames {
                let bytes = frame.encode(layout).unwrap();
                let decoded = Frame::decode(&bytes, layout).unwrap();
                assert_eq!(decoded, frame, "{layout} {}", frame.command());
            }
        }
    }

    #[test]
    fn test_decode_rejects_corruption() {
        let layout = FrameLayout::WordAligned;
        let good = Frame::write(APP, &[1, 2, 3, 4]).encode(layout).unwrap();

        let mut bad_sync = good.clone();
        bad_sync[0] = 0x00;
        assert!(Frame::decode(&bad_sync, layout).is_err());

        let mut bad_len = good.clone();
        bad_len[1] += 1;
        assert!(Frame::decode(&bad_len, layout).is_err());

        let mut bad_crc = good.clone();
        let last = bad_crc.len() - 1;
        bad_crc[last] ^= 0x01;
        assert!(Frame::decode(&bad_crc, layout).is_err());

        let mut bad_payload = good;
        bad_payload[10] ^= 0x80;
        assert!(Frame::decode(&bad_payload, layout).is_err());

        assert!(Frame::decode(&[SYNC], layout).is_err());
    }

    #[test]
    fn test_decode_rejects_size_mismatch() {
        // WRITE declaring 4 bytes but carrying 3, checksum otherwise valid.
        let mut body = vec![0x50, 4, 0, 0, 0x08, 0x00, 0x80, 0x00, 1, 2, 3];
        body.push(crc8(&body));
        let mut frame = vec![SYNC, body.len() as u8];
        frame.extend_from_slice(&body);
        assert!(matches!(
            Frame::decode(&frame, FrameLayout::WordAligned),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_decode_rejects_nonzero_padding() {
        let mut body = vec![0x51, 0x10, 0xAB, 0xCD, 0x08, 0x00, 0x80, 0x00];
        body.push(crc8(&body));
        let mut frame = vec![SYNC, body.len() as u8];
        frame.extend_from_slice(&body);
        assert!(matches!(
            Frame::decode(&frame, FrameLayout::WordAligned),
            Err(Error::Protocol(_))
        ));

        // The same READ with zero padding is accepted and re-encodes identically.
        body[2] = 0;
        body[3] = 0;
        body[8] = crc8(&body[..8]);
        let mut frame = vec![SYNC, body.len() as u8];
        frame.extend_from_slice(&body);
        let decoded = Frame::decode(&frame, FrameLayout::WordAligned).unwrap();
        assert_eq!(decoded.command(), Command::Read);
        assert_eq!(decoded.address(), APP);
        assert_eq!(decoded.encode(FrameLayout::WordAligned).unwrap(), frame);
    }

    #[test]
    fn test_layout_from_name() {
        assert_eq!(
            FrameLayout::from_name("word-aligned"),
            Some(FrameLayout::WordAligned)
        );
        assert_eq!(FrameLayout::from_name("COMPACT"), Some(FrameLayout::Compact));
        assert_eq!(FrameLayout::from_name("fancy"), None);
        assert_eq!(FrameLayout::Compact.to_string(), "compact");
    }
}
