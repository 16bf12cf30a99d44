//! Chunked block transfer engine.
//!
//! WRITE, VERIFY and READ move an address range in blocks of at most
//! `block_size` bytes, one request/response round trip per block:
//!
//! ```text
//! host                                   device
//!  |  $ len WRITE addr n payload crc  -->  |
//!  |  <--                        0x90      |   advance by n
//!  |  $ len READ  addr n crc          -->  |
//!  |  <--        0x90 payload(n) crc       |   append, advance by n
//! ```
//!
//! Any reply other than ACK aborts the whole operation at the failing
//! block. The only retry is the opt-in re-request of a READ block whose
//! checksum did not match.

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::ack::{Ack, decode_ack, decode_payload};
use crate::protocol::frame::{Command, Frame, FrameLayout};
use log::{debug, trace, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// What to do when a READ block fails its checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case")
)]
pub enum MismatchPolicy {
    /// Abort the read with [`Error::ChecksumMismatch`].
    #[default]
    Abort,
    /// Request the same block again, up to `attempts` extra times.
    Retry {
        /// Extra requests after the first mismatch.
        attempts: u32,
    },
}

impl MismatchPolicy {
    /// Policy for a retry count, where zero means abort.
    pub fn from_retries(attempts: u32) -> Self {
        if attempts == 0 {
            Self::Abort
        } else {
            Self::Retry { attempts }
        }
    }

    fn extra_attempts(self) -> u32 {
        match self {
            Self::Abort => 0,
            Self::Retry { attempts } => attempts,
        }
    }
}

/// One block of a planned transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    /// Position in the transfer, from zero.
    pub index: usize,
    /// Device address of the first byte.
    pub address: u32,
    /// Offset into the image or capture buffer.
    pub offset: usize,
    /// Number of bytes.
    pub len: usize,
}

/// Split `total` bytes starting at `address` into blocks of `max_block`.
///
/// Fails if the range runs past the end of the 32-bit address space or
/// `max_block` is zero.
pub fn plan_blocks(address: u32, total: usize, max_block: usize) -> Result<Vec<Block>> {
    if max_block == 0 {
        return Err(Error::Protocol("block size must be at least 1".into()));
    }
    check_range(address, total)?;

    Ok((0..total)
        .step_by(max_block)
        .enumerate()
        .map(|(index, offset)| Block {
            index,
            address: address + offset as u32,
            offset,
            len: max_block.min(total - offset),
        })
        .collect())
}

fn check_range(address: u32, total: usize) -> Result<()> {
    let fits = u32::try_from(total)
        .ok()
        .and_then(|len| address.checked_add(len))
        .is_some();
    if fits {
        Ok(())
    } else {
        Err(Error::Protocol(format!(
            "{total} bytes from 0x{address:08X} overflow the 32-bit address space"
        )))
    }
}

/// Progress notification sent after each completed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    /// Address of the next byte to transfer.
    pub address: u32,
    /// Bytes completed.
    pub done: usize,
    /// Bytes in the whole operation.
    pub total: usize,
}

impl Progress {
    /// Bytes still to go.
    pub fn remaining(&self) -> usize {
        self.total - self.done
    }
}

/// Outcome of a finished transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferSummary {
    /// Bytes moved.
    pub bytes: usize,
    /// Block round trips completed.
    pub blocks: usize,
    /// Time from the first frame to the last reply.
    pub elapsed: Duration,
}

impl TransferSummary {
    /// Throughput in kB/s, or `None` when no time was measured.
    pub fn throughput_kbps(&self) -> Option<f64> {
        let secs = self.elapsed.as_secs_f64();
        (secs > 0.0).then(|| self.bytes as f64 / secs / 1000.0)
    }
}

/// Transfer settings.
#[derive(Debug, Clone)]
pub struct TransferConfig {
    /// Frame layout spoken by the device.
    pub layout: FrameLayout,
    /// Largest block payload.
    pub block_size: usize,
    /// Timeout for each acknowledgment or payload read.
    pub ack_timeout: Duration,
    /// READ checksum mismatch handling.
    pub mismatch: MismatchPolicy,
    /// Set from another thread to stop at the next block boundary.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        let layout = FrameLayout::default();
        Self {
            layout,
            block_size: layout.default_block_size(),
            ack_timeout: Duration::from_secs(1),
            mismatch: MismatchPolicy::default(),
            cancel: None,
        }
    }
}

/// Block transfer over a borrowed port.
pub struct BlockTransfer<'a, P: Port + ?Sized> {
    port: &'a mut P,
    config: TransferConfig,
}

impl<'a, P: Port + ?Sized> BlockTransfer<'a, P> {
    /// Create a transfer with default settings.
    pub fn new(port: &'a mut P) -> Self {
        Self::with_config(port, TransferConfig::default())
    }

    /// Create a transfer with custom settings.
    pub fn with_config(port: &'a mut P, config: TransferConfig) -> Self {
        Self { port, config }
    }

    fn check_cancelled(&self, address: u32) -> Result<()> {
        let flagged = self
            .config
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed));
        if flagged || crate::is_interrupted_requested() {
            debug!("Transfer cancelled at 0x{address:08X}");
            return Err(Error::Cancelled {
                address: Some(address),
            });
        }
        Ok(())
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        let bytes = frame.encode(self.config.layout)?;
        trace!("TX {} {:02X?}", frame.command(), bytes);
        self.port.write_all_bytes(&bytes)
    }

    fn plan(&self, address: u32, total: usize) -> Result<Vec<Block>> {
        if self.config.block_size > self.config.layout.max_payload() {
            return Err(Error::Protocol(format!(
                "block size {} exceeds the {} byte limit of the {} layout",
                self.config.block_size,
                self.config.layout.max_payload(),
                self.config.layout
            )));
        }
        plan_blocks(address, total, self.config.block_size)
    }

    /// WRITE or VERIFY `data` starting at `address`.
    pub fn send(
        &mut self,
        command: Command,
        address: u32,
        data: &[u8],
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<TransferSummary> {
        if !matches!(command, Command::Write | Command::Verify) {
            return Err(Error::Protocol(format!("{command} does not send a payload")));
        }
        let blocks = self.plan(address, data.len())?;
        debug!(
            "{command} {} bytes at 0x{address:08X} in {} blocks",
            data.len(),
            blocks.len()
        );

        let start = Instant::now();
        for block in &blocks {
            self.check_cancelled(block.address)?;

            let payload = &data[block.offset..block.offset + block.len];
            let frame = match command {
                Command::Write => Frame::write(block.address, payload),
                _ => Frame::verify(block.address, payload),
            };
            self.send_frame(&frame)?;
            decode_ack(&mut *self.port, self.config.ack_timeout)?
                .into_result(command, Some(block.address))?;

            progress(&Progress {
                address: block.address + block.len as u32,
                done: block.offset + block.len,
                total: data.len(),
            });
        }

        Ok(TransferSummary {
            bytes: data.len(),
            blocks: blocks.len(),
            elapsed: start.elapsed(),
        })
    }

    /// READ `len` bytes starting at `address`.
    pub fn receive(
        &mut self,
        address: u32,
        len: usize,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<(Vec<u8>, TransferSummary)> {
        let blocks = self.plan(address, len)?;
        debug!(
            "READ {len} bytes at 0x{address:08X} in {} blocks",
            blocks.len()
        );

        let mut data = Vec::with_capacity(len);
        let start = Instant::now();
        for block in &blocks {
            self.check_cancelled(block.address)?;
            self.receive_block(block, &mut data)?;
            progress(&Progress {
                address: block.address + block.len as u32,
                done: data.len(),
                total: len,
            });
        }

        let summary = TransferSummary {
            bytes: data.len(),
            blocks: blocks.len(),
            elapsed: start.elapsed(),
        };
        Ok((data, summary))
    }

    fn receive_block(&mut self, block: &Block, data: &mut Vec<u8>) -> Result<()> {
        let n = u8::try_from(block.len)
            .map_err(|_| Error::Protocol(format!("READ block of {} bytes", block.len)))?;
        let frame = Frame::read(block.address, n);
        let mut buf = vec![0u8; block.len];
        let extra = self.config.mismatch.extra_attempts();

        let mut attempt = 0;
        loop {
            self.send_frame(&frame)?;
            let mut ack = decode_ack(&mut *self.port, self.config.ack_timeout)?;
            if ack.is_acked() {
                ack = decode_payload(&mut *self.port, &mut buf, self.config.ack_timeout)?;
            }

            match ack {
                Ack::Acked => {
                    data.extend_from_slice(&buf);
                    return Ok(());
                },
                Ack::ChecksumMismatch { expected, actual } if attempt < extra => {
                    attempt += 1;
                    warn!(
                        "Checksum mismatch at 0x{:08X} (0x{expected:02X} != 0x{actual:02X}), \
                         requesting again ({attempt}/{extra})",
                        block.address
                    );
                    self.port.clear_buffers()?;
                },
                other => return other.into_result(Command::Read, Some(block.address)),
            }
        }
    }

    /// FAST_READ `len` bytes starting at `address` with a single request.
    ///
    /// The device streams the range without a checksum after its ACK. Bytes
    /// are collected in `block_size` chunks so progress and timeouts stay
    /// per chunk.
    pub fn fast_read(
        &mut self,
        address: u32,
        len: usize,
        progress: &mut dyn FnMut(&Progress),
    ) -> Result<(Vec<u8>, TransferSummary)> {
        let blocks = self.plan(address, len)?;
        let size = u32::try_from(len)
            .map_err(|_| Error::Protocol(format!("FAST_READ of {len} bytes")))?;
        debug!("FAST_READ {len} bytes at 0x{address:08X}");

        let start = Instant::now();
        self.check_cancelled(address)?;
        self.send_frame(&Frame::fast_read(address, size))?;
        decode_ack(&mut *self.port, self.config.ack_timeout)?
            .into_result(Command::FastRead, Some(address))?;

        let mut data = vec![0u8; len];
        for block in &blocks {
            let chunk = &mut data[block.offset..block.offset + block.len];
            let got = self.port.read_exact_timeout(chunk, self.config.ack_timeout)?;
            if got < block.len {
                return Err(Error::Timeout {
                    command: Command::FastRead,
                    address: Some(block.address + got as u32),
                });
            }
            progress(&Progress {
                address: block.address + block.len as u32,
                done: block.offset + block.len,
                total: len,
            });
        }

        let summary = TransferSummary {
            bytes: len,
            blocks: blocks.len(),
            elapsed: start.elapsed(),
        };
        Ok((data, summary))
    }
}
