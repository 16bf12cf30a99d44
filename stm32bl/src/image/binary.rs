//! Raw binary firmware images.
//!
//! The bootloader takes a flat image: byte `i` of the file lands at
//! `address + i`. There is no header, so loading is a size query plus a
//! sequential read.

use crate::error::{Error, Result};
use log::debug;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// A flat firmware image held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    data: Vec<u8>,
    path: Option<PathBuf>,
}

impl FirmwareImage {
    /// Load an image from a file.
    ///
    /// Any failure to open, size or read the file is reported as
    /// [`Error::SourceUnavailable`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading image from: {}", path.display());

        let unavailable = |source| Error::SourceUnavailable {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(unavailable)?;
        let size = file.metadata().map_err(unavailable)?.len();
        let mut reader = BufReader::new(file);

        let mut data = Vec::with_capacity(usize::try_from(size).unwrap_or_default());
        reader.read_to_end(&mut data).map_err(unavailable)?;
        debug!("Loaded {} bytes", data.len());

        Ok(Self {
            data,
            path: Some(path.to_path_buf()),
        })
    }

    /// Wrap bytes already in memory.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, path: None }
    }

    /// Image size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the image has no bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Image contents.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// File the image was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Write captured flash contents to `path`, replacing any existing file.
pub fn save_capture<P: AsRef<Path>>(path: P, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(data)?;
    writer.flush()?;
    debug!("Saved {} bytes to {}", data.len(), path.display());
    Ok(())
}
