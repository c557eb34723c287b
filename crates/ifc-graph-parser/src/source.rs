// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Byte sources backing a loaded model
//!
//! The store keeps the source alive so deferred attribute parsing can re-read
//! the raw bytes of a statement by absolute offset.

use ifc_graph_model::{ParseError, Result};
use memmap2::Mmap;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Random-access byte source
pub enum ByteSource {
    /// Whole file held in memory
    Memory(Arc<[u8]>),
    /// Memory-mapped file
    Mapped(Mmap),
    /// File on disk, read range by range
    File {
        path: PathBuf,
        file: Mutex<BufReader<File>>,
        len: u64,
    },
}

impl ByteSource {
    /// Source over an in-memory buffer
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        ByteSource::Memory(bytes.into())
    }

    /// Buffered file source; nothing beyond the current range is kept in
    /// memory
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(ByteSource::File {
            path: path.to_path_buf(),
            file: Mutex::new(BufReader::new(file)),
            len,
        })
    }

    /// Memory-mapped file source
    pub fn map_path(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        // SAFETY: the mapping is read-only; concurrent truncation of the file
        // by another process is outside what this library can guard against
        let map = unsafe { Mmap::map(&file)? };
        Ok(ByteSource::Mapped(map))
    }

    /// Total length in bytes
    pub fn len(&self) -> u64 {
        match self {
            ByteSource::Memory(bytes) => bytes.len() as u64,
            ByteSource::Mapped(map) => map.len() as u64,
            ByteSource::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes in `start..end`
    ///
    /// Borrowed for in-memory and mapped sources, read from disk otherwise.
    pub fn read_range(&self, start: u64, end: u64) -> Result<Cow<'_, [u8]>> {
        if start > end || end > self.len() {
            return Err(ParseError::format(format!(
                "byte range {start}..{end} outside of source of length {}",
                self.len()
            )));
        }
        match self {
            ByteSource::Memory(bytes) => Ok(Cow::Borrowed(&bytes[start as usize..end as usize])),
            ByteSource::Mapped(map) => Ok(Cow::Borrowed(&map[start as usize..end as usize])),
            ByteSource::File { file, .. } => {
                let mut file = file.lock();
                file.seek(SeekFrom::Start(start))?;
                let mut buf = vec![0; (end - start) as usize];
                file.read_exact(&mut buf)?;
                Ok(Cow::Owned(buf))
            }
        }
    }

    /// Sequential reader over the whole source
    ///
    /// File sources open a second handle so streaming does not disturb
    /// range reads.
    pub fn stream(&self) -> Result<Box<dyn BufRead + '_>> {
        Ok(match self {
            ByteSource::Memory(bytes) => Box::new(&bytes[..]),
            ByteSource::Mapped(map) => Box::new(&map[..]),
            ByteSource::File { path, .. } => Box::new(BufReader::with_capacity(
                64 * 1024,
                File::open(path)?,
            )),
        })
    }

    /// Short description for log messages
    pub fn kind(&self) -> &'static str {
        match self {
            ByteSource::Memory(_) => "memory",
            ByteSource::Mapped(_) => "mapped",
            ByteSource::File { .. } => "file",
        }
    }
}

impl std::fmt::Debug for ByteSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteSource")
            .field("kind", &self.kind())
            .field("len", &self.len())
            .finish()
    }
}
