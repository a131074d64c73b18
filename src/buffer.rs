//! Byte buffer and file region payloads carried by [Message](crate::message::Message)

use bytes::{Buf, Bytes, BytesMut};
use parking_lot::Mutex;
use std::fmt;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use crate::error::{Error, Result};

/// A read cursor over immutable bytes with a single mark.
///
/// The pipeline marks a buffer when it is scheduled for writing, the processor advances it
/// as bytes reach the transport, and resets it before `message_sent` fires so that handlers
/// observe the whole payload.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct IoBuffer {
    inner: Bytes,
    position: usize,
    mark: Option<usize>,
}

impl IoBuffer {
    /// Creates a new IoBuffer positioned at the start of `bytes`
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            inner: bytes.into(),
            position: 0,
            mark: None,
        }
    }

    /// Copies `data` into a new IoBuffer
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self::new(Bytes::copy_from_slice(data))
    }

    /// Returns the current read position
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the total number of bytes, read or not
    pub fn limit(&self) -> usize {
        self.inner.len()
    }

    /// Remembers the current position
    pub fn mark(&mut self) -> &mut Self {
        self.mark = Some(self.position);
        self
    }

    /// Returns the marked position, if any
    pub fn marked(&self) -> Option<usize> {
        self.mark
    }

    /// Moves the position back to the mark
    pub fn reset(&mut self) -> Result<&mut Self> {
        if self.reset_to_mark() {
            Ok(self)
        } else {
            Err(Error::invalid_argument("reset() without mark()"))
        }
    }

    /// Moves the position back to the mark if one is set; returns whether it moved
    pub fn reset_to_mark(&mut self) -> bool {
        match self.mark {
            Some(mark) => {
                self.position = mark;
                true
            }
            None => false,
        }
    }

    /// Rewinds to the beginning and discards the mark
    pub fn rewind(&mut self) -> &mut Self {
        self.position = 0;
        self.mark = None;
        self
    }

    /// Creates a buffer sharing the same bytes with an independent position and mark
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Returns the unread bytes without consuming them
    pub fn as_slice(&self) -> &[u8] {
        &self.inner[self.position..]
    }

    /// Returns the unread bytes as a cheap shared handle
    pub fn to_bytes(&self) -> Bytes {
        self.inner.slice(self.position..)
    }
}

impl Buf for IoBuffer {
    fn remaining(&self) -> usize {
        self.inner.len() - self.position
    }

    fn chunk(&self) -> &[u8] {
        self.as_slice()
    }

    fn advance(&mut self, cnt: usize) {
        assert!(
            cnt <= self.remaining(),
            "cannot advance past the end of IoBuffer: {} > {}",
            cnt,
            self.remaining()
        );
        self.position += cnt;
    }
}

impl fmt::Debug for IoBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoBuffer")
            .field("pos", &self.position)
            .field("lim", &self.inner.len())
            .field("mark", &self.mark)
            .finish()
    }
}

impl From<Bytes> for IoBuffer {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<BytesMut> for IoBuffer {
    fn from(bytes: BytesMut) -> Self {
        Self::new(bytes.freeze())
    }
}

impl From<Vec<u8>> for IoBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static [u8]> for IoBuffer {
    fn from(bytes: &'static [u8]) -> Self {
        Self::new(bytes)
    }
}

impl From<&'static str> for IoBuffer {
    fn from(s: &'static str) -> Self {
        Self::new(s.as_bytes())
    }
}

/// A region of a file to be transferred to a transport
#[derive(Clone)]
pub struct FileRegion {
    file: Arc<Mutex<File>>,
    position: u64,
    remaining: u64,
    written: u64,
}

impl FileRegion {
    /// Creates a region of `count` bytes starting at `position`
    pub fn new(file: File, position: u64, count: u64) -> Self {
        Self {
            file: Arc::new(Mutex::new(file)),
            position,
            remaining: count,
            written: 0,
        }
    }

    /// Creates a region covering the whole file
    pub fn whole(file: File) -> Result<Self> {
        let len = file.metadata()?.len();
        Ok(Self::new(file, 0, len))
    }

    /// Returns the file offset of the next byte to transfer
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the number of bytes left to transfer
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Returns the number of bytes transferred so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Records that `amount` bytes were transferred
    pub fn update(&mut self, amount: u64) {
        let amount = amount.min(self.remaining);
        self.position += amount;
        self.remaining -= amount;
        self.written += amount;
    }

    /// Reads the next chunk of the region into `buf` without consuming it
    pub fn read_chunk(&self, buf: &mut [u8]) -> Result<usize> {
        let len = buf.len().min(self.remaining as usize);
        if len == 0 {
            return Ok(0);
        }
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(self.position))?;
        let n = file.read(&mut buf[..len])?;
        Ok(n)
    }
}

impl fmt::Debug for FileRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileRegion")
            .field("position", &self.position)
            .field("remaining", &self.remaining)
            .field("written", &self.written)
            .finish()
    }
}
