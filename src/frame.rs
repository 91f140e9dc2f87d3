use crate::{Error, Result};
use std::fmt;
use std::ops::Deref;

/// One complete reply, terminator included, as it arrived on the notify characteristic.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame(Vec<u8>);

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl Deref for Frame {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<u8>> for Frame {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X?}", self.0)
    }
}

/// Collects notification chunks until the buffer ends with the terminator byte.
///
/// A device that never sends the terminator would otherwise grow the buffer
/// forever, so the buffer is capped. Exceeding the cap discards everything
/// collected so far and reports [`Error::FrameOverflow`].
#[derive(Debug)]
pub struct Reassembler {
    buffer: Vec<u8>,
    terminator: u8,
    capacity: usize,
}

impl Reassembler {
    pub const DEFAULT_CAPACITY: usize = 512;

    pub fn new(terminator: u8) -> Self {
        Self::with_capacity(terminator, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(terminator: u8, capacity: usize) -> Self {
        Self {
            buffer: Vec::new(),
            terminator,
            capacity,
        }
    }

    /// Appends `chunk` and returns the frame once it is complete.
    ///
    /// The returned frame is taken out of the buffer in the same step, so the
    /// next chunk always starts a new frame.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Option<Frame>> {
        if chunk.is_empty() {
            return Ok(None);
        }
        let len = self.buffer.len() + chunk.len();
        if len > self.capacity {
            log::warn!(
                "Discarding {} buffered bytes - frame exceeds {} bytes",
                self.buffer.len(),
                self.capacity
            );
            self.buffer.clear();
            return Err(Error::FrameOverflow {
                len,
                capacity: self.capacity,
            });
        }
        self.buffer.extend_from_slice(chunk);
        if self.buffer.last() == Some(&self.terminator) {
            let frame = Frame(std::mem::take(&mut self.buffer));
            log::trace!("frame complete: {frame:?}");
            Ok(Some(frame))
        } else {
            log::trace!("buffered {} bytes", self.buffer.len());
            Ok(None)
        }
    }

    /// Number of bytes collected for the frame in progress.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }
}
