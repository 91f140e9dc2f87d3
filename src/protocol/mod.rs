//! Command encoding and reply decoding for the supported BMS vendors.
//!
//! Every reply layout is described as a table of [`Field`]s. A field knows its
//! offset, width, byte order and signedness, so decoding a value and checking
//! that the frame is long enough happen in one place.

pub mod jbd;
pub mod power_queen;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ByteOrder {
    Big,
    /// Stored reversed: the bytes are flipped before the big-endian read.
    Little,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Field {
    offset: usize,
    len: usize,
    order: ByteOrder,
    signed: bool,
}

fn accumulate(acc: u64, byte: &u8) -> u64 {
    (acc << 8) | u64::from(*byte)
}

impl Field {
    pub(crate) const fn be(offset: usize, len: usize) -> Self {
        Self {
            offset,
            len,
            order: ByteOrder::Big,
            signed: false,
        }
    }

    pub(crate) const fn be_signed(offset: usize, len: usize) -> Self {
        Self {
            offset,
            len,
            order: ByteOrder::Big,
            signed: true,
        }
    }

    pub(crate) const fn le(offset: usize, len: usize) -> Self {
        Self {
            offset,
            len,
            order: ByteOrder::Little,
            signed: false,
        }
    }

    pub(crate) const fn le_signed(offset: usize, len: usize) -> Self {
        Self {
            offset,
            len,
            order: ByteOrder::Little,
            signed: true,
        }
    }

    /// First offset after the field.
    pub(crate) const fn end(&self) -> usize {
        self.offset + self.len
    }

    pub(crate) fn read(&self, buffer: &[u8]) -> Result<i64> {
        let bytes = buffer.get(self.offset..self.end()).ok_or_else(|| {
            log::warn!(
                "Field at {}..{} outside of {} byte frame",
                self.offset,
                self.end(),
                buffer.len()
            );
            Error::MalformedFrame {
                expected: self.end(),
                received: buffer.len(),
            }
        })?;
        let raw = match self.order {
            ByteOrder::Big => bytes.iter().fold(0, accumulate),
            ByteOrder::Little => bytes.iter().rev().fold(0, accumulate),
        };
        if self.signed {
            let shift = 64 - 8 * self.len as u32;
            Ok(((raw << shift) as i64) >> shift)
        } else {
            Ok(raw as i64)
        }
    }

    pub(crate) fn read_scaled(&self, buffer: &[u8], divisor: f32) -> Result<f32> {
        Ok(self.read(buffer)? as f32 / divisor)
    }
}

pub(crate) fn validate_len(buffer: &[u8], reply_size: usize) -> Result<()> {
    if buffer.len() < reply_size {
        log::warn!(
            "Invalid buffer size - required={} received={}",
            reply_size,
            buffer.len()
        );
        return Err(Error::MalformedFrame {
            expected: reply_size,
            received: buffer.len(),
        });
    }
    Ok(())
}
