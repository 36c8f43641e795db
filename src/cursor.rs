// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use byteorder::ByteOrder;

use crate::error::DecodeError;

/// Byte order of every numeric value inside the segment.
pub type SegmentEndian = byteorder::LittleEndian;

/// Fixed-width value readable from the segment in [`SegmentEndian`] order.
pub trait Fixed: Sized {
    const WIDTH: usize;
    fn from_bytes(buf: &[u8]) -> Self;
}

macro_rules! impl_fixed {
    ($($type:ty => $read:expr),*,) => {
        $(
            impl Fixed for $type {
                const WIDTH: usize = std::mem::size_of::<$type>();
                fn from_bytes(buf: &[u8]) -> Self { ($read)(buf) }
            }
        )*
    };
}

impl_fixed! {
    u8  => |b: &[u8]| b[0],
    i8  => |b: &[u8]| b[0] as i8,
    u16 => SegmentEndian::read_u16,
    i16 => SegmentEndian::read_i16,
    u32 => SegmentEndian::read_u32,
    i32 => SegmentEndian::read_i32,
    u64 => SegmentEndian::read_u64,
    i64 => SegmentEndian::read_i64,
    f32 => SegmentEndian::read_f32,
    f64 => SegmentEndian::read_f64,
}

/// Bounds-checked forward reader over a byte buffer.
///
/// `base` is the absolute offset of `data[0]` in the top-level segment, so
/// positions and error offsets stay meaningful for cursors over nested payloads.
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }
    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Absolute offset of the next byte to be read.
    pub fn position(&self) -> usize {
        self.base + self.pos
    }
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
    /// Unread bytes, without advancing.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn ensure(&self, needed: usize) -> Result<(), DecodeError> {
        if needed > self.remaining() {
            return Err(DecodeError::TruncatedInput {
                offset: self.position(),
                needed,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    /// Moves to an absolute offset within this cursor's buffer (end inclusive).
    pub fn seek(&mut self, absolute: usize) -> Result<(), DecodeError> {
        let end = self.base + self.data.len();
        if absolute < self.base || absolute > end {
            return Err(DecodeError::TruncatedInput {
                offset: self.position(),
                needed: absolute.saturating_sub(self.position()),
                available: self.remaining(),
            });
        }
        self.pos = absolute - self.base;
        Ok(())
    }
    pub fn skip(&mut self, n: usize) -> Result<(), DecodeError> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Borrowed view of the next `n` bytes.
    pub fn read_slice(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        self.ensure(n)?;
        let s = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn read_fixed<T: Fixed>(&mut self) -> Result<T, DecodeError> {
        let buf = self.read_slice(T::WIDTH)?;
        Ok(T::from_bytes(buf))
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.read_fixed()
    }
    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.read_fixed()
    }
    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        self.read_fixed()
    }
    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        self.read_fixed()
    }
    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        self.read_fixed()
    }
    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        self.read_fixed()
    }
}
