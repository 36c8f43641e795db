// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use byteorder::WriteBytesExt;

use crate::cursor::{ ByteCursor, SegmentEndian };
use crate::error::DecodeError;

/// Tag byte + u32 length.
pub const HEADER_SIZE: usize = 1 + 4;

/// One tag-length-value record, borrowing its payload from the segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Record<'a> {
    pub tag: u8,
    /// Absolute offset of the tag byte.
    pub offset: usize,
    pub payload: &'a [u8],
}
impl<'a> Record<'a> {
    pub fn len(&self) -> usize {
        self.payload.len()
    }
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
    /// Absolute offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        self.offset + HEADER_SIZE
    }
    /// Cursor over the payload, keeping absolute offsets.
    pub fn cursor(&self) -> ByteCursor<'a> {
        ByteCursor::with_base(self.payload, self.payload_offset())
    }
}

#[derive(Debug, PartialEq)]
pub enum Next<'a> {
    Record(Record<'a>),
    EndOfSegment,
}

pub struct TlvReader;

impl TlvReader {
    /// Reads the record at the cursor. An exhausted cursor is the normal end of
    /// the sequence; anything shorter than the declared record is truncated.
    pub fn next<'a>(cursor: &mut ByteCursor<'a>) -> Result<Next<'a>, DecodeError> {
        if cursor.is_empty() {
            return Ok(Next::EndOfSegment);
        }
        let offset = cursor.position();
        let tag = cursor.read_u8()?;
        let length = cursor.read_u32()? as usize;
        if length > cursor.remaining() {
            return Err(DecodeError::TruncatedInput {
                offset: offset + 1,
                needed: length,
                available: cursor.remaining(),
            });
        }
        let payload = cursor.read_slice(length)?;
        Ok(Next::Record(Record { tag, offset, payload }))
    }
}

/// Appends one record to `buf`.
pub fn write_record(buf: &mut Vec<u8>, tag: u8, payload: &[u8]) {
    buf.push(tag);
    // Writing into a Vec cannot fail.
    let _ = buf.write_u32::<SegmentEndian>(payload.len() as u32);
    buf.extend_from_slice(payload);
}
