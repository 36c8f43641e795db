// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

pub mod quickroute;
pub mod samples;

use crate::cursor::ByteCursor;
use crate::error::FieldError;

/// Fails unless exactly `width` bytes are left in the payload.
pub(crate) fn expect_width(c: &ByteCursor, width: usize) -> Result<(), FieldError> {
    if c.remaining() != width {
        return Err(FieldError::new(c.position(), format!("expected {} bytes, got {}", width, c.remaining())));
    }
    Ok(())
}

/// Fails if a variable-width decoder left bytes unread.
pub(crate) fn expect_consumed(c: &ByteCursor) -> Result<(), FieldError> {
    if !c.is_empty() {
        return Err(FieldError::new(c.position(), format!("{} unread bytes", c.remaining())));
    }
    Ok(())
}

/// Guards `count * item_size` against the bytes actually left, so a forged
/// count cannot drive a huge allocation.
pub(crate) fn expect_items(c: &ByteCursor, count: usize, item_size: usize) -> Result<(), FieldError> {
    match count.checked_mul(item_size) {
        Some(n) if n <= c.remaining() => Ok(()),
        _ => Err(FieldError::new(c.position(), format!("{count} items of {item_size} bytes do not fit in {} bytes", c.remaining()))),
    }
}
