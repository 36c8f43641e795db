// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use thiserror::Error;

/// Failure of a single segment decode. Every variant carries the absolute byte
/// offset (from the first tag byte of the segment) where decoding stopped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedInput { offset: usize, needed: usize, available: usize },

    #[error("Malformed field (tag {tag:#04x}) at offset {offset}: {reason}")]
    MalformedField { tag: u8, offset: usize, reason: String },

    #[error("Segment nesting deeper than {max_depth} levels at offset {offset}")]
    SegmentTooDeep { offset: usize, max_depth: usize },

    #[error("{count} unexpected trailing bytes at offset {offset}")]
    UnexpectedTrailingBytes { offset: usize, count: usize },
}

impl DecodeError {
    pub fn offset(&self) -> usize {
        match self {
            DecodeError::TruncatedInput          { offset, .. } |
            DecodeError::MalformedField          { offset, .. } |
            DecodeError::SegmentTooDeep          { offset, .. } |
            DecodeError::UnexpectedTrailingBytes { offset, .. } => *offset,
        }
    }
}

/// Failure inside a terminal field decoder. The dispatcher knows the tag and
/// turns this into [`DecodeError::MalformedField`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason} (at offset {offset})")]
pub struct FieldError {
    pub offset: usize,
    pub reason: String,
}

impl FieldError {
    pub fn new<S: Into<String>>(offset: usize, reason: S) -> Self {
        Self { offset, reason: reason.into() }
    }
    pub(crate) fn into_decode_error(self, tag: u8) -> DecodeError {
        DecodeError::MalformedField { tag, offset: self.offset, reason: self.reason }
    }
}

// Reads inside a terminal payload that run short mean the field itself is malformed.
impl From<DecodeError> for FieldError {
    fn from(e: DecodeError) -> Self {
        match e {
            DecodeError::TruncatedInput { offset, needed, available } => {
                FieldError::new(offset, format!("payload too short: needed {needed} bytes, {available} available"))
            }
            other => FieldError::new(other.offset(), other.to_string()),
        }
    }
}

/// Errors of the outer layers: file access, JPEG extraction, encoding and export.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("No QuickRoute data found in the file")]
    NotFound,

    #[error("Cannot encode {0}")]
    Encode(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
