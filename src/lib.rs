// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

//! Decoder for the route data QuickRoute embeds in the APP0 segments of the
//! JPEG maps it exports.
//!
//! The data is a tree of tag-length-value records (tag u8, length u32, all
//! numbers little-endian). [`SegmentDecoder`] walks it and folds the known
//! records into a [`RouteSession`]; unknown records are kept verbatim.
//!
//! ```no_run
//! let mut file = std::fs::File::open("map.jpg")?;
//! let session = quickroute_parser::from_stream(&mut file, &quickroute_parser::DecoderConfig::quickroute())?;
//! println!("{} track points", session.track_points().len());
//! # Ok::<(), quickroute_parser::Error>(())
//! ```

pub mod cursor;
pub mod decoder;
pub mod error;
pub mod export;
pub mod jpeg;
pub mod layouts;
pub mod session;
pub mod tags;
pub mod tlv;
pub mod util;
pub mod writer;

use std::io::Read;

pub use decoder::{ DecoderConfig, NodeBody, RecordNode, SegmentDecoder, TrailingBytes };
pub use error::{ DecodeError, Error };
pub use session::*;
pub use tags::Layout;

/// Decodes a segment payload with the default configuration.
pub fn decode(payload: &[u8]) -> Result<RouteSession, DecodeError> {
    decode_with(payload, &DecoderConfig::default())
}

pub fn decode_with(payload: &[u8], config: &DecoderConfig) -> Result<RouteSession, DecodeError> {
    SegmentDecoder::new(config.clone()).decode(payload)
}

/// Extracts the route data from a JPEG stream and decodes it.
pub fn from_stream<T: Read>(stream: &mut T, config: &DecoderConfig) -> error::Result<RouteSession> {
    let data = jpeg::extract_quickroute(stream)?.ok_or(Error::NotFound)?;
    Ok(decode_with(&data, config)?)
}
