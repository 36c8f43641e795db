// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use std::io::*;
use byteorder::{ ReadBytesExt, BigEndian };
use memchr::memmem;

/// Identifier at the start of every APP0 segment carrying route data.
pub const QUICKROUTE_ID: &[u8] = b"QuickRoute";

const SOI: [u8; 2] = [0xff, 0xd8];
const APP0: u8 = 0xe0;
const APP15: u8 = 0xef;

#[derive(Debug, Clone, PartialEq)]
pub struct AppSegment {
    /// n in APPn
    pub index: u8,
    pub data: Vec<u8>,
}

/// Quick check whether a file may contain route data at all.
pub fn detect(buffer: &[u8]) -> bool {
    buffer.starts_with(&SOI) && memmem::find(buffer, QUICKROUTE_ID).is_some()
}

/// Reads the APPn segments at the start of a JPEG stream. Stops at the first
/// marker that isn't APPn, which is where the image data begins.
pub fn read_app_segments<R: Read>(stream: &mut R) -> Result<Vec<AppSegment>> {
    let mut ret = Vec::new();
    let mut marker = [0u8; 2];
    loop {
        match stream.read_exact(&mut marker) {
            Ok(()) => { }
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => break,
            Err(e) => return Err(e),
        }
        if marker == SOI {
            continue;
        }
        if marker[0] != 0xff {
            log::debug!("Marker out of sync: {:02x?}", marker);
            break;
        }
        if !(APP0..=APP15).contains(&marker[1]) {
            break;
        }
        // Length includes its own two bytes
        let len = stream.read_u16::<BigEndian>()? as usize;
        if len < 2 {
            return Err(Error::new(ErrorKind::InvalidData, format!("Invalid APP{} length: {}", marker[1] - APP0, len)));
        }
        let mut data = vec![0u8; len - 2];
        stream.read_exact(&mut data)?;
        log::trace!("APP{}: {} bytes", marker[1] - APP0, data.len());
        ret.push(AppSegment { index: marker[1] - APP0, data });
    }
    Ok(ret)
}

/// Route data from all QuickRoute APP0 segments, identifier stripped and
/// concatenated in file order. `None` if there is none.
pub fn extract_quickroute<R: Read>(stream: &mut R) -> Result<Option<Vec<u8>>> {
    let mut ret: Option<Vec<u8>> = None;
    for seg in read_app_segments(stream)? {
        if seg.index == 0 && seg.data.starts_with(QUICKROUTE_ID) {
            ret.get_or_insert_with(Vec::new).extend_from_slice(&seg.data[QUICKROUTE_ID.len()..]);
        }
    }
    if let Some(data) = &ret {
        log::debug!("QuickRoute data: {} bytes", data.len());
    }
    Ok(ret)
}
