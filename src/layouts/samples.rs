// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

//! One record per sample: every track point, time and heart rate reading is
//! its own record, optionally grouped in nested `Group` records.

use byteorder::WriteBytesExt;

use crate::cursor::{ ByteCursor, SegmentEndian };
use crate::error::FieldError;
use crate::session::*;
use crate::tags::{ DecodeRule::*, Field, TagEntry, TagTable };
use crate::util;
use super::expect_width;

#[allow(non_snake_case, non_upper_case_globals)]
pub mod Tag {
    pub const TrackPoint       : u8 = 0x01;
    pub const Timestamp        : u8 = 0x02;
    pub const HeartRate        : u8 = 0x03;
    pub const CalibrationPoint : u8 = 0x04;
    pub const Group            : u8 = 0x05;
}

pub static TAGS: TagTable = TagTable {
    name: "samples",
    entries: &[
        TagEntry { id: Tag::TrackPoint,       name: "TrackPoint",       rule: Terminal(track_point) },
        TagEntry { id: Tag::Timestamp,        name: "Timestamp",        rule: Terminal(timestamp) },
        TagEntry { id: Tag::HeartRate,        name: "HeartRate",        rule: Terminal(heart_rate) },
        TagEntry { id: Tag::CalibrationPoint, name: "CalibrationPoint", rule: Terminal(calibration_point) },
        TagEntry { id: Tag::Group,            name: "Group",            rule: Nested },
    ]
};

fn read_time(c: &mut ByteCursor) -> Result<chrono::NaiveDateTime, FieldError> {
    let at = c.position();
    let ticks = c.read_u64()?;
    util::dotnet_ticks_to_datetime(ticks).ok_or_else(|| FieldError::new(at, format!("time out of range: {ticks}")))
}

/// lat f64, lon f64
pub fn track_point(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, 16)?;
    Ok(Field::TrackPoint(TrackPoint::new(c.read_f64()?, c.read_f64()?)))
}

/// .NET ticks u64
pub fn timestamp(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, 8)?;
    Ok(Field::Timestamp(read_time(c)?))
}

/// .NET ticks u64, bpm u8
pub fn heart_rate(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, 9)?;
    Ok(Field::HeartRate(HeartRateSample { time: read_time(c)?, bpm: c.read_u8()? }))
}

/// x f64, y f64, lat f64, lon f64
pub fn calibration_point(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, 32)?;
    Ok(Field::Calibration(CalibrationPoint {
        image_pixel:    (c.read_f64()?, c.read_f64()?),
        map_coordinate: (c.read_f64()?, c.read_f64()?),
    }))
}

// ---------- Payload writers ----------
// Writing into a Vec cannot fail, hence the ignored results.

pub fn track_point_payload(p: &TrackPoint) -> Vec<u8> {
    let mut buf = Vec::with_capacity(16);
    let _ = buf.write_f64::<SegmentEndian>(p.latitude);
    let _ = buf.write_f64::<SegmentEndian>(p.longitude);
    buf
}
pub fn timestamp_payload(t: &chrono::NaiveDateTime) -> Vec<u8> {
    util::datetime_to_dotnet_ticks(t).to_le_bytes().to_vec()
}
pub fn heart_rate_payload(s: &HeartRateSample) -> Vec<u8> {
    let mut buf = timestamp_payload(&s.time);
    buf.push(s.bpm);
    buf
}
pub fn calibration_point_payload(p: &CalibrationPoint) -> Vec<u8> {
    let mut buf = Vec::with_capacity(32);
    for v in [p.image_pixel.0, p.image_pixel.1, p.map_coordinate.0, p.map_coordinate.1] {
        let _ = buf.write_f64::<SegmentEndian>(v);
    }
    buf
}
