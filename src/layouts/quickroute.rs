// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

//! Layout written by the QuickRoute exporter. The route is one packed record
//! per session; sessions are grouped in a counted `Sessions` container.

use byteorder::WriteBytesExt;
use chrono::{ NaiveDateTime, TimeDelta };
use serde::Serialize;

use crate::cursor::{ ByteCursor, SegmentEndian };
use crate::error::{ Error, FieldError };
use crate::session::*;
use crate::tags::{ DecodeRule::*, Field, TagEntry, TagTable };
use crate::util;
use super::{ expect_consumed, expect_items, expect_width };

#[allow(non_snake_case, non_upper_case_globals)]
pub mod Tag {
    pub const Version                    : u8 = 1;
    pub const MapCornerPositions         : u8 = 2;
    pub const ImageCornerPositions       : u8 = 3;
    pub const MapLocationAndSizeInPixels : u8 = 4;
    pub const Sessions                   : u8 = 5;
    pub const Session                    : u8 = 6;
    pub const Route                      : u8 = 7;
    pub const Handles                    : u8 = 8;
    pub const ProjectionOrigin           : u8 = 9;
    pub const Laps                       : u8 = 10;
    pub const SessionInfo                : u8 = 11;
    pub const MapReadingInfo             : u8 = 12;
}

pub static TAGS: TagTable = TagTable {
    name: "quickroute",
    entries: &[
        TagEntry { id: Tag::Version,                    name: "Version",                    rule: Terminal(version) },
        TagEntry { id: Tag::MapCornerPositions,         name: "MapCornerPositions",         rule: Terminal(map_corners) },
        TagEntry { id: Tag::ImageCornerPositions,       name: "ImageCornerPositions",       rule: Terminal(image_corners) },
        TagEntry { id: Tag::MapLocationAndSizeInPixels, name: "MapLocationAndSizeInPixels", rule: Terminal(map_rect) },
        TagEntry { id: Tag::Sessions,                   name: "Sessions",                   rule: CountedNested },
        TagEntry { id: Tag::Session,                    name: "Session",                    rule: Nested },
        TagEntry { id: Tag::Route,                      name: "Route",                      rule: Terminal(route) },
        TagEntry { id: Tag::Handles,                    name: "Handles",                    rule: Terminal(handles) },
        TagEntry { id: Tag::ProjectionOrigin,           name: "ProjectionOrigin",           rule: Terminal(projection_origin) },
        TagEntry { id: Tag::Laps,                       name: "Laps",                       rule: Terminal(laps) },
        TagEntry { id: Tag::SessionInfo,                name: "SessionInfo",                rule: Terminal(session_info) },
        // Layout not known yet
        TagEntry { id: Tag::MapReadingInfo,             name: "MapReadingInfo",             rule: Unknown },
    ]
};

/// Waypoint attribute bits in the route header.
#[allow(non_snake_case, non_upper_case_globals)]
pub mod RouteAttr {
    pub const Position  : u16 = 1;
    pub const Time      : u16 = 2;
    pub const HeartRate : u16 = 4;
    pub const Altitude  : u16 = 8;
}

/// Coordinates are stored in milliseconds of arc.
const COORD_SCALE: f64 = 3600000.0;

const COORD_SIZE: usize = 4 + 4;
const HANDLE_SIZE: usize = 9*8 + 4+8 + 8+8 + 2;
const LAP_SIZE: usize = 8 + 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Default)]
pub struct Waypoint {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Coordinate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<NaiveDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct Route {
    pub attributes: u16,
    /// Unknown bytes trailing each waypoint.
    pub extra_len: u16,
    pub segments: Vec<Vec<Waypoint>>,
}
impl Route {
    pub fn has(&self, attr: u16) -> bool {
        self.attributes & attr != 0
    }
    fn waypoint_size(&self) -> usize {
        let mut size = self.extra_len as usize;
        if self.has(RouteAttr::Position)  { size += COORD_SIZE; }
        if self.has(RouteAttr::Time)      { size += 1 + 2; } // shortest form: type + delta
        if self.has(RouteAttr::HeartRate) { size += 1; }
        if self.has(RouteAttr::Altitude)  { size += 2; }
        size
    }
}

fn read_coord(c: &mut ByteCursor) -> Result<Coordinate, FieldError> {
    let lon = c.read_i32()? as f64 / COORD_SCALE;
    let lat = c.read_i32()? as f64 / COORD_SCALE;
    Ok(Coordinate { lat, lon })
}

fn read_time(c: &mut ByteCursor) -> Result<NaiveDateTime, FieldError> {
    let at = c.position();
    let ticks = c.read_u64()?;
    util::dotnet_ticks_to_datetime(ticks).ok_or_else(|| FieldError::new(at, format!("time out of range: {ticks}")))
}

fn read_string(c: &mut ByteCursor) -> Result<String, FieldError> {
    let len = c.read_u16()? as usize;
    let at = c.position();
    let bytes = c.read_slice(len)?;
    Ok(match std::str::from_utf8(bytes) {
        Ok(s) => s.to_owned(),
        Err(e) => {
            log::trace!("Invalid UTF-8 in string at offset {at}: {e}\n{}", pretty_hex::pretty_hex(&bytes));
            String::from_utf8_lossy(bytes).into_owned()
        }
    })
}

fn read_corners(c: &mut ByteCursor) -> Result<Corners, FieldError> {
    expect_width(c, 4 * COORD_SIZE)?;
    Ok(Corners {
        sw: read_coord(c)?,
        nw: read_coord(c)?,
        ne: read_coord(c)?,
        se: read_coord(c)?,
    })
}

/// 4x u8, joined by dots
pub fn version(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, 4)?;
    let v = c.read_slice(4)?;
    Ok(Field::Version(v.iter().map(|x| x.to_string()).collect::<Vec<_>>().join(".")))
}

pub fn map_corners(c: &mut ByteCursor) -> Result<Field, FieldError> {
    Ok(Field::MapCorners(read_corners(c)?))
}

pub fn image_corners(c: &mut ByteCursor) -> Result<Field, FieldError> {
    Ok(Field::ImageCorners(read_corners(c)?))
}

/// x, y, width, height as u16
pub fn map_rect(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, 8)?;
    Ok(Field::MapRect(PixelRect {
        x:      c.read_u16()?,
        y:      c.read_u16()?,
        width:  c.read_u16()?,
        height: c.read_u16()?,
    }))
}

pub fn projection_origin(c: &mut ByteCursor) -> Result<Field, FieldError> {
    expect_width(c, COORD_SIZE)?;
    Ok(Field::ProjectionOrigin(read_coord(c)?))
}

/// Header (attributes u16, extra length u16, segment count u32), then per
/// segment a waypoint count u32 and the packed waypoints.
pub fn route(c: &mut ByteCursor) -> Result<Field, FieldError> {
    let mut route = Route {
        attributes: c.read_u16()?,
        extra_len:  c.read_u16()?,
        segments:   Vec::new(),
    };
    let segment_count = c.read_u32()? as usize;
    expect_items(c, segment_count, 4)?;

    let waypoint_size = route.waypoint_size();
    route.segments.reserve(segment_count);

    for _ in 0..segment_count {
        let at = c.position();
        let count = c.read_u32()? as usize;
        if count > 0 && waypoint_size == 0 {
            return Err(FieldError::new(at, format!("{count} waypoints without any attributes")));
        }
        expect_items(c, count, waypoint_size)?;

        let mut segment = Vec::with_capacity(count);
        let mut time: Option<NaiveDateTime> = None;
        for _ in 0..count {
            let mut wp = Waypoint::default();
            if route.has(RouteAttr::Position) {
                wp.position = Some(read_coord(c)?);
            }
            if route.has(RouteAttr::Time) {
                let at = c.position();
                time = match c.read_u8()? {
                    0 => Some(read_time(c)?),
                    _ => {
                        let delta = TimeDelta::milliseconds(c.read_u16()? as i64);
                        let prev = time.ok_or_else(|| FieldError::new(at, "time delta before any absolute time"))?;
                        Some(prev + delta)
                    }
                };
                wp.time = time;
            }
            if route.has(RouteAttr::HeartRate) {
                wp.heart_rate = Some(c.read_u8()?);
            }
            if route.has(RouteAttr::Altitude) {
                wp.altitude = Some(c.read_u16()?);
            }
            c.skip(route.extra_len as usize)?;
            segment.push(wp);
        }
        route.segments.push(segment);
    }
    expect_consumed(c)?;
    Ok(Field::Route(route))
}

/// Count u32, then per handle: 3x3 f64 matrix, parameterized location
/// (u32 + f64), pixel location (2x f64), type u16.
pub fn handles(c: &mut ByteCursor) -> Result<Field, FieldError> {
    let count = c.read_u32()? as usize;
    expect_items(c, count, HANDLE_SIZE)?;

    let mut ret = Vec::with_capacity(count);
    for _ in 0..count {
        let mut matrix = [[0f64; 3]; 3];
        for row in matrix.iter_mut() {
            for v in row.iter_mut() {
                *v = c.read_f64()?;
            }
        }
        ret.push(Handle {
            matrix,
            parameterized_location: (c.read_u32()?, c.read_f64()?),
            pixel_location:         (c.read_f64()?, c.read_f64()?),
            kind:                   c.read_u16()?,
        });
    }
    expect_consumed(c)?;
    Ok(Field::Handles(ret))
}

/// Count u32, then (time u64, kind u8) pairs.
pub fn laps(c: &mut ByteCursor) -> Result<Field, FieldError> {
    let count = c.read_u32()? as usize;
    expect_items(c, count, LAP_SIZE)?;

    let mut ret = Vec::with_capacity(count);
    for _ in 0..count {
        ret.push(Lap {
            time: read_time(c)?,
            kind: c.read_u8()?.into(),
        });
    }
    expect_consumed(c)?;
    Ok(Field::Laps(ret))
}

/// Name, club, id u32, description. Strings are u16 length prefixed.
/// Newer exporters may append fields, so the tail is left unread.
pub fn session_info(c: &mut ByteCursor) -> Result<Field, FieldError> {
    let name = read_string(c)?;
    let club = read_string(c)?;
    let id = c.read_u32()?;
    let description = read_string(c)?;
    if !c.is_empty() {
        log::trace!("SessionInfo: {} bytes left unread", c.remaining());
    }
    Ok(Field::SessionInfo(SessionInfo { name, club, id, description }))
}

// ---------- Payload writers ----------
// Writing into a Vec cannot fail, hence the ignored results.

fn write_coord(buf: &mut Vec<u8>, p: &Coordinate) {
    let _ = buf.write_i32::<SegmentEndian>((p.lon * COORD_SCALE).round() as i32);
    let _ = buf.write_i32::<SegmentEndian>((p.lat * COORD_SCALE).round() as i32);
}

fn write_string(buf: &mut Vec<u8>, s: &str) -> Result<(), Error> {
    let len = u16::try_from(s.len()).map_err(|_| Error::Encode(format!("string of {} bytes, at most {} fit", s.len(), u16::MAX)))?;
    let _ = buf.write_u16::<SegmentEndian>(len);
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

pub fn corners_payload(v: &Corners) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 * COORD_SIZE);
    for p in [&v.sw, &v.nw, &v.ne, &v.se] {
        write_coord(&mut buf, p);
    }
    buf
}

pub fn coordinate_payload(p: &Coordinate) -> Vec<u8> {
    let mut buf = Vec::with_capacity(COORD_SIZE);
    write_coord(&mut buf, p);
    buf
}

pub fn map_rect_payload(r: &PixelRect) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8);
    for v in [r.x, r.y, r.width, r.height] {
        let _ = buf.write_u16::<SegmentEndian>(v);
    }
    buf
}

/// Times are written as an absolute time for the first waypoint of a segment
/// and as millisecond deltas afterwards when they fit in a u16.
pub fn route_payload(route: &Route) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = buf.write_u16::<SegmentEndian>(route.attributes);
    let _ = buf.write_u16::<SegmentEndian>(route.extra_len);
    let _ = buf.write_u32::<SegmentEndian>(route.segments.len() as u32);
    for segment in &route.segments {
        let _ = buf.write_u32::<SegmentEndian>(segment.len() as u32);
        let mut prev: Option<NaiveDateTime> = None;
        for wp in segment {
            if route.has(RouteAttr::Position) {
                write_coord(&mut buf, &wp.position.unwrap_or_default());
            }
            if route.has(RouteAttr::Time) {
                let t = wp.time.unwrap_or_else(util::dotnet_epoch);
                let delta = prev.map(|p| (t - p).num_milliseconds()).filter(|d| (0..=u16::MAX as i64).contains(d) && prev.map(|p| p + TimeDelta::milliseconds(*d)) == Some(t));
                match delta {
                    Some(d) => {
                        buf.push(1);
                        let _ = buf.write_u16::<SegmentEndian>(d as u16);
                    }
                    None => {
                        buf.push(0);
                        let _ = buf.write_u64::<SegmentEndian>(util::datetime_to_dotnet_ticks(&t));
                    }
                }
                prev = Some(t);
            }
            if route.has(RouteAttr::HeartRate) {
                buf.push(wp.heart_rate.unwrap_or_default());
            }
            if route.has(RouteAttr::Altitude) {
                let _ = buf.write_u16::<SegmentEndian>(wp.altitude.unwrap_or_default());
            }
            buf.resize(buf.len() + route.extra_len as usize, 0);
        }
    }
    buf
}

pub fn laps_payload(laps: &[Lap]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + laps.len() * LAP_SIZE);
    let _ = buf.write_u32::<SegmentEndian>(laps.len() as u32);
    for lap in laps {
        let _ = buf.write_u64::<SegmentEndian>(util::datetime_to_dotnet_ticks(&lap.time));
        buf.push(lap.kind.into());
    }
    buf
}

pub fn handles_payload(handles: &[Handle]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + handles.len() * HANDLE_SIZE);
    let _ = buf.write_u32::<SegmentEndian>(handles.len() as u32);
    for h in handles {
        for v in h.matrix.iter().flatten() {
            let _ = buf.write_f64::<SegmentEndian>(*v);
        }
        let _ = buf.write_u32::<SegmentEndian>(h.parameterized_location.0);
        let _ = buf.write_f64::<SegmentEndian>(h.parameterized_location.1);
        let _ = buf.write_f64::<SegmentEndian>(h.pixel_location.0);
        let _ = buf.write_f64::<SegmentEndian>(h.pixel_location.1);
        let _ = buf.write_u16::<SegmentEndian>(h.kind);
    }
    buf
}

/// Fails if a string doesn't fit its u16 length prefix.
pub fn session_info_payload(info: &SessionInfo) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    write_string(&mut buf, &info.name)?;
    write_string(&mut buf, &info.club)?;
    let _ = buf.write_u32::<SegmentEndian>(info.id);
    write_string(&mut buf, &info.description)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2010, 6, 5).unwrap().and_hms_milli_opt(h, m, s, ms).unwrap()
    }

    fn decode(f: fn(&mut ByteCursor) -> Result<Field, FieldError>, buf: &[u8]) -> Result<Field, FieldError> {
        f(&mut ByteCursor::new(buf))
    }

    #[test]
    fn version_string() {
        assert_eq!(decode(version, &[2, 4, 0, 1]), Ok(Field::Version("2.4.0.1".into())));
        assert!(decode(version, &[2, 4, 0]).is_err());
    }

    #[test]
    fn coordinates_are_milliseconds_of_arc() {
        // lon first, then lat
        let mut buf = Vec::new();
        buf.extend_from_slice(&(18 * 3600000i32).to_le_bytes());
        buf.extend_from_slice(&(59 * 3600000i32 + 1800000).to_le_bytes());
        assert_eq!(decode(projection_origin, &buf), Ok(Field::ProjectionOrigin(Coordinate { lat: 59.5, lon: 18.0 })));

        let west = Coordinate { lat: -33.5, lon: -70.25 };
        assert_eq!(decode(projection_origin, &coordinate_payload(&west)), Ok(Field::ProjectionOrigin(west)));
    }

    #[test]
    fn corners_order() {
        let c = Corners {
            sw: Coordinate { lat: 59.0, lon: 18.0 },
            nw: Coordinate { lat: 59.5, lon: 18.0 },
            ne: Coordinate { lat: 59.5, lon: 18.5 },
            se: Coordinate { lat: 59.0, lon: 18.5 },
        };
        let buf = corners_payload(&c);
        assert_eq!(buf.len(), 32);
        assert_eq!(decode(map_corners, &buf), Ok(Field::MapCorners(c)));
        assert_eq!(decode(image_corners, &buf), Ok(Field::ImageCorners(c)));
        assert!(decode(map_corners, &buf[..24]).is_err());
    }

    #[test]
    fn route_with_time_deltas() {
        let route_in = Route {
            attributes: RouteAttr::Position | RouteAttr::Time | RouteAttr::HeartRate | RouteAttr::Altitude,
            extra_len: 2,
            segments: vec![
                vec![
                    Waypoint { position: Some(Coordinate { lat: 59.5, lon: 18.0 }), time: Some(at(10, 0, 0, 0)),   heart_rate: Some(120), altitude: Some(30) },
                    Waypoint { position: Some(Coordinate { lat: 59.6, lon: 18.1 }), time: Some(at(10, 0, 1, 500)), heart_rate: Some(125), altitude: Some(31) },
                ],
                vec![
                    Waypoint { position: Some(Coordinate { lat: 59.7, lon: 18.2 }), time: Some(at(11, 0, 0, 0)),   heart_rate: Some(140), altitude: Some(35) },
                ],
            ],
        };
        let buf = route_payload(&route_in);
        // header 8, segment counts 2x4, waypoints 8+9+1+2+2 / 8+3+1+2+2 / 8+9+1+2+2
        assert_eq!(buf.len(), 8 + 8 + 22 + 16 + 22);
        let Ok(Field::Route(route_out)) = decode(route, &buf) else { panic!() };
        assert_eq!(route_out.segments.len(), 2);
        assert_eq!(route_out.segments[0][1].time, Some(at(10, 0, 1, 500)));
        assert_eq!(route_out.segments[1][0].heart_rate, Some(140));
        assert_eq!(route_out, route_in);
    }

    #[test]
    fn route_delta_without_base_is_malformed() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&RouteAttr::Time.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&[1, 0x10, 0x00]);
        let err = decode(route, &buf).unwrap_err();
        assert_eq!(err.offset, 12);
    }

    #[test]
    fn route_rejects_forged_counts() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&RouteAttr::Position.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf.extend_from_slice(&u32::MAX.to_le_bytes());
        assert!(decode(route, &buf).is_err());

        let mut empty_attrs = Vec::new();
        empty_attrs.extend_from_slice(&[0, 0, 0, 0]);
        empty_attrs.extend_from_slice(&1u32.to_le_bytes());
        empty_attrs.extend_from_slice(&1000u32.to_le_bytes());
        assert!(decode(route, &empty_attrs).is_err());
    }

    #[test]
    fn laps_and_handles() {
        let l = vec![
            Lap { time: at(10, 0, 0, 0), kind: LapKind::Start },
            Lap { time: at(10, 30, 0, 0), kind: LapKind::Lap },
            Lap { time: at(11, 0, 0, 0), kind: LapKind::Other(7) },
        ];
        assert_eq!(decode(laps, &laps_payload(&l)), Ok(Field::Laps(l)));

        let h = vec![Handle {
            matrix: [[1.0, 0.0, 5.0], [0.0, 1.0, -3.0], [0.0, 0.0, 1.0]],
            parameterized_location: (0, 12.25),
            pixel_location: (320.5, 200.0),
            kind: 0,
        }];
        let buf = handles_payload(&h);
        assert_eq!(buf.len(), 4 + HANDLE_SIZE);
        assert_eq!(decode(handles, &buf), Ok(Field::Handles(h)));
        assert!(decode(handles, &buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn session_info_tolerates_tail() {
        let info = SessionInfo { name: "Anna".into(), club: "OK Linné".into(), id: 0, description: "".into() };
        let mut buf = session_info_payload(&info).unwrap();
        buf.extend_from_slice(&[1, 2, 3]);
        assert_eq!(decode(session_info, &buf), Ok(Field::SessionInfo(info)));
        assert!(decode(session_info, &[5, 0, b'a']).is_err());
    }

    #[test]
    fn session_info_invalid_utf8_is_replaced() {
        let mut buf = vec![2, 0, b'O', 0xff];
        buf.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 0]);
        let Ok(Field::SessionInfo(info)) = decode(session_info, &buf) else { panic!() };
        assert_eq!(info.name, "O\u{fffd}");
        assert_eq!(info.club, "");
    }

    #[test]
    fn session_info_rejects_long_strings() {
        let info = SessionInfo { description: "x".repeat(u16::MAX as usize + 1), ..Default::default() };
        assert!(matches!(session_info_payload(&info), Err(Error::Encode(_))));

        let fits = SessionInfo { description: "x".repeat(u16::MAX as usize), ..Default::default() };
        let buf = session_info_payload(&fits).unwrap();
        assert_eq!(decode(session_info, &buf), Ok(Field::SessionInfo(fits)));
    }
}
