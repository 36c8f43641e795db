// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use std::ops::Range;

use chrono::{ NaiveDateTime, TimeDelta };
use serde::{ Deserialize, Serialize };

use crate::util;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TrackPoint {
    #[serde(rename = "lat")]
    pub latitude: f64,
    #[serde(rename = "lon")]
    pub longitude: f64,
    #[serde(rename = "alt", default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
}
impl TrackPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude, altitude: None }
    }
    pub fn lat_lon(&self) -> (f64, f64) {
        (self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartRateSample {
    #[serde(rename = "t")]
    pub time: NaiveDateTime,
    pub bpm: u8,
}

/// Pixel position on the exported image paired with its geographic position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    #[serde(rename = "pixel")]
    pub image_pixel: (f64, f64),
    /// (latitude, longitude)
    #[serde(rename = "map")]
    pub map_coordinate: (f64, f64),
}

/// Record with an unrecognized tag, payload kept byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownRecord {
    pub tag: u8,
    #[serde(with = "util::base64_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Coordinate {
    pub lat: f64,
    pub lon: f64,
}

/// Geographic positions of the four corners of a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Corners {
    #[serde(rename = "SW")] pub sw: Coordinate,
    #[serde(rename = "NW")] pub nw: Coordinate,
    #[serde(rename = "NE")] pub ne: Coordinate,
    #[serde(rename = "SE")] pub se: Coordinate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PixelRect {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LapKind {
    Start,
    Lap,
    Stop,
    Other(u8),
}
impl From<u8> for LapKind {
    fn from(v: u8) -> Self {
        match v {
            0 => LapKind::Start,
            1 => LapKind::Lap,
            2 => LapKind::Stop,
            x => LapKind::Other(x),
        }
    }
}
impl From<LapKind> for u8 {
    fn from(v: LapKind) -> Self {
        match v {
            LapKind::Start => 0,
            LapKind::Lap => 1,
            LapKind::Stop => 2,
            LapKind::Other(x) => x,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lap {
    pub time: NaiveDateTime,
    #[serde(rename = "type")]
    pub kind: LapKind,
}

/// Adjustment handle binding a route location to an image location.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Handle {
    /// 3x3 transformation, last row is usually (0, 0, 1).
    pub matrix: [[f64; 3]; 3],
    /// (segment index, value)
    pub parameterized_location: (u32, f64),
    pub pixel_location: (f64, f64),
    #[serde(rename = "type")]
    pub kind: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionInfo {
    pub name: String,
    pub club: String,
    pub id: u32,
    pub description: String,
}

/// One QuickRoute session: a competitor's route with its own laps, handles
/// and description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionData {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info: Option<SessionInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection_origin: Option<Coordinate>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub laps: Vec<Lap>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub handles: Vec<Handle>,
    /// Indices of this session's track points in [`RouteSession::track_points`].
    pub track_points: Range<usize>,
}

impl SessionData {
    pub fn name(&self) -> Option<&str> {
        self.info.as_ref().map(|i| i.name.as_str()).filter(|n| !n.is_empty())
    }
}

/// Everything the exporter layout carries besides the sample series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SessionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_corners: Option<Corners>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_corners: Option<Corners>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_rect: Option<PixelRect>,
    /// In file order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sessions: Vec<SessionData>,
    /// Index of the first track point of each route segment, over all sessions.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<usize>,
}

/// Decoded route data of one segment. Owns everything, so the source buffer
/// can be dropped right after decoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RouteSession {
    #[serde(rename = "trackPoints")]
    pub(crate) track_points: Vec<TrackPoint>,
    pub(crate) timestamps: Vec<NaiveDateTime>,
    #[serde(rename = "heartRate")]
    pub(crate) heart_rate_samples: Vec<HeartRateSample>,
    #[serde(rename = "calibration")]
    pub(crate) calibration_points: Vec<CalibrationPoint>,
    #[serde(rename = "unknown")]
    pub(crate) unknown_records: Vec<UnknownRecord>,
    #[serde(default)]
    pub(crate) metadata: SessionMetadata,
}

impl RouteSession {
    pub fn track_points(&self) -> &[TrackPoint] {
        &self.track_points
    }
    /// One time per track point, or empty when the source has no times.
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }
    pub fn heart_rate_samples(&self) -> &[HeartRateSample] {
        &self.heart_rate_samples
    }
    pub fn calibration_points(&self) -> &[CalibrationPoint] {
        &self.calibration_points
    }
    pub fn unknown_records(&self) -> &[UnknownRecord] {
        &self.unknown_records
    }
    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }
    pub fn is_empty(&self) -> bool {
        self.track_points.is_empty() && self.heart_rate_samples.is_empty() && self.calibration_points.is_empty() && self.unknown_records.is_empty()
    }

    /// Track point index ranges, one per route segment. Empty segments are skipped.
    pub fn segment_ranges(&self) -> Vec<Range<usize>> {
        let len = self.track_points.len();
        let mut starts: Vec<usize> = self.metadata.segments.iter().copied().filter(|&s| s < len).collect();
        if starts.first() != Some(&0) {
            starts.insert(0, 0);
        }
        starts.dedup();
        starts.iter().enumerate()
            .map(|(i, &s)| s..starts.get(i + 1).copied().unwrap_or(len))
            .filter(|r| !r.is_empty())
            .collect()
    }
    pub fn segments(&self) -> impl Iterator<Item = &[TrackPoint]> {
        self.segment_ranges().into_iter().map(move |r| &self.track_points[r])
    }

    /// Cumulative distance in meters along each segment, per track point.
    pub fn distances(&self) -> Vec<f64> {
        let mut ret = vec![0.0; self.track_points.len()];
        for r in self.segment_ranges() {
            for i in r.start + 1..r.end {
                ret[i] = ret[i - 1] + util::haversine_distance(self.track_points[i - 1].lat_lon(), self.track_points[i].lat_lon());
            }
        }
        ret
    }

    /// Time since the first timestamp, per track point.
    pub fn elapsed(&self) -> Vec<TimeDelta> {
        match self.timestamps.first() {
            Some(first) => self.timestamps.iter().map(|t| *t - *first).collect(),
            None => Vec::new(),
        }
    }

    pub fn duration(&self) -> Option<TimeDelta> {
        Some(*self.timestamps.last()? - *self.timestamps.first()?)
    }

    /// Most recent heart rate sampled at or before `time`. Sorts the samples
    /// on every call; use [`RouteSession::heart_rate_index`] for many lookups.
    pub fn heart_rate_at(&self, time: &NaiveDateTime) -> Option<u8> {
        self.heart_rate_index().at(time)
    }

    pub fn heart_rate_index(&self) -> HeartRateIndex {
        let mut samples = self.heart_rate_samples.clone();
        // Stable, so equal times keep arrival order and the last one wins.
        samples.sort_by_key(|s| s.time);
        HeartRateIndex(samples)
    }
}

/// Heart rate samples sorted by time. Samples are kept in arrival order in
/// the session, which need not be chronological.
#[derive(Debug, Clone, Default)]
pub struct HeartRateIndex(Vec<HeartRateSample>);

impl HeartRateIndex {
    /// Most recent heart rate sampled at or before `time`.
    pub fn at(&self, time: &NaiveDateTime) -> Option<u8> {
        let idx = self.0.partition_point(|s| s.time <= *time);
        idx.checked_sub(1).map(|i| self.0[i].bpm)
    }
}
