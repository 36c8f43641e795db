// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use chrono::{ NaiveDate, NaiveDateTime, TimeDelta };

/// Mean earth radius used for track distances, in meters.
pub const EARTH_RADIUS_M: f64 = 6372000.0;

/// .NET `DateTime` ticks per second (100 ns resolution).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

// Two most significant bits of a serialized DateTime hold its kind (UTC/local).
const TICKS_KIND_MASK: u64 = 0b11 << 62;

pub fn dotnet_epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or_default().and_hms_opt(0, 0, 0).unwrap_or_default()
}

/// Converts a serialized .NET `DateTime` to a naive date time. `None` if out of range.
pub fn dotnet_ticks_to_datetime(ticks: u64) -> Option<NaiveDateTime> {
    let ticks = (ticks & !TICKS_KIND_MASK) as i64;
    let secs = ticks / TICKS_PER_SECOND;
    let nanos = (ticks % TICKS_PER_SECOND) * 100;
    dotnet_epoch().checked_add_signed(TimeDelta::seconds(secs) + TimeDelta::nanoseconds(nanos))
}

/// Inverse of [`dotnet_ticks_to_datetime`], with the kind bits cleared.
pub fn datetime_to_dotnet_ticks(time: &NaiveDateTime) -> u64 {
    let d = *time - dotnet_epoch();
    let secs = d.num_seconds();
    let sub = (d - TimeDelta::seconds(secs)).num_nanoseconds().unwrap_or(0);
    (secs * TICKS_PER_SECOND + sub / 100).max(0) as u64
}

/// Great-circle distance in meters between two (lat, lon) points in degrees.
pub fn haversine_distance(a: (f64, f64), b: (f64, f64)) -> f64 {
    let (lat1, lon1) = (a.0.to_radians(), a.1.to_radians());
    let (lat2, lon2) = (b.0.to_radians(), b.1.to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;
    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    2.0 * EARTH_RADIUS_M * h.sqrt().asin()
}

/// Serde adapter storing raw bytes as a standard base64 string.
pub mod base64_bytes {
    use base64::{ Engine, engine::general_purpose::STANDARD };
    use serde::{ Deserialize, Deserializer, Serializer };

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
