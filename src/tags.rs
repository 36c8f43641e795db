// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::FieldError;
use crate::layouts::{ quickroute, samples };
use crate::session::*;

/// Parses a whole terminal payload into a typed value.
pub type FieldDecoder = fn(&mut ByteCursor) -> Result<Field, FieldError>;

#[derive(Debug, Clone, Copy)]
pub enum DecodeRule {
    /// Leaf value.
    Terminal(FieldDecoder),
    /// Payload is a sequence of records.
    Nested,
    /// Payload is a u32 child count followed by exactly that many records.
    CountedNested,
    /// Not in the table: kept raw, never recursed into.
    Unknown,
}

/// Typed value produced by a terminal decoder.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Field {
    TrackPoint(TrackPoint),
    Timestamp(NaiveDateTime),
    HeartRate(HeartRateSample),
    Calibration(CalibrationPoint),
    Version(String),
    MapCorners(Corners),
    ImageCorners(Corners),
    MapRect(PixelRect),
    Route(quickroute::Route),
    Handles(Vec<Handle>),
    ProjectionOrigin(Coordinate),
    Laps(Vec<Lap>),
    SessionInfo(SessionInfo),
}

#[derive(Debug, Clone, Copy)]
pub struct TagEntry {
    pub id: u8,
    pub name: &'static str,
    pub rule: DecodeRule,
}

#[derive(Debug)]
pub struct TagTable {
    pub name: &'static str,
    pub entries: &'static [TagEntry],
}
impl TagTable {
    pub fn get(&self, tag: u8) -> Option<&TagEntry> {
        self.entries.iter().find(|e| e.id == tag)
    }
    pub fn classify(&self, tag: u8) -> DecodeRule {
        self.get(tag).map(|e| e.rule).unwrap_or(DecodeRule::Unknown)
    }
    pub fn name_of(&self, tag: u8) -> Option<&'static str> {
        self.get(tag).map(|e| e.name)
    }
}

macro_rules! declare_layouts {
    ($($layout:ident => ($str:literal, $table:path)),*,) => {
        /// Tag numbering in use inside a segment.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub enum Layout {
            #[default]
            $($layout,)*
        }
        impl Layout {
            pub const ALL: &'static [Layout] = &[$(Layout::$layout,)*];
            pub fn table(self) -> &'static TagTable {
                match self {
                    $(Layout::$layout => &$table,)*
                }
            }
        }
        impl std::fmt::Display for Layout {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Layout::$layout => f.write_str($str),)*
                }
            }
        }
        impl std::str::FromStr for Layout {
            type Err = String;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().as_str() {
                    $($str => Ok(Layout::$layout),)*
                    other => Err(format!("unknown layout: {other}")),
                }
            }
        }
    };
}

declare_layouts! {
    Samples    => ("samples",    samples::TAGS),
    QuickRoute => ("quickroute", quickroute::TAGS),
}

impl Layout {
    pub fn classify(self, tag: u8) -> DecodeRule {
        self.table().classify(tag)
    }
    pub fn tag_name(self, tag: u8) -> Option<&'static str> {
        self.table().name_of(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(r: DecodeRule) -> &'static str {
        match r {
            DecodeRule::Terminal(_)   => "terminal",
            DecodeRule::Nested        => "nested",
            DecodeRule::CountedNested => "counted",
            DecodeRule::Unknown       => "unknown",
        }
    }

    #[test]
    fn samples_table_is_exhaustive() {
        for tag in 0..=255u8 {
            let expected = match tag {
                0x01..=0x04 => "terminal",
                0x05 => "nested",
                _ => "unknown",
            };
            assert_eq!(kind(Layout::Samples.classify(tag)), expected, "tag {tag:#04x}");
        }
    }

    #[test]
    fn quickroute_table_is_exhaustive() {
        for tag in 0..=255u8 {
            let expected = match tag {
                1..=4 | 7..=11 => "terminal",
                5 => "counted",
                6 => "nested",
                _ => "unknown",
            };
            assert_eq!(kind(Layout::QuickRoute.classify(tag)), expected, "tag {tag}");
        }
        assert_eq!(Layout::QuickRoute.tag_name(12), Some("MapReadingInfo"));
        assert_eq!(Layout::QuickRoute.tag_name(13), None);
    }

    #[test]
    fn tag_ids_are_unique() {
        for layout in Layout::ALL {
            let entries = layout.table().entries;
            for (i, a) in entries.iter().enumerate() {
                assert!(entries[i + 1..].iter().all(|b| b.id != a.id), "{layout}: duplicate tag {}", a.id);
            }
        }
    }

    #[test]
    fn layout_names() {
        assert_eq!("QuickRoute".parse::<Layout>(), Ok(Layout::QuickRoute));
        assert_eq!("samples".parse::<Layout>(), Ok(Layout::Samples));
        assert!("gpx".parse::<Layout>().is_err());
        assert_eq!(Layout::QuickRoute.to_string(), "quickroute");
        assert_eq!(Layout::QuickRoute.table().name, "quickroute");
        assert_eq!(Layout::default(), Layout::Samples);
    }
}
