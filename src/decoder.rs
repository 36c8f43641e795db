// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::{ DecodeError, FieldError };
use crate::layouts::quickroute;
use crate::session::*;
use crate::tags::{ DecodeRule, Field, Layout };
use crate::tlv::{ HEADER_SIZE, Next, Record, TlvReader };
use crate::util;

pub const DEFAULT_MAX_DEPTH: usize = 32;

/// Longest zero tail taken as padding. Four zero bytes may be a zero-length
/// record cut short before its last length byte.
pub const MAX_PADDING: usize = HEADER_SIZE - 2;

/// What to do with zero padding at the end of the segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrailingBytes {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecoderConfig {
    pub layout: Layout,
    /// Deepest allowed nesting. The top-level sequence is depth 0.
    pub max_depth: usize,
    pub trailing: TrailingBytes,
}
impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            layout: Layout::Samples,
            max_depth: DEFAULT_MAX_DEPTH,
            trailing: TrailingBytes::Lenient,
        }
    }
}
impl DecoderConfig {
    /// Configuration for segments written by the QuickRoute exporter.
    pub fn quickroute() -> Self {
        Self { layout: Layout::QuickRoute, ..Default::default() }
    }
    pub fn with_layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
    pub fn strict(mut self, strict: bool) -> Self {
        self.trailing = if strict { TrailingBytes::Strict } else { TrailingBytes::Lenient };
        self
    }
}

/// Owned copy of one record and, for nested rules, its children.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordNode {
    pub tag: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<&'static str>,
    pub offset: usize,
    pub body: NodeBody,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeBody {
    Value {
        #[serde(with = "util::base64_bytes")]
        raw: Vec<u8>,
        value: Field,
    },
    Unknown(#[serde(with = "util::base64_bytes")] Vec<u8>),
    Children {
        #[serde(skip_serializing_if = "Option::is_none")]
        count: Option<u32>,
        children: Vec<RecordNode>,
    },
}

/// Receives records in traversal order.
trait Visitor {
    fn terminal(&mut self, record: &Record, field: Field) -> Result<(), DecodeError>;
    fn unknown(&mut self, record: &Record);
    fn enter(&mut self, _record: &Record, _count: Option<u32>) {}
    fn leave(&mut self, _record: &Record) {}
}

pub struct SegmentDecoder {
    config: DecoderConfig,
}

impl SegmentDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decodes a whole segment, starting at its first tag byte.
    pub fn decode(&self, payload: &[u8]) -> Result<RouteSession, DecodeError> {
        log::debug!("Decoding {} bytes, {} layout", payload.len(), self.config.layout.table().name);
        let mut builder = SessionBuilder::new(self.config.layout);
        self.walk(&mut ByteCursor::new(payload), 0, &mut builder)?;
        let session = builder.finish()?;
        log::debug!("Decoded {} track points, {} timestamps, {} heart rate samples, {} calibration points, {} unknown records",
            session.track_points.len(), session.timestamps.len(), session.heart_rate_samples.len(),
            session.calibration_points.len(), session.unknown_records.len());
        Ok(session)
    }

    /// Decodes a segment into its record tree, without folding.
    pub fn read_tree(&self, payload: &[u8]) -> Result<Vec<RecordNode>, DecodeError> {
        let mut builder = TreeBuilder { layout: self.config.layout, levels: vec![Vec::new()], open: Vec::new() };
        self.walk(&mut ByteCursor::new(payload), 0, &mut builder)?;
        Ok(builder.levels.pop().unwrap_or_default())
    }

    /// Reads sibling records until the cursor is exhausted, recursing into
    /// nested ones. Returns the number of records at this level.
    fn walk<V: Visitor>(&self, cursor: &mut ByteCursor, depth: usize, visitor: &mut V) -> Result<usize, DecodeError> {
        let table = self.config.layout.table();
        let mut count = 0;
        loop {
            if depth == 0 && self.skip_padding(cursor)? {
                break;
            }
            let record = match TlvReader::next(cursor)? {
                Next::EndOfSegment => break,
                Next::Record(r) => r,
            };
            count += 1;

            let rule = table.classify(record.tag);
            log::trace!("{:>width$}tag: {} ({}), bytes: {}, offset: {}", "", record.tag, table.name_of(record.tag).unwrap_or("?"), record.len(), record.offset, width = depth * 2);

            match rule {
                DecodeRule::Terminal(decode) => {
                    let field = decode(&mut record.cursor()).map_err(|e| e.into_decode_error(record.tag))?;
                    visitor.terminal(&record, field)?;
                }
                DecodeRule::Nested | DecodeRule::CountedNested => {
                    if depth + 1 > self.config.max_depth {
                        return Err(DecodeError::SegmentTooDeep { offset: record.offset, max_depth: self.config.max_depth });
                    }
                    let mut inner = record.cursor();
                    let expected = match rule {
                        DecodeRule::CountedNested => Some(inner.read_u32().map_err(|e| FieldError::from(e).into_decode_error(record.tag))?),
                        _ => None,
                    };
                    visitor.enter(&record, expected);
                    let found = self.walk(&mut inner, depth + 1, visitor)?;
                    if let Some(expected) = expected {
                        if found != expected as usize {
                            return Err(DecodeError::MalformedField {
                                tag: record.tag,
                                offset: record.offset,
                                reason: format!("declares {expected} records, contains {found}"),
                            });
                        }
                    }
                    visitor.leave(&record);
                }
                DecodeRule::Unknown => visitor.unknown(&record),
            }
        }
        Ok(count)
    }

    /// Up to [`MAX_PADDING`] zero bytes at the end of the segment.
    fn skip_padding(&self, cursor: &mut ByteCursor) -> Result<bool, DecodeError> {
        let rest = cursor.rest();
        if rest.is_empty() || rest.len() > MAX_PADDING || rest.iter().any(|&b| b != 0) {
            return Ok(false);
        }
        match self.config.trailing {
            TrailingBytes::Lenient => {
                cursor.skip(rest.len())?;
                Ok(true)
            }
            TrailingBytes::Strict => Err(DecodeError::UnexpectedTrailingBytes { offset: cursor.position(), count: rest.len() }),
        }
    }
}

struct SessionBuilder {
    layout: Layout,
    session: RouteSession,
    // Tag and offset of the last record that added timestamps.
    last_time_record: Option<(u8, usize)>,
    // Whether the last entry of `metadata.sessions` still takes records.
    session_open: bool,
}

impl SessionBuilder {
    fn new(layout: Layout) -> Self {
        Self { layout, session: RouteSession::default(), last_time_record: None, session_open: false }
    }

    fn is_session_record(&self, record: &Record) -> bool {
        self.layout == Layout::QuickRoute && record.tag == quickroute::Tag::Session
    }

    fn open_session(&mut self) {
        let start = self.session.track_points.len();
        self.session.metadata.sessions.push(SessionData { track_points: start..start, ..Default::default() });
        self.session_open = true;
    }

    /// Session taking the current records. Records outside any `Session`
    /// record share one implicit session until the next real one starts.
    fn current_session(&mut self) -> &mut SessionData {
        if !self.session_open || self.session.metadata.sessions.is_empty() {
            self.open_session();
        }
        let sessions = &mut self.session.metadata.sessions;
        let last = sessions.len() - 1;
        &mut sessions[last]
    }

    fn fold_route(&mut self, route: quickroute::Route) {
        let start = self.session.track_points.len();
        let s = &mut self.session;
        for segment in route.segments {
            s.metadata.segments.push(s.track_points.len());
            for wp in segment {
                if let Some(pos) = wp.position {
                    s.track_points.push(TrackPoint { latitude: pos.lat, longitude: pos.lon, altitude: wp.altitude.map(f64::from) });
                    if let Some(t) = wp.time {
                        s.timestamps.push(t);
                    }
                }
                if let (Some(time), Some(bpm)) = (wp.time, wp.heart_rate) {
                    s.heart_rate_samples.push(HeartRateSample { time, bpm });
                }
            }
        }
        let end = self.session.track_points.len();
        let current = self.current_session();
        if current.track_points.is_empty() {
            current.track_points = start..start;
        }
        current.track_points.end = end;
    }

    fn finish(mut self) -> Result<RouteSession, DecodeError> {
        let s = &mut self.session;
        if !s.timestamps.is_empty() && s.timestamps.len() != s.track_points.len() {
            let (tag, offset) = self.last_time_record.unwrap_or_default();
            return Err(DecodeError::MalformedField {
                tag,
                offset,
                reason: format!("{} timestamps for {} track points", s.timestamps.len(), s.track_points.len()),
            });
        }
        if s.calibration_points.is_empty() {
            if let (Some(c), Some(r)) = (s.metadata.map_corners, s.metadata.map_rect) {
                let (x0, y0) = (r.x as f64, r.y as f64);
                let (x1, y1) = (x0 + r.width as f64, y0 + r.height as f64);
                s.calibration_points = [(c.nw, (x0, y0)), (c.ne, (x1, y0)), (c.se, (x1, y1)), (c.sw, (x0, y1))]
                    .into_iter()
                    .map(|(geo, px)| CalibrationPoint { image_pixel: px, map_coordinate: (geo.lat, geo.lon) })
                    .collect();
            }
        }
        Ok(self.session)
    }
}

impl Visitor for SessionBuilder {
    fn terminal(&mut self, record: &Record, field: Field) -> Result<(), DecodeError> {
        let s = &mut self.session;
        match field {
            Field::TrackPoint(p)       => s.track_points.push(p),
            Field::Timestamp(t)        => { s.timestamps.push(t); self.last_time_record = Some((record.tag, record.offset)); }
            Field::HeartRate(h)        => s.heart_rate_samples.push(h),
            Field::Calibration(c)      => s.calibration_points.push(c),
            Field::Version(v)          => s.metadata.version = Some(v),
            Field::MapCorners(c)       => s.metadata.map_corners = Some(c),
            Field::ImageCorners(c)     => s.metadata.image_corners = Some(c),
            Field::MapRect(r)          => s.metadata.map_rect = Some(r),
            Field::Handles(h)          => self.current_session().handles.extend(h),
            Field::ProjectionOrigin(p) => self.current_session().projection_origin = Some(p),
            Field::Laps(l)             => self.current_session().laps.extend(l),
            Field::SessionInfo(i)      => self.current_session().info = Some(i),
            Field::Route(r) => {
                if r.has(quickroute::RouteAttr::Time) {
                    self.last_time_record = Some((record.tag, record.offset));
                }
                self.fold_route(r);
            }
        }
        Ok(())
    }

    fn enter(&mut self, record: &Record, _count: Option<u32>) {
        if self.is_session_record(record) {
            self.open_session();
        }
    }
    fn leave(&mut self, record: &Record) {
        if self.is_session_record(record) {
            self.session_open = false;
        }
    }

    fn unknown(&mut self, record: &Record) {
        log::trace!("Unknown tag {} at offset {}:\n{}", record.tag, record.offset, pretty_hex::pretty_hex(&record.payload));
        self.session.unknown_records.push(UnknownRecord { tag: record.tag, bytes: record.payload.to_vec() });
    }
}

struct TreeBuilder {
    layout: Layout,
    levels: Vec<Vec<RecordNode>>,
    open: Vec<Option<u32>>,
}

impl TreeBuilder {
    fn push(&mut self, node: RecordNode) {
        if let Some(level) = self.levels.last_mut() {
            level.push(node);
        }
    }
    fn node(&self, record: &Record, body: NodeBody) -> RecordNode {
        RecordNode { tag: record.tag, name: self.layout.tag_name(record.tag), offset: record.offset, body }
    }
}

impl Visitor for TreeBuilder {
    fn terminal(&mut self, record: &Record, field: Field) -> Result<(), DecodeError> {
        let node = self.node(record, NodeBody::Value { raw: record.payload.to_vec(), value: field });
        self.push(node);
        Ok(())
    }
    fn unknown(&mut self, record: &Record) {
        let node = self.node(record, NodeBody::Unknown(record.payload.to_vec()));
        self.push(node);
    }
    fn enter(&mut self, _record: &Record, count: Option<u32>) {
        self.open.push(count);
        self.levels.push(Vec::new());
    }
    fn leave(&mut self, record: &Record) {
        let children = self.levels.pop().unwrap_or_default();
        let count = self.open.pop().flatten();
        let node = self.node(record, NodeBody::Children { count, children });
        self.push(node);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layouts::samples::{ self, Tag };
    use crate::tlv::write_record;

    fn point(lat: f64, lon: f64) -> Vec<u8> {
        let mut buf = Vec::new();
        write_record(&mut buf, Tag::TrackPoint, &samples::track_point_payload(&TrackPoint::new(lat, lon)));
        buf
    }

    fn nest(depth: usize, leaf: &[u8]) -> Vec<u8> {
        let mut buf = leaf.to_vec();
        for _ in 0..depth {
            let mut outer = Vec::new();
            write_record(&mut outer, Tag::Group, &buf);
            buf = outer;
        }
        buf
    }

    #[test]
    fn depth_limit_is_inclusive() {
        let decoder = SegmentDecoder::new(DecoderConfig::default().with_max_depth(4));
        let ok = decoder.decode(&nest(4, &point(1.0, 2.0))).unwrap();
        assert_eq!(ok.track_points(), &[TrackPoint::new(1.0, 2.0)]);

        let err = decoder.decode(&nest(5, &point(1.0, 2.0))).unwrap_err();
        // Fifth group starts after four headers
        assert_eq!(err, DecodeError::SegmentTooDeep { offset: 4 * HEADER_SIZE, max_depth: 4 });
    }

    #[test]
    fn zero_depth_rejects_any_group() {
        let decoder = SegmentDecoder::new(DecoderConfig::default().with_max_depth(0));
        assert!(decoder.decode(&point(1.0, 2.0)).is_ok());
        assert!(matches!(decoder.decode(&nest(1, &[])), Err(DecodeError::SegmentTooDeep { offset: 0, .. })));
    }

    #[test]
    fn padding_lenient_and_strict() {
        let mut buf = point(1.0, 2.0);
        buf.extend_from_slice(&[0, 0, 0]);

        let lenient = SegmentDecoder::new(DecoderConfig::default());
        assert_eq!(lenient.decode(&buf).unwrap().track_points().len(), 1);

        let strict = SegmentDecoder::new(DecoderConfig::default().strict(true));
        assert_eq!(strict.decode(&buf), Err(DecodeError::UnexpectedTrailingBytes { offset: 21, count: 3 }));

        // Non-zero fragments are a truncated record in both modes
        buf.pop();
        buf.push(7);
        assert!(matches!(lenient.decode(&buf), Err(DecodeError::TruncatedInput { .. })));
        assert!(matches!(strict.decode(&buf), Err(DecodeError::TruncatedInput { .. })));
    }

    #[test]
    fn four_zero_bytes_are_a_cut_record() {
        let mut buf = point(1.0, 2.0);
        buf.extend_from_slice(&[0, 0, 0, 0]);
        for config in [DecoderConfig::default(), DecoderConfig::default().strict(true)] {
            let err = SegmentDecoder::new(config).decode(&buf).unwrap_err();
            assert_eq!(err, DecodeError::TruncatedInput { offset: 22, needed: 4, available: 3 });
        }
    }

    #[test]
    fn nested_padding_is_not_skipped() {
        let buf = nest(1, &[0, 0]);
        let decoder = SegmentDecoder::new(DecoderConfig::default());
        assert!(matches!(decoder.decode(&buf), Err(DecodeError::TruncatedInput { offset: 6, .. })));
    }

    #[test]
    fn malformed_field_carries_tag_and_offset() {
        let mut buf = point(1.0, 2.0);
        write_record(&mut buf, Tag::TrackPoint, &[0u8; 15]);
        let err = SegmentDecoder::new(DecoderConfig::default()).decode(&buf).unwrap_err();
        assert!(matches!(err, DecodeError::MalformedField { tag: Tag::TrackPoint, offset: 26, .. }), "{err:?}");
    }

    #[test]
    fn timestamps_must_match_track_points() {
        let t = util::dotnet_epoch() + chrono::TimeDelta::days(733000);
        let mut buf = point(1.0, 2.0);
        write_record(&mut buf, Tag::Timestamp, &samples::timestamp_payload(&t));
        buf.extend(point(1.5, 2.5));

        let decoder = SegmentDecoder::new(DecoderConfig::default());
        assert!(matches!(decoder.decode(&buf), Err(DecodeError::MalformedField { tag: Tag::Timestamp, offset: 21, .. })));

        write_record(&mut buf, Tag::Timestamp, &samples::timestamp_payload(&t));
        assert_eq!(decoder.decode(&buf).unwrap().timestamps(), &[t, t]);
    }

    #[test]
    fn session_records_outside_a_session_share_one_entry() {
        let origin = Coordinate { lat: 1.0, lon: 2.0 };
        let mut buf = Vec::new();
        write_record(&mut buf, quickroute::Tag::Laps, &quickroute::laps_payload(&[]));
        write_record(&mut buf, quickroute::Tag::ProjectionOrigin, &quickroute::coordinate_payload(&origin));
        write_record(&mut buf, quickroute::Tag::Session, &[]);

        let session = SegmentDecoder::new(DecoderConfig::quickroute()).decode(&buf).unwrap();
        let sessions = &session.metadata().sessions;
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].projection_origin, Some(origin));
        assert_eq!(sessions[1], SessionData::default());
    }

    #[test]
    fn tree_keeps_structure() {
        let mut inner = point(1.0, 2.0);
        write_record(&mut inner, 0xfe, &[9, 8]);
        let mut buf = nest(1, &inner);
        write_record(&mut buf, 0x99, &[]);

        let tree = SegmentDecoder::new(DecoderConfig::default()).read_tree(&buf).unwrap();
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].name, Some("Group"));
        let NodeBody::Children { count: None, children } = &tree[0].body else { panic!() };
        assert_eq!(children.len(), 2);
        assert!(matches!(&children[0].body, NodeBody::Value { value: Field::TrackPoint(_), .. }));
        assert_eq!(children[1].body, NodeBody::Unknown(vec![9, 8]));
        assert_eq!(children[1].offset, HEADER_SIZE + 21);
        assert_eq!(tree[1].body, NodeBody::Unknown(vec![]));
    }
}
