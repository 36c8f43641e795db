// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use crate::decoder::{ NodeBody, RecordNode };
use crate::layouts::samples::{ self, Tag };
use crate::session::RouteSession;
use crate::tlv::write_record;

/// Writes a record tree back to segment bytes. Terminal values are written
/// from their raw payload, so any tree read from a segment reproduces it exactly.
pub fn encode_tree(nodes: &[RecordNode]) -> Vec<u8> {
    let mut buf = Vec::new();
    for node in nodes {
        match &node.body {
            NodeBody::Value { raw, .. } => write_record(&mut buf, node.tag, raw),
            NodeBody::Unknown(raw)      => write_record(&mut buf, node.tag, raw),
            NodeBody::Children { count, children } => {
                let mut payload = count.map(|c| c.to_le_bytes().to_vec()).unwrap_or_default();
                payload.extend(encode_tree(children));
                write_record(&mut buf, node.tag, &payload);
            }
        }
    }
    buf
}

/// Writes a session in the sample layout, in canonical order: each track
/// point followed by its time, then heart rate samples, calibration points
/// and unknown records.
pub fn encode_samples(session: &RouteSession) -> Vec<u8> {
    let mut buf = Vec::new();
    let times = session.timestamps();
    for (i, p) in session.track_points().iter().enumerate() {
        write_record(&mut buf, Tag::TrackPoint, &samples::track_point_payload(p));
        if let Some(t) = times.get(i) {
            write_record(&mut buf, Tag::Timestamp, &samples::timestamp_payload(t));
        }
    }
    for s in session.heart_rate_samples() {
        write_record(&mut buf, Tag::HeartRate, &samples::heart_rate_payload(s));
    }
    for c in session.calibration_points() {
        write_record(&mut buf, Tag::CalibrationPoint, &samples::calibration_point_payload(c));
    }
    for u in session.unknown_records() {
        write_record(&mut buf, u.tag, &u.bytes);
    }
    buf
}
