// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use chrono::{ NaiveDate, NaiveDateTime };
use hex_literal::hex;

use quickroute_parser::*;
use quickroute_parser::layouts::samples::{ self, Tag };
use quickroute_parser::tlv::{ write_record, HEADER_SIZE };
use quickroute_parser::writer;

/// Tag 0x01, length 16, lat 59.33, lon 18.07
const TRACK_POINT: [u8; 21] = hex!("01 10000000 0ad7a3703daa4d40 52b81e85eb113240");

/// Tag 0xfe, length 3
const UNKNOWN: [u8; 8] = hex!("fe 03000000 aabbcc");

fn at(m: u32, s: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2013, 5, 18).unwrap().and_hms_opt(14, m, s).unwrap()
}

fn record(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::new();
    write_record(&mut buf, tag, payload);
    buf
}

fn point(lat: f64, lon: f64) -> Vec<u8> {
    record(Tag::TrackPoint, &samples::track_point_payload(&TrackPoint::new(lat, lon)))
}

fn groups(depth: usize, leaf: &[u8]) -> Vec<u8> {
    (0..depth).fold(leaf.to_vec(), |inner, _| record(Tag::Group, &inner))
}

#[test]
fn single_track_point() {
    let session = decode(&TRACK_POINT).unwrap();
    assert_eq!(session.track_points(), &[TrackPoint::new(59.33, 18.07)]);
    assert!(session.heart_rate_samples().is_empty());
    assert!(session.unknown_records().is_empty());
    assert!(session.timestamps().is_empty());
}

#[test]
fn unknown_tag_is_kept() {
    let session = decode(&UNKNOWN).unwrap();
    assert_eq!(session.unknown_records(), &[UnknownRecord { tag: 0xfe, bytes: vec![0xaa, 0xbb, 0xcc] }]);
    assert!(session.track_points().is_empty());
    assert!(session.heart_rate_samples().is_empty());
    assert!(session.calibration_points().is_empty());
}

#[test]
fn empty_payload_is_an_empty_session() {
    let session = decode(&[]).unwrap();
    assert!(session.is_empty());
    assert_eq!(session, RouteSession::default());
}

#[test]
fn every_prefix_is_truncated() {
    assert_eq!(decode(&TRACK_POINT[..20]), Err(DecodeError::TruncatedInput { offset: 1, needed: 16, available: 15 }));
    for len in 1..TRACK_POINT.len() {
        let err = decode(&TRACK_POINT[..len]).unwrap_err();
        assert!(matches!(err, DecodeError::TruncatedInput { .. }), "prefix {len}: {err:?}");
    }
}

fn valid_segments() -> Vec<Vec<u8>> {
    let mut with_empty_tail = TRACK_POINT.to_vec();
    with_empty_tail.extend(record(0x00, &[]));

    let mut mixed = point(59.33, 18.07);
    mixed.extend(record(Tag::Timestamp, &samples::timestamp_payload(&at(0, 0))));
    mixed.extend(record(Tag::HeartRate, &samples::heart_rate_payload(&HeartRateSample { time: at(0, 0), bpm: 140 })));
    mixed.extend(UNKNOWN);

    vec![
        TRACK_POINT.to_vec(),
        UNKNOWN.to_vec(),
        record(0x00, &[]),
        record(0x00, &[0]),
        with_empty_tail,
        groups(3, &TRACK_POINT),
        groups(2, &[]),
        groups(1, &record(0x00, &[])),
        mixed,
    ]
}

#[test]
fn cutting_the_last_byte_never_decodes() {
    for strict in [false, true] {
        let config = DecoderConfig::default().strict(strict);
        for buf in valid_segments() {
            assert!(decode_with(&buf, &config).is_ok(), "{buf:02x?}");
            let err = decode_with(&buf[..buf.len() - 1], &config).unwrap_err();
            assert!(matches!(err, DecodeError::TruncatedInput { .. }), "strict: {strict}, {buf:02x?}: {err:?}");
        }
    }
}

#[test]
fn oversized_length_points_at_length_field() {
    let mut buf = TRACK_POINT.to_vec();
    buf.extend_from_slice(&hex!("01 ffffff7f 00"));
    assert_eq!(decode(&buf), Err(DecodeError::TruncatedInput { offset: 22, needed: 0x7fffffff, available: 1 }));
}

#[test]
fn heart_rate_samples_keep_arrival_order() {
    let mut buf = Vec::new();
    for i in 0..5u32 {
        buf.extend(point(59.0 + i as f64 * 0.001, 18.0));
        let sample = HeartRateSample { time: at(i, 0), bpm: 150 + i as u8 };
        buf.extend(record(Tag::HeartRate, &samples::heart_rate_payload(&sample)));
    }
    let session = decode(&buf).unwrap();
    assert_eq!(session.track_points().len(), 5);
    let bpm: Vec<u8> = session.heart_rate_samples().iter().map(|s| s.bpm).collect();
    assert_eq!(bpm, vec![150, 151, 152, 153, 154]);
    assert_eq!(session.heart_rate_samples()[4].time, at(4, 0));
}

#[test]
fn depth_limit() {
    let decoder = SegmentDecoder::new(DecoderConfig::default());
    let session = decoder.decode(&groups(decoder::DEFAULT_MAX_DEPTH, &TRACK_POINT)).unwrap();
    assert_eq!(session.track_points().len(), 1);

    let err = decoder.decode(&groups(decoder::DEFAULT_MAX_DEPTH + 1, &TRACK_POINT)).unwrap_err();
    assert_eq!(err, DecodeError::SegmentTooDeep { offset: decoder::DEFAULT_MAX_DEPTH * HEADER_SIZE, max_depth: decoder::DEFAULT_MAX_DEPTH });
}

#[test]
fn groups_fold_like_flat_records() {
    let mut flat = point(1.0, 2.0);
    flat.extend(point(3.0, 4.0));
    let mut grouped = groups(2, &point(1.0, 2.0));
    grouped.extend(groups(1, &point(3.0, 4.0)));
    assert_eq!(decode(&grouped).unwrap(), decode(&flat).unwrap());
}

#[test]
fn tree_round_trip() {
    let mut inner = point(59.33, 18.07);
    inner.extend(record(Tag::Timestamp, &samples::timestamp_payload(&at(0, 0))));
    inner.extend(UNKNOWN);
    let mut buf = groups(2, &inner);
    buf.extend(record(Tag::HeartRate, &samples::heart_rate_payload(&HeartRateSample { time: at(0, 1), bpm: 99 })));
    buf.extend(record(0x42, &[]));

    let decoder = SegmentDecoder::new(DecoderConfig::default());
    let tree = decoder.read_tree(&buf).unwrap();
    assert_eq!(tree.len(), 3);
    assert_eq!(writer::encode_tree(&tree), buf);
}

#[test]
fn sample_encoding_round_trip() {
    let mut buf = Vec::new();
    for (i, (lat, lon)) in [(59.33, 18.07), (59.34, 18.08), (59.35, 18.09)].into_iter().enumerate() {
        buf.extend(point(lat, lon));
        buf.extend(record(Tag::Timestamp, &samples::timestamp_payload(&at(1, i as u32 * 5))));
    }
    buf.extend(record(Tag::HeartRate, &samples::heart_rate_payload(&HeartRateSample { time: at(1, 3), bpm: 171 })));
    let calibration = CalibrationPoint { image_pixel: (12.0, 400.5), map_coordinate: (59.3, 18.0) };
    buf.extend(record(Tag::CalibrationPoint, &samples::calibration_point_payload(&calibration)));
    buf.extend(UNKNOWN);

    let session = decode(&buf).unwrap();
    assert_eq!(session.timestamps().len(), 3);
    assert_eq!(session.calibration_points(), &[calibration]);
    assert_eq!(writer::encode_samples(&session), buf);
}

#[test]
fn unknown_records_survive_json() {
    let mut buf = UNKNOWN.to_vec();
    buf.extend(record(0x80, &[0, 1, 2, 3, 255]));
    let session = decode(&buf).unwrap();

    let json = serde_json::to_string(&session).unwrap();
    assert!(json.contains(r#"{"tag":254,"bytes":"qrvM"}"#), "{json}");

    let back: RouteSession = serde_json::from_str(&json).unwrap();
    assert_eq!(back, session);
    assert_eq!(writer::encode_samples(&back), buf);
}

#[test]
fn trailing_zero_padding() {
    let mut buf = TRACK_POINT.to_vec();
    buf.extend_from_slice(&[0, 0, 0]);

    assert_eq!(decode(&buf).unwrap().track_points().len(), 1);

    let strict = DecoderConfig::default().strict(true);
    assert_eq!(decode_with(&buf, &strict), Err(DecodeError::UnexpectedTrailingBytes { offset: 21, count: 3 }));

    // A zero-length record with tag 0, cut before its last length byte
    buf.push(0);
    assert!(matches!(decode(&buf), Err(DecodeError::TruncatedInput { offset: 22, .. })));
}

#[test]
fn malformed_timestamp_count() {
    let mut buf = point(1.0, 2.0);
    buf.extend(point(1.0, 2.0));
    let offset = buf.len();
    buf.extend(record(Tag::Timestamp, &samples::timestamp_payload(&at(0, 0))));

    let err = decode(&buf).unwrap_err();
    assert!(matches!(err, DecodeError::MalformedField { tag: Tag::Timestamp, .. }), "{err:?}");
    assert_eq!(err.offset(), offset);
}

#[test]
fn decoding_is_deterministic() {
    let mut buf = groups(3, &TRACK_POINT);
    buf.extend(UNKNOWN);
    assert_eq!(decode(&buf), decode(&buf));
}
