// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use std::fmt::Write as _;
use std::io::Write;

use chrono::{ NaiveDateTime, SecondsFormat };
use serde::Serialize;
use serde_json::json;

use crate::error::Result;
use crate::session::{ RouteSession, TrackPoint };

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Json,
    Yaml,
    Gpx,
    Kml,
    GeoJson,
    Csv,
}
impl std::str::FromStr for Format {
    type Err = String;
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "json"    => Format::Json,
            "yaml"    => Format::Yaml,
            "gpx"     => Format::Gpx,
            "kml"     => Format::Kml,
            "geojson" => Format::GeoJson,
            "csv"     => Format::Csv,
            other => return Err(format!("unsupported format: {other}")),
        })
    }
}

pub fn write<W: Write>(session: &RouteSession, format: Format, mut w: W) -> Result<()> {
    match format {
        Format::Json    => { serde_json::to_writer_pretty(&mut w, session)?; writeln!(w)?; }
        Format::Yaml    => serde_yaml::to_writer(&mut w, session)?,
        Format::Gpx     => w.write_all(to_gpx(session).as_bytes())?,
        Format::Kml     => w.write_all(to_kml(session).as_bytes())?,
        Format::GeoJson => { serde_json::to_writer_pretty(&mut w, &to_geojson(session))?; writeln!(w)?; }
        Format::Csv     => write_csv(session, w)?,
    }
    Ok(())
}

fn utc(t: &NaiveDateTime) -> String {
    t.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn escape_xml(s: &str) -> String {
    let mut ret = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&'  => ret.push_str("&amp;"),
            '<'  => ret.push_str("&lt;"),
            '>'  => ret.push_str("&gt;"),
            '"'  => ret.push_str("&quot;"),
            '\'' => ret.push_str("&apos;"),
            c => ret.push(c),
        }
    }
    ret
}

fn track_name(session: &RouteSession) -> Option<&str> {
    session.metadata().sessions.iter().find_map(|s| s.name())
}

const GPX_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<gpx version="1.1" creator="quickroute-parser" xmlns="http://www.topografix.com/GPX/1/1" xmlns:gpxtpx="http://www.garmin.com/xmlschemas/TrackPointExtension/v1">
<trk>
"#;
const GPX_END: &str = "</trk>\n</gpx>\n";

pub fn to_gpx(session: &RouteSession) -> String {
    let points = session.track_points();
    let times = session.timestamps();
    let heart_rate = session.heart_rate_index();

    let mut ret = String::from(GPX_HEAD);
    if let Some(name) = track_name(session) {
        let _ = writeln!(ret, "  <name>{}</name>", escape_xml(name));
    }
    for range in session.segment_ranges() {
        ret.push_str("  <trkseg>\n");
        for i in range {
            let p = &points[i];
            let _ = writeln!(ret, "    <trkpt lat=\"{}\" lon=\"{}\">", p.latitude, p.longitude);
            if let Some(alt) = p.altitude {
                let _ = writeln!(ret, "      <ele>{}</ele>", alt);
            }
            if let Some(t) = times.get(i) {
                let _ = writeln!(ret, "      <time>{}</time>", utc(t));
                if let Some(hr) = heart_rate.at(t) {
                    let _ = writeln!(ret, "      <extensions><gpxtpx:TrackPointExtension><gpxtpx:hr>{}</gpxtpx:hr></gpxtpx:TrackPointExtension></extensions>", hr);
                }
            }
            ret.push_str("    </trkpt>\n");
        }
        ret.push_str("  </trkseg>\n");
    }
    ret.push_str(GPX_END);
    ret
}

const KML_HEAD: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
<Document>
"#;
const KML_END: &str = "</Document>\n</kml>\n";

pub fn to_kml(session: &RouteSession) -> String {
    let mut ret = String::from(KML_HEAD);
    if let Some(name) = track_name(session) {
        let _ = writeln!(ret, " <name>{}</name>", escape_xml(name));
    }
    for segment in session.segments() {
        ret.push_str(" <Placemark>\n  <LineString>\n   <coordinates>\n");
        for p in segment {
            match p.altitude {
                Some(alt) => { let _ = writeln!(ret, "    {},{},{}", p.longitude, p.latitude, alt); }
                None      => { let _ = writeln!(ret, "    {},{}", p.longitude, p.latitude); }
            }
        }
        ret.push_str("   </coordinates>\n  </LineString>\n </Placemark>\n");
    }
    ret.push_str(KML_END);
    ret
}

fn position(p: &TrackPoint) -> serde_json::Value {
    match p.altitude {
        Some(alt) => json!([p.longitude, p.latitude, alt]),
        None      => json!([p.longitude, p.latitude]),
    }
}

/// One feature holding the track; times and heart rates run parallel to the
/// coordinates in its properties.
pub fn to_geojson(session: &RouteSession) -> serde_json::Value {
    let points = session.track_points();
    let times = session.timestamps();
    let ranges = session.segment_ranges();
    let heart_rate = session.heart_rate_index();

    let coords: Vec<Vec<serde_json::Value>> = ranges.iter().map(|r| points[r.clone()].iter().map(position).collect()).collect();
    let coord_times: Vec<Vec<String>> = ranges.iter().map(|r| times.get(r.clone()).unwrap_or_default().iter().map(utc).collect()).collect();
    let heart_rates: Vec<Vec<Option<u8>>> = ranges.iter().map(|r| {
        times.get(r.clone()).unwrap_or_default().iter().map(|t| heart_rate.at(t)).collect()
    }).collect();

    let (geometry, coord_times, heart_rates) = if ranges.len() == 1 {
        (json!({ "type": "LineString", "coordinates": coords[0] }), json!(coord_times[0]), json!(heart_rates[0]))
    } else {
        (json!({ "type": "MultiLineString", "coordinates": coords }), json!(coord_times), json!(heart_rates))
    };

    let mut properties = json!({ "coordTimes": coord_times });
    if !session.heart_rate_samples().is_empty() {
        properties["heartRates"] = heart_rates;
    }
    if let Some(name) = track_name(session) {
        properties["name"] = json!(name);
    }

    json!({
        "type": "FeatureCollection",
        "features": [{
            "type": "Feature",
            "geometry": geometry,
            "properties": properties,
        }]
    })
}

#[derive(Serialize)]
struct CsvRow {
    time: Option<String>,
    latitude: f64,
    longitude: f64,
    altitude: Option<f64>,
    distance: f64,
    heart_rate: Option<u8>,
}

pub fn write_csv<W: Write>(session: &RouteSession, w: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(w);
    let times = session.timestamps();
    let heart_rate = session.heart_rate_index();
    for (i, (p, distance)) in session.track_points().iter().zip(session.distances()).enumerate() {
        let time = times.get(i);
        wtr.serialize(CsvRow {
            time: time.map(utc),
            latitude: p.latitude,
            longitude: p.longitude,
            altitude: p.altitude,
            distance,
            heart_rate: time.and_then(|t| heart_rate.at(t)),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
