// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright © 2021 Adrian <adrian.eddy at gmail>

use std::io::Write;
use std::process::ExitCode;

use argh::FromArgs;
use quickroute_parser::export::{ self, Format };
use quickroute_parser::*;

/** quickroute v0.1.0
Dump the route embedded in a QuickRoute JPEG map as JSON, YAML, GPX, KML, GeoJSON or CSV
*/
#[derive(FromArgs)]
struct Opts {
    /// input file
    #[argh(positional)]
    file: String,

    /// output format: json, yaml, gpx, kml, geojson, csv (default json)
    #[argh(option, short = 'f', default = "Format::Json")]
    format: Format,

    /// record layout: quickroute, samples (default quickroute)
    #[argh(option, default = "Layout::QuickRoute")]
    layout: Layout,

    /// fail on zero padding at the end of the data
    #[argh(switch)]
    strict: bool,

    /// maximum nesting depth (default 32)
    #[argh(option, default = "decoder::DEFAULT_MAX_DEPTH")]
    max_depth: usize,

    /// input is the bare route data instead of a JPEG file
    #[argh(switch)]
    raw: bool,

    /// dump the record tree instead of the decoded route
    #[argh(switch)]
    tree: bool,

    /// log level: debug, info, warning (default info)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    log_level: String,
}

fn run(opts: &Opts) -> Result<(), Error> {
    let config = DecoderConfig::default()
        .with_layout(opts.layout)
        .with_max_depth(opts.max_depth)
        .strict(opts.strict);

    let data = if opts.raw {
        std::fs::read(&opts.file)?
    } else {
        let mut stream = std::fs::File::open(&opts.file)?;
        jpeg::extract_quickroute(&mut stream)?.ok_or(Error::NotFound)?
    };
    log::info!("{}: {} bytes of route data", opts.file, data.len());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    if opts.tree {
        let tree = SegmentDecoder::new(config).read_tree(&data)?;
        serde_json::to_writer_pretty(&mut out, &tree)?;
        writeln!(out)?;
        return Ok(());
    }

    let session = SegmentDecoder::new(config).decode(&data)?;
    if !session.unknown_records().is_empty() {
        log::warn!("{} unhandled records: {:?}", session.unknown_records().len(),
            session.unknown_records().iter().map(|r| r.tag).collect::<Vec<_>>());
    }
    export::write(&session, opts.format, &mut out)?;
    Ok(())
}

fn main() -> ExitCode {
    let opts: Opts = argh::from_env();

    let level = match opts.log_level.to_ascii_lowercase().as_str() {
        "debug" => log::LevelFilter::Debug,
        "warning" | "warn" => log::LevelFilter::Warn,
        _ => log::LevelFilter::Info,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match run(&opts) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}: {}", opts.file, e);
            ExitCode::FAILURE
        }
    }
}
