//! CLI tool for xlmerge - renders an XLSX template against JSON data
//!
//! Usage:
//!   xlmerge_cli <template.xlsx> <data.json>                 # Write merged.xlsx
//!   xlmerge_cli <template.xlsx> <data.json> -o out.xlsx     # Choose the output path
//!   xlmerge_cli <template.xlsx> <records.json> --multi-file # One workbook per record, zipped
//!   xlmerge_cli <template.xlsx> <data.json> --options opts.json
//!
//! `data.json` holds either one object (merged in place) or an array of
//! `{ "name": ..., "data": {...} }` records (one sheet per record).
//! Set `RUST_LOG=xlmerge=debug` for progress output on stderr.

#![allow(clippy::exit)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::indexing_slicing)]

use std::env;
use std::fs;
use std::process;

use serde_json::Value;
use tracing_subscriber::EnvFilter;
use xlmerge::{MergeEngine, MergeOptions, MergeRecord};

const USAGE: &str = "Usage: xlmerge_cli <template.xlsx> <data.json> [-o output] [--multi-file] [--options options.json]";

struct Args {
    template_path: String,
    data_path: String,
    output_path: Option<String>,
    options_path: Option<String>,
    multi_file: bool,
}

fn parse_args() -> Args {
    let mut positional = Vec::new();
    let mut output_path = None;
    let mut options_path = None;
    let mut multi_file = false;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-o" | "--output" => output_path = args.next(),
            "--options" => options_path = args.next(),
            "--multi-file" => multi_file = true,
            "-h" | "--help" => {
                println!("{USAGE}");
                process::exit(0);
            }
            _ => positional.push(arg),
        }
    }

    if positional.len() != 2 {
        eprintln!("{USAGE}");
        process::exit(1);
    }
    let data_path = positional.pop().unwrap();
    let template_path = positional.pop().unwrap();
    Args {
        template_path,
        data_path,
        output_path,
        options_path,
        multi_file,
    }
}

fn fail(context: &str, err: impl std::fmt::Display) -> ! {
    eprintln!("Error {context}: {err}");
    process::exit(1);
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = parse_args();

    let options = match &args.options_path {
        Some(path) => {
            let json =
                fs::read_to_string(path).unwrap_or_else(|e| fail(&format!("reading {path}"), e));
            MergeOptions::from_json(&json).unwrap_or_else(|e| fail(&format!("parsing {path}"), e))
        }
        None => MergeOptions::default(),
    };

    let template = fs::read(&args.template_path)
        .unwrap_or_else(|e| fail(&format!("reading {}", args.template_path), e));
    let data_json = fs::read_to_string(&args.data_path)
        .unwrap_or_else(|e| fail(&format!("reading {}", args.data_path), e));
    let data: Value = serde_json::from_str(&data_json)
        .unwrap_or_else(|e| fail(&format!("parsing {}", args.data_path), e));

    let engine = MergeEngine::parse_with_options(&template, options)
        .unwrap_or_else(|e| fail("parsing template", e));

    let (output, default_path) = match data {
        Value::Array(_) => {
            let records: Vec<MergeRecord> =
                serde_json::from_value(data).unwrap_or_else(|e| fail("reading records", e));
            if args.multi_file {
                (engine.bulk_render_multi_file(&records), "merged.zip")
            } else {
                (engine.bulk_render_multi_sheet(&records), "merged.xlsx")
            }
        }
        data => (engine.merge(&data), "merged.xlsx"),
    };
    let bytes = output.unwrap_or_else(|e| fail("merging", e));

    let path = args.output_path.as_deref().unwrap_or(default_path);
    if let Err(e) = fs::write(path, &bytes) {
        fail(&format!("writing {path}"), e);
    }
    eprintln!("Written: {path}");
}
