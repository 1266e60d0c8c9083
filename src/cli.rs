//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

/// Download one URL as a single resilient stream.
///
/// Redirects, retries, mid-transfer reconnects and content decoding are
/// handled transparently; the body goes to stdout or `--output`.
#[derive(Parser, Debug)]
#[command(name = "streamget")]
#[command(author, version, about)]
pub struct Args {
    /// URL to download
    pub url: String,

    /// Write the body to FILE instead of stdout
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Read defaults from this config file instead of the standard location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Redirects to follow before failing (0-50)
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=50))]
    pub max_redirects: Option<u32>,

    /// Retries before any data arrives (0-100)
    #[arg(short = 'r', long, value_parser = clap::value_parser!(u32).range(0..=100))]
    pub max_retries: Option<u32>,

    /// Reconnects after data has arrived (0-1000); enables range resume
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..=1000))]
    pub max_reconnects: Option<u32>,

    /// Backoff increment per retry in milliseconds (0-600000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=600_000))]
    pub backoff_inc_ms: Option<u64>,

    /// Backoff cap in milliseconds (0-3600000)
    #[arg(long, value_parser = clap::value_parser!(u64).range(0..=3_600_000))]
    pub backoff_max_ms: Option<u64>,

    /// Events buffered ahead of the writer (1-4096)
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..=4096))]
    pub high_water_mark: Option<u32>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header", value_name = "HEADER", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Byte range to request, e.g. `bytes=100-` or `0-499`
    #[arg(long, value_name = "RANGE")]
    pub range: Option<String>,

    /// Send HEAD instead of GET
    #[arg(long)]
    pub head: bool,

    /// Do not decode gzip/deflate bodies
    #[arg(long)]
    pub raw: bool,

    /// Connect timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub connect_timeout: Option<u64>,

    /// Read timeout in seconds (1-3600)
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub read_timeout: Option<u64>,

    /// Print lifecycle events as JSON lines on stderr
    #[arg(long)]
    pub events: bool,
}

impl Args {
    /// `Range` header value for `--range`, accepting a bare `start-end`.
    #[must_use]
    pub fn range_header(&self) -> Option<String> {
        let range = self.range.as_deref()?.trim();
        if range.starts_with("bytes=") {
            Some(range.to_string())
        } else {
            Some(format!("bytes={range}"))
        }
    }
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let Some((name, value)) = raw.split_once(':') else {
        return Err(format!("expected `Name: value`, got `{raw}`"));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err("header name must not be empty".to_string());
    }
    Ok((name.to_string(), value.trim().to_string()))
}
