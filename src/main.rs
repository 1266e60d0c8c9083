//! CLI entry point for streamget.

use std::io::{self, IsTerminal};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use streamget_core::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use streamget_core::{
    DecoderRegistry, DownloadEvent, Downloader, HttpClient, Options, Progress, TransportRegistry,
};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

mod app_config;
mod cli;
mod event_log;
mod terminal;

use app_config::FileConfig;
use cli::Args;

/// Exit status for an interrupted download (128 + SIGINT).
const EXIT_INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    terminal::init_tracing(terminal::default_log_level(args.quiet, args.verbose));
    debug!(?args, "CLI arguments parsed");

    let loaded = app_config::load_config(args.config.as_deref())?;
    if let Some(path) = &loaded.path {
        debug!(path = %path.display(), loaded = loaded.config.is_some(), "config file");
    }
    let file_config = loaded.config.unwrap_or_default();

    let options = build_options(&args, &file_config);
    let (connect_timeout, read_timeout) = client_timeouts(&args, &file_config);
    let client = HttpClient::new_with_timeouts(connect_timeout, read_timeout);
    let downloader = Downloader::with_transports(TransportRegistry::with_http(Arc::new(client)));

    info!(url = %args.url, "starting download");
    run(&args, &downloader, options).await
}

async fn run(args: &Args, downloader: &Downloader, options: Options) -> Result<ExitCode> {
    let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match &args.output {
        Some(path) => Box::new(
            tokio::fs::File::create(path)
                .await
                .with_context(|| format!("Failed to create output file '{}'", path.display()))?,
        ),
        None => Box::new(tokio::io::stdout()),
    };

    let mut stream = downloader.start(&args.url, options);

    let cancel = stream.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling download");
            cancel.cancel();
        }
    });

    let use_bar = terminal::should_use_progress_bar(
        args.output.is_some(),
        io::stderr().is_terminal(),
        args.quiet,
        terminal::is_dumb_terminal(),
    );
    let mut bar: Option<ProgressBar> = None;

    while let Some(event) = futures_util::StreamExt::next(&mut stream).await {
        if args.events {
            eprintln!("{}", event_log::render(&event));
        }

        match event {
            DownloadEvent::Response {
                status,
                content_length,
            } if use_bar && bar.is_none() && (200..300).contains(&status) => {
                bar = Some(new_progress_bar(content_length));
            }
            DownloadEvent::Data(chunk) => {
                sink.write_all(&chunk)
                    .await
                    .context("Failed to write downloaded data")?;
                if let Some(bar) = &bar {
                    bar.set_position(bar_position(&stream.progress()));
                }
            }
            DownloadEvent::Reconnect { offset, .. } => {
                info!(offset, "connection lost, resuming");
            }
            DownloadEvent::Completed { bytes_downloaded } => {
                sink.flush().await.context("Failed to flush output")?;
                if let Some(bar) = bar.take() {
                    bar.finish_and_clear();
                }
                let progress = stream.progress();
                info!(
                    bytes_downloaded,
                    bytes_written = progress.bytes_delivered,
                    "download complete"
                );
                return Ok(ExitCode::SUCCESS);
            }
            DownloadEvent::Cancelled => {
                sink.flush().await.ok();
                if let Some(bar) = bar.take() {
                    bar.abandon();
                }
                warn!("download cancelled");
                return Ok(ExitCode::from(EXIT_INTERRUPTED));
            }
            DownloadEvent::Error(error) => {
                sink.flush().await.ok();
                if let Some(bar) = bar.take() {
                    bar.abandon();
                }
                return Err(anyhow::Error::new(error)
                    .context(format!("Download of {} failed", args.url)));
            }
            _ => {}
        }
    }

    anyhow::bail!("Download of {} ended without a result", args.url)
}

/// The bar total is the raw `Content-Length`, so it tracks raw bytes too.
fn bar_position(progress: &Progress) -> u64 {
    progress.bytes_downloaded
}

fn new_progress_bar(content_length: Option<u64>) -> ProgressBar {
    match content_length {
        Some(length) => {
            let bar = ProgressBar::new(length);
            bar.set_style(
                ProgressStyle::with_template("{bar:40} {bytes}/{total_bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar()),
            );
            bar
        }
        None => {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(
                ProgressStyle::with_template("{spinner} {bytes} ({bytes_per_sec})")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        }
    }
}

/// Merges CLI flags over the config file over library defaults.
fn build_options(args: &Args, file: &FileConfig) -> Options {
    let defaults = Options::default();
    let inc = args
        .backoff_inc_ms
        .or(file.backoff_inc_ms)
        .map_or(defaults.backoff.inc, Duration::from_millis);
    let max = args
        .backoff_max_ms
        .or(file.backoff_max_ms)
        .map_or(defaults.backoff.max, Duration::from_millis);
    let high_water_mark = args
        .high_water_mark
        .or(file.high_water_mark)
        .map_or(defaults.high_water_mark, |value| {
            usize::try_from(value).unwrap_or(defaults.high_water_mark)
        });

    let mut options = Options::default()
        .with_max_redirects(
            args.max_redirects
                .or(file.max_redirects)
                .unwrap_or(defaults.max_redirects),
        )
        .with_max_retries(
            args.max_retries
                .or(file.max_retries)
                .unwrap_or(defaults.max_retries),
        )
        .with_max_reconnects(
            args.max_reconnects
                .or(file.max_reconnects)
                .unwrap_or(defaults.max_reconnects),
        )
        .with_backoff(inc, max)
        .with_high_water_mark(high_water_mark);

    for (name, value) in &args.headers {
        options = options.with_header(name, value);
    }
    if let Some(range) = args.range_header() {
        options = options.with_header("range", &range);
    }
    if args.head {
        options = options.with_method(reqwest::Method::HEAD);
    }
    if !args.raw && file.decode.unwrap_or(true) {
        options = options.with_accept_encoding(DecoderRegistry::standard());
    }
    options
}

fn client_timeouts(args: &Args, file: &FileConfig) -> (u64, u64) {
    (
        args.connect_timeout
            .or(file.connect_timeout_secs)
            .unwrap_or(CONNECT_TIMEOUT_SECS),
        args.read_timeout
            .or(file.read_timeout_secs)
            .unwrap_or(READ_TIMEOUT_SECS),
    )
}
