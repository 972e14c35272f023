//! sismicmap - regional earthquake map.
//!
//! Polls an FDSN GeoJSON feed for a fixed region, keeps an immutable snapshot
//! of recent events, ranks the strongest events of the year, and serves a live
//! map UI (or prints one-shot results to the terminal).

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing::error;

mod cli;
mod client;
mod diff;
mod errors;
mod filters;
mod legend;
mod models;
mod output;
mod poller;
mod ranking;
mod render;
mod selection;
mod server;
mod snapshot;
mod state;

use cli::{Cli, Command};
use client::{EventSource, FdsnClient, FeedQuery};
use filters::{Criteria, normalize};
use ranking::RankingEngine;

/// Lower bound on the live poll interval, in seconds.
const MIN_POLL_INTERVAL_SECS: u64 = 5;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    init_tracing(cli.verbose, cli.quiet);

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;

    match cli.command {
        Command::Serve(args) => cmd_serve(&runtime, args),
        Command::Snapshot(args) => runtime.block_on(cmd_snapshot(args)),
        Command::Strongest(args) => runtime.block_on(cmd_strongest(args)),
    }
}

/// Initialize tracing subscriber.
fn init_tracing(verbose: bool, quiet: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

/// Execute the `snapshot` command - one live-map fetch, most recent first.
async fn cmd_snapshot(args: cli::SnapshotArgs) -> Result<()> {
    let client = FdsnClient::with_endpoint(args.feed.endpoint)
        .context("failed to create feed client")?;

    let criteria = Criteria::live_map(args.feed.bbox, args.min_magnitude, args.limit);
    let query = FeedQuery::live_window(
        Utc::now(),
        chrono::Duration::hours(args.lookback_hours),
        args.min_magnitude,
        args.feed.bbox,
        criteria.cap,
    );

    let raw = client
        .fetch(&query)
        .await
        .context("failed to fetch seismic feed")?;
    let events = normalize(raw, &criteria);

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    output::write_events(&mut handle, &events, args.format)?;

    Ok(())
}

/// Execute the `strongest` command - year-to-date ranking.
async fn cmd_strongest(args: cli::StrongestArgs) -> Result<()> {
    let client = FdsnClient::with_endpoint(args.feed.endpoint)
        .context("failed to create feed client")?;

    let (engine, _announcements) = RankingEngine::new(args.feed.bbox);
    poller::refresh_strongest(&client, &engine, args.feed.bbox)
        .await
        .context("failed to fetch yearly feed")?;

    let stdout = io::stdout();
    let mut handle = stdout.lock();
    output::write_events(&mut handle, engine.top().events(), args.format)?;

    Ok(())
}

/// Execute the `serve` command - live map web UI.
fn cmd_serve(runtime: &tokio::runtime::Runtime, args: cli::ServeArgs) -> Result<()> {
    let poll_interval = args.poll_interval.max(MIN_POLL_INTERVAL_SECS);
    if poll_interval != args.poll_interval {
        tracing::warn!("poll interval clamped to minimum of {MIN_POLL_INTERVAL_SECS} seconds");
    }

    let config = server::ServerConfig {
        port: args.port,
        host: args.host.clone(),
        endpoint: args.feed.endpoint.clone(),
        poll: poller::PollConfig {
            interval: Duration::from_secs(poll_interval),
            region: args.feed.bbox,
            min_magnitude: args.min_magnitude,
            lookback: chrono::Duration::hours(args.lookback_hours),
            cap: args.cap,
        },
        ranking_interval: Duration::from_secs(args.ranking_interval.max(MIN_POLL_INTERVAL_SECS)),
        clear_stale_selection: args.clear_stale_selection,
    };

    // Print startup message
    let url = format!("http://{}:{}", args.host, args.port);
    println!("\x1b[1m🌍 sismicmap\x1b[0m");
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("  Local:   \x1b[96m{url}\x1b[0m");
    println!("  Region:  {}", args.feed.bbox);
    println!("  Poll:    {poll_interval}s (M{:.1}+)", args.min_magnitude);
    println!("\x1b[2m───────────────────────────────────────\x1b[0m");
    println!("\x1b[2mPress Ctrl+C to stop\x1b[0m\n");

    // Open browser if requested (using xdg-open/open command)
    if args.open {
        #[cfg(target_os = "linux")]
        let _ = std::process::Command::new("xdg-open").arg(&url).spawn();
        #[cfg(target_os = "macos")]
        let _ = std::process::Command::new("open").arg(&url).spawn();
        #[cfg(target_os = "windows")]
        let _ = std::process::Command::new("cmd").args(["/c", "start", &url]).spawn();
    }

    runtime.block_on(server::run_server(config))
}
