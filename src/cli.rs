//! Command-line interface definitions.
//!
//! Uses clap derive API for argument parsing.

use clap::{Args, Parser, Subcommand};

use crate::client::FDSN_QUERY_URL;
use crate::filters::{BBox, LIVE_MAP_CAP};
use crate::legend::LEGEND_LEN;
use crate::output::Format;

/// Longest accepted lookback window: one year.
pub const MAX_LOOKBACK_HOURS: i64 = 8760;

/// Regional earthquake map backed by a live FDSN feed.
#[derive(Parser, Debug)]
#[command(name = "sismicmap")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Command to run
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose debug logging
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(long, global = true)]
    pub quiet: bool,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the live map UI
    Serve(ServeArgs),

    /// Fetch the live map once and print the most recent events
    Snapshot(SnapshotArgs),

    /// Print the strongest events of the current year
    Strongest(StrongestArgs),
}

/// Feed options shared by every command.
#[derive(Args, Debug, Clone)]
pub struct FeedArgs {
    /// FDSN event query endpoint
    #[arg(long, default_value = FDSN_QUERY_URL)]
    pub endpoint: String,

    /// Region: minlat,minlon,maxlat,maxlon
    #[arg(
        long,
        default_value = "14,-118.5,33,-86.5",
        value_parser = parse_bbox,
        allow_hyphen_values = true
    )]
    pub bbox: BBox,
}

/// Arguments for the `serve` command.
#[derive(Parser, Debug)]
pub struct ServeArgs {
    #[command(flatten)]
    pub feed: FeedArgs,

    /// Port to listen on
    #[arg(long, short = 'p', default_value = "8080")]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Live map poll interval in seconds (minimum 5)
    #[arg(long, default_value = "30")]
    pub poll_interval: u64,

    /// Minimum magnitude shown on the live map
    #[arg(long, default_value = "2.5")]
    pub min_magnitude: f64,

    /// How far back the live map looks, in hours
    #[arg(
        long,
        default_value = "24",
        value_parser = clap::value_parser!(i64).range(1..=MAX_LOOKBACK_HOURS)
    )]
    pub lookback_hours: i64,

    /// Maximum events kept on the live map
    #[arg(long, default_value_t = LIVE_MAP_CAP)]
    pub cap: usize,

    /// Yearly ranking refresh interval in seconds
    #[arg(long, default_value = "3600")]
    pub ranking_interval: u64,

    /// Drop the selection when its event leaves the live snapshot
    #[arg(long)]
    pub clear_stale_selection: bool,

    /// Open browser automatically
    #[arg(long)]
    pub open: bool,
}

/// Arguments for the `snapshot` command.
#[derive(Parser, Debug)]
pub struct SnapshotArgs {
    #[command(flatten)]
    pub feed: FeedArgs,

    /// Minimum magnitude to show
    #[arg(long, default_value = "2.5")]
    pub min_magnitude: f64,

    /// How far back to look, in hours
    #[arg(
        long,
        default_value = "24",
        value_parser = clap::value_parser!(i64).range(1..=MAX_LOOKBACK_HOURS)
    )]
    pub lookback_hours: i64,

    /// Maximum number of events to print
    #[arg(long, short = 'n', default_value_t = LEGEND_LEN)]
    pub limit: usize,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Arguments for the `strongest` command.
#[derive(Parser, Debug)]
pub struct StrongestArgs {
    #[command(flatten)]
    pub feed: FeedArgs,

    /// Output format
    #[arg(long, short = 'f', default_value = "human", value_parser = parse_format)]
    pub format: Format,
}

/// Parse an output format from string.
fn parse_format(s: &str) -> Result<Format, String> {
    s.parse()
}

/// Parse a bounding box from string.
fn parse_bbox(s: &str) -> Result<BBox, String> {
    s.parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::DEFAULT_REGION;

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["sismicmap", "serve"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.poll_interval, 30);
        assert_eq!(args.cap, LIVE_MAP_CAP);
        assert_eq!(args.feed.bbox, DEFAULT_REGION);
        assert_eq!(args.feed.endpoint, FDSN_QUERY_URL);
        assert!(!args.clear_stale_selection);
    }

    #[test]
    fn test_snapshot_args() {
        let cli = Cli::try_parse_from([
            "sismicmap",
            "--verbose",
            "snapshot",
            "--bbox",
            "10,-100,20,-90",
            "-n",
            "5",
            "-f",
            "ndjson",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Command::Snapshot(args) = cli.command else {
            panic!("expected snapshot");
        };
        assert_eq!(args.limit, 5);
        assert_eq!(args.format, Format::Ndjson);
        assert!((args.feed.bbox.max_lon - (-90.0)).abs() < f64::EPSILON);
    }

    #[test]
    fn test_lookback_hours_bounded() {
        for bad in ["0", "-5", "8761", "3000000000"] {
            assert!(
                Cli::try_parse_from(["sismicmap", "snapshot", "--lookback-hours", bad]).is_err(),
                "{bad} should be rejected"
            );
        }

        let cli =
            Cli::try_parse_from(["sismicmap", "serve", "--lookback-hours", "8760"]).unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.lookback_hours, MAX_LOOKBACK_HOURS);
    }

    #[test]
    fn test_bad_bbox_rejected() {
        assert!(Cli::try_parse_from(["sismicmap", "strongest", "--bbox", "1,2"]).is_err());
    }
}
