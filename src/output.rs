//! Output formatters for seismic events.
//!
//! Supports human-readable (with colors), JSON, and NDJSON formats.

use std::io::{self, Write};

use crate::models::SeismicEvent;

// ANSI color codes
const RESET: &str = "\x1b[0m";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";

// Magnitude-based colors
const RED: &str = "\x1b[91m";      // Critical: mag >= 7.0
const YELLOW: &str = "\x1b[93m";   // Warning: mag >= 6.0
const CYAN: &str = "\x1b[96m";     // Significant: mag >= 4.5
const GREEN: &str = "\x1b[92m";    // Moderate: mag >= 3.0
const WHITE: &str = "\x1b[97m";    // Minor: mag < 3.0

const ICON_QUAKE: &str = "🌍";

/// Output format selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    /// Human-readable terminal output (default)
    #[default]
    Human,
    /// JSON array
    Json,
    /// Newline-delimited JSON (one object per line)
    Ndjson,
}

impl std::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err(format!("unknown format: {s} (expected: human, json, ndjson)")),
        }
    }
}

/// Get the color code for a magnitude value.
fn magnitude_color(mag: f64) -> &'static str {
    match mag {
        m if m >= 7.0 => RED,
        m if m >= 6.0 => YELLOW,
        m if m >= 4.5 => CYAN,
        m if m >= 3.0 => GREEN,
        _ => WHITE,
    }
}

/// Get severity label for magnitude.
fn magnitude_label(mag: f64) -> &'static str {
    match mag {
        m if m >= 7.0 => "MAJOR",
        m if m >= 6.0 => "STRONG",
        m if m >= 4.5 => "MODERATE",
        m if m >= 3.0 => "LIGHT",
        m if m >= 2.0 => "MINOR",
        _ => "MICRO",
    }
}

/// Write events in human-readable format.
///
/// Format: `🌍 M4.1 mb │ LIGHT    │    35km │ 2024-03-10 12:00:00 UTC │ place`
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_human<W: Write>(writer: &mut W, events: &[SeismicEvent]) -> io::Result<()> {
    if events.is_empty() {
        return writeln!(writer, "{DIM}no events in region{RESET}");
    }

    for (rank, event) in events.iter().enumerate() {
        let time = event.occurred_at.format("%Y-%m-%d %H:%M:%S");
        let mag = event.magnitude;
        let mag_type = event.magnitude_type.as_deref().unwrap_or("?");
        let depth = event.depth_km;
        let color = magnitude_color(mag);
        let label = magnitude_label(mag);

        writeln!(
            writer,
            "{DIM}{rank:>3}{RESET} {ICON_QUAKE} {color}{BOLD}M{mag:.1}{RESET} {DIM}{mag_type}{RESET} │ \
             {color}{label:8}{RESET} │ \
             {DIM}{depth:>5.0}km{RESET} │ \
             {time} UTC │ \
             {place}",
            rank = rank + 1,
            place = event.place,
        )?;
    }
    Ok(())
}

/// Write events as a JSON array.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_json<W: Write>(writer: &mut W, events: &[SeismicEvent]) -> io::Result<()> {
    let json = serde_json::to_string_pretty(events)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    writeln!(writer, "{json}")
}

/// Write events as newline-delimited JSON.
///
/// Each event is written as a single line of JSON.
///
/// # Errors
///
/// Returns an error if serialization or writing fails.
pub fn write_ndjson<W: Write>(writer: &mut W, events: &[SeismicEvent]) -> io::Result<()> {
    for event in events {
        let json = serde_json::to_string(event)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        writeln!(writer, "{json}")?;
    }
    Ok(())
}

/// Write events in the specified format.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_events<W: Write>(
    writer: &mut W,
    events: &[SeismicEvent],
    format: Format,
) -> io::Result<()> {
    match format {
        Format::Human => write_human(writer, events),
        Format::Json => write_json(writer, events),
        Format::Ndjson => write_ndjson(writer, events),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::event;

    #[test]
    fn test_format_parse() {
        assert_eq!("human".parse::<Format>().unwrap(), Format::Human);
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("ndjson".parse::<Format>().unwrap(), Format::Ndjson);
        assert!("invalid".parse::<Format>().is_err());
    }

    #[test]
    fn test_magnitude_bands() {
        assert_eq!(magnitude_label(7.2), "MAJOR");
        assert_eq!(magnitude_label(4.1), "LIGHT");
        assert_eq!(magnitude_label(2.0), "MINOR");
        assert_eq!(magnitude_label(-0.3), "MICRO");
        assert_eq!(magnitude_color(6.0), YELLOW);
    }

    #[test]
    fn test_ndjson_one_line_per_event() {
        let events = vec![
            event("a", 4.1, 19.0, -99.0, 0),
            event("b", 3.0, 19.0, -99.0, 1),
        ];
        let mut buf = Vec::new();
        write_events(&mut buf, &events, Format::Ndjson).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["eventId"], "a");
    }

    #[test]
    fn test_human_lists_rank_and_place() {
        let mut buf = Vec::new();
        write_human(&mut buf, &[event("a", 4.1, 19.0, -99.0, 0)]).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("M4.1"));
        assert!(text.contains("near a"));
    }
}
