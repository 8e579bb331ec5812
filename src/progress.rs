//! Provider output progress parser.
//!
//! The store CLIs print unrelated progress formats:
//!
//! | Provider  | Sample line                                                                  |
//! |-----------|------------------------------------------------------------------------------|
//! | legendary | `Progress: 45.67% (123.45/267.89 MiB), Running for: 00:01:23, ETA: 00:02:34` |
//! | gogdl     | `45.67% [######     ] 123.45 MiB/267.89 MiB`                                  |
//! | nile      | `Downloading: 45.67% (123.45/267.89 MB) @ 12.34 MB/s ETA: 00:02:34`           |
//!
//! Rather than one grammar per provider, four independent extractors look
//! for percentage, speed, ETA and size-pair tokens anywhere in the line.
//! Each extractor is optional; a line with no recognizable token yields an
//! empty [`ProgressUpdate`].

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::models::progress::ProgressUpdate;

/// Digits immediately followed by `%`, not glued to a preceding word
/// character or to a `<digit>.` version component. `Downloading...45%` is
/// accepted.
static PERCENT_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"(?:^|[^\w.]|(?:^|\D)\.)(\d{1,3}(?:\.\d+)?)%"));

/// `12.34 MiB/s`.
static SPEED_RE: Lazy<Regex> = Lazy::new(|| {
    compile(r"(?:^|[^\w.])(\d+(?:\.\d+)?)\s*(KiB|MiB|GiB|KB|MB|GB)/s\b")
});

/// `ETA: 00:02:34` or `ETA 1:02:34`.
static ETA_RE: Lazy<Regex> =
    Lazy::new(|| compile(r"\bETA:?\s*(\d+):([0-5]\d):([0-5]\d)\b"));

/// `123.45/267.89 MiB` or `123.45 MiB/267.89 MiB`.
static SIZE_RE: Lazy<Regex> = Lazy::new(|| {
    compile(
        r"(?:^|[^\w.])(\d+(?:\.\d+)?)\s*(?:(KiB|MiB|GiB|KB|MB|GB)\s*)?/\s*(\d+(?:\.\d+)?)\s*(KiB|MiB|GiB|KB|MB|GB)\b",
    )
});

#[allow(clippy::expect_used)] // Patterns are literals covered by the unit tests.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("progress pattern is valid")
}

/// Extract every recognized progress field from one output line.
#[must_use]
pub fn parse_line(line: &str) -> ProgressUpdate {
    let (downloaded_bytes, total_bytes) = parse_size_pair(line)
        .map_or((None, None), |(downloaded, total)| (Some(downloaded), Some(total)));

    ProgressUpdate {
        percent: parse_percent(line),
        speed_bps: parse_speed(line),
        eta_seconds: parse_eta(line),
        downloaded_bytes,
        total_bytes,
    }
}

/// First percentage in `0..=100`.
#[must_use]
pub fn parse_percent(line: &str) -> Option<f64> {
    PERCENT_RE
        .captures_iter(line)
        .filter_map(|caps| caps[1].parse::<f64>().ok())
        .find(|value| (0.0..=100.0).contains(value))
}

/// Speed in bytes per second.
#[must_use]
pub fn parse_speed(line: &str) -> Option<u64> {
    let caps = SPEED_RE.captures(line)?;
    let value = caps[1].parse::<f64>().ok()?;
    let multiplier = unit_multiplier(&caps[2])?;
    Some(to_bytes(value, multiplier))
}

/// ETA in whole seconds.
#[must_use]
pub fn parse_eta(line: &str) -> Option<u64> {
    let caps = ETA_RE.captures(line)?;
    let hours = caps[1].parse::<u64>().ok()?;
    let minutes = caps[2].parse::<u64>().ok()?;
    let seconds = caps[3].parse::<u64>().ok()?;
    hours
        .checked_mul(3600)?
        .checked_add(minutes * 60 + seconds)
}

/// `(downloaded, total)` in bytes. When only the total carries a unit it
/// applies to both numbers.
#[must_use]
pub fn parse_size_pair(line: &str) -> Option<(u64, u64)> {
    let caps = SIZE_RE.captures(line)?;
    let downloaded = caps[1].parse::<f64>().ok()?;
    let total = caps[3].parse::<f64>().ok()?;
    let total_multiplier = unit_multiplier(&caps[4])?;
    let downloaded_multiplier =
        optional_unit(&caps, 2).map_or(Some(total_multiplier), unit_multiplier)?;
    Some((
        to_bytes(downloaded, downloaded_multiplier),
        to_bytes(total, total_multiplier),
    ))
}

fn optional_unit<'a>(caps: &'a Captures<'_>, group: usize) -> Option<&'a str> {
    caps.get(group).map(|m| m.as_str())
}

/// Byte multiplier for a unit. The CLIs use decimal and binary suffixes
/// interchangeably, so both map to binary multiples.
#[must_use]
pub fn unit_multiplier(unit: &str) -> Option<f64> {
    match unit {
        "KB" | "KiB" => Some(1024.0),
        "MB" | "MiB" => Some(1024.0 * 1024.0),
        "GB" | "GiB" => Some(1024.0 * 1024.0 * 1024.0),
        _ => None,
    }
}

// Inputs come from `\d+(\.\d+)?`, so the product is non-negative; `as`
// saturates on overflow.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_bytes(value: f64, multiplier: f64) -> u64 {
    (value * multiplier).round() as u64
}
