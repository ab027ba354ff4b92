//! Colored CLI display utilities for playtime reports.

use std::io::{self, Write};

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use owo_colors::OwoColorize;

use crate::playtime::PlayerSummary;

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Width of the name column.
const NAME_WIDTH: usize = 24;

/// Truncate a string to at most `max_len` characters, adding an ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        "...".to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{head}...")
    }
}

/// Format a span as `HHh MMm SSs`, hours unbounded.
#[must_use]
pub fn format_duration(span: TimeDelta) -> String {
    let total = span.num_seconds().max(0);
    let (hours, minutes, seconds) = (total / 3600, total % 3600 / 60, total % 60);
    format!("{hours}h {minutes:02}m {seconds:02}s")
}

/// Names shown for a player: the current one, then earlier ones.
#[must_use]
pub fn format_names(names: &[String]) -> String {
    match names.split_last() {
        None => "?".to_string(),
        Some((current, [])) => current.clone(),
        Some((current, earlier)) => {
            let earlier: Vec<&str> = earlier.iter().rev().map(String::as_str).collect();
            format!("{current} (was {})", earlier.join(", "))
        }
    }
}

/// Print the per-player playtime table, longest playtime first.
pub fn print_report(summaries: &[PlayerSummary], tz: &Tz) {
    let mut rows: Vec<&PlayerSummary> = summaries.iter().collect();
    rows.sort_by(|a, b| b.total_seconds.cmp(&a.total_seconds));

    println!(
        "{:<NAME_WIDTH$}  {:>14}  {:>8}  {}",
        "PLAYER".bold(),
        "PLAYTIME".bold(),
        "SESSIONS".bold(),
        "LAST SEEN".bold()
    );
    for row in &rows {
        let name = truncate(&format_names(&row.names), NAME_WIDTH);
        let last_seen = row.last_seen.map_or_else(
            || "-".to_string(),
            |at| at.with_timezone(tz).format("%Y-%m-%d %H:%M").to_string(),
        );
        println!(
            "{:<NAME_WIDTH$}  {:>14}  {:>8}  {}",
            name.cyan(),
            format_duration(TimeDelta::seconds(row.total_seconds)).green(),
            row.sessions,
            last_seen.dimmed()
        );
    }

    let total: i64 = rows.iter().map(|r| r.total_seconds).sum();
    println!(
        "{} {} players, {} total",
        "[REPORT]".blue().bold(),
        rows.len(),
        format_duration(TimeDelta::seconds(total)).green().bold()
    );
    let _ = io::stdout().flush();
}

/// Print who is online and for how long.
pub fn print_online(players: &[(&str, DateTime<Utc>)], now: DateTime<Utc>, tz: &Tz) {
    if players.is_empty() {
        println!("{} Nobody is online", "[ONLINE]".blue().bold());
        return;
    }
    println!(
        "{} {} online",
        "[ONLINE]".blue().bold(),
        players.len()
    );
    for (name, joined_at) in players {
        println!(
            "  {:<NAME_WIDTH$} since {} ({})",
            name.cyan(),
            joined_at.with_timezone(tz).format("%H:%M:%S"),
            format_duration(now - *joined_at).green()
        );
    }
    let _ = io::stdout().flush();
}

/// Print a presence status change.
pub fn print_status(status: &str) {
    let shown = if status.is_empty() { "(cleared)" } else { status };
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[STATUS]".yellow().bold(),
        shown
    );
    let _ = io::stdout().flush();
}

/// Print a rotated log file.
pub fn print_rotation(base_name: &str) {
    println!(
        "{} {} {}",
        timestamp().dimmed(),
        "[ROTATED]".magenta().bold(),
        base_name
    );
    let _ = io::stdout().flush();
}
