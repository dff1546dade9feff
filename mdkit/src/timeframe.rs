//! Timeframe strings of the form `<count><unit>`, e.g. `5m`, `1h`, `30s`.

use chrono::Duration;
use tracing::warn;

/// Label stored on bars coming from end-of-day sources.
pub const DAILY_LABEL: &str = "1D";

const DAILY_ALIASES: [&str; 3] = ["1d", "d", "day"];

/// Step between consecutive bars of `timeframe`.
///
/// Units are `s`, `m` and `h`; an empty count means 1. Anything else
/// (unknown unit, zero, non-numeric or out-of-range count) falls back to
/// one minute.
pub fn interval_for(timeframe: &str) -> Duration {
    match parse(timeframe.trim()) {
        Some(interval) => interval,
        None => {
            warn!(timeframe, "unrecognized timeframe, using 1m");
            Duration::minutes(1)
        }
    }
}

fn parse(timeframe: &str) -> Option<Duration> {
    let unit = timeframe.chars().last()?;
    let count = &timeframe[..timeframe.len() - unit.len_utf8()];
    let count = if count.is_empty() {
        1
    } else {
        count.parse::<i64>().ok()?
    };
    if count <= 0 {
        return None;
    }

    match unit {
        's' => Duration::try_seconds(count),
        'm' => Duration::try_minutes(count),
        'h' => Duration::try_hours(count),
        _ => None,
    }
}

pub fn is_daily(timeframe: &str) -> bool {
    let lower = timeframe.trim().to_ascii_lowercase();
    DAILY_ALIASES.contains(&lower.as_str())
}

/// Normalizes any timeframe to the daily label, warning when the
/// requested one was not daily.
pub fn daily_label(timeframe: &str) -> &'static str {
    if !is_daily(timeframe) {
        warn!(timeframe, "only daily bars are available, using {}", DAILY_LABEL);
    }
    DAILY_LABEL
}
