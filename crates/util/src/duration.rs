//! Duration literals used for timeouts and poll intervals.
//!
//! Accepted forms are a sequence of `<integer><unit>` terms such as `10s`, `250ms`,
//! `1m30s` or `1h`, where the unit is one of `ms`, `s`, `m` or `h` (case-insensitive).
//! A bare integer is read as seconds.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;

static DURATION_PATTERN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(?i)(?:\d+(?:ms|s|m|h))+$").expect("duration regex should compile"));
static DURATION_TERM: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)(\d+)(ms|s|m|h)").expect("duration term regex should compile"));

/// Parse a duration literal. Returns `None` for anything that is not a duration.
///
/// # Examples
/// ```rust
/// use std::time::Duration;
/// use settle_util::parse_duration;
///
/// assert_eq!(parse_duration("10s"), Some(Duration::from_secs(10)));
/// assert_eq!(parse_duration("1m30s"), Some(Duration::from_secs(90)));
/// assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
/// assert_eq!(parse_duration("apiVersion: v1"), None);
/// ```
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
        return trimmed.parse::<u64>().ok().map(Duration::from_secs);
    }
    if !DURATION_PATTERN.is_match(trimmed) {
        return None;
    }

    let mut total = Duration::ZERO;
    for captures in DURATION_TERM.captures_iter(trimmed) {
        let value: u64 = captures[1].parse().ok()?;
        let term = match captures[2].to_ascii_lowercase().as_str() {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.checked_mul(60)?),
            "h" => Duration::from_secs(value.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(term)?;
    }
    Some(total)
}

/// Compact human form used in diagnostics, e.g. `1.5s`, `250ms`, `2m5s`.
pub fn format_duration(duration: Duration) -> String {
    let millis = duration.as_millis();
    if millis < 1000 {
        return format!("{millis}ms");
    }
    let seconds = duration.as_secs();
    if seconds < 60 {
        let tenths = duration.subsec_millis() / 100;
        return if tenths == 0 {
            format!("{seconds}s")
        } else {
            format!("{seconds}.{tenths}s")
        };
    }
    let (minutes, seconds) = (seconds / 60, seconds % 60);
    if minutes < 60 {
        return if seconds == 0 {
            format!("{minutes}m")
        } else {
            format!("{minutes}m{seconds}s")
        };
    }
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if minutes == 0 {
        format!("{hours}h")
    } else {
        format!("{hours}h{minutes}m")
    }
}
