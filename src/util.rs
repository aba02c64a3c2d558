use std::env;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc, Weekday};

pub(crate) fn env_optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_u64(name: &str, default: u64) -> u64 {
    env_optional(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_usize(name: &str, default: usize) -> usize {
    env_optional(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn env_f64(name: &str, default: f64) -> f64 {
    env_optional(name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub(crate) fn now_ts() -> i64 {
    Utc::now().timestamp()
}

pub(crate) fn jitter_ratio() -> f64 {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos % 1000) as f64 / 1000.0
}

/// Exponential backoff delay in seconds with up to +20% jitter.
pub(crate) fn backoff_delay(attempt: usize, base: f64, max: f64) -> f64 {
    let delay = (base * 2.0_f64.powi(attempt as i32)).min(max);
    delay * (1.0 + jitter_ratio() * 0.2)
}

/// Shared bounded-retry settings for transient failures.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RetryPolicy {
    pub(crate) max: usize,
    pub(crate) base_s: f64,
    pub(crate) max_s: f64,
}

impl RetryPolicy {
    pub(crate) fn none() -> RetryPolicy {
        RetryPolicy {
            max: 0,
            base_s: 0.0,
            max_s: 0.0,
        }
    }
}

pub(crate) fn parse_retry_after(resp: &ureq::Response) -> Option<f64> {
    resp.header("retry-after")
        .and_then(|v| v.trim().parse::<f64>().ok())
}

/// Canonical form of a task title for identity comparison: lowercase,
/// whitespace collapsed, surrounding punctuation stripped.
pub(crate) fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parse a due date the way users and models write them: RFC3339 datetime,
/// `YYYY-MM-DD`, `today`/`tomorrow`, or a weekday name meaning its next
/// occurrence after `today`.
pub(crate) fn parse_due_date(value: &str, today: NaiveDate) -> Option<NaiveDate> {
    let v = value.trim();
    if v.is_empty() {
        return None;
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(v, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(v) {
        return Some(dt.date_naive());
    }
    if let Ok(d) = NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        return Some(d);
    }
    let lower = v.to_ascii_lowercase();
    match lower.as_str() {
        "today" => return Some(today),
        "tomorrow" => return Some(today + ChronoDuration::days(1)),
        _ => {}
    }
    if let Ok(weekday) = lower.parse::<Weekday>() {
        let current = today.weekday().num_days_from_monday() as i64;
        let target = weekday.num_days_from_monday() as i64;
        let mut ahead = target - current;
        if ahead <= 0 {
            ahead += 7;
        }
        return Some(today + ChronoDuration::days(ahead));
    }
    None
}
