//! Best-effort recovery of dates from header values and quoted attribution lines.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, Offset, Utc};
use log::trace;
use once_cell::sync::Lazy;
use regex::Regex;

const DATETIME_FORMATS: &[&str] = &[
    "%B %d %Y %I:%M %p",
    "%B %d %Y %I:%M:%S %p",
    "%B %d %Y %H:%M",
    "%B %d %Y %H:%M:%S",
    "%d %B %Y %I:%M %p",
    "%d %B %Y %H:%M",
    "%d %B %Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %I:%M %p",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%d.%m.%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%B %d %Y", "%d %B %Y", "%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y"];

static WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:mon|tue|tues|wed|thu|thur|thurs|fri|sat|sun)(?:day|sday|nesday|urday)?\b\.?")
        .expect("valid weekday pattern")
});
static AT_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bat\b").expect("valid 'at' pattern"));
static MERIDIEM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d)\s*([ap])\.?\s?m\.?(?:\s|$)").expect("valid meridiem pattern")
});
static OFFSET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:GMT|UTC)?([+-])(\d{2}):?(\d{2})$").expect("valid offset pattern"));

/// Parses a header `Date:` value, keeping its original offset when possible.
pub fn parse_header_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }
    parse_loose(trimmed)
}

/// Parses free-form date text such as `Monday, January 15, 2024 at 9:30 AM`.
///
/// Zone-less values are taken as UTC. Returns `None` when nothing matches.
pub fn parse_loose(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }

    let (cleaned, offset) = clean(trimmed);
    trace!("Loose date '{}' cleaned to '{}'", trimmed, cleaned);

    for fmt in DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(&cleaned, fmt) {
            return with_offset(naive, offset);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, fmt) {
            return with_offset(date.and_hms_opt(0, 0, 0)?, offset);
        }
    }

    // mailparse ignores AM/PM and needs a clock time, so only trust it on 24-hour text.
    if trimmed.contains(':') && !MERIDIEM.is_match(trimmed) {
        if let Ok(ts) = mailparse::dateparse(trimmed) {
            return DateTime::from_timestamp(ts, 0).map(|dt| dt.fixed_offset());
        }
    }
    None
}

fn with_offset(naive: NaiveDateTime, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    naive.and_local_timezone(offset).single()
}

/// Drops weekday names, `at`, commas and zone markers; returns the text and the offset.
fn clean(raw: &str) -> (String, FixedOffset) {
    let utc = Utc.fix();
    let text = raw.replace([',', '(', ')'], " ");
    let text = WEEKDAY.replace_all(&text, " ");
    let text = AT_WORD.replace_all(&text, " ");
    let text = MERIDIEM.replace_all(&text, |caps: &regex::Captures| {
        format!("{} {}M ", &caps[1], caps[2].to_ascii_uppercase())
    });

    let mut tokens: Vec<&str> = text.split_whitespace().collect();
    let mut offset = utc;
    while let Some(last) = tokens.last() {
        let upper = last.to_ascii_uppercase();
        if upper == "UTC" || upper == "GMT" || upper == "Z" {
            tokens.pop();
        } else if let Some(caps) = OFFSET.captures(&upper) {
            let hours: i32 = caps[2].parse().unwrap_or(0);
            let minutes: i32 = caps[3].parse().unwrap_or(0);
            let mut secs = hours * 3600 + minutes * 60;
            if &caps[1] == "-" {
                secs = -secs;
            }
            offset = FixedOffset::east_opt(secs).unwrap_or(utc);
            tokens.pop();
        } else {
            break;
        }
    }

    (tokens.join(" "), offset)
}
