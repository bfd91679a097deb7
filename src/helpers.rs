use chrono::{DateTime, Utc};
use colored::Colorize;
use core::fmt;
use once_cell::sync::Lazy;
use regex::Regex;

pub static SUCCESS: Lazy<colored::ColoredString> = Lazy::new(|| "[srvman]".green());
pub static FAIL: Lazy<colored::ColoredString> = Lazy::new(|| "[srvman]".red());
pub static WARN: Lazy<colored::ColoredString> = Lazy::new(|| "[srvman]".yellow());
pub static INFO: Lazy<colored::ColoredString> = Lazy::new(|| "[srvman]".cyan());

static ANSI_ESCAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\x1B\[([0-9;]+)m").unwrap());

const SECONDS_IN_YEAR: i64 = 365 * 24 * 60 * 60;
const SECONDS_IN_DAY: i64 = 24 * 60 * 60;
const SECONDS_IN_HOUR: i64 = 60 * 60;
const SECONDS_IN_MINUTE: i64 = 60;

/// Terminal-colored cell that serializes with the escape codes stripped, so
/// the same row renders in a table and in `--format json` output.
#[derive(Clone, Debug)]
pub struct ColoredString(pub colored::ColoredString);

impl serde::Serialize for ColoredString {
    fn serialize<S: serde::ser::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ANSI_ESCAPE.replace_all(&self.0, ""))
    }
}

impl From<colored::ColoredString> for ColoredString {
    fn from(cs: colored::ColoredString) -> Self {
        ColoredString(cs)
    }
}

impl fmt::Display for ColoredString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub fn format_duration(datetime: DateTime<Utc>) -> String {
    let current_time = Utc::now();
    let duration = current_time.signed_duration_since(datetime);

    match duration.num_seconds() {
        s if s >= SECONDS_IN_YEAR => format!("{}y", s / SECONDS_IN_YEAR),
        s if s >= SECONDS_IN_DAY => format!("{}d", s / SECONDS_IN_DAY),
        s if s >= SECONDS_IN_HOUR => format!("{}h", s / SECONDS_IN_HOUR),
        s if s >= SECONDS_IN_MINUTE => format!("{}m", s / SECONDS_IN_MINUTE),
        s => format!("{}s", s),
    }
}

pub fn format_memory(bytes: u64) -> String {
    const UNIT: f64 = 1024.0;
    const SUFFIX: [&str; 4] = ["b", "kb", "mb", "gb"];

    let size = bytes as f64;
    let base = size.log10() / UNIT.log10();

    if size <= 0.0 {
        return "0b".to_string();
    }

    let mut buffer = ryu::Buffer::new();
    let result = buffer
        .format((UNIT.powf(base - base.floor()) * 10.0).round() / 10.0)
        .trim_end_matches(".0");

    [result, SUFFIX[base.floor() as usize]].join("")
}

/// Slug usable as a pid/log file stem. Rejects path separators and dots
/// so an id can never escape the state directories.
pub fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_format_duration_seconds() {
        let now = Utc::now();
        let datetime = now - Duration::seconds(30);
        assert_eq!(format_duration(datetime), "30s");
    }

    #[test]
    fn test_format_duration_minutes() {
        let now = Utc::now();
        let datetime = now - Duration::minutes(5);
        assert_eq!(format_duration(datetime), "5m");
    }

    #[test]
    fn test_format_duration_hours() {
        let now = Utc::now();
        let datetime = now - Duration::hours(3);
        assert_eq!(format_duration(datetime), "3h");
    }

    #[test]
    fn test_format_duration_days() {
        let now = Utc::now();
        let datetime = now - Duration::days(10);
        assert_eq!(format_duration(datetime), "10d");
    }

    #[test]
    fn test_format_duration_years() {
        let now = Utc::now();
        // 365 days should show as 1 year
        let datetime = now - Duration::days(365);
        assert_eq!(format_duration(datetime), "1y");
    }

    #[test]
    fn test_format_duration_just_under_year() {
        let now = Utc::now();
        // 364 days should still show as days
        let datetime = now - Duration::days(364);
        assert_eq!(format_duration(datetime), "364d");
    }

    #[test]
    fn test_format_memory_bytes() {
        assert_eq!(format_memory(0), "0b");
        assert_eq!(format_memory(500), "500b");
    }

    #[test]
    fn test_format_memory_kilobytes() {
        assert_eq!(format_memory(1024), "1kb");
        assert_eq!(format_memory(2048), "2kb");
    }

    #[test]
    fn test_format_memory_megabytes() {
        assert_eq!(format_memory(1024 * 1024), "1mb");
        assert_eq!(format_memory(1024 * 1024 * 5), "5mb");
    }

    #[test]
    fn test_format_memory_gigabytes() {
        assert_eq!(format_memory(1024 * 1024 * 1024), "1gb");
        assert_eq!(format_memory(1024 * 1024 * 1024 * 2), "2gb");
    }

    #[test]
    fn test_valid_id_accepts_slugs() {
        assert!(valid_id("backup"));
        assert!(valid_id("backup-daily_2"));
        assert!(valid_id("a"));
    }

    #[test]
    fn test_valid_id_rejects_path_components() {
        assert!(!valid_id(""));
        assert!(!valid_id("../etc"));
        assert!(!valid_id("a/b"));
        assert!(!valid_id("a.sh"));
        assert!(!valid_id(&"x".repeat(65)));
    }
}
