//! Log file names: `jsc_<yyyy>-<mm>-<dd>_<hh>-00-00[--<suffix>].log[.gz]`.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Timelike};

const PREFIX: &str = "jsc_";
const EXTENSION: &str = ".log";
const COMPRESSED: &str = ".gz";

/// A parsed log file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFileName {
    pub hour: NaiveDateTime,
    pub suffix: u32,
    pub compressed: bool,
}

/// Truncate a timestamp to the start of its hour.
pub fn truncate_to_hour(timestamp: NaiveDateTime) -> NaiveDateTime {
    let hour = NaiveTime::from_hms_opt(timestamp.hour(), 0, 0).unwrap_or(NaiveTime::MIN);
    timestamp.date().and_time(hour)
}

pub fn format_name(timestamp: NaiveDateTime, suffix: u32, compressed: bool) -> String {
    let mut name = format!(
        "{PREFIX}{}",
        truncate_to_hour(timestamp).format("%Y-%m-%d_%H-00-00")
    );
    if suffix > 0 {
        name.push_str(&format!("--{suffix}"));
    }
    name.push_str(EXTENSION);
    if compressed {
        name.push_str(COMPRESSED);
    }
    name
}

pub fn parse_name(name: &str) -> Option<LogFileName> {
    let rest = name.strip_prefix(PREFIX)?;
    let (rest, compressed) = match rest.strip_suffix(COMPRESSED) {
        Some(rest) => (rest, true),
        None => (rest, false),
    };
    let rest = rest.strip_suffix(EXTENSION)?;
    let (stamp, suffix) = match rest.split_once("--") {
        Some((stamp, digits)) => {
            // `--0` and zero-padded suffixes are never written.
            if digits.starts_with('0') {
                return None;
            }
            (stamp, digits.parse().ok()?)
        }
        None => (rest, 0),
    };

    // yyyy-mm-dd_hh-00-00
    let (date, time) = stamp.split_once('_')?;
    if time.len() != 8 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let hour: u32 = time.strip_suffix("-00-00")?.parse().ok()?;
    let hour = date.and_time(NaiveTime::from_hms_opt(hour, 0, 0)?);
    Some(LogFileName {
        hour,
        suffix,
        compressed,
    })
}

/// Uncompressed log files are the compression candidates.
pub fn is_uncompressed_log(name: &str) -> bool {
    parse_name(name).map(|n| !n.compressed).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 17)
            .unwrap()
    }

    #[test]
    fn test_format_matches_layout() {
        let ts = at(2024, 3, 7, 9, 41);
        assert_eq!(format_name(ts, 0, false), "jsc_2024-03-07_09-00-00.log");
        assert_eq!(format_name(ts, 2, false), "jsc_2024-03-07_09-00-00--2.log");
        assert_eq!(format_name(ts, 0, true), "jsc_2024-03-07_09-00-00.log.gz");
        assert_eq!(format_name(ts, 10, true), "jsc_2024-03-07_09-00-00--10.log.gz");
    }

    #[test]
    fn test_parse_inverts_format() {
        let ts = at(2023, 12, 31, 23, 59);
        let parsed = parse_name(&format_name(ts, 3, true)).unwrap();
        assert_eq!(parsed.hour, truncate_to_hour(ts));
        assert_eq!(parsed.suffix, 3);
        assert!(parsed.compressed);
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert!(parse_name("access.log").is_none());
        assert!(parse_name("jsc_2024-03-07_09-00-00.txt").is_none());
        assert!(parse_name("jsc_2024-03-07_09-00-00--0.log").is_none());
        assert!(parse_name("jsc_2024-03-07_09-00-00--x.log").is_none());
        assert!(parse_name("jsc_2024-03-07_9-00-00.log").is_none());
        assert!(parse_name("jsc_2024-13-07_09-00-00.log").is_none());
    }

    #[test]
    fn test_compression_candidates() {
        assert!(is_uncompressed_log("jsc_2024-03-07_09-00-00--1.log"));
        assert!(!is_uncompressed_log("jsc_2024-03-07_09-00-00--1.log.gz"));
        assert!(!is_uncompressed_log("notes.txt"));
    }
}
