//! Line parsers for the two kernel/driver log formats the host agent watches: ISO-timestamped
//! `dmesg` output and the NVIDIA fabric-manager log.
//!
//! Both implement [`hostagent_core::LineParser`]; neither is allowed to fail the stream — a
//! line that doesn't match the expected shape still becomes a record, stamped with the current
//! time and carrying the raw line as its content.

use chrono::{DateTime, NaiveDateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use hostagent_core::log_streamer::{LineParser, ParsedLine};

lazy_static! {
    // `kern  :info  : 2024-01-15T10:30:45,123456+00:00 [12345.678901] NVRM: Xid 79: ...`
    //
    // The facility/level tokens, when present, precede the timestamp — not the other way
    // around. Shorter ISO variants lacking microseconds or a timezone offset are deliberately
    // rejected rather than guessed at: a partial match risks misattributing the wrong second
    // to an event (spec Open Question (b)).
    static ref ISO_DMESG_RE: Regex = Regex::new(
        r"^(?:(?P<facility>[\w.]+)\s*:\s*(?P<level>\w+)\s*:\s*)?(?P<ts>\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2},\d{6}[+-]\d{2}:?\d{2})\s+(?P<msg>.*)$"
    ).unwrap();

    // `[Jan 15 2024 10:30:45] [ERROR] [tid 1234] message text`
    static ref FABRIC_MANAGER_RE: Regex = Regex::new(
        r"^\[(?P<ts>\w{3} \d{1,2} \d{4} \d{2}:\d{2}:\d{2})\]\s*\[(?P<level>\w+)\](?:\s*\[tid \d+\])?\s*(?P<msg>.*)$"
    ).unwrap();
}

fn fallback(line: &str) -> ParsedLine {
    ParsedLine {
        timestamp: Utc::now(),
        content: line.trim().to_string(),
        facility: None,
        level: None,
    }
}

/// Parses `dmesg --time-format=iso` lines. Strict by design: a line missing the microsecond
/// and timezone offset is treated as unparseable rather than guessed at, since a partial match
/// risks misattributing the wrong second to an event.
pub struct IsoDmesgParser;

impl LineParser for IsoDmesgParser {
    fn parse(&self, line: &str) -> ParsedLine {
        let Some(caps) = ISO_DMESG_RE.captures(line) else {
            return fallback(line);
        };

        let ts_str = caps["ts"].replace(',', ".");
        let timestamp = DateTime::parse_from_str(&ts_str, "%Y-%m-%dT%H:%M:%S%.f%:z")
            .or_else(|_| DateTime::parse_from_str(&ts_str, "%Y-%m-%dT%H:%M:%S%.f%z"))
            .map(|dt| dt.with_timezone(&Utc));

        let Ok(timestamp) = timestamp else {
            return fallback(line);
        };

        ParsedLine {
            timestamp,
            content: caps["msg"].trim().to_string(),
            facility: Some(caps["facility"].to_string()),
            level: Some(caps["level"].to_string()),
        }
    }
}

/// Parses `nv-fabricmanager` log lines.
pub struct FabricManagerParser;

impl LineParser for FabricManagerParser {
    fn parse(&self, line: &str) -> ParsedLine {
        let Some(caps) = FABRIC_MANAGER_RE.captures(line) else {
            return fallback(line);
        };

        let timestamp = NaiveDateTime::parse_from_str(&caps["ts"], "%b %d %Y %H:%M:%S")
            .map(|naive| naive.and_utc());

        let Ok(timestamp) = timestamp else {
            return fallback(line);
        };

        ParsedLine {
            timestamp,
            content: caps["msg"].trim().to_string(),
            facility: Some("fabricmanager".to_string()),
            level: Some(caps["level"].to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iso_dmesg_extracts_timestamp_facility_and_level() {
        let parsed = IsoDmesgParser.parse(
            "kern  :info  : 2024-01-15T10:30:45,123456+00:00 [12345.678901] NVRM: Xid 79: GPU has fallen off the bus.",
        );
        assert_eq!(parsed.facility.as_deref(), Some("kern"));
        assert_eq!(parsed.level.as_deref(), Some("info"));
        assert_eq!(
            parsed.content,
            "[12345.678901] NVRM: Xid 79: GPU has fallen off the bus."
        );
        assert_eq!(parsed.timestamp.to_rfc3339(), "2024-01-15T10:30:45.123456+00:00");
    }

    #[test]
    fn iso_dmesg_without_facility_level_prefix_still_parses() {
        let parsed = IsoDmesgParser.parse("2024-01-15T10:30:45,123456+00:00 no prefix here");
        assert!(parsed.facility.is_none());
        assert!(parsed.level.is_none());
        assert_eq!(parsed.content, "no prefix here");
        assert_eq!(parsed.timestamp.to_rfc3339(), "2024-01-15T10:30:45.123456+00:00");
    }

    #[test]
    fn iso_dmesg_matches_spec_scenario_a() {
        let lines = [
            "kern  :info  : 2025-01-21T04:41:44,100000+00:00 Test message",
            "kern  :info  : 2025-01-21T04:41:44,200000+00:00 Test message",
            "kern  :info  : 2025-01-21T04:41:44,300000+00:00 Test message",
        ];
        for line in lines {
            let parsed = IsoDmesgParser.parse(line);
            assert_eq!(parsed.facility.as_deref(), Some("kern"));
            assert_eq!(parsed.level.as_deref(), Some("info"));
            assert_eq!(parsed.content, "Test message");
            assert_eq!(parsed.timestamp.timestamp(), 1_737_434_504);
        }
    }

    #[test]
    fn iso_dmesg_falls_back_on_unparseable_lines() {
        let parsed = IsoDmesgParser.parse("not a dmesg line at all");
        assert!(parsed.facility.is_none());
        assert_eq!(parsed.content, "not a dmesg line at all");
    }

    #[test]
    fn fabric_manager_extracts_level_and_strips_thread_id() {
        let parsed = FabricManagerParser
            .parse("[Jan 15 2024 10:30:45] [ERROR] [tid 1234] NVSwitch fatal error detected");
        assert_eq!(parsed.level.as_deref(), Some("ERROR"));
        assert_eq!(parsed.content, "NVSwitch fatal error detected");
        assert_eq!(parsed.timestamp.timestamp(), {
            use chrono::TimeZone;
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45)
                .unwrap()
                .timestamp()
        });
    }

    #[test]
    fn fabric_manager_falls_back_on_unparseable_lines() {
        let parsed = FabricManagerParser.parse("garbled output");
        assert!(parsed.level.is_none());
    }
}
