//! SSH authentication line classifier
//!
//! Recognizes `sshd` login success and failure lines in the two timestamp
//! dialects found in auth logs: classic syslog (`Jan  5 12:00:00`) and
//! RFC 3339 high precision (`2024-01-05T12:00:00.123456+08:00`).

use regex::Regex;
use std::net::IpAddr;

use crate::models::{EventKind, LogEvent, TimestampFormat};

const SYSLOG_TIMESTAMP: &str = r"\w{3} [ \d]\d \d{2}:\d{2}:\d{2}";
const ISO_TIMESTAMP: &str = r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})";

/// One (kind, dialect) case with its compiled regex
struct Pattern {
    kind: EventKind,
    format: TimestampFormat,
    regex: Regex,
}

impl Pattern {
    fn new(kind: EventKind, format: TimestampFormat) -> Result<Self, regex::Error> {
        let timestamp = match format {
            TimestampFormat::Syslog => SYSLOG_TIMESTAMP,
            TimestampFormat::Iso8601 => ISO_TIMESTAMP,
        };
        let verb = match kind {
            EventKind::LoginSuccess => "Accepted",
            EventKind::LoginFailure => "Failed",
        };
        // Groups: timestamp, auth method, user, source address
        let regex = Regex::new(&format!(
            r"^({timestamp})\s+\S+\s+sshd\[\d+\]:\s+{verb} ([\w/-]+) for (?:invalid user )?(\S+) from ([0-9A-Fa-f:.]+)(?:\s|$)"
        ))?;
        Ok(Pattern {
            kind,
            format,
            regex,
        })
    }

    fn extract(&self, line: &str) -> Option<LogEvent> {
        let caps = self.regex.captures(line)?;
        // Hostnames made of hex digits get past the character class.
        caps[4].parse::<IpAddr>().ok()?;
        Some(LogEvent {
            kind: self.kind,
            format: self.format,
            timestamp_text: caps[1].to_string(),
            auth_method: caps[2].to_string(),
            username: caps[3].to_string(),
            source_address: caps[4].to_string(),
            raw_line: line.to_string(),
        })
    }
}

/// Classifies raw auth log lines into login events
///
/// Patterns are tried in a fixed order and the first match wins, so a line
/// yields at most one event. Lines unrelated to SSH logins yield `None`.
pub struct LineClassifier {
    patterns: Vec<Pattern>,
}

impl LineClassifier {
    pub fn new() -> Result<Self, regex::Error> {
        let patterns = vec![
            Pattern::new(EventKind::LoginSuccess, TimestampFormat::Syslog)?,
            Pattern::new(EventKind::LoginFailure, TimestampFormat::Syslog)?,
            Pattern::new(EventKind::LoginSuccess, TimestampFormat::Iso8601)?,
            Pattern::new(EventKind::LoginFailure, TimestampFormat::Iso8601)?,
        ];
        Ok(LineClassifier { patterns })
    }

    /// Extract a login event from `line`, if it is one
    pub fn classify(&self, line: &str) -> Option<LogEvent> {
        self.patterns.iter().find_map(|pattern| pattern.extract(line))
    }
}
