use serde::{Deserialize, Serialize};
use std::fmt;

/// Outcome of an SSH authentication attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    LoginSuccess,
    LoginFailure,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::LoginSuccess => write!(f, "login_success"),
            EventKind::LoginFailure => write!(f, "login_failure"),
        }
    }
}

/// Timestamp dialect of the line an event was extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// `Mon DD HH:MM:SS`, no year and no timezone
    Syslog,
    /// `YYYY-MM-DDTHH:MM:SS.ffffff+HH:MM`
    Iso8601,
}

/// A login event extracted from a single auth log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    pub kind: EventKind,
    pub format: TimestampFormat,
    pub auth_method: String,
    pub username: String,
    pub source_address: String,
    /// Timestamp exactly as it appeared in the line
    pub timestamp_text: String,
    pub raw_line: String,
}
