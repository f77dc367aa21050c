//! Replay suppression for login events
//!
//! On a cold start the tailed file may hold hours of old login lines. Only
//! events whose own timestamp lies inside a short lookback window are
//! alerted on. Comparison happens in local naive time: syslog lines carry no
//! zone, and the UTC offset of RFC 3339 lines is dropped before parsing.

use chrono::{Datelike, Duration, NaiveDateTime};
use thiserror::Error;

use crate::models::{LogEvent, TimestampFormat};

const SYSLOG_PARSE_FORMAT: &str = "%Y %b %d %H:%M:%S";
const ISO_PARSE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";
/// `YYYY-MM-DDTHH:MM:SS`
const ISO_SECONDS_LEN: usize = 19;

/// Errors that can occur while reading an event timestamp
#[derive(Error, Debug)]
pub enum TimestampError {
    #[error("Invalid timestamp '{text}': {source}")]
    Parse {
        text: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Timestamp '{0}' is too short")]
    Truncated(String),
}

/// Verdict for a single event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// Drops events older than a fixed lookback window
#[derive(Debug, Clone)]
pub struct FreshnessFilter {
    /// `None` when the window is too large to represent; nothing is stale
    window: Option<Duration>,
}

impl FreshnessFilter {
    pub const DEFAULT_WINDOW_SECONDS: i64 = 60;

    pub fn new() -> Self {
        Self::with_window_seconds(Self::DEFAULT_WINDOW_SECONDS)
    }

    /// Negative windows are treated as zero
    pub fn with_window_seconds(seconds: i64) -> Self {
        FreshnessFilter {
            window: Duration::try_seconds(seconds.max(0)),
        }
    }

    pub fn window(&self) -> Option<Duration> {
        self.window
    }

    /// Judge `event` against `now`
    ///
    /// An event is fresh when its timestamp is strictly after `now - window`.
    /// A threshold before the earliest representable time admits everything.
    pub fn check(&self, event: &LogEvent, now: NaiveDateTime) -> Result<Freshness, TimestampError> {
        let event_time = event_time(event, now)?;
        let threshold = self.window.and_then(|window| now.checked_sub_signed(window));
        Ok(match threshold {
            Some(threshold) if event_time <= threshold => Freshness::Stale,
            _ => Freshness::Fresh,
        })
    }

    /// Like [`FreshnessFilter::check`], but unparseable timestamps count as
    /// stale and are logged
    pub fn is_fresh(&self, event: &LogEvent, now: NaiveDateTime) -> bool {
        match self.check(event, now) {
            Ok(Freshness::Fresh) => true,
            Ok(Freshness::Stale) => {
                log::debug!(
                    "Skipping stale {} for {} at {}",
                    event.kind,
                    event.username,
                    event.timestamp_text
                );
                false
            }
            Err(e) => {
                log::warn!("Invalid timestamp in line: {} ({})", event.raw_line, e);
                false
            }
        }
    }
}

impl Default for FreshnessFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the event timestamp into local naive time
///
/// Syslog timestamps have no year, so the year of `now` is assumed. A line
/// from late December read in early January therefore lands in the future.
pub fn event_time(event: &LogEvent, now: NaiveDateTime) -> Result<NaiveDateTime, TimestampError> {
    match event.format {
        TimestampFormat::Syslog => {
            // "Jan  5" and "Jan 05" both become "Jan 5"/"Jan 05", which %d accepts.
            let collapsed = event
                .timestamp_text
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ");
            let with_year = format!("{} {}", now.year(), collapsed);
            NaiveDateTime::parse_from_str(&with_year, SYSLOG_PARSE_FORMAT).map_err(|source| {
                TimestampError::Parse {
                    text: event.timestamp_text.clone(),
                    source,
                }
            })
        }
        TimestampFormat::Iso8601 => {
            let seconds = event
                .timestamp_text
                .get(..ISO_SECONDS_LEN)
                .ok_or_else(|| TimestampError::Truncated(event.timestamp_text.clone()))?;
            NaiveDateTime::parse_from_str(seconds, ISO_PARSE_FORMAT).map_err(|source| {
                TimestampError::Parse {
                    text: event.timestamp_text.clone(),
                    source,
                }
            })
        }
    }
}
