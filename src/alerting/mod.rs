//! Alerting module for chat webhook notifications
//!
//! [`AlertDispatcher`] renders a login event into a markdown message,
//! enriches it with the source location and hands it to an [`AlertSink`].
//! Delivery is attempted once; the outcome is logged and never retried.

pub mod wecom;

pub use wecom::WeComWebhook;

use thiserror::Error;

use crate::geolocation::{GeoLookup, GeoResolver};
use crate::models::{EventKind, LogEvent};

/// Errors that can occur during alert dispatch
#[derive(Error, Debug)]
pub enum AlertError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Webhook returned status {0}")]
    Status(u16),

    #[error("Webhook rejected message: errcode {code} ({message})")]
    Rejected { code: i64, message: String },
}

/// A rendered alert, ready for delivery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlertPayload {
    pub kind: EventKind,
    /// Font color tag for the status line
    pub color: &'static str,
    pub icon: &'static str,
    pub content: String,
}

impl AlertPayload {
    /// Render the markdown message for `event` located at `location`
    pub fn render(event: &LogEvent, location: &str) -> Self {
        let (color, icon) = match event.kind {
            EventKind::LoginSuccess => ("info", "✅ Accepted"),
            EventKind::LoginFailure => ("warning", "🚨 Failed"),
        };

        let content = format!(
            "# **【WARNING】**<font color=\"critical\">**Login**</font>\n\
             <font color=\"{color}\">{icon} {method} alerts</font>\n\
             > <font color=\"comment\">User</font>: <font color=\"critical\">{user}</font>\n\
             > <font color=\"comment\">Address</font>: <font color=\"warning\">{address}</font>\n\
             > <font color=\"comment\">City</font>: <font color=\"warning\">{location}</font>\n\
             > <font color=\"comment\">Content</font>: <font color=\"critical\">{line}</font>",
            color = color,
            icon = icon,
            method = event.auth_method,
            user = event.username,
            address = event.source_address,
            location = location,
            line = event.raw_line,
        );

        AlertPayload {
            kind: event.kind,
            color,
            icon,
            content,
        }
    }
}

/// Destination for rendered alerts
#[allow(async_fn_in_trait)]
pub trait AlertSink {
    async fn send(&self, payload: &AlertPayload) -> Result<(), AlertError>;
}

/// Formats events and sends them to the configured sink
pub struct AlertDispatcher<S, L> {
    sink: S,
    geo: GeoResolver<L>,
}

impl<S: AlertSink, L: GeoLookup> AlertDispatcher<S, L> {
    pub fn new(sink: S, geo: GeoResolver<L>) -> Self {
        AlertDispatcher { sink, geo }
    }

    /// Locate the source, render the alert and send it once
    pub async fn dispatch(&mut self, event: &LogEvent) -> Result<(), AlertError> {
        let location = self.geo.resolve(&event.source_address).await;
        let payload = AlertPayload::render(event, &location);

        self.sink.send(&payload).await?;
        log::info!(
            "Alert sent: {} - {} from {} ({}) at {}",
            event.kind,
            event.username,
            event.source_address,
            location,
            event.timestamp_text
        );
        Ok(())
    }

    pub fn geo(&self) -> &GeoResolver<L> {
        &self.geo
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geolocation::{GeoError, UNKNOWN_LOCATION};
    use crate::models::TimestampFormat;
    use std::cell::{Cell, RefCell};

    struct StaticLookup(Option<&'static str>);

    impl GeoLookup for StaticLookup {
        async fn lookup(&self, _address: &str) -> Result<String, GeoError> {
            self.0
                .map(String::from)
                .ok_or_else(|| GeoError::Failed("timed out".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        sent: RefCell<Vec<AlertPayload>>,
        fail_next: Cell<bool>,
    }

    impl AlertSink for RecordingSink {
        async fn send(&self, payload: &AlertPayload) -> Result<(), AlertError> {
            if self.fail_next.replace(false) {
                return Err(AlertError::Status(502));
            }
            self.sent.borrow_mut().push(payload.clone());
            Ok(())
        }
    }

    fn create_test_event(kind: EventKind) -> LogEvent {
        LogEvent {
            kind,
            format: TimestampFormat::Syslog,
            auth_method: "password".to_string(),
            username: "alice".to_string(),
            source_address: "10.0.0.5".to_string(),
            timestamp_text: "Jan 05 12:00:00".to_string(),
            raw_line: "Jan 05 12:00:00 host sshd[123]: Accepted password for alice from 10.0.0.5"
                .to_string(),
        }
    }

    #[test]
    fn test_render_success() {
        let event = create_test_event(EventKind::LoginSuccess);
        let payload = AlertPayload::render(&event, "中国->广东");

        assert_eq!(payload.color, "info");
        assert_eq!(payload.icon, "✅ Accepted");
        assert!(payload
            .content
            .contains("<font color=\"info\">✅ Accepted password alerts</font>"));
        assert!(payload
            .content
            .contains("> <font color=\"comment\">User</font>: <font color=\"critical\">alice</font>"));
        assert!(payload
            .content
            .contains("> <font color=\"comment\">City</font>: <font color=\"warning\">中国->广东</font>"));
        assert!(payload.content.contains(&event.raw_line));
        assert_eq!(payload.content.lines().count(), 6);
    }

    #[test]
    fn test_render_failure_tone() {
        let event = create_test_event(EventKind::LoginFailure);
        let payload = AlertPayload::render(&event, UNKNOWN_LOCATION);

        assert_eq!(payload.kind, EventKind::LoginFailure);
        assert_eq!(payload.color, "warning");
        assert!(payload.content.contains("🚨 Failed password alerts"));
    }

    #[tokio::test]
    async fn test_dispatch_includes_location() {
        let geo = GeoResolver::new(StaticLookup(Some("Japan->Tokyo")));
        let mut dispatcher = AlertDispatcher::new(RecordingSink::default(), geo);

        dispatcher
            .dispatch(&create_test_event(EventKind::LoginSuccess))
            .await
            .unwrap();

        let sent = dispatcher.sink().sent.borrow();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].content.contains("Japan->Tokyo"));
    }

    #[tokio::test]
    async fn test_failed_geo_still_alerts_with_unknown() {
        let geo = GeoResolver::new(StaticLookup(None));
        let mut dispatcher = AlertDispatcher::new(RecordingSink::default(), geo);

        dispatcher
            .dispatch(&create_test_event(EventKind::LoginFailure))
            .await
            .unwrap();

        let sent = dispatcher.sink().sent.borrow();
        assert!(sent[0].content.contains(UNKNOWN_LOCATION));
        assert_eq!(dispatcher.geo().cached("10.0.0.5"), Some(UNKNOWN_LOCATION));
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_block_next_alert() {
        let geo = GeoResolver::new(StaticLookup(Some("Japan->Tokyo")));
        let sink = RecordingSink::default();
        sink.fail_next.set(true);
        let mut dispatcher = AlertDispatcher::new(sink, geo);

        let event = create_test_event(EventKind::LoginSuccess);
        assert!(matches!(
            dispatcher.dispatch(&event).await,
            Err(AlertError::Status(502))
        ));
        dispatcher.dispatch(&event).await.unwrap();
        assert_eq!(dispatcher.sink().sent.borrow().len(), 1);
    }
}
