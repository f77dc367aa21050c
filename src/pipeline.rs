//! The watch loop: tail -> classify -> freshness -> alert
//!
//! Everything runs on one task. Each wake-up drains the whole batch of new
//! lines, in file order, awaiting every geolocation and webhook call before
//! the next notification is looked at. The tail offset and the geolocation
//! cache are only ever touched from here.

use chrono::{Local, NaiveDateTime};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::alerting::{AlertDispatcher, AlertSink};
use crate::detection::{FreshnessFilter, LineClassifier};
use crate::geolocation::GeoLookup;
use crate::input::{TailReader, WatchSignal};

/// Counters for one processed batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub lines: usize,
    pub matched: usize,
    pub fresh: usize,
    pub sent: usize,
    pub failed: usize,
}

type Clock = Box<dyn Fn() -> NaiveDateTime>;

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Drives the tail reader through classification, replay suppression and
/// alert dispatch
pub struct WatchLoop<S, L> {
    tailer: TailReader,
    classifier: LineClassifier,
    freshness: FreshnessFilter,
    dispatcher: AlertDispatcher<S, L>,
    clock: Clock,
}

impl<S: AlertSink, L: GeoLookup> WatchLoop<S, L> {
    pub fn new(
        tailer: TailReader,
        classifier: LineClassifier,
        freshness: FreshnessFilter,
        dispatcher: AlertDispatcher<S, L>,
    ) -> Self {
        WatchLoop {
            tailer,
            classifier,
            freshness,
            dispatcher,
            clock: Box::new(local_now),
        }
    }

    /// Replace the wall clock used for freshness checks
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> NaiveDateTime + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    pub fn tailer(&self) -> &TailReader {
        &self.tailer
    }

    pub fn dispatcher(&self) -> &AlertDispatcher<S, L> {
        &self.dispatcher
    }

    /// Process everything appended since the last call
    ///
    /// Read errors are logged and leave the offset untouched; the next
    /// change notification retries.
    pub async fn process_changes(&mut self) -> BatchSummary {
        let mut summary = BatchSummary::default();

        let lines = match self.tailer.poll_new_lines() {
            Ok(lines) => lines,
            Err(e) => {
                log::error!("Error processing log file: {}", e);
                return summary;
            }
        };

        for line in &lines {
            self.process_line(line, &mut summary).await;
        }

        if summary.matched > 0 {
            log::debug!(
                "Batch: {} lines, {} logins, {} fresh, {} sent, {} failed",
                summary.lines,
                summary.matched,
                summary.fresh,
                summary.sent,
                summary.failed
            );
        }
        summary
    }

    async fn process_line(&mut self, line: &str, summary: &mut BatchSummary) {
        summary.lines += 1;

        let Some(event) = self.classifier.classify(line) else {
            return;
        };
        summary.matched += 1;

        if !self.freshness.is_fresh(&event, (self.clock)()) {
            return;
        }
        summary.fresh += 1;

        match self.dispatcher.dispatch(&event).await {
            Ok(()) => summary.sent += 1,
            Err(e) => {
                summary.failed += 1;
                log::error!(
                    "Error sending alert for {} from {}: {}",
                    event.username,
                    event.source_address,
                    e
                );
            }
        }
    }

    /// Run until a shutdown signal arrives or every sender is dropped
    ///
    /// Whatever the file already holds is processed once up front; the
    /// freshness window keeps old lines from alerting.
    pub async fn run(&mut self, signals: &mut UnboundedReceiver<WatchSignal>) {
        log::info!("Starting monitoring {}...", self.tailer.path().display());
        self.process_changes().await;

        while let Some(signal) = signals.recv().await {
            if signal == WatchSignal::Shutdown {
                break;
            }

            // Notifications that piled up during the last batch are covered
            // by a single poll.
            let mut shutdown = false;
            while let Ok(pending) = signals.try_recv() {
                shutdown |= pending == WatchSignal::Shutdown;
            }

            self.process_changes().await;
            if shutdown {
                break;
            }
        }

        log::info!("Stopped monitoring {}", self.tailer.path().display());
    }
}
