pub mod alerting;
pub mod config;
pub mod detection;
pub mod geolocation;
pub mod input;
pub mod models;
pub mod pipeline;

// Re-export commonly used types
pub use models::{EventKind, LogEvent, TimestampFormat};
pub use detection::{Freshness, FreshnessFilter, LineClassifier};
pub use geolocation::{CachePolicy, GeoBackend, GeoLookup, GeoResolver};
pub use input::{FileWatcher, StartPosition, TailReader, TailState, WatchSignal};
pub use alerting::{AlertDispatcher, AlertPayload, AlertSink, WeComWebhook};
pub use config::Config;
pub use pipeline::{BatchSummary, WatchLoop};
