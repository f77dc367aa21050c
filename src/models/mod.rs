pub mod event;

pub use event::{EventKind, LogEvent, TimestampFormat};
