pub mod classifier;
pub mod freshness;

pub use classifier::LineClassifier;
pub use freshness::{Freshness, FreshnessFilter, TimestampError};
