pub mod file_tailer;
pub mod watcher;

pub use file_tailer::{StartPosition, TailError, TailReader, TailState};
pub use watcher::{FileWatcher, TargetMatcher, WatchError, WatchSignal};
