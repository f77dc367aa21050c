//! Filesystem change subscription for the tailed file
//!
//! The containing directory is watched rather than the file itself, so the
//! subscription survives the file being deleted, rotated away or created
//! for the first time.

use notify::event::{Event, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

/// Errors that can occur while establishing the subscription
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to watch {path}: {source}")]
    Subscribe {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

/// Wake-ups delivered to the watch loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchSignal {
    /// The tailed file was modified or created
    Changed,
    /// Stop processing and exit
    Shutdown,
}

/// Identifies events that concern the tailed file
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    path: PathBuf,
    dir: PathBuf,
    canonical_dir: Option<PathBuf>,
}

impl TargetMatcher {
    pub fn new(path: &Path) -> Self {
        let dir = watch_dir(path);
        TargetMatcher {
            path: path.to_path_buf(),
            canonical_dir: dir.canonicalize().ok(),
            dir,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether `event` is a modification or creation of the tailed file
    pub fn matches(&self, event: &Event) -> bool {
        is_relevant(&event.kind) && event.paths.iter().any(|p| self.is_target(p))
    }

    fn is_target(&self, candidate: &Path) -> bool {
        if candidate == self.path {
            return true;
        }
        if candidate.file_name() != self.path.file_name() {
            return false;
        }
        let parent = candidate.parent().and_then(|d| d.canonicalize().ok());
        parent.is_some() && parent == self.canonical_dir
    }
}

/// Modify (data, metadata, rename) and create notifications wake the loop
pub fn is_relevant(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Modify(_) | EventKind::Create(_))
}

fn watch_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

/// Live subscription; dropping it stops the notifications
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    dir: PathBuf,
}

impl FileWatcher {
    /// Subscribe to changes of `path`, sending [`WatchSignal::Changed`] to `tx`
    pub fn subscribe(
        path: &Path,
        recursive: bool,
        tx: UnboundedSender<WatchSignal>,
    ) -> Result<Self, WatchError> {
        let matcher = TargetMatcher::new(path);
        let dir = matcher.dir().to_path_buf();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if matcher.matches(&event) {
                    // The loop is gone once the receiver is dropped.
                    let _ = tx.send(WatchSignal::Changed);
                }
            }
            Err(e) => log::warn!("Filesystem notification error: {}", e),
        })
        .map_err(|source| WatchError::Subscribe {
            path: dir.clone(),
            source,
        })?;

        let mode = if recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        watcher
            .watch(&dir, mode)
            .map_err(|source| WatchError::Subscribe {
                path: dir.clone(),
                source,
            })?;

        log::info!("Watching {} for changes to {}", dir.display(), path.display());
        Ok(FileWatcher {
            _watcher: watcher,
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
