// src/engine/mod.rs

//! Arrival-processing engine.
//!
//! This module ties together:
//! - the directory poller's change batches
//! - the write-stability check and the processed-file ledger
//! - the mode-specific [`ArrivalHandler`] (Prepipe unpacking or CTIO pushing)
//! - shutdown signals
//!
//! The pure per-file state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::watch::ChangeSet;

/// Where a watched file is in its life.
///
/// Forward-only: `Arrived → Stabilizing → Unpacked → Dispatched → Cleaned`.
/// `Quarantined` and `Skipped` are terminal and reachable from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStage {
    Arrived,
    Stabilizing,
    /// Untarred/split (prepipe) or packaged (push).
    Unpacked,
    /// Batch jobs submitted (prepipe) or tarball published (push).
    Dispatched,
    Cleaned,
    Quarantined,
    Skipped,
}

impl FileStage {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            FileStage::Cleaned | FileStage::Quarantined | FileStage::Skipped
        )
    }

    fn rank(self) -> u8 {
        match self {
            FileStage::Arrived => 0,
            FileStage::Stabilizing => 1,
            FileStage::Unpacked => 2,
            FileStage::Dispatched => 3,
            FileStage::Cleaned | FileStage::Quarantined | FileStage::Skipped => 4,
        }
    }

    /// Whether moving from `self` to `next` is allowed.
    pub fn can_advance_to(self, next: FileStage) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl fmt::Display for FileStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a handler did with one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    /// Furthest stage reached.
    pub stage: FileStage,
    /// Set when the file failed; the runtime quarantines it.
    pub error: Option<String>,
}

impl FileReport {
    pub fn ok(path: impl Into<PathBuf>, stage: FileStage) -> Self {
        Self {
            path: path.into(),
            stage,
            error: None,
        }
    }

    pub fn failed(path: impl Into<PathBuf>, error: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            stage: FileStage::Quarantined,
            error: Some(format!("{error:#}")),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Events flowing into the runtime from the poller and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// Files appeared in or vanished from the watched directory.
    Changes(ChangeSet),
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

/// Boxed future returned by [`ArrivalHandler`] methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Vec<FileReport>> + Send + 'a>>;

/// Mode-specific processing of stable, not-yet-seen files.
///
/// Production code uses `Prepipe` or `CtioPush`; tests can provide a fake that
/// just records the paths it was given.
pub trait ArrivalHandler: Send {
    /// Process a batch of new files (sorted, oldest name first).
    ///
    /// Work that continues in the background may be reported by a later call
    /// or by [`finish`](ArrivalHandler::finish).
    fn handle_batch(&mut self, paths: Vec<PathBuf>) -> HandlerFuture<'_>;

    /// Wait for outstanding background work and report it.
    fn finish(&mut self) -> HandlerFuture<'_>;
}

pub mod core;
pub mod runtime;

pub use core::{ArrivalTracker, CoreStep};
pub use runtime::{RunSummary, Runtime};
