// src/engine/core.rs

//! Pure core state machine.
//!
//! [`ArrivalTracker`] consumes [`RuntimeEvent`]s and produces the list of
//! files the IO shell should look at next. It has no channels, no Tokio types,
//! and does not perform any IO, so it is unit tested directly.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::engine::{FileStage, RuntimeEvent};
use crate::watch::ChangeSet;

/// Result of feeding one event to the core.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CoreStep {
    /// Newly arrived files, sorted, each reported once.
    pub arrivals: Vec<PathBuf>,
    pub keep_running: bool,
}

/// Tracks every file seen since startup and the stage it has reached.
#[derive(Debug, Default)]
pub struct ArrivalTracker {
    stages: HashMap<PathBuf, FileStage>,
}

impl ArrivalTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::Changes(change) => CoreStep {
                arrivals: self.accept(&change),
                keep_running: true,
            },
            RuntimeEvent::ShutdownRequested => CoreStep {
                arrivals: Vec::new(),
                keep_running: false,
            },
        }
    }

    /// Forget removed files and return added files not already tracked.
    ///
    /// A file that is removed and later re-appears is reported again.
    pub fn accept(&mut self, change: &ChangeSet) -> Vec<PathBuf> {
        for path in &change.removed {
            if let Some(stage) = self.stages.remove(path) {
                debug!(file = %path.display(), %stage, "file removed from watch directory");
            }
        }

        let mut fresh: Vec<PathBuf> = change
            .added
            .iter()
            .filter(|p| !self.stages.contains_key(*p))
            .cloned()
            .collect();
        fresh.sort();
        fresh.dedup();

        for path in &fresh {
            self.stages.insert(path.clone(), FileStage::Arrived);
        }
        fresh
    }

    pub fn stage(&self, path: &Path) -> Option<FileStage> {
        self.stages.get(path).copied()
    }

    /// Move `path` forward to `next`. Backwards moves and moves out of a
    /// terminal stage are refused and leave the stage unchanged.
    pub fn advance(&mut self, path: &Path, next: FileStage) -> bool {
        let current = self.stages.entry(path.to_path_buf()).or_insert(FileStage::Arrived);
        if current.can_advance_to(next) {
            *current = next;
            true
        } else {
            debug!(file = %path.display(), from = %current, to = %next, "stage change refused");
            false
        }
    }

    /// Number of files currently tracked.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}
