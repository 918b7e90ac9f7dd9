// src/engine/runtime.rs

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::StabilitySettings;
use crate::errors::Result;
use crate::fs::FileSystem;
use crate::ledger::{Fingerprint, Ledger, LedgerEntry, LedgerStatus};
use crate::watch::wait_for_file;

use super::core::ArrivalTracker;
use super::{ArrivalHandler, FileReport, FileStage, RuntimeEvent};

/// Counts reported when the runtime stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub done: usize,
    pub quarantined: usize,
    pub skipped: usize,
}

/// Drives an [`ArrivalHandler`] in response to `RuntimeEvent`s.
///
/// This is the IO shell around [`ArrivalTracker`]: it reads events from the
/// channel, checks each arrival for write stability and against the ledger,
/// hands the survivors to the handler, and records the outcome.
pub struct Runtime<H: ArrivalHandler> {
    tracker: ArrivalTracker,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    handler: H,
    fs: Arc<dyn FileSystem>,
    ledger: Box<dyn Ledger>,
    stability: StabilitySettings,
    /// Fingerprints of files handed to the handler and not yet reported.
    pending: HashMap<PathBuf, Fingerprint>,
    /// Files still growing when last checked; looked at again every
    /// stability poll interval.
    unsettled: BTreeSet<PathBuf>,
    summary: RunSummary,
}

enum Wake {
    Event(Option<RuntimeEvent>),
    Retry,
}

impl<H: ArrivalHandler> fmt::Debug for Runtime<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tracker", &self.tracker)
            .field("pending", &self.pending.len())
            .field("unsettled", &self.unsettled.len())
            .field("summary", &self.summary)
            .finish_non_exhaustive()
    }
}

impl<H: ArrivalHandler> Runtime<H> {
    pub fn new(
        event_rx: mpsc::Receiver<RuntimeEvent>,
        handler: H,
        fs: Arc<dyn FileSystem>,
        ledger: Box<dyn Ledger>,
        stability: StabilitySettings,
    ) -> Self {
        Self {
            tracker: ArrivalTracker::new(),
            event_rx,
            handler,
            fs,
            ledger,
            stability,
            pending: HashMap::new(),
            unsettled: BTreeSet::new(),
            summary: RunSummary::default(),
        }
    }

    /// Main event loop. Returns once shutdown is requested or every sender
    /// is gone, after the handler's background work has drained.
    pub async fn run(mut self) -> Result<RunSummary> {
        info!("runtime started");

        loop {
            let retry_in = (!self.unsettled.is_empty()).then_some(self.stability.poll_interval);
            let wake = tokio::select! {
                e = self.event_rx.recv() => Wake::Event(e),
                _ = retry_timer(retry_in) => Wake::Retry,
            };
            let event = match wake {
                Wake::Event(Some(e)) => e,
                Wake::Event(None) => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
                Wake::Retry => {
                    self.retry_unsettled().await;
                    continue;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.tracker.step(event);
            if !step.arrivals.is_empty() {
                self.process_arrivals(step.arrivals).await;
            }

            if !step.keep_running {
                info!("shutdown requested; stopping runtime");
                break;
            }
        }

        for path in std::mem::take(&mut self.unsettled) {
            warn!(file = %path.display(), "file never settled before shutdown");
            self.skip(&path);
        }

        let reports = self.handler.finish().await;
        self.record(reports);

        info!(
            done = self.summary.done,
            quarantined = self.summary.quarantined,
            skipped = self.summary.skipped,
            "runtime exiting"
        );
        Ok(self.summary)
    }

    async fn process_arrivals(&mut self, arrivals: Vec<PathBuf>) {
        let mut ready = Vec::with_capacity(arrivals.len());

        for path in arrivals {
            if self.tracker.stage(&path) == Some(FileStage::Stabilizing) {
                debug!(file = %path.display(), "checking unsettled file again");
            } else {
                info!(file = %path.display(), "new file");
                self.tracker.advance(&path, FileStage::Stabilizing);
            }

            match wait_for_file(self.fs.as_ref(), &path, &self.stability).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(
                        file = %path.display(),
                        max_wait = ?self.stability.max_wait,
                        "file is still being written; will check again"
                    );
                    self.unsettled.insert(path);
                    continue;
                }
                Err(e) => {
                    warn!(file = %path.display(), error = %e, "file vanished before it settled");
                    self.skip(&path);
                    continue;
                }
            }

            let fingerprint = match self.fs.stat(&path) {
                Ok(stat) => Fingerprint::of(&path, &stat),
                Err(e) => {
                    warn!(file = %path.display(), error = %format!("{e:#}"), "cannot stat file");
                    self.skip(&path);
                    continue;
                }
            };

            if let Some(status) = self.ledger.status(&fingerprint) {
                info!(file = %path.display(), %status, "already in ledger; skipping");
                self.skip(&path);
                continue;
            }

            self.pending.insert(path.clone(), fingerprint);
            ready.push(path);
        }

        if ready.is_empty() {
            return;
        }

        let reports = self.handler.handle_batch(ready).await;
        self.record(reports);
    }

    /// Re-check files that were still growing. Files removed from the
    /// watch directory in the meantime are dropped.
    async fn retry_unsettled(&mut self) {
        let paths: Vec<PathBuf> = std::mem::take(&mut self.unsettled)
            .into_iter()
            .filter(|p| self.tracker.stage(p) == Some(FileStage::Stabilizing))
            .collect();
        if !paths.is_empty() {
            self.process_arrivals(paths).await;
        }
    }

    fn skip(&mut self, path: &std::path::Path) {
        self.tracker.advance(path, FileStage::Skipped);
        self.summary.skipped += 1;
    }

    fn record(&mut self, reports: Vec<FileReport>) {
        for report in reports {
            let status = if report.is_ok() {
                self.summary.done += 1;
                info!(file = %report.path.display(), stage = %report.stage, "file finished");
                LedgerStatus::Done
            } else {
                self.summary.quarantined += 1;
                error!(
                    file = %report.path.display(),
                    error = report.error.as_deref().unwrap_or_default(),
                    "file quarantined"
                );
                LedgerStatus::Quarantined
            };
            self.tracker.advance(&report.path, report.stage);

            let Some(fingerprint) = self.pending.remove(&report.path) else {
                debug!(file = %report.path.display(), "report for a file not handed out by the runtime");
                continue;
            };
            let entry = LedgerEntry {
                fingerprint,
                status,
                path: report.path,
                detail: report.error.unwrap_or_default(),
            };
            if let Err(e) = self.ledger.record(entry) {
                error!(error = %format!("{e:#}"), "failed to write ledger entry");
            }
        }
    }
}

async fn retry_timer(after: Option<Duration>) {
    match after {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
