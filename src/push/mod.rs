// src/push/mod.rs

//! Telescope-side shipping of raw exposures.
//!
//! Each new `.fits.fz` is unpacked, compressed to JPEG2000, tarred, copied to
//! the remote landing directory and moved into the pipeline's target
//! directory. How files are scheduled depends on the [`PushMethod`]:
//!
//! - serial: one file at a time, in name order
//! - parallel: every file goes to a bounded [`WorkerPool`]
//! - bundle: groups of `nbundle`; the last file of each group runs inline
//! - end of night: a one-shot catch-up of whatever never arrived remotely

pub mod package;
pub mod reconcile;
pub mod transfer;

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::ConfigFile;
use crate::engine::{ArrivalHandler, FileReport, HandlerFuture, RunSummary};
use crate::errors::Result;
use crate::exec::{CommandRunner, ToolCommand, WorkerPool, run_checked};
use crate::fs::FileSystem;
use crate::reduce::exposure_root;
use crate::types::PushMethod;
use crate::watch::FilePattern;

pub use package::PushPaths;
pub use reconcile::{Reconciliation, parse_remote_listing, reconcile};
pub use transfer::PushWorker;

pub struct CtioPush {
    worker: Arc<PushWorker>,
    pool: WorkerPool<FileReport>,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for CtioPush {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CtioPush")
            .field("worker", &self.worker)
            .field("pool", &self.pool)
            .finish()
    }
}

impl CtioPush {
    /// Build from a configuration validated for `Role::Push`, creating the
    /// JPEG2000 staging directory.
    pub fn new(
        cfg: &ConfigFile,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let settings = cfg.push()?.clone();
        fs.create_dir_all(&settings.jp2_dir)?;

        info!(
            data_dir = %settings.data_dir.display(),
            qs = settings.qs,
            method = %settings.method,
            receiver = %cfg.remote.receiver(),
            "push ready"
        );

        let pool = WorkerPool::new(settings.max_parallel);
        let worker = PushWorker::new(
            settings,
            cfg.remote.clone(),
            cfg.tools.clone(),
            runner,
            Arc::clone(&fs),
        );
        Ok(Self {
            worker: Arc::new(worker),
            pool,
            fs,
        })
    }

    pub fn method(&self) -> PushMethod {
        self.worker.settings().method
    }

    async fn serial(&mut self, paths: Vec<PathBuf>) -> Vec<FileReport> {
        let mut reports = Vec::with_capacity(paths.len());
        for path in paths {
            reports.push(Arc::clone(&self.worker).ship(path).await);
        }
        reports
    }

    /// Ship `path` in the background. A transfer task that dies still
    /// reports the file, as failed.
    fn submit(&mut self, path: PathBuf) {
        let job = Arc::clone(&self.worker).ship(path.clone());
        self.pool.submit(job, move |e| {
            FileReport::failed(path, format!("transfer task failed: {e}"))
        });
    }

    fn parallel(&mut self, paths: Vec<PathBuf>) -> Vec<FileReport> {
        for path in paths {
            self.submit(path);
        }
        self.pool.drain_completed()
    }

    async fn bundle(&mut self, paths: Vec<PathBuf>) -> Vec<FileReport> {
        let mut reports = Vec::new();
        for bundle in paths.chunks(self.worker.settings().nbundle.max(1)) {
            let names: Vec<String> = bundle
                .iter()
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            info!(files = %names.join(", "), "Bundling");

            if let Some((last, rest)) = bundle.split_last() {
                for path in rest {
                    self.submit(path.clone());
                }
                reports.push(Arc::clone(&self.worker).ship(last.clone()).await);
            }
        }
        reports.extend(self.pool.drain_completed());
        reports
    }

    /// Ship every local exposure that never reached the remote target
    /// directory, newest first, one at a time.
    pub async fn end_of_night(&self) -> Result<RunSummary> {
        let settings = self.worker.settings();
        let remote = self.worker.remote();

        let ls = ToolCommand::new(&self.worker.tools().ssh)
            .arg(remote.receiver())
            .arg("ls")
            .arg(&remote.target_dir);
        let listing = run_checked(self.worker.runner(), &ls).await?;
        let sent = parse_remote_listing(&listing.stdout);

        let pattern = FilePattern::new(&settings.pattern)?;
        let local: Vec<String> = self
            .fs
            .read_dir(&settings.data_dir)?
            .into_iter()
            .filter(|p| pattern.matches(p))
            .filter_map(|p| exposure_root(&p))
            .collect();

        let report = reconcile(&local, &sent, settings.exp_min);
        info!("Starting end of night transfers...");
        info!(
            "Missing {} of {} files ({:.1}% successful)",
            report.absent,
            report.total,
            report.percent_sent()
        );

        let mut summary = RunSummary {
            skipped: report.absent - report.missing.len(),
            ..RunSummary::default()
        };
        let count = report.missing.len();
        for (i, root) in report.missing.iter().enumerate() {
            info!("Processing: {root} ({} of {count})", i + 1);
            let path = self.worker.paths(root).packed;
            let outcome = Arc::clone(&self.worker).ship(path).await;
            match &outcome.error {
                None => summary.done += 1,
                Some(e) => {
                    error!(exposure = %root, error = %e, "end of night transfer failed");
                    summary.quarantined += 1;
                }
            }
        }

        info!(
            done = summary.done,
            failed = summary.quarantined,
            skipped = summary.skipped,
            "end of night finished"
        );
        Ok(summary)
    }
}

impl ArrivalHandler for CtioPush {
    fn handle_batch(&mut self, mut paths: Vec<PathBuf>) -> HandlerFuture<'_> {
        paths.sort();
        Box::pin(async move {
            match self.method() {
                PushMethod::Parallel => self.parallel(paths),
                PushMethod::Bundle => self.bundle(paths).await,
                PushMethod::Serial | PushMethod::EndOfNight => self.serial(paths).await,
            }
        })
    }

    fn finish(&mut self) -> HandlerFuture<'_> {
        Box::pin(async move {
            if self.pool.in_flight() > 0 {
                info!(in_flight = self.pool.in_flight(), "waiting for transfers to finish");
            }
            self.pool.wait_all().await
        })
    }
}
