// src/prepipe/mod.rs

//! Unpack-and-dispatch: turn an arrived exposure into per-CCD batch jobs.
//!
//! `Arrived → Untarred → SplitIntoCCDs → ScriptsGenerated → Submitted`

pub mod sbatch;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::{ConfigFile, PrepipeSettings, SbatchSettings, ToolPaths};
use crate::engine::{ArrivalHandler, FileReport, FileStage, HandlerFuture, RunSummary};
use crate::errors::{PrepipeError, Result};
use crate::exec::{CommandRunner, ToolCommand, run_checked};
use crate::fits::split_exposure;
use crate::fs::FileSystem;
use crate::reduce::exposure_root;
use crate::types::ArrivalMode;

pub use sbatch::{CcdSelection, SbatchJob, chunk_ccds, render_script, shell_quote};

/// What happened to the batch scripts of one exposure.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub scripts: Vec<PathBuf>,
    pub submitted: usize,
}

pub struct Prepipe {
    settings: PrepipeSettings,
    sbatch: SbatchSettings,
    tools: ToolPaths,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
    job_args: Vec<String>,
}

impl std::fmt::Debug for Prepipe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Prepipe")
            .field("push_dir", &self.settings.push_dir)
            .field("mode", &self.settings.mode)
            .finish_non_exhaustive()
    }
}

impl Prepipe {
    /// Build from a configuration validated for `Role::Prepipe`/`Reprocess`,
    /// creating the untar and script directories.
    pub fn new(
        cfg: &ConfigFile,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Result<Self> {
        let settings = cfg.prepipe()?.clone();
        fs.create_dir_all(&settings.untar_dir)?;
        fs.create_dir_all(&settings.sbatch_dir.join("out"))?;

        info!(
            push_dir = %settings.push_dir.display(),
            untar_dir = %settings.untar_dir.display(),
            sbatch_dir = %settings.sbatch_dir.display(),
            run_date = %settings.run_date,
            "prepipe ready"
        );

        Ok(Self {
            settings,
            sbatch: cfg.sbatch.clone(),
            tools: cfg.tools.clone(),
            runner,
            fs,
            job_args: Vec::new(),
        })
    }

    /// Extra global arguments for the job program, e.g. `--config <path>`.
    pub fn with_job_args(mut self, args: Vec<String>) -> Self {
        self.job_args = args;
        self
    }

    pub fn settings(&self) -> &PrepipeSettings {
        &self.settings
    }

    /// Unpack one arrived file and submit its batch scripts.
    pub async fn unpack(&self, path: &Path) -> Result<DispatchSummary> {
        let root = exposure_root(path)
            .ok_or_else(|| anyhow::anyhow!("cannot derive exposure name from {path:?}"))?;
        info!(file = %path.display(), "Unpacking");

        let images = match self.settings.mode {
            ArrivalMode::Compress => self.untar(path, &root).await?,
            ArrivalMode::Raw => self.split(path, &root).await?,
        };

        self.dispatch(&root, &images).await
    }

    async fn untar(&self, path: &Path, root: &str) -> Result<Vec<String>> {
        let cmd = ToolCommand::new(&self.tools.tar)
            .arg("-xf")
            .arg(path)
            .arg("-C")
            .arg(&self.settings.untar_dir);
        run_checked(self.runner.as_ref(), &cmd).await?;

        Ok(self
            .settings
            .ccds
            .iter()
            .map(|ccd| format!("{root}_{ccd}.jp2"))
            .collect())
    }

    async fn split(&self, path: &Path, root: &str) -> Result<Vec<String>> {
        let untar_dir = self.settings.untar_dir.clone();

        let (source, unpacked) = if path.extension().is_some_and(|e| e == "fz") {
            let out = untar_dir.join(format!("{root}.fits"));
            let cmd = ToolCommand::new(&self.tools.funpack)
                .arg("-O")
                .arg(&out)
                .arg(path);
            run_checked(self.runner.as_ref(), &cmd).await?;
            (out, true)
        } else {
            (path.to_path_buf(), false)
        };

        let split_root = root.to_string();
        let split_src = source.clone();
        let written = tokio::task::spawn_blocking(move || {
            split_exposure(&split_src, &untar_dir, &split_root)
        })
        .await
        .map_err(|e| PrepipeError::Fits(format!("split task failed: {e}")))??;

        if unpacked {
            if let Err(e) = self.fs.remove_file(&source) {
                warn!(file = %source.display(), error = %format!("{e:#}"), "could not remove unpacked exposure");
            }
        }

        let names: Vec<String> = written
            .iter()
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .collect();

        Ok(self
            .settings
            .ccds
            .iter()
            .map(|ccd| format!("{root}_{ccd}.fits"))
            .filter(|name| names.contains(name))
            .collect())
    }

    /// Write one script per chunk of CCDs and submit each.
    ///
    /// Every chunk is attempted; a missing script or failed submission is
    /// reported after the rest have been tried.
    pub async fn dispatch(&self, root: &str, images: &[String]) -> Result<DispatchSummary> {
        if images.is_empty() {
            return Err(anyhow::anyhow!("no CCD images for {root}").into());
        }

        let chunks = chunk_ccds(images, self.settings.n_per_script);
        info!(exposure = root, scripts = chunks.len(), "Writing sbatch scripts");

        let mut summary = DispatchSummary::default();
        let mut failures = Vec::new();

        for (k, chunk) in chunks.into_iter().enumerate() {
            let qroot = format!("{root}_q{}", k + 1);
            let script = self.settings.sbatch_dir.join(format!("{qroot}.sbatch"));
            let job = SbatchJob {
                out_prefix: self.settings.sbatch_dir.join("out").join(&qroot),
                qroot,
                images: chunk,
                run_date: &self.settings.run_date,
                program: &self.settings.job_program,
                program_args: &self.job_args,
                settings: &self.sbatch,
            };

            info!(
                script = %script.display(),
                first = job.images.first().map(String::as_str).unwrap_or_default(),
                last = job.images.last().map(String::as_str).unwrap_or_default(),
                "Creating Script"
            );
            self.fs.write(&script, render_script(&job).as_bytes())?;
            summary.scripts.push(script.clone());

            if self.settings.dry_run {
                info!(script = %script.display(), "dry run; not submitting");
                continue;
            }

            if !self.fs.is_file(&script) {
                error!(script = %script.display(), "script missing at submission time");
                failures.push(format!("{} missing", script.display()));
                continue;
            }

            let cmd = ToolCommand::new(&self.tools.sbatch).arg(&script);
            match run_checked(self.runner.as_ref(), &cmd).await {
                Ok(out) => {
                    summary.submitted += 1;
                    info!(script = %script.display(), reply = %out.stdout.trim(), "submitted");
                }
                Err(e) => {
                    error!(script = %script.display(), error = %e, "submission failed");
                    failures.push(e.to_string());
                }
            }
        }

        if failures.is_empty() {
            Ok(summary)
        } else {
            Err(PrepipeError::Other(anyhow::anyhow!(
                "{} of {} scripts not submitted: {}",
                failures.len(),
                summary.scripts.len(),
                failures.join("; ")
            )))
        }
    }
}

impl ArrivalHandler for Prepipe {
    fn handle_batch(&mut self, paths: Vec<PathBuf>) -> HandlerFuture<'_> {
        Box::pin(async move {
            let mut reports = Vec::with_capacity(paths.len());
            for path in paths {
                let report = match self.unpack(&path).await {
                    Ok(_) => FileReport::ok(path, FileStage::Dispatched),
                    Err(e) => FileReport::failed(path, e),
                };
                reports.push(report);
            }
            reports
        })
    }

    fn finish(&mut self) -> HandlerFuture<'_> {
        Box::pin(async { Vec::new() })
    }
}

/// Re-run unpack and dispatch for every file named in `list` (one path per
/// line), pausing `pause` between files. Paths that are not files are
/// reported and skipped.
pub async fn reprocess(prepipe: &Prepipe, fs: &dyn FileSystem, list: &Path, pause: Duration) -> Result<RunSummary> {
    let text = fs.read_to_string(list)?;
    let mut summary = RunSummary::default();
    let mut first = true;

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let path = PathBuf::from(line);
        if !fs.is_file(&path) {
            warn!(file = %path.display(), "not a file; skipping");
            summary.skipped += 1;
            continue;
        }

        if !first && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
        first = false;

        info!(file = %path.display(), "Reprocessing");
        match prepipe.unpack(&path).await {
            Ok(_) => summary.done += 1,
            Err(e) => {
                error!(file = %path.display(), error = %e, "reprocessing failed");
                summary.quarantined += 1;
            }
        }
    }

    info!(
        done = summary.done,
        failed = summary.quarantined,
        skipped = summary.skipped,
        "reprocess finished"
    );
    Ok(summary)
}
