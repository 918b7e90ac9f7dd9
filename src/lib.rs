// src/lib.rs

pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fits;
pub mod fs;
pub mod ledger;
pub mod logging;
pub mod prepipe;
pub mod push;
pub mod reduce;
pub mod types;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::cli::{CliArgs, Command, SplitArgs};
use crate::config::{
    RawConfigFile, Role, StabilitySettings, WatchSettings, default_config_path, load_from_path,
    load_or_default, validate,
};
use crate::engine::{ArrivalHandler, RunSummary, Runtime, RuntimeEvent};
use crate::exec::{CommandRunner, TokioRunner};
use crate::fs::{FileSystem, RealFileSystem};
use crate::ledger::{Ledger, open_ledger};
use crate::logging::{LogOptions, init_logging};
use crate::prepipe::Prepipe;
use crate::push::CtioPush;
use crate::reduce::{CcdOutcome, CcdReducer, exposure_root};
use crate::types::{PushMethod, parse_duration};
use crate::watch::{DirectoryWatcher, FilePattern, spawn_poller};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and command-line overrides
/// - logging
/// - the subcommand's handler, runner and filesystem
/// - (for `prepipe` and `push`) the directory poller and Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let (mut raw, config_path) = load_config(args.config.as_deref())?;

    let log_file = init_logging(&LogOptions {
        level: args.log_level,
        debug: args.debug,
        quiet: args.quiet,
        dir: args.log_dir.clone().or_else(|| raw.logging.dir.clone()),
        prefix: args.command.log_prefix().to_string(),
    })?;
    if let Some(path) = log_file {
        info!(file = %path.display(), "logging to file");
    }
    match &config_path {
        Some(path) => info!(config = %path.display(), "loaded configuration"),
        None => debug!("no config file; using defaults and flags"),
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(TokioRunner);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);

    match args.command {
        Command::Prepipe(flags) => {
            flags.apply(&mut raw);
            let cfg = validate(raw, Role::Prepipe)?;
            let prepipe =
                Prepipe::new(&cfg, runner, Arc::clone(&fs))?.with_job_args(job_args(&config_path));
            let settings = prepipe.settings().clone();
            let ledger = open_ledger(&cfg.ledger, &settings.push_dir)?;

            info!(dir = %settings.push_dir.display(), "Now running!");
            watch_and_run(
                prepipe,
                fs,
                &settings.push_dir,
                &settings.pattern,
                settings.watch,
                settings.stability,
                ledger,
            )
            .await?;
        }
        Command::Reprocess(flags) => {
            flags.prepipe.apply(&mut raw);
            let pause = parse_duration(&flags.pause)
                .map_err(|e| anyhow::anyhow!("--pause: {e}"))?;
            let cfg = validate(raw, Role::Reprocess)?;
            let prepipe =
                Prepipe::new(&cfg, runner, Arc::clone(&fs))?.with_job_args(job_args(&config_path));
            let summary =
                prepipe::reprocess(&prepipe, fs.as_ref(), &flags.reprocess_list, pause).await?;
            ensure_no_failures(&summary)?;
        }
        Command::Push(flags) => {
            flags.apply(&mut raw);
            let cfg = validate(raw, Role::Push)?;
            let push = CtioPush::new(&cfg, runner, Arc::clone(&fs))?;
            let settings = cfg.push()?.clone();

            if push.method() == PushMethod::EndOfNight {
                let summary = push.end_of_night().await?;
                ensure_no_failures(&summary)?;
            } else {
                let ledger = open_ledger(&cfg.ledger, &settings.data_dir)?;
                info!(dir = %settings.data_dir.display(), "Now running!");
                watch_and_run(
                    push,
                    fs,
                    &settings.data_dir,
                    &settings.pattern,
                    settings.watch,
                    settings.stability,
                    ledger,
                )
                .await?;
            }
        }
        Command::ProcessCcd(flags) => {
            flags.apply(&mut raw);
            let cfg = validate(raw, Role::ProcessCcd)?;
            let run_date = cfg
                .run_date()
                .context("run date missing after validation")?
                .to_string();
            let reducer = CcdReducer::new(&cfg, runner, fs)?;
            match reducer.process_ccd(&flags.input, &run_date).await? {
                CcdOutcome::Filed { frame, kind } => {
                    info!(frame = %frame.display(), %kind, "calibration frame filed")
                }
                CcdOutcome::Reduced { products, .. } => {
                    info!(frame = %products.frame.display(), "frame reduced")
                }
            }
        }
        Command::Split(flags) => {
            validate(raw, Role::Split)?;
            run_split(flags).await?;
        }
    }

    Ok(())
}

/// Explicit `--config` must exist; the default `Prepipe.toml` is optional.
fn load_config(explicit: Option<&Path>) -> Result<(RawConfigFile, Option<PathBuf>)> {
    match explicit {
        Some(path) => {
            let raw = load_from_path(path).with_context(|| format!("loading config {path:?}"))?;
            Ok((raw, Some(path.to_path_buf())))
        }
        None => {
            let path = default_config_path();
            let present = path.is_file();
            let raw = load_or_default(&path).with_context(|| format!("loading config {path:?}"))?;
            Ok((raw, present.then_some(path)))
        }
    }
}

/// Arguments batch jobs need to read the same configuration file.
fn job_args(config_path: &Option<PathBuf>) -> Vec<String> {
    match config_path {
        Some(path) => {
            let absolute = std::path::absolute(path).unwrap_or_else(|_| path.clone());
            vec!["--config".to_string(), absolute.to_string_lossy().into_owned()]
        }
        None => Vec::new(),
    }
}

/// Poll `dir` for files matching `pattern` and feed them to `handler` until
/// Ctrl-C.
async fn watch_and_run<H: ArrivalHandler>(
    handler: H,
    fs: Arc<dyn FileSystem>,
    dir: &Path,
    pattern: &str,
    watch: WatchSettings,
    stability: StabilitySettings,
    ledger: Box<dyn Ledger>,
) -> Result<RunSummary> {
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let watcher = DirectoryWatcher::new(Arc::clone(&fs), dir, FilePattern::new(pattern)?);
    let _watcher_handle = spawn_poller(watcher, watch, rt_tx.clone())?;

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("Ctrl+C received; finishing outstanding work");
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }
    drop(rt_tx);

    let runtime = Runtime::new(rt_rx, handler, fs, ledger, stability);
    Ok(runtime.run().await?)
}

async fn run_split(flags: SplitArgs) -> Result<()> {
    let root = exposure_root(&flags.file)
        .with_context(|| format!("cannot derive exposure name from {:?}", flags.file))?;
    let out_dir = match flags.out_dir {
        Some(dir) => dir,
        None => flags
            .file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    };

    let src = flags.file.clone();
    let written = tokio::task::spawn_blocking(move || fits::split_exposure(&src, &out_dir, &root))
        .await
        .context("split task failed")??;
    for path in written {
        println!("{}", path.display());
    }
    Ok(())
}

fn ensure_no_failures(summary: &RunSummary) -> Result<()> {
    if summary.quarantined > 0 {
        anyhow::bail!("{} file(s) failed", summary.quarantined);
    }
    Ok(())
}
