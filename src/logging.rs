// src/logging.rs

//! Logging setup for `dwf-prepipe` using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the console log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `--debug` (debug) or `--quiet` (warn)
//! 3. `PREPIPE_LOG` environment variable (any `EnvFilter` directive)
//! 4. default to `info`
//!
//! Console logs go to STDERR so that stdout stays free for dry-run output.
//! When a log directory is configured, everything at debug and above is also
//! written to `<dir>/<prefix>_<YYYYmmdd_HH:MM:SS>.log`.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use crate::cli::LogLevel;

pub const LOG_ENV: &str = "PREPIPE_LOG";

/// What the command line and config say about logging.
#[derive(Debug, Clone, Default)]
pub struct LogOptions {
    pub level: Option<LogLevel>,
    pub debug: bool,
    pub quiet: bool,
    pub dir: Option<PathBuf>,
    /// File name prefix, e.g. `prepipe` or `prepipe_push`.
    pub prefix: String,
}

/// Initialise the global subscriber. Returns the log file path, if any.
///
/// Safe to call once at startup.
pub fn init_logging(opts: &LogOptions) -> Result<Option<PathBuf>> {
    let env = std::env::var(LOG_ENV).ok();
    let directive = console_directive(opts.level, opts.debug, opts.quiet, env.as_deref());
    let console_filter = EnvFilter::try_new(&directive)
        .or_else(|_| EnvFilter::try_new("info"))
        .context("building console log filter")?;

    let console = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .with_filter(console_filter);

    let (file_layer, file_path) = match &opts.dir {
        Some(dir) => {
            let path = dir.join(log_file_name(&opts.prefix, Local::now()));
            let file = open_log_file(&path)?;
            let layer = fmt::layer()
                .with_ansi(false)
                .with_target(true)
                .with_writer(Arc::new(file))
                .with_filter(LevelFilter::DEBUG);
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init()
        .context("installing tracing subscriber")?;

    Ok(file_path)
}

/// Console filter directive, highest priority first.
pub fn console_directive(
    level: Option<LogLevel>,
    debug: bool,
    quiet: bool,
    env: Option<&str>,
) -> String {
    if let Some(level) = level {
        return level_str(level).to_string();
    }
    if debug {
        return "debug".to_string();
    }
    if quiet {
        return "warn".to_string();
    }
    match env.map(str::trim) {
        Some(env) if !env.is_empty() => env.to_string(),
        _ => "info".to_string(),
    }
}

/// `<prefix>_<YYYYmmdd_HH:MM:SS>.log`
pub fn log_file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{prefix}_{}.log", at.format("%Y%m%d_%H:%M:%S"))
}

fn open_log_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating log dir {:?}", parent))?;
    }
    File::create(path).with_context(|| format!("creating log file {:?}", path))
}

fn level_str(lvl: LogLevel) -> &'static str {
    match lvl {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Trace => "trace",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn flag_beats_debug_beats_env() {
        assert_eq!(
            console_directive(Some(LogLevel::Error), true, false, Some("trace")),
            "error"
        );
        assert_eq!(console_directive(None, true, true, Some("trace")), "debug");
        assert_eq!(console_directive(None, false, true, Some("trace")), "warn");
        assert_eq!(
            console_directive(None, false, false, Some("dwf_prepipe=debug")),
            "dwf_prepipe=debug"
        );
        assert_eq!(console_directive(None, false, false, Some("  ")), "info");
        assert_eq!(console_directive(None, false, false, None), "info");
    }

    #[test]
    fn file_name_carries_a_timestamp() {
        let at = Local.with_ymd_and_hms(2024, 3, 13, 4, 5, 6).unwrap();
        assert_eq!(
            log_file_name("prepipe_push", at),
            "prepipe_push_20240313_04:05:06.log"
        );
    }
}
