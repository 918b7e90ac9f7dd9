// src/config/validate.rs

use std::path::{Path, PathBuf};

use globset::Glob;
use regex::Regex;

use crate::config::model::{
    ConfigFile, PrepipeSettings, ProcessSettings, PushSettings, RawConfigFile,
    PREPIPE_TIMING, PUSH_TIMING, RawPrepipeSection, RawProcessSection, RawPushSection,
    RawStabilitySection, RawWatchSection, StabilitySettings, TimingDefaults, WatchSettings,
};
use crate::errors::{PrepipeError, Result};
use crate::prepipe::CcdSelection;
use crate::types::parse_duration;

/// Quantisation step used when neither the file nor `QS` supplies one.
pub const DEFAULT_QS: f64 = 0.000055;

const RUN_DATE_PATTERN: &str = r"^ut\d{6}$";

/// Which subcommand the configuration is validated for. Each role only checks
/// (and populates) the sections it uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Prepipe,
    Reprocess,
    Push,
    ProcessCcd,
    Split,
}

impl Role {
    fn needs_prepipe(self) -> bool {
        matches!(self, Role::Prepipe | Role::Reprocess)
    }

    fn needs_run_date(self) -> bool {
        matches!(self, Role::Prepipe | Role::Reprocess | Role::ProcessCcd)
    }
}

/// Validate a raw configuration for `role`, reporting every problem at once.
pub fn validate(raw: RawConfigFile, role: Role) -> Result<ConfigFile> {
    let mut problems = Vec::new();

    let run_date = if role.needs_run_date() {
        check_run_date(raw.run_date.as_deref(), &mut problems)
    } else {
        raw.run_date.clone()
    };

    let prepipe = if role.needs_prepipe() {
        check_reservation(raw.sbatch.reservation.as_deref(), &mut problems);
        check_prepipe(&raw.prepipe, run_date.as_deref(), &mut problems)
    } else {
        None
    };

    let push = if role == Role::Push {
        check_push(&raw.push, &mut problems)
    } else {
        None
    };

    let process = if role == Role::ProcessCcd {
        check_process(&raw.process, &raw.prepipe, &mut problems)
    } else {
        None
    };

    if !problems.is_empty() {
        return Err(PrepipeError::ConfigError(problems.join("; ")));
    }

    Ok(ConfigFile {
        run_date,
        prepipe,
        push,
        process,
        sbatch: raw.sbatch,
        remote: raw.remote,
        tools: raw.tools,
        ledger: raw.ledger,
        logging: raw.logging,
    })
}

/// Check the `utYYMMDD` night label on its own.
pub fn validate_run_date(run_date: &str) -> Result<()> {
    let re = Regex::new(RUN_DATE_PATTERN)
        .map_err(|e| PrepipeError::ConfigError(format!("run date pattern: {e}")))?;
    if re.is_match(run_date) {
        Ok(())
    } else {
        Err(PrepipeError::InvalidRunDate(run_date.to_string()))
    }
}

fn check_run_date(run_date: Option<&str>, problems: &mut Vec<String>) -> Option<String> {
    match run_date {
        None => {
            problems.push("run_date is required (set it in the file, --run-date or RUN_DATE)".to_string());
            None
        }
        Some(d) => match validate_run_date(d) {
            Ok(()) => Some(d.to_string()),
            Err(e) => {
                problems.push(e.to_string());
                None
            }
        },
    }
}

fn check_duration(label: &str, value: &str, problems: &mut Vec<String>) -> std::time::Duration {
    match parse_duration(value) {
        Ok(d) => d,
        Err(e) => {
            problems.push(format!("{label}: {e}"));
            std::time::Duration::ZERO
        }
    }
}

fn check_watch(
    section: &str,
    raw: &RawWatchSection,
    defaults: &TimingDefaults,
    problems: &mut Vec<String>,
) -> WatchSettings {
    let poll = raw.poll_interval.as_deref().unwrap_or(defaults.watch_poll);
    let poll_interval = check_duration(&format!("[{section}.watch].poll_interval"), poll, problems);
    if poll_interval.is_zero() && parse_duration(poll).is_ok() {
        problems.push(format!("[{section}.watch].poll_interval must be > 0"));
    }
    WatchSettings {
        poll_interval,
        idle_warning: check_duration(
            &format!("[{section}.watch].idle_warning"),
            raw.idle_warning.as_deref().unwrap_or(defaults.idle_warning),
            problems,
        ),
        max_backoff: check_duration(
            &format!("[{section}.watch].max_backoff"),
            raw.max_backoff.as_deref().unwrap_or(defaults.max_backoff),
            problems,
        ),
        backend: raw.backend,
        process_existing: raw.process_existing,
    }
}

fn check_stability(
    section: &str,
    raw: &RawStabilitySection,
    defaults: &TimingDefaults,
    problems: &mut Vec<String>,
) -> StabilitySettings {
    StabilitySettings {
        poll_interval: check_duration(
            &format!("[{section}.stability].poll_interval"),
            raw.poll_interval.as_deref().unwrap_or(defaults.stability_poll),
            problems,
        ),
        max_wait: check_duration(
            &format!("[{section}.stability].max_wait"),
            raw.max_wait.as_deref().unwrap_or(defaults.max_wait),
            problems,
        ),
    }
}

/// The name lands verbatim in a `#SBATCH --reservation=` line.
fn check_reservation(reservation: Option<&str>, problems: &mut Vec<String>) {
    let Some(name) = reservation else {
        return;
    };
    if name.is_empty() {
        problems.push("[sbatch].reservation must not be empty".to_string());
    } else if name.chars().any(|c| c.is_whitespace() || c.is_control()) {
        problems.push(format!(
            "[sbatch].reservation {name:?} must not contain whitespace or control characters"
        ));
    }
}

fn check_pattern(label: &str, pattern: &str, problems: &mut Vec<String>) {
    if let Err(e) = Glob::new(pattern) {
        problems.push(format!("{label}: invalid glob '{pattern}': {e}"));
    }
}

fn require_dir(label: &str, dir: Option<&PathBuf>, problems: &mut Vec<String>) -> Option<PathBuf> {
    match dir {
        None => {
            problems.push(format!("{label} is required"));
            None
        }
        Some(d) if !d.is_dir() => {
            problems.push(format!("{label} {d:?} is not an existing directory"));
            None
        }
        Some(d) => Some(d.clone()),
    }
}

fn check_prepipe(
    raw: &RawPrepipeSection,
    run_date: Option<&str>,
    problems: &mut Vec<String>,
) -> Option<PrepipeSettings> {
    let push_dir = require_dir("[prepipe].push_dir", raw.push_dir.as_ref(), problems);
    check_pattern("[prepipe].pattern", &raw.pattern, problems);

    if raw.n_per_script == 0 {
        problems.push("[prepipe].n_per_script must be >= 1 (got 0)".to_string());
    }

    let ccds = CcdSelection {
        first: raw.ccd_first,
        last: raw.ccd_last,
        exclude: raw.ccd_exclude.clone(),
    }
    .ccds();
    if ccds.is_empty() {
        problems.push(format!(
            "CCD range {}..={} is empty after exclusions",
            raw.ccd_first, raw.ccd_last
        ));
    }

    let watch = check_watch("prepipe", &raw.watch, &PREPIPE_TIMING, problems);
    let stability = check_stability("prepipe", &raw.stability, &PREPIPE_TIMING, problems);

    let push_dir = push_dir?;
    let run_date = run_date?;
    Some(PrepipeSettings {
        untar_dir: raw
            .untar_dir
            .clone()
            .unwrap_or_else(|| push_dir.join("untar")),
        sbatch_dir: raw
            .sbatch_dir
            .clone()
            .unwrap_or_else(|| push_dir.join("sbatch")),
        push_dir,
        pattern: raw.pattern.clone(),
        mode: raw.mode,
        n_per_script: raw.n_per_script,
        ccds,
        job_program: raw.job_program.clone(),
        dry_run: raw.dry_run,
        run_date: run_date.to_string(),
        watch,
        stability,
    })
}

fn check_push(raw: &RawPushSection, problems: &mut Vec<String>) -> Option<PushSettings> {
    let data_dir = require_dir("[push].data_dir", raw.data_dir.as_ref(), problems);
    check_pattern("[push].pattern", &raw.pattern, problems);

    if raw.nbundle == 0 {
        problems.push("[push].nbundle must be >= 1 (got 0)".to_string());
    }
    if raw.max_parallel == 0 {
        problems.push("[push].max_parallel must be >= 1 (got 0)".to_string());
    }
    let qs = raw.qs.unwrap_or(DEFAULT_QS);
    if !(qs.is_finite() && qs > 0.0) {
        problems.push(format!("[push].qs must be a positive number (got {qs})"));
    }

    let watch = check_watch("push", &raw.watch, &PUSH_TIMING, problems);
    let stability = check_stability("push", &raw.stability, &PUSH_TIMING, problems);

    let data_dir = data_dir?;
    Some(PushSettings {
        jp2_dir: raw.jp2_dir.clone().unwrap_or_else(|| data_dir.join("jp2")),
        data_dir,
        pattern: raw.pattern.clone(),
        method: raw.method,
        nbundle: raw.nbundle,
        max_parallel: raw.max_parallel,
        qs,
        exp_min: raw.exp_min,
        watch,
        stability,
    })
}

fn check_process(
    raw: &RawProcessSection,
    prepipe: &RawPrepipeSection,
    problems: &mut Vec<String>,
) -> Option<ProcessSettings> {
    let untar_dir = match (&raw.untar_dir, &prepipe.untar_dir, &prepipe.push_dir) {
        (Some(d), _, _) | (None, Some(d), _) => Some(d.clone()),
        (None, None, Some(push)) => Some(push.join("untar")),
        (None, None, None) => {
            problems.push(
                "[process].untar_dir is required (or set [prepipe].push_dir / PUSH_DIR)"
                    .to_string(),
            );
            None
        }
    };

    let rawdata_dir = match &raw.rawdata_dir {
        None => {
            problems.push("[process].rawdata_dir is required".to_string());
            None
        }
        Some(d) if d.file_name().and_then(|n| n.to_str()) != Some("rawdata") => {
            problems.push(format!(
                "[process].rawdata_dir should end with 'rawdata', is instead {d:?}"
            ));
            None
        }
        Some(d) => Some(d.clone()),
    };

    let gaia_dir = require_dir("[process].gaia_dir", raw.gaia_dir.as_ref(), problems);
    let astromatic_dir = match &raw.astromatic_dir {
        None => Some(PathBuf::from(".")),
        Some(d) => require_dir("[process].astromatic_dir", Some(d), problems),
    };

    let rawdata_dir = rawdata_dir?;
    Some(ProcessSettings {
        untar_dir: untar_dir?,
        local_dir: raw.local_dir.clone(),
        workspace_dir: workspace_for(&rawdata_dir),
        rawdata_dir,
        gaia_dir: gaia_dir?,
        astromatic_dir: astromatic_dir?,
    })
}

/// Sibling of the raw-data tree: the last `rawdata` component becomes
/// `workspace`.
pub fn workspace_for(rawdata_dir: &Path) -> PathBuf {
    match rawdata_dir.parent() {
        Some(parent) => parent.join("workspace"),
        None => PathBuf::from("workspace"),
    }
}
