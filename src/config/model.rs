// src/config/model.rs

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{PrepipeError, Result};
use crate::types::{ArrivalMode, LedgerMode, PushMethod, WatchBackend};

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// run_date = "ut240313"
///
/// [prepipe]
/// push_dir = "/fred/oz100/pipes/DWF_PIPE/CTIO_PUSH"
/// n_per_script = 5
/// ccd_exclude = [33]
///
/// [sbatch]
/// reservation = "dwf"
///
/// [push]
/// data_dir = "/home4/images/fits/2019B-0253"
/// method = "b"
/// qs = 0.000055
///
/// [remote]
/// user = "fstars"
/// host = "ozstar.swin.edu.au"
/// ```
///
/// All sections are optional and have defaults. Command-line flags are applied
/// on top of this before validation.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfigFile {
    /// Observing night, `utYYMMDD`.
    #[serde(default)]
    pub run_date: Option<String>,

    #[serde(default)]
    pub prepipe: RawPrepipeSection,

    #[serde(default)]
    pub sbatch: SbatchSettings,

    #[serde(default)]
    pub push: RawPushSection,

    #[serde(default)]
    pub remote: RemoteSettings,

    #[serde(default)]
    pub process: RawProcessSection,

    #[serde(default)]
    pub tools: ToolPaths,

    #[serde(default)]
    pub ledger: LedgerSettings,

    #[serde(default)]
    pub logging: LoggingSection,
}

/// `[prepipe.watch]` / `[push.watch]`. Keys left out fall back to the
/// owning section's [`TimingDefaults`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawWatchSection {
    #[serde(default)]
    pub poll_interval: Option<String>,
    #[serde(default)]
    pub idle_warning: Option<String>,
    #[serde(default)]
    pub max_backoff: Option<String>,
    #[serde(default)]
    pub backend: WatchBackend,
    /// Report files already present at startup as arrivals.
    #[serde(default)]
    pub process_existing: bool,
}

/// `[prepipe.stability]` / `[push.stability]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawStabilitySection {
    #[serde(default)]
    pub poll_interval: Option<String>,
    #[serde(default)]
    pub max_wait: Option<String>,
}

/// Durations used for watch and stability keys a section leaves out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingDefaults {
    pub watch_poll: &'static str,
    pub idle_warning: &'static str,
    pub max_backoff: &'static str,
    pub stability_poll: &'static str,
    pub max_wait: &'static str,
}

pub const PREPIPE_TIMING: TimingDefaults = TimingDefaults {
    watch_poll: "5s",
    idle_warning: "60s",
    max_backoff: "60s",
    stability_poll: "0.5s",
    max_wait: "15s",
};

pub const PUSH_TIMING: TimingDefaults = TimingDefaults {
    watch_poll: "1s",
    idle_warning: "60s",
    max_backoff: "60s",
    stability_poll: "3s",
    max_wait: "120s",
};

/// `[prepipe]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPrepipeSection {
    /// Directory receiving tarballs from the telescope site.
    #[serde(default)]
    pub push_dir: Option<PathBuf>,
    /// Defaults to `<push_dir>/untar`.
    #[serde(default)]
    pub untar_dir: Option<PathBuf>,
    /// Defaults to `<push_dir>/sbatch`.
    #[serde(default)]
    pub sbatch_dir: Option<PathBuf>,
    #[serde(default = "default_prepipe_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub mode: ArrivalMode,
    #[serde(default = "default_n_per_script")]
    pub n_per_script: usize,
    #[serde(default = "default_ccd_first")]
    pub ccd_first: u32,
    #[serde(default = "default_ccd_last")]
    pub ccd_last: u32,
    #[serde(default)]
    pub ccd_exclude: Vec<u32>,
    /// Program invoked by each batch-script job line.
    #[serde(default = "default_job_program")]
    pub job_program: String,
    /// Write scripts but never call the submission command.
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub watch: RawWatchSection,
    #[serde(default)]
    pub stability: RawStabilitySection,
}

fn default_prepipe_pattern() -> String {
    "*.tar".to_string()
}

fn default_n_per_script() -> usize {
    5
}

fn default_ccd_first() -> u32 {
    1
}

fn default_ccd_last() -> u32 {
    59
}

fn default_job_program() -> String {
    "dwf-prepipe".to_string()
}

impl Default for RawPrepipeSection {
    fn default() -> Self {
        Self {
            push_dir: None,
            untar_dir: None,
            sbatch_dir: None,
            pattern: default_prepipe_pattern(),
            mode: ArrivalMode::default(),
            n_per_script: default_n_per_script(),
            ccd_first: default_ccd_first(),
            ccd_last: default_ccd_last(),
            ccd_exclude: Vec::new(),
            job_program: default_job_program(),
            dry_run: false,
            watch: RawWatchSection::default(),
            stability: RawStabilitySection::default(),
        }
    }
}

/// `[sbatch]` section: resources requested by every generated batch script.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SbatchSettings {
    #[serde(default = "default_walltime")]
    pub walltime: String,
    #[serde(default = "default_account")]
    pub account: String,
    #[serde(default = "default_nodes")]
    pub nodes: u32,
    #[serde(default = "default_ntasks_per_node")]
    pub ntasks_per_node: u32,
    #[serde(default = "default_mem")]
    pub mem: String,
    #[serde(default = "default_tmp")]
    pub tmp: String,
    /// Slurm reservation; no `--reservation` line when unset.
    #[serde(default)]
    pub reservation: Option<String>,
}

fn default_walltime() -> String {
    "00:05:00".to_string()
}

fn default_account() -> String {
    "oz100".to_string()
}

fn default_nodes() -> u32 {
    1
}

fn default_ntasks_per_node() -> u32 {
    16
}

fn default_mem() -> String {
    "90G".to_string()
}

fn default_tmp() -> String {
    "4G".to_string()
}

impl Default for SbatchSettings {
    fn default() -> Self {
        Self {
            walltime: default_walltime(),
            account: default_account(),
            nodes: default_nodes(),
            ntasks_per_node: default_ntasks_per_node(),
            mem: default_mem(),
            tmp: default_tmp(),
            reservation: None,
        }
    }
}

/// `[push]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPushSection {
    /// Directory where raw `.fits.fz` exposures land.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Defaults to `<data_dir>/jp2`.
    #[serde(default)]
    pub jp2_dir: Option<PathBuf>,
    #[serde(default = "default_push_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub method: PushMethod,
    #[serde(default = "default_nbundle")]
    pub nbundle: usize,
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// JPEG2000 quantisation step handed to the FITS to JPEG2000 converter.
    #[serde(default)]
    pub qs: Option<f64>,
    /// Only exposures numbered above this are re-sent at end of night.
    #[serde(default = "default_exp_min")]
    pub exp_min: i64,
    #[serde(default)]
    pub watch: RawWatchSection,
    #[serde(default)]
    pub stability: RawStabilitySection,
}

fn default_push_pattern() -> String {
    "*.fits.fz".to_string()
}

fn default_nbundle() -> usize {
    4
}

fn default_max_parallel() -> usize {
    4
}

fn default_exp_min() -> i64 {
    -1
}

impl Default for RawPushSection {
    fn default() -> Self {
        Self {
            data_dir: None,
            jp2_dir: None,
            pattern: default_push_pattern(),
            method: PushMethod::default(),
            nbundle: default_nbundle(),
            max_parallel: default_max_parallel(),
            qs: None,
            exp_min: default_exp_min(),
            watch: RawWatchSection::default(),
            stability: RawStabilitySection::default(),
        }
    }
}

/// `[remote]` section: where packaged tarballs are published.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct RemoteSettings {
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default = "default_host")]
    pub host: String,
    /// Landing directory for `scp`.
    #[serde(default = "default_remote_push_dir")]
    pub push_dir: PathBuf,
    /// Final directory the tarball is moved into with `ssh mv`.
    #[serde(default = "default_remote_target_dir")]
    pub target_dir: PathBuf,
}

fn default_user() -> String {
    "fstars".to_string()
}

fn default_host() -> String {
    "ozstar.swin.edu.au".to_string()
}

fn default_remote_push_dir() -> PathBuf {
    PathBuf::from("/fred/oz100/fstars/push")
}

fn default_remote_target_dir() -> PathBuf {
    PathBuf::from("/fred/oz100/pipes/DWF_PIPE/CTIO_PUSH")
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            user: default_user(),
            host: default_host(),
            push_dir: default_remote_push_dir(),
            target_dir: default_remote_target_dir(),
        }
    }
}

impl RemoteSettings {
    /// `user@host`, as passed to `scp` and `ssh`.
    pub fn receiver(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

/// `[process]` section, used by the per-CCD `process-ccd` job.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProcessSection {
    /// Where untarred CCD files wait for their job. Defaults to
    /// `<prepipe.push_dir>/untar`.
    #[serde(default)]
    pub untar_dir: Option<PathBuf>,
    /// Node-local scratch directory; when set the input is moved there first.
    #[serde(default)]
    pub local_dir: Option<PathBuf>,
    /// Root of the raw-data tree; must be named `rawdata`.
    #[serde(default)]
    pub rawdata_dir: Option<PathBuf>,
    /// Directory of `<field>_gaia_dr2_LDAC.fits` reference catalogues.
    #[serde(default)]
    pub gaia_dir: Option<PathBuf>,
    /// Directory holding the SourceExtractor/SCAMP/MissFITS config files.
    #[serde(default)]
    pub astromatic_dir: Option<PathBuf>,
}

/// `[tools]` section: external programs, by name or path.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ToolPaths {
    #[serde(default = "tool_tar")]
    pub tar: String,
    #[serde(default = "tool_funpack")]
    pub funpack: String,
    #[serde(default = "tool_f2j")]
    pub f2j: String,
    #[serde(default = "tool_j2f")]
    pub j2f: String,
    #[serde(default = "tool_sbatch")]
    pub sbatch: String,
    #[serde(default = "tool_scp")]
    pub scp: String,
    #[serde(default = "tool_ssh")]
    pub ssh: String,
    #[serde(default = "tool_sex")]
    pub sex: String,
    #[serde(default = "tool_scamp")]
    pub scamp: String,
    #[serde(default = "tool_missfits")]
    pub missfits: String,
    /// External pixel-calibration step (overscan, bias, flat, masks). Skipped
    /// when unset.
    #[serde(default)]
    pub calibrate: Option<String>,
}

fn tool_tar() -> String {
    "tar".to_string()
}
fn tool_funpack() -> String {
    "funpack".to_string()
}
fn tool_f2j() -> String {
    "f2j_DECam".to_string()
}
fn tool_j2f() -> String {
    "j2f_DECam".to_string()
}
fn tool_sbatch() -> String {
    "sbatch".to_string()
}
fn tool_scp() -> String {
    "scp".to_string()
}
fn tool_ssh() -> String {
    "ssh".to_string()
}
fn tool_sex() -> String {
    "sex".to_string()
}
fn tool_scamp() -> String {
    "scamp".to_string()
}
fn tool_missfits() -> String {
    "missfits".to_string()
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            tar: tool_tar(),
            funpack: tool_funpack(),
            f2j: tool_f2j(),
            j2f: tool_j2f(),
            sbatch: tool_sbatch(),
            scp: tool_scp(),
            ssh: tool_ssh(),
            sex: tool_sex(),
            scamp: tool_scamp(),
            missfits: tool_missfits(),
            calibrate: None,
        }
    }
}

/// `[ledger]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LedgerSettings {
    #[serde(default)]
    pub mode: LedgerMode,
    /// Used when `mode = "file"`. Relative paths are resolved against the
    /// watched directory.
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
}

fn default_ledger_path() -> PathBuf {
    PathBuf::from(".prepipe/ledger")
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            mode: LedgerMode::default(),
            path: default_ledger_path(),
        }
    }
}

/// `[logging]` section.
#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
pub struct LoggingSection {
    /// Directory for the timestamped log file; no file log when unset.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

/// Validated polling settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchSettings {
    pub poll_interval: Duration,
    pub idle_warning: Duration,
    pub max_backoff: Duration,
    pub backend: WatchBackend,
    pub process_existing: bool,
}

/// Validated write-stability settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilitySettings {
    pub poll_interval: Duration,
    pub max_wait: Duration,
}

/// Validated `[prepipe]` settings with directories resolved.
#[derive(Debug, Clone)]
pub struct PrepipeSettings {
    pub push_dir: PathBuf,
    pub untar_dir: PathBuf,
    pub sbatch_dir: PathBuf,
    pub pattern: String,
    pub mode: ArrivalMode,
    pub n_per_script: usize,
    pub ccds: Vec<String>,
    pub job_program: String,
    pub dry_run: bool,
    pub run_date: String,
    pub watch: WatchSettings,
    pub stability: StabilitySettings,
}

/// Validated `[push]` settings with directories resolved.
#[derive(Debug, Clone)]
pub struct PushSettings {
    pub data_dir: PathBuf,
    pub jp2_dir: PathBuf,
    pub pattern: String,
    pub method: PushMethod,
    pub nbundle: usize,
    pub max_parallel: usize,
    pub qs: f64,
    pub exp_min: i64,
    pub watch: WatchSettings,
    pub stability: StabilitySettings,
}

/// Validated `[process]` settings.
#[derive(Debug, Clone)]
pub struct ProcessSettings {
    pub untar_dir: PathBuf,
    pub local_dir: Option<PathBuf>,
    pub rawdata_dir: PathBuf,
    pub workspace_dir: PathBuf,
    pub gaia_dir: PathBuf,
    pub astromatic_dir: PathBuf,
}

/// Validated, immutable configuration handed to constructors.
///
/// Only the sections needed by the selected [`Role`](crate::config::Role) are
/// populated; asking for another one is a configuration error.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub(crate) run_date: Option<String>,
    pub(crate) prepipe: Option<PrepipeSettings>,
    pub(crate) push: Option<PushSettings>,
    pub(crate) process: Option<ProcessSettings>,
    pub sbatch: SbatchSettings,
    pub remote: RemoteSettings,
    pub tools: ToolPaths,
    pub ledger: LedgerSettings,
    pub logging: LoggingSection,
}

impl ConfigFile {
    pub fn run_date(&self) -> Option<&str> {
        self.run_date.as_deref()
    }

    pub fn prepipe(&self) -> Result<&PrepipeSettings> {
        self.prepipe.as_ref().ok_or_else(|| {
            PrepipeError::ConfigError("[prepipe] settings were not validated".to_string())
        })
    }

    pub fn push(&self) -> Result<&PushSettings> {
        self.push.as_ref().ok_or_else(|| {
            PrepipeError::ConfigError("[push] settings were not validated".to_string())
        })
    }

    pub fn process(&self) -> Result<&ProcessSettings> {
        self.process.as_ref().ok_or_else(|| {
            PrepipeError::ConfigError("[process] settings were not validated".to_string())
        })
    }
}
