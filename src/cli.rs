// src/cli.rs

//! CLI argument parsing using `clap`.
//!
//! Flags override values from the TOML config file. Environment variables are
//! only read here, through clap's `env` support.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::config::RawConfigFile;
use crate::types::{ArrivalMode, PushMethod};

/// Command-line arguments for `dwf-prepipe`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dwf-prepipe",
    version,
    about = "Watch, unpack, ship and pre-process DWF DECam exposures.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Prepipe.toml` in the current working directory, if present.
    #[arg(long, global = true, value_name = "PATH", env = "PREPIPE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `--debug`/`--quiet`, `PREPIPE_LOG` or `info` is used.
    #[arg(long, global = true, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Turn on debug output.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Turn off all non-essential output.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Also write a timestamped log file into this directory.
    #[arg(long, global = true, value_name = "DIRECTORY")]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Watch for tarballs, unpack them and submit per-CCD batch jobs.
    Prepipe(PrepipeArgs),

    /// Unpack and submit the files named in a list, without watching.
    Reprocess(ReprocessArgs),

    /// Watch for raw exposures, compress them and ship them to the remote
    /// host.
    Push(PushArgs),

    /// Process one CCD (run from the batch scripts).
    ProcessCcd(ProcessCcdArgs),

    /// Split a multi-extension exposure into per-CCD files.
    Split(SplitArgs),
}

impl Command {
    /// Log file prefix for this subcommand.
    pub fn log_prefix(&self) -> &'static str {
        match self {
            Command::Prepipe(_) => "prepipe",
            Command::Reprocess(_) => "prepipe_reprocess",
            Command::Push(_) => "prepipe_push",
            Command::ProcessCcd(_) => "prepipe_process_ccd",
            Command::Split(_) => "prepipe_split",
        }
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct PrepipeArgs {
    /// Directory where tarballs of compressed files are placed.
    #[arg(short = 'p', long, value_name = "DIRECTORY", env = "PUSH_DIR")]
    pub push_dir: Option<PathBuf>,

    /// Date of the run night and data, `utYYMMDD`.
    #[arg(short = 'd', long, value_name = "DATE", env = "RUN_DATE")]
    pub run_date: Option<String>,

    /// Slurm reservation name.
    #[arg(short = 'r', long, value_name = "NAME", env = "RES_NAME")]
    pub res_name: Option<String>,

    /// Write batch scripts but do not submit them.
    #[arg(long)]
    pub dry_run: bool,

    /// `compress` (tarballs of JPEG2000 CCDs) or `raw` (multi-extension FITS).
    #[arg(long, value_name = "MODE")]
    pub mode: Option<ArrivalMode>,

    /// CCDs per batch script.
    #[arg(long, value_name = "N")]
    pub n_per_script: Option<usize>,
}

impl PrepipeArgs {
    pub fn apply(&self, raw: &mut RawConfigFile) {
        if let Some(dir) = &self.push_dir {
            raw.prepipe.push_dir = Some(dir.clone());
        }
        if let Some(date) = &self.run_date {
            raw.run_date = Some(date.clone());
        }
        if let Some(res) = &self.res_name {
            raw.sbatch.reservation = Some(res.clone());
        }
        if self.dry_run {
            raw.prepipe.dry_run = true;
        }
        if let Some(mode) = self.mode {
            raw.prepipe.mode = mode;
        }
        if let Some(n) = self.n_per_script {
            raw.prepipe.n_per_script = n;
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ReprocessArgs {
    /// File listing one path to reprocess per line.
    #[arg(long, value_name = "FILE")]
    pub reprocess_list: PathBuf,

    /// Pause between files.
    #[arg(long, value_name = "DURATION", default_value = "60s")]
    pub pause: String,

    #[command(flatten)]
    pub prepipe: PrepipeArgs,
}

#[derive(Debug, Clone, Default, Args)]
pub struct PushArgs {
    /// Directory where raw `.fits.fz` exposures land.
    #[arg(short = 'p', long, value_name = "DIRECTORY", env = "DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// JPEG2000 quantisation step.
    #[arg(short = 'q', long, value_name = "QS", env = "QS")]
    pub qs: Option<f64>,

    /// (s)erial, (p)arallel, (b)undle or (e)nd-of-night.
    #[arg(short = 'm', long, value_name = "METHOD")]
    pub method: Option<PushMethod>,

    /// Files per bundle in bundle mode.
    #[arg(short = 'n', long, value_name = "N")]
    pub nbundle: Option<usize>,

    /// End of night: only exposures numbered above this are sent.
    #[arg(long, value_name = "EXPNUM", allow_negative_numbers = true)]
    pub exp_min: Option<i64>,

    /// Concurrent transfers in parallel and bundle mode.
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,
}

impl PushArgs {
    pub fn apply(&self, raw: &mut RawConfigFile) {
        if let Some(dir) = &self.data_dir {
            raw.push.data_dir = Some(dir.clone());
        }
        if let Some(qs) = self.qs {
            raw.push.qs = Some(qs);
        }
        if let Some(method) = self.method {
            raw.push.method = method;
        }
        if let Some(n) = self.nbundle {
            raw.push.nbundle = n;
        }
        if let Some(exp_min) = self.exp_min {
            raw.push.exp_min = exp_min;
        }
        if let Some(n) = self.max_parallel {
            raw.push.max_parallel = n;
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct ProcessCcdArgs {
    /// Input file name, relative to the untar directory.
    #[arg(short = 'i', long = "input-file", value_name = "FILE")]
    pub input: String,

    /// Date for files during the run, `utYYMMDD`.
    #[arg(short = 'd', long = "input-date", value_name = "DATE", env = "RUN_DATE")]
    pub run_date: Option<String>,

    /// Directory where tarballs are placed; the untar directory is below it.
    #[arg(short = 'p', long, value_name = "DIRECTORY", env = "PUSH_DIR")]
    pub push_dir: Option<PathBuf>,

    /// Node-local storage for the JPEG2000 to FITS conversion.
    #[arg(long, value_name = "DIRECTORY")]
    pub local_dir: Option<PathBuf>,

    /// Raw-data tree of the downstream pipeline; must end in `rawdata`.
    #[arg(long, value_name = "DIRECTORY")]
    pub rawdata_dir: Option<PathBuf>,

    /// Directory with Gaia reference catalogues.
    #[arg(long, value_name = "DIRECTORY", env = "GAIA_DIR")]
    pub gaia_dir: Option<PathBuf>,

    #[arg(long, value_name = "PATH", env = "SCAMP")]
    pub scamp_path: Option<String>,

    #[arg(long, value_name = "PATH", env = "MISSFITS")]
    pub missfits_path: Option<String>,
}

impl ProcessCcdArgs {
    pub fn apply(&self, raw: &mut RawConfigFile) {
        if let Some(date) = &self.run_date {
            raw.run_date = Some(date.clone());
        }
        if let Some(dir) = &self.push_dir {
            raw.prepipe.push_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.local_dir {
            raw.process.local_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.rawdata_dir {
            raw.process.rawdata_dir = Some(dir.clone());
        }
        if let Some(dir) = &self.gaia_dir {
            raw.process.gaia_dir = Some(dir.clone());
        }
        if let Some(path) = &self.scamp_path {
            raw.tools.scamp = path.clone();
        }
        if let Some(path) = &self.missfits_path {
            raw.tools.missfits = path.clone();
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct SplitArgs {
    /// Multi-extension FITS exposure.
    pub file: PathBuf,

    /// Where the per-CCD files go; defaults to the exposure's directory.
    #[arg(long, value_name = "DIRECTORY")]
    pub out_dir: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_flags_override_the_file() {
        let args = CliArgs::try_parse_from([
            "dwf-prepipe",
            "push",
            "--data-dir",
            "/data",
            "--method",
            "b",
            "--nbundle",
            "6",
            "--exp-min",
            "-1",
        ])
        .unwrap();
        let Command::Push(push) = args.command else {
            panic!("expected push");
        };

        let mut raw = RawConfigFile::default();
        push.apply(&mut raw);
        assert_eq!(raw.push.data_dir, Some(PathBuf::from("/data")));
        assert_eq!(raw.push.method, PushMethod::Bundle);
        assert_eq!(raw.push.nbundle, 6);
        assert_eq!(raw.push.exp_min, -1);
        assert_eq!(raw.push.qs, None);
    }

    #[test]
    fn unknown_push_method_is_rejected() {
        assert!(CliArgs::try_parse_from(["dwf-prepipe", "push", "--method", "x"]).is_err());
    }

    #[test]
    fn process_ccd_takes_short_flags() {
        let args = CliArgs::try_parse_from([
            "dwf-prepipe",
            "--config",
            "/etc/prepipe.toml",
            "process-ccd",
            "-i",
            "DECam_00912345_12.jp2",
            "-d",
            "ut240313",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/prepipe.toml")));
        let Command::ProcessCcd(p) = args.command else {
            panic!("expected process-ccd");
        };
        assert_eq!(p.input, "DECam_00912345_12.jp2");
        assert_eq!(p.run_date.as_deref(), Some("ut240313"));
    }

    #[test]
    fn reprocess_flattens_prepipe_flags() {
        let args = CliArgs::try_parse_from([
            "dwf-prepipe",
            "reprocess",
            "--reprocess-list",
            "redo.txt",
            "--res-name",
            "dwf",
            "--dry-run",
        ])
        .unwrap();
        let Command::Reprocess(r) = args.command else {
            panic!("expected reprocess");
        };
        assert_eq!(r.pause, "60s");
        let mut raw = RawConfigFile::default();
        r.prepipe.apply(&mut raw);
        assert_eq!(raw.sbatch.reservation.as_deref(), Some("dwf"));
        assert!(raw.prepipe.dry_run);
    }
}
