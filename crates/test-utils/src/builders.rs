#![allow(dead_code)]

use std::path::Path;

use dwf_prepipe::config::{ConfigFile, RawConfigFile, Role, validate};
use dwf_prepipe::types::{ArrivalMode, LedgerMode, PushMethod};

/// Builder for `ConfigFile` to simplify test setup.
///
/// Starts from the file defaults with a valid run date and short poll and
/// stability intervals.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        let mut config = RawConfigFile {
            run_date: Some("ut240313".to_string()),
            ..RawConfigFile::default()
        };
        for watch in [&mut config.prepipe.watch, &mut config.push.watch] {
            watch.poll_interval = Some("10ms".to_string());
        }
        for stability in [&mut config.prepipe.stability, &mut config.push.stability] {
            stability.poll_interval = Some("10ms".to_string());
            stability.max_wait = Some("50ms".to_string());
        }
        Self { config }
    }

    pub fn run_date(mut self, date: &str) -> Self {
        self.config.run_date = Some(date.to_string());
        self
    }

    pub fn push_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.prepipe.push_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn mode(mut self, mode: ArrivalMode) -> Self {
        self.config.prepipe.mode = mode;
        self
    }

    pub fn ccds(mut self, first: u32, last: u32) -> Self {
        self.config.prepipe.ccd_first = first;
        self.config.prepipe.ccd_last = last;
        self
    }

    pub fn exclude_ccds(mut self, ccds: &[u32]) -> Self {
        self.config.prepipe.ccd_exclude = ccds.to_vec();
        self
    }

    pub fn n_per_script(mut self, n: usize) -> Self {
        self.config.prepipe.n_per_script = n;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.config.prepipe.dry_run = dry_run;
        self
    }

    pub fn reservation(mut self, name: &str) -> Self {
        self.config.sbatch.reservation = Some(name.to_string());
        self
    }

    pub fn data_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.push.data_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn method(mut self, method: PushMethod) -> Self {
        self.config.push.method = method;
        self
    }

    pub fn nbundle(mut self, n: usize) -> Self {
        self.config.push.nbundle = n;
        self
    }

    pub fn max_parallel(mut self, n: usize) -> Self {
        self.config.push.max_parallel = n;
        self
    }

    pub fn exp_min(mut self, exp_min: i64) -> Self {
        self.config.push.exp_min = exp_min;
        self
    }

    pub fn untar_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.process.untar_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn local_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.process.local_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn rawdata_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.process.rawdata_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn gaia_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.process.gaia_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn calibrate_tool(mut self, program: &str) -> Self {
        self.config.tools.calibrate = Some(program.to_string());
        self
    }

    pub fn file_ledger(mut self, path: impl AsRef<Path>) -> Self {
        self.config.ledger.mode = LedgerMode::File;
        self.config.ledger.path = path.as_ref().to_path_buf();
        self
    }

    /// The raw file model, for tests that validate it themselves.
    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self, role: Role) -> ConfigFile {
        validate(self.config, role).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}
