// src/ledger.rs

//! Record of files already handled, keyed by file identity.
//!
//! The identity is the file name plus size and modification time, so a file
//! that is replaced by a different upload under the same name counts as new.
//! The on-disk form is an append-only text log:
//!
//! ```text
//! <fingerprint>\t<status>\t<path>\t<detail>
//! ```
//!
//! where the last line for a fingerprint wins.

use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use blake3::Hasher;
use tracing::{debug, info};

use crate::config::LedgerSettings;
use crate::fs::FileStat;
use crate::types::LedgerMode;

/// Stable identity of one version of one file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(path: &Path, stat: &FileStat) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let mtime = stat
            .modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);

        let mut hasher = Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&stat.size.to_le_bytes());
        hasher.update(&mtime.to_le_bytes());
        Self(hasher.finalize().to_hex().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0[..12.min(self.0.len())])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerStatus {
    Done,
    /// Failed; left for a human to look at. Not retried by the watcher.
    Quarantined,
}

impl LedgerStatus {
    fn as_str(self) -> &'static str {
        match self {
            LedgerStatus::Done => "done",
            LedgerStatus::Quarantined => "quarantined",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(LedgerStatus::Done),
            "quarantined" => Some(LedgerStatus::Quarantined),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub fingerprint: Fingerprint,
    pub status: LedgerStatus,
    pub path: PathBuf,
    pub detail: String,
}

/// Abstract storage for processed-file records.
pub trait Ledger: Send + Sync {
    fn status(&self, fingerprint: &Fingerprint) -> Option<LedgerStatus>;
    fn record(&mut self, entry: LedgerEntry) -> Result<()>;
}

/// In memory only; forgotten on restart.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    map: HashMap<Fingerprint, LedgerStatus>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Ledger for MemoryLedger {
    fn status(&self, fingerprint: &Fingerprint) -> Option<LedgerStatus> {
        self.map.get(fingerprint).copied()
    }

    fn record(&mut self, entry: LedgerEntry) -> Result<()> {
        debug!(fingerprint = %entry.fingerprint, status = %entry.status, "recorded (memory)");
        self.map.insert(entry.fingerprint, entry.status);
        Ok(())
    }
}

/// Append-only log on disk.
#[derive(Debug)]
pub struct FileLedger {
    path: PathBuf,
    map: HashMap<Fingerprint, LedgerStatus>,
}

impl FileLedger {
    /// Open (or start) the log at `path`, replaying what is already there.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let map = load_entries(&path)?;
        info!(path = %path.display(), entries = map.len(), "opened ledger");
        Ok(Self { path, map })
    }
}

impl Ledger for FileLedger {
    fn status(&self, fingerprint: &Fingerprint) -> Option<LedgerStatus> {
        self.map.get(fingerprint).copied()
    }

    fn record(&mut self, entry: LedgerEntry) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger directory at {:?}", parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening ledger at {:?}", self.path))?;
        writeln!(
            file,
            "{}\t{}\t{}\t{}",
            entry.fingerprint.as_str(),
            entry.status,
            single_line(&entry.path.to_string_lossy()),
            single_line(&entry.detail)
        )?;
        file.flush()?;

        debug!(fingerprint = %entry.fingerprint, status = %entry.status, "recorded (file)");
        self.map.insert(entry.fingerprint, entry.status);
        Ok(())
    }
}

fn single_line(s: &str) -> String {
    s.replace(['\t', '\n', '\r'], " ")
}

fn load_entries(path: &Path) -> Result<HashMap<Fingerprint, LedgerStatus>> {
    let mut map = HashMap::new();
    if !path.exists() {
        return Ok(map);
    }

    let file = File::open(path).with_context(|| format!("opening ledger at {:?}", path))?;
    for line_res in BufReader::new(file).lines() {
        let line = line_res?;
        let mut fields = line.split('\t');
        let (Some(fp), Some(status)) = (fields.next(), fields.next()) else {
            continue;
        };
        if let Some(status) = LedgerStatus::parse(status.trim()) {
            map.insert(Fingerprint(fp.trim().to_string()), status);
        }
    }
    Ok(map)
}

/// Build the ledger selected by `[ledger]`. Relative paths are resolved
/// against `base` (the watched directory).
pub fn open_ledger(settings: &LedgerSettings, base: &Path) -> Result<Box<dyn Ledger>> {
    Ok(match settings.mode {
        LedgerMode::Memory => Box::new(MemoryLedger::new()),
        LedgerMode::File => {
            let path = if settings.path.is_absolute() {
                settings.path.clone()
            } else {
                base.join(&settings.path)
            };
            Box::new(FileLedger::open(path)?)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn stat(size: u64, secs: u64) -> FileStat {
        FileStat {
            size,
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    fn entry(fp: &Fingerprint, status: LedgerStatus) -> LedgerEntry {
        LedgerEntry {
            fingerprint: fp.clone(),
            status,
            path: PathBuf::from("/push/DECam_00912345.tar"),
            detail: "tar exited with code 2:\nbad\tblock".to_string(),
        }
    }

    #[test]
    fn fingerprint_changes_with_size_or_mtime_but_not_directory() {
        let a = Fingerprint::of(Path::new("/push/a.tar"), &stat(10, 1));
        assert_eq!(a, Fingerprint::of(Path::new("/elsewhere/a.tar"), &stat(10, 1)));
        assert_ne!(a, Fingerprint::of(Path::new("/push/a.tar"), &stat(11, 1)));
        assert_ne!(a, Fingerprint::of(Path::new("/push/a.tar"), &stat(10, 2)));
        assert_ne!(a, Fingerprint::of(Path::new("/push/b.tar"), &stat(10, 1)));
    }

    #[test]
    fn file_ledger_survives_reopen_and_last_entry_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".prepipe/ledger");
        let fp = Fingerprint::of(Path::new("a.tar"), &stat(1, 1));

        {
            let mut ledger = FileLedger::open(&path).unwrap();
            ledger.record(entry(&fp, LedgerStatus::Quarantined)).unwrap();
            ledger.record(entry(&fp, LedgerStatus::Done)).unwrap();
        }

        let reopened = FileLedger::open(&path).unwrap();
        assert_eq!(reopened.status(&fp), Some(LedgerStatus::Done));

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().all(|l| l.split('\t').count() == 4));
    }

    #[test]
    fn memory_ledger_starts_empty() {
        let mut ledger = MemoryLedger::new();
        let fp = Fingerprint::of(Path::new("a.tar"), &stat(1, 1));
        assert_eq!(ledger.status(&fp), None);
        ledger.record(entry(&fp, LedgerStatus::Done)).unwrap();
        assert_eq!(ledger.status(&fp), Some(LedgerStatus::Done));
    }
}
