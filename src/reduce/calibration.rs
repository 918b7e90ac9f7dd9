// src/reduce/calibration.rs

//! Locating the flat and bias frames a science frame is reduced with.

use std::path::{Path, PathBuf};

use globset::Glob;
use tracing::{error, warn};

use crate::errors::{PrepipeError, Result};
use crate::fs::FileSystem;

/// Which calibration frame to look for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration<'a> {
    /// Dome flat for a filter (first letter of `FILTER`).
    Flat(&'a str),
    Bias,
}

impl Calibration<'_> {
    fn master_pattern(&self) -> String {
        match self {
            Calibration::Flat(filter) => format!("domeflat.{filter}.master.*"),
            Calibration::Bias => "bias.master.*".to_string(),
        }
    }

    fn any_pattern(&self) -> String {
        match self {
            Calibration::Flat(filter) => format!("domeflat.{filter}*"),
            Calibration::Bias => "bias.*".to_string(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Calibration::Flat(_) => "flat",
            Calibration::Bias => "bias",
        }
    }
}

/// Find a calibration frame in `dir`, preferring a master frame.
///
/// Without a master the first individual frame (by name) is used and a
/// warning logged; with neither the frame cannot be reduced.
pub fn find_calibration(fs: &dyn FileSystem, dir: &Path, wanted: Calibration<'_>) -> Result<PathBuf> {
    let mut names: Vec<PathBuf> = fs
        .read_dir(dir)?
        .into_iter()
        .filter(|p| fs.is_file(p))
        .collect();
    names.sort();

    if let Some(found) = first_match(&names, &wanted.master_pattern())? {
        return Ok(found);
    }
    warn!(
        dir = %dir.display(),
        "No master {} detected! Looking for an individual {}..",
        wanted.label(),
        wanted.label()
    );

    if let Some(found) = first_match(&names, &wanted.any_pattern())? {
        return Ok(found);
    }
    error!(dir = %dir.display(), "No {} detected!", wanted.label());
    Err(PrepipeError::MissingCalibration(format!(
        "no {} matching {} in {}",
        wanted.label(),
        wanted.any_pattern(),
        dir.display()
    )))
}

fn first_match(paths: &[PathBuf], pattern: &str) -> Result<Option<PathBuf>> {
    let matcher = Glob::new(pattern)
        .map_err(|e| anyhow::anyhow!("invalid calibration pattern {pattern}: {e}"))?
        .compile_matcher();
    Ok(paths
        .iter()
        .find(|p| p.file_name().is_some_and(|n| matcher.is_match(n)))
        .cloned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn dir_with(files: &[&str]) -> (MockFileSystem, PathBuf) {
        let fs = MockFileSystem::new();
        let dir = PathBuf::from("/rawdata/ut240313/12");
        fs.add_dir(&dir);
        for f in files {
            fs.add_file(dir.join(f), "x");
        }
        (fs, dir)
    }

    #[test]
    fn master_frames_win() {
        let (fs, dir) = dir_with(&[
            "domeflat.g.ut240313.912300_12.fits",
            "domeflat.g.master.12.fits",
            "bias.ut240313.912200_12.fits",
            "bias.master.12.fits",
        ]);
        assert_eq!(
            find_calibration(&fs, &dir, Calibration::Flat("g")).unwrap(),
            dir.join("domeflat.g.master.12.fits")
        );
        assert_eq!(
            find_calibration(&fs, &dir, Calibration::Bias).unwrap(),
            dir.join("bias.master.12.fits")
        );
    }

    #[test]
    fn individual_frames_are_the_fallback() {
        let (fs, dir) = dir_with(&[
            "domeflat.r.master.12.fits",
            "domeflat.g.ut240313.912301_12.fits",
            "domeflat.g.ut240313.912300_12.fits",
            "bias.ut240313.912200_12.fits",
        ]);
        assert_eq!(
            find_calibration(&fs, &dir, Calibration::Flat("g")).unwrap(),
            dir.join("domeflat.g.ut240313.912300_12.fits")
        );
        assert_eq!(
            find_calibration(&fs, &dir, Calibration::Bias).unwrap(),
            dir.join("bias.ut240313.912200_12.fits")
        );
    }

    #[test]
    fn nothing_found_is_missing_calibration() {
        let (fs, dir) = dir_with(&["8hr.g.ut240313.912345_12.fits", "domeflat.r.master.12.fits"]);
        assert!(matches!(
            find_calibration(&fs, &dir, Calibration::Flat("g")),
            Err(PrepipeError::MissingCalibration(_))
        ));
        assert!(matches!(
            find_calibration(&fs, &dir, Calibration::Bias),
            Err(PrepipeError::MissingCalibration(_))
        ));
    }
}
