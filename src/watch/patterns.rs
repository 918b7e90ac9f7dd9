// src/watch/patterns.rs

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

/// Compiled file-name patterns for one watched directory.
///
/// Patterns are matched against the bare file name (`DECam_00912345.tar`), not
/// the full path. Hidden files (leading `.`) never match, so partial uploads
/// such as `.DECam_00912345.tar.XXXX` from `scp`/`rsync` and the ledger
/// directory are ignored.
#[derive(Clone)]
pub struct FilePattern {
    source: Vec<String>,
    set: GlobSet,
}

impl fmt::Debug for FilePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePattern")
            .field("patterns", &self.source)
            .finish_non_exhaustive()
    }
}

impl FilePattern {
    pub fn new(pattern: &str) -> Result<Self> {
        Self::any_of(&[pattern.to_string()])
    }

    pub fn any_of(patterns: &[String]) -> Result<Self> {
        Ok(Self {
            source: patterns.to_vec(),
            set: build_globset(patterns)?,
        })
    }

    /// Returns true if `path`'s file name matches one of the patterns.
    pub fn matches(&self, path: &Path) -> bool {
        match path.file_name().and_then(|n| n.to_str()) {
            Some(name) if !name.starts_with('.') => self.set.is_match(name),
            _ => false,
        }
    }
}

/// Build a GlobSet from simple string patterns.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        let glob = Glob::new(pat).with_context(|| format!("invalid glob pattern: {pat}"))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_on_file_name_only() {
        let p = FilePattern::new("*.fits.fz").unwrap();
        assert!(p.matches(Path::new("/home4/images/DECam_00912345.fits.fz")));
        assert!(!p.matches(Path::new("/home4/images/DECam_00912345.fits")));
    }

    #[test]
    fn hidden_partial_uploads_are_ignored() {
        let p = FilePattern::new("*.tar").unwrap();
        assert!(!p.matches(Path::new("/push/.DECam_00912345.tar")));
        assert!(p.matches(Path::new("/push/DECam_00912345.tar")));
    }

    #[test]
    fn bad_glob_is_an_error() {
        assert!(FilePattern::new("[").is_err());
    }
}
