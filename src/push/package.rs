// src/push/package.rs

//! Per-exposure file layout on the telescope side.

use std::path::{Path, PathBuf};

/// Every path one exposure touches between arrival and shipping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPaths {
    pub root: String,
    /// `<data_dir>/<root>.fits.fz`, as delivered.
    pub packed: PathBuf,
    /// `<data_dir>/<root>.fits`, written by `funpack`.
    pub fits: PathBuf,
    /// `<jp2_dir>/<root>`, holding the JPEG2000 output.
    pub jp2_dir: PathBuf,
    pub jp2: PathBuf,
    /// `<jp2_dir>/<root>.tar`
    pub tar: PathBuf,
}

impl PushPaths {
    pub fn new(data_dir: &Path, jp2_dir: &Path, root: &str) -> Self {
        let per_file = jp2_dir.join(root);
        Self {
            root: root.to_string(),
            packed: data_dir.join(format!("{root}.fits.fz")),
            fits: data_dir.join(format!("{root}.fits")),
            jp2: per_file.join(format!("{root}.jp2")),
            jp2_dir: per_file,
            tar: jp2_dir.join(format!("{root}.tar")),
        }
    }
}
