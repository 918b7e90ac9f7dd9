// src/reduce/naming.rs

//! File names used along the per-CCD chain.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::errors::{PrepipeError, Result};
use crate::fits::Header;

/// File name up to the first `.`: `DECam_00912345.fits.fz` → `DECam_00912345`.
pub fn exposure_root(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let root = name.split('.').next()?;
    if root.is_empty() {
        None
    } else {
        Some(root.to_string())
    }
}

/// Exposure number of a root name: the second `_` field, as in
/// `DECam_00912345` or `DECam_00912345_12`.
pub fn exposure_number(root: &str) -> Option<i64> {
    root.split('_').nth(1)?.parse().ok()
}

/// A per-CCD input, `DECam_<exposure>_<ccd>.<ext>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExposureName {
    /// `DECam_<exposure>_<ccd>`
    pub root: String,
    pub exposure: String,
    pub ccd: String,
}

impl ExposureName {
    pub fn parse(file_name: &str) -> Option<Self> {
        let root = exposure_root(Path::new(file_name))?;
        let mut fields = root.split('_');
        let _instrument = fields.next()?;
        let exposure = fields.next()?.to_string();
        let ccd = fields.next()?.to_string();
        if exposure.is_empty() || ccd.is_empty() {
            return None;
        }
        Some(Self {
            root,
            exposure,
            ccd,
        })
    }
}

/// What the telescope was pointed at, from `OBSTYPE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Science,
    DomeFlat,
    Bias,
}

impl FrameKind {
    pub fn from_obstype(obstype: &str) -> Self {
        match obstype.trim().to_ascii_lowercase().as_str() {
            "dome flat" | "domeflat" => FrameKind::DomeFlat,
            "zero" | "bias" => FrameKind::Bias,
            _ => FrameKind::Science,
        }
    }

    pub fn is_calibration(self) -> bool {
        !matches!(self, FrameKind::Science)
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FrameKind::Science => "science",
            FrameKind::DomeFlat => "domeflat",
            FrameKind::Bias => "bias",
        })
    }
}

/// Header values that decide where a CCD frame is filed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameInfo {
    pub exposure: i64,
    /// `OBJECT`, the DWF field name.
    pub field: String,
    /// First character of `FILTER`.
    pub filter: String,
    pub kind: FrameKind,
}

impl FrameInfo {
    pub fn from_header(header: &Header) -> Result<Self> {
        let missing = |key: &str| PrepipeError::Fits(format!("primary header has no {key}"));

        let exposure = header.get_int("EXPNUM").ok_or_else(|| missing("EXPNUM"))?;
        let field = header.get_str("OBJECT").ok_or_else(|| missing("OBJECT"))?;
        let filter: String = header
            .get_str("FILTER")
            .ok_or_else(|| missing("FILTER"))?
            .chars()
            .take(1)
            .collect();
        if filter.is_empty() {
            return Err(missing("FILTER"));
        }
        let kind = FrameKind::from_obstype(&header.get_str("OBSTYPE").unwrap_or_default());

        Ok(Self {
            exposure,
            field,
            filter,
            kind,
        })
    }

    /// Name the frame is filed under in the raw-data and workspace trees.
    pub fn output_name(&self, run_date: &str, ccd: &str) -> String {
        let Self {
            exposure,
            field,
            filter,
            kind,
        } = self;
        match kind {
            FrameKind::Science => format!("{field}.{filter}.{run_date}.{exposure}_{ccd}.fits"),
            FrameKind::DomeFlat => format!("domeflat.{filter}.{run_date}.{exposure}_{ccd}.fits"),
            FrameKind::Bias => format!("bias.{run_date}.{exposure}_{ccd}.fits"),
        }
    }
}

/// Products derived from a reduced frame `<stem>.fits`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameProducts {
    pub frame: PathBuf,
    pub mask: PathBuf,
    pub catalog: PathBuf,
    pub noise: PathBuf,
    pub head: PathBuf,
}

impl FrameProducts {
    pub fn for_frame(frame: &Path) -> Self {
        let with = |suffix: &str| {
            let name = frame
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let stem = name.strip_suffix(".fits").unwrap_or(&name);
            frame.with_file_name(format!("{stem}{suffix}"))
        };
        Self {
            frame: frame.to_path_buf(),
            mask: with(".mask.fits"),
            catalog: with(".cat"),
            noise: with(".noise.fits"),
            head: with(".head"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fits::Card;

    #[test]
    fn roots_stop_at_the_first_dot() {
        assert_eq!(
            exposure_root(Path::new("/data/DECam_00912345.fits.fz")).as_deref(),
            Some("DECam_00912345")
        );
        assert_eq!(exposure_root(Path::new("/data/.hidden")), None);
        assert_eq!(exposure_number("DECam_00912345"), Some(912345));
        assert_eq!(exposure_number("DECam_00912345_7"), Some(912345));
        assert_eq!(exposure_number("notes"), None);
    }

    #[test]
    fn ccd_names_parse() {
        let name = ExposureName::parse("DECam_00912345_12.jp2").unwrap();
        assert_eq!(name.root, "DECam_00912345_12");
        assert_eq!(name.exposure, "00912345");
        assert_eq!(name.ccd, "12");
        assert_eq!(ExposureName::parse("DECam_00912345.jp2"), None);
    }

    #[test]
    fn obstype_decides_kind() {
        assert_eq!(FrameKind::from_obstype("dome flat"), FrameKind::DomeFlat);
        assert_eq!(FrameKind::from_obstype("domeflat"), FrameKind::DomeFlat);
        assert_eq!(FrameKind::from_obstype("zero"), FrameKind::Bias);
        assert_eq!(FrameKind::from_obstype("bias"), FrameKind::Bias);
        assert_eq!(FrameKind::from_obstype("object"), FrameKind::Science);
    }

    #[test]
    fn output_names_follow_frame_kind() {
        let header = Header::from_cards(vec![
            Card::integer("EXPNUM", 912345),
            Card::string("OBJECT", "8hr"),
            Card::string("FILTER", "g DECam SDSS c0001 4720.0 1520.0"),
            Card::string("OBSTYPE", "object"),
        ]);
        let mut info = FrameInfo::from_header(&header).unwrap();
        assert_eq!(info.filter, "g");
        assert_eq!(info.output_name("ut240313", "12"), "8hr.g.ut240313.912345_12.fits");

        info.kind = FrameKind::DomeFlat;
        assert_eq!(
            info.output_name("ut240313", "12"),
            "domeflat.g.ut240313.912345_12.fits"
        );
        info.kind = FrameKind::Bias;
        assert_eq!(info.output_name("ut240313", "12"), "bias.ut240313.912345_12.fits");
    }

    #[test]
    fn missing_header_keys_are_errors() {
        let header = Header::from_cards(vec![Card::string("OBJECT", "8hr")]);
        let err = FrameInfo::from_header(&header).unwrap_err().to_string();
        assert!(err.contains("EXPNUM"), "{err}");
    }

    #[test]
    fn products_share_the_frame_stem() {
        let p = FrameProducts::for_frame(Path::new("/ws/12/8hr.g.ut240313.912345_12.fits"));
        assert_eq!(p.mask, PathBuf::from("/ws/12/8hr.g.ut240313.912345_12.mask.fits"));
        assert_eq!(p.catalog, PathBuf::from("/ws/12/8hr.g.ut240313.912345_12.cat"));
        assert_eq!(p.noise, PathBuf::from("/ws/12/8hr.g.ut240313.912345_12.noise.fits"));
        assert_eq!(p.head, PathBuf::from("/ws/12/8hr.g.ut240313.912345_12.head"));
    }
}
