// src/fits/split.rs

//! Split a multi-extension DECam exposure into one file per CCD.

use std::ffi::c_int;
use std::fs;
use std::path::{Path, PathBuf};

use fitsio::FitsFile;
use fitsio::errors::check_status as fits_check_status;
use fitsio::hdu::HduInfo;
use fitsio::images::{ImageDescription, ImageType};
use tracing::{debug, info};

use crate::errors::{PrepipeError, Result};
use crate::fits::header::{Header, merge_headers};

/// Rows in a DECam science CCD readout (numpy axis 0, `NAXIS2`). Extensions
/// of any other shape are not CCD images and are left out.
pub const CCD_ROWS: usize = 4146;

/// Write `<out_dir>/<root>_<n>.fits` for every CCD extension of `src`,
/// `n` being the 1-based extension index.
///
/// Headers are merged with the primary (see [`merge_headers`]); the data
/// unit is copied byte for byte, so scaled integers stay scaled.
pub fn split_exposure(src: &Path, out_dir: &Path, root: &str) -> Result<Vec<PathBuf>> {
    let mut fptr = FitsFile::open(src)?;
    fptr.hdu(0)?;
    let primary = Header::read_current(&mut fptr)?;
    let n_hdus = hdu_count(&mut fptr)?;

    fs::create_dir_all(out_dir)?;
    let mut written = Vec::new();

    for index in 1..n_hdus {
        let hdu = fptr.hdu(index)?;
        let shape = match &hdu.info {
            HduInfo::ImageInfo { shape, .. } => shape.clone(),
            _ => {
                debug!(file = %src.display(), extension = index, "skipping table extension");
                continue;
            }
        };
        if shape.first() != Some(&CCD_ROWS) {
            debug!(
                file = %src.display(),
                extension = index,
                ?shape,
                "skipping non-CCD extension"
            );
            continue;
        }

        let ext = Header::read_current(&mut fptr)?;
        let description = ImageDescription {
            data_type: storage_type(&ext)?,
            dimensions: &shape,
        };
        let out_path = out_dir.join(format!("{root}_{index}.fits"));
        let mut out = FitsFile::create(&out_path)
            .with_custom_primary(&description)
            .overwrite()
            .open()?;
        merge_headers(&primary, &ext).write_content(&mut out)?;
        copy_data(&mut fptr, &mut out)?;
        written.push(out_path);
    }

    info!(
        file = %src.display(),
        extensions = n_hdus.saturating_sub(1),
        ccds = written.len(),
        "split exposure into CCD files"
    );
    Ok(written)
}

/// On-disk pixel type from `BITPIX`, ignoring any `BZERO` scaling.
fn storage_type(header: &Header) -> Result<ImageType> {
    match header.get_int("BITPIX") {
        Some(8) => Ok(ImageType::UnsignedByte),
        Some(16) => Ok(ImageType::Short),
        Some(32) => Ok(ImageType::Long),
        Some(64) => Ok(ImageType::LongLong),
        Some(-32) => Ok(ImageType::Float),
        Some(-64) => Ok(ImageType::Double),
        other => Err(PrepipeError::Fits(format!("unsupported BITPIX {other:?}"))),
    }
}

fn hdu_count(fptr: &mut FitsFile) -> Result<usize> {
    let mut status = 0;
    let mut n: c_int = 0;
    unsafe {
        // ffthdu = fits_get_num_hdus
        fitsio_sys::ffthdu(fptr.as_raw(), &mut n, &mut status);
        fits_check_status(status)?;
    }
    Ok(n.max(0) as usize)
}

/// Copy the current data unit of `src` into the current HDU of `dst`.
fn copy_data(src: &mut FitsFile, dst: &mut FitsFile) -> Result<()> {
    let mut status = 0;
    unsafe {
        // ffcpdt = fits_copy_data
        fitsio_sys::ffcpdt(src.as_raw(), dst.as_raw(), &mut status);
        fits_check_status(status)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const COLS: usize = 3;

    fn pixels(seed: i16) -> Vec<i16> {
        (0..CCD_ROWS * COLS).map(|i| seed + (i % 251) as i16).collect()
    }

    fn write_mef(path: &Path) {
        let mut fptr = FitsFile::create(path).open().unwrap();
        let primary = fptr.primary_hdu().unwrap();
        primary.write_key(&mut fptr, "OBJECT", "DWF_4hr").unwrap();
        primary.write_key(&mut fptr, "EXPNUM", 912345i64).unwrap();
        primary.write_key(&mut fptr, "DETSIZE", "[1:29400,1:29050]").unwrap();

        let ccd = ImageDescription {
            data_type: ImageType::Short,
            dimensions: &[CCD_ROWS, COLS],
        };
        let guider = ImageDescription {
            data_type: ImageType::Short,
            dimensions: &[16, 16],
        };
        let s1 = fptr.create_image("S1", &ccd).unwrap();
        s1.write_image(&mut fptr, &pixels(1)).unwrap();
        let g = fptr.create_image("GUIDER", &guider).unwrap();
        g.write_image(&mut fptr, &vec![0i16; 256]).unwrap();
        let s3 = fptr.create_image("S3", &ccd).unwrap();
        s3.write_key(&mut fptr, "DETSIZE", "[1:2048,1:4096]").unwrap();
        s3.write_image(&mut fptr, &pixels(3)).unwrap();
    }

    #[test]
    fn writes_only_ccd_shaped_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("DECam_00912345.fits");
        write_mef(&src);
        let out_dir = dir.path().join("untar");

        let written = split_exposure(&src, &out_dir, "DECam_00912345").unwrap();
        assert_eq!(
            written,
            vec![
                out_dir.join("DECam_00912345_1.fits"),
                out_dir.join("DECam_00912345_3.fits"),
            ]
        );

        let mut fptr = FitsFile::open(&written[1]).unwrap();
        let hdu = fptr.hdu(0).unwrap();
        let header = Header::read_current(&mut fptr).unwrap();
        assert_eq!(header.cards()[0].keyword(), "SIMPLE");
        assert_eq!(header.get_str("EXTNAME").as_deref(), Some("S3"));
        assert_eq!(header.get_str("OBJECT").as_deref(), Some("DWF_4hr"));
        assert_eq!(header.get_int("EXPNUM"), Some(912345));
        assert_eq!(header.get_str("DETSIZE").as_deref(), Some("[1:2048,1:4096]"));
        assert!(!header.contains("XTENSION"));
        assert!(!header.contains("PCOUNT"));

        let data: Vec<i16> = hdu.read_image(&mut fptr).unwrap();
        assert_eq!(data, pixels(3));
    }

    #[test]
    fn truncated_data_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("short.fits");
        write_mef(&src);
        let full = std::fs::read(&src).unwrap();
        // Cut into the first extension's data.
        std::fs::write(&src, &full[..2880 * 3]).unwrap();

        assert!(split_exposure(&src, dir.path(), "short").is_err());
    }
}
