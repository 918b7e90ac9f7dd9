#![allow(dead_code)]

pub use dwf_prepipe_test_utils::{ConfigFileBuilder, FakeRunner, init_tracing};

use std::path::Path;

use dwf_prepipe::fits::CCD_ROWS;
use fitsio::FitsFile;
use fitsio::images::{ImageDescription, ImageType};

/// Header values of a single-CCD frame as the camera writes them.
pub struct Frame<'a> {
    pub expnum: i64,
    pub object: &'a str,
    pub filter: &'a str,
    pub obstype: &'a str,
}

impl Default for Frame<'_> {
    fn default() -> Self {
        Self {
            expnum: 912345,
            object: "8hr",
            filter: "g DECam SDSS c0001 4720.0 1520.0",
            obstype: "object",
        }
    }
}

/// A one-HDU FITS file with no data, carrying `frame`'s header keys.
pub fn write_ccd_fits(path: &Path, frame: &Frame<'_>) {
    let mut fptr = FitsFile::create(path).overwrite().open().unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_key(&mut fptr, "EXPNUM", frame.expnum).unwrap();
    hdu.write_key(&mut fptr, "OBJECT", frame.object).unwrap();
    hdu.write_key(&mut fptr, "FILTER", frame.filter).unwrap();
    hdu.write_key(&mut fptr, "OBSTYPE", frame.obstype).unwrap();
}

/// A multi-extension exposure with `n_ccds` CCD-shaped image extensions
/// followed by one small guider extension.
pub fn write_exposure(path: &Path, n_ccds: usize) {
    let mut fptr = FitsFile::create(path).overwrite().open().unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.write_key(&mut fptr, "OBJECT", "8hr").unwrap();
    hdu.write_key(&mut fptr, "EXPNUM", 912345i64).unwrap();

    let mut ext = |rows: usize, name: &str| {
        let cols = 2;
        let description = ImageDescription {
            data_type: ImageType::Short,
            dimensions: &[rows, cols],
        };
        let hdu = fptr.create_image(name, &description).unwrap();
        hdu.write_image(&mut fptr, &vec![7i16; rows * cols]).unwrap();
    };

    for i in 1..=n_ccds {
        ext(CCD_ROWS, &format!("S{i}"));
    }
    ext(16, "GUIDER");
}
