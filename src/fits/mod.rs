// src/fits/mod.rs

//! FITS support on top of cfitsio: header cards, header merging, and
//! splitting a multi-extension exposure into per-CCD files.

pub mod header;
pub mod split;

pub use header::{Card, Header, merge_headers};
pub use split::{CCD_ROWS, split_exposure};

use std::path::Path;

use fitsio::FitsFile;

use crate::errors::Result;

/// Read the primary header of a FITS file.
pub fn read_primary_header(path: &Path) -> Result<Header> {
    let mut fptr = FitsFile::open(path)?;
    fptr.hdu(0)?;
    Header::read_current(&mut fptr)
}
