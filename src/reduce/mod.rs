// src/reduce/mod.rs

//! Per-CCD processing run inside each batch job.
//!
//! - [`naming`]: input and output file names, frame kinds from `OBSTYPE`.
//! - [`calibration`]: flat and bias lookup in the raw-data tree.
//! - [`chain`]: decompress, file by header, reduce with the external tools.

pub mod calibration;
pub mod chain;
pub mod naming;

pub use calibration::{Calibration, find_calibration};
pub use chain::{AstromaticConfig, CcdOutcome, CcdReducer};
pub use naming::{ExposureName, FrameInfo, FrameKind, FrameProducts, exposure_number, exposure_root};
