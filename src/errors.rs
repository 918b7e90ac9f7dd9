// src/errors.rs

//! Crate-wide error type and result alias.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PrepipeError {
    /// One or more configuration problems, collected into a single report.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid run date '{0}' (expected utYYMMDD)")]
    InvalidRunDate(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("{tool} exited with code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    #[error("could not launch {tool}: {reason}")]
    ToolMissing { tool: String, reason: String },

    #[error("Missing calibration: {0}")]
    MissingCalibration(String),

    #[error("FITS error: {0}")]
    Fits(String),

    #[error("{0:?} did not stop growing within the stability window")]
    NotStable(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<fitsio::errors::Error> for PrepipeError {
    fn from(e: fitsio::errors::Error) -> Self {
        PrepipeError::Fits(e.to_string())
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, PrepipeError>;
