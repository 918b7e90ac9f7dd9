// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::config::validate::{Role, validate};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for the
/// semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Like [`load_from_path`], but a missing file yields the all-defaults config.
pub fn load_or_default(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    if path.exists() {
        load_from_path(path)
    } else {
        Ok(RawConfigFile::default())
    }
}

/// Load a configuration file from path and validate it for `role`.
pub fn load_and_validate(path: impl AsRef<Path>, role: Role) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    validate(raw_config, role)
}

/// `Prepipe.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Prepipe.toml")
}
