// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model and the validated settings.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: per-subcommand checks, all problems reported at once.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, load_or_default};
pub use model::{
    ConfigFile, LedgerSettings, LoggingSection, PrepipeSettings, ProcessSettings, PushSettings,
    RawConfigFile, RemoteSettings, SbatchSettings, StabilitySettings, ToolPaths, WatchSettings,
};
pub use validate::{DEFAULT_QS, Role, validate, validate_run_date, workspace_for};
