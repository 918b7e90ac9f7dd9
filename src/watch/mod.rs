// src/watch/mod.rs

//! File-arrival detection.
//!
//! This module is responsible for:
//! - Compiling the file-name glob for a watched directory.
//! - Diffing successive directory listings into added/removed batches.
//! - Running the polling loop (optionally woken early by `notify`).
//! - Checking that a newly arrived file has stopped growing.
//!
//! It knows nothing about what happens to a file once it has arrived.

pub mod patterns;
pub mod snapshot;
pub mod stability;
pub mod watcher;

pub use patterns::FilePattern;
pub use snapshot::{ChangeSet, DirSnapshot, diff};
pub use stability::wait_for_file;
pub use watcher::{DirectoryWatcher, WatcherHandle, next_backoff, spawn_poller};
