// src/watch/stability.rs

//! Write-stability check: has a file stopped growing?
//!
//! This is a size comparison across a sleep, so it can be fooled by a writer
//! that pauses longer than one poll interval. Fine for human-timescale
//! transfers; not a substitute for an explicit completion marker.

use std::path::Path;
use std::time::Duration;

use tracing::debug;

use crate::config::StabilitySettings;
use crate::errors::Result;
use crate::fs::FileSystem;

/// Wait until two consecutive size samples of `path`, one poll interval apart,
/// are equal.
///
/// Returns `Ok(false)` once more than `max_wait` has been spent waiting while
/// the size kept changing. A file that disappears mid-check is an error.
pub async fn wait_for_file(
    fs: &dyn FileSystem,
    path: &Path,
    settings: &StabilitySettings,
) -> Result<bool> {
    let step = settings.poll_interval.max(Duration::from_millis(1));
    let mut old_size = fs.stat(path)?.size;
    let mut waited = Duration::ZERO;

    loop {
        tokio::time::sleep(step).await;
        waited += step;

        let new_size = fs.stat(path)?.size;
        if new_size == old_size {
            debug!(file = %path.display(), size = new_size, ?waited, "file is stable");
            return Ok(true);
        }
        if waited > settings.max_wait {
            return Ok(false);
        }
        debug!(file = %path.display(), old_size, new_size, "file still growing");
        old_size = new_size;
    }
}
