// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WatchSettings;
use crate::engine::RuntimeEvent;
use crate::fs::FileSystem;
use crate::types::WatchBackend;
use crate::watch::patterns::FilePattern;
use crate::watch::snapshot::{ChangeSet, DirSnapshot, diff};

/// Lists one directory and reports what changed since the previous listing.
#[derive(Debug)]
pub struct DirectoryWatcher {
    fs: Arc<dyn FileSystem>,
    dir: PathBuf,
    pattern: FilePattern,
    previous: DirSnapshot,
}

impl DirectoryWatcher {
    pub fn new(fs: Arc<dyn FileSystem>, dir: impl Into<PathBuf>, pattern: FilePattern) -> Self {
        Self {
            fs,
            dir: dir.into(),
            pattern,
            previous: DirSnapshot::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Current matching files (not descending into subdirectories).
    pub fn list(&self) -> Result<DirSnapshot> {
        let entries = self
            .fs
            .read_dir(&self.dir)
            .with_context(|| format!("listing {:?}", self.dir))?;
        Ok(entries
            .into_iter()
            .filter(|p| self.pattern.matches(p) && self.fs.is_file(p))
            .collect())
    }

    /// Take the current listing as the baseline, so existing files are never
    /// reported as added.
    pub fn seed(&mut self) -> Result<usize> {
        self.previous = self.list()?;
        Ok(self.previous.len())
    }

    /// Difference since the previous successful poll. On error the baseline
    /// is left untouched, so nothing is lost.
    pub fn poll_once(&mut self) -> Result<ChangeSet> {
        let current = self.list()?;
        let change = diff(&self.previous, &current);
        self.previous = current;
        Ok(change)
    }
}

/// Handle for the background poller.
///
/// Dropping this handle stops watching.
pub struct WatcherHandle {
    task: JoinHandle<()>,
    _notify: Option<RecommendedWatcher>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("notify", &self._notify.is_some())
            .finish()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Spawn the polling loop for `watcher`, sending every non-empty
/// [`ChangeSet`] to `runtime_tx` as [`RuntimeEvent::Changes`].
///
/// The loop only ends when the runtime side of the channel is gone.
pub fn spawn_poller(
    mut watcher: DirectoryWatcher,
    settings: WatchSettings,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
) -> Result<WatcherHandle> {
    if settings.process_existing {
        info!(dir = %watcher.dir().display(), "files already present will be processed");
    } else {
        let n = watcher.seed()?;
        info!(dir = %watcher.dir().display(), existing = n, "ignoring files already present");
    }

    let (notify, wake_rx) = match settings.backend {
        WatchBackend::Poll => (None, None),
        WatchBackend::Notify => {
            let (w, rx) = notify_wakeups(watcher.dir())?;
            (Some(w), Some(rx))
        }
    };

    info!(
        dir = %watcher.dir().display(),
        interval = ?settings.poll_interval,
        backend = ?settings.backend,
        "watching for new files"
    );

    let task = tokio::spawn(poll_loop(watcher, settings, runtime_tx, wake_rx));
    Ok(WatcherHandle {
        task,
        _notify: notify,
    })
}

async fn poll_loop(
    mut watcher: DirectoryWatcher,
    settings: WatchSettings,
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    mut wake_rx: Option<mpsc::UnboundedReceiver<()>>,
) {
    let mut backoff = settings.poll_interval;
    let mut idle_since = Instant::now();

    loop {
        let delay = match watcher.poll_once() {
            Ok(change) => {
                backoff = settings.poll_interval;
                if change.is_empty() {
                    if idle_since.elapsed() >= settings.idle_warning {
                        warn!(
                            dir = %watcher.dir().display(),
                            idle = ?idle_since.elapsed(),
                            "no new files seen"
                        );
                        idle_since = Instant::now();
                    }
                } else {
                    idle_since = Instant::now();
                    debug!(added = change.added.len(), removed = change.removed.len(), "directory changed");
                    if runtime_tx.send(RuntimeEvent::Changes(change)).await.is_err() {
                        debug!("runtime channel closed; poller exiting");
                        return;
                    }
                }
                settings.poll_interval
            }
            Err(e) => {
                let delay = backoff;
                warn!(error = %format!("{e:#}"), retry_in = ?delay, "directory listing failed");
                backoff = next_backoff(backoff, settings.max_backoff);
                delay
            }
        };

        if runtime_tx.is_closed() {
            return;
        }
        wait_or_wake(delay, &mut wake_rx).await;
    }
}

/// Double `current`, capped at `max`.
pub fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

async fn wait_or_wake(delay: Duration, wake_rx: &mut Option<mpsc::UnboundedReceiver<()>>) {
    let Some(rx) = wake_rx else {
        tokio::time::sleep(delay).await;
        return;
    };
    let woke = tokio::select! {
        _ = tokio::time::sleep(delay) => return,
        woke = rx.recv() => woke,
    };
    match woke {
        None => *wake_rx = None,
        // Coalesce the burst of events a single copy produces.
        Some(()) => while rx.try_recv().is_ok() {},
    }
}

fn notify_wakeups(dir: &Path) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<()>)> {
    let (tx, rx) = mpsc::unbounded_channel::<()>();

    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if event.kind.is_create() || event.kind.is_modify() || event.kind.is_remove() {
                    let _ = tx.send(());
                }
            }
            Err(err) => warn!(error = %err, "file watch error"),
        },
        Config::default(),
    )?;
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok((watcher, rx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;

    fn watcher(fs: &MockFileSystem) -> DirectoryWatcher {
        DirectoryWatcher::new(
            Arc::new(fs.clone()),
            "/push",
            FilePattern::new("*.tar").unwrap(),
        )
    }

    #[test]
    fn seeded_files_are_not_reported() {
        let fs = MockFileSystem::new();
        fs.add_file("/push/old.tar", b"x".to_vec());
        let mut w = watcher(&fs);
        assert_eq!(w.seed().unwrap(), 1);

        fs.add_file("/push/new.tar", b"x".to_vec());
        fs.add_file("/push/notes.txt", b"x".to_vec());
        let change = w.poll_once().unwrap();
        assert_eq!(change.added, vec![PathBuf::from("/push/new.tar")]);
        assert!(change.removed.is_empty());

        assert!(w.poll_once().unwrap().is_empty());
    }

    #[test]
    fn failed_listing_keeps_previous_baseline() {
        let fs = MockFileSystem::new();
        let mut w = DirectoryWatcher::new(
            Arc::new(fs.clone()),
            "/missing",
            FilePattern::new("*.tar").unwrap(),
        );
        assert!(w.poll_once().is_err());
        fs.add_file("/missing/a.tar", b"x".to_vec());
        assert_eq!(w.poll_once().unwrap().added.len(), 1);
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let max = Duration::from_secs(60);
        let mut d = Duration::from_secs(5);
        let mut seen = Vec::new();
        for _ in 0..6 {
            d = next_backoff(d, max);
            seen.push(d.as_secs());
        }
        assert_eq!(seen, vec![10, 20, 40, 60, 60, 60]);
    }
}
