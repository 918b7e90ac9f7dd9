// src/push/transfer.rs

//! Package one exposure and publish it on the remote host.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::{PushSettings, RemoteSettings, ToolPaths};
use crate::engine::{FileReport, FileStage};
use crate::errors::Result;
use crate::exec::{CommandRunner, ToolCommand, run_checked};
use crate::fs::FileSystem;
use crate::push::package::PushPaths;
use crate::reduce::exposure_root;

/// Shared by every push, including those running in the worker pool.
pub struct PushWorker {
    settings: PushSettings,
    remote: RemoteSettings,
    tools: ToolPaths,
    runner: Arc<dyn CommandRunner>,
    fs: Arc<dyn FileSystem>,
}

impl std::fmt::Debug for PushWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PushWorker")
            .field("data_dir", &self.settings.data_dir)
            .field("receiver", &self.remote.receiver())
            .finish_non_exhaustive()
    }
}

impl PushWorker {
    pub fn new(
        settings: PushSettings,
        remote: RemoteSettings,
        tools: ToolPaths,
        runner: Arc<dyn CommandRunner>,
        fs: Arc<dyn FileSystem>,
    ) -> Self {
        Self {
            settings,
            remote,
            tools,
            runner,
            fs,
        }
    }

    pub fn settings(&self) -> &PushSettings {
        &self.settings
    }

    pub fn remote(&self) -> &RemoteSettings {
        &self.remote
    }

    pub fn tools(&self) -> &ToolPaths {
        &self.tools
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    pub fn paths(&self, root: &str) -> PushPaths {
        PushPaths::new(&self.settings.data_dir, &self.settings.jp2_dir, root)
    }

    /// Package, push and clean one arrived exposure.
    pub async fn ship(self: Arc<Self>, path: PathBuf) -> FileReport {
        let Some(root) = exposure_root(&path) else {
            return FileReport::failed(path, "cannot derive exposure name");
        };
        info!(file = %path.display(), "Processing");

        let mut paths = self.paths(&root);
        paths.packed = path.clone();

        if let Err(e) = self.package(&paths).await {
            self.clean(&paths);
            return FileReport::failed(path, e);
        }
        let pushed = self.push(&paths).await;
        self.clean(&paths);

        match pushed {
            Ok(()) => FileReport::ok(path, FileStage::Cleaned),
            Err(e) => FileReport::failed(path, e),
        }
    }

    /// `funpack`, then FITS to JPEG2000, then tar the JPEG2000 directory.
    pub async fn package(&self, paths: &PushPaths) -> Result<()> {
        info!(file = %paths.packed.display(), "Unpacking");
        let funpack = ToolCommand::new(&self.tools.funpack).arg(&paths.packed);
        run_checked(self.runner.as_ref(), &funpack).await?;

        if !self.fs.is_dir(&paths.jp2_dir) {
            info!(dir = %paths.jp2_dir.display(), "Creating Directory");
            self.fs.create_dir_all(&paths.jp2_dir)?;
        }

        info!(file = %paths.fits.display(), qs = self.settings.qs, "Compressing");
        let f2j = ToolCommand::new(&self.tools.f2j)
            .arg("-i")
            .arg(&paths.fits)
            .arg("-o")
            .arg(&paths.jp2)
            .arg(format!("Qstep={}", self.settings.qs))
            .arg("-num_threads")
            .arg("1");
        run_checked(self.runner.as_ref(), &f2j).await?;

        info!(tar = %paths.tar.display(), "Packaging");
        let tar = ToolCommand::new(&self.tools.tar)
            .arg("-cf")
            .arg(&paths.tar)
            .arg("-C")
            .arg(&paths.jp2_dir)
            .arg(".");
        run_checked(self.runner.as_ref(), &tar).await?;
        Ok(())
    }

    /// Copy the tarball to the landing directory, move it into the target
    /// directory, then drop the local copy. Any failure keeps the local
    /// tarball; a failed `scp` skips the move.
    pub async fn push(&self, paths: &PushPaths) -> Result<()> {
        let receiver = self.remote.receiver();
        info!(tar = %paths.tar.display(), %receiver, "Shipping");

        let scp = ToolCommand::new(&self.tools.scp)
            .arg(&paths.tar)
            .arg(format!("{receiver}:{}/", self.remote.push_dir.display()));
        run_checked(self.runner.as_ref(), &scp).await?;

        let landed = self.remote.push_dir.join(format!("{}.tar", paths.root));
        let ssh = ToolCommand::new(&self.tools.ssh)
            .arg(&receiver)
            .arg("mv")
            .arg(&landed)
            .arg(format!("{}/", self.remote.target_dir.display()));
        run_checked(self.runner.as_ref(), &ssh).await?;

        remove_quietly(self.fs.as_ref(), &paths.tar, false);
        Ok(())
    }

    /// Remove the unpacked FITS and the per-exposure JPEG2000 directory.
    pub fn clean(&self, paths: &PushPaths) {
        info!(file = %paths.fits.display(), "Removing");
        remove_quietly(self.fs.as_ref(), &paths.fits, false);
        info!(dir = %paths.jp2_dir.display(), "Cleaning");
        remove_quietly(self.fs.as_ref(), &paths.jp2_dir, true);
    }
}

fn remove_quietly(fs: &dyn FileSystem, path: &Path, dir: bool) {
    if !fs.exists(path) {
        return;
    }
    let removed = if dir {
        fs.remove_dir_all(path)
    } else {
        fs.remove_file(path)
    };
    if let Err(e) = removed {
        warn!(path = %path.display(), error = %format!("{e:#}"), "could not remove");
    }
}
