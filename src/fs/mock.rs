// src/fs/mock.rs

use super::{FileStat, FileSystem};
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone)]
pub enum MockEntry {
    File {
        content: Vec<u8>,
        modified: SystemTime,
    },
    Dir(Vec<String>), // List of child names
}

#[derive(Debug, Default)]
struct MockState {
    entries: HashMap<PathBuf, MockEntry>,
    /// Logical clock; every write advances it by one second.
    ticks: u64,
}

/// In-memory tree for tests. Clones share the same tree.
#[derive(Debug, Clone, Default)]
pub struct MockFileSystem {
    state: Arc<Mutex<MockState>>,
}

fn parent_or_dot(path: &Path) -> Option<&Path> {
    path.parent().map(|p| {
        if p.as_os_str().is_empty() {
            Path::new(".")
        } else {
            p
        }
    })
}

impl MockState {
    fn tick(&mut self) -> SystemTime {
        self.ticks += 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.ticks)
    }

    fn ensure_dir(&mut self, path: &Path) {
        if self.entries.contains_key(path) {
            return;
        }
        self.entries
            .insert(path.to_path_buf(), MockEntry::Dir(Vec::new()));
        if let Some(parent) = parent_or_dot(path) {
            if parent != path {
                self.ensure_dir(parent);
                self.link_child(parent, path);
            }
        }
    }

    fn link_child(&mut self, parent: &Path, child: &Path) {
        if let (Some(MockEntry::Dir(children)), Some(name)) = (
            self.entries.get_mut(parent),
            child.file_name().and_then(|n| n.to_str()),
        ) {
            if !children.iter().any(|c| c == name) {
                children.push(name.to_string());
            }
        }
    }

    fn unlink_child(&mut self, child: &Path) {
        if let Some(parent) = parent_or_dot(child) {
            if let (Some(MockEntry::Dir(children)), Some(name)) = (
                self.entries.get_mut(parent),
                child.file_name().and_then(|n| n.to_str()),
            ) {
                children.retain(|c| c != name);
            }
        }
    }

    fn put_file(&mut self, path: &Path, content: Vec<u8>) {
        let modified = self.tick();
        self.entries
            .insert(path.to_path_buf(), MockEntry::File { content, modified });
        if let Some(parent) = parent_or_dot(path) {
            self.ensure_dir(parent);
            self.link_child(parent, path);
        }
    }

    fn file(&self, path: &Path) -> Result<&Vec<u8>> {
        match self.entries.get(path) {
            Some(MockEntry::File { content, .. }) => Ok(content),
            Some(MockEntry::Dir(_)) => Err(anyhow!("Is a directory: {:?}", path)),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        let fs = Self::default();
        fs.lock().ensure_dir(Path::new("."));
        fs
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
        self.lock().put_file(path.as_ref(), content.into());
    }

    pub fn add_dir(&self, path: impl AsRef<Path>) {
        self.lock().ensure_dir(path.as_ref());
    }

    /// Grow an existing file, the way a transfer in progress would.
    pub fn append(&self, path: impl AsRef<Path>, more: &[u8]) -> Result<()> {
        let path = path.as_ref();
        let mut state = self.lock();
        let now = state.tick();
        match state.entries.get_mut(path) {
            Some(MockEntry::File { content, modified }) => {
                content.extend_from_slice(more);
                *modified = now;
                Ok(())
            }
            _ => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    /// Bytes of a file, for assertions.
    pub fn contents(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.lock().file(path.as_ref()).ok().cloned()
    }
}

impl FileSystem for MockFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String> {
        let state = self.lock();
        let content = state.file(path)?;
        String::from_utf8(content.clone()).map_err(|e| anyhow!("Invalid UTF-8: {}", e))
    }

    fn write(&self, path: &Path, contents: &[u8]) -> Result<()> {
        self.add_file(path, contents);
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.lock().entries.contains_key(path)
    }

    fn is_file(&self, path: &Path) -> bool {
        matches!(self.lock().entries.get(path), Some(MockEntry::File { .. }))
    }

    fn is_dir(&self, path: &Path) -> bool {
        matches!(self.lock().entries.get(path), Some(MockEntry::Dir(_)))
    }

    fn read_dir(&self, path: &Path) -> Result<Vec<PathBuf>> {
        match self.lock().entries.get(path) {
            Some(MockEntry::Dir(children)) => {
                Ok(children.iter().map(|name| path.join(name)).collect())
            }
            _ => Err(anyhow!("Not a directory or not found: {:?}", path)),
        }
    }

    fn stat(&self, path: &Path) -> Result<FileStat> {
        match self.lock().entries.get(path) {
            Some(MockEntry::File { content, modified }) => Ok(FileStat {
                size: content.len() as u64,
                modified: *modified,
            }),
            Some(MockEntry::Dir(_)) => Ok(FileStat {
                size: 0,
                modified: SystemTime::UNIX_EPOCH,
            }),
            None => Err(anyhow!("File not found: {:?}", path)),
        }
    }

    fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.add_dir(path);
        Ok(())
    }

    fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.lock();
        let content = state.file(from)?.clone();
        state.entries.remove(from);
        state.unlink_child(from);
        state.put_file(to, content);
        Ok(())
    }

    fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        let mut state = self.lock();
        let content = state.file(from)?.clone();
        state.put_file(to, content);
        Ok(())
    }

    fn remove_file(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        state.file(path)?;
        state.entries.remove(path);
        state.unlink_child(path);
        Ok(())
    }

    fn remove_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.lock();
        if !matches!(state.entries.get(path), Some(MockEntry::Dir(_))) {
            return Err(anyhow!("Not a directory or not found: {:?}", path));
        }
        state.entries.retain(|p, _| !p.starts_with(path));
        state.unlink_child(path);
        Ok(())
    }
}
