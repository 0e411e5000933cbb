//! File-backed ledger store
//!
//! Writes land in a sibling `.tmp` file first and are then renamed over the
//! target, so a reader never sees a half-written blob.

use super::LedgerStore;
use crate::error::{EngineError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
enum Layout {
    /// Every key maps to the same file
    SingleFile(PathBuf),
    /// One `<key>.json` file per key
    Directory(PathBuf),
}

#[derive(Debug, Clone)]
pub struct FileStore {
    layout: Layout,
}

impl FileStore {
    pub fn single_file(path: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::SingleFile(path.into()),
        }
    }

    pub fn directory(dir: impl Into<PathBuf>) -> Self {
        Self {
            layout: Layout::Directory(dir.into()),
        }
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        match &self.layout {
            Layout::SingleFile(path) => path.clone(),
            Layout::Directory(dir) => dir.join(format!("{}.json", sanitize_key(key))),
        }
    }
}

impl LedgerStore for FileStore {
    fn put(&mut self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp = tmp_path(&path);
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp);
            EngineError::Storage(format!("rename {} failed: {}", path.display(), e))
        })?;

        tracing::debug!("Wrote {} bytes to {}", bytes.len(), path.display());
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sanitize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}
