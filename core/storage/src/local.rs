//! Local filesystem storage backend.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::store::KvStore;
use seedlock_common::{Error, Result};

/// Characters that must not appear in file names derived from keys.
/// `/` is kept literal so key prefixes map to directories.
const KEY_ESCAPE: &AsciiSet = &CONTROLS.add(b'%').add(b'\\').add(b':').add(b'*').add(b'?');

/// Local filesystem store.
///
/// Each key maps to one file under the root directory; `/` separators in
/// keys become subdirectories, all other reserved characters are
/// percent-encoded.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    /// Create a store rooted at the given directory.
    ///
    /// # Postconditions
    /// - Root directory is created if it doesn't exist
    ///
    /// # Errors
    /// - Permission denied or invalid path
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        // Sync create is fine in the constructor.
        if !root.exists() {
            std::fs::create_dir_all(&root).map_err(storage_err)?;
        }

        Ok(Self { root })
    }

    fn to_fs_path(&self, key: &str) -> PathBuf {
        let mut path = self.root.clone();
        for segment in key.split('/') {
            path.push(utf8_percent_encode(segment, KEY_ESCAPE).to_string());
        }
        path
    }

    fn to_key(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = rel
            .components()
            .map(|c| {
                percent_decode_str(&c.as_os_str().to_string_lossy())
                    .decode_utf8_lossy()
                    .into_owned()
            })
            .collect();
        Some(segments.join("/"))
    }

    fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        if !dir.exists() {
            return Ok(());
        }
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_dir() {
                Self::walk(&path, out)?;
            } else {
                out.push(path);
            }
        }
        Ok(())
    }
}

fn storage_err(e: std::io::Error) -> Error {
    Error::StorageUnavailable(e.to_string())
}

#[async_trait]
impl KvStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.to_fs_path(key);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let path = self.to_fs_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(storage_err)?;
        }

        // Write-then-rename so readers never observe a partial record.
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &value).await.map_err(storage_err)?;
        fs::rename(&tmp, &path).await.map_err(storage_err)?;

        debug!(key, len = value.len(), "stored record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.to_fs_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_err(e)),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        let keys = tokio::task::spawn_blocking(move || -> std::io::Result<Vec<PathBuf>> {
            let mut files = Vec::new();
            LocalStore::walk(&root, &mut files)?;
            Ok(files)
        })
        .await
        .map_err(|e| Error::StorageUnavailable(e.to_string()))?
        .map_err(storage_err)?;

        let mut result: Vec<String> = keys
            .iter()
            .filter_map(|p| self.to_key(p))
            .filter(|k| k.starts_with(&prefix))
            .collect();
        result.sort();
        Ok(result)
    }
}
