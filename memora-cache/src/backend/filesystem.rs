//! Filesystem backend: one file per entry under the namespace directory.

use super::Backend;
use crate::config::BackendKind;
use crate::error::CacheResult;
use crate::key::EntryId;
use async_trait::async_trait;
use memora_log::{debug, info};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::fs;

/// Stores each payload as `<dir>/<id>`.
pub struct FilesystemBackend {
    dir: PathBuf,
    temp_counter: AtomicU64,
}

impl FilesystemBackend {
    /// Open `dir`, creating it or removing every file already in it.
    pub async fn open(dir: impl Into<PathBuf>) -> CacheResult<Self> {
        let dir = dir.into();
        match fs::read_dir(&dir).await {
            Ok(mut entries) => {
                let mut removed = 0usize;
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_file() {
                        fs::remove_file(entry.path()).await?;
                        removed += 1;
                    }
                }
                debug!("Cleared {} stale cache files in {}", removed, dir.display());
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                fs::create_dir_all(&dir).await?;
            }
            Err(e) => return Err(e.into()),
        }

        info!("Filesystem cache ready at {}", dir.display());

        Ok(Self {
            dir,
            temp_counter: AtomicU64::new(0),
        })
    }

    /// Directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the file for an entry.
    pub fn entry_path(&self, id: EntryId) -> PathBuf {
        self.dir.join(id.to_string())
    }
}

#[async_trait]
impl Backend for FilesystemBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Filesystem
    }

    async fn put(&self, id: EntryId, payload: String, _ttl: Duration) -> CacheResult<()> {
        // Write aside and rename so readers never see a torn file.
        let n = self.temp_counter.fetch_add(1, Ordering::Relaxed);
        let temp = self.dir.join(format!(".{}.{}.tmp", id, n));
        if let Err(e) = fs::write(&temp, payload.as_bytes()).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&temp, self.entry_path(id)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(e.into());
        }
        Ok(())
    }

    async fn get(&self, id: EntryId) -> CacheResult<Option<String>> {
        match fs::read_to_string(self.entry_path(id)).await {
            Ok(payload) => Ok(Some(payload)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, id: EntryId) -> CacheResult<()> {
        match fs::remove_file(self.entry_path(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
