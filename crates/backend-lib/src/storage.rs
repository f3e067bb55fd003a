// ============================
// backend-lib/src/storage.rs
// ============================
//! Watch persistence with a flat-file implementation.
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use meetwatch_common::WatchRecord;
use tokio::fs as tokio_fs;
use tracing::warn;

use crate::error::AppError;

/// Trait for watch persistence backends
#[async_trait]
pub trait WatchStore: Send + Sync {
    /// Every watch that should be resumed on start
    async fn list_active_watches(&self) -> Result<Vec<WatchRecord>, AppError>;

    /// Insert or overwrite the record for `(group, meeting)`
    async fn save_watch(&self, record: &WatchRecord) -> Result<(), AppError>;

    /// Delete the record for `(group, meeting)`; absent records are fine
    async fn delete_watch(&self, group: &str, meeting: &str) -> Result<(), AppError>;

    /// Whether saved watches survive a restart
    fn is_durable(&self) -> bool;
}

/// Store used when persistence is turned off
#[derive(Clone, Copy, Debug, Default)]
pub struct DisabledWatchStore;

#[async_trait]
impl WatchStore for DisabledWatchStore {
    async fn list_active_watches(&self) -> Result<Vec<WatchRecord>, AppError> {
        Ok(Vec::new())
    }

    async fn save_watch(&self, _record: &WatchRecord) -> Result<(), AppError> {
        Ok(())
    }

    async fn delete_watch(&self, _group: &str, _meeting: &str) -> Result<(), AppError> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Flat-file implementation of the WatchStore trait.
///
/// Layout: `<root>/watches/<group>/<meeting>.json`
#[derive(Clone, Debug)]
pub struct FlatFileWatchStore {
    root: PathBuf,
}

impl FlatFileWatchStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, AppError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("watches"))?;
        Ok(Self { root })
    }

    fn watch_path(&self, group: &str, meeting: &str) -> Result<PathBuf, AppError> {
        Ok(self
            .root
            .join("watches")
            .join(safe_component(group)?)
            .join(format!("{}.json", safe_component(meeting)?)))
    }
}

// IDs become path components, so reject anything that could escape the root.
fn safe_component(id: &str) -> Result<&str, AppError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && id != "."
        && id != "..";
    if valid {
        Ok(id)
    } else {
        Err(AppError::InvalidInput(format!("unsafe identifier: {id:?}")))
    }
}

#[async_trait]
impl WatchStore for FlatFileWatchStore {
    async fn list_active_watches(&self) -> Result<Vec<WatchRecord>, AppError> {
        let mut records = Vec::new();
        let mut groups = tokio_fs::read_dir(self.root.join("watches")).await?;

        while let Some(group_dir) = groups.next_entry().await? {
            if !group_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio_fs::read_dir(group_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                let path = file.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let parsed = tokio_fs::read_to_string(&path)
                    .await
                    .map_err(AppError::from)
                    .and_then(|content| {
                        serde_json::from_str::<WatchRecord>(&content).map_err(AppError::from)
                    });
                match parsed {
                    Ok(record) => records.push(record),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable watch record"),
                }
            }
        }

        records.sort_by(|a, b| {
            (a.group_id.as_str(), a.meeting_id.as_str()).cmp(&(b.group_id.as_str(), b.meeting_id.as_str()))
        });
        Ok(records)
    }

    async fn save_watch(&self, record: &WatchRecord) -> Result<(), AppError> {
        let path = self.watch_path(&record.group_id, &record.meeting_id)?;
        if let Some(parent) = path.parent() {
            tokio_fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_string_pretty(record)?;
        tokio_fs::write(path, json).await?;
        Ok(())
    }

    async fn delete_watch(&self, group: &str, meeting: &str) -> Result<(), AppError> {
        let path = self.watch_path(group, meeting)?;
        match tokio_fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn is_durable(&self) -> bool {
        true
    }
}
