use async_trait::async_trait;
use muster_error::{storage::StorageError, StorageResult};
use muster_models::{CycleRecord, RecordSink};
use std::path::{Path, PathBuf};
use tokio::{
    fs::{create_dir_all, File, OpenOptions},
    io::AsyncWriteExt,
    sync::Mutex,
};
use tracing::{debug, info};

/// Append-only results log, one line per committed cycle.
///
/// The file is opened once at startup and held for the process lifetime;
/// lines are flushed after every append so a crash loses at most the record
/// being written. `fsync_on_append` additionally syncs the file to disk at
/// the cost of one fsync per cycle.
pub struct ResultsLog {
    path: PathBuf,
    fsync_on_append: bool,
    file: Mutex<File>,
}

impl ResultsLog {
    pub async fn open(path: impl AsRef<Path>, fsync_on_append: bool) -> StorageResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                create_dir_all(parent).await.map_err(|source| {
                    StorageError::Open {
                        path: path.display().to_string(),
                        source,
                    }
                })?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::Open {
                path: path.display().to_string(),
                source,
            })?;
        info!(path = %path.display(), fsync_on_append, "results log opened");
        Ok(Self {
            path,
            fsync_on_append,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl RecordSink for ResultsLog {
    async fn append(&self, record: &CycleRecord) -> StorageResult<()> {
        let mut line = record.to_line();
        line.push('\n');

        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes())
            .await
            .map_err(|source| StorageError::Append { source })?;
        file.flush()
            .await
            .map_err(|source| StorageError::Flush { source })?;
        if self.fsync_on_append {
            file.sync_all()
                .await
                .map_err(|source| StorageError::Flush { source })?;
        }
        debug!(values = record.values().len(), "record appended");
        Ok(())
    }
}
