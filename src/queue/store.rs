use std::path::{Path, PathBuf};

use tracing::{debug, error, warn};

use crate::queue::ImportQueue;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid queue file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> Error + '_ {
    move |source| Error::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// One JSON file per queue under `<dir>/queues`.
#[derive(Debug, Clone)]
pub struct QueueStore {
    dir: PathBuf,
}

impl QueueStore {
    pub fn new(storage_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: storage_dir.as_ref().join("queues"),
        }
    }

    pub fn path_of(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Write through a temporary file so a crash never leaves a torn file.
    pub async fn save(&self, queue: &ImportQueue) -> Result<(), Error> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;
        let path = self.path_of(&queue.id);
        let tmp = path.with_extension("json.tmp");
        let body = serde_json::to_vec_pretty(queue).map_err(|source| Error::Json {
            path: path.clone(),
            source,
        })?;
        tokio::fs::write(&tmp, body)
            .await
            .inspect_err(|error| error!(%error, path = %tmp.display(), "Failed to write queue"))
            .map_err(io_error(&tmp))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(io_error(&path))?;
        debug!(queue_id = queue.id, "saved queue");
        Ok(())
    }

    /// Every readable queue. Unparsable files are logged and skipped.
    pub async fn load_all(&self) -> Result<Vec<ImportQueue>, Error> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(io_error(&self.dir)(error)),
        };
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&self.dir))? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        let mut queues = Vec::with_capacity(paths.len());
        for path in paths {
            let body = tokio::fs::read(&path).await.map_err(io_error(&path))?;
            match serde_json::from_slice::<ImportQueue>(&body) {
                Ok(queue) => queues.push(queue),
                Err(error) => warn!(%error, path = %path.display(), "Skipping unreadable queue file"),
            }
        }
        Ok(queues)
    }

    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let path = self.path_of(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(io_error(&path)(error)),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::{
        queue::{ImportQueue, MigrationConfig, QueueItem, QueueSettings, QueueStatus},
        source::ArticleId,
    };

    fn queue() -> ImportQueue {
        let now = Utc::now();
        let article = serde_json::from_value(json!({
            "id": 1,
            "title": "Driver review",
            "content": "body",
            "created_at": "2024-01-01 10:00:00",
            "views": 10
        }))
        .unwrap();
        ImportQueue {
            id: ImportQueue::new_id(),
            name: "nightly".into(),
            description: None,
            items: vec![QueueItem::new(article, now)],
            config: MigrationConfig::new(ArticleId::Int(1), "ja"),
            settings: QueueSettings::default(),
            status: QueueStatus::Idle,
            schedule: None,
            statistics: Default::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn round_trip_restores_dates() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path());
        assert!(store.load_all().await.unwrap().is_empty());

        let queue = queue();
        store.save(&queue).await.unwrap();
        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded, vec![queue.clone()]);
        assert!(loaded[0].items[0].article.created_at.is_some());
        assert!(!store.path_of(&queue.id).with_extension("json.tmp").exists());

        store.delete(&queue.id).await.unwrap();
        store.delete(&queue.id).await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn broken_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path());
        store.save(&queue()).await.unwrap();
        std::fs::write(dir.path().join("queues").join("junk.json"), "{").unwrap();
        assert_eq!(store.load_all().await.unwrap().len(), 1);
    }
}
