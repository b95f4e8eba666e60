use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::selection::ArticleFilters;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid preset file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// A named filter set. Selections are not part of a preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterPreset {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub filters: ArticleFilters,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

/// All presets in one JSON file, rewritten on every change.
#[derive(Debug, Clone)]
pub struct PresetStore {
    path: PathBuf,
}

impl PresetStore {
    pub fn new(storage_dir: impl AsRef<Path>) -> Self {
        Self {
            path: storage_dir.as_ref().join("presets.json"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        error!(error = %source, path = %self.path.display(), "Preset storage failed");
        Error::Io {
            path: self.path.clone(),
            source,
        }
    }

    pub async fn list(&self) -> Result<Vec<FilterPreset>, Error> {
        let body = match tokio::fs::read(&self.path).await {
            Ok(body) => body,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(error) => return Err(self.io_error(error)),
        };
        serde_json::from_slice(&body).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })
    }

    async fn write(&self, presets: &[FilterPreset]) -> Result<(), Error> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|error| self.io_error(error))?;
        }
        let body = serde_json::to_vec_pretty(presets).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|error| self.io_error(error))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|error| self.io_error(error))
    }

    pub async fn save(
        &self,
        name: impl Into<String>,
        description: Option<String>,
        filters: ArticleFilters,
    ) -> Result<FilterPreset, Error> {
        let mut presets = self.list().await?;
        let preset = FilterPreset {
            id: format!("preset_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            description,
            filters,
            created_at: Utc::now(),
            last_used: None,
        };
        presets.push(preset.clone());
        self.write(&presets).await?;
        debug!(preset_id = preset.id, "saved preset");
        Ok(preset)
    }

    /// Fetch a preset and record its use.
    pub async fn load(&self, id: &str) -> Result<Option<FilterPreset>, Error> {
        let mut presets = self.list().await?;
        let Some(preset) = presets.iter_mut().find(|preset| preset.id == id) else {
            return Ok(None);
        };
        preset.last_used = Some(Utc::now());
        let preset = preset.clone();
        self.write(&presets).await?;
        Ok(Some(preset))
    }

    /// Returns whether a preset was removed.
    pub async fn delete(&self, id: &str) -> Result<bool, Error> {
        let mut presets = self.list().await?;
        let before = presets.len();
        presets.retain(|preset| preset.id != id);
        if presets.len() == before {
            return Ok(false);
        }
        self.write(&presets).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn presets_persist() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::new(dir.path());
        assert!(store.list().await.unwrap().is_empty());

        let filters = ArticleFilters {
            categories: vec!["gear".into()],
            has_seo: Some(true),
            ..Default::default()
        };
        let saved = store
            .save("gear with seo", Some("weekly review".into()), filters.clone())
            .await
            .unwrap();
        store.save("other", None, ArticleFilters::default()).await.unwrap();

        let reopened = PresetStore::new(dir.path());
        let loaded = reopened.load(&saved.id).await.unwrap().unwrap();
        assert_eq!(loaded.filters, filters);
        assert!(loaded.last_used.is_some());
        assert_eq!(reopened.list().await.unwrap()[0].last_used, loaded.last_used);
        assert!(reopened.load("missing").await.unwrap().is_none());

        assert!(reopened.delete(&saved.id).await.unwrap());
        assert!(!reopened.delete(&saved.id).await.unwrap());
        let left = reopened.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].name, "other");
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = PresetStore::new(dir.path());
        std::fs::write(store.path(), "[{").unwrap();
        assert!(matches!(store.list().await, Err(Error::Json { .. })));
    }
}
