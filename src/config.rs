use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::error;

use crate::{
    linking::{LinkingOptions, catalog::Catalog},
    queue::QueueOptions,
    rich_text::convert::ConverterOptions,
    source::SourceProfile,
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("No source profiles configured")]
    NoProfiles,
    #[error("Profile '{profile}' is invalid: {source}")]
    Profile {
        profile: String,
        #[source]
        source: crate::source::Error,
    },
    #[error("Default profile '{0}' is not defined")]
    UnknownDefaultProfile(String),
    #[error("queue.batch_size must be at least 1")]
    ZeroBatchSize,
    #[error("Invalid listing rule: {0}")]
    ListingRule(#[from] regex::Error),
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".article-migrate")
}

#[derive(Debug, Clone, Deserialize)]
pub struct Storage {
    /// Queue files and presets live under this directory.
    #[serde(default = "default_storage_dir")]
    pub dir: PathBuf,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            dir: default_storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CmsConfig {
    pub base_url: url::Url,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Write into a local sqlite store instead of the remote API.
    #[serde(default)]
    pub local_db: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub profiles: IndexMap<String, SourceProfile>,
    #[serde(default)]
    pub default_profile: Option<String>,
    #[serde(default)]
    pub storage: Storage,
    pub cms: CmsConfig,
    #[serde(default)]
    pub converter: ConverterOptions,
    #[serde(default)]
    pub linking: LinkingOptions,
    /// Link catalog file (YAML or JSON list of entries). Link injection is
    /// off without one.
    #[serde(default)]
    pub catalog: Option<PathBuf>,
    #[serde(default)]
    pub queue: QueueOptions,
}

enum Format {
    Yaml,
    Toml,
}

impl Format {
    fn of(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::Toml,
            _ => Self::Yaml,
        }
    }
}

fn read(path: &Path) -> Result<String, Error> {
    std::fs::read_to_string(path)
        .inspect_err(|error| error!(%error, path = %path.display(), "Failed to read file"))
        .map_err(|source| Error::Io {
            path: path.to_owned(),
            source,
        })
}

impl Config {
    /// Load and validate a config file. `.toml` files are TOML, anything
    /// else is YAML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let body = read(path)?;
        let config = Self::parse(&body, path)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(body: &str, path: &Path) -> Result<Self, Error> {
        let parse_error = |message: String| Error::Parse {
            path: path.to_owned(),
            message,
        };
        match Format::of(path) {
            Format::Toml => toml::from_str(body).map_err(|e| parse_error(e.to_string())),
            Format::Yaml => serde_yaml::from_str(body).map_err(|e| parse_error(e.to_string())),
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.profiles.is_empty() {
            return Err(Error::NoProfiles);
        }
        for (id, profile) in &self.profiles {
            profile.validate().map_err(|source| Error::Profile {
                profile: id.clone(),
                source,
            })?;
        }
        if let Some(default) = &self.default_profile {
            if !self.profiles.contains_key(default) {
                return Err(Error::UnknownDefaultProfile(default.clone()));
            }
        }
        if self.queue.batch_size == 0 {
            return Err(Error::ZeroBatchSize);
        }
        self.linking.compile_listing_rules()?;
        Ok(())
    }

    /// Explicit profile, else the configured default, else the first one.
    pub fn profile_id<'a>(&'a self, requested: Option<&'a str>) -> Option<&'a str> {
        requested
            .or(self.default_profile.as_deref())
            .or_else(|| self.profiles.keys().next().map(String::as_str))
    }

    pub fn load_catalog(&self) -> Result<Option<Catalog>, Error> {
        let Some(path) = &self.catalog else {
            return Ok(None);
        };
        let body = read(path)?;
        serde_yaml::from_str(&body)
            .map(Some)
            .map_err(|error| Error::Parse {
                path: path.clone(),
                message: error.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
profiles:
  content:
    name: Content DB
    connection:
      url: "sqlite::memory:"
    tables:
      articles: articles
    field_mappings:
      title: post_title
cms:
  base_url: http://localhost:3000
queue:
  batch_size: 4
  on_existing: skip
"#;

    #[test]
    fn yaml_with_defaults() {
        let config = Config::parse(YAML, Path::new("migrate.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.storage.dir, PathBuf::from(".article-migrate"));
        assert_eq!(config.queue.batch_size, 4);
        assert_eq!(config.queue.max_retries, 3);
        assert_eq!(config.converter.fallback_chars, 1000);
        assert_eq!(config.profile_id(None), Some("content"));
        assert_eq!(config.profile_id(Some("other")), Some("other"));
        assert!(config.load_catalog().unwrap().is_none());
    }

    #[test]
    fn toml_by_extension() {
        let body = r#"
[profiles.content]
name = "Content DB"
connection = { url = "sqlite::memory:" }
tables = { articles = "articles" }

[cms]
base_url = "http://localhost:3000"
local_db = "sqlite::memory:"
"#;
        let config = Config::parse(body, Path::new("migrate.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.cms.local_db.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn validation_failures() {
        let base = Config::parse(YAML, Path::new("migrate.yaml")).unwrap();

        let mut config = base.clone();
        config.profiles.clear();
        assert!(matches!(config.validate(), Err(Error::NoProfiles)));

        let mut config = base.clone();
        config.default_profile = Some("missing".into());
        assert!(matches!(config.validate(), Err(Error::UnknownDefaultProfile(_))));

        let mut config = base.clone();
        config.queue.batch_size = 0;
        assert!(matches!(config.validate(), Err(Error::ZeroBatchSize)));

        let mut config = base.clone();
        config.linking.listing_rules.push("(".into());
        assert!(matches!(config.validate(), Err(Error::ListingRule(_))));

        let mut config = base;
        config.profiles["content"].tables.articles = "articles; drop".into();
        assert!(matches!(config.validate(), Err(Error::Profile { .. })));
    }

    #[test]
    fn catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.yaml");
        std::fs::write(
            &path,
            r#"
- id: driver-x
  display_name: Driver X
  anchor_phrases: [Driver X]
  target_url: https://shop.example/driver-x
"#,
        )
        .unwrap();
        let mut config = Config::parse(YAML, Path::new("migrate.yaml")).unwrap();
        config.catalog = Some(path);
        let catalog = config.load_catalog().unwrap().unwrap();
        assert_eq!(catalog.entries.len(), 1);
        assert!(catalog.entries[0].active);
    }
}
