//! Mapping of source articles onto CMS documents.
//!
//! Every imported document carries a natural key
//! (`contentdb_<siteId>_<articleId>` under `sourceMeta.originalId`) so that
//! re-importing the same source row updates instead of duplicating.

use std::collections::HashMap;

use itertools::Itertools as _;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use crate::{
    cms::{Cms, CmsDocument, FindQuery},
    queue::MigrationConfig,
    rich_text::Document,
    source::{ArticleId, GenericArticle},
};

pub const NATURAL_KEY_PATH: &str = "sourceMeta.originalId";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("CMS request failed: {0}")]
    Cms(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Failed to serialize document: {0}")]
    Serialize(#[from] serde_json::Error),
}

fn cms_error<E: std::error::Error + Send + Sync + 'static>(error: E) -> Error {
    error!(%error, "CMS request failed");
    Error::Cms(Box::new(error))
}

/// What to do when the natural key (or slug) already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnExisting {
    #[default]
    Update,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStatus {
    Draft,
    Published,
}

impl PublishStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadResult {
    pub success: bool,
    pub article_id: ArticleId,
    #[serde(default)]
    pub cms_id: Option<String>,
    pub title: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub skipped: bool,
}

impl UploadResult {
    pub fn failed(article: &GenericArticle, error: impl ToString) -> Self {
        Self {
            success: false,
            article_id: article.id.clone(),
            cms_id: None,
            title: article.title.clone(),
            error: Some(error.to_string()),
            skipped: false,
        }
    }
}

/// An unmapped status is published only when it literally says so.
pub fn map_status(
    status: Option<&str>,
    mapping: Option<&HashMap<String, PublishStatus>>,
) -> PublishStatus {
    let Some(status) = status.filter(|s| !s.is_empty()) else {
        return PublishStatus::Draft;
    };
    if let Some(mapped) = mapping.and_then(|mapping| mapping.get(status)) {
        return *mapped;
    }
    match status {
        "published" | "publish" => PublishStatus::Published,
        _ => PublishStatus::Draft,
    }
}

pub fn language_code(language: &str) -> &str {
    match language {
        "japanese" => "ja",
        "english" => "en",
        other => other,
    }
}

/// Lowercased alphanumeric runs joined by `-`. Non-ASCII letters are kept.
pub fn slugify(text: &str) -> String {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .join("-")
}

pub struct ArticleUploader<'a, C> {
    cms: &'a C,
    config: &'a MigrationConfig,
    on_existing: OnExisting,
}

impl<'a, C: Cms> ArticleUploader<'a, C> {
    pub fn new(cms: &'a C, config: &'a MigrationConfig, on_existing: OnExisting) -> Self {
        Self {
            cms,
            config,
            on_existing,
        }
    }

    pub fn natural_key(&self, article: &GenericArticle) -> String {
        format!("contentdb_{}_{}", self.config.site_id, article.id)
    }

    fn slug(article: &GenericArticle) -> String {
        article
            .slug
            .clone()
            .filter(|slug| !slug.is_empty())
            .unwrap_or_else(|| slugify(&article.title))
    }

    /// Look the article up by natural key, then by slug.
    pub async fn find_existing(
        &self,
        article: &GenericArticle,
    ) -> Result<Option<CmsDocument>, Error> {
        let collection = &self.config.collection_name;
        let by_key = self
            .cms
            .find(
                collection,
                &FindQuery::equals(NATURAL_KEY_PATH, self.natural_key(article)).limit(1),
            )
            .await
            .map_err(cms_error)?;
        if let Some(doc) = by_key.first() {
            return Ok(Some(doc));
        }
        let Some(slug) = article.slug.as_deref().filter(|slug| !slug.is_empty()) else {
            return Ok(None);
        };
        let by_slug = self
            .cms
            .find(collection, &FindQuery::equals("slug", slug).limit(1))
            .await
            .map_err(cms_error)?;
        Ok(by_slug.first())
    }

    async fn lookup(&self, collection: &str, path: &str, value: &str) -> Result<Option<String>, Error> {
        let found = self
            .cms
            .find(collection, &FindQuery::equals(path, value).limit(1))
            .await
            .map_err(cms_error)?;
        Ok(found.first().map(|doc| doc.id))
    }

    async fn tag_ids(&self, tags: &[String]) -> Result<Vec<String>, Error> {
        let mut ids = Vec::with_capacity(tags.len());
        for name in tags {
            if let Some(id) = self.lookup("tags", "name", name).await? {
                ids.push(id);
                continue;
            }
            let created = self
                .cms
                .create("tags", json!({ "name": name, "slug": slugify(name) }))
                .await
                .map_err(cms_error)?;
            debug!(tag = name, id = created.id, "created tag");
            ids.push(created.id);
        }
        Ok(ids)
    }

    /// Build the document body for `article` with `content` as its tree.
    pub async fn prepare(
        &self,
        article: &GenericArticle,
        content: &Document,
    ) -> Result<Value, Error> {
        let config = self.config;
        let status = map_status(article.status.as_deref(), config.status_mapping.as_ref());
        let excerpt = match article.meta_description.as_deref() {
            Some(description) if !description.is_empty() => {
                let mut excerpt = Document::plain(description);
                excerpt.set_direction(None);
                serde_json::to_value(excerpt)?
            }
            _ => Value::Null,
        };
        let published_at = article.published_at.or(article.created_at);

        let mut doc = Map::new();
        doc.insert("title".into(), article.title.clone().into());
        doc.insert("content".into(), serde_json::to_value(content)?);
        doc.insert("slug".into(), Self::slug(article).into());
        doc.insert("language".into(), language_code(&config.language).into());
        doc.insert("excerpt".into(), excerpt);
        doc.insert(
            "meta".into(),
            json!({
                "title": article.title,
                "description": article.meta_description.clone().unwrap_or_default(),
                "keywords": article.keywords.clone().unwrap_or_default(),
            }),
        );
        doc.insert(
            "publishedAt".into(),
            published_at.map(|date| date.to_rfc3339()).into(),
        );
        doc.insert("_status".into(), status.as_str().into());

        let mapped_category = article
            .category
            .as_ref()
            .and_then(|category| config.category_mapping.as_ref()?.get(category));
        if let Some(slug) = mapped_category {
            match self.lookup("categories", "slug", slug).await? {
                Some(id) => {
                    doc.insert("categories".into(), json!([id]));
                }
                None => debug!(category = slug, "mapped category does not exist"),
            }
        }

        let mapped_author = article
            .author
            .as_ref()
            .and_then(|author| config.author_mapping.as_ref()?.get(author));
        if let Some(email) = mapped_author {
            if let Some(id) = self.lookup("users", "email", email).await? {
                doc.insert("author".into(), id.into());
            }
        }

        if !article.tags.is_empty() {
            doc.insert("tags".into(), self.tag_ids(&article.tags).await?.into());
        }

        doc.insert(
            "sourceMeta".into(),
            json!({
                "originalId": self.natural_key(article),
                "siteId": config.site_id,
                "language": config.language,
                "originalAuthor": article.author.clone().unwrap_or_default(),
                "originalDate": article.created_at.map(|date| date.to_rfc3339()),
                "modifiedDate": article.updated_at.or(article.created_at).map(|date| date.to_rfc3339()),
                "importedAt": chrono::Utc::now().to_rfc3339(),
            }),
        );
        Ok(Value::Object(doc))
    }

    /// Create the document, or update/skip an existing one. A write the
    /// CMS refuses comes back as a failed result; lookups still error.
    pub async fn upload(
        &self,
        article: &GenericArticle,
        content: &Document,
    ) -> Result<UploadResult, Error> {
        let collection = &self.config.collection_name;
        let existing = self.find_existing(article).await?;
        let result = |cms_id: String, skipped: bool| UploadResult {
            success: true,
            article_id: article.id.clone(),
            cms_id: Some(cms_id),
            title: article.title.clone(),
            error: None,
            skipped,
        };
        match existing {
            Some(doc) if self.on_existing == OnExisting::Skip => {
                debug!(article = %article.id, cms_id = doc.id, "already imported, skipping");
                Ok(result(doc.id, true))
            }
            Some(doc) => {
                let data = self.prepare(article, content).await?;
                match self.cms.update(collection, &doc.id, data).await {
                    Ok(updated) => {
                        debug!(article = %article.id, cms_id = updated.id, "updated");
                        Ok(result(updated.id, false))
                    }
                    Err(error) => {
                        warn!(%error, article = %article.id, cms_id = doc.id, "CMS rejected update");
                        Ok(UploadResult::failed(article, error))
                    }
                }
            }
            None => {
                let data = self.prepare(article, content).await?;
                match self.cms.create(collection, data).await {
                    Ok(created) => {
                        debug!(article = %article.id, cms_id = created.id, "created");
                        Ok(result(created.id, false))
                    }
                    Err(error) => {
                        warn!(%error, article = %article.id, "CMS rejected document");
                        Ok(UploadResult::failed(article, error))
                    }
                }
            }
        }
    }
}
