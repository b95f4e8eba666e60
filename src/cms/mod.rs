//! CMS persistence collaborator.
//!
//! The importer only needs a handful of collection operations. [`local`]
//! keeps documents in sqlite (tests, dry runs); [`http`] talks to a
//! Payload-style REST API.

use std::future::Future;

use derive_debug::Dbg;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

pub mod http;
pub mod local;
pub mod upload;

/// A stored document. Ids are normalized to strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmsDocument {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(id) => Ok(id),
        Value::Number(id) => Ok(id.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "document id must be a string or number, got {other}"
        ))),
    }
}

/// Conjunction of equality conditions on dotted field paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    pub conditions: Vec<(String, Value)>,
    pub limit: Option<u32>,
}

impl FindQuery {
    pub fn equals(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            conditions: vec![(path.into(), value.into())],
            limit: None,
        }
    }

    pub fn and(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((path.into(), value.into()));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResult {
    pub docs: Vec<CmsDocument>,
    pub total_docs: u64,
}

impl FindResult {
    pub fn first(self) -> Option<CmsDocument> {
        self.docs.into_iter().next()
    }
}

#[derive(Dbg, Clone)]
pub struct MediaUpload {
    pub filename: String,
    pub content_type: String,
    #[dbg(skip)]
    pub bytes: bytes::Bytes,
    pub alt: String,
}

pub trait Cms {
    type Error: std::error::Error + Send + Sync + 'static;

    fn find(
        &self,
        collection: &str,
        query: &FindQuery,
    ) -> impl Future<Output = Result<FindResult, Self::Error>>;

    fn create(
        &self,
        collection: &str,
        data: Value,
    ) -> impl Future<Output = Result<CmsDocument, Self::Error>>;

    fn update(
        &self,
        collection: &str,
        id: &str,
        data: Value,
    ) -> impl Future<Output = Result<CmsDocument, Self::Error>>;

    fn find_by_id(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<CmsDocument>, Self::Error>>;

    fn upload_media(
        &self,
        upload: MediaUpload,
    ) -> impl Future<Output = Result<CmsDocument, Self::Error>>;
}
