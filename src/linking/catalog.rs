use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryKind {
    #[default]
    Affiliate,
    Internal { doc_id: Value, relation_to: String },
}

fn yes() -> bool {
    true
}

/// One linkable target and the phrases that may link to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub id: String,
    pub display_name: String,
    pub anchor_phrases: Vec<String>,
    pub target_url: String,
    #[serde(default = "yes")]
    pub active: bool,
    #[serde(default)]
    pub kind: EntryKind,
}

impl CatalogEntry {
    pub fn affiliate(
        id: impl Into<String>,
        display_name: impl Into<String>,
        anchor_phrases: Vec<String>,
        target_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            anchor_phrases,
            target_url: target_url.into(),
            active: true,
            kind: EntryKind::Affiliate,
        }
    }
}

/// Entries in priority order; earlier entries win ties.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Catalog {
    pub entries: Vec<CatalogEntry>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimilarPost {
    pub id: String,
    pub slug: String,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PostSimilarities {
    pub slug: String,
    pub similar: Vec<SimilarPost>,
}

/// Precomputed post-to-post similarity scores.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SimilarityMatrix {
    pub threshold: f64,
    pub similarities: HashMap<String, PostSimilarities>,
}

/// Linkable post as listed in the post index.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostIndexEntry {
    pub id: String,
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub anchor_phrases: Vec<String>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub fn active(&self) -> impl Iterator<Item = (usize, &CatalogEntry)> {
        self.entries.iter().enumerate().filter(|(_, entry)| entry.active)
    }

    /// Internal-link entries for `post_id`: similar posts at or above the
    /// matrix threshold, best first, never the post itself.
    pub fn internal_from_similarity(
        post_id: &str,
        matrix: &SimilarityMatrix,
        posts: &[PostIndexEntry],
        limit: usize,
    ) -> Self {
        let Some(own) = matrix.similarities.get(post_id) else {
            return Self::default();
        };
        let mut similar = own
            .similar
            .iter()
            .filter(|candidate| candidate.id != post_id && candidate.score >= matrix.threshold)
            .collect::<Vec<_>>();
        similar.sort_by(|a, b| b.score.total_cmp(&a.score));
        let entries = similar
            .into_iter()
            .filter_map(|candidate| {
                let post = posts.iter().find(|post| post.id == candidate.id)?;
                let mut phrases = post.anchor_phrases.clone();
                if phrases.is_empty() {
                    phrases.push(post.title.clone());
                }
                let doc_id = candidate
                    .id
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or_else(|_| Value::from(candidate.id.clone()));
                Some(CatalogEntry {
                    id: candidate.id.clone(),
                    display_name: post.title.clone(),
                    anchor_phrases: phrases,
                    target_url: format!("/posts/{}", candidate.slug),
                    active: true,
                    kind: EntryKind::Internal {
                        doc_id,
                        relation_to: "posts".into(),
                    },
                })
            })
            .take(limit)
            .collect();
        Self { entries }
    }
}
