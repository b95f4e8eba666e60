//! Keyword-to-link annotation of document trees.
//!
//! [`inject::LinkInjector`] rewrites matched phrases into link nodes;
//! [`cleanup`] holds the idempotent maintenance passes that undo or thin
//! out earlier injections.

use regex::Regex;
use serde::Deserialize;

pub mod catalog;
pub mod cleanup;
pub mod inject;

pub use catalog::{Catalog, CatalogEntry, EntryKind};
pub use inject::{Injection, LinkInjector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkLimits {
    pub max_links_per_document: usize,
    /// Counted per top-level block, so a whole list or table shares one
    /// budget. `None` front-loads links into the first matching blocks.
    pub max_links_per_block: Option<usize>,
}

fn default_marker() -> String {
    "🛒 ".into()
}

fn default_rel() -> String {
    "sponsored nofollow noopener".into()
}

fn default_max_links_per_document() -> usize {
    6
}

fn default_max_links_per_block() -> Option<usize> {
    Some(2)
}

fn yes() -> bool {
    true
}

/// Paragraph patterns produced by earlier product-box generators.
pub fn default_listing_rules() -> Vec<String> {
    [r"^▶", r"^価格\s*[:：]", r"^【[^】]*】$", r"詳細を見る\s*→\s*$"]
        .into_iter()
        .map(String::from)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkingOptions {
    /// Prefix of the visible text of affiliate links.
    #[serde(default = "default_marker")]
    pub marker: String,
    #[serde(default = "default_rel")]
    pub rel: String,
    #[serde(default = "default_max_links_per_document")]
    pub max_links_per_document: usize,
    #[serde(default = "default_max_links_per_block")]
    pub max_links_per_block: Option<usize>,
    /// Non-CJK phrases must not touch alphanumeric characters.
    #[serde(default = "yes")]
    pub word_boundaries: bool,
    #[serde(default = "default_listing_rules")]
    pub listing_rules: Vec<String>,
}

impl Default for LinkingOptions {
    fn default() -> Self {
        Self {
            marker: default_marker(),
            rel: default_rel(),
            max_links_per_document: default_max_links_per_document(),
            max_links_per_block: default_max_links_per_block(),
            word_boundaries: true,
            listing_rules: default_listing_rules(),
        }
    }
}

impl LinkingOptions {
    pub fn limits(&self) -> LinkLimits {
        LinkLimits {
            max_links_per_document: self.max_links_per_document,
            max_links_per_block: self.max_links_per_block,
        }
    }

    pub fn compile_listing_rules(&self) -> Result<Vec<Regex>, regex::Error> {
        self.listing_rules.iter().map(|rule| Regex::new(rule)).collect()
    }
}
