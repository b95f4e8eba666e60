use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use sqlx::{Column as _, Row as _, TypeInfo as _, ValueRef as _, sqlite::SqliteRow};
use tracing::debug;

use crate::source::{
    Error,
    profile::{GenericField, SourceProfile},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArticleId {
    Int(i64),
    Text(String),
}

impl fmt::Display for ArticleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(id) => write!(f, "{id}"),
            Self::Text(id) => f.write_str(id),
        }
    }
}

impl From<i64> for ArticleId {
    fn from(id: i64) -> Self {
        Self::Int(id)
    }
}

impl From<&str> for ArticleId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_string())
    }
}

/// A source row normalized to generic field names. Columns that are not
/// mapped to a generic field are kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericArticle {
    pub id: ArticleId,
    #[serde(default)]
    pub site_id: Option<ArticleId>,
    #[serde(default, deserialize_with = "string_or_default")]
    pub language: String,
    #[serde(default, deserialize_with = "string_or_default")]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_default")]
    pub content: String,
    #[serde(default)]
    pub meta_description: Option<String>,
    #[serde(default)]
    pub keywords: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "tag_list")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub featured_image_url: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default, deserialize_with = "flexible_date")]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_date")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "flexible_date")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: IndexMap<String, Value>,
}

fn string_or_default<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    })
}

fn tag_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(parse_tags(&Value::deserialize(deserializer)?))
}

fn flexible_date<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(parse_date(&Value::deserialize(deserializer)?))
}

/// Tags come either as a JSON array (possibly serialized into a string) or
/// as a comma separated list.
pub fn parse_tags(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|tag| !tag.is_empty())
            .collect(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ Value::Array(_)) => parse_tags(&parsed),
            _ => s
                .split(',')
                .map(str::trim)
                .filter(|tag| !tag.is_empty())
                .map(String::from)
                .collect(),
        },
        _ => Vec::new(),
    }
}

pub fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            DateTime::parse_from_rfc3339(s)
                .or_else(|_| DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z"))
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
                        .ok()
                        .map(|dt| dt.and_utc())
                })
                .or_else(|| {
                    NaiveDate::parse_from_str(s, "%Y-%m-%d")
                        .ok()
                        .and_then(|d| d.and_hms_opt(0, 0, 0))
                        .map(|dt| dt.and_utc())
                })
                .or_else(|| {
                    s.parse::<i64>()
                        .ok()
                        .and_then(|secs| DateTime::from_timestamp(secs, 0))
                })
                .or_else(|| {
                    debug!(value = s, "unrecognized date format");
                    None
                })
        }
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    }
}

/// Decode one column by its runtime storage class.
pub(crate) fn decode_column(row: &SqliteRow, index: usize) -> Result<Value, Error> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let class = raw.type_info().name().to_string();
    let decoded = match class.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get_unchecked::<i64, _>(index).map(Value::from),
        "REAL" | "NUMERIC" => row.try_get_unchecked::<f64, _>(index).map(Value::from),
        "BLOB" => {
            debug!(column = row.column(index).name(), "skipping blob column");
            return Ok(Value::Null);
        }
        _ => row.try_get_unchecked::<String, _>(index).map(Value::from),
    };
    decoded.map_err(|error| Error::Decode {
        column: row.column(index).name().to_string(),
        message: error.to_string(),
    })
}

impl GenericArticle {
    /// Normalize one row given as column name to value.
    pub fn from_columns(columns: Map<String, Value>, profile: &SourceProfile) -> Result<Self, Error> {
        let mut mapped = Map::new();
        let mut passthrough = Map::new();
        for (column, value) in columns {
            match profile.generic_for(&column) {
                Some(field) => {
                    mapped.insert(field.as_str().to_string(), value);
                }
                None => {
                    passthrough.insert(column, value);
                }
            }
        }
        for (key, value) in passthrough {
            mapped.entry(key).or_insert(value);
        }
        serde_json::from_value(Value::Object(mapped)).map_err(|error| Error::Decode {
            column: profile.column(GenericField::Id).to_string(),
            message: error.to_string(),
        })
    }

    /// Field value by generic name, falling back to passthrough columns.
    pub fn field(&self, name: &str) -> Value {
        match name {
            "id" => serde_json::to_value(&self.id).unwrap_or_default(),
            "site_id" | "website_id" => serde_json::to_value(&self.site_id).unwrap_or_default(),
            "language" => self.language.clone().into(),
            "title" => self.title.clone().into(),
            "content" => self.content.clone().into(),
            "meta_description" => self.meta_description.clone().into(),
            "keywords" => self.keywords.clone().into(),
            "category" => self.category.clone().into(),
            "tags" => self.tags.clone().into(),
            "author" => self.author.clone().into(),
            "status" => self.status.clone().into(),
            "featured_image_url" | "featured_image" => self.featured_image_url.clone().into(),
            "slug" => self.slug.clone().into(),
            "published_at" => self.published_at.map(|d| d.to_rfc3339()).into(),
            "created_at" => self.created_at.map(|d| d.to_rfc3339()).into(),
            "updated_at" => self.updated_at.map(|d| d.to_rfc3339()).into(),
            other => self.extra.get(other).cloned().unwrap_or_default(),
        }
    }

    pub fn has_featured_image(&self) -> bool {
        self.featured_image_url
            .as_deref()
            .is_some_and(|url| !url.trim().is_empty())
    }

    /// Featured image or a markdown/html image in the body.
    pub fn has_images(&self) -> bool {
        self.has_featured_image()
            || self.content.contains("![")
            || self.content.contains("<img")
    }

    /// Title, description and keywords are all present.
    pub fn has_seo(&self) -> bool {
        let present = |s: Option<&str>| s.is_some_and(|s| !s.trim().is_empty());
        present(Some(&self.title))
            && present(self.meta_description.as_deref())
            && present(self.keywords.as_deref())
    }

    /// Whitespace-delimited tokens after stripping markup.
    pub fn word_count(&self) -> usize {
        word_count(&self.content)
    }
}

pub fn word_count(content: &str) -> usize {
    use std::sync::LazyLock;

    use regex::Regex;

    static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
    static MARKUP: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[#*_`>\[\]()!~|-]").unwrap());
    let stripped = TAG.replace_all(content, " ");
    let stripped = MARKUP.replace_all(&stripped, " ");
    stripped.split_whitespace().count()
}
