use std::{fmt, str::FromStr, sync::LazyLock};

use derive_debug::Dbg;
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgConnectOptions, sqlite::SqliteConnectOptions};

use crate::source::{Error, pool::Dialect};

/// Attribute names every source is addressed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericField {
    Id,
    #[serde(alias = "website_id")]
    SiteId,
    Language,
    Title,
    Content,
    MetaDescription,
    Keywords,
    Category,
    Tags,
    Author,
    Status,
    #[serde(alias = "featured_image")]
    FeaturedImageUrl,
    Slug,
    PublishedAt,
    CreatedAt,
    UpdatedAt,
}

impl GenericField {
    pub const ALL: [GenericField; 16] = [
        Self::Id,
        Self::SiteId,
        Self::Language,
        Self::Title,
        Self::Content,
        Self::MetaDescription,
        Self::Keywords,
        Self::Category,
        Self::Tags,
        Self::Author,
        Self::Status,
        Self::FeaturedImageUrl,
        Self::Slug,
        Self::PublishedAt,
        Self::CreatedAt,
        Self::UpdatedAt,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::SiteId => "site_id",
            Self::Language => "language",
            Self::Title => "title",
            Self::Content => "content",
            Self::MetaDescription => "meta_description",
            Self::Keywords => "keywords",
            Self::Category => "category",
            Self::Tags => "tags",
            Self::Author => "author",
            Self::Status => "status",
            Self::FeaturedImageUrl => "featured_image_url",
            Self::Slug => "slug",
            Self::PublishedAt => "published_at",
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
        }
    }

    /// Column used when a profile does not map the field explicitly.
    pub fn default_column(self) -> &'static str {
        match self {
            Self::Keywords => "primary_keyword",
            Self::Tags => "target_keywords",
            Self::Slug => "url_slug",
            other => other.as_str(),
        }
    }

    pub fn is_date(self) -> bool {
        matches!(self, Self::PublishedAt | Self::CreatedAt | Self::UpdatedAt)
    }
}

impl fmt::Display for GenericField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenericField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "website_id" => return Ok(Self::SiteId),
            "featured_image" => return Ok(Self::FeaturedImageUrl),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| Error::UnmappedField(s.to_string()))
    }
}

fn default_max_connections() -> u32 {
    5
}

/// Either a sqlx url (`sqlite://content.db`, `postgres://user@host/db`)
/// or PostgreSQL connection parameters.
#[derive(Dbg, Clone, Default, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default, skip_serializing)]
    #[dbg(skip)]
    pub password: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Connection {
    pub fn dialect(&self) -> Result<Dialect, Error> {
        match self.url.as_deref() {
            Some(url) if url.starts_with("postgres://") || url.starts_with("postgresql://") => {
                Ok(Dialect::Postgres)
            }
            Some(url) if url.starts_with("sqlite:") => Ok(Dialect::Sqlite),
            Some(url) => Err(Error::InvalidConnection(format!(
                "unsupported url scheme in '{}'",
                url.split(':').next().unwrap_or_default()
            ))),
            None if self.host.is_some() || self.database.is_some() => Ok(Dialect::Postgres),
            None => Err(Error::InvalidConnection(
                "either url or host/database is required".into(),
            )),
        }
    }

    pub fn sqlite_options(&self) -> Result<SqliteConnectOptions, Error> {
        let url = self.url.as_deref().unwrap_or_default();
        SqliteConnectOptions::from_str(url).map_err(|error| Error::InvalidConnection(error.to_string()))
    }

    /// Url first, then the individual parameters on top of it.
    pub fn postgres_options(&self) -> Result<PgConnectOptions, Error> {
        let mut options = match self.url.as_deref() {
            Some(url) => PgConnectOptions::from_str(url)
                .map_err(|error| Error::InvalidConnection(error.to_string()))?,
            None => PgConnectOptions::new_without_pgpass(),
        };
        if let Some(host) = &self.host {
            options = options.host(host);
        }
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        if let Some(user) = &self.user {
            options = options.username(user);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        Ok(options)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tables {
    pub articles: String,
    #[serde(default)]
    pub categories: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
    #[serde(default)]
    pub authors: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceProfile {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub connection: Connection,
    pub tables: Tables,
    #[serde(default)]
    pub field_mappings: IndexMap<GenericField, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
}

static IDENTIFIER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// Double-quote `ident` for SQL after checking it is a plain identifier.
pub fn quote_identifier(ident: &str) -> Result<String, Error> {
    if IDENTIFIER.is_match(ident) {
        Ok(format!("\"{ident}\""))
    } else {
        Err(Error::InvalidIdentifier(ident.to_string()))
    }
}

impl SourceProfile {
    pub fn column(&self, field: GenericField) -> &str {
        self.field_mappings
            .get(&field)
            .map(String::as_str)
            .unwrap_or_else(|| field.default_column())
    }

    /// Quoted column for `field`.
    pub fn quoted(&self, field: GenericField) -> Result<String, Error> {
        quote_identifier(self.column(field))
    }

    pub fn quoted_table(&self) -> Result<String, Error> {
        quote_identifier(&self.tables.articles)
    }

    /// Resolve a caller-supplied field name through the mapping.
    /// Anything that is not a generic field is rejected.
    pub fn resolve(&self, name: &str) -> Result<String, Error> {
        let field = name.parse::<GenericField>()?;
        self.quoted(field)
    }

    /// Generic field a source column maps to, if any.
    pub fn generic_for(&self, column: &str) -> Option<GenericField> {
        GenericField::ALL
            .into_iter()
            .find(|field| self.column(*field) == column)
    }

    pub fn validate(&self) -> Result<(), Error> {
        self.connection.dialect()?;
        quote_identifier(&self.tables.articles)?;
        for table in [&self.tables.categories, &self.tables.tags, &self.tables.authors]
            .into_iter()
            .flatten()
        {
            quote_identifier(table)?;
        }
        for field in GenericField::ALL {
            self.quoted(field)?;
        }
        Ok(())
    }
}
