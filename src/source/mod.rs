//! Field-mapped access to article tables.
//!
//! A [`SourceProfile`](profile::SourceProfile) names the table and maps
//! [`GenericField`](profile::GenericField)s to its columns, so one query
//! engine can read differently shaped article tables. Profiles point at
//! SQLite or PostgreSQL. Pools are opened lazily, one per profile, and kept
//! until [`SourceRegistry::close_all`].

use std::collections::HashMap;

use indexmap::IndexMap;
use sqlx::{Postgres, Sqlite, pool::PoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

pub mod article;
pub mod pool;
pub mod profile;
pub mod query;
pub mod stats;

pub use article::{ArticleId, GenericArticle};
pub use pool::{Dialect, SourcePool};
pub use profile::{GenericField, ProfileSummary, SourceProfile};
pub use query::ArticleQuery;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Source profile '{0}' not found")]
    ProfileNotFound(String),
    #[error("Field '{0}' does not resolve through the field mapping")]
    UnmappedField(String),
    #[error("Invalid SQL identifier: {0:?}")]
    InvalidIdentifier(String),
    #[error("Invalid connection settings: {0}")]
    InvalidConnection(String),
    #[error("Failed to connect to profile '{profile}': {source}")]
    Connect {
        profile: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("Query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("Failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

pub struct SourceRegistry {
    profiles: IndexMap<String, SourceProfile>,
    pools: Mutex<HashMap<String, SourcePool>>,
}

impl SourceRegistry {
    pub fn new(profiles: IndexMap<String, SourceProfile>) -> Result<Self, Error> {
        for profile in profiles.values() {
            profile.validate()?;
        }
        Ok(Self {
            profiles,
            pools: Mutex::new(HashMap::new()),
        })
    }

    pub fn list_profiles(&self) -> Vec<ProfileSummary> {
        self.profiles
            .iter()
            .map(|(id, profile)| ProfileSummary {
                id: id.clone(),
                name: profile.name.clone(),
                description: profile.description.clone(),
            })
            .collect()
    }

    pub fn profile(&self, id: &str) -> Result<&SourceProfile, Error> {
        self.profiles
            .get(id)
            .ok_or_else(|| Error::ProfileNotFound(id.to_string()))
    }

    /// Pool for `id`, connecting on first use.
    pub async fn pool(&self, id: &str) -> Result<SourcePool, Error> {
        let profile = self.profile(id)?;
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(id) {
            return Ok(pool.clone());
        }
        let connection = &profile.connection;
        let connect_error = |source| Error::Connect {
            profile: id.to_string(),
            source,
        };
        let max_connections = connection.max_connections.max(1);
        let pool = match connection
            .dialect()
            .inspect_err(|error| error!(%error, profile = id, "Invalid source connection"))?
        {
            Dialect::Sqlite => SourcePool::Sqlite(
                PoolOptions::<Sqlite>::new()
                    .max_connections(max_connections)
                    .connect_with(connection.sqlite_options()?)
                    .await
                    .inspect_err(|error| error!(%error, profile = id, "Failed to connect to source"))
                    .map_err(connect_error)?,
            ),
            Dialect::Postgres => SourcePool::Postgres(
                PoolOptions::<Postgres>::new()
                    .max_connections(max_connections)
                    .connect_with(connection.postgres_options()?)
                    .await
                    .inspect_err(|error| error!(%error, profile = id, "Failed to connect to source"))
                    .map_err(connect_error)?,
            ),
        };
        debug!(profile = id, dialect = ?pool.dialect(), "opened source pool");
        pools.insert(id.to_string(), pool.clone());
        Ok(pool)
    }

    pub async fn query(&self, id: &str, query: &ArticleQuery) -> Result<Vec<GenericArticle>, Error> {
        let profile = self.profile(id)?;
        let dialect = profile.connection.dialect()?;
        let rows = match dialect {
            Dialect::Sqlite => {
                let mut builder = query.build::<Sqlite>(profile, dialect)?;
                let SourcePool::Sqlite(pool) = self.pool(id).await? else {
                    return Err(Error::InvalidConnection(format!("{id} is not a SQLite source")));
                };
                builder
                    .build()
                    .fetch_all(&pool)
                    .await
                    .inspect_err(|error| error!(%error, profile = id, "Article query failed"))?
                    .iter()
                    .map(pool::sqlite_columns)
                    .collect::<Result<Vec<_>, _>>()?
            }
            Dialect::Postgres => {
                let mut builder = query.build::<Postgres>(profile, dialect)?;
                let SourcePool::Postgres(pool) = self.pool(id).await? else {
                    return Err(Error::InvalidConnection(format!("{id} is not a PostgreSQL source")));
                };
                builder
                    .build()
                    .fetch_all(&pool)
                    .await
                    .inspect_err(|error| error!(%error, profile = id, "Article query failed"))?
                    .iter()
                    .map(pool::postgres_columns)
                    .collect::<Result<Vec<_>, _>>()?
            }
        };
        rows.into_iter()
            .map(|columns| GenericArticle::from_columns(columns, profile))
            .collect()
    }

    pub async fn close_all(&self) {
        let pools = std::mem::take(&mut *self.pools.lock().await);
        for (id, pool) in pools {
            pool.close().await;
            info!(profile = id, "closed source pool");
        }
    }
}
