use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::source::{
    Error, SourceRegistry,
    article::parse_date,
    profile::{GenericField, quote_identifier},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteCount {
    pub site_id: Value,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LanguageCount {
    pub language: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceStats {
    pub total: i64,
    pub by_site: Vec<SiteCount>,
    pub by_language: Vec<LanguageCount>,
    pub top_categories: Vec<CategoryCount>,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterOptions {
    pub categories: Vec<String>,
    pub authors: Vec<String>,
    pub languages: Vec<String>,
    pub statuses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionDetails {
    pub table: String,
    pub columns: Vec<ColumnInfo>,
    pub server_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<ConnectionDetails>,
}

impl ConnectionReport {
    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }
}

/// Text of a grouped value as JSON; integer-looking values become numbers.
fn group_value(text: Option<String>) -> Value {
    match text {
        Some(text) => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text)),
        None => Value::Null,
    }
}

impl SourceRegistry {
    /// Aggregates computed by the database; rows are never loaded.
    pub async fn stats(&self, id: &str) -> Result<SourceStats, Error> {
        let profile = self.profile(id)?;
        let pool = self.pool(id).await?;
        let table = profile.quoted_table()?;
        let site = profile.quoted(GenericField::SiteId)?;
        let language = profile.quoted(GenericField::Language)?;
        let category = profile.quoted(GenericField::Category)?;
        let created = profile.quoted(GenericField::CreatedAt)?;

        let (total,): (i64,) = pool
            .fetch_one(&format!("SELECT COUNT(*) FROM {table}"), None)
            .await?;

        let by_site = pool
            .fetch_all::<(Option<String>, i64)>(
                &format!(
                    "SELECT CAST({site} AS TEXT) AS site_id, COUNT(*) AS count FROM {table} \
                     GROUP BY {site} ORDER BY count DESC"
                ),
                None,
            )
            .await?
            .into_iter()
            .map(|(site_id, count)| SiteCount {
                site_id: group_value(site_id),
                count,
            })
            .collect();

        let by_language = pool
            .fetch_all::<(String, i64)>(
                &format!(
                    "SELECT CAST({language} AS TEXT) AS language, COUNT(*) AS count FROM {table} \
                     WHERE {language} IS NOT NULL GROUP BY {language} ORDER BY count DESC"
                ),
                None,
            )
            .await?
            .into_iter()
            .map(|(language, count)| LanguageCount { language, count })
            .collect();

        let top_categories = pool
            .fetch_all::<(String, i64)>(
                &format!(
                    "SELECT CAST({category} AS TEXT) AS category, COUNT(*) AS count FROM {table} \
                     WHERE {category} IS NOT NULL GROUP BY {category} ORDER BY count DESC LIMIT 10"
                ),
                None,
            )
            .await?
            .into_iter()
            .map(|(category, count)| CategoryCount { category, count })
            .collect();

        let (oldest, newest): (Option<String>, Option<String>) = pool
            .fetch_one(
                &format!(
                    "SELECT CAST(MIN({created}) AS TEXT) AS oldest, \
                     CAST(MAX({created}) AS TEXT) AS newest FROM {table}"
                ),
                None,
            )
            .await?;
        let date = |text: Option<String>| text.and_then(|text| parse_date(&Value::String(text)));

        Ok(SourceStats {
            total,
            by_site,
            by_language,
            top_categories,
            oldest: date(oldest),
            newest: date(newest),
        })
    }

    /// Distinct non-null values for the filterable fields.
    pub async fn filter_options(&self, id: &str) -> Result<FilterOptions, Error> {
        let profile = self.profile(id)?;
        let pool = self.pool(id).await?;
        let table = profile.quoted_table()?;
        let mut options = FilterOptions::default();
        for (field, target) in [
            (GenericField::Category, &mut options.categories),
            (GenericField::Author, &mut options.authors),
            (GenericField::Language, &mut options.languages),
            (GenericField::Status, &mut options.statuses),
        ] {
            let column = profile.quoted(field)?;
            *target = pool
                .fetch_all::<(String,)>(
                    &format!(
                        "SELECT DISTINCT CAST({column} AS TEXT) AS value FROM {table} \
                         WHERE {column} IS NOT NULL AND CAST({column} AS TEXT) != '' ORDER BY value"
                    ),
                    None,
                )
                .await?
                .into_iter()
                .map(|(value,)| value)
                .collect();
        }
        Ok(options)
    }

    /// Check reachability and the articles table. Failures are reported in
    /// the returned value, never as an error.
    pub async fn test_connection(&self, id: &str) -> ConnectionReport {
        let profile = match self.profile(id) {
            Ok(profile) => profile,
            Err(error) => return ConnectionReport::failure(error.to_string()),
        };
        match self.inspect(id).await {
            Ok(Some(details)) => {
                info!(profile = id, table = details.table, "connection ok");
                ConnectionReport {
                    success: true,
                    message: format!("Connected to '{}' successfully", profile.name),
                    details: Some(details),
                }
            }
            Ok(None) => ConnectionReport::failure(format!(
                "Table '{}' not found in database",
                profile.tables.articles
            )),
            Err(error) => {
                warn!(%error, profile = id, "connection test failed");
                ConnectionReport::failure(format!("Connection failed: {error}"))
            }
        }
    }

    async fn inspect(&self, id: &str) -> Result<Option<ConnectionDetails>, Error> {
        let profile = self.profile(id)?;
        let pool = self.pool(id).await?;
        let dialect = pool.dialect();
        let (server_time,): (String,) = pool.fetch_one(dialect.now(), None).await?;
        let table = &profile.tables.articles;
        quote_identifier(table)?;
        let (exists,): (i64,) = pool.fetch_one(dialect.table_exists(), Some(table.as_str())).await?;
        if exists == 0 {
            return Ok(None);
        }
        let columns = pool
            .fetch_all::<(String, String)>(dialect.table_columns(), Some(table.as_str()))
            .await?
            .into_iter()
            .map(|(name, data_type)| ColumnInfo { name, data_type })
            .collect();
        Ok(Some(ConnectionDetails {
            table: table.clone(),
            columns,
            server_time,
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn grouped_values_keep_numbers() {
        assert_eq!(group_value(Some("12".into())), json!(12));
        assert_eq!(group_value(Some("blog".into())), json!("blog"));
        assert_eq!(group_value(None), Value::Null);
    }
}
