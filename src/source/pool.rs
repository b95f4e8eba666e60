//! The two database kinds a profile can point at.

use serde_json::{Map, Value};
use sqlx::{
    Column as _, FromRow, PgPool, Postgres, Row as _, Sqlite, SqlitePool, postgres::PgRow,
    sqlite::SqliteRow, types::Json,
};

use crate::source::{Error, article::decode_column};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sqlite,
    Postgres,
}

/// Name of the column a PostgreSQL article query returns its row in.
pub const ROW_COLUMN: &str = "article_row";

impl Dialect {
    /// `SELECT ... FROM table`. PostgreSQL rows come back as one JSON
    /// object so every column type decodes the same way.
    pub fn select_articles(self, table: &str) -> String {
        match self {
            Self::Sqlite => format!("SELECT * FROM {table}"),
            Self::Postgres => {
                format!("SELECT row_to_json({ROW_COLUMN}) AS {ROW_COLUMN} FROM {table} AS {ROW_COLUMN}")
            }
        }
    }

    /// Text around an expression that makes it a comparable timestamp.
    pub fn timestamp_wrap(self) -> (&'static str, &'static str) {
        match self {
            Self::Sqlite => ("datetime(", ")"),
            Self::Postgres => ("CAST(", " AS TIMESTAMP)"),
        }
    }

    pub fn timestamp(self, expr: &str) -> String {
        let (open, close) = self.timestamp_wrap();
        format!("{open}{expr}{close}")
    }

    /// Offset without a limit.
    pub fn offset_only(self) -> &'static str {
        match self {
            Self::Sqlite => " LIMIT -1 OFFSET ",
            Self::Postgres => " OFFSET ",
        }
    }

    pub fn now(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT datetime('now')",
            Self::Postgres => "SELECT CAST(NOW() AS TEXT)",
        }
    }

    /// Count of tables or views named by the single bound parameter.
    pub fn table_exists(self) -> &'static str {
        match self {
            Self::Sqlite => {
                "SELECT COUNT(*) FROM sqlite_master WHERE type IN ('table', 'view') AND name = ?"
            }
            Self::Postgres => {
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = $1"
            }
        }
    }

    /// `(name, type)` of each column of the bound table, in table order.
    pub fn table_columns(self) -> &'static str {
        match self {
            Self::Sqlite => "SELECT name, type FROM pragma_table_info(?) ORDER BY cid",
            Self::Postgres => {
                "SELECT CAST(column_name AS TEXT) AS name, CAST(data_type AS TEXT) AS type \
                 FROM information_schema.columns \
                 WHERE table_schema = current_schema() AND table_name = $1 \
                 ORDER BY ordinal_position"
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourcePool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

impl SourcePool {
    pub fn dialect(&self) -> Dialect {
        match self {
            Self::Sqlite(_) => Dialect::Sqlite,
            Self::Postgres(_) => Dialect::Postgres,
        }
    }

    pub async fn close(&self) {
        match self {
            Self::Sqlite(pool) => pool.close().await,
            Self::Postgres(pool) => pool.close().await,
        }
    }

    /// Run `sql` with an optional single text parameter.
    pub async fn fetch_all<T>(&self, sql: &str, param: Option<&str>) -> Result<Vec<T>, sqlx::Error>
    where
        T: Send + Unpin + for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, PgRow>,
    {
        match self {
            Self::Sqlite(pool) => {
                let query = sqlx::query_as::<Sqlite, T>(sql);
                match param {
                    Some(param) => query.bind(param).fetch_all(pool).await,
                    None => query.fetch_all(pool).await,
                }
            }
            Self::Postgres(pool) => {
                let query = sqlx::query_as::<Postgres, T>(sql);
                match param {
                    Some(param) => query.bind(param).fetch_all(pool).await,
                    None => query.fetch_all(pool).await,
                }
            }
        }
    }

    pub async fn fetch_one<T>(&self, sql: &str, param: Option<&str>) -> Result<T, Error>
    where
        T: Send + Unpin + for<'r> FromRow<'r, SqliteRow> + for<'r> FromRow<'r, PgRow>,
    {
        self.fetch_all(sql, param)
            .await?
            .into_iter()
            .next()
            .ok_or(Error::Query(sqlx::Error::RowNotFound))
    }
}

/// Column name to value, in column order.
pub fn sqlite_columns(row: &SqliteRow) -> Result<Map<String, Value>, Error> {
    row.columns()
        .iter()
        .map(|column| Ok((column.name().to_string(), decode_column(row, column.ordinal())?)))
        .collect()
}

pub fn postgres_columns(row: &PgRow) -> Result<Map<String, Value>, Error> {
    let Json(columns) = row
        .try_get::<Json<Map<String, Value>>, _>(ROW_COLUMN)
        .map_err(|error| Error::Decode {
            column: ROW_COLUMN.to_string(),
            message: error.to_string(),
        })?;
    Ok(columns)
}
