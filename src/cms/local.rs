use std::{str::FromStr as _, sync::LazyLock};

use regex::Regex;
use serde_json::{Map, Value};
use sqlx::{QueryBuilder, Sqlite, prelude::FromRow};
use tracing::error;

use crate::cms::{Cms, CmsDocument, FindQuery, FindResult, MediaUpload};

/// CMS backed by a sqlite database. Documents are stored as JSON per
/// collection; uploaded media bytes live in their own table.
pub struct LocalCms {
    pool: sqlx::SqlitePool,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("sqlite: {0}")]
    Sqlite(#[from] sqlx::Error),
    #[error("invalid field path: {0}")]
    InvalidPath(String),
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("document data must be a JSON object")]
    NotAnObject,
}

static FIELD_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$").unwrap()
});

#[derive(FromRow)]
struct DocumentRow {
    id: String,
    #[sqlx(json)]
    data: Map<String, Value>,
}

impl From<DocumentRow> for CmsDocument {
    fn from(row: DocumentRow) -> Self {
        CmsDocument {
            id: row.id,
            fields: row.data,
        }
    }
}

impl LocalCms {
    pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)
            .inspect_err(|error| error!(%error, %url, "Failed to open local cms db"))?
            .create_if_missing(true);
        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .inspect_err(|error| error!(%error, %url, "Failed to open local cms db"))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents(
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY(collection, id)
            );

            CREATE TABLE IF NOT EXISTS media(
                id TEXT NOT NULL PRIMARY KEY,
                content_type TEXT NOT NULL,
                body BLOB NOT NULL
            );
        "#,
        )
        .execute(&pool)
        .await
        .inspect_err(|error| error!(%error, %url, "Failed to execute DDL to local cms db"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }

    async fn write(
        &self,
        collection: &str,
        id: &str,
        data: &Map<String, Value>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO documents(collection, id, data)
            VALUES (?, ?, ?)
            ON CONFLICT(collection, id)
            DO UPDATE SET data = EXCLUDED.data
        "#,
        )
        .bind(collection)
        .bind(id)
        .bind(sqlx::types::Json(data))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn push_condition(builder: &mut QueryBuilder<'_, Sqlite>, path: &str, value: &Value) {
    builder.push(" AND json_extract(data, ");
    builder.push_bind(format!("$.{path}"));
    match value {
        Value::Null => {
            builder.push(") IS NULL");
        }
        Value::Bool(b) => {
            builder.push(") = ");
            builder.push_bind(i64::from(*b));
        }
        Value::Number(n) => {
            builder.push(") = ");
            match n.as_i64() {
                Some(i) => builder.push_bind(i),
                None => builder.push_bind(n.as_f64().unwrap_or_default()),
            };
        }
        Value::String(s) => {
            builder.push(") = ");
            builder.push_bind(s.clone());
        }
        Value::Array(_) | Value::Object(_) => {
            builder.push(") = json(");
            builder.push_bind(value.to_string());
            builder.push(")");
        }
    }
}

fn stamp(data: &mut Map<String, Value>, key: &str) {
    data.insert(key.into(), Value::String(chrono::Utc::now().to_rfc3339()));
}

impl Cms for LocalCms {
    type Error = Error;

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<FindResult, Error> {
        if let Some((path, _)) = query
            .conditions
            .iter()
            .find(|(path, _)| !FIELD_PATH.is_match(path))
        {
            return Err(Error::InvalidPath(path.clone()));
        }
        let mut builder =
            QueryBuilder::<Sqlite>::new("SELECT id, data FROM documents WHERE collection = ");
        builder.push_bind(collection);
        for (path, value) in &query.conditions {
            push_condition(&mut builder, path, value);
        }
        builder.push(" ORDER BY rowid");
        let docs = builder
            .build_query_as::<DocumentRow>()
            .fetch_all(&self.pool)
            .await?;
        let total_docs = docs.len() as u64;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        Ok(FindResult {
            docs: docs.into_iter().take(limit).map(Into::into).collect(),
            total_docs,
        })
    }

    async fn create(&self, collection: &str, data: Value) -> Result<CmsDocument, Error> {
        let Value::Object(mut data) = data else {
            return Err(Error::NotAnObject);
        };
        let id = uuid::Uuid::new_v4().to_string();
        data.remove("id");
        stamp(&mut data, "createdAt");
        stamp(&mut data, "updatedAt");
        self.write(collection, &id, &data).await?;
        Ok(CmsDocument { id, fields: data })
    }

    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<CmsDocument, Error> {
        let Value::Object(patch) = data else {
            return Err(Error::NotAnObject);
        };
        let mut current = self
            .find_by_id(collection, id)
            .await?
            .ok_or_else(|| Error::NotFound {
                collection: collection.into(),
                id: id.into(),
            })?;
        for (key, value) in patch {
            if key != "id" {
                current.fields.insert(key, value);
            }
        }
        stamp(&mut current.fields, "updatedAt");
        self.write(collection, id, &current.fields).await?;
        Ok(current)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<CmsDocument>, Error> {
        let row = sqlx::query_as::<_, DocumentRow>(
            "SELECT id, data FROM documents WHERE collection = ? AND id = ?",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<CmsDocument, Error> {
        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query("INSERT INTO media(id, content_type, body) VALUES (?, ?, ?)")
            .bind(&id)
            .bind(&upload.content_type)
            .bind(upload.bytes.as_ref())
            .execute(&self.pool)
            .await?;
        let mut data = Map::new();
        data.insert("filename".into(), upload.filename.clone().into());
        data.insert("mimeType".into(), upload.content_type.into());
        data.insert("filesize".into(), upload.bytes.len().into());
        data.insert("alt".into(), upload.alt.into());
        data.insert("url".into(), format!("/media/{}", upload.filename).into());
        stamp(&mut data, "createdAt");
        stamp(&mut data, "updatedAt");
        self.write("media", &id, &data).await?;
        Ok(CmsDocument { id, fields: data })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    async fn cms() -> LocalCms {
        LocalCms::open("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn create_find_update() {
        let cms = cms().await;
        let created = cms
            .create(
                "posts",
                json!({"title": "a", "slug": "a", "sourceMeta": {"originalId": "contentdb_1_7"}}),
            )
            .await
            .unwrap();
        cms.create("posts", json!({"title": "b", "slug": "b"}))
            .await
            .unwrap();

        let found = cms
            .find(
                "posts",
                &FindQuery::equals("sourceMeta.originalId", "contentdb_1_7").limit(1),
            )
            .await
            .unwrap();
        assert_eq!(found.total_docs, 1);
        assert_eq!(found.docs[0].id, created.id);

        let updated = cms
            .update("posts", &created.id, json!({"title": "a2"}))
            .await
            .unwrap();
        assert_eq!(updated.fields["title"], json!("a2"));
        assert_eq!(updated.fields["slug"], json!("a"));

        let missing = cms.find("tags", &FindQuery::equals("name", "x")).await.unwrap();
        assert!(missing.docs.is_empty());
    }

    #[tokio::test]
    async fn rejects_suspicious_paths() {
        let cms = cms().await;
        let err = cms
            .find("posts", &FindQuery::equals("slug') OR 1=1 --", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPath(_)));
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let cms = cms().await;
        let err = cms
            .update("posts", "nope", json!({"title": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn media_is_stored() {
        let cms = cms().await;
        let doc = cms
            .upload_media(MediaUpload {
                filename: "import-abc.png".into(),
                content_type: "image/png".into(),
                bytes: bytes::Bytes::from_static(b"\x89PNG"),
                alt: "logo".into(),
            })
            .await
            .unwrap();
        let body = sqlx::query_scalar::<_, Vec<u8>>("SELECT body FROM media WHERE id = ?")
            .bind(&doc.id)
            .fetch_one(cms.pool())
            .await
            .unwrap();
        assert_eq!(body, b"\x89PNG");
        assert!(cms.find_by_id("media", &doc.id).await.unwrap().is_some());
    }
}
