use serde::{Deserialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::cms::{Cms, CmsDocument, FindQuery, FindResult, MediaUpload};

/// Client for a Payload-style REST API (`/api/<collection>`).
pub struct HttpCms {
    client: reqwest::Client,
    base: Url,
    api_key: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Transport error: {0}")]
    Transport(reqwest::Error),
    #[error("Request failed with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Invalid url: {0}")]
    Url(#[from] url::ParseError),
}

#[derive(Deserialize)]
struct DocResponse {
    doc: CmsDocument,
}

impl HttpCms {
    pub fn new(mut base: Url, api_key: Option<String>) -> Self {
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Self {
            client: reqwest::Client::new(),
            base,
            api_key,
        }
    }

    fn collection_url(&self, collection: &str, id: Option<&str>) -> Result<Url, Error> {
        let mut path = format!("api/{}", urlencoding::encode(collection));
        if let Some(id) = id {
            path.push('/');
            path.push_str(&urlencoding::encode(id));
        }
        Ok(self.base.join(&path)?)
    }

    pub fn find_url(&self, collection: &str, query: &FindQuery) -> Result<Url, Error> {
        let mut url = self.collection_url(collection, None)?;
        {
            let mut pairs = url.query_pairs_mut();
            for (path, value) in &query.conditions {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                pairs.append_pair(&format!("where[{path}][equals]"), &value);
            }
            if let Some(limit) = query.limit {
                pairs.append_pair("limit", &limit.to_string());
            }
            pairs.append_pair("depth", "0");
        }
        Ok(url)
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T, Error> {
        let request = match &self.api_key {
            Some(key) => request.header(reqwest::header::AUTHORIZATION, format!("users API-Key {key}")),
            None => request,
        };
        let response = request.send().await.map_err(Error::Transport)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, %body, "cms request failed");
            return Err(Error::Status { status, body });
        }
        response.json::<T>().await.map_err(Error::Transport)
    }
}

impl Cms for HttpCms {
    type Error = Error;

    async fn find(&self, collection: &str, query: &FindQuery) -> Result<FindResult, Error> {
        let url = self.find_url(collection, query)?;
        debug!(%url, "find");
        self.send(self.client.get(url)).await
    }

    async fn create(&self, collection: &str, data: Value) -> Result<CmsDocument, Error> {
        let url = self.collection_url(collection, None)?;
        let response: DocResponse = self.send(self.client.post(url).json(&data)).await?;
        Ok(response.doc)
    }

    async fn update(&self, collection: &str, id: &str, data: Value) -> Result<CmsDocument, Error> {
        let url = self.collection_url(collection, Some(id))?;
        let response: DocResponse = self.send(self.client.patch(url).json(&data)).await?;
        Ok(response.doc)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> Result<Option<CmsDocument>, Error> {
        let url = self.collection_url(collection, Some(id))?;
        match self.send(self.client.get(url)).await {
            Ok(doc) => Ok(Some(doc)),
            Err(Error::Status { status, .. }) if status == reqwest::StatusCode::NOT_FOUND => {
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }

    async fn upload_media(&self, upload: MediaUpload) -> Result<CmsDocument, Error> {
        let url = self.collection_url("media", None)?;
        let part = reqwest::multipart::Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename)
            .mime_str(&upload.content_type)
            .map_err(Error::Transport)?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("_payload", serde_json::json!({ "alt": upload.alt }).to_string());
        let response: DocResponse = self.send(self.client.post(url).multipart(form)).await?;
        Ok(response.doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_url_encodes_conditions() {
        let cms = HttpCms::new("https://cms.example.com/".parse().unwrap(), None);
        let url = cms
            .find_url(
                "posts",
                &FindQuery::equals("sourceMeta.originalId", "contentdb_1_2").limit(1),
            )
            .unwrap();
        assert_eq!(url.path(), "/api/posts");
        let pairs = url.query_pairs().into_owned().collect::<Vec<_>>();
        assert_eq!(
            pairs,
            vec![
                (
                    "where[sourceMeta.originalId][equals]".to_string(),
                    "contentdb_1_2".to_string()
                ),
                ("limit".to_string(), "1".to_string()),
                ("depth".to_string(), "0".to_string()),
            ]
        );
    }

    #[test]
    fn document_urls_escape_ids() {
        let cms = HttpCms::new("https://cms.example.com/".parse().unwrap(), None);
        let url = cms.collection_url("posts", Some("a/b")).unwrap();
        assert_eq!(url.as_str(), "https://cms.example.com/api/posts/a%2Fb");
    }
}
