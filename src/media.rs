//! Image upload collaborator and the process-wide cache of uploaded media.

use std::{collections::HashMap, future::Future, sync::LazyLock, sync::Mutex};

use regex::Regex;
use tracing::{debug, warn};
use url::Url;

use crate::cms::{Cms, MediaUpload};

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to download {url}: {source}")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("download of {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("unsupported image source: {0}")]
    UnsupportedSource(String),
    #[error("cms rejected media upload: {0}")]
    Cms(String),
}

/// Uploads an image by source URL and returns the persisted media id.
pub trait ImageUploader {
    fn upload(&self, src: &str, alt: &str) -> impl Future<Output = Result<String, UploadError>>;
}

/// Source URL → media id, shared by every conversion in the process.
/// Nothing is persisted; [`MediaCache::reset`] empties it.
#[derive(Default)]
pub struct MediaCache {
    map: Mutex<HashMap<String, String>>,
}

impl MediaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, src: &str) -> Option<String> {
        self.lock().get(src).cloned()
    }

    pub fn insert(&self, src: impl Into<String>, id: impl Into<String>) {
        self.lock().insert(src.into(), id.into());
    }

    pub fn remove(&self, src: &str) {
        self.lock().remove(src);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Downloads images over HTTP and stores them in the CMS media collection.
pub struct CmsImageUploader<'a, C> {
    cms: &'a C,
    cache: &'a MediaCache,
    client: reqwest::Client,
}

impl<'a, C: Cms> CmsImageUploader<'a, C> {
    pub fn new(cms: &'a C, cache: &'a MediaCache) -> Self {
        Self {
            cms,
            cache,
            client: reqwest::Client::new(),
        }
    }

    async fn cached(&self, src: &str) -> Option<String> {
        let id = self.cache.get(src)?;
        match self.cms.find_by_id("media", &id).await {
            Ok(Some(_)) => Some(id),
            Ok(None) => {
                debug!(src, id, "cached media disappeared, uploading again");
                self.cache.remove(src);
                None
            }
            Err(error) => {
                warn!(%error, src, id, "failed to verify cached media");
                None
            }
        }
    }
}

impl<C: Cms> ImageUploader for CmsImageUploader<'_, C> {
    async fn upload(&self, src: &str, alt: &str) -> Result<String, UploadError> {
        if let Some(id) = self.cached(src).await {
            return Ok(id);
        }
        let url = Url::parse(src)
            .ok()
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .ok_or_else(|| UploadError::UnsupportedSource(src.to_string()))?;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| UploadError::Download {
                url: src.to_string(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Status {
                url: src.to_string(),
                status: status.as_u16(),
            });
        }
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_string())
            .filter(|value| value.starts_with("image/"))
            .or_else(|| {
                mime_guess::from_path(url.path())
                    .first_raw()
                    .map(String::from)
            })
            .unwrap_or_else(|| "image/jpeg".to_string());
        let bytes = response
            .bytes()
            .await
            .map_err(|source| UploadError::Download {
                url: src.to_string(),
                source,
            })?;
        let alt = if alt.trim().is_empty() {
            "Imported image"
        } else {
            alt
        };
        let doc = self
            .cms
            .upload_media(MediaUpload {
                filename: media_filename(src, &content_type),
                content_type,
                bytes,
                alt: alt.to_string(),
            })
            .await
            .map_err(|error| UploadError::Cms(error.to_string()))?;
        self.cache.insert(src, doc.id.clone());
        debug!(src, id = doc.id, "uploaded image");
        Ok(doc.id)
    }
}

/// Stable file name derived from the source URL.
pub fn media_filename(src: &str, content_type: &str) -> String {
    let hash = blake3::hash(src.as_bytes()).to_hex();
    let ext = match content_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/svg+xml" => "svg",
        other => mime_guess::get_mime_extensions_str(other)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("jpg"),
    };
    format!("import-{}.{ext}", &hash[..16])
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub alt: String,
    pub url: String,
}

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").unwrap());

/// Markdown image references in `content`, in order of appearance.
pub fn extract_image_urls(content: &str) -> Vec<ImageReference> {
    MARKDOWN_IMAGE
        .captures_iter(content)
        .map(|caps| ImageReference {
            alt: caps[1].to_string(),
            url: caps[2].trim().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cms::local::LocalCms;

    #[tokio::test]
    async fn cache_hit_skips_download() {
        let cms = LocalCms::open("sqlite::memory:").await.unwrap();
        let doc = cms
            .upload_media(MediaUpload {
                filename: "import-x.png".into(),
                content_type: "image/png".into(),
                bytes: bytes::Bytes::from_static(b"png"),
                alt: "x".into(),
            })
            .await
            .unwrap();
        let cache = MediaCache::new();
        cache.insert("https://example.invalid/x.png", doc.id.clone());
        let uploader = CmsImageUploader::new(&cms, &cache);
        let id = uploader
            .upload("https://example.invalid/x.png", "x")
            .await
            .unwrap();
        assert_eq!(id, doc.id);
    }

    #[tokio::test]
    async fn stale_cache_entry_is_dropped() {
        let cms = LocalCms::open("sqlite::memory:").await.unwrap();
        let cache = MediaCache::new();
        cache.insert("data:image/png;base64,AAAA", "gone");
        let uploader = CmsImageUploader::new(&cms, &cache);
        let err = uploader
            .upload("data:image/png;base64,AAAA", "")
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedSource(_)));
        assert!(cache.is_empty());
    }

    #[test]
    fn reset_clears_cache() {
        let cache = MediaCache::new();
        cache.insert("a", "1");
        assert_eq!(cache.get("a").as_deref(), Some("1"));
        cache.reset();
        assert!(cache.get("a").is_none());
    }

    #[test]
    fn filenames_are_stable() {
        let a = media_filename("https://example.com/a.png", "image/png");
        assert_eq!(a, media_filename("https://example.com/a.png", "image/png"));
        assert!(a.starts_with("import-"));
        assert!(a.ends_with(".png"));
        assert!(media_filename("https://example.com/a", "image/jpeg").ends_with(".jpg"));
    }

    #[test]
    fn finds_markdown_images() {
        let refs = extract_image_urls("intro ![a](https://x/1.png) and ![](https://x/2.jpg)");
        assert_eq!(
            refs,
            vec![
                ImageReference {
                    alt: "a".into(),
                    url: "https://x/1.png".into()
                },
                ImageReference {
                    alt: "".into(),
                    url: "https://x/2.jpg".into()
                },
            ]
        );
    }
}
