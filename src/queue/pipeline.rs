use std::future::Future;

use regex::Regex;
use tracing::debug;

use crate::{
    cms::{
        Cms,
        upload::{self, ArticleUploader, UploadResult},
    },
    linking::{Catalog, LinkInjector, LinkingOptions, cleanup},
    media::{CmsImageUploader, MediaCache},
    queue::{MigrationConfig, QueueItem, QueueSettings},
    rich_text::convert::{Converter, apply_language_direction},
};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Upload(#[from] upload::Error),
    #[error("{0}")]
    Rejected(String),
}

/// The work done for one queue item. Failures are contained to the item.
pub trait ItemProcessor {
    fn process(
        &self,
        item: &QueueItem,
        config: &MigrationConfig,
        settings: &QueueSettings,
    ) -> impl Future<Output = Result<UploadResult, Error>>;
}

struct LinkStage {
    catalog: Catalog,
    options: LinkingOptions,
    listing_rules: Vec<Regex>,
}

/// Convert, optionally link, then upload through the CMS.
pub struct ImportPipeline<C> {
    cms: C,
    converter: Converter,
    media: MediaCache,
    links: Option<LinkStage>,
}

impl<C: Cms> ImportPipeline<C> {
    pub fn new(cms: C, converter: Converter) -> Self {
        Self {
            cms,
            converter,
            media: MediaCache::new(),
            links: None,
        }
    }

    /// Inject catalog links into every converted article. Product listing
    /// paragraphs from earlier generators are dropped first.
    pub fn with_links(
        mut self,
        catalog: Catalog,
        options: LinkingOptions,
    ) -> Result<Self, regex::Error> {
        let listing_rules = options.compile_listing_rules()?;
        self.links = Some(LinkStage {
            catalog,
            options,
            listing_rules,
        });
        Ok(self)
    }

    pub fn cms(&self) -> &C {
        &self.cms
    }

    /// Uploaded media of this process, by source url.
    pub fn media_cache(&self) -> &MediaCache {
        &self.media
    }
}

impl<C: Cms> ItemProcessor for ImportPipeline<C> {
    async fn process(
        &self,
        item: &QueueItem,
        config: &MigrationConfig,
        settings: &QueueSettings,
    ) -> Result<UploadResult, Error> {
        let article = &item.article;
        let converted = if self.converter.options().upload_images {
            let uploader = CmsImageUploader::new(&self.cms, &self.media);
            self.converter
                .convert_uploading(&article.content, &uploader)
                .await
        } else {
            self.converter.convert(&article.content)
        };
        let mut document = converted.document;
        if let Some(links) = &self.links {
            let removed = cleanup::remove_product_listings(&mut document, &links.listing_rules);
            let injection = LinkInjector::new(&links.catalog, &links.options).inject(&document);
            debug!(
                item_id = item.id,
                removed,
                links_added = injection.links_added,
                "linked article"
            );
            document = injection.document;
        }
        // Last, so injected links carry the article's direction too.
        apply_language_direction(&mut document, &config.language);

        let result = ArticleUploader::new(&self.cms, config, settings.on_existing)
            .upload(article, &document)
            .await?;
        if !result.success {
            return Err(Error::Rejected(
                result.error.unwrap_or_else(|| "upload rejected".into()),
            ));
        }
        Ok(result)
    }
}
