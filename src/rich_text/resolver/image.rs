use futures::future::join_all;
use indexmap::IndexMap;
use tracing::warn;

use crate::{media::ImageUploader, rich_text::parser::MdBlock, warn_entry};

/// Collects image sources so they can be uploaded before the tree is built.
#[derive(Default)]
pub(crate) struct ImageSrcExtractor<'s> {
    src_set: IndexMap<&'s str, &'s str>,
}

impl<'s> ImageSrcExtractor<'s> {
    pub(crate) fn analyze(&mut self, blocks: &'s [MdBlock]) {
        for block in blocks {
            match block {
                MdBlock::Image { url, alt } => {
                    self.src_set.entry(url.as_str()).or_insert(alt.as_str());
                }
                MdBlock::Quote(children) => self.analyze(children),
                MdBlock::List { items, .. } => {
                    items.iter().for_each(|item| self.analyze(&item.children))
                }
                MdBlock::Paragraph(_)
                | MdBlock::Heading { .. }
                | MdBlock::Code { .. }
                | MdBlock::Table { .. }
                | MdBlock::Html(_) => {}
            }
        }
    }

    /// Upload every collected image concurrently. Failed uploads are left
    /// unresolved so the converter falls back to markdown text.
    pub(crate) async fn into_resolver(self, uploader: &impl ImageUploader) -> ImageResolver {
        let tasks = self.src_set.into_iter().map(|(src, alt)| async move {
            match uploader.upload(src, alt).await {
                Ok(id) => Some((src.to_owned(), id)),
                Err(error) => {
                    warn!(%error, src, "image upload failed, keeping markdown reference");
                    warn_entry!("image upload failed for {src}: {error}");
                    None
                }
            }
        });
        let map = join_all(tasks).await.into_iter().flatten().collect();
        ImageResolver { map }
    }
}

/// Maps image sources to uploaded media ids.
#[derive(Default)]
pub(crate) struct ImageResolver {
    map: IndexMap<String, String>,
}

impl ImageResolver {
    pub(crate) fn resolve(&self, src: &str) -> Option<&str> {
        self.map.get(src).map(String::as_str)
    }
}
