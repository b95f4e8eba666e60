//! Intermediate markdown AST.
//!
//! Only the constructs found in article bodies are kept; everything else is
//! dropped by the parser. Inline marks are already resolved into format bits.

pub mod markdown;

use pulldown_cmark::HeadingLevel;

use crate::rich_text::TextFormat;

#[derive(Debug, Clone, PartialEq)]
pub enum MdBlock {
    Paragraph(Vec<MdInline>),
    Heading {
        level: HeadingLevel,
        inlines: Vec<MdInline>,
    },
    List {
        start: Option<u64>,
        items: Vec<MdItem>,
    },
    Quote(Vec<MdBlock>),
    Code {
        lang: Option<String>,
        source: String,
    },
    /// A paragraph whose only content is one image.
    Image {
        url: String,
        alt: String,
    },
    Table {
        rows: Vec<Vec<Vec<MdInline>>>,
    },
    Html(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MdItem {
    pub checked: Option<bool>,
    pub inlines: Vec<MdInline>,
    pub children: Vec<MdBlock>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MdInline {
    Text {
        text: String,
        format: TextFormat,
    },
    Image {
        url: String,
        alt: String,
        format: TextFormat,
    },
    Link {
        url: String,
        children: Vec<MdInline>,
    },
}

impl MdInline {
    fn is_blank(&self) -> bool {
        matches!(self, MdInline::Text { text, .. } if text.trim().is_empty())
    }
}

pub(crate) fn text_content(inlines: &[MdInline]) -> String {
    inlines
        .iter()
        .map(|inline| match inline {
            MdInline::Text { text, .. } => text.clone(),
            MdInline::Image { alt, .. } => alt.clone(),
            MdInline::Link { children, .. } => text_content(children),
        })
        .collect()
}
