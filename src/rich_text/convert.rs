//! Article body → document tree conversion.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    media::ImageUploader,
    rich_text::{
        Block, Code, CustomBlock, Direction, Document, HeaderState, Heading, Inline, Link,
        LinkFields, LinkType, List, ListItem, ListTag, ListType, Paragraph, Quote, Root, Table,
        TableCell, TableRow, Text, TextFormat, Upload,
        parser::{MdBlock, MdInline, MdItem, markdown::MarkdownParser},
        resolver::image::{ImageResolver, ImageSrcExtractor},
        visit::merge_text_runs,
    },
    warn_entry,
};

/// How markdown links are represented in the tree.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMode {
    /// Replace links with their text. The CMS rejected link nodes without a
    /// document reference, so this is the default.
    #[default]
    Flatten,
    /// Emit `custom` link nodes.
    Keep,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DiagramRules {
    #[serde(default = "default_diagram_languages")]
    pub languages: Vec<String>,
    #[serde(default = "default_diagram_keywords")]
    pub keywords: Vec<String>,
}

fn default_diagram_languages() -> Vec<String> {
    vec!["mermaid".into()]
}

fn default_diagram_keywords() -> Vec<String> {
    [
        "graph",
        "flowchart",
        "sequenceDiagram",
        "classDiagram",
        "stateDiagram",
        "erDiagram",
        "gantt",
        "pie",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for DiagramRules {
    fn default() -> Self {
        Self {
            languages: default_diagram_languages(),
            keywords: default_diagram_keywords(),
        }
    }
}

impl DiagramRules {
    fn matches(&self, lang: Option<&str>, source: &str) -> bool {
        let by_lang = lang.is_some_and(|lang| {
            self.languages
                .iter()
                .any(|known| known.eq_ignore_ascii_case(lang))
        });
        if by_lang {
            return true;
        }
        let source = source.trim_start();
        self.keywords.iter().any(|kw| source.starts_with(kw.as_str()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConverterOptions {
    #[serde(default)]
    pub upload_images: bool,
    #[serde(default = "default_fallback_chars")]
    pub fallback_chars: usize,
    #[serde(default)]
    pub link_mode: LinkMode,
    #[serde(default)]
    pub diagram: DiagramRules,
}

fn default_fallback_chars() -> usize {
    1000
}

impl Default for ConverterOptions {
    fn default() -> Self {
        Self {
            upload_images: false,
            fallback_chars: default_fallback_chars(),
            link_mode: LinkMode::default(),
            diagram: DiagramRules::default(),
        }
    }
}

/// Where the resulting tree came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource {
    /// The content already was a serialized tree.
    Tree,
    Markdown,
    /// Conversion produced nothing; the raw text was wrapped in a paragraph.
    Fallback,
}

#[derive(Debug, Clone)]
pub struct Converted {
    pub document: Document,
    pub source: ContentSource,
    /// The input tree, untouched, when `source` is [`ContentSource::Tree`].
    pub tree: Option<Value>,
}

impl Converted {
    /// JSON of the result. A passed-through tree comes back byte for byte.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        match &self.tree {
            Some(tree) => Ok(tree.clone()),
            None => serde_json::to_value(&self.document),
        }
    }
}

pub struct Converter {
    options: ConverterOptions,
    parser: MarkdownParser,
}

/// Cheap structural check: a JSON object whose root has a children array.
fn serialized_tree(content: &str) -> Option<Value> {
    if !content.trim_start().starts_with('{') {
        return None;
    }
    let value = serde_json::from_str::<Value>(content).ok()?;
    value.get("root")?.get("children")?.as_array()?;
    Some(value)
}

/// A block the node model reproduces exactly, or the raw JSON otherwise.
fn lossless_block(raw: Value) -> Block {
    match serde_json::from_value::<Block>(raw.clone()) {
        Ok(block) if serde_json::to_value(&block).is_ok_and(|typed| typed == raw) => block,
        _ => Block::Other(raw),
    }
}

fn tree_document(value: &Value) -> Option<Document> {
    let mut root = value.get("root")?.as_object()?.clone();
    let Some(Value::Array(children)) = root.insert("children".into(), Value::Array(Vec::new()))
    else {
        return None;
    };
    let mut root = serde_json::from_value::<Root>(Value::Object(root))
        .inspect_err(|error| debug!(%error, "tree-shaped content did not match the node model"))
        .ok()?;
    root.children = children.into_iter().map(lossless_block).collect();
    Some(Document { root })
}

/// Parse `content` as a serialized document tree when it looks like one.
/// Blocks the node model cannot reproduce exactly stay raw JSON.
pub fn parse_serialized_tree(content: &str) -> Option<Document> {
    tree_document(&serialized_tree(content)?)
}

fn passthrough(content: &str) -> Option<Converted> {
    let tree = serialized_tree(content)?;
    let document = tree_document(&tree)?;
    Some(Converted {
        document,
        source: ContentSource::Tree,
        tree: Some(tree),
    })
}

/// Inlines of `block`, container children joined by newlines. Blocks
/// without text contribute their plain text.
fn collect_inlines(block: &Block, out: &mut Vec<Inline>) {
    if let Some(inlines) = block.inlines() {
        out.extend(inlines.iter().cloned());
    } else if let Some(blocks) = block.blocks() {
        for (index, child) in blocks.iter().enumerate() {
            if index > 0 {
                out.push(Inline::text("\n", TextFormat::PLAIN));
            }
            collect_inlines(child, out);
        }
    } else {
        let text = block.plain_text();
        if !text.is_empty() {
            out.push(Inline::text(text, TextFormat::PLAIN));
        }
    }
}

/// Text direction for a language code or name. `None` lets the renderer
/// inherit the direction.
pub fn direction_for(language: &str) -> Option<Direction> {
    match language.trim().to_ascii_lowercase().as_str() {
        "ar" | "arabic" | "he" | "hebrew" | "fa" | "persian" | "ur" | "urdu" => {
            Some(Direction::Rtl)
        }
        "ja" | "japanese" | "zh" | "chinese" | "ko" | "korean" => None,
        _ => Some(Direction::Ltr),
    }
}

pub fn apply_language_direction(document: &mut Document, language: &str) {
    document.set_direction(direction_for(language));
}

impl Converter {
    pub fn new(options: ConverterOptions) -> Self {
        Self {
            options,
            parser: MarkdownParser::new(),
        }
    }

    pub fn options(&self) -> &ConverterOptions {
        &self.options
    }

    /// Convert without uploading images; images keep their markdown text.
    pub fn convert(&self, content: &str) -> Converted {
        if let Some(converted) = passthrough(content) {
            return converted;
        }
        let blocks = self.parser.parse(content);
        self.build(content, &blocks, &ImageResolver::default())
    }

    /// Convert, uploading standalone images through `uploader` first when
    /// image upload is enabled.
    pub async fn convert_uploading(
        &self,
        content: &str,
        uploader: &impl ImageUploader,
    ) -> Converted {
        if let Some(converted) = passthrough(content) {
            return converted;
        }
        let blocks = self.parser.parse(content);
        let resolver = if self.options.upload_images {
            let mut extractor = ImageSrcExtractor::default();
            extractor.analyze(&blocks);
            extractor.into_resolver(uploader).await
        } else {
            ImageResolver::default()
        };
        self.build(content, &blocks, &resolver)
    }

    fn build(&self, raw: &str, blocks: &[MdBlock], images: &ImageResolver) -> Converted {
        let children = blocks
            .iter()
            .filter_map(|block| self.block(block, images))
            .collect::<Vec<_>>();
        if !children.is_empty() {
            return Converted {
                document: Document::new(children),
                source: ContentSource::Markdown,
                tree: None,
            };
        }
        let head = raw.chars().take(self.options.fallback_chars).collect::<String>();
        warn!(len = raw.len(), "conversion produced no blocks, using fallback paragraph");
        warn_entry!("content converted to a fallback paragraph");
        let text = if head.is_empty() { " ".to_string() } else { head };
        Converted {
            document: Document::plain(text),
            source: ContentSource::Fallback,
            tree: None,
        }
    }

    fn block(&self, block: &MdBlock, images: &ImageResolver) -> Option<Block> {
        match block {
            MdBlock::Paragraph(inlines) => {
                let children = self.inlines(inlines);
                (!children.is_empty()).then(|| Block::Paragraph(Paragraph::new(children)))
            }
            MdBlock::Heading { level, inlines } => {
                let children = self.inlines(inlines);
                (!children.is_empty())
                    .then(|| Block::Heading(Heading::new((*level).into(), children)))
            }
            MdBlock::List { start, items } => Some(self.list(*start, items, images)),
            MdBlock::Quote(children) => {
                let mut children = children
                    .iter()
                    .filter_map(|child| self.block(child, images))
                    .collect::<Vec<_>>();
                if children.is_empty() {
                    children.push(Block::Paragraph(Paragraph::new(vec![Inline::space()])));
                }
                Some(Block::Quote(Quote::new(children)))
            }
            MdBlock::Code { lang, source } => {
                if self.options.diagram.matches(lang.as_deref(), source) {
                    return Some(Block::Block(CustomBlock::diagram(source.clone())));
                }
                let text = if source.is_empty() {
                    Inline::space()
                } else {
                    Inline::text(source.clone(), TextFormat::CODE)
                };
                let language = lang.clone().unwrap_or_else(|| "plain".into());
                Some(Block::Code(Code::new(Some(language), vec![text])))
            }
            MdBlock::Image { url, alt } => match images.resolve(url) {
                Some(id) => Some(Block::Upload(Upload::media(id))),
                None => Some(Block::Paragraph(Paragraph::new(vec![Inline::text(
                    image_markdown(url, alt),
                    TextFormat::ITALIC,
                )]))),
            },
            MdBlock::Table { rows } => {
                let rows = rows
                    .iter()
                    .enumerate()
                    .map(|(index, cells)| {
                        let header_state = if index == 0 {
                            HeaderState::Header
                        } else {
                            HeaderState::Normal
                        };
                        let cells = cells
                            .iter()
                            .map(|cell| {
                                Block::TableCell(TableCell::new(
                                    header_state,
                                    self.inlines_or_space(cell),
                                ))
                            })
                            .collect();
                        Block::TableRow(TableRow::new(cells))
                    })
                    .collect();
                Some(Block::Table(Table::new(rows)))
            }
            MdBlock::Html(html) => {
                let html = html.trim();
                if html.is_empty() || html.contains("<!--") {
                    return None;
                }
                Some(Block::Paragraph(Paragraph::new(vec![Inline::text(
                    html,
                    TextFormat::PLAIN,
                )])))
            }
        }
    }

    fn list(&self, start: Option<u64>, items: &[MdItem], images: &ImageResolver) -> Block {
        let (list_type, tag) = if items.iter().any(|item| item.checked.is_some()) {
            (ListType::Check, ListTag::Ul)
        } else if start.is_some() {
            (ListType::Number, ListTag::Ol)
        } else {
            (ListType::Bullet, ListTag::Ul)
        };
        let start = start.map(|n| n as u32).unwrap_or(1);
        let mut children = Vec::new();
        self.list_items(start, items, 0, images, &mut children);
        Block::List(List::new(list_type, tag, start, children))
    }

    /// Nested lists are flattened into the parent with a deeper indent.
    fn list_items(
        &self,
        start: u32,
        items: &[MdItem],
        depth: u32,
        images: &ImageResolver,
        out: &mut Vec<Block>,
    ) {
        for (index, item) in items.iter().enumerate() {
            let value = start + index as u32;
            let mut li = ListItem::new(
                value,
                item.checked,
                self.inlines_or_space(&item.inlines),
            );
            li.indent = depth;
            out.push(Block::ListItem(li));
            for child in &item.children {
                match child {
                    MdBlock::List { start, items } => self.list_items(
                        start.map(|n| n as u32).unwrap_or(1),
                        items,
                        depth + 1,
                        images,
                        out,
                    ),
                    other => {
                        let Some(block) = self.block(other, images) else {
                            continue;
                        };
                        // Continuation blocks keep their formatting and the item's number.
                        let mut children = Vec::new();
                        collect_inlines(&block, &mut children);
                        if children.iter().all(|inline| inline.plain_text().trim().is_empty()) {
                            children = vec![Inline::space()];
                        }
                        let mut li = ListItem::new(value, None, children);
                        li.indent = depth + 1;
                        out.push(Block::ListItem(li));
                    }
                }
            }
        }
    }

    fn inlines_or_space(&self, inlines: &[MdInline]) -> Vec<Inline> {
        let children = self.inlines(inlines);
        if children.is_empty() {
            vec![Inline::space()]
        } else {
            children
        }
    }

    /// Inline processing: marks become format bits, adjacent runs of the
    /// same format are merged.
    fn inlines(&self, inlines: &[MdInline]) -> Vec<Inline> {
        let mut out = Vec::new();
        self.push_inlines(inlines, self.options.link_mode, &mut out);
        merge_text_runs(out)
    }

    fn push_inlines(&self, inlines: &[MdInline], mode: LinkMode, out: &mut Vec<Inline>) {
        for inline in inlines {
            match inline {
                MdInline::Text { text, format } => out.push(Inline::text(text.clone(), *format)),
                MdInline::Image { url, alt, format } => {
                    out.push(Inline::text(format!("![{alt}]({url})"), *format))
                }
                MdInline::Link { children, .. } if mode == LinkMode::Flatten => {
                    self.push_inlines(children, mode, out)
                }
                MdInline::Link { url, children } => {
                    let mut text = Vec::new();
                    self.push_inlines(children, LinkMode::Flatten, &mut text);
                    let text = merge_text_runs(text);
                    if text.is_empty() {
                        continue;
                    }
                    let fields = LinkFields {
                        url: Some(url.clone()),
                        new_tab: false,
                        link_type: LinkType::Custom,
                        rel: None,
                        doc: None,
                        extra: Default::default(),
                    };
                    let mut link = Link::new(fields, Text::new("", TextFormat::PLAIN));
                    link.children = text;
                    out.push(Inline::Link(link));
                }
            }
        }
    }
}

fn image_markdown(url: &str, alt: &str) -> String {
    let alt = if alt.is_empty() { "Image" } else { alt };
    format!("![{alt}]({url})")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::media::UploadError;

    struct FakeUploader;

    impl ImageUploader for FakeUploader {
        async fn upload(&self, src: &str, _alt: &str) -> Result<String, UploadError> {
            if src.contains("broken") {
                Err(UploadError::Status {
                    url: src.to_string(),
                    status: 404,
                })
            } else {
                Ok("media-1".into())
            }
        }
    }

    fn texts(block: &Block) -> Vec<(String, u32)> {
        block
            .inlines()
            .unwrap()
            .iter()
            .map(|inline| {
                let text = inline.as_text().unwrap();
                (text.text.clone(), text.format.0)
            })
            .collect()
    }

    fn converter() -> Converter {
        Converter::new(ConverterOptions::default())
    }

    #[test]
    fn bold_and_italic_runs() {
        let converted = converter().convert("**bold** and *italic* text");
        assert_eq!(converted.source, ContentSource::Markdown);
        assert_eq!(
            texts(&converted.document.blocks()[0]),
            vec![
                ("bold".to_string(), 1),
                (" and ".to_string(), 0),
                ("italic".to_string(), 2),
                (" text".to_string(), 0),
            ]
        );
    }

    #[test]
    fn serialized_tree_passes_through() {
        let original = converter().convert("# Title\n\nSome *body*.\n\n- a\n- b\n");
        let serialized = serde_json::to_string(&original.document).unwrap();
        let again = converter().convert(&serialized);
        assert_eq!(again.source, ContentSource::Tree);
        assert_eq!(again.document, original.document);
        assert_eq!(serde_json::to_string(&again.document).unwrap(), serialized);
    }

    #[test]
    fn editor_written_tree_is_kept_exactly() {
        let tree = json!({
            "root": {
                "type": "root",
                "children": [
                    {
                        "type": "paragraph",
                        "children": [{"type": "text", "text": "Hello", "format": 1, "version": 1}],
                        "direction": "ltr",
                        "format": "",
                        "indent": 0,
                        "version": 1,
                        "textFormat": 1
                    },
                    {
                        "type": "table",
                        "children": [{
                            "type": "tablerow",
                            "children": [{
                                "type": "tablecell",
                                "headerState": 1,
                                "colSpan": 1,
                                "backgroundColor": null,
                                "children": [{"type": "text", "text": "Club", "format": 0, "version": 1}],
                                "direction": null,
                                "format": "",
                                "indent": 0,
                                "version": 1
                            }],
                            "direction": null,
                            "format": "",
                            "indent": 0,
                            "version": 1
                        }],
                        "direction": null,
                        "format": "",
                        "indent": 0,
                        "version": 1
                    },
                    {"type": "horizontalrule", "version": 1}
                ],
                "direction": null,
                "format": "",
                "indent": 0,
                "version": 1
            }
        });
        let converted = converter().convert(&tree.to_string());
        assert_eq!(converted.source, ContentSource::Tree);
        assert_eq!(converted.to_value().unwrap(), tree);
        assert_eq!(
            serde_json::to_value(converted.document.blocks()).unwrap(),
            tree["root"]["children"]
        );

        let blocks = converted.document.blocks();
        assert!(matches!(&blocks[0], Block::Paragraph(_)));
        let Block::Table(table) = &blocks[1] else {
            panic!("numeric header state keeps the table typed");
        };
        let Block::TableRow(row) = &table.children[0] else {
            panic!("expected row");
        };
        let Block::TableCell(cell) = &row.children[0] else {
            panic!("expected cell");
        };
        assert!(cell.header_state.is_header());
        assert!(matches!(&blocks[2], Block::Other(_)));
    }

    #[test]
    fn json_without_root_children_is_markdown() {
        let converted = converter().convert(r#"{"title": "not a tree"}"#);
        assert_eq!(converted.source, ContentSource::Markdown);
    }

    #[test]
    fn no_block_is_ever_empty() {
        let src = "# \n\n| a | |\n|---|---|\n|  | x |\n\n- \n- item\n\n>\n\n```\n```\n";
        let converted = converter().convert(src);
        assert!(
            converted.document.defects().is_empty(),
            "{:?}",
            converted.document.defects()
        );
    }

    #[test]
    fn empty_input_falls_back() {
        let converted = converter().convert("");
        assert_eq!(converted.source, ContentSource::Fallback);
        assert_eq!(converted.document.plain_text(), " ");

        let converted = converter().convert("<!-- only a comment -->");
        assert_eq!(converted.source, ContentSource::Fallback);
        assert_eq!(converted.document.plain_text(), "<!-- only a comment -->");
    }

    #[test]
    fn fallback_is_truncated_by_chars() {
        let options = ConverterOptions {
            fallback_chars: 3,
            ..Default::default()
        };
        let converted = Converter::new(options).convert("<!-- ああああ -->");
        assert_eq!(converted.document.plain_text(), "<!-");
    }

    #[test]
    fn diagram_blocks() {
        let converted = converter().convert("```mermaid\nA-->B\n```\n\n```\ngraph TD\nA-->B\n```\n\n```js\nlet a;\n```\n");
        let blocks = converted.document.blocks();
        assert!(matches!(&blocks[0], Block::Block(b) if b.block_type() == Some("mermaidDiagram")));
        assert!(matches!(&blocks[1], Block::Block(b) if b.fields["code"] == json!("graph TD\nA-->B")));
        let Block::Code(code) = &blocks[2] else {
            panic!("expected code block");
        };
        assert_eq!(code.language.as_deref(), Some("js"));
        assert_eq!(texts(&blocks[2]), vec![("let a;".to_string(), 16)]);
    }

    #[test]
    fn lists_keep_order_and_start() {
        let converted = converter().convert("3. one\n4. two\n   - deep\n");
        let Block::List(list) = &converted.document.blocks()[0] else {
            panic!("expected list");
        };
        assert_eq!(list.list_type, ListType::Number);
        assert_eq!(list.tag, ListTag::Ol);
        assert_eq!(list.start, 3);
        assert_eq!(list.children.len(), 3);
        let Block::ListItem(deep) = &list.children[2] else {
            panic!("expected list item");
        };
        assert_eq!(deep.indent, 1);
        assert_eq!(deep.value, 1);
    }

    #[test]
    fn list_continuation_blocks_keep_formatting() {
        let converted =
            converter().convert("3. first\n\n   > **bold** quote\n\n4. second\n\n   ## *Sub* head\n");
        let Block::List(list) = &converted.document.blocks()[0] else {
            panic!("expected list");
        };
        let values = list
            .children
            .iter()
            .map(|item| match item {
                Block::ListItem(li) => (li.value, li.indent),
                _ => panic!("expected list item"),
            })
            .collect::<Vec<_>>();
        assert_eq!(values, vec![(3, 0), (3, 1), (4, 0), (4, 1)]);
        assert_eq!(
            texts(&list.children[1]),
            vec![("bold".to_string(), 1), (" quote".to_string(), 0)]
        );
        assert_eq!(
            texts(&list.children[3]),
            vec![("Sub".to_string(), 2), (" head".to_string(), 0)]
        );
    }

    #[test]
    fn tables_mark_header_row() {
        let converted = converter().convert("| a | b |\n|---|---|\n| 1 | 2 |\n");
        let Block::Table(table) = &converted.document.blocks()[0] else {
            panic!("expected table");
        };
        let states = table
            .children
            .iter()
            .map(|row| {
                let Block::TableRow(row) = row else {
                    panic!("expected row")
                };
                row.children
                    .iter()
                    .map(|cell| match cell {
                        Block::TableCell(cell) => cell.header_state,
                        _ => panic!("expected cell"),
                    })
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        assert_eq!(
            states,
            vec![
                vec![HeaderState::Header, HeaderState::Header],
                vec![HeaderState::Normal, HeaderState::Normal]
            ]
        );
    }

    #[test]
    fn links_flatten_by_default() {
        let converted = converter().convert("see [**the** docs](https://example.com)");
        assert_eq!(
            texts(&converted.document.blocks()[0]),
            vec![
                ("see ".to_string(), 0),
                ("the".to_string(), 1),
                (" docs".to_string(), 0)
            ]
        );

        let keep = Converter::new(ConverterOptions {
            link_mode: LinkMode::Keep,
            ..Default::default()
        });
        let converted = keep.convert("see [docs](https://example.com)");
        assert_eq!(converted.document.link_count(), 1);
    }

    #[test]
    fn images_without_upload_become_italic_text() {
        let converted = converter().convert("![](https://example.com/a.png)");
        assert_eq!(
            texts(&converted.document.blocks()[0]),
            vec![("![Image](https://example.com/a.png)".to_string(), 2)]
        );
    }

    #[tokio::test]
    async fn images_upload_or_fall_back() {
        let converter = Converter::new(ConverterOptions {
            upload_images: true,
            ..Default::default()
        });
        let converted = converter
            .convert_uploading(
                "![ok](https://example.com/a.png)\n\n![gone](https://example.com/broken.png)\n",
                &FakeUploader,
            )
            .await;
        let blocks = converted.document.blocks();
        assert!(matches!(&blocks[0], Block::Upload(upload) if upload.value == json!({"id": "media-1"})));
        assert_eq!(
            texts(&blocks[1]),
            vec![("![gone](https://example.com/broken.png)".to_string(), 2)]
        );
    }

    #[test]
    fn html_blocks() {
        let converted = converter().convert("<div>hello</div>\n\n<!-- note -->\n\ntext\n");
        assert_eq!(converted.document.blocks().len(), 2);
        assert_eq!(converted.document.plain_text(), "<div>hello</div>\ntext");
    }

    #[test]
    fn direction_by_language() {
        assert_eq!(direction_for("ar"), Some(Direction::Rtl));
        assert_eq!(direction_for("Hebrew"), Some(Direction::Rtl));
        assert_eq!(direction_for("japanese"), None);
        assert_eq!(direction_for("en"), Some(Direction::Ltr));

        let mut converted = converter().convert("hello").document;
        apply_language_direction(&mut converted, "ja");
        let Block::Paragraph(p) = &converted.blocks()[0] else {
            panic!("expected paragraph");
        };
        assert_eq!(p.direction, None);
        assert_eq!(converted.root.direction, None);
    }
}
