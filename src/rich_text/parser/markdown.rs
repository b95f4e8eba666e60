use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Tag, TagEnd};

use crate::rich_text::{
    TextFormat,
    parser::{MdBlock, MdInline, MdItem, text_content},
};

#[derive(Default)]
pub struct MarkdownParser {}

impl MarkdownParser {
    pub fn new() -> MarkdownParser {
        MarkdownParser {}
    }

    pub fn parse(&self, src: &str) -> Vec<MdBlock> {
        let options =
            Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH | Options::ENABLE_TASKLISTS;
        let mut parser = ParserImpl {
            parser: pulldown_cmark::Parser::new_ext(src, options),
            lookahead: Vec::new(),
        };
        let mut blocks = Vec::new();
        while let Some(event) = parser.next_event() {
            blocks.extend(parse_block(&mut parser, event));
        }
        blocks
    }
}

struct ParserImpl<'src> {
    parser: pulldown_cmark::Parser<'src>,
    lookahead: Vec<Event<'src>>,
}

impl<'src> ParserImpl<'src> {
    fn next_event(&mut self) -> Option<Event<'src>> {
        if let Some(event) = self.lookahead.pop() {
            return Some(event);
        }
        self.parser.next()
    }

    fn return_event(&mut self, event: Event<'src>) {
        self.lookahead.push(event);
    }
}

fn is_end<'src>(tag: &Tag<'src>, event: &Event<'src>) -> bool {
    matches!(
        (tag, event),
        (Tag::BlockQuote(_), Event::End(TagEnd::BlockQuote(_)))
            | (Tag::CodeBlock(_), Event::End(TagEnd::CodeBlock))
            | (Tag::DefinitionList, Event::End(TagEnd::DefinitionList))
            | (
                Tag::DefinitionListDefinition,
                Event::End(TagEnd::DefinitionListDefinition)
            )
            | (
                Tag::DefinitionListTitle,
                Event::End(TagEnd::DefinitionListTitle)
            )
            | (Tag::Emphasis, Event::End(TagEnd::Emphasis))
            | (
                Tag::FootnoteDefinition(_),
                Event::End(TagEnd::FootnoteDefinition)
            )
            | (Tag::Heading { .. }, Event::End(TagEnd::Heading(_)))
            | (Tag::HtmlBlock, Event::End(TagEnd::HtmlBlock))
            | (Tag::Image { .. }, Event::End(TagEnd::Image))
            | (Tag::Item, Event::End(TagEnd::Item))
            | (Tag::Link { .. }, Event::End(TagEnd::Link))
            | (Tag::List(_), Event::End(TagEnd::List(_)))
            | (Tag::MetadataBlock(_), Event::End(TagEnd::MetadataBlock(_)))
            | (Tag::Paragraph, Event::End(TagEnd::Paragraph))
            | (Tag::Strikethrough, Event::End(TagEnd::Strikethrough))
            | (Tag::Strong, Event::End(TagEnd::Strong))
            | (Tag::Subscript, Event::End(TagEnd::Subscript))
            | (Tag::Superscript, Event::End(TagEnd::Superscript))
            | (Tag::Table(_), Event::End(TagEnd::Table))
            | (Tag::TableCell, Event::End(TagEnd::TableCell))
            | (Tag::TableHead, Event::End(TagEnd::TableHead))
            | (Tag::TableRow, Event::End(TagEnd::TableRow))
    )
}

/// Consume events up to and including the end of `tag`.
fn skip_spanned<'src>(parser: &mut ParserImpl<'src>, tag: &Tag<'src>) {
    let mut depth = 0usize;
    while let Some(event) = parser.next_event() {
        match &event {
            Event::Start(_) => depth += 1,
            Event::End(_) if depth > 0 => depth -= 1,
            _ if is_end(tag, &event) => return,
            _ => {}
        }
    }
}

fn push_text(out: &mut Vec<MdInline>, text: CowStr<'_>, format: TextFormat) {
    if text.is_empty() {
        return;
    }
    out.push(MdInline::Text {
        text: text.into_string(),
        format,
    });
}

fn parse_inlines<'src>(
    parser: &mut ParserImpl<'src>,
    tag: &Tag<'src>,
    format: TextFormat,
) -> Vec<MdInline> {
    let mut out = Vec::new();
    while let Some(event) = parser.next_event() {
        if is_end(tag, &event) {
            break;
        }
        parse_inline(parser, event, format, &mut out);
    }
    out
}

fn parse_inline<'src>(
    parser: &mut ParserImpl<'src>,
    event: Event<'src>,
    format: TextFormat,
    out: &mut Vec<MdInline>,
) {
    match event {
        Event::Text(text) => push_text(out, text, format),
        Event::Code(code) => push_text(out, code, format | TextFormat::CODE),
        Event::InlineMath(math) | Event::DisplayMath(math) => push_text(out, math, format),
        Event::SoftBreak | Event::HardBreak => push_text(out, "\n".into(), format),
        Event::InlineHtml(_)
        | Event::Html(_)
        | Event::FootnoteReference(_)
        | Event::TaskListMarker(_)
        | Event::Rule
        | Event::End(_) => {}
        Event::Start(tag) => match &tag {
            Tag::Emphasis => out.extend(parse_inlines(parser, &tag, format | TextFormat::ITALIC)),
            Tag::Strong => out.extend(parse_inlines(parser, &tag, format | TextFormat::BOLD)),
            Tag::Strikethrough => out.extend(parse_inlines(
                parser,
                &tag,
                format | TextFormat::STRIKETHROUGH,
            )),
            Tag::Link { dest_url, .. } => {
                let url = dest_url.to_string();
                let children = parse_inlines(parser, &tag, format);
                out.push(MdInline::Link { url, children });
            }
            Tag::Image { dest_url, .. } => {
                let url = dest_url.to_string();
                let alt = text_content(&parse_inlines(parser, &tag, TextFormat::PLAIN));
                out.push(MdInline::Image { url, alt, format });
            }
            _ => out.extend(parse_inlines(parser, &tag, format)),
        },
    }
}

fn paragraph_or_image(inlines: Vec<MdInline>) -> MdBlock {
    let mut visible = inlines.iter().filter(|inline| !inline.is_blank());
    if let (Some(MdInline::Image { url, alt, .. }), None) = (visible.next(), visible.next()) {
        return MdBlock::Image {
            url: url.clone(),
            alt: alt.clone(),
        };
    }
    MdBlock::Paragraph(inlines)
}

fn parse_children<'src>(parser: &mut ParserImpl<'src>, tag: &Tag<'src>) -> Vec<MdBlock> {
    let mut children = Vec::new();
    while let Some(event) = parser.next_event() {
        if is_end(tag, &event) {
            break;
        }
        children.extend(parse_block(parser, event));
    }
    children
}

fn parse_item<'src>(parser: &mut ParserImpl<'src>) -> MdItem {
    let mut item = MdItem::default();
    while let Some(event) = parser.next_event() {
        if is_end(&Tag::Item, &event) {
            break;
        }
        match event {
            Event::TaskListMarker(checked) => item.checked = Some(checked),
            Event::Start(Tag::Paragraph) => {
                if !item.inlines.is_empty() {
                    push_text(&mut item.inlines, "\n".into(), TextFormat::PLAIN);
                }
                item.inlines
                    .extend(parse_inlines(parser, &Tag::Paragraph, TextFormat::PLAIN));
            }
            Event::Start(
                tag @ (Tag::List(_)
                | Tag::BlockQuote(_)
                | Tag::CodeBlock(_)
                | Tag::Table(_)
                | Tag::HtmlBlock
                | Tag::Heading { .. }),
            ) => {
                item.children
                    .extend(parse_block(parser, Event::Start(tag)));
            }
            event => parse_inline(parser, event, TextFormat::PLAIN, &mut item.inlines),
        }
    }
    item
}

fn parse_table<'src>(parser: &mut ParserImpl<'src>, tag: &Tag<'src>) -> MdBlock {
    let mut rows = Vec::new();
    while let Some(event) = parser.next_event() {
        if is_end(tag, &event) {
            break;
        }
        if let Event::Start(row @ (Tag::TableHead | Tag::TableRow)) = event {
            let mut cells = Vec::new();
            while let Some(event) = parser.next_event() {
                if is_end(&row, &event) {
                    break;
                }
                if let Event::Start(Tag::TableCell) = event {
                    cells.push(parse_inlines(parser, &Tag::TableCell, TextFormat::PLAIN));
                }
            }
            rows.push(cells);
        }
    }
    MdBlock::Table { rows }
}

fn collect_raw<'src>(parser: &mut ParserImpl<'src>, tag: &Tag<'src>) -> String {
    let mut raw = String::new();
    while let Some(event) = parser.next_event() {
        if is_end(tag, &event) {
            break;
        }
        if let Event::Text(text) | Event::Html(text) = event {
            raw.push_str(&text);
        }
    }
    raw
}

fn parse_block<'src>(parser: &mut ParserImpl<'src>, event: Event<'src>) -> Option<MdBlock> {
    match event {
        Event::Start(tag) => match tag {
            Tag::Paragraph => Some(paragraph_or_image(parse_inlines(
                parser,
                &Tag::Paragraph,
                TextFormat::PLAIN,
            ))),
            Tag::Heading { level, .. } => {
                let inlines = parse_inlines(parser, &tag, TextFormat::PLAIN);
                Some(MdBlock::Heading { level, inlines })
            }
            Tag::BlockQuote(_) => Some(MdBlock::Quote(parse_children(parser, &tag))),
            Tag::CodeBlock(ref kind) => {
                let lang = match kind {
                    CodeBlockKind::Fenced(info) => info
                        .split_whitespace()
                        .next()
                        .map(|lang| lang.to_string()),
                    CodeBlockKind::Indented => None,
                };
                let mut source = collect_raw(parser, &tag);
                if source.ends_with('\n') {
                    source.pop();
                }
                Some(MdBlock::Code { lang, source })
            }
            Tag::List(start) => {
                let mut items = Vec::new();
                while let Some(event) = parser.next_event() {
                    if is_end(&tag, &event) {
                        break;
                    }
                    if let Event::Start(Tag::Item) = event {
                        items.push(parse_item(parser));
                    }
                }
                Some(MdBlock::List { start, items })
            }
            Tag::Table(_) => Some(parse_table(parser, &tag)),
            Tag::HtmlBlock => Some(MdBlock::Html(collect_raw(parser, &tag))),
            _ => {
                skip_spanned(parser, &tag);
                None
            }
        },
        Event::Html(html) => Some(MdBlock::Html(html.into_string())),
        Event::Text(_) | Event::Code(_) | Event::InlineHtml(_) => {
            parser.return_event(event);
            let mut inlines = Vec::new();
            while let Some(event) = parser.next_event() {
                if matches!(event, Event::Start(_) | Event::End(_)) {
                    parser.return_event(event);
                    break;
                }
                parse_inline(parser, event, TextFormat::PLAIN, &mut inlines);
            }
            Some(MdBlock::Paragraph(inlines))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use pulldown_cmark::HeadingLevel;

    use super::*;

    fn text(text: &str, format: TextFormat) -> MdInline {
        MdInline::Text {
            text: text.into(),
            format,
        }
    }

    #[test]
    fn inline_marks() {
        let blocks = MarkdownParser::new().parse("**bold** and *italic* `code` ***both***");
        assert_eq!(
            blocks,
            vec![MdBlock::Paragraph(vec![
                text("bold", TextFormat::BOLD),
                text(" and ", TextFormat::PLAIN),
                text("italic", TextFormat::ITALIC),
                text(" ", TextFormat::PLAIN),
                text("code", TextFormat::CODE),
                text(" ", TextFormat::PLAIN),
                text("both", TextFormat::BOLD | TextFormat::ITALIC),
            ])]
        );
    }

    #[test]
    fn headings_and_code() {
        let blocks = MarkdownParser::new().parse("## Title\n\n```rust\nfn main() {}\n```\n");
        assert_eq!(
            blocks,
            vec![
                MdBlock::Heading {
                    level: HeadingLevel::H2,
                    inlines: vec![text("Title", TextFormat::PLAIN)],
                },
                MdBlock::Code {
                    lang: Some("rust".into()),
                    source: "fn main() {}".into(),
                },
            ]
        );
    }

    #[test]
    fn standalone_image_is_a_block() {
        let blocks = MarkdownParser::new().parse("![a cat](https://example.com/cat.png)\n");
        assert_eq!(
            blocks,
            vec![MdBlock::Image {
                url: "https://example.com/cat.png".into(),
                alt: "a cat".into(),
            }]
        );
    }

    #[test]
    fn tight_and_task_lists() {
        let blocks = MarkdownParser::new().parse("3. one\n4. two\n   - nested\n\n");
        let MdBlock::List { start, items } = &blocks[0] else {
            panic!("expected list, got {blocks:?}");
        };
        assert_eq!(*start, Some(3));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].inlines, vec![text("one", TextFormat::PLAIN)]);
        assert!(matches!(items[1].children[0], MdBlock::List { start: None, .. }));

        let blocks = MarkdownParser::new().parse("- [x] done\n- [ ] todo\n");
        let MdBlock::List { items, .. } = &blocks[0] else {
            panic!("expected list, got {blocks:?}");
        };
        assert_eq!(items[0].checked, Some(true));
        assert_eq!(items[1].checked, Some(false));
    }

    #[test]
    fn table_rows() {
        let blocks = MarkdownParser::new().parse("| a | b |\n|---|---|\n| 1 | **2** |\n");
        assert_eq!(
            blocks,
            vec![MdBlock::Table {
                rows: vec![
                    vec![
                        vec![text("a", TextFormat::PLAIN)],
                        vec![text("b", TextFormat::PLAIN)]
                    ],
                    vec![
                        vec![text("1", TextFormat::PLAIN)],
                        vec![text("2", TextFormat::BOLD)]
                    ],
                ]
            }]
        );
    }

    #[test]
    fn links_keep_their_children() {
        let blocks = MarkdownParser::new().parse("see [the *docs*](https://example.com)");
        assert_eq!(
            blocks,
            vec![MdBlock::Paragraph(vec![
                text("see ", TextFormat::PLAIN),
                MdInline::Link {
                    url: "https://example.com".into(),
                    children: vec![
                        text("the ", TextFormat::PLAIN),
                        text("docs", TextFormat::ITALIC)
                    ],
                },
            ])]
        );
    }
}
