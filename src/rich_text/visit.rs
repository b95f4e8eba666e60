//! Tree walking helpers.
//!
//! Every predicate here is an exhaustive match over [`Block`] / [`Inline`],
//! so adding a node kind forces a decision at each call site.

use serde_json::Value;

use super::{Block, Direction, Document, Inline, Text};

impl Block {
    pub fn is_heading(&self) -> bool {
        matches!(self, Block::Heading(_))
    }

    /// Inline children of blocks that hold text directly.
    pub fn inlines(&self) -> Option<&Vec<Inline>> {
        match self {
            Block::Paragraph(p) => Some(&p.children),
            Block::Heading(h) => Some(&h.children),
            Block::ListItem(li) => Some(&li.children),
            Block::TableCell(td) => Some(&td.children),
            Block::Code(code) => Some(&code.children),
            Block::List(_)
            | Block::Quote(_)
            | Block::Table(_)
            | Block::TableRow(_)
            | Block::Upload(_)
            | Block::Block(_)
            | Block::Other(_) => None,
        }
    }

    pub fn inlines_mut(&mut self) -> Option<&mut Vec<Inline>> {
        match self {
            Block::Paragraph(p) => Some(&mut p.children),
            Block::Heading(h) => Some(&mut h.children),
            Block::ListItem(li) => Some(&mut li.children),
            Block::TableCell(td) => Some(&mut td.children),
            Block::Code(code) => Some(&mut code.children),
            Block::List(_)
            | Block::Quote(_)
            | Block::Table(_)
            | Block::TableRow(_)
            | Block::Upload(_)
            | Block::Block(_)
            | Block::Other(_) => None,
        }
    }

    /// Nested blocks of container nodes.
    pub fn blocks(&self) -> Option<&Vec<Block>> {
        match self {
            Block::List(list) => Some(&list.children),
            Block::Quote(quote) => Some(&quote.children),
            Block::Table(table) => Some(&table.children),
            Block::TableRow(row) => Some(&row.children),
            Block::Paragraph(_)
            | Block::Heading(_)
            | Block::ListItem(_)
            | Block::TableCell(_)
            | Block::Code(_)
            | Block::Upload(_)
            | Block::Block(_)
            | Block::Other(_) => None,
        }
    }

    pub fn blocks_mut(&mut self) -> Option<&mut Vec<Block>> {
        match self {
            Block::List(list) => Some(&mut list.children),
            Block::Quote(quote) => Some(&mut quote.children),
            Block::Table(table) => Some(&mut table.children),
            Block::TableRow(row) => Some(&mut row.children),
            Block::Paragraph(_)
            | Block::Heading(_)
            | Block::ListItem(_)
            | Block::TableCell(_)
            | Block::Code(_)
            | Block::Upload(_)
            | Block::Block(_)
            | Block::Other(_) => None,
        }
    }

    /// Whether a link node appears anywhere below this block.
    pub fn contains_link(&self) -> bool {
        match self {
            Block::Other(raw) => raw_contains_link(raw),
            block => {
                block
                    .inlines()
                    .is_some_and(|inlines| inlines.iter().any(Inline::contains_link))
                    || block
                        .blocks()
                        .is_some_and(|blocks| blocks.iter().any(Block::contains_link))
            }
        }
    }

    pub fn link_count(&self) -> usize {
        let inline = self
            .inlines()
            .map(|inlines| inlines.iter().filter(|i| matches!(i, Inline::Link(_))).count())
            .unwrap_or(0);
        let nested = self
            .blocks()
            .map(|blocks| blocks.iter().map(Block::link_count).sum())
            .unwrap_or(0);
        inline + nested
    }

    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.write_plain_text(&mut out);
        out
    }

    fn write_plain_text(&self, out: &mut String) {
        if let Some(inlines) = self.inlines() {
            inlines.iter().for_each(|inline| inline.write_plain_text(out));
        }
        if let Some(blocks) = self.blocks() {
            for block in blocks {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                block.write_plain_text(out);
            }
        }
    }

    fn set_direction(&mut self, direction: Option<Direction>) {
        match self {
            Block::Paragraph(p) => p.direction = direction,
            Block::Heading(h) => h.direction = direction,
            Block::List(list) => list.direction = direction,
            Block::ListItem(li) => li.direction = direction,
            Block::Quote(quote) => quote.direction = direction,
            Block::Code(code) => code.direction = direction,
            Block::Table(table) => table.direction = direction,
            Block::TableRow(row) => row.direction = direction,
            Block::TableCell(td) => td.direction = direction,
            Block::Upload(_) | Block::Block(_) | Block::Other(_) => {}
        }
        if let Some(inlines) = self.inlines_mut() {
            for inline in inlines {
                if let Inline::Link(link) = inline {
                    link.direction = direction;
                }
            }
        }
        if let Some(blocks) = self.blocks_mut() {
            blocks.iter_mut().for_each(|block| block.set_direction(direction));
        }
    }

    /// Blocks with textual content that have no inline children.
    fn is_empty_text_block(&self) -> bool {
        self.inlines().is_some_and(Vec::is_empty)
    }
}

impl Inline {
    pub fn as_text(&self) -> Option<&Text> {
        match self {
            Inline::Text(text) => Some(text),
            Inline::Link(_) | Inline::Other(_) => None,
        }
    }

    pub fn contains_link(&self) -> bool {
        match self {
            Inline::Link(_) => true,
            Inline::Text(_) => false,
            Inline::Other(raw) => raw_contains_link(raw),
        }
    }

    pub fn plain_text(&self) -> String {
        let mut out = String::new();
        self.write_plain_text(&mut out);
        out
    }

    fn write_plain_text(&self, out: &mut String) {
        match self {
            Inline::Text(text) => out.push_str(&text.text),
            Inline::Link(link) => link
                .children
                .iter()
                .for_each(|child| child.write_plain_text(out)),
            Inline::Other(raw) => {
                if let Some(text) = raw.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
        }
    }
}

/// Merge adjacent text nodes that carry identical formatting.
pub fn merge_text_runs(inlines: Vec<Inline>) -> Vec<Inline> {
    let mut out: Vec<Inline> = Vec::with_capacity(inlines.len());
    for inline in inlines {
        if let (Some(Inline::Text(last)), Inline::Text(next)) = (out.last_mut(), &inline) {
            if last.format == next.format
                && last.mode == next.mode
                && last.style == next.style
                && last.extra == next.extra
            {
                last.text.push_str(&next.text);
                continue;
            }
        }
        out.push(inline);
    }
    out
}

fn raw_contains_link(raw: &Value) -> bool {
    match raw {
        Value::Object(map) => {
            map.get("type").and_then(Value::as_str) == Some("link")
                || map.values().any(raw_contains_link)
        }
        Value::Array(items) => items.iter().any(raw_contains_link),
        _ => false,
    }
}

fn walk<'a>(blocks: &'a [Block], f: &mut impl FnMut(&'a Block)) {
    for block in blocks {
        f(block);
        if let Some(children) = block.blocks() {
            walk(children, f);
        }
    }
}

impl Document {
    /// Visit every block in document order (pre-order).
    pub fn visit_blocks<'a>(&'a self, mut f: impl FnMut(&'a Block)) {
        walk(&self.root.children, &mut f);
    }

    pub fn link_count(&self) -> usize {
        self.root.children.iter().map(Block::link_count).sum()
    }

    pub fn plain_text(&self) -> String {
        self.root
            .children
            .iter()
            .map(Block::plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Set the text direction on the root and every element below it.
    pub fn set_direction(&mut self, direction: Option<Direction>) {
        self.root.direction = direction;
        self.root
            .children
            .iter_mut()
            .for_each(|block| block.set_direction(direction));
    }

    /// Structural problems: blocks with empty children and nested links.
    pub fn defects(&self) -> Vec<String> {
        let mut defects = Vec::new();
        self.visit_blocks(|block| {
            if block.is_empty_text_block() {
                defects.push(format!("empty block: {block:?}"));
            }
            for inline in block.inlines().into_iter().flatten() {
                let Inline::Link(link) = inline else {
                    continue;
                };
                if link.children.iter().any(Inline::contains_link) {
                    defects.push("nested link".to_string());
                }
            }
        });
        defects
    }
}
