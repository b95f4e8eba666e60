use std::collections::HashSet;

use tracing::debug;

use crate::{
    linking::{Catalog, CatalogEntry, EntryKind, LinkLimits, LinkingOptions},
    rich_text::{
        Block, DocReference, Document, Inline, Link, LinkFields, LinkType, Text, TextFormat,
    },
};

struct Phrase {
    entry: usize,
    folded: Vec<char>,
    key: String,
    cjk: bool,
}

/// Result of one injection pass.
#[derive(Debug, Clone)]
pub struct Injection {
    pub document: Document,
    pub links_added: usize,
    /// `(entry id, matched text)` in the order links were created.
    pub linked: Vec<(String, String)>,
}

pub struct LinkInjector<'a> {
    catalog: &'a Catalog,
    options: &'a LinkingOptions,
    limits: LinkLimits,
    phrases: Vec<Phrase>,
}

fn fold(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}

fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{FF66}'..='\u{FF9F}')
}

struct Pass {
    used_phrases: HashSet<String>,
    used_entries: HashSet<usize>,
    used_targets: HashSet<String>,
    links_added: usize,
    linked: Vec<(String, String)>,
}

struct Match {
    phrase: usize,
    start: usize,
    len: usize,
}

impl<'a> LinkInjector<'a> {
    pub fn new(catalog: &'a Catalog, options: &'a LinkingOptions) -> Self {
        let phrases = catalog
            .active()
            .flat_map(|(entry, e)| {
                e.anchor_phrases.iter().filter_map(move |phrase| {
                    let phrase = phrase.trim();
                    if phrase.chars().count() < 2 {
                        return None;
                    }
                    let folded = phrase.chars().map(fold).collect::<Vec<_>>();
                    Some(Phrase {
                        entry,
                        key: folded.iter().collect(),
                        cjk: folded.iter().copied().any(is_cjk),
                        folded,
                    })
                })
            })
            .collect();
        Self {
            catalog,
            options,
            limits: options.limits(),
            phrases,
        }
    }

    pub fn with_limits(mut self, limits: LinkLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Inject links into a copy of `document`.
    pub fn inject(&self, document: &Document) -> Injection {
        let mut document = document.clone();
        let mut pass = Pass {
            used_phrases: HashSet::new(),
            used_entries: HashSet::new(),
            used_targets: HashSet::new(),
            links_added: 0,
            linked: Vec::new(),
        };
        for block in &mut document.root.children {
            if self.document_full(&pass) {
                break;
            }
            let mut block_links = 0;
            self.visit(block, &mut block_links, &mut pass);
        }
        debug!(links_added = pass.links_added, "link injection finished");
        Injection {
            document,
            links_added: pass.links_added,
            linked: pass.linked,
        }
    }

    fn document_full(&self, pass: &Pass) -> bool {
        pass.links_added >= self.limits.max_links_per_document
    }

    /// `block_links` is shared by everything under one top-level block.
    fn visit(&self, block: &mut Block, block_links: &mut usize, pass: &mut Pass) {
        if block.contains_link() {
            return;
        }
        match block {
            Block::Paragraph(_) | Block::ListItem(_) | Block::TableCell(_) => {
                if let Some(inlines) = block.inlines_mut() {
                    self.rewrite_inlines(inlines, block_links, pass);
                }
            }
            Block::List(_) | Block::Quote(_) | Block::Table(_) | Block::TableRow(_) => {
                for child in block.blocks_mut().into_iter().flatten() {
                    if self.document_full(pass) || self.block_full(*block_links) {
                        break;
                    }
                    self.visit(child, block_links, pass);
                }
            }
            Block::Heading(_)
            | Block::Code(_)
            | Block::Upload(_)
            | Block::Block(_)
            | Block::Other(_) => {}
        }
    }

    fn rewrite_inlines(&self, inlines: &mut Vec<Inline>, block_links: &mut usize, pass: &mut Pass) {
        let mut out = Vec::with_capacity(inlines.len());
        for inline in std::mem::take(inlines) {
            match inline {
                Inline::Text(text) if self.matchable(&text) => {
                    self.split_text(text, &mut out, block_links, pass)
                }
                other => out.push(other),
            }
        }
        *inlines = out;
    }

    fn matchable(&self, text: &Text) -> bool {
        !text.format.contains(TextFormat::CODE) && !text.text.trim_start().starts_with("![")
    }

    fn block_full(&self, block_links: usize) -> bool {
        self.limits
            .max_links_per_block
            .is_some_and(|max| block_links >= max)
    }

    fn split_text(
        &self,
        text: Text,
        out: &mut Vec<Inline>,
        block_links: &mut usize,
        pass: &mut Pass,
    ) {
        let chars = text.text.chars().collect::<Vec<_>>();
        let folded = chars.iter().copied().map(fold).collect::<Vec<_>>();
        let mut cursor = 0;
        let mut emitted = 0;
        while !self.document_full(pass) && !self.block_full(*block_links) {
            let Some(found) = self.next_match(&folded, &chars, cursor, pass) else {
                break;
            };
            if found.start > emitted {
                out.push(Inline::Text(with_text(
                    &text,
                    chars[emitted..found.start].iter().collect(),
                )));
            }
            let matched = chars[found.start..found.start + found.len]
                .iter()
                .collect::<String>();
            let phrase = &self.phrases[found.phrase];
            let entry = &self.catalog.entries[phrase.entry];
            out.push(Inline::Link(self.link_for(entry, &text, &matched)));
            pass.used_phrases.insert(phrase.key.clone());
            pass.used_entries.insert(phrase.entry);
            pass.used_targets.insert(entry.target_url.clone());
            pass.links_added += 1;
            pass.linked.push((entry.id.clone(), matched));
            *block_links += 1;
            cursor = found.start + found.len;
            emitted = cursor;
        }
        if emitted == 0 {
            out.push(Inline::Text(text));
        } else if emitted < chars.len() {
            out.push(Inline::Text(with_text(
                &text,
                chars[emitted..].iter().collect(),
            )));
        }
    }

    /// Leftmost match among unused phrases; longer phrases win at the same
    /// start, then catalog order.
    fn next_match(&self, folded: &[char], chars: &[char], from: usize, pass: &Pass) -> Option<Match> {
        let mut best: Option<Match> = None;
        for (index, phrase) in self.phrases.iter().enumerate() {
            if pass.used_phrases.contains(&phrase.key)
                || pass.used_entries.contains(&phrase.entry)
                || pass
                    .used_targets
                    .contains(&self.catalog.entries[phrase.entry].target_url)
            {
                continue;
            }
            let Some(start) = self.find(folded, chars, phrase, from) else {
                continue;
            };
            let len = phrase.folded.len();
            let better = match &best {
                None => true,
                Some(best) => start < best.start || (start == best.start && len > best.len),
            };
            if better {
                best = Some(Match {
                    phrase: index,
                    start,
                    len,
                });
            }
        }
        best
    }

    fn find(&self, folded: &[char], chars: &[char], phrase: &Phrase, from: usize) -> Option<usize> {
        let len = phrase.folded.len();
        if folded.len() < len {
            return None;
        }
        (from..=folded.len() - len).find(|&start| {
            folded[start..start + len] == phrase.folded[..]
                && (!self.options.word_boundaries
                    || phrase.cjk
                    || self.at_word_boundary(chars, start, start + len))
        })
    }

    fn at_word_boundary(&self, chars: &[char], start: usize, end: usize) -> bool {
        let before = start.checked_sub(1).map(|i| chars[i]);
        let after = chars.get(end).copied();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    }

    fn link_for(&self, entry: &CatalogEntry, source: &Text, matched: &str) -> Link {
        match &entry.kind {
            EntryKind::Affiliate => Link::new(
                LinkFields {
                    url: Some(entry.target_url.clone()),
                    new_tab: true,
                    link_type: LinkType::Custom,
                    rel: Some(self.options.rel.clone()),
                    doc: None,
                    extra: Default::default(),
                },
                with_text(source, format!("{}{matched}", self.options.marker)),
            ),
            EntryKind::Internal {
                doc_id,
                relation_to,
            } => Link::new(
                LinkFields {
                    url: None,
                    new_tab: false,
                    link_type: LinkType::Internal,
                    rel: None,
                    doc: Some(DocReference {
                        value: doc_id.clone(),
                        relation_to: relation_to.clone(),
                    }),
                    extra: Default::default(),
                },
                with_text(source, matched.to_string()),
            ),
        }
    }
}

fn with_text(source: &Text, text: String) -> Text {
    Text {
        text,
        ..source.clone()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        linking::{CatalogEntry, LinkLimits},
        rich_text::{Heading, HeadingTag, List, ListItem, ListTag, ListType, Paragraph, Quote},
    };

    fn catalog(entries: &[(&str, &str)]) -> Catalog {
        Catalog::new(
            entries
                .iter()
                .map(|(id, phrase)| {
                    CatalogEntry::affiliate(
                        *id,
                        *id,
                        vec![phrase.to_string()],
                        format!("https://shop.example/{id}"),
                    )
                })
                .collect(),
        )
    }

    fn paragraph(text: &str) -> Block {
        Block::Paragraph(Paragraph::new(vec![Inline::text(text, TextFormat::PLAIN)]))
    }

    fn inlines(block: &Block) -> &Vec<Inline> {
        block.inlines().unwrap()
    }

    #[test]
    fn links_a_single_phrase() {
        let catalog = Catalog::new(vec![CatalogEntry::affiliate(
            "p1",
            "Driver",
            vec!["driver".into()],
            "https://x",
        )]);
        let options = LinkingOptions::default();
        let doc = Document::new(vec![paragraph("Buy a driver today")]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        assert_eq!(injection.links_added, 1);
        let children = inlines(&injection.document.root.children[0]);
        assert_eq!(children.len(), 3);
        assert_eq!(children[0], Inline::text("Buy a ", TextFormat::PLAIN));
        assert_eq!(children[2], Inline::text(" today", TextFormat::PLAIN));
        let Inline::Link(link) = &children[1] else {
            panic!("expected link, got {:?}", children[1]);
        };
        assert_eq!(link.fields.url.as_deref(), Some("https://x"));
        assert!(link.fields.new_tab);
        assert_eq!(link.fields.rel.as_deref(), Some("sponsored nofollow noopener"));
        assert_eq!(link.children, vec![Inline::text("🛒 driver", TextFormat::PLAIN)]);
        // the input is untouched
        assert_eq!(doc.link_count(), 0);
    }

    #[test]
    fn never_exceeds_document_cap() {
        let entries = (0..20)
            .map(|i| (format!("p{i}"), vec![format!("word{i}")]))
            .collect::<Vec<_>>();
        let catalog = Catalog::new(
            entries
                .iter()
                .map(|(id, phrases)| {
                    CatalogEntry::affiliate(id, id, phrases.clone(), format!("https://x/{id}"))
                })
                .collect(),
        );
        let text = (0..20).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ");
        let blocks = (0..5).map(|_| paragraph(&text)).collect();
        let options = LinkingOptions::default();
        let injection = LinkInjector::new(&catalog, &options)
            .with_limits(LinkLimits {
                max_links_per_document: 6,
                max_links_per_block: None,
            })
            .inject(&Document::new(blocks));
        assert_eq!(injection.links_added, 6);
        assert_eq!(injection.document.link_count(), 6);
        // front-loaded: everything lands in the first block
        assert_eq!(injection.document.root.children[0].link_count(), 6);
        assert!(injection.document.defects().is_empty());
    }

    #[test]
    fn per_block_cap_spreads_links() {
        let catalog = catalog(&[
            ("a", "alpha"),
            ("b", "beta"),
            ("c", "gamma"),
            ("d", "delta"),
        ]);
        let options = LinkingOptions::default();
        let doc = Document::new(vec![
            paragraph("alpha beta gamma"),
            paragraph("delta"),
        ]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        let blocks = &injection.document.root.children;
        assert_eq!(blocks[0].link_count(), 2);
        assert_eq!(blocks[1].link_count(), 1);
    }

    #[test]
    fn per_block_cap_covers_whole_lists() {
        let catalog = catalog(&[
            ("a", "alpha"),
            ("b", "beta"),
            ("c", "gamma"),
            ("d", "delta"),
        ]);
        let options = LinkingOptions::default();
        let items = ["alpha", "beta", "gamma"]
            .iter()
            .enumerate()
            .map(|(index, text)| {
                Block::ListItem(ListItem::new(
                    index as u32 + 1,
                    None,
                    vec![Inline::text(*text, TextFormat::PLAIN)],
                ))
            })
            .collect();
        let doc = Document::new(vec![
            Block::List(List::new(ListType::Bullet, ListTag::Ul, 1, items)),
            paragraph("delta"),
        ]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        let blocks = &injection.document.root.children;
        assert_eq!(blocks[0].link_count(), 2);
        assert_eq!(blocks[1].link_count(), 1);
        let matched = injection
            .linked
            .iter()
            .map(|(id, _)| id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(matched, vec!["a", "b", "d"]);
    }

    #[test]
    fn longest_phrase_wins_without_overlap() {
        let catalog = catalog(&[("short", "golf"), ("long", "golf club")]);
        let options = LinkingOptions::default();
        let doc = Document::new(vec![paragraph("A new golf club set")]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        assert_eq!(injection.linked, vec![("long".to_string(), "golf club".to_string())]);
        assert_eq!(injection.links_added, 1);
    }

    #[test]
    fn entries_are_used_once() {
        let catalog = Catalog::new(vec![CatalogEntry::affiliate(
            "a",
            "Grip",
            vec!["grip".into(), "grips".into()],
            "https://x",
        )]);
        let options = LinkingOptions::default();
        let doc = Document::new(vec![paragraph("grip here"), paragraph("grips there, grip")]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        assert_eq!(injection.links_added, 1);
    }

    #[test]
    fn case_insensitive_and_word_bounded() {
        let catalog = catalog(&[("a", "iron"), ("j", "スイング")]);
        let options = LinkingOptions::default();
        let doc = Document::new(vec![paragraph("Environment first, then IRON play. 正しいスイングを")]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        let matched = injection
            .linked
            .iter()
            .map(|(_, text)| text.as_str())
            .collect::<Vec<_>>();
        assert_eq!(matched, vec!["IRON", "スイング"]);
    }

    #[test]
    fn skips_headings_linked_blocks_and_code() {
        let options = LinkingOptions::default();
        let earlier = catalog(&[("z", "putter")]);
        let existing = LinkInjector::new(&earlier, &options)
            .inject(&Document::new(vec![paragraph("putter and driver")]))
            .document
            .root
            .children
            .remove(0);
        let catalog = catalog(&[("a", "driver"), ("b", "putter")]);
        let doc = Document::new(vec![
            Block::Heading(Heading::new(
                HeadingTag::H2,
                vec![Inline::text("driver", TextFormat::PLAIN)],
            )),
            existing.clone(),
            Block::Paragraph(Paragraph::new(vec![Inline::text(
                "driver",
                TextFormat::CODE,
            )])),
            Block::Quote(Quote::new(vec![paragraph("a driver in a quote")])),
        ]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        let blocks = &injection.document.root.children;
        assert_eq!(blocks[0], doc.root.children[0]);
        assert_eq!(blocks[1], existing);
        assert_eq!(blocks[2], doc.root.children[2]);
        assert_eq!(blocks[3].link_count(), 1);
    }

    #[test]
    fn internal_entries_link_to_documents() {
        let catalog = Catalog::new(vec![CatalogEntry {
            id: "4".into(),
            display_name: "Irons".into(),
            anchor_phrases: vec!["iron shots".into()],
            target_url: "/posts/iron".into(),
            active: true,
            kind: EntryKind::Internal {
                doc_id: json!(4),
                relation_to: "posts".into(),
            },
        }]);
        let options = LinkingOptions::default();
        let doc = Document::new(vec![Block::ListItem(ListItem::new(
            1,
            None,
            vec![Inline::text("Practice iron shots daily", TextFormat::BOLD)],
        ))]);
        let injection = LinkInjector::new(&catalog, &options).inject(&doc);
        let Inline::Link(link) = &inlines(&injection.document.root.children[0])[1] else {
            panic!("expected link");
        };
        assert_eq!(link.fields.link_type, LinkType::Internal);
        assert!(!link.fields.new_tab);
        assert!(link.fields.rel.is_none());
        assert_eq!(link.children, vec![Inline::text("iron shots", TextFormat::BOLD)]);
    }

    #[test]
    fn inactive_entries_are_ignored() {
        let mut catalog = catalog(&[("a", "driver")]);
        catalog.entries[0].active = false;
        let options = LinkingOptions::default();
        let injection =
            LinkInjector::new(&catalog, &options).inject(&Document::new(vec![paragraph("driver")]));
        assert_eq!(injection.links_added, 0);
    }
}
