//! Maintenance passes over already-linked trees. Every pass is idempotent:
//! running it twice leaves the same tree as running it once.

use std::collections::HashSet;

use regex::Regex;

use crate::rich_text::{Block, Document, Inline, Link, visit::merge_text_runs};

fn normalize(text: &str, marker: &str) -> String {
    let text = text.trim_start();
    let text = text
        .strip_prefix(marker)
        .or_else(|| text.strip_prefix(marker.trim()))
        .unwrap_or(text);
    text.trim().to_lowercase()
}

/// Replace a link by its children with the marker prefix removed.
fn unwrap_link(link: Link, marker: &str) -> Vec<Inline> {
    let mut children = link.children;
    if let Some(Inline::Text(first)) = children.first_mut() {
        let trimmed = first.text.trim_start();
        let stripped = trimmed
            .strip_prefix(marker)
            .or_else(|| trimmed.strip_prefix(marker.trim()).map(str::trim_start));
        if let Some(stripped) = stripped {
            first.text = stripped.to_string();
        }
    }
    children.retain(|child| !matches!(child, Inline::Text(t) if t.text.is_empty()));
    children
}

/// Rewrite the inline children of every text block, in document order.
/// `f` returns how many links it unwrapped; blocks it touched get their
/// text runs merged.
fn rewrite_inlines(blocks: &mut [Block], f: &mut impl FnMut(&mut Vec<Inline>) -> usize) -> usize {
    let mut total = 0;
    for block in blocks {
        if let Some(inlines) = block.inlines_mut() {
            let changed = f(inlines);
            if changed > 0 {
                *inlines = merge_text_runs(std::mem::take(inlines));
            }
            total += changed;
        }
        if let Some(children) = block.blocks_mut() {
            total += rewrite_inlines(children, f);
        }
    }
    total
}

fn unwrap_where(
    inlines: &mut Vec<Inline>,
    marker: &str,
    mut should_unwrap: impl FnMut(&Link) -> bool,
) -> usize {
    let mut unwrapped = 0;
    let mut out = Vec::with_capacity(inlines.len());
    for inline in std::mem::take(inlines) {
        match inline {
            Inline::Link(link) if should_unwrap(&link) => {
                unwrapped += 1;
                out.extend(unwrap_link(link, marker));
            }
            other => out.push(other),
        }
    }
    *inlines = out;
    unwrapped
}

/// Keep the first link for each display text and unwrap the rest.
/// Returns the number of links converted to text.
pub fn dedupe_links(document: &mut Document, marker: &str) -> usize {
    let mut seen = HashSet::new();
    rewrite_inlines(&mut document.root.children, &mut |inlines| {
        unwrap_where(inlines, marker, |link| {
            let text = link.children.iter().map(Inline::plain_text).collect::<String>();
            let key = normalize(&text, marker);
            !key.is_empty() && !seen.insert(key)
        })
    })
}

/// Unwrap every link whose `rel` contains `sponsored`.
pub fn remove_sponsored_links(document: &mut Document, marker: &str) -> usize {
    rewrite_inlines(&mut document.root.children, &mut |inlines| {
        unwrap_where(inlines, marker, |link| link.fields.is_sponsored())
    })
}

fn drop_listings(blocks: &mut Vec<Block>, rules: &[Regex]) -> usize {
    let mut removed = 0;
    blocks.retain_mut(|block| match block {
        Block::Paragraph(_) => {
            let text = block.plain_text();
            let listing = rules.iter().any(|rule| rule.is_match(text.trim()));
            if listing {
                removed += 1;
            }
            !listing
        }
        Block::Quote(quote) => {
            removed += drop_listings(&mut quote.children, rules);
            !quote.children.is_empty()
        }
        _ => true,
    });
    removed
}

/// Drop paragraphs (top level or quoted) whose text matches any rule.
/// Quotes left without children are dropped as well.
pub fn remove_product_listings(document: &mut Document, rules: &[Regex]) -> usize {
    if rules.is_empty() {
        return 0;
    }
    drop_listings(&mut document.root.children, rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        linking::{Catalog, CatalogEntry, LinkInjector, LinkingOptions, default_listing_rules},
        rich_text::{LinkFields, LinkType, Paragraph, Quote, Text, TextFormat},
    };

    const MARKER: &str = "🛒 ";

    fn sponsored(text: &str) -> Inline {
        Inline::Link(Link::new(
            LinkFields {
                url: Some("https://shop.example/driver".into()),
                new_tab: true,
                link_type: LinkType::Custom,
                rel: Some("sponsored nofollow noopener".into()),
                doc: None,
                extra: Default::default(),
            },
            Text::new(format!("{MARKER}{text}"), TextFormat::PLAIN),
        ))
    }

    fn plain(text: &str) -> Inline {
        Inline::text(text, TextFormat::PLAIN)
    }

    fn para(children: Vec<Inline>) -> Block {
        Block::Paragraph(Paragraph::new(children))
    }

    #[test]
    fn dedupe_keeps_first_of_three() {
        let mut doc = Document::new(vec![
            para(vec![plain("a "), sponsored("Driver"), plain(" b")]),
            para(vec![sponsored("driver ")]),
            Block::Quote(Quote::new(vec![para(vec![plain("c "), sponsored("DRIVER")])])),
        ]);
        assert_eq!(dedupe_links(&mut doc, MARKER), 2);
        assert_eq!(doc.link_count(), 1);
        assert_eq!(doc.root.children[0].link_count(), 1);
        assert_eq!(doc.root.children[1].inlines().unwrap(), &vec![plain("driver ")]);
        let Block::Quote(quote) = &doc.root.children[2] else {
            panic!("quote expected");
        };
        assert_eq!(quote.children[0].inlines().unwrap(), &vec![plain("c DRIVER")]);
        assert!(doc.defects().is_empty());

        let once = doc.clone();
        assert_eq!(dedupe_links(&mut doc, MARKER), 0);
        assert_eq!(doc, once);
    }

    #[test]
    fn removal_is_idempotent() {
        let mut doc = Document::new(vec![para(vec![
            plain("Buy a "),
            sponsored("driver"),
            plain(" today"),
        ])]);
        assert_eq!(remove_sponsored_links(&mut doc, MARKER), 1);
        assert_eq!(doc.root.children[0].inlines().unwrap(), &vec![plain("Buy a driver today")]);
        let once = doc.clone();
        assert_eq!(remove_sponsored_links(&mut doc, MARKER), 0);
        assert_eq!(doc, once);
    }

    #[test]
    fn clean_then_inject_is_stable() {
        let catalog = Catalog::new(vec![CatalogEntry::affiliate(
            "p1",
            "Driver",
            vec!["driver".into()],
            "https://shop.example/driver",
        )]);
        let options = LinkingOptions::default();
        let injector = LinkInjector::new(&catalog, &options);
        let original = Document::new(vec![para(vec![plain("Buy a driver today")])]);
        let first = injector.inject(&original).document;

        let mut cleaned = first.clone();
        remove_sponsored_links(&mut cleaned, &options.marker);
        assert_eq!(cleaned, original);
        assert_eq!(injector.inject(&cleaned).document, first);
    }

    #[test]
    fn internal_links_survive_removal() {
        let internal = Inline::Link(Link::new(
            LinkFields {
                url: None,
                new_tab: false,
                link_type: LinkType::Internal,
                rel: None,
                doc: None,
                extra: Default::default(),
            },
            Text::new("grip basics", TextFormat::PLAIN),
        ));
        let mut doc = Document::new(vec![para(vec![internal])]);
        assert_eq!(remove_sponsored_links(&mut doc, MARKER), 0);
        assert_eq!(doc.link_count(), 1);
    }

    #[test]
    fn listing_paragraphs_are_dropped() {
        let rules = default_listing_rules()
            .iter()
            .map(|rule| Regex::new(rule).unwrap())
            .collect::<Vec<_>>();
        let mut doc = Document::new(vec![
            para(vec![plain("練習の前にストレッチ")]),
            para(vec![plain("▶ おすすめドライバー")]),
            para(vec![plain("価格: 3,980円")]),
            Block::Quote(Quote::new(vec![para(vec![plain("詳細を見る →")])])),
        ]);
        assert_eq!(remove_product_listings(&mut doc, &rules), 3);
        assert_eq!(doc.root.children.len(), 1);
        assert_eq!(remove_product_listings(&mut doc, &rules), 0);
    }
}
