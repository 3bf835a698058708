//! Markdown processing consumed by the page loader.

use pulldown_cmark::{html, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

/// Metadata embedded in a page as HTML comments.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageMeta {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub path: String,
}

/// A heading in the page outline.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocNode {
    pub content: String,
    pub anchor: String,
    pub level: u8,
    #[serde(default)]
    pub nodes: Vec<TocNode>,
}

pub trait Markup: Send + Sync {
    fn render(&self, markdown: &str) -> String;
    fn parse_meta(&self, markdown: &str) -> PageMeta;
    fn parse_tree(&self, markdown: &str) -> Vec<TocNode>;
    /// Markdown stripped down to searchable text.
    fn plain_text(&self, markdown: &str) -> String;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct CommonMark;

impl CommonMark {
    fn parser(markdown: &str) -> Parser<'_> {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        Parser::new_ext(markdown, options)
    }
}

impl Markup for CommonMark {
    fn render(&self, markdown: &str) -> String {
        let mut out = String::with_capacity(markdown.len() * 3 / 2);
        html::push_html(&mut out, Self::parser(markdown));
        out
    }

    fn parse_meta(&self, markdown: &str) -> PageMeta {
        let mut meta = PageMeta::default();
        for line in markdown.lines() {
            let Some(inner) = line
                .trim()
                .strip_prefix("<!--")
                .and_then(|l| l.strip_suffix("-->"))
            else {
                continue;
            };
            let Some((key, value)) = inner.split_once(':') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_uppercase().as_str() {
                "TITLE" => meta.title = value,
                "SUBTITLE" => meta.subtitle = value,
                _ => {}
            }
        }
        meta
    }

    fn parse_tree(&self, markdown: &str) -> Vec<TocNode> {
        let mut flat = Vec::new();
        let mut current: Option<(u8, String)> = None;
        for event in Self::parser(markdown) {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    current = Some((heading_depth(level), String::new()));
                }
                Event::Text(text) | Event::Code(text) => {
                    if let Some((_, buf)) = current.as_mut() {
                        buf.push_str(&text);
                    }
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, content)) = current.take() {
                        let content = content.trim().to_string();
                        flat.push(TocNode {
                            anchor: slugify(&content),
                            content,
                            level,
                            nodes: Vec::new(),
                        });
                    }
                }
                _ => {}
            }
        }
        nest(flat)
    }

    fn plain_text(&self, markdown: &str) -> String {
        let mut out = String::new();
        for event in Self::parser(markdown) {
            match event {
                Event::Text(text) | Event::Code(text) => {
                    out.push_str(&text);
                    out.push(' ');
                }
                _ => {}
            }
        }
        out.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

fn heading_depth(level: HeadingLevel) -> u8 {
    match level {
        HeadingLevel::H1 => 1,
        HeadingLevel::H2 => 2,
        HeadingLevel::H3 => 3,
        HeadingLevel::H4 => 4,
        HeadingLevel::H5 => 5,
        HeadingLevel::H6 => 6,
    }
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() || c == '_' {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}

/// Fold a flat heading list into a tree by level.
fn nest(flat: Vec<TocNode>) -> Vec<TocNode> {
    let mut roots: Vec<TocNode> = Vec::new();
    let mut stack: Vec<TocNode> = Vec::new();
    for node in flat {
        while stack.last().is_some_and(|top| top.level >= node.level) {
            close_top(&mut stack, &mut roots);
        }
        stack.push(node);
    }
    while !stack.is_empty() {
        close_top(&mut stack, &mut roots);
    }
    roots
}

fn close_top(stack: &mut Vec<TocNode>, roots: &mut Vec<TocNode>) {
    if let Some(done) = stack.pop() {
        match stack.last_mut() {
            Some(parent) => parent.nodes.push(done),
            None => roots.push(done),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "<!-- TITLE: Getting Started -->\n<!-- SUBTITLE: First steps -->\n\n# Intro\n\nHello *world*.\n\n## Install `tool`\n\n## Usage\n\n### Flags\n\n# Appendix\n";

    #[test]
    fn meta_from_comments() {
        let meta = CommonMark.parse_meta(PAGE);
        assert_eq!(meta.title, "Getting Started");
        assert_eq!(meta.subtitle, "First steps");
        assert!(CommonMark.parse_meta("# no meta").title.is_empty());
    }

    #[test]
    fn tree_nests_by_level() {
        let tree = CommonMark.parse_tree(PAGE);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].content, "Intro");
        assert_eq!(tree[0].nodes.len(), 2);
        assert_eq!(tree[0].nodes[0].content, "Install tool");
        assert_eq!(tree[0].nodes[0].anchor, "install-tool");
        assert_eq!(tree[0].nodes[1].nodes[0].content, "Flags");
        assert_eq!(tree[1].content, "Appendix");
    }

    #[test]
    fn render_and_plain_text() {
        let html = CommonMark.render("Hello *world*");
        assert!(html.contains("<em>world</em>"));
        let text = CommonMark.plain_text(PAGE);
        assert!(text.contains("Hello world"));
        assert!(!text.contains('*'));
    }
}
