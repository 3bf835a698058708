//! Loads pages from their Markdown source, falling back from the cache.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheStore, PageSnapshot, ParentInfo};
use crate::error::{Result, WikiError};
use crate::markup::{Markup, PageMeta, TocNode};
use crate::path::{self, PathResolver};

/// Which derivations `fetch_original` performs. Each flag controls exactly
/// one piece of work so callers can ask for the minimum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchOptions {
    pub parse_markdown: bool,
    pub parse_meta: bool,
    pub parse_tree: bool,
    pub include_markdown: bool,
    pub include_parent_info: bool,
    pub cache: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            parse_markdown: true,
            parse_meta: true,
            parse_tree: true,
            include_markdown: false,
            include_parent_info: true,
            cache: true,
        }
    }
}

impl FetchOptions {
    /// Everything off: only checks that the source exists.
    pub fn probe() -> Self {
        Self {
            parse_markdown: false,
            parse_meta: false,
            parse_tree: false,
            include_markdown: false,
            include_parent_info: false,
            cache: false,
        }
    }

    /// Everything on, used when regenerating the cache.
    pub fn full() -> Self {
        Self {
            include_markdown: true,
            ..Self::default()
        }
    }

    /// Raw source plus metadata, for the editor and source views.
    pub fn source() -> Self {
        Self {
            parse_meta: true,
            include_markdown: true,
            ..Self::probe()
        }
    }

    fn reads_content(&self) -> bool {
        self.parse_markdown
            || self.parse_meta
            || self.parse_tree
            || self.include_markdown
            || self.include_parent_info
            || self.cache
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PageData {
    pub markdown: String,
    pub html: String,
    pub meta: PageMeta,
    pub tree: Vec<TocNode>,
    pub parent: Option<ParentInfo>,
}

impl PageData {
    fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            html: self.html.clone(),
            meta: self.meta.clone(),
            tree: self.tree.clone(),
            parent: self.parent.clone(),
        }
    }
}

impl From<PageSnapshot> for PageData {
    fn from(s: PageSnapshot) -> Self {
        Self {
            markdown: String::new(),
            html: s.html,
            meta: s.meta,
            tree: s.tree,
            parent: s.parent,
        }
    }
}

#[derive(Clone)]
pub struct PageLoader {
    paths: PathResolver,
    cache: CacheStore,
    markup: Arc<dyn Markup>,
}

impl PageLoader {
    pub fn new(paths: PathResolver, cache: CacheStore, markup: Arc<dyn Markup>) -> Self {
        Self {
            paths,
            cache,
            markup,
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn markup(&self) -> &dyn Markup {
        self.markup.as_ref()
    }

    /// Serve from the cache when possible, otherwise from the source.
    pub async fn fetch(&self, id: &str) -> Result<PageData> {
        if let Some(snapshot) = self.cache.load(id).await {
            debug!(entry = id, "cache hit");
            return Ok(snapshot.into());
        }
        self.fetch_original(id, FetchOptions::default()).await
    }

    pub async fn fetch_original(&self, id: &str, options: FetchOptions) -> Result<PageData> {
        let fpath = self.paths.full_path(id);
        match tokio::fs::metadata(&fpath).await {
            Ok(meta) if meta.is_file() => {}
            _ => return Err(WikiError::NotFound(id.to_string())),
        }

        let contents = if options.reads_content() {
            read_source(&fpath).await?
        } else {
            String::new()
        };

        let mut page = PageData {
            html: if options.parse_markdown {
                self.markup.render(&contents)
            } else {
                String::new()
            },
            meta: if options.parse_meta {
                self.markup.parse_meta(&contents)
            } else {
                PageMeta::default()
            },
            tree: if options.parse_tree {
                self.markup.parse_tree(&contents)
            } else {
                Vec::new()
            },
            ..PageData::default()
        };
        if page.meta.title.is_empty() {
            page.meta.title = path::start_case(path::last_segment(id));
        }
        page.meta.path = id.to_string();

        if options.include_parent_info {
            page.parent = self.parent_info(id).await;
        }
        if options.cache {
            self.cache.store(id, &page.snapshot()).await;
        }
        if options.include_markdown {
            page.markdown = contents;
        }
        Ok(page)
    }

    /// Title information of the nearest ancestor that has a source file.
    /// Each ancestor is resolved on its own; `None` when none exists.
    pub async fn parent_info(&self, id: &str) -> Option<ParentInfo> {
        for ancestor in path::ancestors(id) {
            let Ok(contents) = read_source(&self.paths.full_path(ancestor)).await else {
                continue;
            };
            let meta = self.markup.parse_meta(&contents);
            return Some(ParentInfo {
                path: ancestor.to_string(),
                title: if meta.title.is_empty() {
                    path::start_case(path::last_segment(ancestor))
                } else {
                    meta.title
                },
                subtitle: meta.subtitle,
            });
        }
        None
    }
}

/// Page sources are decoded as UTF-8; invalid sequences become U+FFFD.
async fn read_source(fpath: &Path) -> Result<String> {
    let bytes = tokio::fs::read(fpath).await?;
    Ok(match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %fpath.display(), "page source is not valid UTF-8");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WikiConfig;
    use crate::markup::CommonMark;

    fn loader(dir: &std::path::Path) -> PageLoader {
        let config = WikiConfig::new(dir.join("repo"), dir.join("data"));
        let paths = PathResolver::new(&config);
        PageLoader::new(paths.clone(), CacheStore::new(paths), Arc::new(CommonMark))
    }

    fn write(dir: &std::path::Path, rel: &str, body: &str) {
        let path = dir.join("repo").join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[tokio::test]
    async fn missing_source_is_not_found() {
        let tempdir = tempfile::tempdir().unwrap();
        let err = loader(tempdir.path())
            .fetch_original("nope", FetchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, WikiError::NotFound(_)));
    }

    #[tokio::test]
    async fn full_fetch_populates_cache() {
        let tempdir = tempfile::tempdir().unwrap();
        write(tempdir.path(), "guide.md", "<!-- TITLE: The Guide -->\n# Guide");
        write(tempdir.path(), "guide/setup-steps.md", "# Setup\n\nbody");
        let loader = loader(tempdir.path());

        let page = loader
            .fetch_original("guide/setup-steps", FetchOptions::full())
            .await
            .unwrap();
        assert_eq!(page.meta.title, "Setup Steps");
        assert_eq!(page.meta.path, "guide/setup-steps");
        assert_eq!(page.markdown, "# Setup\n\nbody");
        assert_eq!(page.parent.as_ref().unwrap().title, "The Guide");
        assert!(loader.cache().path_for("guide/setup-steps").exists());

        let cached = loader.fetch("guide/setup-steps").await.unwrap();
        assert!(cached.markdown.is_empty());
        assert_eq!(cached.html, page.html);
    }

    #[tokio::test]
    async fn parent_skips_missing_ancestors() {
        let tempdir = tempfile::tempdir().unwrap();
        write(tempdir.path(), "top-level.md", "no meta");
        write(tempdir.path(), "top-level/gap/leaf.md", "leaf");
        let loader = loader(tempdir.path());

        let parent = loader.parent_info("top-level/gap/leaf").await.unwrap();
        assert_eq!(parent.path, "top-level");
        assert_eq!(parent.title, "Top Level");
        assert!(loader.parent_info("top-level").await.is_none());
    }

    #[tokio::test]
    async fn probe_does_no_work() {
        let tempdir = tempfile::tempdir().unwrap();
        write(tempdir.path(), "page.md", "# Page");
        let loader = loader(tempdir.path());
        let page = loader.fetch_original("page", FetchOptions::probe()).await.unwrap();
        assert!(page.html.is_empty());
        assert!(page.tree.is_empty());
        assert!(!loader.cache().path_for("page").exists());
    }

    #[tokio::test]
    async fn nested_page_titled_by_last_segment() {
        let tempdir = tempfile::tempdir().unwrap();
        write(tempdir.path(), "course/week-one.md", "no meta here");
        let page = loader(tempdir.path())
            .fetch_original("course/week-one", FetchOptions::default())
            .await
            .unwrap();
        assert_eq!(page.meta.title, "Week One");
    }

    #[tokio::test]
    async fn invalid_utf8_source_still_loads() {
        let tempdir = tempfile::tempdir().unwrap();
        let path = tempdir.path().join("repo/latin1.md");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"caf\xe9 page").unwrap();

        let page = loader(tempdir.path())
            .fetch_original("latin1", FetchOptions::full())
            .await
            .unwrap();
        assert_eq!(page.markdown, "caf\u{FFFD} page");
        assert_eq!(page.meta.title, "Latin1");
    }
}
