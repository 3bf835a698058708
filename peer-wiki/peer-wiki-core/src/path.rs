//! Canonical entry ids and the filesystem locations derived from them.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use serde::Serialize;

use crate::config::{Charset, WikiConfig};

/// Ids that can neither be moved nor deleted.
pub const PROTECTED: &[&str] = &["home", "guide"];

/// First path segments that collide with application routes.
pub const RESERVED: &[&str] = &[
    "create", "home", "edit", "account", "source", "history", "mk", "all",
];

/// One breadcrumb step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Crumb {
    pub name: String,
    pub link: String,
}

#[derive(Clone, Debug)]
pub struct PathResolver {
    repo: PathBuf,
    cache: PathBuf,
    charset: Charset,
}

impl PathResolver {
    pub fn new(config: &WikiConfig) -> Self {
        Self {
            repo: config.repo_path.clone(),
            cache: config.cache_path(),
            charset: config.charset.clone(),
        }
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache
    }

    /// Turn a raw URL path into a canonical entry id.
    pub fn parse_path(&self, raw: &str) -> String {
        let decoded = urlencoding::decode(raw).unwrap_or(Cow::Borrowed(raw));
        let safe: String = decoded
            .to_lowercase()
            .chars()
            .filter(|c| self.allowed(*c))
            .collect();
        if safe == "/" {
            return "home".to_string();
        }
        safe.split('/')
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("/")
    }

    fn allowed(&self, c: char) -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || c == '/' || c == '-' || self.charset.contains(c)
    }

    pub fn full_path(&self, id: &str) -> PathBuf {
        self.repo.join(format!("{id}.md"))
    }

    /// Directory holding the sub-pages of `id`.
    pub fn folder_path(&self, id: &str) -> PathBuf {
        self.repo.join(id)
    }

    pub fn upload_full_path(&self, id: &str) -> PathBuf {
        self.repo.join("uploads").join(id)
    }

    pub fn cache_path(&self, id: &str) -> PathBuf {
        self.cache.join(format!("{}.json", cache_key(id)))
    }

    /// `<repo>/a/b.md` becomes `/a/b`.
    pub fn entry_path_from_full_path(&self, full: &Path) -> String {
        let rel = full.strip_prefix(&self.repo).unwrap_or(full);
        let rel = rel.with_extension("");
        let parts: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            String::new()
        } else {
            format!("/{}", parts.join("/"))
        }
    }
}

/// Hex md5 of the id, used to name cache files.
pub fn cache_key(id: &str) -> String {
    hex::encode(Md5::digest(id.as_bytes()))
}

/// The id minus its last segment, empty for top-level ids.
pub fn root_path(id: &str) -> &str {
    match id.rfind('/') {
        Some(idx) => &id[..idx],
        None => "",
    }
}

pub fn last_segment(id: &str) -> &str {
    id.rsplit('/').next().unwrap_or(id)
}

/// Ancestors of `id`, nearest first.
pub fn ancestors(id: &str) -> Vec<&str> {
    id.char_indices()
        .filter(|(_, c)| *c == '/')
        .map(|(idx, _)| &id[..idx])
        .filter(|p| !p.is_empty())
        .rev()
        .collect()
}

pub fn parent_list(id: &str) -> Vec<Crumb> {
    let mut link = String::new();
    id.split('/')
        .filter(|p| !p.is_empty())
        .map(|name| {
            link.push('/');
            link.push_str(name);
            Crumb {
                name: name.to_string(),
                link: link.clone(),
            }
        })
        .collect()
}

pub fn is_protected(id: &str) -> bool {
    id.is_empty() || PROTECTED.contains(&id)
}

/// Whether creating `id` would shadow an application route. The id `home`
/// itself is exempt: it is the landing page and is created like any other.
pub fn is_reserved(id: &str) -> bool {
    let first = id.split('/').next().unwrap_or_default();
    RESERVED.contains(&first) && id != "home"
}

/// Title-case a path or slug: `my-new-page` becomes `My New Page`.
pub fn start_case(text: &str) -> String {
    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut prev_lower = false;
    for c in text.chars() {
        if !c.is_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev_lower = false;
            continue;
        }
        if c.is_uppercase() && prev_lower && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        prev_lower = c.is_lowercase();
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }
    words
        .iter()
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
