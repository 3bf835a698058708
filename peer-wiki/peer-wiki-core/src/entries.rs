//! Entry lifecycle: create, update, move and delete pages while keeping the
//! cache, entry index, upload index and search index in step with the
//! repository.
//!
//! None of the multi-step operations are transactional. A failure part way
//! through leaves the derived stores behind the repository; `reconcile`
//! rebuilds them from the source files.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::{Result, WikiError};
use crate::index::{EntryIndex, EntryListing, EntryRecord, LeafMeta, ReconcileReport};
use crate::loader::{FetchOptions, PageData, PageLoader};
use crate::path::{self, Crumb, PathResolver};
use crate::rights::{Action, RightRule, Rights};
use crate::search::{IndexedEntry, SearchSink};
use crate::storage::{Author, CommitInfo, VersionedStorage};
use crate::uploads::UploadIndex;

const UPLOAD_PLACEHOLDER: &str = "initializeFolder.md";
const UPLOAD_PLACEHOLDER_TEXT: &str =
    "At the time you see this file, it has no use. Feel free to delete this file!";

const DEFAULT_STARTER: &str = "<!-- TITLE: {TITLE} -->\n<!-- SUBTITLE: A quick summary of {TITLE} -->\n\n# {TITLE}\n\nStart writing about {TITLE} here.\n";

/// Per-key async mutexes; idle keys are dropped on the next acquisition.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyedLocks {
    async fn lock(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks.retain(|_, m| Arc::strong_count(m) > 1);
            locks.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// A rendered page with its navigation context.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageView {
    pub page: PageData,
    pub siblings: Vec<String>,
    pub crumbs: Vec<Crumb>,
    pub last_edit: Option<CommitInfo>,
}

#[derive(Clone, Debug, Serialize)]
pub struct PageHistory {
    pub meta: EntryRecord,
    pub history: Vec<CommitInfo>,
}

pub struct EntryService {
    paths: PathResolver,
    loader: PageLoader,
    index: Arc<EntryIndex>,
    storage: Arc<dyn VersionedStorage>,
    uploads: Arc<UploadIndex>,
    search: Arc<dyn SearchSink>,
    starter: String,
    creating: KeyedLocks,
}

impl EntryService {
    pub fn new(
        loader: PageLoader,
        paths: PathResolver,
        index: Arc<EntryIndex>,
        storage: Arc<dyn VersionedStorage>,
        uploads: Arc<UploadIndex>,
        search: Arc<dyn SearchSink>,
    ) -> Self {
        Self {
            paths,
            loader,
            index,
            storage,
            uploads,
            search,
            starter: DEFAULT_STARTER.to_string(),
            creating: KeyedLocks::default(),
        }
    }

    /// Replace the built-in starter page with the file at `path`.
    pub fn with_starter_file(mut self, path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(template) => self.starter = template,
            Err(err) => warn!(path = %path.display(), %err, "starter template unreadable, using built-in"),
        }
        self
    }

    pub fn paths(&self) -> &PathResolver {
        &self.paths
    }

    pub fn loader(&self) -> &PageLoader {
        &self.loader
    }

    pub fn index(&self) -> &EntryIndex {
        &self.index
    }

    pub fn uploads(&self) -> &UploadIndex {
        &self.uploads
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.loader
            .fetch_original(id, FetchOptions::probe())
            .await
            .is_ok()
    }

    pub async fn fetch(&self, id: &str) -> Result<PageData> {
        self.loader.fetch(id).await
    }

    /// Raw Markdown plus metadata, for the editor and source views.
    pub async fn source(&self, id: &str) -> Result<PageData> {
        self.loader.fetch_original(id, FetchOptions::source()).await
    }

    pub async fn parent_info(&self, id: &str) -> Option<crate::cache::ParentInfo> {
        self.loader.parent_info(id).await
    }

    /// Reload `id` from its source, refresh its cache file and index row,
    /// and return what the search index should hold for it.
    pub async fn update_cache(&self, id: &str) -> Result<IndexedEntry> {
        let page = self.loader.fetch_original(id, FetchOptions::full()).await?;
        let parent_title = page
            .parent
            .as_ref()
            .map(|p| p.title.clone())
            .unwrap_or_default();
        self.index.upsert_entry(
            id,
            LeafMeta {
                title: page.meta.title.clone(),
                subtitle: page.meta.subtitle.clone(),
                parent_title: parent_title.clone(),
                parent_path: path::root_path(id).to_string(),
            },
        )?;
        self.index.update_tree_info()?;
        Ok(IndexedEntry {
            id: id.to_string(),
            title: page.meta.title,
            subtitle: page.meta.subtitle,
            parent: parent_title,
            content: self.loader.markup().plain_text(&page.markdown),
        })
    }

    async fn write_source(&self, id: &str, markdown: &str) -> Result<()> {
        let fpath = self.paths.full_path(id);
        if let Some(dir) = fpath.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }
        tokio::fs::write(&fpath, markdown).await?;
        Ok(())
    }

    /// Steps: write source and upload placeholder, commit both, register
    /// the upload folder, refresh cache and index, queue the search add.
    pub async fn create(&self, id: &str, markdown: &str, author: &Author) -> Result<()> {
        if id.is_empty() {
            return Err(WikiError::InvalidPath);
        }
        if path::is_reserved(id) {
            return Err(WikiError::ReservedName(id.to_string()));
        }
        let _guard = self.creating.lock(id).await;
        if self.exists(id).await {
            return Err(WikiError::AlreadyExists(id.to_string()));
        }

        self.write_source(id, markdown).await?;
        let folder = self.paths.upload_full_path(id);
        tokio::fs::create_dir_all(&folder).await?;
        tokio::fs::write(folder.join(UPLOAD_PLACEHOLDER), UPLOAD_PLACEHOLDER_TEXT).await?;
        self.storage.commit_document(id, author)?;
        self.storage.commit_uploads(&format!("Uploads: {id}"))?;
        self.uploads.register_folder(id)?;

        let indexed = self.update_cache(id).await?;
        self.search.add(indexed).await;
        info!(entry = id, author = %author.email, "entry created");
        Ok(())
    }

    /// Overwrite an existing page; the file ends up byte-identical to
    /// `markdown`.
    pub async fn update(&self, id: &str, markdown: &str, author: &Author) -> Result<()> {
        if !self.exists(id).await {
            return Err(WikiError::NotFound(id.to_string()));
        }
        self.write_source(id, markdown).await?;
        self.storage.commit_document(id, author)?;
        let indexed = self.update_cache(id).await?;
        self.search.add(indexed).await;
        info!(entry = id, author = %author.email, "entry updated");
        Ok(())
    }

    /// Steps: git move and commit, drop cache file, search document and
    /// index row of `id`, then refresh and index `new_id`.
    pub async fn move_entry(&self, id: &str, new_id: &str, author: &Author) -> Result<()> {
        if id.is_empty() || path::is_protected(id) || new_id.is_empty() {
            return Err(WikiError::InvalidPath);
        }
        if path::is_reserved(new_id) {
            return Err(WikiError::ReservedName(new_id.to_string()));
        }
        let _guard = self.creating.lock(new_id).await;
        if self.exists(new_id).await {
            return Err(WikiError::AlreadyExists(new_id.to_string()));
        }
        if !self.exists(id).await {
            return Err(WikiError::NotFound(id.to_string()));
        }

        self.storage.move_document(id, new_id, author)?;
        self.loader.cache().evict(id).await;
        self.search.delete(id).await;
        self.index.delete(id)?;

        let indexed = self.update_cache(new_id).await?;
        self.search.add(indexed).await;
        info!(from = id, to = new_id, "entry moved");
        Ok(())
    }

    /// Steps: git delete, drop cache file, search document and index row,
    /// delete the sub-page folder when the row was a directory, delete the
    /// upload folder and its rows, then rescan uploads. Callers check for
    /// children first with [`EntryService::children_entries`].
    pub async fn remove(&self, id: &str, author: &Author) -> Result<()> {
        if id.is_empty() || path::is_protected(id) {
            return Err(WikiError::InvalidPath);
        }
        if !self.exists(id).await && !self.index.contains(id) {
            return Err(WikiError::NotFound(id.to_string()));
        }
        self.storage.delete_document(id, author)?;
        self.loader.cache().evict(id).await;
        self.search.delete(id).await;
        let row = self.index.delete(id)?;
        if row.is_some_and(|r| r.kind.is_directory()) {
            self.storage.delete_folder(id, author)?;
        }
        self.storage.delete_folder(&format!("uploads/{id}"), author)?;
        self.uploads.remove_folder(id)?;
        self.uploads.rescan()?;
        info!(entry = id, author = %author.email, "entry removed");
        Ok(())
    }

    pub fn get_starter(&self, id: &str) -> String {
        let title = path::start_case(path::last_segment(id));
        self.starter.replace("{TITLE}", &title)
    }

    /// Ids below `id`; a non-empty result blocks deletion.
    pub fn children_entries(&self, id: &str) -> Vec<String> {
        self.index.descendants(id)
    }

    /// Creating `id` needs its parent row unless it is top-level.
    pub async fn can_create_under(&self, id: &str) -> Result<()> {
        if id.is_empty() {
            return Err(WikiError::InvalidPath);
        }
        if path::is_reserved(id) {
            return Err(WikiError::ReservedName(id.to_string()));
        }
        if self.exists(id).await {
            return Err(WikiError::AlreadyExists(id.to_string()));
        }
        let parent = path::root_path(id);
        if !parent.is_empty() && !self.index.contains(parent) {
            return Err(WikiError::ParentMissing(id.to_string()));
        }
        Ok(())
    }

    /// Page ids shown next to `id`: its own sub-pages when it has a folder,
    /// otherwise those of its parent.
    pub fn page_siblings(&self, id: &str) -> Vec<String> {
        let folder_exists = self.paths.folder_path(id).is_dir();
        let root = path::root_path(id);
        if folder_exists {
            self.folder_directory(id, true)
        } else if id == "home" {
            self.folder_directory(id, true)
        } else if root.is_empty() {
            self.folder_directory(id, false)
        } else {
            self.folder_directory(root, true)
        }
    }

    /// Every page path (with leading slash) under the folder of `id`.
    /// `home` lists the whole repository except the protected pages.
    pub fn folder_directory(&self, id: &str, folder_exists: bool) -> Vec<String> {
        if id == "home" {
            return self
                .scan_sources(self.paths.repo_root())
                .into_iter()
                .filter(|p| !p.ends_with("README"))
                .map(|p| format!("/{p}"))
                .filter(|p| !["/home", "/guide", ""].contains(&p.as_str()))
                .collect();
        }
        let folder = self.paths.folder_path(id);
        if folder_exists && folder.is_dir() {
            self.scan_sources(&folder)
                .into_iter()
                .map(|p| format!("/{p}"))
                .collect()
        } else {
            vec![format!("/{id}")]
        }
    }

    pub fn parent_list(&self, id: &str) -> Vec<Crumb> {
        path::parent_list(id)
    }

    /// Ids of every Markdown source under `dir`, skipping uploads and git
    /// metadata, sorted.
    fn scan_sources(&self, dir: &Path) -> Vec<String> {
        let repo = self.paths.repo_root();
        let mut out: Vec<String> = WalkDir::new(dir)
            .into_iter()
            .filter_entry(|e| {
                let rel = e.path().strip_prefix(repo).unwrap_or(e.path());
                !rel.starts_with("uploads") && !rel.starts_with(".git")
            })
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.path().extension().is_some_and(|x| x == "md"))
            .map(|e| self.paths.entry_path_from_full_path(e.path()))
            .map(|p| p.trim_start_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .collect();
        out.sort();
        out
    }

    /// Index row for `id`, refreshing it once from the source on a miss.
    async fn indexed_entry(&self, id: &str) -> Result<EntryRecord> {
        if let Some(row) = self.index.get(id).filter(|r| r.kind.is_entry()) {
            return Ok(row);
        }
        let indexed = self.update_cache(id).await?;
        self.search.add(indexed).await;
        self.index
            .get(id)
            .filter(|r| r.kind.is_entry())
            .ok_or_else(|| WikiError::NotFound(id.to_string()))
    }

    pub async fn view(&self, id: &str) -> Result<PageView> {
        let mut page = self.loader.fetch(id).await?;
        if !self.index.get(id).is_some_and(|r| r.kind.is_entry()) {
            self.indexed_entry(id).await?;
            page = self.loader.fetch(id).await?;
        }
        Ok(PageView {
            page,
            siblings: self.page_siblings(id),
            crumbs: self.parent_list(id),
            last_edit: self.storage.last_edit(id)?,
        })
    }

    pub async fn history(&self, id: &str) -> Result<PageHistory> {
        let meta = self.indexed_entry(id).await?;
        Ok(PageHistory {
            meta,
            history: self.storage.history(id)?,
        })
    }

    pub async fn last_edit(&self, id: &str) -> Result<Option<CommitInfo>> {
        self.indexed_entry(id).await?;
        self.storage.last_edit(id)
    }

    pub async fn history_diff(&self, id: &str, sha: &str) -> Result<String> {
        if !is_commit_sha(sha) {
            return Err(WikiError::InvalidCommit);
        }
        self.indexed_entry(id).await?;
        self.storage.history_diff(id, sha)
    }

    /// Readable rows directly under `base`.
    pub fn from_tree(&self, base: &str, rights: &[RightRule]) -> Vec<EntryListing> {
        self.index
            .children(base, |id| Rights::check_entry(id, rights, Action::Read))
            .iter()
            .map(EntryListing::from)
            .collect()
    }

    pub fn all_entries(&self, rights: &[RightRule]) -> Vec<EntryListing> {
        self.index
            .all(|id| Rights::check_entry(id, rights, Action::Read))
            .iter()
            .map(EntryListing::from)
            .collect()
    }

    /// Rebuild cache files, index rows, search documents and upload rows
    /// from the repository.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let ids = self.scan_sources(self.paths.repo_root());
        let mut leaves = BTreeSet::new();
        for id in ids {
            match self.update_cache(&id).await {
                Ok(indexed) => self.search.add(indexed).await,
                Err(err) => warn!(entry = %id, %err, "unable to refresh entry"),
            }
            leaves.insert(id);
        }
        let report = self.index.reconcile(&leaves)?;
        self.uploads.rescan()?;
        info!(
            kept = report.kept,
            inserted = report.inserted,
            removed = report.removed,
            "reconciled entries"
        );
        Ok(report)
    }
}

fn is_commit_sha(sha: &str) -> bool {
    sha.len() == 40 && sha.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_sha_shape() {
        assert!(is_commit_sha(&"a1".repeat(20)));
        assert!(!is_commit_sha(&"A1".repeat(20)));
        assert!(!is_commit_sha("abc"));
        assert!(!is_commit_sha(&"g".repeat(40)));
    }
}
