//! Materialized table of every known entry, persisted as `entries.json`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Result;
use crate::path;
use crate::persist;

/// Whether an id has a source file, sub-pages, or both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Leaf,
    Directory,
    Both,
}

impl EntryKind {
    pub fn is_entry(self) -> bool {
        matches!(self, Self::Leaf | Self::Both)
    }

    pub fn is_directory(self) -> bool {
        matches!(self, Self::Directory | Self::Both)
    }

    fn from_flags(entry: bool, directory: bool) -> Option<Self> {
        match (entry, directory) {
            (true, true) => Some(Self::Both),
            (true, false) => Some(Self::Leaf),
            (false, true) => Some(Self::Directory),
            (false, false) => None,
        }
    }

    pub fn with_leaf(self) -> Self {
        Self::from_flags(true, self.is_directory()).unwrap_or(Self::Leaf)
    }

    pub fn with_directory(self) -> Self {
        Self::from_flags(self.is_entry(), true).unwrap_or(Self::Directory)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub id: String,
    pub kind: EntryKind,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub parent_title: String,
    #[serde(default)]
    pub parent_path: String,
    pub updated_at: DateTime<Utc>,
}

impl EntryRecord {
    /// A directory row for an id that only exists through its children.
    fn implicit(id: &str) -> Self {
        Self {
            id: id.to_string(),
            kind: EntryKind::Directory,
            title: path::start_case(path::last_segment(id)),
            subtitle: String::new(),
            parent_title: String::new(),
            parent_path: path::root_path(id).to_string(),
            updated_at: Utc::now(),
        }
    }
}

/// Wire shape of an index row, exposing the kind as two flags.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryListing {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub parent_path: String,
    pub parent_title: String,
    pub is_directory: bool,
    pub is_entry: bool,
}

impl From<&EntryRecord> for EntryListing {
    fn from(r: &EntryRecord) -> Self {
        Self {
            id: r.id.clone(),
            title: r.title.clone(),
            subtitle: r.subtitle.clone(),
            parent_path: r.parent_path.clone(),
            parent_title: r.parent_title.clone(),
            is_directory: r.kind.is_directory(),
            is_entry: r.kind.is_entry(),
        }
    }
}

/// Metadata written by a leaf refresh.
#[derive(Clone, Debug, Default)]
pub struct LeafMeta {
    pub title: String,
    pub subtitle: String,
    pub parent_title: String,
    pub parent_path: String,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub kept: usize,
    pub inserted: usize,
    pub removed: usize,
}

pub struct EntryIndex {
    file: PathBuf,
    rows: RwLock<BTreeMap<String, EntryRecord>>,
}

impl EntryIndex {
    pub fn open(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        let list: Vec<EntryRecord> = persist::load_json(&file)?;
        let rows = list.into_iter().map(|r| (r.id.clone(), r)).collect();
        Ok(Self {
            file,
            rows: RwLock::new(rows),
        })
    }

    fn save(&self, rows: &BTreeMap<String, EntryRecord>) -> Result<()> {
        let list: Vec<&EntryRecord> = rows.values().collect();
        persist::save_json(&self.file, &list)
    }

    /// Upsert a row as a leaf, keeping any directory flag it already has.
    pub fn upsert_entry(&self, id: &str, meta: LeafMeta) -> Result<EntryRecord> {
        let mut rows = self.rows.write();
        let kind = rows
            .get(id)
            .map(|r| r.kind.with_leaf())
            .unwrap_or(EntryKind::Leaf);
        let record = EntryRecord {
            id: id.to_string(),
            kind,
            title: meta.title,
            subtitle: meta.subtitle,
            parent_title: meta.parent_title,
            parent_path: meta.parent_path,
            updated_at: Utc::now(),
        };
        rows.insert(id.to_string(), record.clone());
        self.save(&rows)?;
        Ok(record)
    }

    /// Mark every referenced parent as a directory, inserting implicit rows
    /// for parents that have none. Existing rows are never downgraded.
    pub fn update_tree_info(&self) -> Result<()> {
        let mut rows = self.rows.write();
        if mark_parents(&mut rows) {
            self.save(&rows)?;
        }
        Ok(())
    }

    /// Rebuild every kind from the set of ids that have a source file.
    /// Rows justified by neither a source file nor a descendant are dropped;
    /// metadata of surviving rows is left untouched.
    pub fn reconcile(&self, leaves: &BTreeSet<String>) -> Result<ReconcileReport> {
        let mut desired: BTreeMap<&str, EntryKind> = BTreeMap::new();
        for id in leaves {
            desired.insert(id.as_str(), EntryKind::Leaf);
        }
        for id in leaves {
            for ancestor in path::ancestors(id) {
                let kind = desired
                    .get(ancestor)
                    .map(|k| k.with_directory())
                    .unwrap_or(EntryKind::Directory);
                desired.insert(ancestor, kind);
            }
        }

        let mut report = ReconcileReport::default();
        let mut rows = self.rows.write();
        rows.retain(|id, row| match desired.get(id.as_str()) {
            Some(kind) => {
                row.kind = *kind;
                report.kept += 1;
                true
            }
            None => {
                report.removed += 1;
                false
            }
        });
        for (id, kind) in desired {
            if !rows.contains_key(id) {
                let mut row = EntryRecord::implicit(id);
                row.kind = kind;
                rows.insert(id.to_string(), row);
                report.inserted += 1;
            }
        }
        self.save(&rows)?;
        debug!(?report, "entry index reconciled");
        Ok(report)
    }

    pub fn get(&self, id: &str) -> Option<EntryRecord> {
        self.rows.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.rows.read().contains_key(id)
    }

    pub fn delete(&self, id: &str) -> Result<Option<EntryRecord>> {
        let mut rows = self.rows.write();
        let removed = rows.remove(id);
        if removed.is_some() {
            self.save(&rows)?;
        }
        Ok(removed)
    }

    /// Rows directly under `parent` that pass `visible`, sorted by title.
    pub fn children(&self, parent: &str, visible: impl Fn(&str) -> bool) -> Vec<EntryRecord> {
        let mut out: Vec<EntryRecord> = self
            .rows
            .read()
            .values()
            .filter(|r| r.parent_path == parent && visible(&r.id))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.title.cmp(&b.title));
        out
    }

    /// Ids strictly below `id`.
    pub fn descendants(&self, id: &str) -> Vec<String> {
        let prefix = format!("{id}/");
        self.rows
            .read()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Every row passing `visible`, sorted by id.
    pub fn all(&self, visible: impl Fn(&str) -> bool) -> Vec<EntryRecord> {
        self.rows
            .read()
            .values()
            .filter(|r| visible(&r.id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

fn mark_parents(rows: &mut BTreeMap<String, EntryRecord>) -> bool {
    let mut changed = false;
    loop {
        let parents: BTreeSet<String> = rows
            .values()
            .map(|r| r.parent_path.clone())
            .filter(|p| !p.is_empty())
            .collect();
        let mut inserted = false;
        for parent in parents {
            match rows.get_mut(&parent) {
                Some(row) if row.kind.is_directory() => {}
                Some(row) => {
                    row.kind = row.kind.with_directory();
                    changed = true;
                }
                None => {
                    rows.insert(parent.clone(), EntryRecord::implicit(&parent));
                    changed = true;
                    inserted = true;
                }
            }
        }
        if !inserted {
            return changed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(id: &str) -> LeafMeta {
        LeafMeta {
            title: path::start_case(id),
            parent_path: path::root_path(id).to_string(),
            ..LeafMeta::default()
        }
    }

    fn open(dir: &tempfile::TempDir) -> EntryIndex {
        EntryIndex::open(dir.path().join("entries.json")).unwrap()
    }

    #[test]
    fn tree_info_adds_implicit_parents() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index.upsert_entry("a/b/c", leaf("a/b/c")).unwrap();
        index.update_tree_info().unwrap();

        assert_eq!(index.get("a/b").unwrap().kind, EntryKind::Directory);
        assert_eq!(index.get("a").unwrap().kind, EntryKind::Directory);
        assert_eq!(index.get("a/b").unwrap().parent_path, "a");

        index.upsert_entry("a", leaf("a")).unwrap();
        assert_eq!(index.get("a").unwrap().kind, EntryKind::Both);
        index.update_tree_info().unwrap();
        assert_eq!(index.get("a").unwrap().kind, EntryKind::Both);
    }

    #[test]
    fn queries() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        for id in ["docs/zeta", "docs/alpha", "docs/alpha/deep", "docsx"] {
            index.upsert_entry(id, leaf(id)).unwrap();
        }
        let titles: Vec<String> = index.children("docs", |_| true).into_iter().map(|r| r.title).collect();
        assert_eq!(titles, vec!["Docs Alpha", "Docs Zeta"]);
        assert_eq!(index.children("docs", |id| id != "docs/zeta").len(), 1);
        assert_eq!(index.descendants("docs").len(), 3);
        assert!(index.descendants("docsx").is_empty());
        assert!(index.delete("docsx").unwrap().is_some());
        assert!(!index.contains("docsx"));
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        open(&dir).upsert_entry("home", leaf("home")).unwrap();
        assert!(open(&dir).contains("home"));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let index = open(&dir);
        index.upsert_entry("a/b", leaf("a/b")).unwrap();
        index.upsert_entry("stale", leaf("stale")).unwrap();
        index.update_tree_info().unwrap();

        let leaves: BTreeSet<String> = ["a/b".to_string(), "x/y".to_string()].into();
        let first = index.reconcile(&leaves).unwrap();
        assert_eq!(first.removed, 1);
        assert_eq!(first.inserted, 2);
        let snapshot = index.all(|_| true);

        let second = index.reconcile(&leaves).unwrap();
        assert_eq!(second.removed, 0);
        assert_eq!(second.inserted, 0);
        let again = index.all(|_| true);
        assert_eq!(
            snapshot.iter().map(|r| (&r.id, r.kind)).collect::<Vec<_>>(),
            again.iter().map(|r| (&r.id, r.kind)).collect::<Vec<_>>()
        );
        assert_eq!(index.get("a/b").unwrap().title, "A B");
        assert_eq!(index.get("x").unwrap().kind, EntryKind::Directory);
    }
}
