//! Versioned storage of page sources, backed by a git working tree.

use std::path::{Path, PathBuf};

use chrono::{DateTime, TimeZone, Utc};
use git2::{DiffFormat, DiffOptions, IndexAddOption, Oid, Repository, Signature, Sort};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{Result, WikiError};

/// Who a commit is attributed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    pub fn system() -> Self {
        Self::new("Peer Wiki", "wiki@localhost")
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub commit: String,
    pub author_name: String,
    pub author_email: String,
    pub date: DateTime<Utc>,
    pub message: String,
}

pub trait VersionedStorage: Send + Sync {
    /// Stage and commit the source of `id` as it is on disk.
    fn commit_document(&self, id: &str, author: &Author) -> Result<()>;
    /// Rename the source of `old` to `new` and commit the move.
    fn move_document(&self, old: &str, new: &str, author: &Author) -> Result<()>;
    fn delete_document(&self, id: &str, author: &Author) -> Result<()>;
    /// Remove a directory (relative to the repository root) recursively.
    fn delete_folder(&self, path: &str, author: &Author) -> Result<()>;
    /// Commits touching `id`, newest first.
    fn history(&self, id: &str) -> Result<Vec<CommitInfo>>;
    /// Patch of `id` introduced by `sha`.
    fn history_diff(&self, id: &str, sha: &str) -> Result<String>;
    fn last_edit(&self, id: &str) -> Result<Option<CommitInfo>>;
    /// Commit whatever changed under `uploads/`.
    fn commit_uploads(&self, message: &str) -> Result<()>;
}

pub struct GitStorage {
    root: PathBuf,
    repo: Mutex<Repository>,
}

impl GitStorage {
    /// Open the repository at `dir`, initialising it when missing.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let repo = if dir.join(".git").exists() {
            Repository::open(dir)?
        } else {
            std::fs::create_dir_all(dir)?;
            info!(path = %dir.display(), "initialising page repository");
            Repository::init(dir)?
        };
        Ok(Self {
            root: dir.to_path_buf(),
            repo: Mutex::new(repo),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn source(id: &str) -> PathBuf {
        PathBuf::from(format!("{id}.md"))
    }

    /// Write the index as a tree and commit it on top of HEAD. Nothing is
    /// committed when the tree is unchanged.
    fn commit_index(
        repo: &Repository,
        index: &mut git2::Index,
        author: &Author,
        message: &str,
    ) -> Result<Option<Oid>> {
        index.write()?;
        let tree_id = index.write_tree()?;
        let tree = repo.find_tree(tree_id)?;
        let parent = match repo.head() {
            Ok(head) => Some(head.peel_to_commit()?),
            Err(_) => None,
        };
        if let Some(parent) = &parent {
            if parent.tree_id() == tree_id {
                debug!(message, "nothing to commit");
                return Ok(None);
            }
        }
        let sig = Signature::now(&author.name, &author.email)?;
        let parents: Vec<&git2::Commit> = parent.iter().collect();
        let oid = repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parents)?;
        debug!(%oid, message, "committed");
        Ok(Some(oid))
    }

    fn commit_info(commit: &git2::Commit) -> CommitInfo {
        let author = commit.author();
        CommitInfo {
            commit: commit.id().to_string(),
            author_name: author.name().unwrap_or_default().to_string(),
            author_email: author.email().unwrap_or_default().to_string(),
            date: Utc
                .timestamp_opt(commit.time().seconds(), 0)
                .single()
                .unwrap_or_default(),
            message: commit.message().unwrap_or_default().trim().to_string(),
        }
    }

    /// Whether `commit` changed the blob at `path` compared to its first parent.
    fn touches(commit: &git2::Commit, path: &Path) -> Result<bool> {
        let current = commit.tree()?.get_path(path).ok().map(|e| e.id());
        let previous = match commit.parents().next() {
            Some(parent) => parent.tree()?.get_path(path).ok().map(|e| e.id()),
            None => None,
        };
        Ok(current != previous)
    }
}

impl VersionedStorage for GitStorage {
    fn commit_document(&self, id: &str, author: &Author) -> Result<()> {
        let repo = self.repo.lock();
        let mut index = repo.index()?;
        index.add_path(&Self::source(id))?;
        Self::commit_index(&repo, &mut index, author, &format!("Documents: {id}"))?;
        Ok(())
    }

    fn move_document(&self, old: &str, new: &str, author: &Author) -> Result<()> {
        let (from, to) = (Self::source(old), Self::source(new));
        let dest = self.root.join(&to);
        if let Some(dir) = dest.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let repo = self.repo.lock();
        std::fs::rename(self.root.join(&from), &dest)?;
        let mut index = repo.index()?;
        // An uncommitted source is not in the index yet.
        let _ = index.remove_path(&from);
        index.add_path(&to)?;
        Self::commit_index(
            &repo,
            &mut index,
            author,
            &format!("Moved {old} to {new}"),
        )?;
        Ok(())
    }

    fn delete_document(&self, id: &str, author: &Author) -> Result<()> {
        let path = Self::source(id);
        let repo = self.repo.lock();
        match std::fs::remove_file(self.root.join(&path)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let mut index = repo.index()?;
        let _ = index.remove_path(&path);
        Self::commit_index(&repo, &mut index, author, &format!("Deleted {id}"))?;
        Ok(())
    }

    fn delete_folder(&self, path: &str, author: &Author) -> Result<()> {
        let repo = self.repo.lock();
        match std::fs::remove_dir_all(self.root.join(path)) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        let mut index = repo.index()?;
        index.remove_dir(Path::new(path), 0)?;
        Self::commit_index(&repo, &mut index, author, &format!("Deleted folder {path}"))?;
        Ok(())
    }

    fn history(&self, id: &str) -> Result<Vec<CommitInfo>> {
        let path = Self::source(id);
        let repo = self.repo.lock();
        if repo.head().is_err() {
            return Ok(Vec::new());
        }
        let mut walk = repo.revwalk()?;
        walk.set_sorting(Sort::TIME)?;
        walk.push_head()?;
        let mut out = Vec::new();
        for oid in walk {
            let commit = repo.find_commit(oid?)?;
            if Self::touches(&commit, &path)? {
                out.push(Self::commit_info(&commit));
            }
        }
        Ok(out)
    }

    fn history_diff(&self, id: &str, sha: &str) -> Result<String> {
        let oid = Oid::from_str(sha).map_err(|_| WikiError::InvalidCommit)?;
        let repo = self.repo.lock();
        let commit = repo.find_commit(oid).map_err(|_| WikiError::InvalidCommit)?;
        let new_tree = commit.tree()?;
        let old_tree = match commit.parents().next() {
            Some(parent) => Some(parent.tree()?),
            None => None,
        };
        let mut opts = DiffOptions::new();
        opts.pathspec(Self::source(id));
        let diff = repo.diff_tree_to_tree(old_tree.as_ref(), Some(&new_tree), Some(&mut opts))?;
        let mut patch = String::new();
        diff.print(DiffFormat::Patch, |_, _, line| {
            if matches!(line.origin(), '+' | '-' | ' ') {
                patch.push(line.origin());
            }
            patch.push_str(&String::from_utf8_lossy(line.content()));
            true
        })?;
        if patch.is_empty() {
            return Err(WikiError::NoDiff);
        }
        Ok(patch)
    }

    fn last_edit(&self, id: &str) -> Result<Option<CommitInfo>> {
        Ok(self.history(id)?.into_iter().next())
    }

    fn commit_uploads(&self, message: &str) -> Result<()> {
        let repo = self.repo.lock();
        let mut index = repo.index()?;
        index.add_all(["uploads"].iter(), IndexAddOption::DEFAULT, None)?;
        index.update_all(["uploads"].iter(), None)?;
        Self::commit_index(&repo, &mut index, &Author::system(), message)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, body).unwrap();
    }

    #[test]
    fn history_follows_one_document() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitStorage::open(dir.path()).unwrap();
        let alice = Author::new("Alice", "alice@example.com");

        write(dir.path(), "a.md", "one");
        git.commit_document("a", &alice).unwrap();
        write(dir.path(), "b.md", "other");
        git.commit_document("b", &alice).unwrap();
        write(dir.path(), "a.md", "two");
        git.commit_document("a", &alice).unwrap();
        // unchanged content does not produce a commit
        git.commit_document("a", &alice).unwrap();

        let history = git.history("a").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].author_email, "alice@example.com");
        assert_eq!(history[0].commit.len(), 40);
        assert_eq!(git.last_edit("a").unwrap(), Some(history[0].clone()));

        let diff = git.history_diff("a", &history[0].commit).unwrap();
        assert!(diff.contains("-one"));
        assert!(diff.contains("+two"));
        assert!(matches!(
            git.history_diff("b", &history[0].commit),
            Err(WikiError::NoDiff)
        ));
        assert!(matches!(
            git.history_diff("a", &"0".repeat(40)),
            Err(WikiError::InvalidCommit)
        ));
    }

    #[test]
    fn move_and_delete() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitStorage::open(dir.path()).unwrap();
        let author = Author::system();

        write(dir.path(), "x.md", "body");
        git.commit_document("x", &author).unwrap();
        git.move_document("x", "deep/y", &author).unwrap();
        assert!(!dir.path().join("x.md").exists());
        assert_eq!(std::fs::read_to_string(dir.path().join("deep/y.md")).unwrap(), "body");
        assert_eq!(git.history("deep/y").unwrap().len(), 1);

        write(dir.path(), "deep/y/child.md", "c");
        git.commit_document("deep/y/child", &author).unwrap();
        git.delete_folder("deep/y", &author).unwrap();
        assert!(!dir.path().join("deep/y").exists());
        git.delete_document("deep/y", &author).unwrap();
        assert!(git.last_edit("deep/y").unwrap().is_some());
        assert!(!dir.path().join("deep/y.md").exists());
    }

    #[test]
    fn uploads_are_committed_together() {
        let dir = tempfile::tempdir().unwrap();
        let git = GitStorage::open(dir.path()).unwrap();
        write(dir.path(), "uploads/page/initializeFolder.md", "");
        git.commit_uploads("Uploads: page").unwrap();
        let repo = git.repo.lock();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(head.message(), Some("Uploads: page"));
        assert!(head
            .tree()
            .unwrap()
            .get_path(Path::new("uploads/page/initializeFolder.md"))
            .is_ok());
    }
}
