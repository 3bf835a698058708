//! Index of upload folders and the files inside them.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::persist;

/// Images above this size are indexed as plain binaries.
const IMAGE_SIZE_LIMIT: u64 = 3 * 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Image,
    Binary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadFile {
    pub id: String,
    pub category: FileCategory,
    pub mime: String,
    /// Folder row id, `f:<folder>`.
    pub folder: String,
    pub filename: String,
    pub basename: String,
    pub filesize: u64,
}

/// Produces metadata for one uploaded file; `None` skips it.
pub trait FileInspector: Send + Sync {
    fn inspect(&self, path: &Path, folder: &str, filename: &str) -> Result<Option<UploadFile>>;
}

pub fn folder_key(folder: &str) -> String {
    format!("f:{folder}")
}

pub fn file_key(folder: &str, filename: &str) -> String {
    hex::encode(Md5::digest(format!("{folder}/{filename}").as_bytes()))
}

/// Classifies by magic bytes, then by extension.
#[derive(Clone, Copy, Debug, Default)]
pub struct BasicInspector;

impl BasicInspector {
    fn sniff(head: &[u8]) -> Option<&'static str> {
        if head.starts_with(b"\x89PNG\r\n\x1a\n") {
            Some("image/png")
        } else if head.starts_with(&[0xFF, 0xD8, 0xFF]) {
            Some("image/jpeg")
        } else if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
            Some("image/gif")
        } else if head.starts_with(b"BM") {
            Some("image/bmp")
        } else if head.starts_with(b"%PDF") {
            Some("application/pdf")
        } else {
            None
        }
    }

    fn by_extension(path: &Path) -> &'static str {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        match ext.as_str() {
            "png" => "image/png",
            "jpg" | "jpeg" => "image/jpeg",
            "gif" => "image/gif",
            "bmp" => "image/bmp",
            "svg" => "image/svg+xml",
            "pdf" => "application/pdf",
            "md" => "text/markdown",
            "txt" => "text/plain",
            "zip" => "application/zip",
            "mp4" => "video/mp4",
            _ => "application/octet-stream",
        }
    }
}

impl FileInspector for BasicInspector {
    fn inspect(&self, path: &Path, folder: &str, filename: &str) -> Result<Option<UploadFile>> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Ok(None);
        }
        let mut head = Vec::with_capacity(16);
        std::fs::File::open(path)?.take(16).read_to_end(&mut head)?;
        let mime = Self::sniff(&head).unwrap_or_else(|| Self::by_extension(path));
        let image = matches!(mime, "image/png" | "image/jpeg" | "image/gif" | "image/bmp");
        Ok(Some(UploadFile {
            id: file_key(folder, filename),
            category: if image && meta.len() < IMAGE_SIZE_LIMIT {
                FileCategory::Image
            } else {
                FileCategory::Binary
            },
            mime: mime.to_string(),
            folder: folder_key(folder),
            filename: filename.to_string(),
            basename: Path::new(filename)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            filesize: meta.len(),
        }))
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Tables {
    folders: BTreeSet<String>,
    files: BTreeMap<String, UploadFile>,
}

pub struct UploadIndex {
    root: PathBuf,
    file: PathBuf,
    inspector: Box<dyn FileInspector>,
    tables: RwLock<Tables>,
}

impl UploadIndex {
    /// `root` is the `<repo>/uploads` directory; `file` the persisted table.
    pub fn open(
        root: impl Into<PathBuf>,
        file: impl Into<PathBuf>,
        inspector: Box<dyn FileInspector>,
    ) -> Result<Self> {
        let file = file.into();
        let tables = persist::load_json(&file)?;
        Ok(Self {
            root: root.into(),
            file,
            inspector,
            tables: RwLock::new(tables),
        })
    }

    pub fn register_folder(&self, id: &str) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.folders.insert(folder_key(id)) {
            persist::save_json(&self.file, &*tables)?;
        }
        Ok(())
    }

    /// Drop the folder row and every file row belonging to it.
    pub fn remove_folder(&self, id: &str) -> Result<()> {
        let key = folder_key(id);
        let mut tables = self.tables.write();
        tables.folders.remove(&key);
        tables.files.retain(|_, f| f.folder != key);
        persist::save_json(&self.file, &*tables)
    }

    /// Rebuild both tables from what is on disk.
    pub fn rescan(&self) -> Result<()> {
        let mut next = Tables::default();
        if self.root.is_dir() {
            for item in WalkDir::new(&self.root).min_depth(1) {
                let item = match item {
                    Ok(item) => item,
                    Err(err) => {
                        warn!(%err, "skipping unreadable upload path");
                        continue;
                    }
                };
                let rel = match item.path().strip_prefix(&self.root) {
                    Ok(rel) => rel,
                    Err(_) => continue,
                };
                if item.file_type().is_dir() {
                    next.folders.insert(folder_key(&rel.to_string_lossy()));
                    continue;
                }
                let folder = rel
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let filename = item.file_name().to_string_lossy().into_owned();
                match self.inspector.inspect(item.path(), &folder, &filename) {
                    Ok(Some(file)) => {
                        next.files.insert(file.id.clone(), file);
                    }
                    Ok(None) => {}
                    Err(err) => warn!(path = %item.path().display(), %err, "unable to inspect upload"),
                }
            }
        }
        info!(
            folders = next.folders.len(),
            files = next.files.len(),
            "uploads rescanned"
        );
        let mut tables = self.tables.write();
        *tables = next;
        persist::save_json(&self.file, &*tables)
    }

    pub fn folders(&self) -> Vec<String> {
        self.tables
            .read()
            .folders
            .iter()
            .filter_map(|k| k.strip_prefix("f:").map(str::to_string))
            .collect()
    }

    pub fn has_folder(&self, id: &str) -> bool {
        self.tables.read().folders.contains(&folder_key(id))
    }

    pub fn files_in(&self, folder: &str) -> Vec<UploadFile> {
        let key = folder_key(folder);
        self.tables
            .read()
            .files
            .values()
            .filter(|f| f.folder == key)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(dir: &tempfile::TempDir) -> UploadIndex {
        UploadIndex::open(
            dir.path().join("repo/uploads"),
            dir.path().join("data/uploads.json"),
            Box::new(BasicInspector),
        )
        .unwrap()
    }

    #[test]
    fn rescan_classifies_files() {
        let dir = tempfile::tempdir().unwrap();
        let folder = dir.path().join("repo/uploads/guide");
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join("logo.png"), b"\x89PNG\r\n\x1a\nrest").unwrap();
        std::fs::write(folder.join("notes.bin"), b"data").unwrap();

        let uploads = open(&dir);
        uploads.rescan().unwrap();
        assert!(uploads.has_folder("guide"));

        let mut files = uploads.files_in("guide");
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].category, FileCategory::Image);
        assert_eq!(files[0].mime, "image/png");
        assert_eq!(files[0].basename, "logo");
        assert_eq!(files[0].id, file_key("guide", "logo.png"));
        assert_eq!(files[1].category, FileCategory::Binary);
    }

    #[test]
    fn folder_rows_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let uploads = open(&dir);
        uploads.register_folder("a/b").unwrap();
        assert_eq!(open(&dir).folders(), vec!["a/b".to_string()]);
        uploads.remove_folder("a/b").unwrap();
        assert!(!open(&dir).has_folder("a/b"));
    }
}
