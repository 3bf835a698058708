use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tantivy::{
    collector::TopDocs,
    directory::MmapDirectory,
    doc,
    query::QueryParser,
    schema::{Field, Schema, STORED, STRING, TEXT},
    Index, IndexReader, IndexWriter, ReloadPolicy, Term,
};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, warn};

use crate::error::Result;

const WRITER_HEAP: usize = 15_000_000;

/// What the search index knows about a page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexedEntry {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub parent: String,
    pub content: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub subtitle: String,
    pub score: f32,
}

pub struct SearchIndex {
    index: Index,
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    id: Field,
    title: Field,
    subtitle: Field,
    parent: Field,
    content: Field,
}

impl SearchIndex {
    fn schema() -> Schema {
        let mut builder = Schema::builder();
        builder.add_text_field("id", STRING | STORED);
        builder.add_text_field("title", TEXT | STORED);
        builder.add_text_field("subtitle", TEXT | STORED);
        builder.add_text_field("parent", TEXT);
        builder.add_text_field("content", TEXT);
        builder.build()
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let dir = MmapDirectory::open(path)?;
        Self::with_index(Index::open_or_create(dir, Self::schema())?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::with_index(Index::create_in_ram(Self::schema()))
    }

    fn with_index(index: Index) -> Result<Self> {
        let schema = index.schema();
        let field = |name: &str| schema.get_field(name).ok_or_else(|| {
            crate::error::WikiError::Search(format!("index schema lacks field {name}"))
        });
        let (id, title, subtitle, parent, content) = (
            field("id")?,
            field("title")?,
            field("subtitle")?,
            field("parent")?,
            field("content")?,
        );
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let writer = index.writer_with_num_threads(1, WRITER_HEAP)?;
        Ok(Self {
            index,
            reader,
            writer: Mutex::new(writer),
            id,
            title,
            subtitle,
            parent,
            content,
        })
    }

    /// Insert or replace the document for `entry.id`.
    pub fn add(&self, entry: &IndexedEntry) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id, &entry.id));
        writer.add_document(doc!(
            self.id => entry.id.as_str(),
            self.title => entry.title.as_str(),
            self.subtitle => entry.subtitle.as_str(),
            self.parent => entry.parent.as_str(),
            self.content => entry.content.as_str(),
        ))?;
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.delete_term(Term::from_field_text(self.id, id));
        writer.commit()?;
        drop(writer);
        self.reader.reload()?;
        Ok(())
    }

    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(
            &self.index,
            vec![self.title, self.subtitle, self.parent, self.content],
        );
        let q = parser.parse_query(query)?;
        let docs = searcher.search(&q, &TopDocs::with_limit(limit))?;
        let text = |doc: &tantivy::Document, field: Field| {
            doc.get_first(field)
                .and_then(|v| v.as_text())
                .unwrap_or_default()
                .to_string()
        };
        let mut hits = Vec::with_capacity(docs.len());
        for (score, addr) in docs {
            let doc = searcher.doc(addr)?;
            hits.push(SearchHit {
                id: text(&doc, self.id),
                title: text(&doc, self.title),
                subtitle: text(&doc, self.subtitle),
                score,
            });
        }
        Ok(hits)
    }

    pub fn contains(&self, id: &str) -> Result<bool> {
        let searcher = self.reader.searcher();
        let query = tantivy::query::TermQuery::new(
            Term::from_field_text(self.id, id),
            tantivy::schema::IndexRecordOption::Basic,
        );
        Ok(searcher.search(&query, &tantivy::collector::Count)? > 0)
    }
}

/// Fire-and-forget destination for search updates. Implementations log
/// their own failures; callers never wait on indexing.
#[async_trait]
pub trait SearchSink: Send + Sync {
    async fn add(&self, entry: IndexedEntry);
    async fn delete(&self, id: &str);
}

/// Writes straight through to the index.
#[async_trait]
impl SearchSink for SearchIndex {
    async fn add(&self, entry: IndexedEntry) {
        if let Err(err) = SearchIndex::add(self, &entry) {
            error!(entry = %entry.id, %err, "search add failed");
        }
    }

    async fn delete(&self, id: &str) {
        if let Err(err) = SearchIndex::delete(self, id) {
            error!(entry = id, %err, "search delete failed");
        }
    }
}

enum Update {
    Add(IndexedEntry),
    Delete,
}

/// Debounced writer running index updates on the blocking pool. A newer
/// update for the same id supersedes one that has not started yet.
pub struct LiveIndex {
    index: Arc<SearchIndex>,
    delay: Duration,
    pending: AsyncMutex<HashMap<String, JoinHandle<()>>>,
}

impl LiveIndex {
    pub fn new(index: Arc<SearchIndex>) -> Self {
        Self::with_delay(index, Duration::from_millis(100))
    }

    pub fn with_delay(index: Arc<SearchIndex>, delay: Duration) -> Self {
        Self {
            index,
            delay,
            pending: AsyncMutex::new(HashMap::new()),
        }
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    async fn apply(index: Arc<SearchIndex>, delay: Duration, id: String, update: Update) {
        sleep(delay).await;
        let res = tokio::task::spawn_blocking(move || match update {
            Update::Add(entry) => index.add(&entry),
            Update::Delete => index.delete(&id),
        })
        .await;
        match res {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(%err, "search update failed"),
            Err(err) => warn!(%err, "search update task aborted"),
        }
    }

    async fn schedule(&self, id: String, update: Update) {
        let mut pending = self.pending.lock().await;
        pending.retain(|_, handle| !handle.is_finished());
        if let Some(handle) = pending.remove(&id) {
            handle.abort();
        }
        let handle = tokio::spawn(Self::apply(self.index.clone(), self.delay, id.clone(), update));
        pending.insert(id, handle);
    }

    /// Wait for every scheduled update to land.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = {
            let mut pending = self.pending.lock().await;
            pending.drain().map(|(_, h)| h).collect()
        };
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[async_trait]
impl SearchSink for LiveIndex {
    async fn add(&self, entry: IndexedEntry) {
        self.schedule(entry.id.clone(), Update::Add(entry)).await;
    }

    async fn delete(&self, id: &str) {
        self.schedule(id.to_string(), Update::Delete).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, title: &str, content: &str) -> IndexedEntry {
        IndexedEntry {
            id: id.into(),
            title: title.into(),
            content: content.into(),
            ..IndexedEntry::default()
        }
    }

    #[test]
    fn add_replaces_and_delete_removes() {
        let index = SearchIndex::in_memory().unwrap();
        index.add(&entry("guide/rust", "Rust Guide", "ownership borrowing")).unwrap();
        index.add(&entry("guide/rust", "Rust Guide", "lifetimes")).unwrap();

        assert!(index.search("ownership", 10).unwrap().is_empty());
        let hits = index.search("lifetimes", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "guide/rust");
        assert_eq!(hits[0].title, "Rust Guide");

        index.delete("guide/rust").unwrap();
        assert!(!index.contains("guide/rust").unwrap());
    }

    #[tokio::test]
    async fn live_index_keeps_last_update() {
        let index = Arc::new(SearchIndex::in_memory().unwrap());
        let live = LiveIndex::with_delay(index.clone(), Duration::from_millis(20));
        live.add(entry("a", "A", "first")).await;
        live.delete("a").await;
        live.add(entry("b", "B", "second")).await;
        live.flush().await;

        assert!(!index.contains("a").unwrap());
        assert!(index.contains("b").unwrap());
    }
}
