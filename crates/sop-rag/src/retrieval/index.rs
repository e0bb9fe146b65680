//! Persistent vector index with metadata-filtered cosine search
//!
//! Entries are written to SQLite first and mirrored in memory second, both
//! under the write lock, so a search never observes a half-applied upsert.
//! Searches only take the read lock and never touch disk.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::storage::{IndexDb, IndexMeta, StoredEntry};
use crate::types::{Chunk, ProductCategory, RetrievalResult, ScoredChunk};

/// Exact-match conjunction over chunk metadata; empty matches everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexFilter {
    #[serde(default)]
    pub category: Option<ProductCategory>,
    #[serde(default)]
    pub document_id: Option<Uuid>,
    /// Matches chunks whose page range covers this page
    #[serde(default)]
    pub page: Option<u32>,
}

impl IndexFilter {
    /// Filter that matches every entry
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category: ProductCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn document(document_id: Uuid) -> Self {
        Self {
            document_id: Some(document_id),
            ..Self::default()
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.category.is_none() && self.document_id.is_none() && self.page.is_none()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        self.category.map_or(true, |c| chunk.category == c)
            && self.document_id.map_or(true, |d| chunk.document_id == d)
            && self
                .page
                .map_or(true, |p| chunk.page_start <= p && p <= chunk.page_end)
    }
}

/// A chunk and its embedding, ready for upsert
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

impl IndexEntry {
    pub fn new(chunk: Chunk, embedding: Vec<f32>) -> Self {
        Self { chunk, embedding }
    }
}

#[derive(Default)]
struct IndexState {
    entries: HashMap<Uuid, StoredEntry>,
    meta: Option<IndexMeta>,
    next_seq: u64,
}

impl IndexState {
    fn matching(&self, filter: &IndexFilter) -> impl Iterator<Item = &StoredEntry> + '_ {
        let filter = filter.clone();
        self.entries.values().filter(move |e| filter.matches(&e.chunk))
    }

    /// Check entry vectors against the attached provider
    fn check_dimensions(&self, entries: &[IndexEntry]) -> Result<usize> {
        let meta = self.meta.as_ref().ok_or_else(|| {
            Error::Config("No embedding provider attached to the index".to_string())
        })?;

        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != meta.dimensions) {
            return Err(Error::DimensionMismatch {
                expected: meta.dimensions,
                actual: bad.embedding.len(),
                index_provider: meta.provider.clone(),
                provider: "upsert".to_string(),
            });
        }
        Ok(meta.dimensions)
    }

    /// Assign sequence numbers, keeping the original for known IDs
    fn stamp(&mut self, entries: Vec<IndexEntry>) -> Vec<StoredEntry> {
        entries
            .into_iter()
            .map(|entry| {
                let seq = match self.entries.get(&entry.chunk.id) {
                    Some(existing) => existing.seq,
                    None => {
                        let seq = self.next_seq;
                        self.next_seq += 1;
                        seq
                    }
                };
                StoredEntry {
                    chunk: entry.chunk,
                    embedding: entry.embedding,
                    seq,
                }
            })
            .collect()
    }
}

/// Vector index over embedded chunks
pub struct VectorIndex {
    db: IndexDb,
    state: RwLock<IndexState>,
}

impl VectorIndex {
    /// Open (or create) the index stored at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let index = Self::from_db(IndexDb::new(path)?)?;
        tracing::info!(
            "Opened vector index at {} ({} entries)",
            path.display(),
            index.count(&IndexFilter::all())
        );
        Ok(index)
    }

    /// Non-persistent index, mainly for tests
    pub fn in_memory() -> Result<Self> {
        Self::from_db(IndexDb::in_memory()?)
    }

    /// Delete the store at `path` and open an empty one in its place
    ///
    /// All indexed data is lost; nothing calls this implicitly.
    pub fn recreate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::warn!("Recreating vector index at {}; existing entries are discarded", path.display());

        for suffix in ["", "-wal", "-shm"] {
            let mut file = path.as_os_str().to_owned();
            file.push(suffix);
            match std::fs::remove_file(&file) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(Error::store(format!(
                        "Failed to remove {}: {}",
                        Path::new(&file).display(),
                        e
                    )))
                }
            }
        }

        Self::open(path)
    }

    fn from_db(db: IndexDb) -> Result<Self> {
        let meta = db.load_meta()?;
        let stored = db.load_entries()?;

        if let Some(meta) = &meta {
            if let Some(bad) = stored.iter().find(|e| e.embedding.len() != meta.dimensions) {
                return Err(Error::store(format!(
                    "Entry {} has {} dims but the index records {}",
                    bad.chunk.id,
                    bad.embedding.len(),
                    meta.dimensions
                )));
            }
        } else if !stored.is_empty() {
            return Err(Error::store("Index has entries but no provider metadata"));
        }

        let next_seq = stored.iter().map(|e| e.seq + 1).max().unwrap_or(0);
        let entries = stored.into_iter().map(|e| (e.chunk.id, e)).collect();

        Ok(Self {
            db,
            state: RwLock::new(IndexState {
                entries,
                meta,
                next_seq,
            }),
        })
    }

    /// Provider that produced the stored vectors
    pub fn provider(&self) -> Option<IndexMeta> {
        self.state.read().meta.clone()
    }

    /// Dimensionality of the stored vectors
    pub fn dimensions(&self) -> Option<usize> {
        self.state.read().meta.as_ref().map(|m| m.dimensions)
    }

    /// Bind an embedding provider to this index
    ///
    /// Fails with `DimensionMismatch` when the index already holds vectors of
    /// another dimensionality. An empty index takes on the new provider.
    pub fn attach_provider(&self, name: &str, dimensions: usize) -> Result<()> {
        let mut state = self.state.write();
        let populated = !state.entries.is_empty();

        if let Some(meta) = &state.meta {
            if meta.dimensions == dimensions && meta.provider == name {
                return Ok(());
            }
            if populated {
                if meta.dimensions != dimensions {
                    return Err(Error::DimensionMismatch {
                        expected: meta.dimensions,
                        actual: dimensions,
                        index_provider: meta.provider.clone(),
                        provider: name.to_string(),
                    });
                }
                tracing::warn!(
                    "Provider '{}' attached to an index built by '{}' with matching dimensions ({})",
                    name,
                    meta.provider,
                    dimensions
                );
                return Ok(());
            }
        }

        let meta = IndexMeta {
            provider: name.to_string(),
            dimensions,
        };
        self.db.save_meta(&meta)?;
        tracing::info!("Index bound to provider '{}' ({} dims)", name, dimensions);
        state.meta = Some(meta);
        Ok(())
    }

    /// Insert or replace entries keyed by chunk ID
    pub fn upsert(&self, entries: Vec<IndexEntry>) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let mut state = self.state.write();
        state.check_dimensions(&entries)?;

        let seq_before = state.next_seq;
        let stored = state.stamp(entries);
        if let Err(e) = self.db.upsert_entries(&stored) {
            state.next_seq = seq_before;
            return Err(e);
        }

        let count = stored.len();
        for entry in stored {
            state.entries.insert(entry.chunk.id, entry);
        }
        Ok(count)
    }

    /// Replace every entry of `document_id` with `entries`
    ///
    /// Chunks of the previous version that no longer exist are removed in the
    /// same transaction.
    pub fn replace_document(&self, document_id: Uuid, entries: Vec<IndexEntry>) -> Result<usize> {
        if let Some(stray) = entries.iter().find(|e| e.chunk.document_id != document_id) {
            return Err(Error::internal(format!(
                "Chunk {} belongs to document {}, not {}",
                stray.chunk.id, stray.chunk.document_id, document_id
            )));
        }

        let mut state = self.state.write();
        if !entries.is_empty() {
            state.check_dimensions(&entries)?;
        }

        let seq_before = state.next_seq;
        let stored = state.stamp(entries);
        if let Err(e) = self.db.replace(&[document_id], &stored) {
            state.next_seq = seq_before;
            return Err(e);
        }

        state.entries.retain(|_, e| e.chunk.document_id != document_id);
        let count = stored.len();
        for entry in stored {
            state.entries.insert(entry.chunk.id, entry);
        }
        Ok(count)
    }

    /// Top `k` entries matching `filter` with cosine similarity >= `min_score`
    ///
    /// Descending by score; equal scores keep insertion order.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        filter: &IndexFilter,
        min_score: f32,
    ) -> Result<RetrievalResult> {
        let state = self.state.read();

        let meta = match &state.meta {
            Some(meta) => meta,
            None => return Ok(RetrievalResult::empty()),
        };
        if query.len() != meta.dimensions {
            return Err(Error::DimensionMismatch {
                expected: meta.dimensions,
                actual: query.len(),
                index_provider: meta.provider.clone(),
                provider: "query".to_string(),
            });
        }
        if k == 0 {
            return Ok(RetrievalResult::empty());
        }

        let mut scored: Vec<(f32, u64, &StoredEntry)> = state
            .matching(filter)
            .map(|e| (cosine_similarity(query, &e.embedding), e.seq, e))
            .filter(|(score, _, _)| *score >= min_score)
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(k);

        tracing::debug!(
            "Search matched {} entries (k={}, min_score={}, filter={:?})",
            scored.len(),
            k,
            min_score,
            filter
        );

        Ok(RetrievalResult::new(
            scored
                .into_iter()
                .map(|(score, _, e)| ScoredChunk {
                    chunk: e.chunk.clone(),
                    score,
                })
                .collect(),
        ))
    }

    /// Number of entries matching `filter`
    pub fn count(&self, filter: &IndexFilter) -> usize {
        self.state.read().matching(filter).count()
    }

    /// Number of distinct documents matching `filter`
    pub fn document_count(&self, filter: &IndexFilter) -> usize {
        self.state
            .read()
            .matching(filter)
            .map(|e| e.chunk.document_id)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Chunk counts per category present in the index
    pub fn categories(&self) -> BTreeMap<ProductCategory, usize> {
        let state = self.state.read();
        let mut counts = BTreeMap::new();
        for entry in state.entries.values() {
            *counts.entry(entry.chunk.category).or_insert(0) += 1;
        }
        counts
    }

    /// Remove entries matching `filter`; an empty filter also unbinds the provider
    pub fn clear(&self, filter: &IndexFilter) -> Result<usize> {
        let mut state = self.state.write();

        if filter.is_empty() {
            let removed = self.db.clear()?;
            state.entries.clear();
            state.meta = None;
            state.next_seq = 0;
            tracing::info!("Cleared vector index ({} entries)", removed);
            return Ok(removed);
        }

        let ids: Vec<Uuid> = state.matching(filter).map(|e| e.chunk.id).collect();
        self.db.delete_ids(&ids)?;
        for id in &ids {
            state.entries.remove(id);
        }
        tracing::info!("Cleared {} entries matching {:?}", ids.len(), filter);
        Ok(ids.len())
    }
}

/// Cosine similarity clamped to [0, 1]; zero vectors score 0
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Chunk;

    fn chunk(doc: Uuid, index: u32, category: ProductCategory, page: u32) -> Chunk {
        Chunk {
            id: Chunk::stable_id(&doc, index),
            document_id: doc,
            source_name: format!("{}.pdf", category.as_str()),
            content: format!("chunk {}", index),
            chunk_index: index,
            page_start: page,
            page_end: page,
            category,
            char_start: 0,
            char_end: 7,
            overlap_chars: 0,
        }
    }

    fn index_with(dims: usize) -> VectorIndex {
        let index = VectorIndex::in_memory().unwrap();
        index.attach_provider("test", dims).unwrap();
        index
    }

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_reupsert_replaces() {
        let index = index_with(2);
        let doc = Uuid::new_v4();
        let entries = vec![
            IndexEntry::new(chunk(doc, 0, ProductCategory::General, 1), vec![1.0, 0.0]),
            IndexEntry::new(chunk(doc, 1, ProductCategory::General, 1), vec![0.0, 1.0]),
        ];
        index.upsert(entries.clone()).unwrap();
        index.upsert(entries).unwrap();
        assert_eq!(index.count(&IndexFilter::all()), 2);
    }

    #[test]
    fn test_filter_and_threshold() {
        let index = index_with(2);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        index
            .upsert(vec![
                IndexEntry::new(chunk(a, 0, ProductCategory::Everbridge, 1), vec![1.0, 0.0]),
                IndexEntry::new(chunk(a, 1, ProductCategory::Everbridge, 2), vec![0.6, 0.8]),
                IndexEntry::new(chunk(b, 0, ProductCategory::Milestone, 1), vec![1.0, 0.0]),
            ])
            .unwrap();

        let result = index
            .search(&[1.0, 0.0], 10, &IndexFilter::category(ProductCategory::Everbridge), 0.7)
            .unwrap();
        assert_eq!(result.len(), 1);
        assert!(result.hits.iter().all(|h| h.chunk.category == ProductCategory::Everbridge));
        assert!(result.hits.iter().all(|h| h.score >= 0.7));

        let paged = index
            .search(&[1.0, 0.0], 10, &IndexFilter::document(a).with_page(2), 0.0)
            .unwrap();
        assert_eq!(paged.len(), 1);
        assert_eq!(paged.hits[0].chunk.chunk_index, 1);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let index = index_with(2);
        let doc = Uuid::new_v4();
        let entries: Vec<IndexEntry> = (0..5)
            .map(|i| IndexEntry::new(chunk(doc, i, ProductCategory::General, 1), vec![1.0, 1.0]))
            .collect();
        index.upsert(entries).unwrap();

        let result = index.search(&[1.0, 1.0], 3, &IndexFilter::all(), 0.0).unwrap();
        let order: Vec<u32> = result.hits.iter().map(|h| h.chunk.chunk_index).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_dimension_guard() {
        let index = index_with(2);
        let doc = Uuid::new_v4();
        index
            .upsert(vec![IndexEntry::new(chunk(doc, 0, ProductCategory::General, 1), vec![1.0, 0.0])])
            .unwrap();

        assert!(matches!(
            index.attach_provider("other", 3),
            Err(Error::DimensionMismatch { expected: 2, actual: 3, .. })
        ));
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1, &IndexFilter::all(), 0.0),
            Err(Error::DimensionMismatch { .. })
        ));
        let bad = IndexEntry::new(chunk(doc, 1, ProductCategory::General, 1), vec![1.0]);
        assert!(matches!(index.upsert(vec![bad]), Err(Error::DimensionMismatch { .. })));
    }

    #[test]
    fn test_replace_document_drops_stale_chunks() {
        let index = index_with(2);
        let doc = Uuid::new_v4();
        let three: Vec<IndexEntry> = (0..3)
            .map(|i| IndexEntry::new(chunk(doc, i, ProductCategory::General, 1), vec![1.0, 0.0]))
            .collect();
        index.replace_document(doc, three).unwrap();

        let one = vec![IndexEntry::new(chunk(doc, 0, ProductCategory::General, 1), vec![0.0, 1.0])];
        index.replace_document(doc, one).unwrap();
        assert_eq!(index.count(&IndexFilter::document(doc)), 1);
    }

    #[test]
    fn test_clear_filtered_and_all() {
        let index = index_with(2);
        index
            .upsert(vec![
                IndexEntry::new(chunk(Uuid::new_v4(), 0, ProductCategory::Everbridge, 1), vec![1.0, 0.0]),
                IndexEntry::new(chunk(Uuid::new_v4(), 0, ProductCategory::Milestone, 1), vec![1.0, 0.0]),
            ])
            .unwrap();

        assert_eq!(index.clear(&IndexFilter::category(ProductCategory::Milestone)).unwrap(), 1);
        assert_eq!(index.categories().len(), 1);
        assert_eq!(index.clear(&IndexFilter::all()).unwrap(), 1);
        assert_eq!(index.count(&IndexFilter::all()), 0);
        assert!(index.provider().is_none());
        assert!(index.attach_provider("other", 3).is_ok());
    }

    #[test]
    fn test_reopen_restores_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let doc = Uuid::new_v4();

        let before = {
            let index = VectorIndex::open(&path).unwrap();
            index.attach_provider("test", 2).unwrap();
            index
                .upsert(vec![
                    IndexEntry::new(chunk(doc, 0, ProductCategory::General, 1), vec![1.0, 0.0]),
                    IndexEntry::new(chunk(doc, 1, ProductCategory::General, 2), vec![0.7, 0.7]),
                ])
                .unwrap();
            index.search(&[1.0, 0.2], 5, &IndexFilter::all(), 0.0).unwrap()
        };

        let index = VectorIndex::open(&path).unwrap();
        let after = index.search(&[1.0, 0.2], 5, &IndexFilter::all(), 0.0).unwrap();
        assert_eq!(index.count(&IndexFilter::all()), 2);
        let ids = |r: &RetrievalResult| r.hits.iter().map(|h| h.chunk.id).collect::<Vec<_>>();
        assert_eq!(ids(&before), ids(&after));
        assert_eq!(index.dimensions(), Some(2));
    }

    #[test]
    fn test_recreate_discards_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        {
            let index = VectorIndex::open(&path).unwrap();
            index.attach_provider("test", 2).unwrap();
            index
                .upsert(vec![IndexEntry::new(chunk(Uuid::new_v4(), 0, ProductCategory::General, 1), vec![1.0, 0.0])])
                .unwrap();
        }

        let index = VectorIndex::recreate(&path).unwrap();
        assert_eq!(index.count(&IndexFilter::all()), 0);
        assert!(index.provider().is_none());
    }
}
