//! SQLite persistence for the vector index
//!
//! Every write runs inside a transaction, so a crash leaves either the old
//! or the new state on disk, never a mix.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Chunk, ProductCategory};

/// Provider bookkeeping for the vectors held in the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    pub provider: String,
    pub dimensions: usize,
}

/// A chunk with its embedding, as persisted
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
    /// Insertion sequence, used to break score ties
    pub seq: u64,
}

/// SQLite-backed index database
pub struct IndexDb {
    conn: Mutex<Connection>,
}

impl IndexDb {
    /// Create or open the database at the given path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                Error::store(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)
            .map_err(|e| Error::store(format!("Failed to open index {}: {}", path.display(), e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Create an in-memory database
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::store(format!("Failed to open in-memory index: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.migrate()?;
        Ok(db)
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock();

        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA temp_store=MEMORY;
        "#,
        )
        .map_err(|e| Error::store(format!("Failed to set pragmas: {}", e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS index_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                provider TEXT NOT NULL,
                dimensions INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS entries (
                id TEXT PRIMARY KEY,
                seq INTEGER NOT NULL,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                page_start INTEGER NOT NULL,
                page_end INTEGER NOT NULL,
                category TEXT NOT NULL,
                source_name TEXT NOT NULL,
                content TEXT NOT NULL,
                char_start INTEGER NOT NULL,
                char_end INTEGER NOT NULL,
                overlap_chars INTEGER NOT NULL,
                embedding BLOB NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_entries_document_id ON entries(document_id);
            CREATE INDEX IF NOT EXISTS idx_entries_category ON entries(category);
        "#,
        )
        .map_err(|e| Error::store(format!("Failed to create tables: {}", e)))?;

        Ok(())
    }

    /// Provider recorded for the stored vectors, if any
    pub fn load_meta(&self) -> Result<Option<IndexMeta>> {
        let conn = self.conn.lock();
        let meta = conn
            .query_row(
                "SELECT provider, dimensions FROM index_meta WHERE id = 1",
                [],
                |row| {
                    let provider: String = row.get(0)?;
                    let dimensions: i64 = row.get(1)?;
                    Ok(IndexMeta {
                        provider,
                        dimensions: dimensions as usize,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    /// Record the provider that produced the stored vectors
    pub fn save_meta(&self, meta: &IndexMeta) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO index_meta (id, provider, dimensions) VALUES (1, ?1, ?2)",
            params![meta.provider, meta.dimensions as i64],
        )?;
        Ok(())
    }

    /// Load every entry in insertion order
    pub fn load_entries(&self) -> Result<Vec<StoredEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT id, seq, document_id, chunk_index, page_start, page_end, category,
                   source_name, content, char_start, char_end, overlap_chars, embedding
            FROM entries ORDER BY seq ASC
            "#,
        )?;

        let rows = stmt.query_map([], row_to_raw)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    /// Upsert entries in one transaction
    pub fn upsert_entries(&self, entries: &[StoredEntry]) -> Result<()> {
        self.replace(&[], entries)
    }

    /// Delete the given documents' entries and insert `entries` in one transaction
    pub fn replace(&self, document_ids: &[Uuid], entries: &[StoredEntry]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        {
            let mut delete = tx.prepare("DELETE FROM entries WHERE document_id = ?1")?;
            for id in document_ids {
                delete.execute(params![id.to_string()])?;
            }

            let mut insert = tx.prepare(
                r#"
                INSERT OR REPLACE INTO entries (
                    id, seq, document_id, chunk_index, page_start, page_end, category,
                    source_name, content, char_start, char_end, overlap_chars, embedding
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                "#,
            )?;

            for entry in entries {
                let chunk = &entry.chunk;
                insert.execute(params![
                    chunk.id.to_string(),
                    entry.seq as i64,
                    chunk.document_id.to_string(),
                    chunk.chunk_index as i64,
                    chunk.page_start as i64,
                    chunk.page_end as i64,
                    chunk.category.as_str(),
                    chunk.source_name,
                    chunk.content,
                    chunk.char_start as i64,
                    chunk.char_end as i64,
                    chunk.overlap_chars as i64,
                    encode_vector(&entry.embedding),
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Delete entries by chunk ID in one transaction
    pub fn delete_ids(&self, ids: &[Uuid]) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mut removed = 0;
        {
            let mut stmt = tx.prepare("DELETE FROM entries WHERE id = ?1")?;
            for id in ids {
                removed += stmt.execute(params![id.to_string()])?;
            }
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Remove all entries and provider metadata
    pub fn clear(&self) -> Result<usize> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM entries", [])?;
        tx.execute("DELETE FROM index_meta", [])?;
        tx.commit()?;
        Ok(removed)
    }

    /// Number of persisted entries
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

/// Row as read from SQLite, before UUID and category parsing
struct RawEntry {
    id: String,
    seq: i64,
    document_id: String,
    chunk_index: i64,
    page_start: i64,
    page_end: i64,
    category: String,
    source_name: String,
    content: String,
    char_start: i64,
    char_end: i64,
    overlap_chars: i64,
    embedding: Vec<u8>,
}

fn row_to_raw(row: &Row<'_>) -> rusqlite::Result<RawEntry> {
    Ok(RawEntry {
        id: row.get(0)?,
        seq: row.get(1)?,
        document_id: row.get(2)?,
        chunk_index: row.get(3)?,
        page_start: row.get(4)?,
        page_end: row.get(5)?,
        category: row.get(6)?,
        source_name: row.get(7)?,
        content: row.get(8)?,
        char_start: row.get(9)?,
        char_end: row.get(10)?,
        overlap_chars: row.get(11)?,
        embedding: row.get(12)?,
    })
}

impl RawEntry {
    fn into_entry(self) -> Result<StoredEntry> {
        let id = parse_uuid(&self.id)?;
        let document_id = parse_uuid(&self.document_id)?;
        let category = ProductCategory::from_str(&self.category)
            .map_err(|_| Error::store(format!("Corrupt category '{}' for {}", self.category, id)))?;

        Ok(StoredEntry {
            chunk: Chunk {
                id,
                document_id,
                source_name: self.source_name,
                content: self.content,
                chunk_index: self.chunk_index as u32,
                page_start: self.page_start as u32,
                page_end: self.page_end as u32,
                category,
                char_start: self.char_start as usize,
                char_end: self.char_end as usize,
                overlap_chars: self.overlap_chars as usize,
            },
            embedding: decode_vector(&self.embedding)?,
            seq: self.seq as u64,
        })
    }
}

fn parse_uuid(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|e| Error::store(format!("Corrupt id '{}': {}", raw, e)))
}

/// Little-endian f32 encoding
fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(Error::store(format!(
            "Corrupt embedding blob of {} bytes",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}
