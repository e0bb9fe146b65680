//! Storage module for persistent index data
//!
//! Provides SQLite-based persistence for embedded chunks and provider metadata.

mod database;

pub use database::{IndexDb, IndexMeta, StoredEntry};
