//! Embedding store: durable keyed collection of `(id, timestamp, vector)`
//! records, dual-backed by an interim SQLite table and a flushed flat
//! binary file.
//!
//! Writes land in the interim table (single-row upserts, safe for
//! concurrent workers). `drain_to_file` migrates accumulated rows into the
//! flat file and clears the table — one-way and idempotent. Reads merge
//! both backings, with the interim table superseding the file per id.

pub mod flatfile;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::db::{Database, MediaKind};
use crate::error::{Error, Result};

pub use flatfile::record_size;

/// One stored embedding. Created once per indexed media item and only
/// superseded by reinsertion under the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingRecord {
    pub media_id: i64,
    pub timestamp: i64,
    pub vector: Vec<f32>,
}

pub struct EmbeddingStore<'a> {
    db: &'a Database,
    file_path: PathBuf,
    modality: MediaKind,
    dimension: usize,
}

impl<'a> EmbeddingStore<'a> {
    pub fn new(db: &'a Database, file_path: PathBuf, modality: MediaKind, dimension: usize) -> Self {
        Self {
            db,
            file_path,
            modality,
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Upsert one record by media id.
    pub fn put(&self, record: &EmbeddingRecord) -> Result<()> {
        if record.vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }
        self.db.put_embedding_row(self.modality, record)
    }

    /// Ids present in either backing. Built once per indexing run to filter
    /// already-indexed media.
    pub fn existing_ids(&self) -> Result<HashSet<i64>> {
        let mut ids = self.db.embedding_row_ids(self.modality)?;
        for record in flatfile::read_records(&self.file_path, self.dimension)? {
            ids.insert(record.media_id);
        }
        Ok(ids)
    }

    /// All records, interim rows superseding file records per id.
    pub fn get_all(&self) -> Result<Vec<EmbeddingRecord>> {
        let mut by_id: HashMap<i64, EmbeddingRecord> = HashMap::new();
        let mut order: Vec<i64> = Vec::new();

        for record in flatfile::read_records(&self.file_path, self.dimension)? {
            self.check_dimension(&record)?;
            if !by_id.contains_key(&record.media_id) {
                order.push(record.media_id);
            }
            by_id.insert(record.media_id, record);
        }
        for record in self.db.embedding_rows(self.modality)? {
            self.check_dimension(&record)?;
            if !by_id.contains_key(&record.media_id) {
                order.push(record.media_id);
            }
            by_id.insert(record.media_id, record);
        }

        Ok(order
            .into_iter()
            .filter_map(|id| by_id.remove(&id))
            .collect())
    }

    /// Migrate interim rows into the flat file and clear the table.
    /// Draining an already-empty table is a no-op. Returns the number of
    /// records flushed.
    pub fn drain_to_file(&self) -> Result<usize> {
        let rows = self.db.embedding_rows(self.modality)?;
        if rows.is_empty() {
            return Ok(0);
        }
        for record in &rows {
            self.check_dimension(record)?;
        }
        flatfile::append_records(&self.file_path, self.dimension, &rows)?;
        self.db.delete_embedding_rows(self.modality)?;
        Ok(rows.len())
    }

    /// Drop every stored embedding, both backings.
    pub fn delete_all(&self) -> Result<()> {
        self.db.delete_embedding_rows(self.modality)?;
        if self.file_path.exists() {
            std::fs::remove_file(&self.file_path)?;
        }
        Ok(())
    }

    fn check_dimension(&self, record: &EmbeddingRecord) -> Result<()> {
        if record.vector.len() != self.dimension {
            return Err(Error::DimensionMismatch {
                expected: self.dimension,
                actual: record.vector.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, v: Vec<f32>) -> EmbeddingRecord {
        EmbeddingRecord {
            media_id: id,
            timestamp: id,
            vector: v,
        }
    }

    fn store_fixture<'a>(db: &'a Database, dir: &std::path::Path) -> EmbeddingStore<'a> {
        EmbeddingStore::new(db, dir.join("emb.bin"), MediaKind::Image, 2)
    }

    #[test]
    fn test_put_and_existing_ids() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = store_fixture(&db, dir.path());

        store.put(&record(1, vec![1.0, 0.0])).unwrap();
        store.put(&record(2, vec![0.0, 1.0])).unwrap();

        let ids = store.existing_ids().unwrap();
        assert!(ids.contains(&1) && ids.contains(&2));
    }

    #[test]
    fn test_put_rejects_wrong_dimension() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = store_fixture(&db, dir.path());

        let err = store.put(&record(1, vec![1.0, 0.0, 0.0])).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_drain_is_one_way_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = store_fixture(&db, dir.path());

        store.put(&record(1, vec![1.0, 0.0])).unwrap();
        store.put(&record(2, vec![0.0, 1.0])).unwrap();

        assert_eq!(store.drain_to_file().unwrap(), 2);
        // Table is now empty; ids survive via the file.
        assert_eq!(store.drain_to_file().unwrap(), 0);
        let ids = store.existing_ids().unwrap();
        assert_eq!(ids.len(), 2);
        assert_eq!(store.get_all().unwrap().len(), 2);
    }

    #[test]
    fn test_interim_row_supersedes_file_record() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = store_fixture(&db, dir.path());

        store.put(&record(1, vec![1.0, 0.0])).unwrap();
        store.drain_to_file().unwrap();

        // Re-index id 1 with a new vector; latest write wins.
        store
            .put(&EmbeddingRecord {
                media_id: 1,
                timestamp: 99,
                vector: vec![0.5, 0.5],
            })
            .unwrap();

        let all = store.get_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].timestamp, 99);
        assert_eq!(all[0].vector, vec![0.5, 0.5]);
    }

    #[test]
    fn test_delete_all_clears_both_backings() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = store_fixture(&db, dir.path());

        store.put(&record(1, vec![1.0, 0.0])).unwrap();
        store.drain_to_file().unwrap();
        store.put(&record(2, vec![0.0, 1.0])).unwrap();

        store.delete_all().unwrap();
        assert!(store.existing_ids().unwrap().is_empty());
        assert!(store.get_all().unwrap().is_empty());
    }
}
