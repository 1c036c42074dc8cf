//! Interim embedding rows, drained into the flat file by the store.

use std::collections::HashSet;

use rusqlite::params;

use super::{Database, MediaKind};
use crate::error::Result;
use crate::store::EmbeddingRecord;

impl Database {
    /// Upsert one embedding row; latest write wins per (media_id, modality).
    pub fn put_embedding_row(&self, modality: MediaKind, record: &EmbeddingRecord) -> Result<()> {
        let bytes = embedding_to_bytes(&record.vector);
        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO embeddings (media_id, modality, timestamp, embedding, embedding_dim)
            VALUES (?, ?, ?, ?, ?)
            "#,
            params![
                record.media_id,
                modality.as_str(),
                record.timestamp,
                bytes,
                record.vector.len() as i64
            ],
        )?;
        Ok(())
    }

    /// All interim rows for a modality, in insertion order.
    pub fn embedding_rows(&self, modality: MediaKind) -> Result<Vec<EmbeddingRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT media_id, timestamp, embedding FROM embeddings WHERE modality = ? ORDER BY rowid",
        )?;
        let records = stmt
            .query_map([modality.as_str()], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(EmbeddingRecord {
                    media_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    vector: bytes_to_embedding(&bytes),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    pub fn embedding_row_ids(&self, modality: MediaKind) -> Result<HashSet<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT media_id FROM embeddings WHERE modality = ?")?;
        let ids = stmt
            .query_map([modality.as_str()], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    pub fn delete_embedding_rows(&self, modality: MediaKind) -> Result<()> {
        self.conn().execute(
            "DELETE FROM embeddings WHERE modality = ?",
            [modality.as_str()],
        )?;
        Ok(())
    }
}

/// Convert f32 slice to bytes for storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for &val in embedding {
        bytes.extend_from_slice(&val.to_le_bytes());
    }
    bytes
}

/// Convert bytes back to f32 vector.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap();
            f32::from_le_bytes(arr)
        })
        .collect()
}
