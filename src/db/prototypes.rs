//! Prototype repository: one learned vector per destination folder.

use rusqlite::params;

use super::{bytes_to_embedding, embedding_to_bytes, Database};
use crate::error::Result;
use crate::vector::l2_normalize;

/// Semantic center of a destination folder configured for auto-organisation.
#[derive(Debug, Clone)]
pub struct PrototypeEmbedding {
    /// Destination folder identity.
    pub category_id: String,
    pub timestamp: i64,
    pub vector: Vec<f32>,
}

/// Build a prototype vector from the embeddings of a destination's example
/// images: the L2-normalised centroid.
pub fn build_prototype(members: &[Vec<f32>]) -> Option<Vec<f32>> {
    let first = members.first()?;
    let dim = first.len();
    if dim == 0 || members.iter().any(|m| m.len() != dim) {
        return None;
    }

    let mut centroid = vec![0.0f32; dim];
    for member in members {
        for (c, x) in centroid.iter_mut().zip(member.iter()) {
            *c += x;
        }
    }
    let count = members.len() as f32;
    for c in centroid.iter_mut() {
        *c /= count;
    }
    l2_normalize(&mut centroid);
    Some(centroid)
}

impl Database {
    pub fn upsert_prototype(&self, prototype: &PrototypeEmbedding) -> Result<()> {
        let bytes = embedding_to_bytes(&prototype.vector);
        self.conn().execute(
            r#"
            INSERT OR REPLACE INTO prototypes (category_id, timestamp, embedding, embedding_dim)
            VALUES (?, ?, ?, ?)
            "#,
            params![
                prototype.category_id,
                prototype.timestamp,
                bytes,
                prototype.vector.len() as i64
            ],
        )?;
        Ok(())
    }

    pub fn list_prototypes(&self) -> Result<Vec<PrototypeEmbedding>> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT category_id, timestamp, embedding FROM prototypes ORDER BY category_id")?;
        let prototypes = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(PrototypeEmbedding {
                    category_id: row.get(0)?,
                    timestamp: row.get(1)?,
                    vector: bytes_to_embedding(&bytes),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(prototypes)
    }

    pub fn delete_prototype(&self, category_id: &str) -> Result<()> {
        self.conn().execute(
            "DELETE FROM prototypes WHERE category_id = ?",
            [category_id],
        )?;
        Ok(())
    }
}
