//! Tag repository and assignment write-back.
//!
//! A tag's identity is its name; deleting a tag cascades its assignment
//! rows. Assignments are unique per (media_id, tag_name) and re-assignment
//! replaces the prior confidence.

use rusqlite::params;

use super::{bytes_to_embedding, embedding_to_bytes, Database};
use crate::error::Result;
use crate::tagger::TagMatch;

/// A user-defined tag with its description embedding and individual
/// match threshold.
#[derive(Debug, Clone)]
pub struct TagDefinition {
    pub name: String,
    pub description: String,
    pub vector: Vec<f32>,
    /// Similarity threshold in [0,1]; each tag is gated in isolation.
    pub threshold: f32,
    pub color: Option<String>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// An assignment row as read back from storage.
#[derive(Debug, Clone)]
pub struct MediaTag {
    pub media_id: i64,
    pub tag_name: String,
    pub confidence: f32,
    pub user_assigned: bool,
    pub assigned_at: String,
}

impl Database {
    pub fn upsert_tag(&self, tag: &TagDefinition) -> Result<()> {
        let bytes = embedding_to_bytes(&tag.vector);
        self.conn().execute(
            r#"
            INSERT INTO tags (name, description, embedding, embedding_dim, threshold, color, active)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                description = excluded.description,
                embedding = excluded.embedding,
                embedding_dim = excluded.embedding_dim,
                threshold = excluded.threshold,
                color = excluded.color,
                active = excluded.active,
                updated_at = CURRENT_TIMESTAMP
            "#,
            params![
                tag.name,
                tag.description,
                bytes,
                tag.vector.len() as i64,
                tag.threshold,
                tag.color,
                tag.active
            ],
        )?;
        Ok(())
    }

    pub fn list_tags(&self) -> Result<Vec<TagDefinition>> {
        self.query_tags("SELECT name, description, embedding, threshold, color, active, created_at, updated_at FROM tags ORDER BY name")
    }

    /// Tags considered by the tagging run.
    pub fn list_active_tags(&self) -> Result<Vec<TagDefinition>> {
        self.query_tags("SELECT name, description, embedding, threshold, color, active, created_at, updated_at FROM tags WHERE active = 1 ORDER BY name")
    }

    fn query_tags(&self, sql: &str) -> Result<Vec<TagDefinition>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql)?;
        let tags = stmt
            .query_map([], |row| {
                let bytes: Vec<u8> = row.get(2)?;
                Ok(TagDefinition {
                    name: row.get(0)?,
                    description: row.get(1)?,
                    vector: bytes_to_embedding(&bytes),
                    threshold: row.get(3)?,
                    color: row.get(4)?,
                    active: row.get(5)?,
                    created_at: row.get(6)?,
                    updated_at: row.get(7)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tags)
    }

    /// Deletes the tag and, via foreign key cascade, all its assignments.
    pub fn delete_tag(&self, name: &str) -> Result<()> {
        self.conn().execute("DELETE FROM tags WHERE name = ?", [name])?;
        Ok(())
    }

    /// Write back one media item's tag evaluation.
    ///
    /// Matched tags are upserted (replacing confidence). Active tags that no
    /// longer match have their prior auto-assigned rows removed; rows the
    /// user assigned by hand are preserved.
    pub fn apply_tag_assignments(
        &self,
        media_id: i64,
        matches: &[TagMatch],
        active_tags: &[TagDefinition],
    ) -> Result<()> {
        let conn = self.conn();
        for m in matches {
            conn.execute(
                r#"
                INSERT INTO media_tags (media_id, tag_name, confidence, user_assigned)
                VALUES (?, ?, ?, 0)
                ON CONFLICT(media_id, tag_name) DO UPDATE SET
                    confidence = excluded.confidence,
                    assigned_at = CURRENT_TIMESTAMP
                "#,
                params![media_id, m.name, m.confidence],
            )?;
        }
        for tag in active_tags {
            if matches.iter().any(|m| m.name == tag.name) {
                continue;
            }
            conn.execute(
                "DELETE FROM media_tags WHERE media_id = ? AND tag_name = ? AND user_assigned = 0",
                params![media_id, tag.name],
            )?;
        }
        Ok(())
    }

    /// Record a tag the user assigned by hand.
    pub fn assign_user_tag(&self, media_id: i64, tag_name: &str) -> Result<()> {
        self.conn().execute(
            r#"
            INSERT INTO media_tags (media_id, tag_name, confidence, user_assigned)
            VALUES (?, ?, 1.0, 1)
            ON CONFLICT(media_id, tag_name) DO UPDATE SET
                user_assigned = 1,
                assigned_at = CURRENT_TIMESTAMP
            "#,
            params![media_id, tag_name],
        )?;
        Ok(())
    }

    pub fn media_tags(&self, media_id: i64) -> Result<Vec<MediaTag>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT media_id, tag_name, confidence, user_assigned, assigned_at
             FROM media_tags WHERE media_id = ? ORDER BY tag_name",
        )?;
        let tags = stmt
            .query_map([media_id], |row| {
                Ok(MediaTag {
                    media_id: row.get(0)?,
                    tag_name: row.get(1)?,
                    confidence: row.get(2)?,
                    user_assigned: row.get(3)?,
                    assigned_at: row.get(4)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tags)
    }
}
