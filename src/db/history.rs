//! Append-only move history, keyed by organiser scan session.

use rusqlite::params;

use super::Database;
use crate::error::Result;

/// One recorded file move, written only after the move succeeded.
#[derive(Debug, Clone)]
pub struct MoveRecord {
    pub scan_id: String,
    pub source: String,
    pub destination: String,
    pub moved_at: String,
}

impl Database {
    pub fn record_move(&self, scan_id: &str, source: &str, destination: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO move_history (scan_id, source, destination) VALUES (?, ?, ?)",
            params![scan_id, source, destination],
        )?;
        Ok(())
    }

    pub fn moves_for_scan(&self, scan_id: &str) -> Result<Vec<MoveRecord>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT scan_id, source, destination, moved_at
             FROM move_history WHERE scan_id = ? ORDER BY id",
        )?;
        let moves = stmt
            .query_map([scan_id], |row| {
                Ok(MoveRecord {
                    scan_id: row.get(0)?,
                    source: row.get(1)?,
                    destination: row.get(2)?,
                    moved_at: row.get(3)?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(moves)
    }

    pub fn delete_moves_for_scan(&self, scan_id: &str) -> Result<usize> {
        let deleted = self
            .conn()
            .execute("DELETE FROM move_history WHERE scan_id = ?", [scan_id])?;
        Ok(deleted)
    }
}
