//! SQLite persistence: media catalogue, interim embedding rows, prototype
//! and tag repositories, move history, settings.

mod schema;
pub mod embeddings;
pub mod history;
pub mod prototypes;
pub mod tags;

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::Result;

pub use embeddings::{bytes_to_embedding, embedding_to_bytes};
pub use history::MoveRecord;
pub use prototypes::PrototypeEmbedding;
pub use schema::{MIGRATIONS, SCHEMA};
pub use tags::{MediaTag, TagDefinition};

/// Media kind, fixed at scan time from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Image => "image",
            MediaKind::Video => "video",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "image" => Some(MediaKind::Image),
            "video" => Some(MediaKind::Video),
            _ => None,
        }
    }
}

/// A catalogued media item.
#[derive(Debug, Clone)]
pub struct MediaItem {
    pub id: i64,
    pub path: String,
    pub kind: MediaKind,
}

/// Database handle. The connection sits behind a mutex so per-item store
/// writes can come from any worker in the pool; every write is a
/// single-row upsert, so no coordination beyond the lock is needed.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn initialize(&self) -> Result<()> {
        let conn = self.conn();
        conn.execute_batch(SCHEMA)?;
        for migration in MIGRATIONS {
            let _ = conn.execute(migration, []);
        }
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    // ========================================================================
    // Media catalogue
    // ========================================================================

    /// Register a media file, keeping the existing row (and id) if the path
    /// is already catalogued. Returns the media id.
    pub fn register_media(&self, path: &Path, kind: MediaKind, size_bytes: u64) -> Result<i64> {
        let conn = self.conn();
        let path_str = path.to_string_lossy();
        conn.execute(
            "INSERT INTO media (path, kind, size_bytes) VALUES (?, ?, ?)
             ON CONFLICT(path) DO UPDATE SET size_bytes = excluded.size_bytes",
            rusqlite::params![path_str.as_ref(), kind.as_str(), size_bytes as i64],
        )?;
        let id: i64 = conn.query_row(
            "SELECT id FROM media WHERE path = ?",
            [path_str.as_ref()],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn media_path(&self, media_id: i64) -> Result<Option<String>> {
        let result = self.conn().query_row(
            "SELECT path FROM media WHERE id = ?",
            [media_id],
            |row| row.get(0),
        );
        match result {
            Ok(path) => Ok(Some(path)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn media_id_for_path(&self, path: &Path) -> Result<Option<i64>> {
        let result = self.conn().query_row(
            "SELECT id FROM media WHERE path = ?",
            [path.to_string_lossy().as_ref()],
            |row| row.get(0),
        );
        match result {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn update_media_path(&self, media_id: i64, new_path: &Path) -> Result<()> {
        self.conn().execute(
            "UPDATE media SET path = ? WHERE id = ?",
            rusqlite::params![new_path.to_string_lossy().as_ref(), media_id],
        )?;
        Ok(())
    }

    /// All catalogued ids of one kind, the candidate set for an indexing run.
    pub fn media_ids(&self, kind: MediaKind) -> Result<Vec<i64>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT id FROM media WHERE kind = ? ORDER BY id")?;
        let ids = stmt
            .query_map([kind.as_str()], |row| row.get(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(ids)
    }

    pub fn get_media(&self, media_id: i64) -> Result<Option<MediaItem>> {
        let result = self.conn().query_row(
            "SELECT id, path, kind FROM media WHERE id = ?",
            [media_id],
            |row| {
                let kind: String = row.get(2)?;
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, kind))
            },
        );
        match result {
            Ok((id, path, kind)) => Ok(MediaKind::from_str(&kind).map(|kind| MediaItem {
                id,
                path,
                kind,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    // ========================================================================
    // Settings
    // ========================================================================

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn().execute(
            "INSERT OR REPLACE INTO settings (key, value) VALUES (?, ?)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let result =
            self.conn()
                .query_row("SELECT value FROM settings WHERE key = ?", [key], |row| {
                    row.get(0)
                });
        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_media_is_upsert() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let id1 = db
            .register_media(Path::new("/photos/a.jpg"), MediaKind::Image, 100)
            .unwrap();
        let id2 = db
            .register_media(Path::new("/photos/a.jpg"), MediaKind::Image, 200)
            .unwrap();
        assert_eq!(id1, id2);

        let item = db.get_media(id1).unwrap().unwrap();
        assert_eq!(item.path, "/photos/a.jpg");
        assert_eq!(item.kind, MediaKind::Image);
    }

    #[test]
    fn test_media_ids_filtered_by_kind() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        db.register_media(Path::new("/p/a.jpg"), MediaKind::Image, 1)
            .unwrap();
        db.register_media(Path::new("/p/b.mp4"), MediaKind::Video, 1)
            .unwrap();

        assert_eq!(db.media_ids(MediaKind::Image).unwrap().len(), 1);
        assert_eq!(db.media_ids(MediaKind::Video).unwrap().len(), 1);
    }

    #[test]
    fn test_settings_round_trip() {
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        assert!(db.get_setting("missing").unwrap().is_none());
        db.set_setting("last_used_categories", "[\"/dest/a\"]").unwrap();
        db.set_setting("last_used_categories", "[\"/dest/b\"]").unwrap();
        assert_eq!(
            db.get_setting("last_used_categories").unwrap().unwrap(),
            "[\"/dest/b\"]"
        );
    }
}
