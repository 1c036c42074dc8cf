pub const SCHEMA: &str = r#"
-- Media catalogue: everything else keys on media.id
CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    kind TEXT NOT NULL,               -- 'image' or 'video'
    size_bytes INTEGER NOT NULL,
    added_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_media_kind ON media(kind);

-- Interim embedding rows, drained into the flat file once consumed.
-- One row per media item and modality; latest write wins.
CREATE TABLE IF NOT EXISTS embeddings (
    media_id INTEGER NOT NULL,
    modality TEXT NOT NULL,           -- 'image' or 'video'
    timestamp INTEGER NOT NULL,       -- unix millis
    embedding BLOB NOT NULL,          -- float32 array stored as bytes
    embedding_dim INTEGER NOT NULL,
    PRIMARY KEY (media_id, modality)
);

-- Prototype vectors: one per destination folder configured for
-- auto-organisation. category_id is the destination folder path.
CREATE TABLE IF NOT EXISTS prototypes (
    category_id TEXT PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    embedding BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL
);

-- User-defined tag descriptions with per-tag thresholds.
CREATE TABLE IF NOT EXISTS tags (
    name TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    embedding BLOB NOT NULL,
    embedding_dim INTEGER NOT NULL,
    threshold REAL NOT NULL,
    color TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

-- Media/tag assignments; (media_id, tag_name) is unique, re-assignment
-- replaces the prior confidence.
CREATE TABLE IF NOT EXISTS media_tags (
    media_id INTEGER NOT NULL,
    tag_name TEXT NOT NULL,
    confidence REAL NOT NULL,
    user_assigned INTEGER NOT NULL DEFAULT 0,
    assigned_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (media_id, tag_name),
    FOREIGN KEY (tag_name) REFERENCES tags(name) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_media_tags_tag ON media_tags(tag_name);

-- Append-only audit log of organiser moves, queried/deleted per scan_id.
CREATE TABLE IF NOT EXISTS move_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    scan_id TEXT NOT NULL,
    source TEXT NOT NULL,
    destination TEXT NOT NULL,
    moved_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE INDEX IF NOT EXISTS idx_move_history_scan ON move_history(scan_id);

-- Small key-value settings store (last used destination categories, etc.)
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Idempotent migrations applied after the base schema. Failures are
/// ignored (column already exists, etc.), matching `run_migrations`.
pub const MIGRATIONS: &[&str] = &[];
