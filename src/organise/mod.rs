//! Auto-organisation: classify media against destination prototypes and
//! move confident matches into their folders.
//!
//! Every physical move is journalled per scan session, and only after the
//! filesystem operation succeeded, so the history is always a faithful
//! record of what actually happened and a scan can be undone later.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::time::Instant;

use crate::classify::{classify, Decision};
use crate::config::ClassifyConfig;
use crate::db::{Database, PrototypeEmbedding};
use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::index::ConcurrencyController;
use crate::index::concurrency::run_chunked;
use crate::media::{ContentResolver, MediaContent};
use crate::tasks::{RunSummary, TaskProgress, TaskUpdate};

const LAST_USED_CATEGORIES_KEY: &str = "last_used_categories";

/// Result of one organise scan.
#[derive(Debug, Clone)]
pub struct OrganiseOutcome {
    /// Session id under which this scan's moves are journalled.
    pub scan_id: String,
    pub moved: usize,
    /// Items classified but left in place (no confident destination).
    pub unmatched: usize,
    pub failed: usize,
    pub cancelled: bool,
    pub elapsed: std::time::Duration,
}

pub struct Organiser<'a, R: ContentResolver, E: Embedder> {
    db: &'a Database,
    resolver: &'a R,
    embedder: &'a E,
    controller: &'a ConcurrencyController,
    config: &'a ClassifyConfig,
    /// Serializes destination-name selection against the move itself, so
    /// two workers cannot claim the same free filename.
    move_lock: Mutex<()>,
}

impl<'a, R: ContentResolver, E: Embedder> Organiser<'a, R, E> {
    pub fn new(
        db: &'a Database,
        resolver: &'a R,
        embedder: &'a E,
        controller: &'a ConcurrencyController,
        config: &'a ClassifyConfig,
    ) -> Self {
        Self {
            db,
            resolver,
            embedder,
            controller,
            config,
            move_lock: Mutex::new(()),
        }
    }

    /// Classify each media item and move confident matches into their
    /// prototype's folder. Items below threshold or inside the margin stay
    /// put; a wrong move costs more than no move.
    pub fn run(
        &self,
        ids: &[i64],
        progress: Option<&Sender<TaskUpdate>>,
        cancel: &AtomicBool,
    ) -> Result<OrganiseOutcome> {
        let started = Instant::now();
        let scan_id = format!("scan-{}", chrono::Utc::now().format("%Y%m%d-%H%M%S%.3f"));
        let prototypes = self.db.list_prototypes()?;
        let total = ids.len();

        send(progress, TaskUpdate::Started { total });

        if prototypes.is_empty() {
            tracing::info!("No destination prototypes; nothing to organise");
            send(
                progress,
                TaskUpdate::Completed {
                    summary: RunSummary::new("No destination prototypes configured"),
                },
            );
            return Ok(OrganiseOutcome {
                scan_id,
                moved: 0,
                unmatched: 0,
                failed: 0,
                cancelled: false,
                elapsed: started.elapsed(),
            });
        }

        let moved = AtomicUsize::new(0);
        let unmatched = AtomicUsize::new(0);
        // Destinations that actually received a file this run.
        let used_categories: Mutex<BTreeSet<String>> = Mutex::new(BTreeSet::new());
        // Bump-and-send under one lock so ticks stay in counting order.
        let progress_counter = Mutex::new(0usize);

        let stats = run_chunked(ids, self.controller, cancel, |&id| {
            match self.organise_one(id, &scan_id, &prototypes) {
                Ok(Some(category_id)) => {
                    moved.fetch_add(1, Ordering::SeqCst);
                    used_categories
                        .lock()
                        .expect("used categories poisoned")
                        .insert(category_id);
                }
                Ok(None) => {
                    unmatched.fetch_add(1, Ordering::SeqCst);
                }
                Err(e) => {
                    if !e.is_fatal() {
                        tracing::warn!(media_id = id, error = %e, "Failed to organise media item");
                    }
                    return Err(e);
                }
            }
            let mut current = progress_counter.lock().expect("progress counter poisoned");
            *current += 1;
            send(
                progress,
                TaskUpdate::Progress(TaskProgress::new(*current, total)),
            );
            Ok(())
        });

        if let Some(fatal) = stats.fatal {
            tracing::error!(error = %fatal, "Organise scan failed");
            send(
                progress,
                TaskUpdate::Failed {
                    error: fatal.to_string(),
                },
            );
            return Err(fatal);
        }

        let outcome = OrganiseOutcome {
            scan_id,
            moved: moved.into_inner(),
            unmatched: unmatched.into_inner(),
            failed: stats.failed,
            cancelled: stats.cancelled,
            elapsed: started.elapsed(),
        };

        if outcome.cancelled {
            send(progress, TaskUpdate::Cancelled);
        } else {
            // Defaults for the next run reflect only where files landed; a
            // cancelled or move-free run leaves the previous set alone.
            let used = used_categories.into_inner().expect("used categories poisoned");
            self.remember_categories(&used);
            send(
                progress,
                TaskUpdate::Completed {
                    summary: RunSummary::new(format!(
                        "Moved {} items ({} left in place, {} failed)",
                        outcome.moved, outcome.unmatched, outcome.failed
                    )),
                },
            );
        }

        Ok(outcome)
    }

    /// Returns the destination category if the item was moved, `None` if it
    /// stays in place.
    fn organise_one(
        &self,
        id: i64,
        scan_id: &str,
        prototypes: &[PrototypeEmbedding],
    ) -> Result<Option<String>> {
        let embedding = match self.resolver.resolve(id)? {
            MediaContent::Image(img) => self.embedder.embed_image(&img)?,
            MediaContent::Frames(frames) => self.embedder.embed_frames(&frames)?,
        };

        let category_id = match classify(&embedding, prototypes, self.config) {
            Decision::Match { category_id, .. } => category_id,
            Decision::NoMatch => return Ok(None),
        };

        let source = self
            .db
            .media_path(id)?
            .map(PathBuf::from)
            .ok_or(Error::Decode {
                id,
                reason: "not in catalogue".to_string(),
            })?;
        let dest_dir = PathBuf::from(&category_id);
        if source.parent() == Some(dest_dir.as_path()) {
            // Already where it belongs.
            return Ok(None);
        }

        let file_name = source
            .file_name()
            .ok_or_else(|| Error::Move {
                path: source.clone(),
                reason: "source has no file name".to_string(),
            })?
            .to_string_lossy()
            .into_owned();

        std::fs::create_dir_all(&dest_dir).map_err(|e| Error::Move {
            path: source.clone(),
            reason: format!("cannot create {}: {}", dest_dir.display(), e),
        })?;

        let destination = {
            let _guard = self.move_lock.lock().expect("move lock poisoned");
            let destination = unique_destination(&dest_dir, &file_name);
            move_file(&source, &destination).map_err(|e| Error::Move {
                path: source.clone(),
                reason: e.to_string(),
            })?;
            destination
        };

        // Journalled only now, after the filesystem says the move happened.
        self.db.record_move(
            scan_id,
            &source.to_string_lossy(),
            &destination.to_string_lossy(),
        )?;
        self.db.update_media_path(id, &destination)?;

        tracing::debug!(
            media_id = id,
            destination = %destination.display(),
            "Moved media item"
        );
        Ok(Some(category_id))
    }

    fn remember_categories(&self, used: &BTreeSet<String>) {
        if used.is_empty() {
            return;
        }
        let categories: Vec<&str> = used.iter().map(String::as_str).collect();
        match serde_json::to_string(&categories) {
            Ok(json) => {
                if let Err(e) = self.db.set_setting(LAST_USED_CATEGORIES_KEY, &json) {
                    tracing::warn!(error = %e, "Failed to persist last-used categories");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Failed to serialize last-used categories"),
        }
    }
}

/// Destination folders used in the most recent organise scan.
pub fn last_used_categories(db: &Database) -> Result<Vec<String>> {
    let Some(json) = db.get_setting(LAST_USED_CATEGORIES_KEY)? else {
        return Ok(Vec::new());
    };
    Ok(serde_json::from_str(&json).unwrap_or_default())
}

/// Reverse every move journalled under a scan session, newest first, then
/// clear the session's history. Moves whose destination has since vanished
/// are logged and skipped. Returns the number of moves reversed.
pub fn undo_scan(db: &Database, scan_id: &str) -> Result<usize> {
    let moves = db.moves_for_scan(scan_id)?;
    let mut undone = 0;

    for record in moves.iter().rev() {
        let source = Path::new(&record.source);
        let destination = Path::new(&record.destination);

        if let Some(parent) = source.parent() {
            std::fs::create_dir_all(parent)?;
        }
        if let Err(e) = move_file(destination, source) {
            tracing::warn!(
                destination = %destination.display(),
                error = %e,
                "Could not restore file while undoing scan"
            );
            continue;
        }
        if let Some(id) = db.media_id_for_path(destination)? {
            db.update_media_path(id, source)?;
        }
        undone += 1;
    }

    db.delete_moves_for_scan(scan_id)?;
    tracing::info!(scan_id, undone, "Undid organise scan");
    Ok(undone)
}

fn move_file(source: &Path, destination: &Path) -> std::io::Result<()> {
    // Rename first; fall back to copy + delete across filesystems.
    std::fs::rename(source, destination).or_else(|_| {
        std::fs::copy(source, destination)?;
        std::fs::remove_file(source)
    })
}

/// First free path for `file_name` in `dir`, suffixing the stem with a
/// counter on collision.
fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let candidate = dir.join(file_name);
    if !candidate.exists() {
        return candidate;
    }

    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    for n in 1.. {
        let name = match &ext {
            Some(ext) => format!("{stem}_{n}.{ext}"),
            None => format!("{stem}_{n}"),
        };
        let candidate = dir.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    unreachable!()
}

fn send(progress: Option<&Sender<TaskUpdate>>, update: TaskUpdate) {
    if let Some(tx) = progress {
        let _ = tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IndexConfig;
    use crate::db::MediaKind;
    use crate::index::MemoryProbe;
    use crate::media::ImageResolver;
    use crate::vector::l2_normalize;
    use image::DynamicImage;

    struct FixedProbe;

    impl MemoryProbe for FixedProbe {
        fn available_bytes(&self) -> u64 {
            400 * 1024 * 1024
        }
    }

    fn controller() -> ConcurrencyController {
        ConcurrencyController::new(
            Box::new(FixedProbe),
            &IndexConfig {
                min_workers: 1,
                max_workers: 2,
                per_item_cost_mb: 100,
            },
        )
    }

    /// Embeds along x for wide images, along y for tall ones.
    struct AspectEmbedder;

    impl Embedder for AspectEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        fn embed_image(&self, img: &DynamicImage) -> crate::error::Result<Vec<f32>> {
            let mut v = if img.width() >= img.height() {
                vec![1.0, 0.1]
            } else {
                vec![0.1, 1.0]
            };
            l2_normalize(&mut v);
            Ok(v)
        }
    }

    fn config() -> ClassifyConfig {
        ClassifyConfig {
            match_threshold: 0.4,
            min_margin: 0.05,
        }
    }

    fn write_image(path: &Path, width: u32, height: u32) {
        DynamicImage::new_rgb8(width, height).save(path).unwrap();
    }

    fn setup(dir: &Path, db: &Database) -> (Vec<i64>, PathBuf) {
        let library = dir.join("library");
        let wide_dest = dir.join("wide");
        std::fs::create_dir_all(&library).unwrap();

        db.upsert_prototype(&PrototypeEmbedding {
            category_id: wide_dest.to_string_lossy().into_owned(),
            timestamp: 0,
            vector: vec![1.0, 0.0],
        })
        .unwrap();

        let mut ids = Vec::new();
        for (name, w, h) in [("a.png", 10, 1), ("b.png", 10, 1), ("c.png", 1, 10)] {
            let path = library.join(name);
            write_image(&path, w, h);
            ids.push(db.register_media(&path, MediaKind::Image, 1).unwrap());
        }
        (ids, wide_dest)
    }

    #[test]
    fn test_confident_matches_move_and_are_journalled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let (ids, wide_dest) = setup(dir.path(), &db);

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(false);
        let outcome = organiser.run(&ids, None, &cancel).unwrap();

        // The two wide images move; the tall one stays.
        assert_eq!(outcome.moved, 2);
        assert_eq!(outcome.unmatched, 1);
        assert_eq!(outcome.failed, 0);
        assert!(wide_dest.join("a.png").exists());
        assert!(wide_dest.join("b.png").exists());
        assert!(dir.path().join("library/c.png").exists());

        // Catalogue paths follow the files.
        let path = db.media_path(ids[0]).unwrap().unwrap();
        assert!(path.starts_with(&*wide_dest.to_string_lossy()));

        // One journal row per physical move.
        assert_eq!(db.moves_for_scan(&outcome.scan_id).unwrap().len(), 2);
        assert_eq!(
            last_used_categories(&db).unwrap(),
            vec![wide_dest.to_string_lossy().into_owned()]
        );
    }

    #[test]
    fn test_only_destinations_receiving_moves_are_remembered() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let (ids, wide_dest) = setup(dir.path(), &db);

        // A second configured destination nothing matches.
        let unused_dest = dir.path().join("unused");
        db.upsert_prototype(&PrototypeEmbedding {
            category_id: unused_dest.to_string_lossy().into_owned(),
            timestamp: 0,
            vector: vec![-1.0, 0.0],
        })
        .unwrap();

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(false);
        let outcome = organiser.run(&ids, None, &cancel).unwrap();
        assert_eq!(outcome.moved, 2);

        // Only the destination that received files becomes a default.
        assert_eq!(
            last_used_categories(&db).unwrap(),
            vec![wide_dest.to_string_lossy().into_owned()]
        );
    }

    #[test]
    fn test_cancelled_run_keeps_previous_categories() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let (ids, _wide_dest) = setup(dir.path(), &db);
        db.set_setting("last_used_categories", "[\"/prev\"]").unwrap();

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(true);
        let outcome = organiser.run(&ids, None, &cancel).unwrap();
        assert!(outcome.cancelled);
        assert_eq!(last_used_categories(&db).unwrap(), vec!["/prev"]);
    }

    #[test]
    fn test_undo_restores_files_and_clears_history() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let (ids, wide_dest) = setup(dir.path(), &db);

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(false);
        let outcome = organiser.run(&ids, None, &cancel).unwrap();
        assert_eq!(outcome.moved, 2);

        let undone = undo_scan(&db, &outcome.scan_id).unwrap();
        assert_eq!(undone, 2);
        assert!(dir.path().join("library/a.png").exists());
        assert!(dir.path().join("library/b.png").exists());
        assert!(!wide_dest.join("a.png").exists());
        assert!(db.moves_for_scan(&outcome.scan_id).unwrap().is_empty());

        // Catalogue paths point home again.
        let path = db.media_path(ids[0]).unwrap().unwrap();
        assert_eq!(path, dir.path().join("library/a.png").to_string_lossy());
    }

    #[test]
    fn test_destination_collisions_get_suffixed() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let (ids, wide_dest) = setup(dir.path(), &db);

        // Pre-existing file under the same name as a.png.
        std::fs::create_dir_all(&wide_dest).unwrap();
        write_image(&wide_dest.join("a.png"), 3, 3);

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(false);
        let outcome = organiser.run(&ids, None, &cancel).unwrap();
        assert_eq!(outcome.moved, 2);
        assert!(wide_dest.join("a_1.png").exists());
        let path = db.media_path(ids[0]).unwrap().unwrap();
        assert!(path.ends_with("a_1.png"));
    }

    #[test]
    fn test_failed_move_leaves_no_journal_row() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let (ids, wide_dest) = setup(dir.path(), &db);

        // Occupy the destination path with a plain file so the category
        // directory cannot be created.
        std::fs::write(&wide_dest, b"not a directory").unwrap();

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(false);
        let outcome = organiser.run(&ids, None, &cancel).unwrap();
        assert_eq!(outcome.moved, 0);
        assert_eq!(outcome.failed, 2);
        assert!(db.moves_for_scan(&outcome.scan_id).unwrap().is_empty());
        // Sources untouched.
        assert!(dir.path().join("library/a.png").exists());
    }

    #[test]
    fn test_no_prototypes_is_complete_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let library = dir.path().join("library");
        std::fs::create_dir_all(&library).unwrap();
        write_image(&library.join("a.png"), 4, 4);
        let id = db
            .register_media(&library.join("a.png"), MediaKind::Image, 1)
            .unwrap();

        let resolver = ImageResolver::new(&db);
        let embedder = AspectEmbedder;
        let controller = controller();
        let config = config();
        let organiser = Organiser::new(&db, &resolver, &embedder, &controller, &config);

        let cancel = AtomicBool::new(false);
        let outcome = organiser.run(&[id], None, &cancel).unwrap();
        assert_eq!(outcome.moved, 0);
        assert!(!outcome.cancelled);
        assert!(library.join("a.png").exists());
    }
}
