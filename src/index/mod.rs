//! Embedding indexer: turns catalogued media ids into stored vectors.
//!
//! One generic orchestration covers both image and video indexing; the
//! [`ContentResolver`] supplies the per-modality content and the
//! [`Embedder`] reduces it to a vector. Work runs in fixed-size chunks
//! with per-chunk parallelism from the concurrency controller.

pub mod concurrency;

use std::sync::atomic::AtomicBool;
use std::sync::mpsc::Sender;
use std::sync::Mutex;
use std::time::Instant;

use crate::embedder::Embedder;
use crate::error::{Error, Result};
use crate::media::{ContentResolver, MediaContent};
use crate::store::{EmbeddingRecord, EmbeddingStore};
use crate::tasks::{RunSummary, TaskProgress, TaskUpdate};

pub use concurrency::{ConcurrencyController, MemoryProbe, SystemMemoryProbe, CHUNK_SIZE};

/// Result of one indexing run.
#[derive(Debug, Clone)]
pub struct IndexOutcome {
    /// Items newly indexed by this run.
    pub indexed: usize,
    /// Items skipped because they were already in the store.
    pub already_indexed: usize,
    /// Items that failed and were excluded from the count.
    pub failed: usize,
    pub elapsed: std::time::Duration,
    pub cancelled: bool,
}

impl IndexOutcome {
    pub fn items_per_minute(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            0.0
        } else {
            self.indexed as f64 * 60.0 / secs
        }
    }
}

pub struct Indexer<'a, R: ContentResolver, E: Embedder> {
    resolver: &'a R,
    embedder: &'a E,
    store: &'a EmbeddingStore<'a>,
    controller: &'a ConcurrencyController,
}

impl<'a, R: ContentResolver, E: Embedder> Indexer<'a, R, E> {
    pub fn new(
        resolver: &'a R,
        embedder: &'a E,
        store: &'a EmbeddingStore<'a>,
        controller: &'a ConcurrencyController,
    ) -> Self {
        Self {
            resolver,
            embedder,
            store,
            controller,
        }
    }

    /// Index every id not already present in the store. Returns the count
    /// of newly indexed items; per-item failures are logged and excluded.
    /// Running twice with no intervening changes indexes zero items.
    pub fn run(
        &self,
        ids: &[i64],
        progress: Option<&Sender<TaskUpdate>>,
        cancel: &AtomicBool,
    ) -> Result<IndexOutcome> {
        let started = Instant::now();

        // Snapshot taken once per run; ids indexed concurrently by another
        // run are not re-excluded (last writer wins).
        let existing = self.store.existing_ids()?;
        let pending: Vec<i64> = ids.iter().copied().filter(|id| !existing.contains(id)).collect();
        let already_indexed = ids.len() - pending.len();
        let total = pending.len();

        send(progress, TaskUpdate::Started { total });

        // Bump-and-send under one lock: without it two workers finishing
        // together can enqueue their ticks out of order and the consumer
        // sees the count go backwards.
        let progress_counter = Mutex::new(0usize);
        let stats = concurrency::run_chunked(&pending, self.controller, cancel, |&id| {
            self.index_one(id)?;
            let mut done = progress_counter.lock().expect("progress counter poisoned");
            *done += 1;
            send(
                progress,
                TaskUpdate::Progress(TaskProgress::new(*done, total)),
            );
            Ok(())
        });

        if let Some(fatal) = stats.fatal {
            tracing::error!(error = %fatal, "Indexing run failed");
            send(
                progress,
                TaskUpdate::Failed {
                    error: fatal.to_string(),
                },
            );
            return Err(fatal);
        }

        let outcome = IndexOutcome {
            indexed: stats.succeeded,
            already_indexed,
            failed: stats.failed,
            elapsed: started.elapsed(),
            cancelled: stats.cancelled,
        };

        if outcome.cancelled {
            send(progress, TaskUpdate::Cancelled);
        } else {
            let avg_ms = if outcome.indexed > 0 {
                outcome.elapsed.as_millis() as f64 / outcome.indexed as f64
            } else {
                0.0
            };
            let mut summary = RunSummary::new(format!(
                "Indexed {} items ({} already indexed, {} failed, {:.0} ms/item, {:.1} items/min)",
                outcome.indexed,
                outcome.already_indexed,
                outcome.failed,
                avg_ms,
                outcome.items_per_minute()
            ));
            summary.avg_ms_per_item = Some(avg_ms);
            summary.items_per_minute = Some(outcome.items_per_minute());
            send(progress, TaskUpdate::Completed { summary });
        }

        Ok(outcome)
    }

    fn index_one(&self, id: i64) -> Result<()> {
        let result = self
            .resolver
            .resolve(id)
            .and_then(|content| match content {
                MediaContent::Image(img) => self.embedder.embed_image(&img),
                MediaContent::Frames(frames) => self.embedder.embed_frames(&frames),
            })
            .and_then(|vector| {
                self.store.put(&EmbeddingRecord {
                    media_id: id,
                    timestamp: chrono::Utc::now().timestamp_millis(),
                    vector,
                })
            });

        if let Err(ref e) = result {
            if !e.is_fatal() {
                tracing::warn!(media_id = id, error = %e, "Failed to index media item");
            }
        }
        result
    }
}

fn send(progress: Option<&Sender<TaskUpdate>>, update: TaskUpdate) {
    // Fire-and-continue: a gone consumer must not stall the run.
    if let Some(tx) = progress {
        let _ = tx.send(update);
    }
}
