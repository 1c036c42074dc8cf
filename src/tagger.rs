//! Auto-tagging: evaluate stored embeddings against user-defined tags.
//!
//! Tags are non-exclusive. Each active tag is gated in isolation against
//! its own threshold, so one media item can carry any number of tags and
//! two tags never compete for a margin the way destination prototypes do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::time::Instant;

use crate::db::{Database, TagDefinition};
use crate::error::Result;
use crate::store::EmbeddingStore;
use crate::tasks::{RunSummary, TaskProgress, TaskUpdate};
use crate::vector::cosine_similarity;

/// One tag that cleared its threshold for a media item.
#[derive(Debug, Clone, PartialEq)]
pub struct TagMatch {
    pub name: String,
    /// The cosine similarity that cleared the tag's threshold.
    pub confidence: f32,
}

/// Evaluate one embedding against a set of tags. Every tag whose own
/// threshold is met matches, independently of the others.
pub fn evaluate_tags(embedding: &[f32], tags: &[TagDefinition]) -> Vec<TagMatch> {
    tags.iter()
        .filter_map(|tag| {
            let similarity = cosine_similarity(embedding, &tag.vector);
            if similarity >= tag.threshold {
                Some(TagMatch {
                    name: tag.name.clone(),
                    confidence: similarity,
                })
            } else {
                None
            }
        })
        .collect()
}

/// Result of one tagging run.
#[derive(Debug, Clone, Default)]
pub struct TagOutcome {
    /// Media items whose embeddings were evaluated.
    pub evaluated: usize,
    /// Total assignments written across all items.
    pub tags_assigned: usize,
    pub cancelled: bool,
    pub elapsed: std::time::Duration,
}

pub struct Tagger<'a> {
    db: &'a Database,
    store: &'a EmbeddingStore<'a>,
}

impl<'a> Tagger<'a> {
    pub fn new(db: &'a Database, store: &'a EmbeddingStore<'a>) -> Self {
        Self { db, store }
    }

    /// Re-evaluate every stored embedding against the active tags and write
    /// the assignments back. Prior auto-assignments that no longer match
    /// are removed; user-assigned tags are never touched.
    pub fn run(
        &self,
        progress: Option<&Sender<TaskUpdate>>,
        cancel: &AtomicBool,
    ) -> Result<TagOutcome> {
        let started = Instant::now();
        let active = self.db.list_active_tags()?;
        let records = self.store.get_all()?;
        let total = records.len();

        send(progress, TaskUpdate::Started { total });

        if active.is_empty() {
            tracing::info!("No active tags; nothing to evaluate");
            let mut summary = RunSummary::new("No active tags");
            summary.tags_assigned = Some(0);
            summary.active_tags = Some(0);
            send(progress, TaskUpdate::Completed { summary });
            return Ok(TagOutcome {
                elapsed: started.elapsed(),
                ..TagOutcome::default()
            });
        }

        let mut outcome = TagOutcome::default();
        for (done, record) in records.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                outcome.cancelled = true;
                break;
            }

            let matches = evaluate_tags(&record.vector, &active);
            self.db
                .apply_tag_assignments(record.media_id, &matches, &active)?;
            outcome.evaluated += 1;
            outcome.tags_assigned += matches.len();

            send(
                progress,
                TaskUpdate::Progress(TaskProgress::new(done + 1, total)),
            );
        }
        outcome.elapsed = started.elapsed();

        if outcome.cancelled {
            send(progress, TaskUpdate::Cancelled);
        } else {
            tracing::info!(
                evaluated = outcome.evaluated,
                tags_assigned = outcome.tags_assigned,
                active_tags = active.len(),
                "Tagging run complete"
            );
            let mut summary = RunSummary::new(format!(
                "Evaluated {} items against {} tags ({} assignments)",
                outcome.evaluated,
                active.len(),
                outcome.tags_assigned
            ));
            summary.tags_assigned = Some(outcome.tags_assigned);
            summary.active_tags = Some(active.len());
            send(progress, TaskUpdate::Completed { summary });
        }

        Ok(outcome)
    }
}

fn send(progress: Option<&Sender<TaskUpdate>>, update: TaskUpdate) {
    if let Some(tx) = progress {
        let _ = tx.send(update);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MediaKind;
    use crate::store::EmbeddingRecord;

    fn tag(name: &str, vector: Vec<f32>, threshold: f32) -> TagDefinition {
        TagDefinition {
            name: name.to_string(),
            description: format!("a photo of {name}"),
            vector,
            threshold,
            color: None,
            active: true,
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn test_tags_are_gated_independently() {
        // Both tags point the same way; only their thresholds differ.
        // Similarity is ~0.4 for each: A (threshold 0.3) matches, B
        // (threshold 0.5) does not, regardless of the other.
        let dir_a = tag("a", vec![0.4, (1.0f32 - 0.16).sqrt()], 0.3);
        let dir_b = tag("b", vec![0.4, (1.0f32 - 0.16).sqrt()], 0.5);
        let embedding = vec![1.0, 0.0];

        let matches = evaluate_tags(&embedding, &[dir_a, dir_b]);
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "a");
        assert!((matches[0].confidence - 0.4).abs() < 1e-4);
    }

    #[test]
    fn test_multiple_tags_can_match_one_item() {
        let tags = vec![
            tag("beach", vec![1.0, 0.0], 0.5),
            tag("sunny", vec![0.9, (1.0f32 - 0.81).sqrt()], 0.5),
            tag("dog", vec![0.0, 1.0], 0.5),
        ];
        let matches = evaluate_tags(&[1.0, 0.0], &tags);
        assert_eq!(matches.len(), 2);
    }

    #[test]
    fn test_run_writes_assignments_back() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);

        store
            .put(&EmbeddingRecord {
                media_id: 1,
                timestamp: 0,
                vector: vec![1.0, 0.0],
            })
            .unwrap();
        store
            .put(&EmbeddingRecord {
                media_id: 2,
                timestamp: 0,
                vector: vec![0.0, 1.0],
            })
            .unwrap();

        db.upsert_tag(&tag("beach", vec![1.0, 0.0], 0.5)).unwrap();

        let tagger = Tagger::new(&db, &store);
        let cancel = AtomicBool::new(false);
        let outcome = tagger.run(None, &cancel).unwrap();

        assert_eq!(outcome.evaluated, 2);
        assert_eq!(outcome.tags_assigned, 1);
        assert_eq!(db.media_tags(1).unwrap().len(), 1);
        assert!(db.media_tags(2).unwrap().is_empty());
    }

    #[test]
    fn test_run_reports_typed_counts() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);

        store
            .put(&EmbeddingRecord {
                media_id: 1,
                timestamp: 0,
                vector: vec![1.0, 0.0],
            })
            .unwrap();
        db.upsert_tag(&tag("beach", vec![1.0, 0.0], 0.5)).unwrap();

        let tagger = Tagger::new(&db, &store);
        let (tx, rx) = std::sync::mpsc::channel();
        let cancel = AtomicBool::new(false);
        tagger.run(Some(&tx), &cancel).unwrap();
        drop(tx);

        let summary = rx
            .iter()
            .find_map(|u| match u {
                TaskUpdate::Completed { summary } => Some(summary),
                _ => None,
            })
            .unwrap();
        assert_eq!(summary.tags_assigned, Some(1));
        assert_eq!(summary.active_tags, Some(1));
    }

    #[test]
    fn test_run_with_no_active_tags_is_complete_noop() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);

        let tagger = Tagger::new(&db, &store);
        let cancel = AtomicBool::new(false);
        let outcome = tagger.run(None, &cancel).unwrap();
        assert_eq!(outcome.evaluated, 0);
        assert!(!outcome.cancelled);
    }

    #[test]
    fn test_rerun_reflects_tag_changes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);

        store
            .put(&EmbeddingRecord {
                media_id: 7,
                timestamp: 0,
                vector: vec![1.0, 0.0],
            })
            .unwrap();
        db.upsert_tag(&tag("beach", vec![1.0, 0.0], 0.5)).unwrap();

        let tagger = Tagger::new(&db, &store);
        let cancel = AtomicBool::new(false);
        tagger.run(None, &cancel).unwrap();
        assert_eq!(db.media_tags(7).unwrap().len(), 1);

        // Raise the threshold past the similarity; rerun removes the row.
        db.upsert_tag(&tag("beach", vec![1.0, 0.0], 1.1)).unwrap();
        tagger.run(None, &cancel).unwrap();
        assert!(db.media_tags(7).unwrap().is_empty());
    }
}
