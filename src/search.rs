//! Text-to-image search over the embedding store.

use crate::db::Database;
use crate::embedder::clip::ClipEmbedder;
use crate::error::Result;
use crate::store::EmbeddingStore;
use crate::vector::{cosine_similarity, top_n};

/// One search result, best first.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub media_id: i64,
    pub path: String,
    pub similarity: f32,
}

/// Search options. `min_similarity` cuts off results that are technically
/// the closest but still unrelated to the query.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_similarity: f32,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 20,
            min_similarity: 0.2,
        }
    }
}

/// Rank every stored embedding against a query vector.
pub fn search_by_vector(
    db: &Database,
    store: &EmbeddingStore<'_>,
    query: &[f32],
    options: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let records = store.get_all()?;
    let scores: Vec<f32> = records
        .iter()
        .map(|r| cosine_similarity(query, &r.vector))
        .collect();

    let mut hits = Vec::new();
    for idx in top_n(&scores, options.limit) {
        if scores[idx] < options.min_similarity {
            break; // indices arrive best-first
        }
        let record = &records[idx];
        // Items removed from the catalogue since indexing are skipped.
        let Some(path) = db.media_path(record.media_id)? else {
            continue;
        };
        hits.push(SearchHit {
            media_id: record.media_id,
            path,
            similarity: scores[idx],
        });
    }
    Ok(hits)
}

/// Embed a free-text query with the CLIP text encoder and rank against
/// the store. The text encoder must have been initialised.
pub fn search_by_text(
    db: &Database,
    store: &EmbeddingStore<'_>,
    clip: &ClipEmbedder,
    query: &str,
    options: &SearchOptions,
) -> Result<Vec<SearchHit>> {
    let embedding = clip.embed_text(query)?;
    search_by_vector(db, store, &embedding, options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MediaKind;
    use crate::store::EmbeddingRecord;
    use std::path::Path;

    fn fixture() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        (dir, db)
    }

    fn seed(db: &Database, store: &EmbeddingStore<'_>, name: &str, vector: Vec<f32>) -> i64 {
        let id = db
            .register_media(Path::new(&format!("/photos/{name}")), MediaKind::Image, 1)
            .unwrap();
        store
            .put(&EmbeddingRecord {
                media_id: id,
                timestamp: 0,
                vector,
            })
            .unwrap();
        id
    }

    #[test]
    fn test_results_ranked_best_first() {
        let (dir, db) = fixture();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);

        seed(&db, &store, "far.jpg", vec![0.0, 1.0]);
        let near = seed(&db, &store, "near.jpg", vec![1.0, 0.0]);
        let mid = seed(&db, &store, "mid.jpg", vec![0.7, 0.7]);

        let hits = search_by_vector(
            &db,
            &store,
            &[1.0, 0.0],
            &SearchOptions {
                limit: 10,
                min_similarity: 0.3,
            },
        )
        .unwrap();

        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].media_id, near);
        assert_eq!(hits[1].media_id, mid);
        assert!(hits[0].similarity > hits[1].similarity);
        assert_eq!(hits[0].path, "/photos/near.jpg");
    }

    #[test]
    fn test_limit_caps_results() {
        let (dir, db) = fixture();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);
        for i in 0..5 {
            seed(&db, &store, &format!("p{i}.jpg"), vec![1.0, i as f32 * 0.1]);
        }

        let hits = search_by_vector(
            &db,
            &store,
            &[1.0, 0.0],
            &SearchOptions {
                limit: 3,
                min_similarity: 0.0,
            },
        )
        .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn test_empty_store_gives_no_hits() {
        let (dir, db) = fixture();
        let store = EmbeddingStore::new(&db, dir.path().join("emb.bin"), MediaKind::Image, 2);
        let hits =
            search_by_vector(&db, &store, &[1.0, 0.0], &SearchOptions::default()).unwrap();
        assert!(hits.is_empty());
    }
}
