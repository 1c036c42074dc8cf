//! Prototype classification: decide which destination, if any, a media
//! item belongs to.
//!
//! A match requires the best prototype similarity to clear the absolute
//! threshold AND to lead the runner-up by the margin. Either failure means
//! the item stays where it is; a wrong move costs more than no move.

use crate::config::ClassifyConfig;
use crate::db::PrototypeEmbedding;
use crate::vector::cosine_similarity;

/// Outcome of classifying one embedding against the prototype set.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// Confident single winner.
    Match {
        category_id: String,
        similarity: f32,
        /// Gap to the runner-up (or to zero when there is only one
        /// prototype).
        margin: f32,
    },
    /// Below threshold, ambiguous between destinations, or no prototypes.
    NoMatch,
}

impl Decision {
    pub fn category_id(&self) -> Option<&str> {
        match self {
            Decision::Match { category_id, .. } => Some(category_id),
            Decision::NoMatch => None,
        }
    }
}

/// Classify an embedding against every prototype.
pub fn classify(
    embedding: &[f32],
    prototypes: &[PrototypeEmbedding],
    config: &ClassifyConfig,
) -> Decision {
    let mut best: Option<(&PrototypeEmbedding, f32)> = None;
    let mut second: f32 = 0.0;

    for prototype in prototypes {
        let similarity = cosine_similarity(embedding, &prototype.vector);
        match best {
            Some((_, best_sim)) if similarity <= best_sim => {
                if similarity > second {
                    second = similarity;
                }
            }
            Some((_, best_sim)) => {
                second = best_sim;
                best = Some((prototype, similarity));
            }
            None => {
                best = Some((prototype, similarity));
            }
        }
    }

    let Some((winner, similarity)) = best else {
        return Decision::NoMatch;
    };
    let margin = similarity - second;
    if similarity < config.match_threshold || margin < config.min_margin {
        return Decision::NoMatch;
    }

    Decision::Match {
        category_id: winner.category_id.clone(),
        similarity,
        margin,
    }
}
