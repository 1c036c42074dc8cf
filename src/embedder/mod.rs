//! Embedding model abstraction.
//!
//! The pipeline consumes the encoder as an opaque embedding function; the
//! concrete CLIP implementation lives in [`clip`].

pub mod clip;

use image::DynamicImage;

use crate::error::{Error, Result};
use crate::vector::l2_normalize;

pub use clip::ClipEmbedder;

/// Produces fixed-dimension embedding vectors for decoded media.
///
/// Implementations must be explicitly initialized before first use and
/// fail with [`Error::NotInitialized`] otherwise. Implementations that
/// serialize access internally may be shared across workers.
pub trait Embedder: Sync {
    /// Vector length, constant for the lifetime of the embedder.
    fn dimension(&self) -> usize;

    /// Embed one decoded image.
    fn embed_image(&self, img: &DynamicImage) -> Result<Vec<f32>>;

    /// Reduce an ordered set of sampled video frames to one representative
    /// embedding: per-frame embeddings, mean-pooled, re-normalised.
    fn embed_frames(&self, frames: &[DynamicImage]) -> Result<Vec<f32>> {
        if frames.is_empty() {
            return Err(Error::Embed("no frames to embed".to_string()));
        }

        let mut pooled = vec![0.0f32; self.dimension()];
        for frame in frames {
            let embedding = self.embed_image(frame)?;
            for (p, x) in pooled.iter_mut().zip(embedding.iter()) {
                *p += x;
            }
        }
        let count = frames.len() as f32;
        for p in pooled.iter_mut() {
            *p /= count;
        }
        l2_normalize(&mut pooled);
        Ok(pooled)
    }
}
