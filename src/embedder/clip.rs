//! CLIP ViT-B/32 embedder backed by ONNX Runtime.

use image::DynamicImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::{Error, Result};

use super::Embedder;

/// Embedding dimension of CLIP ViT-B/32.
pub const CLIP_DIMENSION: usize = 512;

const VISUAL_MODEL_FILE: &str = "clip-vit-b32-vision.onnx";
const VISUAL_MODEL_URL: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-vision/resolve/main/model.onnx";
const TEXT_MODEL_FILE: &str = "clip-vit-b32-text.onnx";
const TEXT_MODEL_URL: &str =
    "https://huggingface.co/Qdrant/clip-ViT-B-32-text/resolve/main/model.onnx";

/// CLIP visual + text encoders. Sessions are owned by the instance and
/// serialized behind mutexes; the ONNX runtime session is not assumed to
/// support concurrent inference.
pub struct ClipEmbedder {
    visual: Mutex<Option<Session>>,
    text: Mutex<Option<Session>>,
    models_dir: PathBuf,
}

impl ClipEmbedder {
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_local_dir()
            .ok_or_else(|| Error::Embed("could not find local data directory".to_string()))?;
        Ok(Self::with_models_dir(data_dir.join("fotovec").join("models")))
    }

    pub fn with_models_dir(models_dir: PathBuf) -> Self {
        Self {
            visual: Mutex::new(None),
            text: Mutex::new(None),
            models_dir,
        }
    }

    /// Load the visual encoder (downloading it on first use). Must be
    /// called before `embed_image`/`embed_frames`.
    pub fn init(&self) -> Result<()> {
        let mut visual = self.lock_visual();
        if visual.is_none() {
            *visual = Some(self.load_session(VISUAL_MODEL_FILE, VISUAL_MODEL_URL)?);
        }
        Ok(())
    }

    /// Load the text encoder, needed only for text-to-image search.
    pub fn init_text(&self) -> Result<()> {
        let mut text = self.lock_text();
        if text.is_none() {
            *text = Some(self.load_session(TEXT_MODEL_FILE, TEXT_MODEL_URL)?);
        }
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.lock_visual().is_some()
    }

    /// Release model resources. Subsequent embed calls fail with
    /// `NotInitialized` until `init` is called again.
    pub fn close(&self) {
        *self.lock_visual() = None;
        *self.lock_text() = None;
    }

    /// Generate embedding for text (for text-to-image search).
    pub fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut guard = self.lock_text();
        let session = guard.as_mut().ok_or(Error::NotInitialized)?;
        run_text_encoder(session, text)
    }

    fn load_session(&self, filename: &str, url: &str) -> Result<Session> {
        let model_path = self.ensure_model(filename, url)?;
        let session = Session::builder()
            .map_err(|e| Error::Embed(format!("failed to load {}: {}", filename, e)))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| Error::Embed(format!("failed to load {}: {}", filename, e)))?
            .with_intra_threads(4)
            .map_err(|e| Error::Embed(format!("failed to load {}: {}", filename, e)))?
            .commit_from_file(&model_path)
            .map_err(|e| Error::Embed(format!("failed to load {}: {}", filename, e)))?;
        Ok(session)
    }

    /// Download a model file if it doesn't exist.
    fn ensure_model(&self, filename: &str, url: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.models_dir)?;
        let model_path = self.models_dir.join(filename);

        if !model_path.exists() {
            tracing::info!(model = %filename, "Downloading CLIP model...");
            let response = ureq::get(url)
                .call()
                .map_err(|e| Error::Embed(format!("failed to download model: {}", e)))?;

            let mut file = std::fs::File::create(&model_path)?;
            std::io::copy(&mut response.into_reader(), &mut file)?;
            tracing::info!(model = %filename, path = ?model_path, "CLIP model downloaded");
        }

        Ok(model_path)
    }

    fn lock_visual(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.visual.lock().expect("visual session mutex poisoned")
    }

    fn lock_text(&self) -> std::sync::MutexGuard<'_, Option<Session>> {
        self.text.lock().expect("text session mutex poisoned")
    }
}

impl Embedder for ClipEmbedder {
    fn dimension(&self) -> usize {
        CLIP_DIMENSION
    }

    fn embed_image(&self, img: &DynamicImage) -> Result<Vec<f32>> {
        let mut guard = self.lock_visual();
        let session = guard.as_mut().ok_or(Error::NotInitialized)?;
        run_visual_encoder(session, img)
    }
}

/// Run the visual encoder on an image.
fn run_visual_encoder(session: &mut Session, img: &DynamicImage) -> Result<Vec<f32>> {
    const INPUT_SIZE: u32 = 224;

    // Resize to CLIP input size (224x224)
    let resized = img.resize_exact(INPUT_SIZE, INPUT_SIZE, image::imageops::FilterType::Triangle);
    let rgb = resized.to_rgb8();

    // CLIP normalization constants (ImageNet stats)
    let mean = [0.48145466, 0.4578275, 0.40821073];
    let std = [0.26862954, 0.26130258, 0.27577711];

    // Convert to tensor (NCHW format, normalized)
    let mut input_data = vec![0.0f32; (3 * INPUT_SIZE * INPUT_SIZE) as usize];

    for y in 0..INPUT_SIZE as usize {
        for x in 0..INPUT_SIZE as usize {
            let pixel = rgb.get_pixel(x as u32, y as u32);
            let idx = y * INPUT_SIZE as usize + x;

            // Normalize: (pixel/255 - mean) / std
            input_data[idx] = ((pixel[0] as f32 / 255.0) - mean[0]) / std[0]; // R
            input_data[INPUT_SIZE as usize * INPUT_SIZE as usize + idx] =
                ((pixel[1] as f32 / 255.0) - mean[1]) / std[1]; // G
            input_data[2 * INPUT_SIZE as usize * INPUT_SIZE as usize + idx] =
                ((pixel[2] as f32 / 255.0) - mean[2]) / std[2]; // B
        }
    }

    let input_tensor = Tensor::from_array((
        [1usize, 3, INPUT_SIZE as usize, INPUT_SIZE as usize],
        input_data.into_boxed_slice(),
    ))
    .map_err(|e| Error::Embed(e.to_string()))?;

    let outputs = session
        .run(ort::inputs!["pixel_values" => input_tensor])
        .map_err(|e| Error::Embed(e.to_string()))?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| Error::Embed("no embedding output".to_string()))?;

    let (_shape, embedding_data) = embedding_output
        .1
        .try_extract_tensor::<f32>()
        .map_err(|e| Error::Embed(e.to_string()))?;

    // L2 normalize the embedding
    let mut embedding: Vec<f32> = embedding_data.to_vec();
    crate::vector::l2_normalize(&mut embedding);
    Ok(embedding)
}

/// Run the text encoder on a string.
fn run_text_encoder(session: &mut Session, text: &str) -> Result<Vec<f32>> {
    // Simple tokenization (CLIP uses BPE, this is a simplified version)
    let tokens = simple_tokenize(text);

    // Pad/truncate to 77 tokens (CLIP's context length)
    let mut input_ids = vec![49406i64]; // Start token
    input_ids.extend(tokens.iter().take(75).cloned());
    input_ids.push(49407); // End token

    while input_ids.len() < 77 {
        input_ids.push(0);
    }

    let input_tensor = Tensor::from_array(([1usize, 77], input_ids.into_boxed_slice()))
        .map_err(|e| Error::Embed(e.to_string()))?;

    let outputs = session
        .run(ort::inputs!["input_ids" => input_tensor])
        .map_err(|e| Error::Embed(e.to_string()))?;

    let embedding_output = outputs
        .iter()
        .next()
        .ok_or_else(|| Error::Embed("no embedding output".to_string()))?;

    let (_shape, embedding_data) = embedding_output
        .1
        .try_extract_tensor::<f32>()
        .map_err(|e| Error::Embed(e.to_string()))?;

    // L2 normalize
    let mut embedding: Vec<f32> = embedding_data.to_vec();
    crate::vector::l2_normalize(&mut embedding);
    Ok(embedding)
}

/// Simple tokenization for common words (placeholder - real CLIP uses BPE
/// with a specific vocabulary).
fn simple_tokenize(text: &str) -> Vec<i64> {
    text.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .take(75)
        .map(|c| c as i64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_embed_fails() {
        let dir = tempfile::tempdir().unwrap();
        let clip = ClipEmbedder::with_models_dir(dir.path().to_path_buf());
        assert!(!clip.is_ready());

        let img = DynamicImage::new_rgb8(4, 4);
        assert!(matches!(
            clip.embed_image(&img).unwrap_err(),
            Error::NotInitialized
        ));
        assert!(matches!(
            clip.embed_text("a dog").unwrap_err(),
            Error::NotInitialized
        ));
    }

    #[test]
    fn test_simple_tokenize_caps_length() {
        let long = "word ".repeat(100);
        assert_eq!(simple_tokenize(&long).len(), 75);
    }
}
