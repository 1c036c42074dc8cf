use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub classify: ClassifyConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root directory scanned for media.
    #[serde(default = "default_library_root")]
    pub root: PathBuf,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,

    /// Frames sampled per video and reduced to one embedding.
    #[serde(default = "default_frames_per_video")]
    pub frames_per_video: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Lower bound for per-chunk parallelism.
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Upper bound for per-chunk parallelism.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Estimated memory cost of one in-flight item (decoded bitmap plus
    /// tensor buffers), in megabytes.
    #[serde(default = "default_per_item_cost_mb")]
    pub per_item_cost_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifyConfig {
    /// Minimum similarity for the best prototype to be accepted.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,

    /// Minimum gap between best and second-best similarity. Rejects
    /// near-ties between two destinations.
    #[serde(default = "default_min_margin")]
    pub min_margin: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Flat embedding file for images.
    #[serde(default = "default_image_embeddings_path")]
    pub image_file: PathBuf,

    /// Flat embedding file for video-aggregate embeddings.
    #[serde(default = "default_video_embeddings_path")]
    pub video_file: PathBuf,
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fotovec")
        .join("fotovec.db")
}

fn default_library_root() -> PathBuf {
    dirs::picture_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "gif".to_string(),
        "webp".to_string(),
        "bmp".to_string(),
        "tiff".to_string(),
    ]
}

fn default_video_extensions() -> Vec<String> {
    vec![
        "mp4".to_string(),
        "mov".to_string(),
        "mkv".to_string(),
        "webm".to_string(),
        "avi".to_string(),
    ]
}

fn default_frames_per_video() -> usize {
    5
}

fn default_min_workers() -> usize {
    1
}

fn default_max_workers() -> usize {
    8
}

fn default_per_item_cost_mb() -> u64 {
    // Decoded bitmap for a large photo plus the resized 224x224 tensor and
    // inference scratch space.
    192
}

fn default_match_threshold() -> f32 {
    0.4
}

fn default_min_margin() -> f32 {
    0.05
}

fn default_image_embeddings_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fotovec")
        .join("embeddings.bin")
}

fn default_video_embeddings_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("fotovec")
        .join("video_embeddings.bin")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            root: default_library_root(),
            image_extensions: default_image_extensions(),
            video_extensions: default_video_extensions(),
            frames_per_video: default_frames_per_video(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            per_item_cost_mb: default_per_item_cost_mb(),
        }
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            match_threshold: default_match_threshold(),
            min_margin: default_min_margin(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            image_file: default_image_embeddings_path(),
            video_file: default_video_embeddings_path(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            library: LibraryConfig::default(),
            index: IndexConfig::default(),
            classify: ClassifyConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("fotovec")
    }

    fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.classify.match_threshold, 0.4);
        assert_eq!(parsed.classify.min_margin, 0.05);
        assert_eq!(parsed.index.min_workers, 1);
    }

    #[test]
    fn test_empty_toml_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.index.max_workers, 8);
        assert_eq!(config.library.frames_per_video, 5);
    }
}
