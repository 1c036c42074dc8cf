//! Media discovery and content resolution.
//!
//! Discovery walks the library root and registers image/video rows in the
//! catalogue. Resolution turns a media id into decoded content for the
//! embedder; video frame extraction is delegated to a host-provided
//! [`FrameSampler`] collaborator.

use std::path::{Path, PathBuf};

use image::DynamicImage;
use walkdir::WalkDir;

use crate::config::LibraryConfig;
use crate::db::{Database, MediaKind};
use crate::error::{Error, Result};

/// Decoded content handed to the embedder.
#[derive(Debug)]
pub enum MediaContent {
    Image(DynamicImage),
    /// Ordered frames sampled from a video.
    Frames(Vec<DynamicImage>),
}

/// Resolves a media id to decodable content. Decode failures surface as
/// typed errors, never as panics escaping the pipeline.
pub trait ContentResolver: Sync {
    fn resolve(&self, media_id: i64) -> Result<MediaContent>;
}

/// Extracts representative frames from a video file. The concrete decoder
/// is a host collaborator; sampling failure is treated like any other
/// decode failure.
pub trait FrameSampler: Sync {
    fn sample(&self, path: &Path, max_frames: usize) -> std::io::Result<Vec<DynamicImage>>;
}

/// Frame sampler that shells out to ffmpeg, one evenly spaced frame per
/// invocation. Requires `ffmpeg` and `ffprobe` on PATH.
pub struct FfmpegFrameSampler;

impl FfmpegFrameSampler {
    fn probe_duration(path: &Path) -> std::io::Result<f64> {
        let output = std::process::Command::new("ffprobe")
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(path)
            .output()?;
        if !output.status.success() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("ffprobe failed: {}", String::from_utf8_lossy(&output.stderr)),
            ));
        }
        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, format!("{e}")))
    }
}

impl FrameSampler for FfmpegFrameSampler {
    fn sample(&self, path: &Path, max_frames: usize) -> std::io::Result<Vec<DynamicImage>> {
        let duration = Self::probe_duration(path)?;
        // One private directory per call; concurrent samples must never
        // share frame paths or one video's frames leak into another's.
        let work_dir = tempfile::Builder::new()
            .prefix("fotovec-frames-")
            .tempdir()?;

        let mut frames = Vec::new();
        for i in 0..max_frames.max(1) {
            // Frame centres of equal slices, avoiding the very start/end.
            let t = duration * (i as f64 + 0.5) / max_frames.max(1) as f64;
            let frame_path = work_dir.path().join(format!("frame-{i}.png"));
            let status = std::process::Command::new("ffmpeg")
                .args(["-y", "-v", "error", "-ss", &format!("{t:.3}"), "-i"])
                .arg(path)
                .args(["-frames:v", "1"])
                .arg(&frame_path)
                .status()?;
            if !status.success() || !frame_path.exists() {
                continue;
            }
            if let Ok(img) = image::open(&frame_path) {
                frames.push(img);
            }
        }
        Ok(frames)
    }
}

/// Resolver for catalogued still images.
pub struct ImageResolver<'a> {
    db: &'a Database,
}

impl<'a> ImageResolver<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }
}

impl ContentResolver for ImageResolver<'_> {
    fn resolve(&self, media_id: i64) -> Result<MediaContent> {
        let path = self.db.media_path(media_id)?.ok_or(Error::Decode {
            id: media_id,
            reason: "not in catalogue".to_string(),
        })?;
        let img = image::open(Path::new(&path)).map_err(|e| Error::Decode {
            id: media_id,
            reason: e.to_string(),
        })?;
        Ok(MediaContent::Image(img))
    }
}

/// Resolver for catalogued videos, sampling a small ordered frame set.
pub struct VideoResolver<'a, S: FrameSampler> {
    db: &'a Database,
    sampler: &'a S,
    frames_per_video: usize,
}

impl<'a, S: FrameSampler> VideoResolver<'a, S> {
    pub fn new(db: &'a Database, sampler: &'a S, frames_per_video: usize) -> Self {
        Self {
            db,
            sampler,
            frames_per_video,
        }
    }
}

impl<S: FrameSampler> ContentResolver for VideoResolver<'_, S> {
    fn resolve(&self, media_id: i64) -> Result<MediaContent> {
        let path = self.db.media_path(media_id)?.ok_or(Error::Decode {
            id: media_id,
            reason: "not in catalogue".to_string(),
        })?;
        let frames = self
            .sampler
            .sample(Path::new(&path), self.frames_per_video)
            .map_err(|e| Error::Decode {
                id: media_id,
                reason: format!("frame extraction failed: {}", e),
            })?;
        if frames.is_empty() {
            return Err(Error::Decode {
                id: media_id,
                reason: "no frames extracted".to_string(),
            });
        }
        Ok(MediaContent::Frames(frames))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    pub images: usize,
    pub videos: usize,
}

/// Walk the library root and register every media file in the catalogue.
/// Re-scanning is an upsert; existing ids are preserved.
pub fn scan_library(db: &Database, config: &LibraryConfig) -> Result<ScanOutcome> {
    let mut outcome = ScanOutcome::default();

    for entry in WalkDir::new(&config.root)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }
        let path: PathBuf = entry.path().to_path_buf();
        let Some(kind) = media_kind_for(&path, config) else {
            continue;
        };

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        db.register_media(&path, kind, size)?;
        match kind {
            MediaKind::Image => outcome.images += 1,
            MediaKind::Video => outcome.videos += 1,
        }
    }

    tracing::info!(
        images = outcome.images,
        videos = outcome.videos,
        root = %config.root.display(),
        "Library scan complete"
    );
    Ok(outcome)
}

fn media_kind_for(path: &Path, config: &LibraryConfig) -> Option<MediaKind> {
    let ext = path.extension()?.to_string_lossy().to_lowercase();
    if config.image_extensions.iter().any(|e| *e == ext) {
        Some(MediaKind::Image)
    } else if config.video_extensions.iter().any(|e| *e == ext) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_library_registers_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.jpg"), b"x").unwrap();
        std::fs::write(dir.path().join("b.mp4"), b"x").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.PNG"), b"x").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();

        let config = LibraryConfig {
            root: dir.path().to_path_buf(),
            ..LibraryConfig::default()
        };
        let outcome = scan_library(&db, &config).unwrap();
        assert_eq!(outcome.images, 2);
        assert_eq!(outcome.videos, 1);
        assert_eq!(db.media_ids(MediaKind::Image).unwrap().len(), 2);
    }

    #[test]
    fn test_image_resolver_reports_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("broken.jpg");
        std::fs::write(&bogus, b"not an image").unwrap();

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let id = db.register_media(&bogus, MediaKind::Image, 12).unwrap();

        let resolver = ImageResolver::new(&db);
        assert!(matches!(
            resolver.resolve(id).unwrap_err(),
            Error::Decode { .. }
        ));
        assert!(matches!(
            resolver.resolve(id + 999).unwrap_err(),
            Error::Decode { .. }
        ));
    }

    #[test]
    fn test_concurrent_video_samples_do_not_mix_frames() {
        let have_tools = std::process::Command::new("ffmpeg")
            .arg("-version")
            .output()
            .is_ok()
            && std::process::Command::new("ffprobe")
                .arg("-version")
                .output()
                .is_ok();
        if !have_tools {
            return; // no decoder on this host
        }

        let dir = tempfile::tempdir().unwrap();
        let red = dir.path().join("red.mp4");
        let blue = dir.path().join("blue.mp4");
        for (path, color) in [(&red, "red"), (&blue, "blue")] {
            let status = std::process::Command::new("ffmpeg")
                .args(["-y", "-v", "error", "-f", "lavfi", "-i"])
                .arg(format!("color=c={color}:s=64x64:d=1"))
                .args(["-pix_fmt", "yuv420p"])
                .arg(path)
                .status()
                .unwrap();
            assert!(status.success());
        }

        let sampler = FfmpegFrameSampler;
        std::thread::scope(|scope| {
            let red_handle = scope.spawn(|| sampler.sample(&red, 3).unwrap());
            let blue_handle = scope.spawn(|| sampler.sample(&blue, 3).unwrap());
            let red_frames = red_handle.join().unwrap();
            let blue_frames = blue_handle.join().unwrap();
            assert!(!red_frames.is_empty() && !blue_frames.is_empty());

            // Each call gets only its own video's frames.
            for frame in &red_frames {
                let p = frame.to_rgb8().get_pixel(32, 32).0;
                assert!(p[0] > 150 && p[2] < 100, "expected red frame, got {:?}", p);
            }
            for frame in &blue_frames {
                let p = frame.to_rgb8().get_pixel(32, 32).0;
                assert!(p[2] > 150 && p[0] < 100, "expected blue frame, got {:?}", p);
            }
        });
    }

    #[test]
    fn test_video_resolver_uses_sampler() {
        struct TwoFrames;
        impl FrameSampler for TwoFrames {
            fn sample(&self, _: &Path, max: usize) -> std::io::Result<Vec<DynamicImage>> {
                Ok((0..max.min(2)).map(|_| DynamicImage::new_rgb8(2, 2)).collect())
            }
        }

        let db = Database::open_in_memory().unwrap();
        db.initialize().unwrap();
        let id = db
            .register_media(Path::new("/v/clip.mp4"), MediaKind::Video, 1)
            .unwrap();

        let sampler = TwoFrames;
        let resolver = VideoResolver::new(&db, &sampler, 5);
        match resolver.resolve(id).unwrap() {
            MediaContent::Frames(frames) => assert_eq!(frames.len(), 2),
            MediaContent::Image(_) => panic!("expected frames"),
        }
    }
}
