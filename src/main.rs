use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fotovec::config::Config;
use fotovec::db::{Database, MediaKind, PrototypeEmbedding, TagDefinition};
use fotovec::embedder::clip::{ClipEmbedder, CLIP_DIMENSION};
use fotovec::embedder::Embedder;
use fotovec::index::{ConcurrencyController, Indexer};
use fotovec::media::{
    scan_library, FfmpegFrameSampler, ImageResolver, VideoResolver,
};
use fotovec::organise::{undo_scan, Organiser};
use fotovec::search::{search_by_text, SearchOptions};
use fotovec::store::EmbeddingStore;
use fotovec::tagger::Tagger;
use fotovec::logging;
use fotovec::tasks::{RunStatus, RunTracker, TaskKind};

struct Cli {
    config_path: Option<PathBuf>,
    command: Command,
}

enum Command {
    Scan,
    Index,
    Search { query: String },
    Organise,
    Undo { scan_id: String },
    Tag,
    TagAdd { name: String, description: String, threshold: f32 },
    Prototype { dir: PathBuf },
}

fn parse_args() -> Cli {
    let args: Vec<String> = std::env::args().collect();
    let mut config_path = None;
    let mut positional: Vec<String> = Vec::new();
    let mut threshold = 0.25f32;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("fotovec {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--threshold" | "-t" => {
                if i + 1 < args.len() {
                    threshold = args[i + 1].parse().unwrap_or_else(|_| {
                        eprintln!("Error: --threshold requires a number");
                        std::process::exit(1);
                    });
                    i += 1;
                } else {
                    eprintln!("Error: --threshold requires a number");
                    std::process::exit(1);
                }
            }
            arg if arg.starts_with('-') => {
                eprintln!("Unknown argument: {}", arg);
                print_help();
                std::process::exit(1);
            }
            arg => positional.push(arg.to_string()),
        }
        i += 1;
    }

    let command = match positional.first().map(String::as_str) {
        Some("scan") => Command::Scan,
        Some("index") => Command::Index,
        Some("search") => {
            if positional.len() < 2 {
                eprintln!("Error: search requires a query");
                std::process::exit(1);
            }
            Command::Search {
                query: positional[1..].join(" "),
            }
        }
        Some("organise") => Command::Organise,
        Some("undo") => {
            if positional.len() != 2 {
                eprintln!("Error: undo requires a scan id");
                std::process::exit(1);
            }
            Command::Undo {
                scan_id: positional[1].clone(),
            }
        }
        Some("tag") => Command::Tag,
        Some("tag-add") => {
            if positional.len() < 3 {
                eprintln!("Error: tag-add requires a name and a description");
                std::process::exit(1);
            }
            Command::TagAdd {
                name: positional[1].clone(),
                description: positional[2..].join(" "),
                threshold,
            }
        }
        Some("prototype") => {
            if positional.len() != 2 {
                eprintln!("Error: prototype requires a directory");
                std::process::exit(1);
            }
            Command::Prototype {
                dir: PathBuf::from(&positional[1]),
            }
        }
        Some(other) => {
            eprintln!("Unknown command: {}", other);
            print_help();
            std::process::exit(1);
        }
        None => {
            print_help();
            std::process::exit(1);
        }
    };

    Cli {
        config_path,
        command,
    }
}

fn print_help() {
    println!(
        r#"fotovec - embedding-based photo/video library indexing and organisation

USAGE:
    fotovec [OPTIONS] COMMAND

COMMANDS:
    scan                     Walk the library root and catalogue media files
    index                    Embed catalogued media into the embedding store
    search QUERY             Text-to-image search over indexed media
    organise                 Move media into matching destination folders
    undo SCAN_ID             Reverse the moves of one organise scan
    tag                      Re-evaluate all tags over indexed media
    tag-add NAME DESC        Define a tag from a text description
    prototype DIR            Learn a destination prototype from DIR's images

OPTIONS:
    --config, -c PATH        Path to config file
    --threshold, -t VALUE    Similarity threshold for tag-add (default 0.25)
    --version, -V            Show version
    --help, -h               Show this help message

ENVIRONMENT:
    FOTOVEC_LOG              Log level (trace, debug, info, warn, error)

Config file location: $XDG_CONFIG_HOME/fotovec/config.toml"#
    );
}

fn main() -> Result<()> {
    let cli = parse_args();

    // Uses journald on Linux, file fallback otherwise.
    let _ = logging::init(Some(Config::config_dir().join("logs")));

    let config = match &cli.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let db = Database::open(&config.db_path)?;
    db.initialize()?;

    match cli.command {
        Command::Scan => cmd_scan(&db, &config),
        Command::Index => cmd_index(&db, &config),
        Command::Search { query } => cmd_search(&db, &config, &query),
        Command::Organise => cmd_organise(&db, &config),
        Command::Undo { scan_id } => cmd_undo(&db, &scan_id),
        Command::Tag => cmd_tag(&db, &config),
        Command::TagAdd {
            name,
            description,
            threshold,
        } => cmd_tag_add(&db, &name, &description, threshold),
        Command::Prototype { dir } => cmd_prototype(&db, &config, &dir),
    }
}

fn cmd_scan(db: &Database, config: &Config) -> Result<()> {
    let outcome = scan_library(db, &config.library)?;
    println!(
        "Catalogued {} images and {} videos under {}",
        outcome.images,
        outcome.videos,
        config.library.root.display()
    );
    Ok(())
}

fn cmd_index(db: &Database, config: &Config) -> Result<()> {
    let clip = ClipEmbedder::new()?;
    clip.init().context("failed to load the CLIP vision model")?;
    let controller = ConcurrencyController::from_config(&config.index);

    let image_store = image_store(db, config);
    let resolver = ImageResolver::new(db);
    let indexer = Indexer::new(&resolver, &clip, &image_store, &controller);
    let ids = db.media_ids(MediaKind::Image)?;
    run_to_completion(TaskKind::ImageIndex, |tx, cancel| {
        indexer.run(&ids, Some(tx), cancel).map(|_| ())
    })?;
    let flushed = image_store.drain_to_file()?;
    tracing::info!(flushed, "Image embeddings flushed to flat file");

    let video_store = video_store(db, config);
    let sampler = FfmpegFrameSampler;
    let resolver = VideoResolver::new(db, &sampler, config.library.frames_per_video);
    let indexer = Indexer::new(&resolver, &clip, &video_store, &controller);
    let ids = db.media_ids(MediaKind::Video)?;
    run_to_completion(TaskKind::VideoIndex, |tx, cancel| {
        indexer.run(&ids, Some(tx), cancel).map(|_| ())
    })?;
    let flushed = video_store.drain_to_file()?;
    tracing::info!(flushed, "Video embeddings flushed to flat file");

    Ok(())
}

fn cmd_search(db: &Database, config: &Config, query: &str) -> Result<()> {
    let clip = ClipEmbedder::new()?;
    clip.init_text().context("failed to load the CLIP text model")?;

    let store = image_store(db, config);
    let hits = search_by_text(db, &store, &clip, query, &SearchOptions::default())?;
    if hits.is_empty() {
        println!("No matches for \"{}\"", query);
        return Ok(());
    }
    for hit in hits {
        println!("{:.3}  {}", hit.similarity, hit.path);
    }
    Ok(())
}

fn cmd_organise(db: &Database, config: &Config) -> Result<()> {
    let clip = ClipEmbedder::new()?;
    clip.init().context("failed to load the CLIP vision model")?;
    let controller = ConcurrencyController::from_config(&config.index);

    let resolver = ImageResolver::new(db);
    let organiser = Organiser::new(db, &resolver, &clip, &controller, &config.classify);
    let ids = db.media_ids(MediaKind::Image)?;

    let mut scan_id = String::new();
    run_to_completion(TaskKind::Organise, |tx, cancel| {
        let outcome = organiser.run(&ids, Some(tx), cancel)?;
        scan_id = outcome.scan_id.clone();
        Ok(())
    })?;
    println!("Scan id: {} (use `fotovec undo {}` to reverse)", scan_id, scan_id);
    Ok(())
}

fn cmd_undo(db: &Database, scan_id: &str) -> Result<()> {
    let undone = undo_scan(db, scan_id)?;
    println!("Reversed {} moves from {}", undone, scan_id);
    Ok(())
}

fn cmd_tag(db: &Database, config: &Config) -> Result<()> {
    let store = image_store(db, config);
    let tagger = Tagger::new(db, &store);
    run_to_completion(TaskKind::Tagging, |tx, cancel| {
        tagger.run(Some(tx), cancel).map(|_| ())
    })
}

fn cmd_tag_add(db: &Database, name: &str, description: &str, threshold: f32) -> Result<()> {
    let clip = ClipEmbedder::new()?;
    clip.init_text().context("failed to load the CLIP text model")?;

    let vector = clip.embed_text(description)?;
    db.upsert_tag(&TagDefinition {
        name: name.to_string(),
        description: description.to_string(),
        vector,
        threshold,
        color: None,
        active: true,
        created_at: String::new(),
        updated_at: String::new(),
    })?;
    println!("Tag \"{}\" saved (threshold {:.2})", name, threshold);
    Ok(())
}

fn cmd_prototype(db: &Database, config: &Config, dir: &Path) -> Result<()> {
    let clip = ClipEmbedder::new()?;
    clip.init().context("failed to load the CLIP vision model")?;

    let mut members = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(ext) = path.extension().map(|e| e.to_string_lossy().to_lowercase()) else {
            continue;
        };
        if !config.library.image_extensions.iter().any(|e| *e == ext) {
            continue;
        }
        match image::open(&path) {
            Ok(img) => members.push(clip.embed_image(&img)?),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping unreadable example image"),
        }
    }

    let Some(vector) = fotovec::db::prototypes::build_prototype(&members) else {
        bail!("no usable example images in {}", dir.display());
    };
    db.upsert_prototype(&PrototypeEmbedding {
        category_id: dir.to_string_lossy().into_owned(),
        timestamp: chrono::Utc::now().timestamp_millis(),
        vector,
    })?;
    println!(
        "Prototype for {} learned from {} images",
        dir.display(),
        members.len()
    );
    Ok(())
}

fn image_store<'a>(db: &'a Database, config: &Config) -> EmbeddingStore<'a> {
    EmbeddingStore::new(
        db,
        config.store.image_file.clone(),
        MediaKind::Image,
        CLIP_DIMENSION,
    )
}

fn video_store<'a>(db: &'a Database, config: &Config) -> EmbeddingStore<'a> {
    EmbeddingStore::new(
        db,
        config.store.video_file.clone(),
        MediaKind::Video,
        CLIP_DIMENSION,
    )
}

/// Drive a run on the current thread while a printer thread folds its
/// updates into console progress.
fn run_to_completion<F>(kind: TaskKind, run: F) -> Result<()>
where
    F: FnOnce(
        &std::sync::mpsc::Sender<fotovec::tasks::TaskUpdate>,
        &AtomicBool,
    ) -> fotovec::error::Result<()>,
{
    let (mut tracker, tx, cancel) = RunTracker::new(kind);
    let done = Arc::new(AtomicBool::new(false));
    let done_flag = done.clone();

    let printer = std::thread::spawn(move || {
        loop {
            tracker.poll();
            if let Some(progress) = &tracker.progress {
                eprint!(
                    "\r{}: {}/{} ({}%)   ",
                    tracker.kind.display_name(),
                    progress.current,
                    progress.total,
                    progress.percent()
                );
            }
            if tracker.status.is_terminal() {
                eprintln!();
                if let Some(summary) = &tracker.summary {
                    println!("{}", summary.message);
                }
                if let RunStatus::Failed(error) = &tracker.status {
                    println!("{}: failed: {}", tracker.kind.display_name(), error);
                }
                break;
            }
            // The run can end without a terminal update if it errors before
            // reporting anything.
            if done_flag.load(std::sync::atomic::Ordering::SeqCst) {
                eprintln!();
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(100));
        }
    });

    let result = run(&tx, &cancel);
    drop(tx);
    done.store(true, std::sync::atomic::Ordering::SeqCst);
    let _ = printer.join();
    result.map_err(Into::into)
}
