//! Run lifecycle tracking for indexing, organising and tagging.
//!
//! Each run reports over a fire-and-continue mpsc channel; the tracker on
//! the consuming side folds updates into a status machine:
//! `Idle -> Active -> {Complete | Failed}`. There is no paused state;
//! cancellation lands on a terminal non-complete status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

/// What a run is doing, for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    ImageIndex,
    VideoIndex,
    Organise,
    Tagging,
}

impl TaskKind {
    pub fn display_name(&self) -> &'static str {
        match self {
            TaskKind::ImageIndex => "Image Indexing",
            TaskKind::VideoIndex => "Video Indexing",
            TaskKind::Organise => "Auto-Organise",
            TaskKind::Tagging => "Auto-Tagging",
        }
    }
}

/// Progress information for a run. `current` is monotonically increasing;
/// the id behind a given tick is not tied to submission order.
#[derive(Debug, Clone)]
pub struct TaskProgress {
    pub current: usize,
    pub total: usize,
    pub message: Option<String>,
}

impl TaskProgress {
    pub fn new(current: usize, total: usize) -> Self {
        Self {
            current,
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Calculate progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.current as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }
}

/// End-of-run figures, typed so consumers need not parse the message.
/// Extras a run kind does not produce stay `None`.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Human-readable one-line summary.
    pub message: String,
    pub items_per_minute: Option<f64>,
    pub avg_ms_per_item: Option<f64>,
    pub tags_assigned: Option<usize>,
    pub active_tags: Option<usize>,
}

impl RunSummary {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }
}

/// Update messages sent from runs via channels.
#[derive(Debug, Clone)]
pub enum TaskUpdate {
    /// Run has started with total items to process.
    Started { total: usize },
    /// Progress update during processing.
    Progress(TaskProgress),
    /// Run completed successfully, with a final summary.
    Completed { summary: RunSummary },
    /// Run was cancelled before completing.
    Cancelled,
    /// Run failed with error.
    Failed { error: String },
}

/// Observable status of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    Idle,
    Active,
    Complete,
    /// Terminal, never reached via `Complete`; carries the error or
    /// cancellation summary.
    Failed(String),
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Complete | RunStatus::Failed(_))
    }
}

/// Consumer-side handle for one run: drains the update channel and exposes
/// the folded status. Safe to poll from a different thread than the one
/// producing updates.
pub struct RunTracker {
    pub kind: TaskKind,
    pub status: RunStatus,
    pub progress: Option<TaskProgress>,
    pub summary: Option<RunSummary>,
    cancel_flag: Arc<AtomicBool>,
    receiver: mpsc::Receiver<TaskUpdate>,
    started_at: Instant,
}

impl RunTracker {
    /// Create a tracker plus the sender/cancel-flag pair handed to the run.
    pub fn new(kind: TaskKind) -> (Self, mpsc::Sender<TaskUpdate>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        let tracker = Self {
            kind,
            status: RunStatus::Idle,
            progress: None,
            summary: None,
            cancel_flag: cancel_flag.clone(),
            receiver: rx,
            started_at: Instant::now(),
        };
        (tracker, tx, cancel_flag)
    }

    /// Request cancellation; the run stops dispatching new chunks and
    /// finishes in-flight items.
    pub fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }

    pub fn elapsed(&self) -> std::time::Duration {
        self.started_at.elapsed()
    }

    /// Drain all pending updates, advancing the status machine.
    pub fn poll(&mut self) {
        while let Ok(update) = self.receiver.try_recv() {
            self.apply(update);
        }
    }

    fn apply(&mut self, update: TaskUpdate) {
        match update {
            TaskUpdate::Started { total } => {
                self.status = RunStatus::Active;
                self.progress = Some(TaskProgress::new(0, total));
            }
            TaskUpdate::Progress(progress) => {
                // Active is entered on the first progress event even if the
                // Started update was dropped.
                if self.status == RunStatus::Idle {
                    self.status = RunStatus::Active;
                }
                self.progress = Some(progress);
            }
            TaskUpdate::Completed { summary } => {
                self.status = RunStatus::Complete;
                self.summary = Some(summary);
            }
            TaskUpdate::Cancelled => {
                self.status = RunStatus::Failed("cancelled".to_string());
            }
            TaskUpdate::Failed { error } => {
                self.status = RunStatus::Failed(error);
            }
        }
    }
}
