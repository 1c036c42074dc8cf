//! Adaptive concurrency: a controller that derives safe parallelism from
//! available memory, and a chunked runner that applies it.
//!
//! The controller is consulted once per work chunk, never per item, so
//! memory pressure discovered mid-run shrinks parallelism for subsequent
//! chunks without cancelling in-flight work.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::config::IndexConfig;
use crate::error::Error;

/// Fixed work chunk size; the controller is re-queried at every chunk
/// boundary.
pub const CHUNK_SIZE: usize = 10;

/// Read-only probe of currently available process memory.
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently available, or 0 when unknown.
    fn available_bytes(&self) -> u64;
}

/// Probe backed by `/proc/meminfo` on Linux. Elsewhere (or when the file
/// is unreadable) it reports unknown and the controller sizes by CPU
/// count instead.
pub struct SystemMemoryProbe;

impl MemoryProbe for SystemMemoryProbe {
    fn available_bytes(&self) -> u64 {
        read_meminfo_available().unwrap_or(0)
    }
}

#[cfg(target_os = "linux")]
fn read_meminfo_available() -> Option<u64> {
    let content = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb * 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_meminfo_available() -> Option<u64> {
    None
}

/// Computes the permitted number of parallel in-flight items for one chunk.
pub struct ConcurrencyController {
    probe: Box<dyn MemoryProbe>,
    per_item_cost: u64,
    min: usize,
    max: usize,
}

impl ConcurrencyController {
    pub fn new(probe: Box<dyn MemoryProbe>, config: &IndexConfig) -> Self {
        Self {
            probe,
            per_item_cost: config.per_item_cost_mb.max(1) * 1024 * 1024,
            min: config.min_workers.max(1),
            max: config.max_workers.max(config.min_workers.max(1)),
        }
    }

    pub fn from_config(config: &IndexConfig) -> Self {
        Self::new(Box::new(SystemMemoryProbe), config)
    }

    /// Permitted parallelism for the next chunk, always >= 1.
    pub fn level(&self) -> usize {
        let available = self.probe.available_bytes();
        if available == 0 {
            // Probe unavailable; size by CPU instead.
            let cpus = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(self.min);
            return cpus.clamp(self.min, self.max);
        }
        ((available / self.per_item_cost) as usize).clamp(self.min, self.max)
    }
}

/// Totals from a chunked run.
#[derive(Debug, Default)]
pub struct ChunkRunStats {
    pub succeeded: usize,
    pub failed: usize,
    pub dispatched: usize,
    /// First run-fatal error, if any; the run stopped at its chunk.
    pub fatal: Option<Error>,
    pub cancelled: bool,
}

/// Process `items` in fixed-size chunks with bounded parallelism.
///
/// Per chunk the controller is queried once and at most that many items
/// are in flight; items within a chunk complete in any order, and chunk
/// N+1 starts only after chunk N has fully drained. `op` failures count
/// against the item unless fatal, which stops dispatch after the current
/// chunk drains. Cancellation stops new dispatch and lets in-flight items
/// finish.
pub fn run_chunked<T, F>(
    items: &[T],
    controller: &ConcurrencyController,
    cancel: &AtomicBool,
    op: F,
) -> ChunkRunStats
where
    T: Sync,
    F: Fn(&T) -> Result<(), Error> + Sync,
{
    let mut stats = ChunkRunStats::default();
    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);
    let fatal: Mutex<Option<Error>> = Mutex::new(None);

    for chunk in items.chunks(CHUNK_SIZE) {
        if cancel.load(Ordering::SeqCst) {
            stats.cancelled = true;
            break;
        }
        if fatal.lock().expect("fatal slot poisoned").is_some() {
            break;
        }

        let level = controller.level().min(chunk.len());
        stats.dispatched += chunk.len();
        let cursor = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..level {
                scope.spawn(|| loop {
                    if cancel.load(Ordering::SeqCst) {
                        break;
                    }
                    let idx = cursor.fetch_add(1, Ordering::SeqCst);
                    if idx >= chunk.len() {
                        break;
                    }
                    match op(&chunk[idx]) {
                        Ok(()) => {
                            succeeded.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) if e.is_fatal() => {
                            let mut slot = fatal.lock().expect("fatal slot poisoned");
                            if slot.is_none() {
                                *slot = Some(e);
                            }
                            break;
                        }
                        Err(_) => {
                            failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                });
            }
        });
    }

    if cancel.load(Ordering::SeqCst) {
        stats.cancelled = true;
    }
    stats.succeeded = succeeded.into_inner();
    stats.failed = failed.into_inner();
    stats.fatal = fatal.into_inner().expect("fatal slot poisoned");
    stats
}
