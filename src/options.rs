//! Analysis configuration.
//!
//! All live values travel through this handle; the engine keeps no global
//! mutable state. Deterministic mode is always on: there is no knob for it.

use crate::error::SnifferError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Options for a single analysis or a directory batch.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Minimum confidence for an emitted match.
    pub threshold: f64,
    /// Enable the fuzzy (LSH) matching layer.
    pub fuzzy: bool,
    /// LSH distances at or above this value are discarded.
    pub fuzzy_threshold: u32,
    /// Minimum distinct pattern hits for a direct match.
    pub min_matches: u32,
    /// Feature cap enforced after deduplication.
    pub feature_cap: usize,
    /// Skip files larger than this many bytes (None = no ceiling).
    pub size_ceiling: Option<u64>,
    /// Per-file wall-clock budget.
    pub timeout: Duration,
    /// Maximum archive nesting depth.
    pub recursion_cap: u32,
    /// Per-archive member cap.
    pub archive_member_cap: usize,
    /// Worker threads for directory batches (None = hardware concurrency).
    pub workers: Option<usize>,
    /// Truncate the match list to the top N (None = all post-threshold).
    pub top: Option<usize>,
    /// Attach MD5/SHA-1/SHA-256 of the input to the result.
    pub include_hashes: bool,
    /// Attach the LSH fuzzy hash of the input (requires >= 256 bytes).
    pub include_fuzzy_hashes: bool,
    /// Only report components whose name matches one of these globs.
    pub component_globs: Vec<String>,
    /// Drop mobile-ecosystem candidates from native binaries. The filter is
    /// heuristic and can over-filter cross-platform artifacts; this switch
    /// turns it off.
    pub context_filter: bool,
    /// Recurse into subdirectories for directory analysis.
    pub recursive: bool,
    /// Cooperative cancel token, observed at file dispatch and inside
    /// per-file member loops.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            fuzzy: true,
            fuzzy_threshold: 70,
            min_matches: 1,
            feature_cap: 150_000,
            size_ceiling: None,
            timeout: Duration::from_secs(60),
            recursion_cap: 5,
            archive_member_cap: 10_000,
            workers: None,
            top: None,
            include_hashes: false,
            include_fuzzy_hashes: false,
            component_globs: Vec::new(),
            context_filter: true,
            recursive: false,
            cancel: None,
        }
    }
}

impl AnalysisOptions {
    pub fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}

/// Per-file wall-clock budget, checked cooperatively at loop boundaries in
/// extraction and matching. On expiry the in-flight file's partial results
/// are discarded; workers stay alive for the next task.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    pub fn check(&self) -> Result<(), SnifferError> {
        if self.start.elapsed() > self.limit {
            Err(SnifferError::Timeout(self.limit.as_secs()))
        } else {
            Ok(())
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}
