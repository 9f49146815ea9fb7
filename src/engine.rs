//! Engine façade: one entry point per file, one per directory.
//!
//! # Concurrency
//! The store snapshot is loaded once at construction and shared read-only
//! across rayon workers; within a file the pipeline is sequential. Directory
//! results collect into a `BTreeMap`, so serialized output is always in
//! lexicographic path order regardless of completion order.
//!
//! # Failure isolation
//! Per-file errors become error results; a batch never aborts because one
//! file failed. Only a broken store fails construction.

use crate::detect;
use crate::error::{ErrorInfo, SnifferError};
use crate::extract;
use crate::features::FeatureSet;
use crate::fuzzy;
use crate::matcher::{self, ComponentMatch, MatchContext};
use crate::options::{AnalysisOptions, Deadline};
use crate::store::{SignatureStore, StoreSnapshot};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

/// Optional file hashes attached on request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileHashes {
    pub md5: String,
    pub sha1: String,
    pub sha256: String,
    /// LSH fuzzy hash of the raw input; absent below 256 bytes.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fuzzy: Option<String>,
}

/// Everything the engine reports for one file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub path: String,
    pub file_type: String,
    pub features_extracted: usize,
    pub wall_time_ms: u64,
    /// Set when the feature cap truncated the canonical set.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hashes: Option<FileHashes>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<ErrorInfo>,
    pub matches: Vec<ComponentMatch>,
}

impl AnalysisResult {
    fn failed(path: &Path, file_type: &str, error: &SnifferError, elapsed_ms: u64) -> Self {
        Self {
            path: path.display().to_string(),
            file_type: file_type.to_string(),
            features_extracted: 0,
            wall_time_ms: elapsed_ms,
            truncated: false,
            hashes: None,
            error: Some(ErrorInfo::from_error(error)),
            matches: Vec::new(),
        }
    }
}

/// Default on-disk location for the signature store.
pub fn default_store_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("binsniffer")
        .join("signatures.db")
}

fn compute_hashes(data: &[u8], include_fuzzy: bool) -> FileHashes {
    let mut sha1 = sha1::Sha1::new();
    sha1.update(data);
    let mut sha256 = Sha256::new();
    sha256.update(data);
    FileHashes {
        md5: format!("{:x}", md5::compute(data)),
        sha1: hex::encode(sha1.finalize()),
        sha256: hex::encode(sha256.finalize()),
        fuzzy: if include_fuzzy {
            fuzzy::digest_bytes(data)
        } else {
            None
        },
    }
}

/// The process-wide analysis engine. Holds the only shared state: the
/// read-only store snapshot.
pub struct Engine {
    snapshot: Arc<StoreSnapshot>,
}

impl Engine {
    /// Open the signature store and load its snapshot. A missing or invalid
    /// store fails here, before any file is touched.
    pub fn open(store_path: &Path) -> Result<Self, SnifferError> {
        let store = SignatureStore::open(store_path)?;
        let snapshot = store.snapshot()?;
        Ok(Self {
            snapshot: Arc::new(snapshot),
        })
    }

    /// Build an engine around an already-loaded snapshot (tests, embedding).
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            snapshot: Arc::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> &StoreSnapshot {
        &self.snapshot
    }

    /// Analyze one file. Never panics and never returns `Err`: failures are
    /// embedded in the result so batches stay isolated.
    pub fn analyze(&self, path: &Path, opts: &AnalysisOptions) -> AnalysisResult {
        let deadline = Deadline::new(opts.timeout);

        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                let err = SnifferError::Io(format!("{}: {}", path.display(), e));
                return AnalysisResult::failed(path, "unknown", &err, 0);
            }
        };
        if let Some(ceiling) = opts.size_ceiling {
            if metadata.len() > ceiling {
                let err = SnifferError::ResourceExceeded(format!(
                    "{} is {} bytes, over the {} byte ceiling",
                    path.display(),
                    metadata.len(),
                    ceiling
                ));
                return AnalysisResult::failed(path, "unknown", &err, 0);
            }
        }

        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) => {
                let err = SnifferError::Io(format!("{}: {}", path.display(), e));
                return AnalysisResult::failed(path, "unknown", &err, 0);
            }
        };

        let kind = detect::sniff(&data, path);
        let hashes = if opts.include_hashes {
            Some(compute_hashes(&data, opts.include_fuzzy_hashes))
        } else {
            None
        };

        let extraction = match extract::extract(&data, kind, opts, &deadline) {
            Ok(ex) => ex,
            Err(e) => {
                return AnalysisResult::failed(
                    path,
                    kind.tag(),
                    &e,
                    deadline.elapsed().as_millis() as u64,
                )
            }
        };

        let features = FeatureSet::normalize(extraction.features, opts.feature_cap);
        if let Err(e) = deadline.check() {
            return AnalysisResult::failed(path, kind.tag(), &e, deadline.elapsed().as_millis() as u64);
        }

        let context = MatchContext::from_analysis(kind, &extraction.stats);
        let direct = matcher::direct_match(&features, self.snapshot.as_ref(), opts, &context);
        let fuzzy_hits = if opts.fuzzy {
            fuzzy::fuzzy_match(&features, self.snapshot.digests(), opts.fuzzy_threshold)
        } else {
            Vec::new()
        };
        let matches = matcher::merge_matches(
            direct,
            fuzzy_hits,
            self.snapshot.as_ref(),
            opts,
            &context,
        );

        AnalysisResult {
            path: path.display().to_string(),
            file_type: kind.tag().to_string(),
            features_extracted: features.len(),
            wall_time_ms: deadline.elapsed().as_millis() as u64,
            truncated: features.truncated,
            hashes,
            error: None,
            matches,
        }
    }

    /// Analyze every file under a directory. Results key on the file path
    /// and come back in lexicographic path order.
    pub fn analyze_directory(
        &self,
        dir: &Path,
        opts: &AnalysisOptions,
    ) -> BTreeMap<PathBuf, AnalysisResult> {
        let max_depth = if opts.recursive { usize::MAX } else { 1 };
        let mut files: Vec<PathBuf> = WalkDir::new(dir)
            .max_depth(max_depth)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect();
        files.sort();

        let run = || -> Vec<(PathBuf, AnalysisResult)> {
            files
                .par_iter()
                .filter_map(|path| {
                    // Cancel token observed at each file dispatch
                    if opts.cancelled() {
                        return None;
                    }
                    Some((path.clone(), self.analyze(path, opts)))
                })
                .collect()
        };

        let results = match opts.workers {
            Some(workers) => match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(run),
                Err(_) => run(),
            },
            None => run(),
        };

        results.into_iter().collect()
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
