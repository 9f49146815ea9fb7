//! Error taxonomy for analysis and store operations.
//!
//! Format problems are expected outcomes, not exceptional control flow:
//! extractors return `SnifferError::Format` values that callers degrade on,
//! they never unwind. Only `Store` errors are fatal for a whole invocation.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub enum SnifferError {
    /// Input unreadable, archive member extraction failed, store I/O failed.
    Io(String),
    /// Malformed container header, truncated archive, invalid DEX magic.
    /// Non-fatal per file: extraction degrades to the generic string scan.
    Format(String),
    /// Feature cap, size ceiling or recursion cap reached.
    ResourceExceeded(String),
    /// Per-file wall-clock budget exceeded.
    Timeout(u64),
    /// Signature store unreadable or invalid schema. Fatal for the invocation.
    Store(String),
    /// Raised during signature ingest only, never during analysis.
    Validation(String),
}

impl SnifferError {
    /// Stable kind tag used in serialized results and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            SnifferError::Io(_) => "IoError",
            SnifferError::Format(_) => "FormatError",
            SnifferError::ResourceExceeded(_) => "ResourceExceeded",
            SnifferError::Timeout(_) => "Timeout",
            SnifferError::Store(_) => "StoreError",
            SnifferError::Validation(_) => "ValidationError",
        }
    }
}

impl std::fmt::Display for SnifferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnifferError::Io(msg) => write!(f, "I/O error: {}", msg),
            SnifferError::Format(msg) => write!(f, "Format error: {}", msg),
            SnifferError::ResourceExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            SnifferError::Timeout(secs) => write!(f, "Analysis timed out after {}s", secs),
            SnifferError::Store(msg) => write!(f, "Signature store error: {}", msg),
            SnifferError::Validation(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for SnifferError {}

impl From<std::io::Error> for SnifferError {
    fn from(e: std::io::Error) -> Self {
        SnifferError::Io(e.to_string())
    }
}

impl From<rusqlite::Error> for SnifferError {
    fn from(e: rusqlite::Error) -> Self {
        SnifferError::Store(e.to_string())
    }
}

impl From<goblin::error::Error> for SnifferError {
    fn from(e: goblin::error::Error) -> Self {
        SnifferError::Format(e.to_string())
    }
}

impl From<zip::result::ZipError> for SnifferError {
    fn from(e: zip::result::ZipError) -> Self {
        SnifferError::Format(e.to_string())
    }
}

/// Serializable per-file error attached to an `AnalysisResult`.
///
/// Carries the kind tag and a short cause; no stack traces, no runtime jargon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn from_error(e: &SnifferError) -> Self {
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
        }
    }
}
