//! Signature-file parsing and validation.
//!
//! One JSON document per component: a `component` block, optional
//! `signature_metadata`, and a `signatures` or `patterns` array (the two
//! keys are historical aliases). Unknown keys are ignored; invalid entries
//! are skipped with a warning; a file whose accepted pattern list ends up
//! empty is rejected whole.

use crate::error::SnifferError;
use crate::fuzzy;
use crate::validate::{clip_confidence, validate_pattern};
use rustc_hash::FxHashSet;
use serde::Deserialize;

/// Ecosystem tags the matcher knows about; anything else maps to `unknown`.
const KNOWN_ECOSYSTEMS: &[&str] = &["native", "jvm", "android", "ios", "npm", "pypi", "go"];

/// Fallback pattern confidence when neither the entry nor the metadata
/// carries one.
const DEFAULT_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
struct RawComponent {
    name: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    license: Option<String>,
    #[serde(default)]
    publisher: Option<String>,
    #[serde(default)]
    ecosystem: Option<String>,
    #[serde(default)]
    family: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawMetadata {
    #[serde(default)]
    confidence_threshold: Option<f64>,
    #[serde(default)]
    tlsh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawPattern {
    pattern: String,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    context: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSignatureFile {
    component: RawComponent,
    #[serde(default)]
    signature_metadata: Option<RawMetadata>,
    #[serde(default, alias = "signatures")]
    patterns: Vec<serde_json::Value>,
}

/// One accepted pattern, confidence already clipped to [0.5, 1.0].
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedPattern {
    pub text: String,
    pub confidence: f64,
    pub context: Option<String>,
}

/// A fully validated signature file, ready for the store.
#[derive(Debug, Clone)]
pub struct ParsedSignature {
    pub name: String,
    pub version: String,
    pub license: Option<String>,
    pub publisher: Option<String>,
    pub ecosystem: String,
    pub family: Option<String>,
    pub description: Option<String>,
    pub patterns: Vec<ParsedPattern>,
    /// Component LSH digest: taken from `signature_metadata.tlsh` when well
    /// formed, otherwise computed from the accepted pattern corpus when that
    /// corpus reaches 256 bytes.
    pub digest: Option<String>,
}

fn normalize_ecosystem(raw: Option<String>) -> String {
    match raw {
        Some(e) => {
            let lower = e.to_lowercase();
            if KNOWN_ECOSYSTEMS.contains(&lower.as_str()) {
                lower
            } else {
                "unknown".to_string()
            }
        }
        None => "unknown".to_string(),
    }
}

fn well_formed_digest(digest: &str) -> bool {
    digest.len() == fuzzy::DIGEST_HEX_LEN && hex::decode(digest).is_ok()
}

/// Parse and validate one signature file. Returns the parsed signature plus
/// per-entry warnings. Fails with `Validation` when the JSON is unreadable
/// or no pattern survives validation.
pub fn parse_signature(json: &str) -> Result<(ParsedSignature, Vec<String>), SnifferError> {
    let raw: RawSignatureFile = serde_json::from_str(json)
        .map_err(|e| SnifferError::Validation(format!("unreadable signature file: {}", e)))?;

    let metadata = raw.signature_metadata.unwrap_or_default();
    let fallback_confidence = metadata.confidence_threshold.unwrap_or(DEFAULT_CONFIDENCE);

    let mut warnings = Vec::new();
    let mut seen: FxHashSet<String> = FxHashSet::default();
    let mut patterns = Vec::new();

    for (i, value) in raw.patterns.into_iter().enumerate() {
        let entry: RawPattern = match serde_json::from_value(value) {
            Ok(p) => p,
            Err(e) => {
                warnings.push(format!("entry {}: skipped invalid pattern: {}", i, e));
                continue;
            }
        };
        if let Err(reason) = validate_pattern(&entry.pattern) {
            warnings.push(format!("entry {}: rejected '{}': {}", i, entry.pattern, reason));
            continue;
        }
        if !seen.insert(entry.pattern.clone()) {
            warnings.push(format!("entry {}: duplicate pattern '{}'", i, entry.pattern));
            continue;
        }
        patterns.push(ParsedPattern {
            text: entry.pattern,
            confidence: clip_confidence(entry.confidence.unwrap_or(fallback_confidence)),
            context: entry.context,
        });
    }

    if patterns.is_empty() {
        return Err(SnifferError::Validation(format!(
            "signature file for '{}' has no valid patterns",
            raw.component.name
        )));
    }

    let digest = match metadata.tlsh {
        Some(t) if well_formed_digest(&t) => Some(t.to_lowercase()),
        Some(t) => {
            warnings.push(format!("ignoring malformed tlsh digest '{}'", t));
            fuzzy::digest_texts(patterns.iter().map(|p| p.text.as_str()))
        }
        None => fuzzy::digest_texts(patterns.iter().map(|p| p.text.as_str())),
    };

    let version = raw
        .component
        .version
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string());

    Ok((
        ParsedSignature {
            name: raw.component.name,
            version,
            license: raw.component.license,
            publisher: raw.component.publisher,
            ecosystem: normalize_ecosystem(raw.component.ecosystem),
            family: raw.component.family,
            description: raw.component.description,
            patterns,
            digest,
        },
        warnings,
    ))
}
