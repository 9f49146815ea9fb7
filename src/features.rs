//! Feature set construction and normalization.
//!
//! # Performance Optimizations
//!
//! ## FxHashSet - Fast deduplication
//! Deduplication uses FxHash (~2x faster than SipHash for short strings,
//! safe for non-adversarial input) while a plain `Vec` preserves first-seen
//! order. The matcher sees a canonical, bounded input: dedup first-seen
//! order, 4..=512 byte lengths, stop-listed tokens removed, hard cap.
//!
//! Normalization is idempotent: running it on its own output is a no-op.

use crate::validate::STOP_TOKENS;
use rustc_hash::{FxHashMap, FxHashSet};

/// Maximum feature length in bytes; longer features are truncated.
pub const MAX_FEATURE_LEN: usize = 512;
/// Minimum feature length in bytes; shorter features are dropped.
pub const MIN_FEATURE_LEN: usize = 4;

/// One extracted string, optionally annotated with the archive-relative
/// source path it came from (used for match evidence).
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub text: String,
    pub source: Option<String>,
}

impl Feature {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    pub fn with_source(text: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: Some(source.into()),
        }
    }
}

/// Canonical, deduplicated, size-capped feature sequence for one analysis.
#[derive(Debug, Clone, Default)]
pub struct FeatureSet {
    features: Vec<String>,
    sources: FxHashMap<String, String>,
    /// Set when the cap discarded features from the tail.
    pub truncated: bool,
    payload_len: usize,
}

/// Truncate to a byte budget without splitting a UTF-8 character.
fn truncate_on_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// A stop-listed token survives only when it carries an underscore or
/// non-ASCII bytes, so `av_` style prefixes stay while `init` goes.
fn is_stop_listed(text: &str) -> bool {
    if text.contains('_') || !text.is_ascii() {
        return false;
    }
    STOP_TOKENS.contains(text.to_lowercase().as_str())
}

impl FeatureSet {
    /// Build the canonical feature set from raw extractor output.
    ///
    /// Rules, in order: truncate over-long features, drop under-length and
    /// stop-listed ones, deduplicate preserving first-seen order, then
    /// enforce the cap on the deduplicated sequence (tail discarded).
    pub fn normalize(raw: Vec<Feature>, cap: usize) -> Self {
        let mut seen: FxHashSet<String> = FxHashSet::default();
        let mut features = Vec::new();
        let mut sources: FxHashMap<String, String> = FxHashMap::default();
        let mut truncated = false;
        let mut payload_len = 0usize;

        for feat in raw {
            let text = truncate_on_boundary(&feat.text, MAX_FEATURE_LEN);
            if text.len() < MIN_FEATURE_LEN || is_stop_listed(text) {
                continue;
            }
            if seen.contains(text) {
                continue;
            }
            if features.len() >= cap {
                truncated = true;
                break;
            }
            seen.insert(text.to_string());
            if let Some(src) = feat.source {
                sources.entry(text.to_string()).or_insert(src);
            }
            payload_len += text.len();
            features.push(text.to_string());
        }

        Self {
            features,
            sources,
            truncated,
            payload_len,
        }
    }

    /// Features in canonical (first-seen) order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.features.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Total byte length of the canonical payload; the fuzzy matcher
    /// requires at least 256 bytes.
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }

    /// Archive-relative source path of a feature, when annotated.
    pub fn source_of(&self, text: &str) -> Option<&str> {
        self.sources.get(text).map(|s| s.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feats(texts: &[&str]) -> Vec<Feature> {
        texts.iter().map(|t| Feature::new(*t)).collect()
    }

    #[test]
    fn test_dedup_preserves_first_seen_order() {
        let set = FeatureSet::normalize(feats(&["zebra_fn", "alpha_fn", "zebra_fn"]), 1000);
        let got: Vec<_> = set.iter().collect();
        assert_eq!(got, vec!["zebra_fn", "alpha_fn"]);
    }

    #[test]
    fn test_short_features_dropped() {
        let set = FeatureSet::normalize(feats(&["ab", "abc", "abcd"]), 1000);
        let got: Vec<_> = set.iter().collect();
        assert_eq!(got, vec!["abcd"]);
    }

    #[test]
    fn test_long_features_truncated() {
        let long = "x".repeat(600);
        let set = FeatureSet::normalize(vec![Feature::new(long)], 1000);
        assert_eq!(set.iter().next().unwrap().len(), MAX_FEATURE_LEN);
    }

    #[test]
    fn test_stop_listed_dropped_unless_underscored() {
        let set = FeatureSet::normalize(feats(&["init", "error", "avio_init", "av_log"]), 1000);
        let got: Vec<_> = set.iter().collect();
        assert_eq!(got, vec!["avio_init", "av_log"]);
    }

    #[test]
    fn test_cap_discards_tail() {
        let raw: Vec<Feature> = (0..20).map(|i| Feature::new(format!("feature_{:04}", i))).collect();
        let set = FeatureSet::normalize(raw, 5);
        assert_eq!(set.len(), 5);
        assert!(set.truncated);
        assert_eq!(set.iter().next(), Some("feature_0000"));
    }

    #[test]
    fn test_normalize_idempotent() {
        let raw = feats(&["png_create_read_struct", "init", "ab", "png_create_read_struct", "x264_encoder_open"]);
        let once = FeatureSet::normalize(raw, 1000);
        let again = FeatureSet::normalize(once.iter().map(Feature::new).collect(), 1000);
        let a: Vec<_> = once.iter().collect();
        let b: Vec<_> = again.iter().collect();
        assert_eq!(a, b);
        assert_eq!(once.payload_len(), again.payload_len());
    }

    #[test]
    fn test_source_annotation_kept_for_first_occurrence() {
        let raw = vec![
            Feature::with_source("x264_encoder_open", "lib/arm64-v8a/libx264.so"),
            Feature::with_source("x264_encoder_open", "lib/x86/libx264.so"),
        ];
        let set = FeatureSet::normalize(raw, 1000);
        assert_eq!(set.source_of("x264_encoder_open"), Some("lib/arm64-v8a/libx264.so"));
    }

    #[test]
    fn test_payload_len_counts_canonical_bytes() {
        let set = FeatureSet::normalize(feats(&["abcdef", "ghijkl"]), 1000);
        assert_eq!(set.payload_len(), 12);
    }
}
