//! Direct matching and result merging.
//!
//! # Algorithm
//! The direct matcher walks the canonical feature sequence once. Every
//! feature takes the exact-lookup path; features of 8+ bytes also take the
//! contains path, which catches long symbol strings embedding a shorter
//! unique pattern (at a 0.7 weight discount). Hits aggregate per component
//! over *unique* patterns, then normalize into a confidence:
//!
//! `min(1.0, raw_score / max(3, 0.15 x |component patterns|))`
//!
//! The merger unifies direct and fuzzy hits (one row per component, max
//! confidence wins), applies the native-context filter and the include
//! globs, and emits the list ordered by `(-confidence, name)`.

use crate::extract::ArchiveStats;
use crate::detect::FileKind;
use crate::features::FeatureSet;
use crate::fuzzy::FuzzyHit;
use crate::options::AnalysisOptions;
use crate::traits::PatternLookup;
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Weight discount for substring (contains) hits.
const SUBSTRING_WEIGHT: f64 = 0.7;
/// Minimum feature length for the contains path.
const CONTAINS_MIN_LEN: usize = 8;
/// Evidence sample size per match.
const EVIDENCE_PATTERN_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMethod {
    #[serde(rename = "direct")]
    Direct,
    #[serde(rename = "fuzzy")]
    Fuzzy,
    #[serde(rename = "direct+fuzzy")]
    DirectFuzzy,
}

/// Supporting evidence for one component match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    /// Distinct patterns matched by the direct path.
    pub pattern_count: u32,
    /// Sample of matched pattern texts, sorted, capped.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub patterns: Vec<String>,
    /// Archive-relative paths the matched features came from.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub source_files: Vec<String>,
    /// LSH distance when the fuzzy path contributed.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub fuzzy_distance: Option<u32>,
}

/// One detected component, post-merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentMatch {
    pub name: String,
    /// `name@version`, or just `name` when the version is unknown.
    pub display_name: String,
    pub version: String,
    pub license: Option<String>,
    pub publisher: Option<String>,
    pub ecosystem: String,
    pub confidence: f64,
    pub match_method: MatchMethod,
    pub evidence: Evidence,
}

/// Aggregated direct hits for one component.
#[derive(Debug, Default)]
struct DirectAgg {
    /// Unique pattern -> best weight. BTreeMap keeps evidence ordering
    /// stable without a sort pass.
    patterns: BTreeMap<String, f64>,
    sources: BTreeSet<String>,
}

/// A scored direct candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectMatch {
    pub component_id: i64,
    pub confidence: f64,
    pub hit_count: u32,
    pub patterns: Vec<String>,
    pub sources: Vec<String>,
}

/// Top-level container context, driving the native-vs-mobile filter.
#[derive(Debug, Clone, Copy)]
pub struct MatchContext {
    pub native_container: bool,
}

impl MatchContext {
    /// Native when the file itself is an executable/library, or when it is a
    /// zip wrapper whose single member is one.
    pub fn from_analysis(kind: FileKind, stats: &ArchiveStats) -> Self {
        let native_container = kind.is_native_binary()
            || (kind.is_archive() && stats.members_total == 1 && stats.members_native == 1);
        Self { native_container }
    }

    fn drops(&self, ecosystem: &str, opts: &AnalysisOptions) -> bool {
        opts.context_filter
            && self.native_container
            && matches!(ecosystem, "android" | "ios")
    }
}

/// Run the direct matcher over a canonical feature set.
pub fn direct_match(
    features: &FeatureSet,
    store: &dyn PatternLookup,
    opts: &AnalysisOptions,
    context: &MatchContext,
) -> Vec<DirectMatch> {
    let mut aggs: BTreeMap<i64, DirectAgg> = BTreeMap::new();

    for feature in features.iter() {
        for hit in store.lookup_exact(feature) {
            let agg = aggs.entry(hit.component_id).or_default();
            let weight = agg.patterns.entry(hit.pattern).or_insert(0.0);
            *weight = weight.max(hit.confidence);
            if let Some(src) = features.source_of(feature) {
                agg.sources.insert(src.to_string());
            }
        }
        if feature.len() >= CONTAINS_MIN_LEN {
            for hit in store.lookup_contains(feature) {
                let agg = aggs.entry(hit.component_id).or_default();
                let weight = agg.patterns.entry(hit.pattern).or_insert(0.0);
                *weight = weight.max(SUBSTRING_WEIGHT * hit.confidence);
                if let Some(src) = features.source_of(feature) {
                    agg.sources.insert(src.to_string());
                }
            }
        }
    }

    let mut matches = Vec::new();
    for (component_id, agg) in aggs {
        let Some(component) = store.component(component_id) else {
            continue;
        };
        // Context filter runs before scoring normalization
        if context.drops(&component.ecosystem, opts) {
            continue;
        }
        let hit_count = agg.patterns.len() as u32;
        if hit_count < opts.min_matches {
            continue;
        }
        let raw_score: f64 = agg.patterns.values().sum();
        let denominator = (0.15 * f64::from(store.pattern_count(component_id))).max(3.0);
        let confidence = (raw_score / denominator).min(1.0);
        if confidence < opts.threshold {
            continue;
        }
        matches.push(DirectMatch {
            component_id,
            confidence,
            hit_count,
            patterns: agg.patterns.keys().take(EVIDENCE_PATTERN_CAP).cloned().collect(),
            sources: agg.sources.into_iter().collect(),
        });
    }
    matches
}

fn compile_globs(patterns: &[String]) -> Option<GlobSet> {
    if patterns.is_empty() {
        return None;
    }
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        if let Ok(glob) = Glob::new(p) {
            builder.add(glob);
        }
    }
    builder.build().ok()
}

/// Merge direct and fuzzy hits into the final ordered match list.
pub fn merge_matches(
    direct: Vec<DirectMatch>,
    fuzzy: Vec<FuzzyHit>,
    store: &dyn PatternLookup,
    opts: &AnalysisOptions,
    context: &MatchContext,
) -> Vec<ComponentMatch> {
    let globs = compile_globs(&opts.component_globs);

    let mut merged: BTreeMap<i64, (Option<DirectMatch>, Option<FuzzyHit>)> = BTreeMap::new();
    for d in direct {
        let component_id = d.component_id;
        merged.entry(component_id).or_default().0 = Some(d);
    }
    for f in fuzzy {
        let entry = merged.entry(f.component_id).or_default();
        // At most one fuzzy result per component: keep the best distance
        match &entry.1 {
            Some(existing) if existing.distance <= f.distance => {}
            _ => entry.1 = Some(f),
        }
    }

    let mut out = Vec::new();
    for (component_id, (direct_hit, fuzzy_hit)) in merged {
        let Some(component) = store.component(component_id) else {
            continue;
        };
        if context.drops(&component.ecosystem, opts) {
            continue;
        }
        if let Some(set) = &globs {
            if !set.is_match(&component.name) {
                continue;
            }
        }

        let direct_conf = direct_hit.as_ref().map(|d| d.confidence).unwrap_or(0.0);
        let fuzzy_conf = fuzzy_hit.as_ref().map(|f| f.confidence).unwrap_or(0.0);
        let confidence = direct_conf.max(fuzzy_conf);
        if confidence < opts.threshold {
            continue;
        }

        let match_method = match (&direct_hit, &fuzzy_hit) {
            (Some(_), Some(_)) => MatchMethod::DirectFuzzy,
            (Some(_), None) => MatchMethod::Direct,
            (None, Some(_)) => MatchMethod::Fuzzy,
            (None, None) => continue,
        };

        let version = if component.version.is_empty() {
            "unknown".to_string()
        } else {
            component.version.clone()
        };
        let display_name = if version == "unknown" {
            component.name.clone()
        } else {
            format!("{}@{}", component.name, version)
        };

        out.push(ComponentMatch {
            name: component.name.clone(),
            display_name,
            version,
            license: component.license.clone(),
            publisher: component.publisher.clone(),
            ecosystem: component.ecosystem.clone(),
            confidence,
            match_method,
            evidence: Evidence {
                pattern_count: direct_hit.as_ref().map(|d| d.hit_count).unwrap_or(0),
                patterns: direct_hit.as_ref().map(|d| d.patterns.clone()).unwrap_or_default(),
                source_files: direct_hit.as_ref().map(|d| d.sources.clone()).unwrap_or_default(),
                fuzzy_distance: fuzzy_hit.as_ref().map(|f| f.distance),
            },
        });
    }

    // Final ordering: confidence descending, then name ascending
    out.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.name.cmp(&b.name))
    });
    if let Some(top) = opts.top {
        out.truncate(top);
    }
    out
}

#[cfg(test)]
#[path = "tests/matcher_tests.rs"]
mod tests;
