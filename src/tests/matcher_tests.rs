use super::*;
use crate::detect::{FileKind, ZipFlavor};
use crate::features::Feature;
use crate::fuzzy::FuzzyHit;
use crate::sigfile::parse_signature;
use crate::store::{SignatureStore, StoreSnapshot};

// ========================================
// Test Helper Functions
// ========================================

fn snapshot_with(signatures: &[&str]) -> StoreSnapshot {
    let dir = tempfile::tempdir().unwrap();
    let mut store = SignatureStore::create(&dir.path().join("signatures.db")).unwrap();
    for json in signatures {
        let (sig, _) = parse_signature(json).unwrap();
        store.import(&sig).unwrap();
    }
    store.snapshot().unwrap()
}

fn libpng_json() -> &'static str {
    r#"{ "component": { "name": "libpng", "version": "1.6.37", "license": "libpng-2.0", "ecosystem": "native" },
         "patterns": [
           { "pattern": "png_create_read_struct", "confidence": 0.9 },
           { "pattern": "png_set_IHDR", "confidence": 0.9 } ] }"#
}

fn okhttp_json() -> &'static str {
    r#"{ "component": { "name": "okhttp", "version": "4.12.0", "ecosystem": "android" },
         "patterns": [
           { "pattern": "com.squareup.okhttp3", "confidence": 0.9 },
           { "pattern": "okhttp3.OkHttpClient", "confidence": 0.9 } ] }"#
}

fn features_of(texts: &[&str]) -> crate::features::FeatureSet {
    crate::features::FeatureSet::normalize(
        texts.iter().map(|t| Feature::new(*t)).collect(),
        150_000,
    )
}

fn plain_context() -> MatchContext {
    MatchContext::from_analysis(FileKind::Binary, &ArchiveStats::default())
}

fn native_context() -> MatchContext {
    MatchContext::from_analysis(FileKind::Elf, &ArchiveStats::default())
}

// ========================================
// Direct matcher
// ========================================

#[test]
fn test_direct_match_exact_hits() {
    let snap = snapshot_with(&[libpng_json()]);
    let opts = AnalysisOptions::default();
    let features = features_of(&["png_create_read_struct", "png_set_IHDR", "unrelated_symbol"]);

    let matches = direct_match(&features, &snap, &opts, &plain_context());
    assert_eq!(matches.len(), 1);
    let m = &matches[0];
    assert_eq!(m.hit_count, 2);
    // raw 1.8 over max(3, 0.15 * 2) = 3
    assert!((m.confidence - 0.6).abs() < 1e-9);
}

#[test]
fn test_direct_match_contains_path() {
    let snap = snapshot_with(&[libpng_json()]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.0;
    // Long symbol string embedding a stored pattern
    let features = features_of(&["__imp_png_create_read_struct_2"]);

    let matches = direct_match(&features, &snap, &opts, &plain_context());
    assert_eq!(matches.len(), 1);
    // Substring weight: 0.7 * 0.9 / 3
    assert!((matches[0].confidence - 0.21).abs() < 1e-9);
}

#[test]
fn test_direct_match_short_features_skip_contains() {
    let snap = snapshot_with(&[
        r#"{ "component": { "name": "x264" }, "patterns": [ { "pattern": "x264_", "confidence": 0.9 } ] }"#,
    ]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.0;
    // 7 bytes: below the 8-byte contains floor, and not an exact match
    let features = features_of(&["x264_ab"]);
    let matches = direct_match(&features, &snap, &opts, &plain_context());
    assert!(matches.is_empty());

    let features = features_of(&["x264_encoder"]);
    let matches = direct_match(&features, &snap, &opts, &plain_context());
    assert_eq!(matches.len(), 1);
}

#[test]
fn test_unique_patterns_counted_once() {
    let snap = snapshot_with(&[libpng_json()]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.0;
    // The same pattern reached through exact and contains paths
    let features = features_of(&["png_set_IHDR", "call_png_set_IHDR_wrapper"]);
    let matches = direct_match(&features, &snap, &opts, &plain_context());
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].hit_count, 1);
    // Exact weight wins over the discounted substring weight
    assert!((matches[0].confidence - 0.3).abs() < 1e-9);
}

#[test]
fn test_min_matches_filter() {
    let snap = snapshot_with(&[libpng_json()]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.0;
    opts.min_matches = 2;
    let features = features_of(&["png_create_read_struct"]);
    assert!(direct_match(&features, &snap, &opts, &plain_context()).is_empty());

    opts.min_matches = 1;
    assert_eq!(direct_match(&features, &snap, &opts, &plain_context()).len(), 1);
}

#[test]
fn test_context_filter_drops_mobile_in_native() {
    let snap = snapshot_with(&[okhttp_json()]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.0;
    let features = features_of(&["com.squareup.okhttp3", "okhttp3.OkHttpClient"]);

    assert!(direct_match(&features, &snap, &opts, &native_context()).is_empty());
    assert_eq!(direct_match(&features, &snap, &opts, &plain_context()).len(), 1);

    // The heuristic can be switched off
    opts.context_filter = false;
    assert_eq!(direct_match(&features, &snap, &opts, &native_context()).len(), 1);
}

#[test]
fn test_zip_wrapper_single_native_binary_is_native_context() {
    let stats = ArchiveStats {
        members_total: 1,
        members_native: 1,
    };
    let ctx = MatchContext::from_analysis(FileKind::Zip(ZipFlavor::Plain), &stats);
    assert!(ctx.native_container);

    let stats = ArchiveStats {
        members_total: 4,
        members_native: 1,
    };
    let ctx = MatchContext::from_analysis(FileKind::Zip(ZipFlavor::Apk), &stats);
    assert!(!ctx.native_container);
}

// ========================================
// Merger
// ========================================

#[test]
fn test_merge_direct_only() {
    let snap = snapshot_with(&[libpng_json()]);
    let opts = AnalysisOptions::default();
    let features = features_of(&["png_create_read_struct", "png_set_IHDR"]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());

    let merged = merge_matches(direct, Vec::new(), &snap, &opts, &plain_context());
    assert_eq!(merged.len(), 1);
    let m = &merged[0];
    assert_eq!(m.name, "libpng");
    assert_eq!(m.display_name, "libpng@1.6.37");
    assert_eq!(m.match_method, MatchMethod::Direct);
    assert_eq!(m.evidence.pattern_count, 2);
    assert_eq!(m.license.as_deref(), Some("libpng-2.0"));
    assert!(m.evidence.fuzzy_distance.is_none());
}

#[test]
fn test_merge_fuzzy_only() {
    let snap = snapshot_with(&[libpng_json()]);
    let opts = AnalysisOptions::default();
    let component_id = snap.components()[0].id;
    let fuzzy = vec![FuzzyHit {
        component_id,
        distance: 25,
        confidence: crate::fuzzy::confidence_for_distance(25),
    }];

    let merged = merge_matches(Vec::new(), fuzzy, &snap, &opts, &plain_context());
    assert_eq!(merged.len(), 1);
    let m = &merged[0];
    assert_eq!(m.match_method, MatchMethod::Fuzzy);
    assert_eq!(m.evidence.fuzzy_distance, Some(25));
    assert_eq!(m.evidence.pattern_count, 0);
    assert!(m.confidence >= 0.78);
}

#[test]
fn test_merge_both_paths() {
    let snap = snapshot_with(&[libpng_json()]);
    let opts = AnalysisOptions::default();
    let features = features_of(&["png_create_read_struct", "png_set_IHDR"]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    let component_id = snap.components()[0].id;
    let fuzzy = vec![FuzzyHit {
        component_id,
        distance: 40,
        confidence: crate::fuzzy::confidence_for_distance(40),
    }];

    let merged = merge_matches(direct, fuzzy, &snap, &opts, &plain_context());
    assert_eq!(merged.len(), 1);
    let m = &merged[0];
    assert_eq!(m.match_method, MatchMethod::DirectFuzzy);
    // Fuzzy at distance 40 maps to ~0.885, above the direct 0.6
    assert!(m.confidence > 0.6);
    assert_eq!(m.evidence.fuzzy_distance, Some(40));
    assert_eq!(m.evidence.pattern_count, 2);
}

#[test]
fn test_merge_component_appears_once() {
    let snap = snapshot_with(&[libpng_json(), okhttp_json()]);
    let opts = AnalysisOptions::default();
    let features = features_of(&["png_create_read_struct", "png_set_IHDR"]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    let component_id = direct[0].component_id;
    let fuzzy = vec![
        FuzzyHit {
            component_id,
            distance: 10,
            confidence: crate::fuzzy::confidence_for_distance(10),
        },
        FuzzyHit {
            component_id,
            distance: 5,
            confidence: crate::fuzzy::confidence_for_distance(5),
        },
    ];

    let merged = merge_matches(direct, fuzzy, &snap, &opts, &plain_context());
    assert_eq!(merged.len(), 1);
    // Best distance wins
    assert_eq!(merged[0].evidence.fuzzy_distance, Some(5));
}

#[test]
fn test_merge_ordering_and_top() {
    let snap = snapshot_with(&[
        r#"{ "component": { "name": "alpha-lib" }, "patterns": [ { "pattern": "alpha_symbol_one", "confidence": 0.9 } ] }"#,
        r#"{ "component": { "name": "beta-lib" }, "patterns": [ { "pattern": "beta_symbol_one", "confidence": 0.9 } ] }"#,
        r#"{ "component": { "name": "gamma-lib" }, "patterns": [
              { "pattern": "gamma_symbol_one", "confidence": 0.9 },
              { "pattern": "gamma_symbol_two", "confidence": 0.9 },
              { "pattern": "gamma_symbol_three", "confidence": 0.9 } ] }"#,
    ]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.2;
    let features = features_of(&[
        "alpha_symbol_one",
        "beta_symbol_one",
        "gamma_symbol_one",
        "gamma_symbol_two",
        "gamma_symbol_three",
    ]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    let merged = merge_matches(direct, Vec::new(), &snap, &opts, &plain_context());

    // gamma scores 0.9, alpha and beta tie at 0.3 and break on name
    let names: Vec<&str> = merged.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(names, vec!["gamma-lib", "alpha-lib", "beta-lib"]);
    for window in merged.windows(2) {
        assert!(window[0].confidence >= window[1].confidence);
    }

    opts.top = Some(1);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    let merged = merge_matches(direct, Vec::new(), &snap, &opts, &plain_context());
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].name, "gamma-lib");
}

#[test]
fn test_merge_threshold_honored() {
    let snap = snapshot_with(&[libpng_json()]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.7;
    let features = features_of(&["png_create_read_struct", "png_set_IHDR"]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    // 0.6 < 0.7: filtered in the direct stage already
    assert!(direct.is_empty());

    let component_id = snap.components()[0].id;
    let weak_fuzzy = vec![FuzzyHit {
        component_id,
        distance: 120,
        confidence: crate::fuzzy::confidence_for_distance(120),
    }];
    let merged = merge_matches(Vec::new(), weak_fuzzy, &snap, &opts, &plain_context());
    assert!(merged.is_empty());
}

#[test]
fn test_merge_component_globs() {
    let snap = snapshot_with(&[libpng_json(), okhttp_json()]);
    let mut opts = AnalysisOptions::default();
    opts.component_globs = vec!["libpng*".to_string()];
    let features = features_of(&[
        "png_create_read_struct",
        "png_set_IHDR",
        "com.squareup.okhttp3",
        "okhttp3.OkHttpClient",
    ]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    let merged = merge_matches(direct, Vec::new(), &snap, &opts, &plain_context());
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].name, "libpng");
}

#[test]
fn test_display_name_omits_unknown_version() {
    let snap = snapshot_with(&[
        r#"{ "component": { "name": "mystery-lib" }, "patterns": [ { "pattern": "mystery_symbol_one", "confidence": 0.9 } ] }"#,
    ]);
    let mut opts = AnalysisOptions::default();
    opts.threshold = 0.2;
    let features = features_of(&["mystery_symbol_one"]);
    let direct = direct_match(&features, &snap, &opts, &plain_context());
    let merged = merge_matches(direct, Vec::new(), &snap, &opts, &plain_context());
    assert_eq!(merged[0].version, "unknown");
    assert_eq!(merged[0].display_name, "mystery-lib");
}
