//! Locality-sensitive hashing over feature payloads.
//!
//! # Algorithm
//! TLSH-family digest: a 5-byte window slides over the payload and feeds six
//! Pearson-hashed bucket updates per position into 128 counters. The
//! counters are quantized by their quartiles into a 32-byte body; a 3-byte
//! header carries a checksum, the log-bucketed payload length and the
//! quartile ratios. 35 bytes total, rendered as 70 lowercase hex characters.
//!
//! Distance is the TLSH diff: header mod-distances (scaled x12 past slack 1)
//! plus per-bucket 2-bit differences where an opposite-corner pair costs 6.
//!
//! # Determinism
//! The Pearson permutation is generated once from a fixed seed; every digest
//! and distance is a pure function of its input bytes. No ambient hashing
//! leaks into observable output.

use crate::features::FeatureSet;
use once_cell::sync::Lazy;

/// Digest length in hex characters (35 raw bytes).
pub const DIGEST_HEX_LEN: usize = 70;
/// Minimum payload for a meaningful digest.
pub const MIN_PAYLOAD: usize = 256;

const BUCKETS: usize = 128;
const WINDOW: usize = 5;

/// Fixed-seed Pearson permutation; the seed is part of the on-disk digest
/// contract and must never change without a store schema bump.
static PEARSON: Lazy<[u8; 256]> = Lazy::new(|| {
    let mut table: [u8; 256] = core::array::from_fn(|i| i as u8);
    let mut state: u64 = 0x9e37_79b9_7f4a_7c15;
    for i in (1..256usize).rev() {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        let j = (state % (i as u64 + 1)) as usize;
        table.swap(i, j);
    }
    table
});

#[inline]
fn pearson(salt: u8, a: u8, b: u8, c: u8) -> u8 {
    let t = &*PEARSON;
    let mut h = t[salt as usize];
    h = t[(h ^ a) as usize];
    h = t[(h ^ b) as usize];
    h = t[(h ^ c) as usize];
    h
}

/// Integer log-1.5 bucketing of the payload length.
fn l_capturing(len: usize) -> u8 {
    let mut bucket = 0u32;
    let mut cap = 1usize;
    while cap < len && bucket < 255 {
        cap += cap / 2 + 1;
        bucket += 1;
    }
    bucket as u8
}

struct DigestBuilder {
    buckets: [u32; BUCKETS],
    window: [u8; WINDOW],
    filled: usize,
    checksum: u8,
    len: usize,
}

impl DigestBuilder {
    fn new() -> Self {
        Self {
            buckets: [0; BUCKETS],
            window: [0; WINDOW],
            filled: 0,
            checksum: 0,
            len: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        for &b in data {
            self.window.rotate_right(1);
            self.window[0] = b;
            self.len += 1;
            if self.filled < WINDOW {
                self.filled += 1;
                if self.filled < WINDOW {
                    continue;
                }
            }
            let w = &self.window;
            self.checksum = pearson(0, w[0], w[1], self.checksum);
            // Six salted triples per position, TLSH style
            self.buckets[(pearson(2, w[0], w[1], w[2]) as usize) % BUCKETS] += 1;
            self.buckets[(pearson(3, w[0], w[1], w[3]) as usize) % BUCKETS] += 1;
            self.buckets[(pearson(5, w[0], w[2], w[3]) as usize) % BUCKETS] += 1;
            self.buckets[(pearson(7, w[0], w[2], w[4]) as usize) % BUCKETS] += 1;
            self.buckets[(pearson(11, w[0], w[1], w[4]) as usize) % BUCKETS] += 1;
            self.buckets[(pearson(13, w[0], w[3], w[4]) as usize) % BUCKETS] += 1;
        }
    }

    fn finish(self) -> Option<String> {
        if self.len < MIN_PAYLOAD {
            return None;
        }
        let mut sorted = self.buckets;
        sorted.sort_unstable();
        let q1 = sorted[BUCKETS / 4 - 1];
        let q2 = sorted[BUCKETS / 2 - 1];
        let q3 = sorted[3 * BUCKETS / 4 - 1];

        let q1_ratio = if q3 > 0 { ((q1 * 100 / q3) % 16) as u8 } else { 0 };
        let q2_ratio = if q3 > 0 { ((q2 * 100 / q3) % 16) as u8 } else { 0 };

        let mut raw = Vec::with_capacity(35);
        raw.push(self.checksum);
        raw.push(l_capturing(self.len));
        raw.push((q1_ratio << 4) | q2_ratio);
        for chunk in self.buckets.chunks(4) {
            let mut byte = 0u8;
            for (i, &b) in chunk.iter().enumerate() {
                let quant: u8 = if b > q3 {
                    3
                } else if b > q2 {
                    2
                } else if b > q1 {
                    1
                } else {
                    0
                };
                byte |= quant << (i * 2);
            }
            raw.push(byte);
        }
        Some(hex::encode(raw))
    }
}

/// Digest of a raw byte buffer (used for file fuzzy hashes and for pattern
/// corpora at ingest). None below the 256-byte floor.
pub fn digest_bytes(data: &[u8]) -> Option<String> {
    let mut builder = DigestBuilder::new();
    builder.update(data);
    builder.finish()
}

/// Digest of a text corpus, each entry terminated by `\n`. This is the
/// shared convention between ingest-time pattern corpora and analysis-time
/// feature payloads, so the two sides produce comparable digests.
pub fn digest_texts<'a>(texts: impl Iterator<Item = &'a str>) -> Option<String> {
    let mut builder = DigestBuilder::new();
    for text in texts {
        builder.update(text.as_bytes());
        builder.update(b"\n");
    }
    builder.finish()
}

/// Digest of the canonical feature payload, features separated by `\n`.
/// None when the payload is under 256 bytes.
pub fn digest_features(set: &FeatureSet) -> Option<String> {
    if set.payload_len() < MIN_PAYLOAD {
        return None;
    }
    digest_texts(set.iter())
}

fn decode(digest: &str) -> Option<Vec<u8>> {
    if digest.len() != DIGEST_HEX_LEN {
        return None;
    }
    hex::decode(digest).ok()
}

fn mod_diff(a: u8, b: u8, range: u32) -> u32 {
    let d = (i32::from(a) - i32::from(b)).unsigned_abs();
    d.min(range - d)
}

fn scaled(d: u32) -> u32 {
    if d <= 1 {
        d
    } else {
        (d - 1) * 12
    }
}

/// TLSH-style distance between two digests; lower is more similar.
/// None when either digest is malformed.
pub fn distance(a: &str, b: &str) -> Option<u32> {
    let (a, b) = (decode(a)?, decode(b)?);
    let mut dist = 0u32;
    if a[0] != b[0] {
        dist += 1;
    }
    dist += scaled(mod_diff(a[1], b[1], 256));
    dist += scaled(mod_diff(a[2] >> 4, b[2] >> 4, 16));
    dist += scaled(mod_diff(a[2] & 0x0f, b[2] & 0x0f, 16));
    for (&ba, &bb) in a[3..].iter().zip(&b[3..]) {
        for shift in [0u8, 2, 4, 6] {
            let qa = (ba >> shift) & 0x03;
            let qb = (bb >> shift) & 0x03;
            let d = u32::from(qa.abs_diff(qb));
            dist += if d == 3 { 6 } else { d };
        }
    }
    Some(dist)
}

/// Piecewise distance-to-confidence mapping, linearly interpolated between
/// the breakpoints 0 -> 1.00, 30 -> 0.92, 70 -> 0.78, 100 -> 0.60. The
/// breakpoints are tunables, not invariants.
pub fn confidence_for_distance(d: u32) -> f64 {
    match d {
        0 => 1.0,
        1..=30 => 1.0 - 0.08 * f64::from(d) / 30.0,
        31..=70 => 0.92 - 0.14 * f64::from(d - 30) / 40.0,
        71..=100 => 0.78 - 0.18 * f64::from(d - 70) / 30.0,
        _ => 0.60,
    }
}

/// One fuzzy hit per component: best distance plus its mapped confidence.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyHit {
    pub component_id: i64,
    pub distance: u32,
    pub confidence: f64,
}

/// Compare the feature-set digest against every stored component digest.
/// `digests` must be ordered by component id for deterministic output.
pub fn fuzzy_match(set: &FeatureSet, digests: &[(i64, String)], threshold: u32) -> Vec<FuzzyHit> {
    let Some(query) = digest_features(set) else {
        return Vec::new();
    };
    let mut hits = Vec::new();
    for (component_id, stored) in digests {
        let Some(d) = distance(&query, stored) else {
            continue;
        };
        if d >= threshold {
            continue;
        }
        hits.push(FuzzyHit {
            component_id: *component_id,
            distance: d,
            confidence: confidence_for_distance(d),
        });
    }
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::Feature;

    fn big_feature_set(salt: &str) -> FeatureSet {
        let raw: Vec<Feature> = (0..64)
            .map(|i| Feature::new(format!("{}_symbol_number_{:04}", salt, i)))
            .collect();
        FeatureSet::normalize(raw, 100_000)
    }

    #[test]
    fn test_digest_is_deterministic() {
        let set = big_feature_set("libfoo");
        let a = digest_features(&set).unwrap();
        let b = digest_features(&set).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), DIGEST_HEX_LEN);
    }

    #[test]
    fn test_identical_inputs_distance_zero() {
        let a = digest_features(&big_feature_set("libfoo")).unwrap();
        let b = digest_features(&big_feature_set("libfoo")).unwrap();
        assert_eq!(distance(&a, &b), Some(0));
    }

    #[test]
    fn test_distance_symmetric() {
        let a = digest_features(&big_feature_set("libfoo")).unwrap();
        let b = digest_features(&big_feature_set("libbar")).unwrap();
        assert_eq!(distance(&a, &b), distance(&b, &a));
    }

    #[test]
    fn test_min_payload_floor() {
        let small = FeatureSet::normalize(vec![Feature::new("tiny_feature")], 100);
        assert!(small.payload_len() < MIN_PAYLOAD);
        assert!(digest_features(&small).is_none());
        assert!(digest_bytes(&[0u8; 255]).is_none());
        assert!(digest_bytes(&[7u8; 256]).is_some());
    }

    #[test]
    fn test_confidence_breakpoints() {
        assert_eq!(confidence_for_distance(0), 1.0);
        assert!((confidence_for_distance(30) - 0.92).abs() < 1e-9);
        assert!((confidence_for_distance(70) - 0.78).abs() < 1e-9);
        assert!((confidence_for_distance(100) - 0.60).abs() < 1e-9);
        assert_eq!(confidence_for_distance(400), 0.60);
        // Scenario from the interpolated middle
        assert!(confidence_for_distance(25) >= 0.78);
    }

    #[test]
    fn test_malformed_digest() {
        assert_eq!(distance("abc", "abc"), None);
        let good = digest_bytes(&[9u8; 512]).unwrap();
        assert_eq!(distance(&good, "zz"), None);
    }

    #[test]
    fn test_fuzzy_match_thresholds() {
        let set = big_feature_set("libfoo");
        let own = digest_features(&set).unwrap();
        let far = digest_features(&big_feature_set("completely_different")).unwrap();
        let digests = vec![(1i64, own), (2i64, far)];
        let hits = fuzzy_match(&set, &digests, 70);
        // Component 1 is an exact digest match at distance 0
        assert!(hits.iter().any(|h| h.component_id == 1 && h.distance == 0));
        for hit in &hits {
            assert!(hit.distance < 70);
        }
    }
}
