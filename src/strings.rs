//! Printable-string extraction from opaque binaries.
//!
//! # Performance Optimizations
//!
//! ## Single-pass run scanning - O(n)
//! ASCII and UTF-16LE runs are collected in one forward pass each with early
//! abort at the per-file string cap.
//!
//! ## Aho-Corasick synthetic tokens - O(n) multi-pattern
//! Codec fourcc identifiers and MIME prefixes are matched byte-aligned in a
//! single automaton pass, so `avc1` embedded in binary soup still surfaces
//! as an exact feature even when the surrounding run is unprintable.
//!
//! The scanner preserves original printable content; punctuation is not
//! stripped.

use crate::features::Feature;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use once_cell::sync::Lazy;

/// Minimum printable run length, in characters.
pub const MIN_RUN: usize = 4;
/// Maximum emitted string length, in bytes.
pub const MAX_RUN: usize = 512;
/// Hard cap on strings per file; scanning aborts early once reached.
pub const STRING_CAP: usize = 50_000;

/// Codec fourcc identifiers worth emitting as standalone features.
const FOURCC_TOKENS: &[&str] = &[
    "avc1", "avc3", "hvc1", "hev1", "mp4a", "mp4v", "av01", "vp08", "vp09",
    "opus", "alac", "flac", "dvh1",
];

/// MIME prefixes; the match is extended over the token tail (`video/avc`).
const MIME_PREFIXES: &[&str] = &["video/", "audio/", "image/", "application/", "text/"];

static SYNTHETIC_AC: Lazy<AhoCorasick> = Lazy::new(|| {
    let patterns: Vec<&str> = FOURCC_TOKENS.iter().chain(MIME_PREFIXES.iter()).copied().collect();
    AhoCorasickBuilder::new()
        .match_kind(MatchKind::LeftmostLongest)
        .build(patterns)
        .expect("synthetic token automaton")
});

#[inline]
fn is_printable(b: u8) -> bool {
    (0x20..=0x7e).contains(&b)
}

fn push_feature(out: &mut Vec<Feature>, text: String, source: Option<&str>) {
    match source {
        Some(src) => out.push(Feature::with_source(text, src)),
        None => out.push(Feature::new(text)),
    }
}

/// Scan for printable ASCII runs.
fn scan_ascii(data: &[u8], source: Option<&str>, out: &mut Vec<Feature>) {
    let mut run_start: Option<usize> = None;
    for (i, &b) in data.iter().enumerate() {
        if is_printable(b) {
            if run_start.is_none() {
                run_start = Some(i);
            }
            continue;
        }
        if let Some(start) = run_start.take() {
            emit_run(&data[start..i], source, out);
            if out.len() >= STRING_CAP {
                return;
            }
        }
    }
    if let Some(start) = run_start {
        emit_run(&data[start..], source, out);
    }
}

fn emit_run(run: &[u8], source: Option<&str>, out: &mut Vec<Feature>) {
    if run.len() < MIN_RUN || out.len() >= STRING_CAP {
        return;
    }
    let clipped = &run[..run.len().min(MAX_RUN)];
    // Runs are printable ASCII by construction
    let text = String::from_utf8_lossy(clipped).into_owned();
    push_feature(out, text, source);
}

/// Scan for UTF-16LE runs: printable ASCII bytes on even offsets with zero
/// high bytes. Both alignments are tried since strings rarely start aligned.
fn scan_utf16le(data: &[u8], source: Option<&str>, out: &mut Vec<Feature>) {
    for phase in 0..2usize {
        if out.len() >= STRING_CAP {
            return;
        }
        let mut run = String::new();
        let mut i = phase;
        while i + 1 < data.len() {
            let (lo, hi) = (data[i], data[i + 1]);
            if is_printable(lo) && hi == 0 {
                if run.len() < MAX_RUN {
                    run.push(lo as char);
                }
                i += 2;
                continue;
            }
            if run.len() >= MIN_RUN {
                push_feature(out, std::mem::take(&mut run), source);
                if out.len() >= STRING_CAP {
                    return;
                }
            }
            run.clear();
            i += 2;
        }
        if run.len() >= MIN_RUN {
            push_feature(out, run, source);
        }
    }
}

/// Emit synthetic features for byte-aligned codec/MIME tokens.
fn scan_synthetic(data: &[u8], source: Option<&str>, out: &mut Vec<Feature>) {
    for m in SYNTHETIC_AC.find_iter(data) {
        if out.len() >= STRING_CAP {
            return;
        }
        let token = &data[m.start()..m.end()];
        if token.ends_with(b"/") {
            // MIME prefix: extend over the subtype tail
            let tail_end = data[m.end()..]
                .iter()
                .take(64)
                .take_while(|&&b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'+' | b'-'))
                .count();
            if tail_end == 0 {
                continue;
            }
            let full = &data[m.start()..m.end() + tail_end];
            push_feature(out, String::from_utf8_lossy(full).into_owned(), source);
        } else {
            push_feature(out, String::from_utf8_lossy(token).into_owned(), source);
        }
    }
}

/// Extract printable strings (ASCII + UTF-16LE) and synthetic tokens from a
/// byte buffer. Order is scan order, deterministic for fixed input.
pub fn scan_strings(data: &[u8], source: Option<&str>) -> Vec<Feature> {
    let mut out = Vec::new();
    scan_ascii(data, source, &mut out);
    if out.len() < STRING_CAP {
        scan_utf16le(data, source, &mut out);
    }
    if out.len() < STRING_CAP {
        scan_synthetic(data, source, &mut out);
    }
    out
}
