//! Persistent signature store and its read-only snapshot.
//!
//! # Storage layout
//! One SQLite file with `components`, `patterns`, `pattern_ngrams`,
//! `lsh_digests` and `meta` tables. Writes are batched in transactions and
//! idempotent (UPSERT / INSERT OR IGNORE), so re-ingesting an identical
//! signature file leaves the store logically unchanged.
//!
//! # Read path
//! `SignatureStore::snapshot` loads everything once into an immutable
//! [`StoreSnapshot`] shared read-only across workers. Exact lookups are an
//! FxHashMap probe. Contains lookups are pruned through a byte-3-gram
//! inverted index (built lazily on first use) and verified with a SIMD
//! `memmem` literal search, so there are no probabilistic false positives.

use crate::error::SnifferError;
use crate::sigfile::ParsedSignature;
use chrono::Utc;
use memchr::memmem;
use once_cell::sync::OnceCell;
use rusqlite::{params, Connection};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const SCHEMA_VERSION: u32 = 1;
const GRAM_LEN: usize = 3;

/// One component row, immutable after ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentRow {
    pub id: i64,
    pub name: String,
    pub version: String,
    pub license: Option<String>,
    pub publisher: Option<String>,
    pub ecosystem: String,
    pub family: Option<String>,
    pub description: Option<String>,
}

/// An exact-equality pattern hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ExactHit {
    pub component_id: i64,
    pub pattern: String,
    pub confidence: f64,
}

/// A strict-substring pattern hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainsHit {
    pub component_id: i64,
    pub pattern: String,
    pub confidence: f64,
}

/// Store status summary for the CLI.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub components: u64,
    pub patterns: u64,
    pub digests: u64,
    pub last_import: Option<String>,
}

/// Import outcome over one or more signature files.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub files_imported: usize,
    pub files_rejected: usize,
    pub components: usize,
    pub patterns: usize,
    pub warnings: Vec<String>,
}

struct PatternRec {
    text: String,
    component_id: i64,
    confidence: f64,
    gram_count: u32,
}

fn distinct_grams(text: &str) -> FxHashSet<[u8; GRAM_LEN]> {
    let bytes = text.as_bytes();
    let mut grams = FxHashSet::default();
    if bytes.len() >= GRAM_LEN {
        for w in bytes.windows(GRAM_LEN) {
            grams.insert([w[0], w[1], w[2]]);
        }
    }
    grams
}

// ============================================================================
// Persistent store
// ============================================================================

pub struct SignatureStore {
    conn: Connection,
    path: PathBuf,
}

impl SignatureStore {
    /// Create an empty store (or open an existing one) and ensure the schema.
    pub fn create(path: &Path) -> Result<Self, SnifferError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        // journal_mode returns a row, so it cannot ride in the batch below
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |r| r.get(0))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS components (
                 id INTEGER PRIMARY KEY,
                 name TEXT NOT NULL,
                 version TEXT NOT NULL DEFAULT 'unknown',
                 license TEXT,
                 publisher TEXT,
                 ecosystem TEXT NOT NULL DEFAULT 'unknown',
                 family TEXT,
                 description TEXT,
                 created_at TEXT NOT NULL,
                 UNIQUE(name, version)
             );
             CREATE TABLE IF NOT EXISTS patterns (
                 id INTEGER PRIMARY KEY,
                 component_id INTEGER NOT NULL REFERENCES components(id) ON DELETE CASCADE,
                 text TEXT NOT NULL,
                 confidence REAL NOT NULL,
                 context TEXT,
                 UNIQUE(component_id, text)
             );
             CREATE INDEX IF NOT EXISTS idx_patterns_text ON patterns(text);
             CREATE TABLE IF NOT EXISTS pattern_ngrams (
                 gram TEXT NOT NULL,
                 pattern_id INTEGER NOT NULL REFERENCES patterns(id) ON DELETE CASCADE,
                 UNIQUE(gram, pattern_id)
             );
             CREATE TABLE IF NOT EXISTS lsh_digests (
                 component_id INTEGER PRIMARY KEY REFERENCES components(id) ON DELETE CASCADE,
                 digest TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS meta (
                 key TEXT PRIMARY KEY,
                 value TEXT NOT NULL
             );",
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?1)",
            params![SCHEMA_VERSION.to_string()],
        )?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing store, verifying the schema version.
    pub fn open(path: &Path) -> Result<Self, SnifferError> {
        if !path.exists() {
            return Err(SnifferError::Store(format!(
                "signature store not found: {}",
                path.display()
            )));
        }
        let store = Self::create(path)?;
        let version: String = store
            .conn
            .query_row(
                "SELECT value FROM meta WHERE key = 'schema_version'",
                [],
                |row| row.get(0),
            )
            .map_err(|_| SnifferError::Store("missing schema version".to_string()))?;
        if version != SCHEMA_VERSION.to_string() {
            return Err(SnifferError::Store(format!(
                "unsupported store schema version {}",
                version
            )));
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Import one parsed signature file inside a single transaction.
    pub fn import(&mut self, sig: &ParsedSignature) -> Result<(), SnifferError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO components (name, version, license, publisher, ecosystem, family, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(name, version) DO UPDATE SET
                 license = excluded.license,
                 publisher = excluded.publisher,
                 ecosystem = excluded.ecosystem,
                 family = excluded.family,
                 description = excluded.description",
            params![
                sig.name,
                sig.version,
                sig.license,
                sig.publisher,
                sig.ecosystem,
                sig.family,
                sig.description,
                Utc::now().to_rfc3339(),
            ],
        )?;
        let component_id: i64 = tx.query_row(
            "SELECT id FROM components WHERE name = ?1 AND version = ?2",
            params![sig.name, sig.version],
            |row| row.get(0),
        )?;

        for pattern in &sig.patterns {
            tx.execute(
                "INSERT OR IGNORE INTO patterns (component_id, text, confidence, context)
                 VALUES (?1, ?2, ?3, ?4)",
                params![component_id, pattern.text, pattern.confidence, pattern.context],
            )?;
            let pattern_id: i64 = tx.query_row(
                "SELECT id FROM patterns WHERE component_id = ?1 AND text = ?2",
                params![component_id, pattern.text],
                |row| row.get(0),
            )?;
            for gram in distinct_grams(&pattern.text) {
                tx.execute(
                    "INSERT OR IGNORE INTO pattern_ngrams (gram, pattern_id) VALUES (?1, ?2)",
                    params![String::from_utf8_lossy(&gram).into_owned(), pattern_id],
                )?;
            }
        }

        if let Some(digest) = &sig.digest {
            tx.execute(
                "INSERT OR REPLACE INTO lsh_digests (component_id, digest) VALUES (?1, ?2)",
                params![component_id, digest],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES ('last_import', ?1)",
            params![Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Bulk-import signature files. Rejected files are reported, never
    /// fatal; re-importing the same files is idempotent.
    pub fn import_files(&mut self, paths: &[PathBuf]) -> Result<ImportReport, SnifferError> {
        let mut report = ImportReport::default();
        for path in paths {
            let json = match std::fs::read_to_string(path) {
                Ok(j) => j,
                Err(e) => {
                    report.files_rejected += 1;
                    report
                        .warnings
                        .push(format!("{}: unreadable: {}", path.display(), e));
                    continue;
                }
            };
            match crate::sigfile::parse_signature(&json) {
                Ok((sig, warnings)) => {
                    let pattern_count = sig.patterns.len();
                    self.import(&sig)?;
                    report.files_imported += 1;
                    report.components += 1;
                    report.patterns += pattern_count;
                    report
                        .warnings
                        .extend(warnings.into_iter().map(|w| format!("{}: {}", path.display(), w)));
                }
                Err(e) => {
                    report.files_rejected += 1;
                    report.warnings.push(format!("{}: {}", path.display(), e));
                }
            }
        }
        Ok(report)
    }

    /// Drop and re-derive the n-gram index from the pattern table.
    pub fn rebuild_index(&mut self) -> Result<(), SnifferError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM pattern_ngrams", [])?;
        {
            let mut stmt = tx.prepare("SELECT id, text FROM patterns ORDER BY id")?;
            let rows: Vec<(i64, String)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<_, _>>()?;
            let mut insert =
                tx.prepare("INSERT OR IGNORE INTO pattern_ngrams (gram, pattern_id) VALUES (?1, ?2)")?;
            for (id, text) in rows {
                for gram in distinct_grams(&text) {
                    insert.execute(params![String::from_utf8_lossy(&gram).into_owned(), id])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn status(&self) -> Result<StoreStatus, SnifferError> {
        let components: u64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM components", [], |r| r.get(0))?;
        let patterns: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |r| r.get(0))?;
        let digests: u64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM lsh_digests", [], |r| r.get(0))?;
        let last_import: Option<String> = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = 'last_import'", [], |r| {
                r.get(0)
            })
            .ok();
        Ok(StoreStatus {
            components,
            patterns,
            digests,
            last_import,
        })
    }

    /// Load the immutable read snapshot consumed by the matcher.
    pub fn snapshot(&self) -> Result<StoreSnapshot, SnifferError> {
        let mut components = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT id, name, version, license, publisher, ecosystem, family, description
                 FROM components ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(ComponentRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    license: row.get(3)?,
                    publisher: row.get(4)?,
                    ecosystem: row.get(5)?,
                    family: row.get(6)?,
                    description: row.get(7)?,
                })
            })?;
            for row in rows {
                components.push(row?);
            }
        }

        let mut patterns = Vec::new();
        {
            let mut stmt = self.conn.prepare(
                "SELECT text, component_id, confidence FROM patterns ORDER BY text, component_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?;
            for row in rows {
                let (text, component_id, confidence) = row?;
                let gram_count = distinct_grams(&text).len() as u32;
                patterns.push(PatternRec {
                    text,
                    component_id,
                    confidence,
                    gram_count,
                });
            }
        }

        let mut digests = Vec::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT component_id, digest FROM lsh_digests ORDER BY component_id")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            for row in rows {
                digests.push(row?);
            }
        }

        Ok(StoreSnapshot::build(components, patterns, digests))
    }
}

// ============================================================================
// Read-only snapshot
// ============================================================================

pub struct StoreSnapshot {
    components: Vec<ComponentRow>,
    by_id: FxHashMap<i64, usize>,
    patterns: Vec<PatternRec>,
    exact: FxHashMap<String, Vec<usize>>,
    pattern_counts: FxHashMap<i64, u32>,
    digests: Vec<(i64, String)>,
    // Built on first contains lookup; exact-only workloads never pay for it
    ngram: OnceCell<FxHashMap<[u8; GRAM_LEN], Vec<usize>>>,
}

impl StoreSnapshot {
    fn build(
        components: Vec<ComponentRow>,
        patterns: Vec<PatternRec>,
        digests: Vec<(i64, String)>,
    ) -> Self {
        let by_id = components
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id, i))
            .collect();
        let mut exact: FxHashMap<String, Vec<usize>> = FxHashMap::default();
        let mut pattern_counts: FxHashMap<i64, u32> = FxHashMap::default();
        for (idx, rec) in patterns.iter().enumerate() {
            exact.entry(rec.text.clone()).or_default().push(idx);
            *pattern_counts.entry(rec.component_id).or_insert(0) += 1;
        }
        Self {
            components,
            by_id,
            patterns,
            exact,
            pattern_counts,
            digests,
            ngram: OnceCell::new(),
        }
    }

    fn ngram_index(&self) -> &FxHashMap<[u8; GRAM_LEN], Vec<usize>> {
        self.ngram.get_or_init(|| {
            let mut index: FxHashMap<[u8; GRAM_LEN], Vec<usize>> = FxHashMap::default();
            for (idx, rec) in self.patterns.iter().enumerate() {
                for gram in distinct_grams(&rec.text) {
                    index.entry(gram).or_default().push(idx);
                }
            }
            index
        })
    }

    pub fn lookup_exact(&self, feature: &str) -> Vec<ExactHit> {
        let Some(indices) = self.exact.get(feature) else {
            return Vec::new();
        };
        indices
            .iter()
            .map(|&i| {
                let rec = &self.patterns[i];
                ExactHit {
                    component_id: rec.component_id,
                    pattern: rec.text.clone(),
                    confidence: rec.confidence,
                }
            })
            .collect()
    }

    /// Patterns that are strict substrings of `feature`.
    ///
    /// Candidates whose full distinct-gram set occurs in the feature are
    /// verified with a literal `memmem` search; results come back in
    /// (pattern text, component id) order.
    pub fn lookup_contains(&self, feature: &str) -> Vec<ContainsHit> {
        let feature_bytes = feature.as_bytes();
        if feature_bytes.len() < GRAM_LEN {
            return Vec::new();
        }
        let index = self.ngram_index();
        let mut counts: FxHashMap<usize, u32> = FxHashMap::default();
        for gram in distinct_grams(feature) {
            if let Some(indices) = index.get(&gram) {
                for &i in indices {
                    *counts.entry(i).or_insert(0) += 1;
                }
            }
        }
        let mut candidates: Vec<usize> = counts
            .into_iter()
            .filter(|&(i, count)| {
                let rec = &self.patterns[i];
                count == rec.gram_count && rec.text.len() < feature_bytes.len()
            })
            .map(|(i, _)| i)
            .collect();
        candidates.sort_unstable();

        candidates
            .into_iter()
            .filter(|&i| memmem::find(feature_bytes, self.patterns[i].text.as_bytes()).is_some())
            .map(|i| {
                let rec = &self.patterns[i];
                ContainsHit {
                    component_id: rec.component_id,
                    pattern: rec.text.clone(),
                    confidence: rec.confidence,
                }
            })
            .collect()
    }

    pub fn component(&self, id: i64) -> Option<&ComponentRow> {
        self.by_id.get(&id).map(|&i| &self.components[i])
    }

    /// Components in id order.
    pub fn components(&self) -> &[ComponentRow] {
        &self.components
    }

    pub fn pattern_count(&self, component_id: i64) -> u32 {
        self.pattern_counts.get(&component_id).copied().unwrap_or(0)
    }

    /// LSH digests in component-id order.
    pub fn digests(&self) -> &[(i64, String)] {
        &self.digests
    }
}

impl crate::traits::PatternLookup for StoreSnapshot {
    fn lookup_exact(&self, feature: &str) -> Vec<ExactHit> {
        StoreSnapshot::lookup_exact(self, feature)
    }

    fn lookup_contains(&self, feature: &str) -> Vec<ContainsHit> {
        StoreSnapshot::lookup_contains(self, feature)
    }

    fn component(&self, id: i64) -> Option<&ComponentRow> {
        StoreSnapshot::component(self, id)
    }

    fn components(&self) -> &[ComponentRow] {
        StoreSnapshot::components(self)
    }

    fn pattern_count(&self, component_id: i64) -> u32 {
        StoreSnapshot::pattern_count(self, component_id)
    }

    fn digests(&self) -> &[(i64, String)] {
        StoreSnapshot::digests(self)
    }
}

#[cfg(test)]
#[path = "tests/store_tests.rs"]
mod tests;
