//! Trait abstractions for dependency inversion
//!
//! The matcher consumes pattern lookups through this seam, so tests can
//! substitute a hand-built snapshot for the SQLite-backed one.

use crate::store::{ComponentRow, ContainsHit, ExactHit};

/// Read operations the matcher needs from a signature store snapshot.
pub trait PatternLookup: Send + Sync {
    /// Exact-equality pattern hits for a feature.
    fn lookup_exact(&self, feature: &str) -> Vec<ExactHit>;

    /// Patterns that are strict substrings of the feature.
    fn lookup_contains(&self, feature: &str) -> Vec<ContainsHit>;

    /// Component metadata by id.
    fn component(&self, id: i64) -> Option<&ComponentRow>;

    /// All components, ordered by id.
    fn components(&self) -> &[ComponentRow];

    /// Number of stored patterns for a component, for score normalization.
    fn pattern_count(&self, component_id: i64) -> u32;

    /// Per-component LSH digests, ordered by component id.
    fn digests(&self) -> &[(i64, String)];
}
