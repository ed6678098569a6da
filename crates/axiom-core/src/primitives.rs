//! # Innate Primitives
//!
//! Hardcoded runtime constants and vector primitives for the Axiom CORE.
//!
//! Configuration tunes the engine; these values bound it. They are compiled
//! into the binary and are immutable at runtime.
//!
//! ## Primitives
//!
//! 1. **Similarity Primitive**: cosine similarity between embeddings.
//! 2. **Distance Primitive**: Euclidean distance between positions.
//! 3. **Bounds**: clamps that keep forces, weights and activations finite.

/// Magic bytes for the Axiom canonical snapshot header.
pub const MAGIC_BYTES: &[u8; 4] = b"AXSN";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 1;

/// Maximum number of edges in a single shortest path.
///
/// Limits the search depth so that path queries stay computationally bounded.
pub const MAX_PATH_LENGTH: usize = 1000;

/// Maximum neighbourhood radius (in hops) accepted by `neighbors`.
pub const MAX_NEIGHBOR_RADIUS: usize = 64;

// =============================================================================
// DEFAULTS
// =============================================================================

/// Default cosine similarity a nearest neighbour must reach to resolve an input.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.85;

/// Default associative memory capacity per domain.
pub const DEFAULT_MEMORY_CAPACITY: usize = 1024;

/// Default capacity of the Gateway resolution cache.
pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Default embedding dimensionality.
pub const DEFAULT_EMBEDDING_DIM: usize = 16;

/// Default dimensionality of token positions and velocities.
pub const DEFAULT_STATE_DIM: usize = 3;

/// Default scheduler period for real-time runs.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;

/// Default number of rejected candidates retained for audit.
pub const DEFAULT_AUDIT_CAPACITY: usize = 256;

/// Default weight of connections created from `Link` decisions and
/// `Associate` feedback.
pub const DEFAULT_LINK_WEIGHT: f32 = 1.0;

// =============================================================================
// PHYSICAL BOUNDS
// =============================================================================

/// Positions closer than this are treated as coincident.
pub const MIN_SEPARATION: f32 = 1.0e-3;

/// Upper bound on the magnitude of any single pairwise force.
pub const MAX_PAIR_FORCE: f32 = 1.0e3;

/// Activation is clamped to `[0, MAX_ACTIVATION]`.
pub const MAX_ACTIVATION: f32 = 10.0;

/// Connection weights are clamped to `[0, MAX_CONNECTION_WEIGHT]`.
pub const MAX_CONNECTION_WEIGHT: f32 = 100.0;

/// Priority multiplier gained per previous recognition of an activation.
pub const FAMILIARITY_GAIN: f32 = 0.1;

/// Recognitions beyond this count add no further priority.
pub const FAMILIARITY_CAP: u32 = 10;

// =============================================================================
// VECTOR PRIMITIVES
// =============================================================================

/// Cosine similarity of two vectors.
///
/// Returns `0.0` when either vector has zero norm or the lengths differ.
/// Accumulates in `f64` so the result does not depend on summation drift.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0_f64;
    let mut norm_a = 0.0_f64;
    let mut norm_b = 0.0_f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0) as f32
}

/// Euclidean distance between two points. Missing components count as zero.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    let len = a.len().max(b.len());
    let mut sum = 0.0_f64;
    for i in 0..len {
        let x = f64::from(a.get(i).copied().unwrap_or(0.0));
        let y = f64::from(b.get(i).copied().unwrap_or(0.0));
        sum += (y - x) * (y - x);
    }
    sum.sqrt() as f32
}

/// Whether every component is finite.
pub fn all_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

/// Bit-exact vector equality (distinguishes `0.0` from `-0.0`).
pub fn bit_identical(a: &[f32], b: &[f32]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn magic_bytes_correct() {
        assert_eq!(MAGIC_BYTES, b"AXSN");
    }

    #[test]
    fn cosine_of_parallel_vectors_is_one() {
        let sim = cosine_similarity(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn distance_pads_missing_components() {
        assert!((euclidean_distance(&[3.0], &[0.0, 4.0]) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn bit_identity_distinguishes_signed_zero() {
        assert!(bit_identical(&[1.0, 0.0], &[1.0, 0.0]));
        assert!(!bit_identical(&[0.0], &[-0.0]));
    }
}
