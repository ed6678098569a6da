//! Word embedding for the Gateway.

use crate::types::AxiomError;

/// Turns a word into a fixed-size vector.
///
/// Implementations must be deterministic: the same word always maps to the
/// same bits.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;

    fn embed(&self, word: &str) -> Result<Vec<f32>, AxiomError>;
}

/// Hashed character-trigram embedder.
///
/// The word is lowercased and padded with boundary markers; every trigram is
/// hashed with BLAKE3 into a bucket and a sign, and the accumulated vector is
/// L2-normalized. Words sharing trigrams land close together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self, AxiomError> {
        if dim == 0 {
            return Err(AxiomError::InvalidConfig(
                "embedder dimension must be > 0".to_string(),
            ));
        }
        Ok(Self { dim })
    }
}

impl Embedder for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, word: &str) -> Result<Vec<f32>, AxiomError> {
        let normalized = word.trim().to_lowercase();
        if normalized.is_empty() {
            return Err(AxiomError::InvalidInput("cannot embed an empty word".to_string()));
        }

        let chars: Vec<char> = std::iter::once('^')
            .chain(normalized.chars())
            .chain(std::iter::once('$'))
            .collect();

        let mut accumulated = vec![0.0_f64; self.dim];
        for window in chars.windows(3) {
            let trigram: String = window.iter().collect();
            let digest = blake3::hash(trigram.as_bytes());
            let bytes = digest.as_bytes();
            let mut prefix = [0u8; 8];
            prefix.copy_from_slice(&bytes[..8]);
            let bucket = (u64::from_le_bytes(prefix) % self.dim as u64) as usize;
            let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
            if let Some(slot) = accumulated.get_mut(bucket) {
                *slot += sign;
            }
        }

        let norm = accumulated.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < f64::EPSILON {
            // Every trigram cancelled out; fall back to a fixed unit vector.
            let mut unit = vec![0.0; self.dim];
            if let Some(first) = unit.first_mut() {
                *first = 1.0;
            }
            return Ok(unit);
        }
        Ok(accumulated.iter().map(|x| (x / norm) as f32).collect())
    }
}
