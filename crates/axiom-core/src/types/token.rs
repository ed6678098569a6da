//! Tokens: graph nodes with an embedding and a mutable physical state.

use super::{DomainId, Tick, TokenId, Version};
use crate::primitives::{all_finite, euclidean_distance};
use serde::{Deserialize, Serialize};

/// Mutable physical state of a token inside its domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhysicalState {
    pub position: Vec<f32>,
    pub velocity: Vec<f32>,
    pub activation: f32,
}

impl PhysicalState {
    /// A resting state at `position` with zero velocity.
    #[must_use]
    pub fn at(position: Vec<f32>, activation: f32) -> Self {
        let velocity = vec![0.0; position.len()];
        Self {
            position,
            velocity,
            activation,
        }
    }

    /// Dimensionality of the position space.
    #[must_use]
    pub fn dim(&self) -> usize {
        self.position.len()
    }

    /// Euclidean distance between two positions.
    #[must_use]
    pub fn distance_to(&self, other: &PhysicalState) -> f32 {
        euclidean_distance(&self.position, &other.position)
    }

    /// Whether every component is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.activation.is_finite() && all_finite(&self.position) && all_finite(&self.velocity)
    }

    /// Bit-exact equality, used to skip no-op writes.
    #[must_use]
    pub fn same_bits(&self, other: &PhysicalState) -> bool {
        self.activation.to_bits() == other.activation.to_bits()
            && crate::primitives::bit_identical(&self.position, &other.position)
            && crate::primitives::bit_identical(&self.velocity, &other.velocity)
    }
}

/// A graph node owned by the Graph Store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    /// Optional label used for exact word matching.
    pub label: Option<String>,
    pub embedding: Vec<f32>,
    pub state: PhysicalState,
    /// `None` once the token's domain was removed without reassignment.
    pub domain: Option<DomainId>,
    pub created_at: Tick,
    pub version: Version,
}

impl Token {
    /// Whether the token currently belongs to a domain.
    #[must_use]
    pub fn is_orphaned(&self) -> bool {
        self.domain.is_none()
    }
}

/// Everything needed to create a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSpec {
    pub domain: DomainId,
    pub embedding: Vec<f32>,
    #[serde(default)]
    pub label: Option<String>,
    /// Initial position. Derived from the embedding when absent.
    #[serde(default)]
    pub position: Option<Vec<f32>>,
    #[serde(default)]
    pub activation: f32,
}

impl TokenSpec {
    #[must_use]
    pub fn new(domain: DomainId, embedding: Vec<f32>) -> Self {
        Self {
            domain,
            embedding,
            label: None,
            position: None,
            activation: 0.0,
        }
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    #[must_use]
    pub fn with_position(mut self, position: Vec<f32>) -> Self {
        self.position = Some(position);
        self
    }

    #[must_use]
    pub fn with_activation(mut self, activation: f32) -> Self {
        self.activation = activation;
        self
    }

    /// The initial position in a `dim`-dimensional state space.
    ///
    /// Without an explicit position the leading embedding components are used,
    /// so semantically close tokens start close together.
    #[must_use]
    pub fn initial_position(&self, dim: usize) -> Vec<f32> {
        let source = self.position.as_deref().unwrap_or(&self.embedding);
        (0..dim)
            .map(|i| source.get(i).copied().unwrap_or(0.0))
            .collect()
    }
}
