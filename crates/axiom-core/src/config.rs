//! # Engine Configuration
//!
//! Startup configuration for an [`Engine`](crate::Engine), loaded from TOML.
//!
//! Every section has defaults, so an empty document is a valid configuration
//! with a single `default` domain. Invalid values are rejected once, at
//! startup, by [`EngineConfig::validate`]; the engine never re-checks them.
//!
//! ```toml
//! tick_interval_ms = 50
//! embedding_dim = 16
//!
//! [gateway]
//! similarity_threshold = 0.85
//! unknown_input = "defer"
//!
//! [[domains]]
//! id = 1
//! name = "language"
//! [domains.constants]
//! attraction = 0.05
//! ```

use crate::domain::DomainConstants;
use crate::primitives::{
    DEFAULT_AUDIT_CAPACITY, DEFAULT_CACHE_CAPACITY, DEFAULT_EMBEDDING_DIM, DEFAULT_LINK_WEIGHT,
    DEFAULT_MEMORY_CAPACITY, DEFAULT_SIMILARITY_THRESHOLD, DEFAULT_STATE_DIM,
    DEFAULT_TICK_INTERVAL_MS, MAX_CONNECTION_WEIGHT, MAX_PATH_LENGTH,
};
use crate::types::{AxiomError, DomainId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

// =============================================================================
// SECTIONS
// =============================================================================

/// What happens to connections when a referenced token is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse the deletion while connections reference the token.
    #[default]
    Reject,
    /// Remove the referencing connections first, in id order.
    Cascade,
}

/// Graph Store options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Allow more than one connection between the same pair of tokens.
    pub allow_multi_edge: bool,
    pub delete_policy: DeletePolicy,
    /// Maximum number of edges in a shortest path.
    pub max_path_length: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            allow_multi_edge: false,
            delete_policy: DeletePolicy::Reject,
            max_path_length: MAX_PATH_LENGTH,
        }
    }
}

/// Associative memory options (one memory per domain).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    pub capacity: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_MEMORY_CAPACITY,
        }
    }
}

/// How the Gateway treats inputs it cannot resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnknownInputStrategy {
    /// Enqueue to the curiosity queue (if any) and report `UnresolvedInput`.
    #[default]
    Defer,
    /// Create a token for the input in the default domain.
    CreateToken,
}

/// Gateway options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Minimum cosine similarity for a nearest-neighbour resolution.
    pub similarity_threshold: f32,
    pub unknown_input: UnknownInputStrategy,
    /// Domain receiving created tokens and unrouted activations.
    pub default_domain: DomainId,
    /// Capacity of the word/vector resolution cache.
    pub cache_capacity: usize,
    /// Activation impulse applied when an input does not specify one.
    pub default_strength: f32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            unknown_input: UnknownInputStrategy::Defer,
            default_domain: DomainId(1),
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            default_strength: 1.0,
        }
    }
}

/// Action Controller options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArbiterConfig {
    /// Policy version stamped on candidates and decisions.
    pub policy_version: u32,
    /// Number of rejected candidates retained for audit.
    pub audit_capacity: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            policy_version: 1,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Feedback and Hybrid Learning options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Reject a keyed `Create` proposal whose key was already applied.
    pub reject_duplicate_keys: bool,
    /// Turn winning `Link` decisions into `Create` connection proposals.
    pub auto_link: bool,
    /// Weight of connections created by `Link` decisions and `Associate` feedback.
    pub link_weight: f32,
    /// Weight change applied by `Reinforce`/`Weaken` when no amount is given.
    pub feedback_step: f32,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            reject_duplicate_keys: true,
            auto_link: false,
            link_weight: DEFAULT_LINK_WEIGHT,
            feedback_step: 0.25,
        }
    }
}

/// A domain declared at configuration time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub id: DomainId,
    pub name: String,
    #[serde(default)]
    pub constants: DomainConstants,
}

impl DomainConfig {
    #[must_use]
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id: DomainId(id),
            name: name.into(),
            constants: DomainConstants::default(),
        }
    }

    #[must_use]
    pub fn with_constants(mut self, constants: DomainConstants) -> Self {
        self.constants = constants;
        self
    }
}

// =============================================================================
// ENGINE CONFIG
// =============================================================================

/// Complete startup configuration of an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scheduler period for real-time runs. The engine itself is tick-driven.
    pub tick_interval_ms: u64,
    /// Dimensionality of token positions and velocities.
    pub state_dim: usize,
    /// Dimensionality of token embeddings.
    pub embedding_dim: usize,
    pub graph: GraphConfig,
    pub memory: MemoryConfig,
    pub gateway: GatewayConfig,
    pub arbiter: ArbiterConfig,
    pub learning: LearningConfig,
    pub domains: Vec<DomainConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            state_dim: DEFAULT_STATE_DIM,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            graph: GraphConfig::default(),
            memory: MemoryConfig::default(),
            gateway: GatewayConfig::default(),
            arbiter: ArbiterConfig::default(),
            learning: LearningConfig::default(),
            domains: vec![DomainConfig::new(1, "default")],
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document. The result is validated.
    pub fn from_toml_str(source: &str) -> Result<Self, AxiomError> {
        let config: EngineConfig = toml::from_str(source)
            .map_err(|e| AxiomError::InvalidConfig(format!("TOML parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file. The result is validated.
    pub fn load(path: &Path) -> Result<Self, AxiomError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| AxiomError::IoError(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Look up a declared domain.
    #[must_use]
    pub fn domain(&self, id: DomainId) -> Option<&DomainConfig> {
        self.domains.iter().find(|d| d.id == id)
    }

    /// Validate configuration parameters.
    pub fn validate(&self) -> Result<(), AxiomError> {
        if self.state_dim == 0 {
            return Err(AxiomError::InvalidConfig(
                "state_dim must be > 0".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(AxiomError::InvalidConfig(
                "embedding_dim must be > 0".to_string(),
            ));
        }
        if self.tick_interval_ms == 0 {
            return Err(AxiomError::InvalidConfig(
                "tick_interval_ms must be > 0".to_string(),
            ));
        }
        if self.graph.max_path_length == 0 {
            return Err(AxiomError::InvalidConfig(
                "graph.max_path_length must be > 0".to_string(),
            ));
        }
        if self.memory.capacity == 0 {
            return Err(AxiomError::InvalidConfig(
                "memory.capacity must be > 0".to_string(),
            ));
        }
        if self.gateway.cache_capacity == 0 {
            return Err(AxiomError::InvalidConfig(
                "gateway.cache_capacity must be > 0".to_string(),
            ));
        }
        let threshold = self.gateway.similarity_threshold;
        if !threshold.is_finite() || !(-1.0..=1.0).contains(&threshold) {
            return Err(AxiomError::InvalidConfig(format!(
                "gateway.similarity_threshold must be in [-1, 1], got {threshold}"
            )));
        }
        let strength = self.gateway.default_strength;
        if !strength.is_finite() || strength < 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "gateway.default_strength must be finite and >= 0, got {strength}"
            )));
        }
        if self.arbiter.audit_capacity == 0 {
            return Err(AxiomError::InvalidConfig(
                "arbiter.audit_capacity must be > 0".to_string(),
            ));
        }
        let link = self.learning.link_weight;
        if !link.is_finite() || !(0.0..=MAX_CONNECTION_WEIGHT).contains(&link) {
            return Err(AxiomError::InvalidConfig(format!(
                "learning.link_weight must be in [0, {MAX_CONNECTION_WEIGHT}], got {link}"
            )));
        }
        let step = self.learning.feedback_step;
        if !step.is_finite() || step <= 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "learning.feedback_step must be > 0, got {step}"
            )));
        }

        if self.domains.is_empty() {
            return Err(AxiomError::InvalidConfig(
                "at least one [[domains]] entry is required".to_string(),
            ));
        }
        let mut seen = BTreeSet::new();
        for domain in &self.domains {
            if !seen.insert(domain.id) {
                return Err(AxiomError::InvalidConfig(format!(
                    "duplicate domain id {}",
                    domain.id.0
                )));
            }
            if domain.name.trim().is_empty() {
                return Err(AxiomError::InvalidConfig(format!(
                    "domain {} has an empty name",
                    domain.id.0
                )));
            }
            domain.constants.validate().map_err(|e| match e {
                AxiomError::InvalidConfig(msg) => {
                    AxiomError::InvalidConfig(format!("domain {}: {msg}", domain.id.0))
                }
                other => other,
            })?;
        }
        if !seen.contains(&self.gateway.default_domain) {
            return Err(AxiomError::InvalidConfig(format!(
                "gateway.default_domain {} is not a declared domain",
                self.gateway.default_domain.0
            )));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
