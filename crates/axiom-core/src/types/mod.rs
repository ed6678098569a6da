//! # Core Type Definitions
//!
//! This module contains the shared vocabulary of the Axiom engine:
//! - Identifiers (`TokenId`, `ConnectionId`, `DomainId`, `SignalId`, ...)
//! - Logical time and optimistic-concurrency counters (`Tick`, `Version`)
//! - Graph entities (`Token`, `Connection`) and their creation specs
//! - Error types (`AxiomError`)
//!
//! ## Determinism Guarantees
//!
//! All identifiers:
//! - Implement `Ord` for deterministic ordering in `BTreeMap`/`BTreeSet`
//! - Are plain integers handed out by monotonic counters, never random
//! - Use saturating arithmetic so counters cannot wrap

mod connection;
mod token;

pub use connection::{
    CONNECTION_SCHEMA_VERSION, Connection, ConnectionKind, ConnectionSpec, Mutability,
};
pub use token::{PhysicalState, Token, TokenSpec};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Unique identifier for a token (graph node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TokenId(pub u64);

/// Unique identifier for a connection (graph edge).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

/// Identifier of a domain partition. Assigned by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DomainId(pub u32);

/// Identifier of a signal on the bus. Doubles as the global emission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SignalId(pub u64);

/// Identifier of a signal-bus subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubscriberId(pub u64);

/// Identifier of an action candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CandidateId(pub u64);

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "d{}", self.0)
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

// =============================================================================
// LOGICAL TIME & VERSIONS
// =============================================================================

/// Discrete logical time. The engine never reads the wall clock inside a tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct Tick(pub u64);

impl Tick {
    /// The tick before any evolution has happened.
    pub const ZERO: Tick = Tick(0);

    /// The following tick, saturating at `u64::MAX`.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Get the raw tick value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Tick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Optimistic-concurrency counter carried by every mutable entity.
///
/// Every successful mutation bumps the version by one. Callers that
/// read-then-write pass the version they read; a stale version yields
/// `AxiomError::VersionConflict`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// Version of a freshly created entity.
    pub const INITIAL: Version = Version(1);

    /// Increment the version using saturating arithmetic.
    #[must_use]
    pub const fn bump(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// =============================================================================
// ENTITY REFERENCES
// =============================================================================

/// A reference to any addressable entity, used by errors, journal events and
/// proposal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Token(TokenId),
    Connection(ConnectionId),
    Domain(DomainId),
    Signal(SignalId),
    Subscriber(SubscriberId),
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Token(id) => write!(f, "token {id}"),
            EntityRef::Connection(id) => write!(f, "connection {id}"),
            EntityRef::Domain(id) => write!(f, "domain {id}"),
            EntityRef::Signal(id) => write!(f, "signal {id}"),
            EntityRef::Subscriber(id) => write!(f, "subscriber {id}"),
        }
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Axiom engine.
///
/// - No silent failures
/// - Use `Result<T, AxiomError>` for fallible operations
/// - The engine never panics; every error is recoverable by the caller
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AxiomError {
    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(EntityRef),

    /// An optimistic write carried a stale version. Retry with fresh state.
    #[error("Version conflict on {entity}: expected {expected}, found {actual}")]
    VersionConflict {
        entity: EntityRef,
        expected: Version,
        actual: Version,
    },

    /// An edge already exists between the pair and multi-edges are disabled.
    #[error("Duplicate edge between {from} and {to}")]
    DuplicateEdge { from: TokenId, to: TokenId },

    /// The token is still referenced by live connections and the delete
    /// policy does not cascade.
    #[error("{token} is still referenced by {connections} connection(s)")]
    ReferencedEntity { token: TokenId, connections: usize },

    /// The connection is immutable and its weight cannot change.
    #[error("Connection {0} is immutable")]
    ImmutableConnection(ConnectionId),

    /// The Gateway could not resolve an input. Not a crash: the input may have
    /// been queued for curiosity processing and can be retried later.
    #[error("Unresolved input '{input}' (queued: {queued})")]
    UnresolvedInput { input: String, queued: bool },

    /// A signal kind tag that is neither built in nor registered.
    #[error("Unknown signal kind: {0}")]
    UnknownSignalKind(String),

    /// A structural proposal would violate a graph or domain invariant.
    #[error("Proposal application failed: {0}")]
    ProposalApplicationFailed(String),

    /// Startup configuration is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Input data is malformed (dimension mismatch, non-finite values, ...).
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl AxiomError {
    /// Whether a caller should retry the operation with fresh state.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, AxiomError::VersionConflict { .. })
    }

    /// Whether the error is a deferred resolution rather than a failure.
    #[must_use]
    pub fn is_deferred(&self) -> bool {
        matches!(self, AxiomError::UnresolvedInput { .. })
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn version_saturating_bump() {
        assert_eq!(Version(u64::MAX).bump(), Version(u64::MAX));
        assert_eq!(Version::INITIAL.bump(), Version(2));
    }

    #[test]
    fn tick_saturating_next() {
        assert_eq!(Tick(u64::MAX).next(), Tick(u64::MAX));
        assert_eq!(Tick::ZERO.next().value(), 1);
    }

    #[test]
    fn ids_order_deterministically() {
        let mut set = BTreeSet::new();
        set.insert(TokenId(3));
        set.insert(TokenId(1));
        set.insert(TokenId(2));
        let ordered: Vec<_> = set.into_iter().collect();
        assert_eq!(ordered, vec![TokenId(1), TokenId(2), TokenId(3)]);
    }

    #[test]
    fn error_classification() {
        let conflict = AxiomError::VersionConflict {
            entity: EntityRef::Token(TokenId(1)),
            expected: Version(1),
            actual: Version(2),
        };
        assert!(conflict.is_transient());
        assert!(!conflict.is_deferred());

        let unresolved = AxiomError::UnresolvedInput {
            input: "dog".to_string(),
            queued: true,
        };
        assert!(unresolved.is_deferred());
    }

    #[test]
    fn error_messages_name_the_entity() {
        let err = AxiomError::NotFound(EntityRef::Connection(ConnectionId(9)));
        assert_eq!(err.to_string(), "Not found: connection c9");
    }
}
