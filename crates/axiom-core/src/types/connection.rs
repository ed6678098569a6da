//! Connections: versioned, typed edges between two tokens.

use super::{ConnectionId, Tick, TokenId, Version};
use serde::{Deserialize, Serialize};

/// Schema version stamped on connections created or restructured by this build.
///
/// Bump when the meaning of a `ConnectionKind` changes.
pub const CONNECTION_SCHEMA_VERSION: u16 = 1;

/// Semantic type of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum ConnectionKind {
    #[default]
    AssociatedWith,
    SimilarTo,
    Causes,
    PartOf,
    /// Pushes its endpoints apart instead of pulling them together.
    Opposes,
}

impl ConnectionKind {
    /// Sign applied to the weight when the connection contributes a force.
    #[must_use]
    pub fn polarity(self) -> f32 {
        match self {
            ConnectionKind::Opposes => -1.0,
            ConnectionKind::AssociatedWith
            | ConnectionKind::SimilarTo
            | ConnectionKind::Causes
            | ConnectionKind::PartOf => 1.0,
        }
    }
}

/// Whether feedback and learning may change a connection's weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Mutability {
    #[default]
    Learnable,
    Immutable,
}

/// A typed edge between two tokens.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub id: ConnectionId,
    pub from: TokenId,
    pub to: TokenId,
    pub kind: ConnectionKind,
    pub directed: bool,
    pub weight: f32,
    pub mutability: Mutability,
    pub schema_version: u16,
    pub created_at: Tick,
    pub version: Version,
}

impl Connection {
    /// Whether the connection joins `a` and `b`, in either direction.
    #[must_use]
    pub fn joins(&self, a: TokenId, b: TokenId) -> bool {
        (self.from == a && self.to == b) || (self.from == b && self.to == a)
    }

    /// The endpoint opposite `token`, if `token` is an endpoint.
    #[must_use]
    pub fn other(&self, token: TokenId) -> Option<TokenId> {
        if self.from == token {
            Some(self.to)
        } else if self.to == token {
            Some(self.from)
        } else {
            None
        }
    }

    /// The endpoint reachable when walking the connection from `token`.
    ///
    /// Directed connections can only be walked from `from` to `to`.
    #[must_use]
    pub fn walk_from(&self, token: TokenId) -> Option<TokenId> {
        if self.from == token {
            Some(self.to)
        } else if self.to == token && !self.directed {
            Some(self.from)
        } else {
            None
        }
    }

    /// Signed weight contributed to the force between the endpoints.
    #[must_use]
    pub fn bond(&self) -> f32 {
        self.weight * self.kind.polarity()
    }

    #[must_use]
    pub fn is_learnable(&self) -> bool {
        self.mutability == Mutability::Learnable
    }
}

/// Everything needed to create a connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSpec {
    pub from: TokenId,
    pub to: TokenId,
    pub weight: f32,
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default)]
    pub directed: bool,
    #[serde(default)]
    pub mutability: Mutability,
}

impl ConnectionSpec {
    /// An undirected, learnable `AssociatedWith` connection.
    #[must_use]
    pub fn new(from: TokenId, to: TokenId, weight: f32) -> Self {
        Self {
            from,
            to,
            weight,
            kind: ConnectionKind::AssociatedWith,
            directed: false,
            mutability: Mutability::Learnable,
        }
    }

    #[must_use]
    pub fn kind(mut self, kind: ConnectionKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn directed(mut self) -> Self {
        self.directed = true;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.mutability = Mutability::Immutable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(directed: bool) -> Connection {
        Connection {
            id: ConnectionId(0),
            from: TokenId(1),
            to: TokenId(2),
            kind: ConnectionKind::Opposes,
            directed,
            weight: 2.0,
            mutability: Mutability::Learnable,
            schema_version: CONNECTION_SCHEMA_VERSION,
            created_at: Tick::ZERO,
            version: Version::INITIAL,
        }
    }

    #[test]
    fn directed_edges_walk_one_way() {
        let c = edge(true);
        assert_eq!(c.walk_from(TokenId(1)), Some(TokenId(2)));
        assert_eq!(c.walk_from(TokenId(2)), None);
        assert_eq!(c.other(TokenId(2)), Some(TokenId(1)));
    }

    #[test]
    fn undirected_edges_walk_both_ways() {
        let c = edge(false);
        assert_eq!(c.walk_from(TokenId(2)), Some(TokenId(1)));
        assert!(c.joins(TokenId(2), TokenId(1)));
    }

    #[test]
    fn opposing_bond_is_negative() {
        assert!((edge(false).bond() + 2.0).abs() < f32::EPSILON);
    }
}
