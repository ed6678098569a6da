//! # Graph Store
//!
//! The deterministic token/connection store for Axiom CORE.
//!
//! This module implements the `GraphStore` trait.
//! All data structures use `BTreeMap` for deterministic ordering.
//! Entities live in id-keyed arenas; everything outside the store refers to
//! them by id only.
//!
//! Every successful mutation bumps the entity's version and appends a
//! [`MutationEvent`](crate::journal::MutationEvent) to the store's journal.
//! The engine drains the journal after each operation and forwards the events
//! to observers once the lock is released.

use crate::config::{DeletePolicy, EngineConfig};
use crate::journal::{MutationEvent, MutationJournal, MutationOp, MutationPayload};
use crate::primitives::{
    MAX_CONNECTION_WEIGHT, MAX_NEIGHBOR_RADIUS, all_finite, bit_identical, cosine_similarity,
};
use crate::types::{
    AxiomError, CONNECTION_SCHEMA_VERSION, Connection, ConnectionId, ConnectionKind,
    ConnectionSpec, DomainId, EntityRef, Mutability, PhysicalState, Tick, Token, TokenId,
    TokenSpec, Version,
};
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// The Graph Store as shared between the engine, the Gateway and domains.
///
/// Hold the lock only for the duration of a single store call.
pub type SharedGraph = Arc<RwLock<Graph>>;

// =============================================================================
// UPDATES
// =============================================================================

/// Partial update of a token. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUpdate {
    pub label: Option<Option<String>>,
    pub embedding: Option<Vec<f32>>,
    pub state: Option<PhysicalState>,
}

impl TokenUpdate {
    #[must_use]
    pub fn state(state: PhysicalState) -> Self {
        Self {
            state: Some(state),
            ..Self::default()
        }
    }
}

/// Partial update of a connection. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub weight: Option<f32>,
    pub kind: Option<ConnectionKind>,
    pub mutability: Option<Mutability>,
}

impl ConnectionUpdate {
    #[must_use]
    pub fn weight(weight: f32) -> Self {
        Self {
            weight: Some(weight),
            ..Self::default()
        }
    }
}

/// A deleted token together with the connections removed by a cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct RemovedToken {
    pub token: Token,
    pub connections: Vec<Connection>,
}

// =============================================================================
// GRAPHSTORE TRAIT
// =============================================================================

/// The GraphStore trait defines the core graph operations.
///
/// All queries must be computationally bounded.
///
/// Lookups return owned values so that persistent backends can implement the
/// trait without handing out references into their storage.
pub trait GraphStore {
    /// Create a token. The token starts at version 1.
    fn create_token(&mut self, spec: TokenSpec) -> Result<TokenId, AxiomError>;

    /// Create an undirected `AssociatedWith` connection.
    fn create_connection(
        &mut self,
        from: TokenId,
        to: TokenId,
        weight: f32,
    ) -> Result<ConnectionId, AxiomError> {
        self.create_connection_with(ConnectionSpec::new(from, to, weight))
    }

    /// Create a connection from a full spec.
    ///
    /// Fails with `DuplicateEdge` if the pair is already connected and
    /// multi-edges are disabled.
    fn create_connection_with(&mut self, spec: ConnectionSpec) -> Result<ConnectionId, AxiomError>;

    fn token(&self, id: TokenId) -> Result<Token, AxiomError>;

    fn connection(&self, id: ConnectionId) -> Result<Connection, AxiomError>;

    /// Apply a partial update. Returns the new version.
    fn update_token(
        &mut self,
        id: TokenId,
        expected: Option<Version>,
        update: TokenUpdate,
    ) -> Result<Version, AxiomError>;

    /// Apply a partial update. Returns the new version.
    fn update_connection(
        &mut self,
        id: ConnectionId,
        expected: Option<Version>,
        update: ConnectionUpdate,
    ) -> Result<Version, AxiomError>;

    /// Delete a token, honouring the configured delete policy.
    fn delete_token(
        &mut self,
        id: TokenId,
        expected: Option<Version>,
    ) -> Result<RemovedToken, AxiomError>;

    fn delete_connection(
        &mut self,
        id: ConnectionId,
        expected: Option<Version>,
    ) -> Result<Connection, AxiomError>;

    /// Move a token to another domain, or orphan it with `None`.
    fn move_token(
        &mut self,
        id: TokenId,
        domain: Option<DomainId>,
        expected: Option<Version>,
    ) -> Result<Version, AxiomError>;

    /// Cheapest path as the full ordered edge list.
    ///
    /// Cost is the sum of edge weights; ties resolve towards lower token ids.
    /// Returns `Ok(None)` when `to` is unreachable and `Some(vec![])` when
    /// `from == to`.
    fn shortest_path(
        &self,
        from: TokenId,
        to: TokenId,
    ) -> Result<Option<Vec<ConnectionId>>, AxiomError>;

    /// Tokens within `radius` hops, ordered by hop count then id.
    fn neighbors(&self, token: TokenId, radius: usize) -> Result<Vec<(TokenId, usize)>, AxiomError>;

    /// Most similar token with cosine similarity `>= threshold`.
    fn nearest(&self, query: &[f32], threshold: f32) -> Result<Option<(TokenId, f32)>, AxiomError>;

    fn token_count(&self) -> usize;

    fn connection_count(&self) -> usize;
}

// =============================================================================
// GRAPH IMPLEMENTATION
// =============================================================================

/// Structural options of a graph, fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphOptions {
    pub state_dim: usize,
    pub embedding_dim: usize,
    pub allow_multi_edge: bool,
    pub delete_policy: DeletePolicy,
    pub max_path_length: usize,
}

impl GraphOptions {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            state_dim: config.state_dim,
            embedding_dim: config.embedding_dim,
            allow_multi_edge: config.graph.allow_multi_edge,
            delete_policy: config.graph.delete_policy,
            max_path_length: config.graph.max_path_length,
        }
    }
}

impl Default for GraphOptions {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// The in-memory Graph Store.
///
/// Uses `BTreeMap` exclusively for deterministic ordering.
#[derive(Debug)]
pub struct Graph {
    options: GraphOptions,
    tokens: BTreeMap<TokenId, Token>,
    connections: BTreeMap<ConnectionId, Connection>,
    /// Token -> connections touching it (either endpoint).
    adjacency: BTreeMap<TokenId, BTreeSet<ConnectionId>>,
    /// Unordered endpoint pair -> connections between them.
    pairs: BTreeMap<(TokenId, TokenId), BTreeSet<ConnectionId>>,
    labels: BTreeMap<String, BTreeSet<TokenId>>,
    members: BTreeMap<DomainId, BTreeSet<TokenId>>,
    next_token_id: u64,
    next_connection_id: u64,
    tick: Tick,
    journal: MutationJournal,
}

fn pair_key(a: TokenId, b: TokenId) -> (TokenId, TokenId) {
    if a <= b { (a, b) } else { (b, a) }
}

fn check_version(
    entity: EntityRef,
    expected: Option<Version>,
    actual: Version,
) -> Result<(), AxiomError> {
    match expected {
        Some(expected) if expected != actual => Err(AxiomError::VersionConflict {
            entity,
            expected,
            actual,
        }),
        _ => Ok(()),
    }
}

fn check_weight(weight: f32) -> Result<(), AxiomError> {
    if !weight.is_finite() || !(0.0..=MAX_CONNECTION_WEIGHT).contains(&weight) {
        return Err(AxiomError::InvalidInput(format!(
            "connection weight must be in [0, {MAX_CONNECTION_WEIGHT}], got {weight}"
        )));
    }
    Ok(())
}

impl Graph {
    /// Create an empty graph.
    #[must_use]
    pub fn new(options: GraphOptions) -> Self {
        Self {
            options,
            tokens: BTreeMap::new(),
            connections: BTreeMap::new(),
            adjacency: BTreeMap::new(),
            pairs: BTreeMap::new(),
            labels: BTreeMap::new(),
            members: BTreeMap::new(),
            next_token_id: 0,
            next_connection_id: 0,
            tick: Tick::ZERO,
            journal: MutationJournal::new(),
        }
    }

    /// Wrap the graph for sharing.
    #[must_use]
    pub fn into_shared(self) -> SharedGraph {
        Arc::new(RwLock::new(self))
    }

    /// Rebuild a graph from previously exported entities, preserving ids and
    /// versions. No journal events are recorded.
    pub fn restore(
        options: GraphOptions,
        tokens: Vec<Token>,
        connections: Vec<Connection>,
        next_token_id: u64,
        next_connection_id: u64,
    ) -> Result<Self, AxiomError> {
        let mut graph = Self::new(options);
        for token in tokens {
            if token.id.0 >= next_token_id {
                return Err(AxiomError::SerializationError(format!(
                    "token id {} is not below the id counter {next_token_id}",
                    token.id
                )));
            }
            graph.index_token(&token);
            graph.tokens.insert(token.id, token);
        }
        for connection in connections {
            if connection.id.0 >= next_connection_id {
                return Err(AxiomError::SerializationError(format!(
                    "connection id {} is not below the id counter {next_connection_id}",
                    connection.id
                )));
            }
            if !graph.tokens.contains_key(&connection.from)
                || !graph.tokens.contains_key(&connection.to)
            {
                return Err(AxiomError::SerializationError(format!(
                    "connection {} references a missing token",
                    connection.id
                )));
            }
            graph.index_connection(&connection);
            graph.connections.insert(connection.id, connection);
        }
        graph.next_token_id = next_token_id;
        graph.next_connection_id = next_connection_id;
        Ok(graph)
    }

    #[must_use]
    pub fn options(&self) -> GraphOptions {
        self.options
    }

    /// Set the logical time stamped on subsequent mutations.
    pub fn set_tick(&mut self, tick: Tick) {
        self.tick = tick;
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    /// Take every pending mutation event, oldest first.
    pub fn drain_events(&mut self) -> Vec<MutationEvent> {
        self.journal.drain()
    }

    /// The journal, for events about entities the store does not own
    /// (domains), so observers see one ordered stream.
    pub fn journal_mut(&mut self) -> &mut MutationJournal {
        &mut self.journal
    }

    /// The next ids the store would assign, as `(token, connection)`.
    #[must_use]
    pub fn next_ids(&self) -> (u64, u64) {
        (self.next_token_id, self.next_connection_id)
    }

    // -------------------------------------------------------------------------
    // Internal, non-Result accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn get_token(&self, id: TokenId) -> Option<&Token> {
        self.tokens.get(&id)
    }

    #[must_use]
    pub fn get_connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    #[must_use]
    pub fn contains_token(&self, id: TokenId) -> bool {
        self.tokens.contains_key(&id)
    }

    /// All tokens in id order.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    /// All connections in id order.
    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Connections touching `token`, in id order.
    pub fn connections_of(&self, token: TokenId) -> impl Iterator<Item = &Connection> + '_ {
        self.adjacency
            .get(&token)
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
    }

    /// Connections between `a` and `b` in either direction, in id order.
    pub fn connections_between(
        &self,
        a: TokenId,
        b: TokenId,
    ) -> impl Iterator<Item = &Connection> + '_ {
        self.pairs
            .get(&pair_key(a, b))
            .into_iter()
            .flatten()
            .filter_map(|id| self.connections.get(id))
    }

    #[must_use]
    pub fn are_connected(&self, a: TokenId, b: TokenId) -> bool {
        self.pairs.get(&pair_key(a, b)).is_some_and(|set| !set.is_empty())
    }

    /// Members of a domain in id order.
    pub fn members(&self, domain: DomainId) -> impl Iterator<Item = TokenId> + '_ {
        self.members.get(&domain).into_iter().flatten().copied()
    }

    #[must_use]
    pub fn member_count(&self, domain: DomainId) -> usize {
        self.members.get(&domain).map_or(0, BTreeSet::len)
    }

    /// Lowest-id token carrying `label`.
    #[must_use]
    pub fn find_by_label(&self, label: &str) -> Option<TokenId> {
        self.labels.get(label)?.iter().next().copied()
    }

    /// Lowest-id token whose embedding is bit-identical to `embedding`.
    #[must_use]
    pub fn find_by_embedding(&self, embedding: &[f32]) -> Option<TokenId> {
        self.tokens
            .values()
            .find(|t| bit_identical(&t.embedding, embedding))
            .map(|t| t.id)
    }

    /// Nearest neighbour restricted to one domain, or across all tokens.
    pub fn nearest_in(
        &self,
        query: &[f32],
        threshold: f32,
        domain: Option<DomainId>,
    ) -> Result<Option<(TokenId, f32)>, AxiomError> {
        if query.len() != self.options.embedding_dim || !all_finite(query) {
            return Err(AxiomError::InvalidInput(format!(
                "query must be {} finite components",
                self.options.embedding_dim
            )));
        }
        let mut best: Option<(TokenId, f32)> = None;
        for token in self.tokens.values() {
            if domain.is_some() && token.domain != domain {
                continue;
            }
            let similarity = cosine_similarity(query, &token.embedding);
            if similarity < threshold {
                continue;
            }
            // Strictly greater keeps the lowest id on ties.
            if best.is_none_or(|(_, s)| similarity > s) {
                best = Some((token.id, similarity));
            }
        }
        Ok(best)
    }

    // -------------------------------------------------------------------------
    // Index maintenance
    // -------------------------------------------------------------------------

    fn index_token(&mut self, token: &Token) {
        if let Some(label) = &token.label {
            self.labels.entry(label.clone()).or_default().insert(token.id);
        }
        if let Some(domain) = token.domain {
            self.members.entry(domain).or_default().insert(token.id);
        }
    }

    fn unindex_token(&mut self, token: &Token) {
        if let Some(label) = &token.label
            && let Some(set) = self.labels.get_mut(label)
        {
            set.remove(&token.id);
            if set.is_empty() {
                self.labels.remove(label);
            }
        }
        if let Some(domain) = token.domain
            && let Some(set) = self.members.get_mut(&domain)
        {
            set.remove(&token.id);
            if set.is_empty() {
                self.members.remove(&domain);
            }
        }
    }

    fn index_connection(&mut self, connection: &Connection) {
        self.adjacency.entry(connection.from).or_default().insert(connection.id);
        self.adjacency.entry(connection.to).or_default().insert(connection.id);
        self.pairs
            .entry(pair_key(connection.from, connection.to))
            .or_default()
            .insert(connection.id);
    }

    fn unindex_connection(&mut self, connection: &Connection) {
        for endpoint in [connection.from, connection.to] {
            if let Some(set) = self.adjacency.get_mut(&endpoint) {
                set.remove(&connection.id);
                if set.is_empty() {
                    self.adjacency.remove(&endpoint);
                }
            }
        }
        let key = pair_key(connection.from, connection.to);
        if let Some(set) = self.pairs.get_mut(&key) {
            set.remove(&connection.id);
            if set.is_empty() {
                self.pairs.remove(&key);
            }
        }
    }

    fn remove_connection_unchecked(&mut self, id: ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(&id)?;
        self.unindex_connection(&connection);
        self.journal.record(
            self.tick,
            EntityRef::Connection(id),
            MutationOp::Delete,
            Some(connection.version),
            None,
            MutationPayload::Removed,
        );
        Some(connection)
    }
}

impl GraphStore for Graph {
    fn create_token(&mut self, spec: TokenSpec) -> Result<TokenId, AxiomError> {
        if spec.embedding.len() != self.options.embedding_dim {
            return Err(AxiomError::InvalidInput(format!(
                "embedding has {} components, expected {}",
                spec.embedding.len(),
                self.options.embedding_dim
            )));
        }
        if !all_finite(&spec.embedding) || !spec.activation.is_finite() {
            return Err(AxiomError::InvalidInput(
                "token spec contains non-finite values".to_string(),
            ));
        }
        if let Some(position) = &spec.position
            && (position.len() != self.options.state_dim || !all_finite(position))
        {
            return Err(AxiomError::InvalidInput(format!(
                "position must be {} finite components",
                self.options.state_dim
            )));
        }

        let id = TokenId(self.next_token_id);
        self.next_token_id = self.next_token_id.saturating_add(1);

        let state = PhysicalState::at(spec.initial_position(self.options.state_dim), spec.activation);
        let token = Token {
            id,
            label: spec.label,
            embedding: spec.embedding,
            state,
            domain: Some(spec.domain),
            created_at: self.tick,
            version: Version::INITIAL,
        };
        self.index_token(&token);
        self.journal.record(
            self.tick,
            EntityRef::Token(id),
            MutationOp::Create,
            None,
            Some(token.version),
            MutationPayload::Token(Box::new(token.clone())),
        );
        self.tokens.insert(id, token);
        tracing::trace!(token = %id, tick = self.tick.0, "token created");
        Ok(id)
    }

    fn create_connection_with(&mut self, spec: ConnectionSpec) -> Result<ConnectionId, AxiomError> {
        for endpoint in [spec.from, spec.to] {
            if !self.tokens.contains_key(&endpoint) {
                return Err(AxiomError::NotFound(EntityRef::Token(endpoint)));
            }
        }
        if spec.from == spec.to {
            return Err(AxiomError::InvalidInput(format!(
                "self-connection on {} is not allowed",
                spec.from
            )));
        }
        check_weight(spec.weight)?;
        if !self.options.allow_multi_edge && self.are_connected(spec.from, spec.to) {
            return Err(AxiomError::DuplicateEdge {
                from: spec.from,
                to: spec.to,
            });
        }

        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id = self.next_connection_id.saturating_add(1);

        let connection = Connection {
            id,
            from: spec.from,
            to: spec.to,
            kind: spec.kind,
            directed: spec.directed,
            weight: spec.weight,
            mutability: spec.mutability,
            schema_version: CONNECTION_SCHEMA_VERSION,
            created_at: self.tick,
            version: Version::INITIAL,
        };
        self.index_connection(&connection);
        self.journal.record(
            self.tick,
            EntityRef::Connection(id),
            MutationOp::Create,
            None,
            Some(connection.version),
            MutationPayload::Connection(connection.clone()),
        );
        self.connections.insert(id, connection);
        tracing::trace!(connection = %id, from = %spec.from, to = %spec.to, "connection created");
        Ok(id)
    }

    fn token(&self, id: TokenId) -> Result<Token, AxiomError> {
        self.tokens
            .get(&id)
            .cloned()
            .ok_or(AxiomError::NotFound(EntityRef::Token(id)))
    }

    fn connection(&self, id: ConnectionId) -> Result<Connection, AxiomError> {
        self.connections
            .get(&id)
            .cloned()
            .ok_or(AxiomError::NotFound(EntityRef::Connection(id)))
    }

    fn update_token(
        &mut self,
        id: TokenId,
        expected: Option<Version>,
        update: TokenUpdate,
    ) -> Result<Version, AxiomError> {
        let entity = EntityRef::Token(id);
        let current = self.tokens.get(&id).ok_or(AxiomError::NotFound(entity))?;
        check_version(entity, expected, current.version)?;

        if let Some(embedding) = &update.embedding
            && (embedding.len() != self.options.embedding_dim || !all_finite(embedding))
        {
            return Err(AxiomError::InvalidInput(format!(
                "embedding must be {} finite components",
                self.options.embedding_dim
            )));
        }
        if let Some(state) = &update.state
            && (state.dim() != self.options.state_dim
                || state.velocity.len() != self.options.state_dim
                || !state.is_finite())
        {
            return Err(AxiomError::InvalidInput(format!(
                "state must be {} finite components",
                self.options.state_dim
            )));
        }

        let mut token = current.clone();
        let before = token.version;
        self.unindex_token(&token);
        if let Some(label) = update.label {
            token.label = label;
        }
        if let Some(embedding) = update.embedding {
            token.embedding = embedding;
        }
        if let Some(state) = update.state {
            token.state = state;
        }
        token.version = before.bump();
        self.index_token(&token);

        let after = token.version;
        self.journal.record(
            self.tick,
            entity,
            MutationOp::Update,
            Some(before),
            Some(after),
            MutationPayload::Token(Box::new(token.clone())),
        );
        self.tokens.insert(id, token);
        Ok(after)
    }

    fn update_connection(
        &mut self,
        id: ConnectionId,
        expected: Option<Version>,
        update: ConnectionUpdate,
    ) -> Result<Version, AxiomError> {
        let entity = EntityRef::Connection(id);
        let connection = self.connections.get_mut(&id).ok_or(AxiomError::NotFound(entity))?;
        check_version(entity, expected, connection.version)?;

        if let Some(weight) = update.weight {
            if connection.mutability == Mutability::Immutable {
                return Err(AxiomError::ImmutableConnection(id));
            }
            check_weight(weight)?;
        }

        let before = connection.version;
        if let Some(weight) = update.weight {
            connection.weight = weight;
        }
        if let Some(kind) = update.kind
            && kind != connection.kind
        {
            connection.kind = kind;
            connection.schema_version = CONNECTION_SCHEMA_VERSION;
        }
        if let Some(mutability) = update.mutability {
            connection.mutability = mutability;
        }
        connection.version = before.bump();
        let after = connection.version;
        let payload = MutationPayload::Connection(connection.clone());

        self.journal
            .record(self.tick, entity, MutationOp::Update, Some(before), Some(after), payload);
        Ok(after)
    }

    fn delete_token(
        &mut self,
        id: TokenId,
        expected: Option<Version>,
    ) -> Result<RemovedToken, AxiomError> {
        let entity = EntityRef::Token(id);
        let token = self.tokens.get(&id).ok_or(AxiomError::NotFound(entity))?;
        check_version(entity, expected, token.version)?;

        let referencing: Vec<ConnectionId> = self
            .adjacency
            .get(&id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        if !referencing.is_empty() && self.options.delete_policy == DeletePolicy::Reject {
            return Err(AxiomError::ReferencedEntity {
                token: id,
                connections: referencing.len(),
            });
        }

        // Cascade: connections go first, in id order.
        let mut connections = Vec::with_capacity(referencing.len());
        for connection_id in referencing {
            if let Some(connection) = self.remove_connection_unchecked(connection_id) {
                connections.push(connection);
            }
        }

        let token = self
            .tokens
            .remove(&id)
            .ok_or(AxiomError::NotFound(entity))?;
        self.unindex_token(&token);
        self.journal.record(
            self.tick,
            entity,
            MutationOp::Delete,
            Some(token.version),
            None,
            MutationPayload::Removed,
        );
        tracing::trace!(token = %id, cascaded = connections.len(), "token deleted");
        Ok(RemovedToken { token, connections })
    }

    fn delete_connection(
        &mut self,
        id: ConnectionId,
        expected: Option<Version>,
    ) -> Result<Connection, AxiomError> {
        let entity = EntityRef::Connection(id);
        let connection = self.connections.get(&id).ok_or(AxiomError::NotFound(entity))?;
        check_version(entity, expected, connection.version)?;
        self.remove_connection_unchecked(id)
            .ok_or(AxiomError::NotFound(entity))
    }

    fn move_token(
        &mut self,
        id: TokenId,
        domain: Option<DomainId>,
        expected: Option<Version>,
    ) -> Result<Version, AxiomError> {
        let entity = EntityRef::Token(id);
        let current = self.tokens.get(&id).ok_or(AxiomError::NotFound(entity))?;
        check_version(entity, expected, current.version)?;

        let mut token = current.clone();
        let before = token.version;
        self.unindex_token(&token);
        token.domain = domain;
        token.version = before.bump();
        self.index_token(&token);

        let after = token.version;
        self.journal.record(
            self.tick,
            entity,
            MutationOp::Move,
            Some(before),
            Some(after),
            MutationPayload::Token(Box::new(token.clone())),
        );
        self.tokens.insert(id, token);
        Ok(after)
    }

    fn shortest_path(
        &self,
        from: TokenId,
        to: TokenId,
    ) -> Result<Option<Vec<ConnectionId>>, AxiomError> {
        for endpoint in [from, to] {
            if !self.tokens.contains_key(&endpoint) {
                return Err(AxiomError::NotFound(EntityRef::Token(endpoint)));
            }
        }
        if from == to {
            return Ok(Some(Vec::new()));
        }

        // Dijkstra over BTreeMaps. The minimum scan returns the first entry
        // among equal costs, and an equal-cost relaxation replaces the
        // recorded predecessor when it comes from a lower token id, so ties
        // resolve towards lower token ids.
        let mut dist: BTreeMap<TokenId, (f64, usize)> = BTreeMap::new();
        let mut prev: BTreeMap<TokenId, (TokenId, ConnectionId)> = BTreeMap::new();
        let mut visited = BTreeSet::new();

        dist.insert(from, (0.0, 0));

        loop {
            let current = dist
                .iter()
                .filter(|(t, _)| !visited.contains(*t))
                .min_by(|(_, a), (_, b)| a.0.total_cmp(&b.0))
                .map(|(t, d)| (*t, *d));

            let Some((current, (cost, hops))) = current else {
                break;
            };
            if current == to {
                break;
            }
            visited.insert(current);
            if hops >= self.options.max_path_length {
                continue;
            }

            for connection in self.connections_of(current) {
                let Some(next) = connection.walk_from(current) else {
                    continue;
                };
                if visited.contains(&next) {
                    continue;
                }
                let next_cost = cost + f64::from(connection.weight.max(0.0));
                let improves = match dist.get(&next) {
                    None => true,
                    Some((known, _)) => match next_cost.total_cmp(known) {
                        Ordering::Less => true,
                        Ordering::Equal => prev.get(&next).is_some_and(|(p, _)| current < *p),
                        Ordering::Greater => false,
                    },
                };
                if improves {
                    dist.insert(next, (next_cost, hops.saturating_add(1)));
                    prev.insert(next, (current, connection.id));
                }
            }
        }

        if !prev.contains_key(&to) {
            return Ok(None);
        }

        let mut path = Vec::new();
        let mut current = to;
        while current != from {
            let Some(&(previous, connection)) = prev.get(&current) else {
                return Ok(None);
            };
            path.push(connection);
            current = previous;
        }
        path.reverse();
        Ok(Some(path))
    }

    fn neighbors(&self, token: TokenId, radius: usize) -> Result<Vec<(TokenId, usize)>, AxiomError> {
        if !self.tokens.contains_key(&token) {
            return Err(AxiomError::NotFound(EntityRef::Token(token)));
        }
        let radius = radius.min(MAX_NEIGHBOR_RADIUS);

        let mut seen = BTreeSet::from([token]);
        let mut frontier = BTreeSet::from([token]);
        let mut result = Vec::new();

        for hop in 1..=radius {
            let mut next = BTreeSet::new();
            for &current in &frontier {
                for connection in self.connections_of(current) {
                    if let Some(other) = connection.walk_from(current)
                        && seen.insert(other)
                    {
                        next.insert(other);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            result.extend(next.iter().map(|&t| (t, hop)));
            frontier = next;
        }
        Ok(result)
    }

    fn nearest(&self, query: &[f32], threshold: f32) -> Result<Option<(TokenId, f32)>, AxiomError> {
        self.nearest_in(query, threshold, None)
    }

    fn token_count(&self) -> usize {
        self.tokens.len()
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

// =============================================================================
// TESTS
// =============================================================================
