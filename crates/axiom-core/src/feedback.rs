//! # Feedback
//!
//! Applies corrections from outside the engine to the Graph Store.
//!
//! Feedback targets a connection, a token pair, a token, or a word. Words are
//! resolved by label; a word the graph has never seen gets a runtime token
//! (embedded with the Gateway's [`Embedder`]) when the feedback needs
//! something to attach to. Every mutation is an ordinary Graph Store update,
//! so it bumps versions and reaches the journal like any other.
//!
//! The returned [`FeedbackOutcome`] lists exactly the changes that happened.
//! Feedback that finds nothing to change reports an empty change list.

use crate::config::LearningConfig;
use crate::gateway::Embedder;
use crate::graph::{ConnectionUpdate, Graph, GraphStore, TokenUpdate};
use crate::journal::{Change, ChangeField};
use crate::primitives::{MAX_ACTIVATION, MAX_CONNECTION_WEIGHT};
use crate::types::{
    AxiomError, ConnectionId, ConnectionSpec, DomainId, EntityRef, TokenId, TokenSpec,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// FEEDBACK SIGNALS
// =============================================================================

/// What a piece of feedback is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FeedbackSubject {
    Connection(ConnectionId),
    Pair(TokenId, TokenId),
    Token(TokenId),
    Word(String),
}

/// What the feedback says.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum FeedbackKind {
    /// Strengthen. `None` uses the configured step.
    Reinforce { amount: Option<f32> },
    /// Weaken. `None` uses the configured step.
    Weaken { amount: Option<f32> },
    /// The subject was associated with `wrong` where `right` was meant.
    Correct { wrong: TokenId, right: TokenId },
    /// The two tokens of the subject belong together.
    Associate,
}

/// A feedback message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub subject: FeedbackSubject,
    pub kind: FeedbackKind,
}

impl FeedbackSignal {
    #[must_use]
    pub fn reinforce(subject: FeedbackSubject) -> Self {
        Self {
            subject,
            kind: FeedbackKind::Reinforce { amount: None },
        }
    }

    #[must_use]
    pub fn weaken(subject: FeedbackSubject) -> Self {
        Self {
            subject,
            kind: FeedbackKind::Weaken { amount: None },
        }
    }

    #[must_use]
    pub fn correct(subject: FeedbackSubject, wrong: TokenId, right: TokenId) -> Self {
        Self {
            subject,
            kind: FeedbackKind::Correct { wrong, right },
        }
    }

    #[must_use]
    pub fn associate(a: TokenId, b: TokenId) -> Self {
        Self {
            subject: FeedbackSubject::Pair(a, b),
            kind: FeedbackKind::Associate,
        }
    }
}

/// Result of applying feedback.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackOutcome {
    /// Tokens involved, in id order.
    pub tokens: Vec<TokenId>,
    /// Applied changes, in application order.
    pub changes: Vec<Change>,
}

impl FeedbackOutcome {
    /// Whether the feedback changed nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Counters kept by the processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackStats {
    pub applied: u64,
    pub no_ops: u64,
    pub tokens_created: u64,
    pub connections_created: u64,
}

// =============================================================================
// PROCESSOR
// =============================================================================

/// Turns feedback into Graph Store mutations.
#[derive(Debug)]
pub struct FeedbackProcessor {
    step: f32,
    link_weight: f32,
    default_domain: DomainId,
    stats: FeedbackStats,
}

/// Changes accumulated while applying one signal.
#[derive(Default)]
struct Applied {
    tokens: BTreeSet<TokenId>,
    changes: Vec<Change>,
}

impl FeedbackProcessor {
    #[must_use]
    pub fn new(learning: &LearningConfig, default_domain: DomainId) -> Self {
        Self {
            step: learning.feedback_step,
            link_weight: learning.link_weight,
            default_domain,
            stats: FeedbackStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> FeedbackStats {
        self.stats
    }

    /// Apply one feedback signal.
    ///
    /// Preconditions (existence, learnability, amounts) are checked before the
    /// first mutation, so a rejected signal leaves the graph untouched.
    ///
    /// `domains` are the domains that currently exist; a runtime token is
    /// only created when the default domain is among them.
    pub fn apply(
        &mut self,
        graph: &mut Graph,
        embedder: &dyn Embedder,
        domains: &BTreeSet<DomainId>,
        signal: &FeedbackSignal,
    ) -> Result<FeedbackOutcome, AxiomError> {
        let mut applied = Applied::default();

        match signal.kind {
            FeedbackKind::Reinforce { amount } => {
                let amount = self.amount(amount)?;
                match &signal.subject {
                    FeedbackSubject::Connection(id) => {
                        self.adjust_connection(graph, *id, amount, &mut applied)?;
                    }
                    FeedbackSubject::Pair(a, b) => {
                        self.strengthen_pair(graph, *a, *b, amount, amount, &mut applied)?;
                    }
                    FeedbackSubject::Token(_) | FeedbackSubject::Word(_) => {
                        let token =
                            self.anchor(graph, embedder, domains, &signal.subject, &mut applied)?;
                        self.adjust_activation(graph, token, amount, &mut applied)?;
                    }
                }
            }
            FeedbackKind::Weaken { amount } => {
                let amount = self.amount(amount)?;
                match &signal.subject {
                    FeedbackSubject::Connection(id) => {
                        self.adjust_connection(graph, *id, -amount, &mut applied)?;
                    }
                    FeedbackSubject::Pair(a, b) => {
                        require_token(graph, *a)?;
                        require_token(graph, *b)?;
                        applied.tokens.extend([*a, *b]);
                        if let Some(id) = first_between(graph, *a, *b) {
                            self.adjust_connection(graph, id, -amount, &mut applied)?;
                        }
                    }
                    FeedbackSubject::Token(id) => {
                        self.adjust_activation(graph, *id, -amount, &mut applied)?;
                    }
                    FeedbackSubject::Word(word) => {
                        // An unknown word has nothing to weaken.
                        if let Some(id) = graph.find_by_label(word) {
                            self.adjust_activation(graph, id, -amount, &mut applied)?;
                        }
                    }
                }
            }
            FeedbackKind::Correct { wrong, right } => {
                self.correct(graph, embedder, domains, &signal.subject, wrong, right, &mut applied)?;
            }
            FeedbackKind::Associate => match &signal.subject {
                FeedbackSubject::Connection(id) => {
                    self.adjust_connection(graph, *id, self.step, &mut applied)?;
                }
                FeedbackSubject::Pair(a, b) => {
                    let (step, weight) = (self.step, self.link_weight);
                    self.strengthen_pair(graph, *a, *b, step, weight, &mut applied)?;
                }
                FeedbackSubject::Token(_) | FeedbackSubject::Word(_) => {
                    return Err(AxiomError::InvalidInput(
                        "associate feedback needs a token pair or a connection".to_string(),
                    ));
                }
            },
        }

        if applied.changes.is_empty() {
            self.stats.no_ops += 1;
        } else {
            self.stats.applied += 1;
        }
        tracing::debug!(
            kind = ?signal.kind,
            tokens = applied.tokens.len(),
            changes = applied.changes.len(),
            "feedback applied"
        );

        Ok(FeedbackOutcome {
            tokens: applied.tokens.into_iter().collect(),
            changes: applied.changes,
        })
    }

    fn amount(&self, amount: Option<f32>) -> Result<f32, AxiomError> {
        let amount = amount.unwrap_or(self.step);
        if !amount.is_finite() || amount < 0.0 {
            return Err(AxiomError::InvalidInput(format!(
                "feedback amount must be finite and >= 0, got {amount}"
            )));
        }
        Ok(amount)
    }

    /// Resolve a token or word subject, creating a runtime token for an
    /// unknown word.
    fn anchor(
        &mut self,
        graph: &mut Graph,
        embedder: &dyn Embedder,
        domains: &BTreeSet<DomainId>,
        subject: &FeedbackSubject,
        applied: &mut Applied,
    ) -> Result<TokenId, AxiomError> {
        let token = match subject {
            FeedbackSubject::Token(id) => {
                require_token(graph, *id)?;
                *id
            }
            FeedbackSubject::Word(word) => match graph.find_by_label(word) {
                Some(id) => id,
                None => {
                    if !domains.contains(&self.default_domain) {
                        return Err(AxiomError::NotFound(EntityRef::Domain(self.default_domain)));
                    }
                    let embedding = embedder.embed(word)?;
                    let id = graph.create_token(
                        TokenSpec::new(self.default_domain, embedding).with_label(word.as_str()),
                    )?;
                    let version = graph.token(id)?.version;
                    applied.changes.push(Change::created(EntityRef::Token(id), version));
                    self.stats.tokens_created += 1;
                    tracing::debug!(token = %id, word = %word, "runtime token created");
                    id
                }
            },
            FeedbackSubject::Connection(id) => graph.connection(*id)?.from,
            FeedbackSubject::Pair(a, _) => {
                require_token(graph, *a)?;
                *a
            }
        };
        applied.tokens.insert(token);
        Ok(token)
    }

    fn correct(
        &mut self,
        graph: &mut Graph,
        embedder: &dyn Embedder,
        domains: &BTreeSet<DomainId>,
        subject: &FeedbackSubject,
        wrong: TokenId,
        right: TokenId,
        applied: &mut Applied,
    ) -> Result<(), AxiomError> {
        if wrong == right {
            return Err(AxiomError::InvalidInput(
                "correction needs distinct wrong and right tokens".to_string(),
            ));
        }
        require_token(graph, wrong)?;
        require_token(graph, right)?;

        // Check learnability against the existing anchor before creating a
        // runtime token, so rejection leaves no trace.
        let existing = match subject {
            FeedbackSubject::Word(word) => graph.find_by_label(word),
            FeedbackSubject::Token(id) => Some(*id),
            FeedbackSubject::Pair(a, _) => Some(*a),
            FeedbackSubject::Connection(id) => Some(graph.connection(*id)?.from),
        };
        if let Some(anchor) = existing {
            let touched = graph
                .connections_between(anchor, wrong)
                .chain(graph.connections_between(anchor, right).take(1));
            for connection in touched {
                if !connection.is_learnable() {
                    return Err(AxiomError::ImmutableConnection(connection.id));
                }
            }
        }

        let anchor = self.anchor(graph, embedder, domains, subject, applied)?;
        if anchor == wrong || anchor == right {
            return Err(AxiomError::InvalidInput(format!(
                "correction anchor {anchor} cannot be its own target"
            )));
        }
        applied.tokens.extend([wrong, right]);

        let wrong_edges: Vec<ConnectionId> =
            graph.connections_between(anchor, wrong).map(|c| c.id).collect();
        for id in wrong_edges {
            self.adjust_connection(graph, id, -self.step, applied)?;
        }
        let (step, weight) = (self.step, self.link_weight);
        self.strengthen_pair(graph, anchor, right, step, weight, applied)
    }

    /// Strengthen the lowest-id connection of a pair, or create one.
    fn strengthen_pair(
        &mut self,
        graph: &mut Graph,
        a: TokenId,
        b: TokenId,
        delta: f32,
        initial_weight: f32,
        applied: &mut Applied,
    ) -> Result<(), AxiomError> {
        require_token(graph, a)?;
        require_token(graph, b)?;
        applied.tokens.extend([a, b]);
        match first_between(graph, a, b) {
            Some(id) => self.adjust_connection(graph, id, delta, applied),
            None => {
                let weight = initial_weight.clamp(0.0, MAX_CONNECTION_WEIGHT);
                let id = graph.create_connection_with(ConnectionSpec::new(a, b, weight))?;
                let version = graph.connection(id)?.version;
                applied.changes.push(Change::created(EntityRef::Connection(id), version));
                self.stats.connections_created += 1;
                Ok(())
            }
        }
    }

    fn adjust_connection(
        &mut self,
        graph: &mut Graph,
        id: ConnectionId,
        delta: f32,
        applied: &mut Applied,
    ) -> Result<(), AxiomError> {
        let connection = graph.connection(id)?;
        if !connection.is_learnable() {
            return Err(AxiomError::ImmutableConnection(id));
        }
        applied.tokens.extend([connection.from, connection.to]);
        let weight = (connection.weight + delta).clamp(0.0, MAX_CONNECTION_WEIGHT);
        if weight.to_bits() == connection.weight.to_bits() {
            return Ok(());
        }
        let version =
            graph.update_connection(id, Some(connection.version), ConnectionUpdate::weight(weight))?;
        applied.changes.push(Change::scalar(
            EntityRef::Connection(id),
            ChangeField::Weight,
            connection.weight,
            weight,
            version,
        ));
        Ok(())
    }

    fn adjust_activation(
        &mut self,
        graph: &mut Graph,
        id: TokenId,
        delta: f32,
        applied: &mut Applied,
    ) -> Result<(), AxiomError> {
        let token = graph.token(id)?;
        applied.tokens.insert(id);
        let old = token.state.activation;
        let new = (old + delta).clamp(0.0, MAX_ACTIVATION);
        if new.to_bits() == old.to_bits() {
            return Ok(());
        }
        let mut state = token.state;
        state.activation = new;
        let version = graph.update_token(id, Some(token.version), TokenUpdate::state(state))?;
        applied.changes.push(Change::scalar(
            EntityRef::Token(id),
            ChangeField::Activation,
            old,
            new,
            version,
        ));
        Ok(())
    }
}

fn require_token(graph: &Graph, id: TokenId) -> Result<(), AxiomError> {
    if graph.contains_token(id) {
        Ok(())
    } else {
        Err(AxiomError::NotFound(EntityRef::Token(id)))
    }
}

fn first_between(graph: &Graph, a: TokenId, b: TokenId) -> Option<ConnectionId> {
    graph.connections_between(a, b).next().map(|c| c.id)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::HashingEmbedder;
    use crate::graph::GraphOptions;
    use crate::journal::ChangeValue;

    fn live() -> BTreeSet<DomainId> {
        BTreeSet::from([DomainId(1)])
    }

    fn setup() -> (Graph, HashingEmbedder, FeedbackProcessor, TokenId, TokenId, TokenId) {
        let options = GraphOptions {
            embedding_dim: 4,
            state_dim: 2,
            ..GraphOptions::default()
        };
        let mut graph = Graph::new(options);
        let mut token = |label: &str, embedding: [f32; 4]| {
            graph
                .create_token(TokenSpec::new(DomainId(1), embedding.to_vec()).with_label(label))
                .expect("token")
        };
        let cat = token("cat", [1.0, 0.0, 0.0, 0.0]);
        let dog = token("dog", [0.0, 1.0, 0.0, 0.0]);
        let fish = token("fish", [0.0, 0.0, 1.0, 0.0]);
        let embedder = HashingEmbedder::new(4).expect("embedder");
        let processor = FeedbackProcessor::new(&LearningConfig::default(), DomainId(1));
        (graph, embedder, processor, cat, dog, fish)
    }

    #[test]
    fn reinforcing_unconnected_pair_creates_connection() {
        let (mut graph, embedder, mut processor, cat, dog, _) = setup();
        let outcome = processor
            .apply(&mut graph, &embedder, &live(), &FeedbackSignal::reinforce(FeedbackSubject::Pair(cat, dog)))
            .expect("feedback");
        assert_eq!(outcome.tokens, vec![cat, dog]);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].field, ChangeField::Created);
        assert!(graph.are_connected(cat, dog));

        let outcome = processor
            .apply(&mut graph, &embedder, &live(), &FeedbackSignal::reinforce(FeedbackSubject::Pair(cat, dog)))
            .expect("feedback");
        assert_eq!(outcome.changes[0].field, ChangeField::Weight);
        assert_eq!(outcome.changes[0].old, ChangeValue::Scalar(0.25));
        assert_eq!(outcome.changes[0].new, ChangeValue::Scalar(0.5));
    }

    #[test]
    fn weakening_missing_pair_reports_nothing() {
        let (mut graph, embedder, mut processor, cat, dog, _) = setup();
        let outcome = processor
            .apply(&mut graph, &embedder, &live(), &FeedbackSignal::weaken(FeedbackSubject::Pair(cat, dog)))
            .expect("feedback");
        assert!(outcome.is_noop());
        assert_eq!(processor.stats().no_ops, 1);
        assert_eq!(graph.connection_count(), 0);
    }

    #[test]
    fn weight_never_goes_below_zero() {
        let (mut graph, embedder, mut processor, cat, dog, _) = setup();
        let id = graph.create_connection(cat, dog, 0.1).expect("edge");
        processor
            .apply(&mut graph, &embedder, &live(), &FeedbackSignal::weaken(FeedbackSubject::Connection(id)))
            .expect("feedback");
        assert_eq!(graph.connection(id).expect("edge").weight, 0.0);
    }

    #[test]
    fn correcting_unknown_word_creates_runtime_token() {
        let (mut graph, embedder, mut processor, cat, dog, fish) = setup();
        let outcome = processor
            .apply(
                &mut graph,
                &embedder,
                &live(),
                &FeedbackSignal::correct(FeedbackSubject::Word("kitten".to_string()), dog, cat),
            )
            .expect("feedback");
        let kitten = graph.find_by_label("kitten").expect("runtime token");
        assert!(outcome.tokens.contains(&kitten));
        assert!(graph.are_connected(kitten, cat));
        assert!(!graph.are_connected(kitten, fish));
        assert_eq!(processor.stats().tokens_created, 1);
    }

    #[test]
    fn correction_weakens_wrong_and_strengthens_right() {
        let (mut graph, embedder, mut processor, cat, dog, fish) = setup();
        let wrong = graph.create_connection(cat, dog, 1.0).expect("edge");
        processor
            .apply(&mut graph, &embedder, &live(), &FeedbackSignal::correct(FeedbackSubject::Token(cat), dog, fish))
            .expect("feedback");
        assert_eq!(graph.connection(wrong).expect("edge").weight, 0.75);
        assert!(graph.are_connected(cat, fish));
    }

    #[test]
    fn immutable_connection_rejects_without_side_effects() {
        let (mut graph, embedder, mut processor, cat, dog, _) = setup();
        graph
            .create_connection_with(ConnectionSpec::new(cat, dog, 1.0).immutable())
            .expect("edge");
        let before = graph.next_ids();
        let err = processor
            .apply(
                &mut graph,
                &embedder,
                &live(),
                &FeedbackSignal::correct(FeedbackSubject::Token(cat), dog, TokenId(2)),
            )
            .expect_err("immutable");
        assert!(matches!(err, AxiomError::ImmutableConnection(_)));
        assert_eq!(graph.next_ids(), before);
    }

    #[test]
    fn associate_needs_a_pair() {
        let (mut graph, embedder, mut processor, cat, _, _) = setup();
        let signal = FeedbackSignal {
            subject: FeedbackSubject::Token(cat),
            kind: FeedbackKind::Associate,
        };
        assert!(processor.apply(&mut graph, &embedder, &live(), &signal).is_err());
    }

    #[test]
    fn missing_tokens_are_not_found() {
        let (mut graph, embedder, mut processor, cat, _, _) = setup();
        let err = processor
            .apply(&mut graph, &embedder, &live(), &FeedbackSignal::associate(cat, TokenId(99)))
            .expect_err("missing");
        assert_eq!(err, AxiomError::NotFound(EntityRef::Token(TokenId(99))));
    }

    #[test]
    fn unknown_word_needs_a_live_default_domain() {
        let (mut graph, embedder, mut processor, _, _, _) = setup();
        let before = graph.next_ids();
        let err = processor
            .apply(
                &mut graph,
                &embedder,
                &BTreeSet::from([DomainId(2)]),
                &FeedbackSignal::reinforce(FeedbackSubject::Word("kitten".to_string())),
            )
            .expect_err("default domain gone");
        assert_eq!(err, AxiomError::NotFound(EntityRef::Domain(DomainId(1))));
        assert!(graph.find_by_label("kitten").is_none());
        assert_eq!(graph.next_ids(), before);
    }
}
