//! # Hybrid Learning
//!
//! Applies typed, discrete proposals to the Graph Store and to domain
//! constants. There is no gradient anywhere: learning is the application of
//! explicit structural and scalar changes.
//!
//! Every proposal is all-or-nothing. Preconditions are checked before the
//! first mutation, and the returned [`ProposalOutcome`] is built from what
//! actually happened.
//!
//! Errors: `NotFound` and `VersionConflict` pass through unchanged so callers
//! can retry with fresh state. Every other violated invariant is reported as
//! `ProposalApplicationFailed`.

use crate::controller::{ActionKind, Decision};
use crate::domain::{DomainConstant, DomainConstants};
use crate::graph::{ConnectionUpdate, Graph, GraphStore};
use crate::journal::{Change, ChangeField, ChangeValue};
use crate::primitives::MAX_CONNECTION_WEIGHT;
use crate::types::{
    AxiomError, ConnectionId, ConnectionSpec, DomainId, EntityRef, TokenId, TokenSpec, Version,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// PROPOSALS
// =============================================================================

/// A scalar change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Modification {
    ConnectionWeight {
        connection: ConnectionId,
        delta: f32,
    },
    DomainConstant {
        domain: DomainId,
        constant: DomainConstant,
        delta: f32,
    },
}

/// What a `Create` proposal creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CreateTarget {
    Token(TokenSpec),
    Connection(ConnectionSpec),
}

/// A typed learning proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Proposal {
    Modify(Modification),
    Create {
        target: CreateTarget,
        /// Deduplication key.
        #[serde(default)]
        key: Option<String>,
    },
    /// Delete a token or a connection.
    Delete(EntityRef),
    /// Move a token to another domain.
    Promote { token: TokenId, domain: DomainId },
    /// Several constant deltas applied to one domain as a unit.
    Behavioral {
        domain: DomainId,
        deltas: Vec<(DomainConstant, f32)>,
    },
}

impl Proposal {
    /// Short name for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Proposal::Modify(_) => "modify",
            Proposal::Create { .. } => "create",
            Proposal::Delete(_) => "delete",
            Proposal::Promote { .. } => "promote",
            Proposal::Behavioral { .. } => "behavioral",
        }
    }
}

/// What applying a proposal changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProposalOutcome {
    pub key: Option<String>,
    /// Entities created, in creation order.
    pub created: Vec<EntityRef>,
    /// Every change with old and new values, in application order.
    pub changes: Vec<Change>,
}

// =============================================================================
// CONSTANTS ACCESS
// =============================================================================

/// Read/write access to domain constants, injected by the engine.
pub trait ConstantsAccessor {
    fn contains(&self, domain: DomainId) -> bool;

    fn constants(&self, domain: DomainId) -> Result<DomainConstants, AxiomError>;

    /// Replace a domain's constants. Returns the domain's new version.
    fn set_constants(
        &mut self,
        domain: DomainId,
        constants: DomainConstants,
    ) -> Result<Version, AxiomError>;
}

// =============================================================================
// HYBRID LEARNING
// =============================================================================

/// Application counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HybridLearningStats {
    pub applied: u64,
    pub failed: u64,
    /// Keyed creates whose key had been applied before.
    pub duplicate_keys: u64,
}

/// Applies proposals.
#[derive(Debug)]
pub struct HybridLearning {
    reject_duplicate_keys: bool,
    link_weight: f32,
    applied_keys: BTreeSet<String>,
    stats: HybridLearningStats,
}

fn failed(err: AxiomError) -> AxiomError {
    match err {
        AxiomError::NotFound(_)
        | AxiomError::VersionConflict { .. }
        | AxiomError::ProposalApplicationFailed(_) => err,
        other => AxiomError::ProposalApplicationFailed(other.to_string()),
    }
}

impl HybridLearning {
    #[must_use]
    pub fn new(reject_duplicate_keys: bool, link_weight: f32) -> Self {
        Self {
            reject_duplicate_keys,
            link_weight,
            applied_keys: BTreeSet::new(),
            stats: HybridLearningStats::default(),
        }
    }

    #[must_use]
    pub fn stats(&self) -> HybridLearningStats {
        self.stats
    }

    /// Keys applied so far, in order.
    pub fn applied_keys(&self) -> impl Iterator<Item = &str> {
        self.applied_keys.iter().map(String::as_str)
    }

    /// Restore keys from a snapshot.
    pub fn restore_keys(&mut self, keys: impl IntoIterator<Item = String>) {
        self.applied_keys.extend(keys);
    }

    /// A `Create` proposal for a winning `Link` decision.
    #[must_use]
    pub fn link_proposal(&self, decision: &Decision) -> Option<Proposal> {
        match decision.winner.kind {
            ActionKind::Link { from, to } => Some(Proposal::Create {
                target: CreateTarget::Connection(ConnectionSpec::new(from, to, self.link_weight)),
                key: None,
            }),
            ActionKind::Fire { .. } => None,
        }
    }

    /// Apply one proposal.
    pub fn apply(
        &mut self,
        graph: &mut Graph,
        constants: &mut dyn ConstantsAccessor,
        proposal: &Proposal,
    ) -> Result<ProposalOutcome, AxiomError> {
        let result = self.apply_inner(graph, constants, proposal).map_err(failed);
        match &result {
            Ok(outcome) => {
                self.stats.applied += 1;
                tracing::debug!(
                    proposal = proposal.label(),
                    tick = graph.tick().0,
                    created = outcome.created.len(),
                    changes = outcome.changes.len(),
                    "proposal applied"
                );
            }
            Err(err) => {
                self.stats.failed += 1;
                tracing::debug!(proposal = proposal.label(), error = %err, "proposal rejected");
            }
        }
        result
    }

    fn apply_inner(
        &mut self,
        graph: &mut Graph,
        constants: &mut dyn ConstantsAccessor,
        proposal: &Proposal,
    ) -> Result<ProposalOutcome, AxiomError> {
        let mut outcome = ProposalOutcome::default();

        match proposal {
            Proposal::Modify(Modification::ConnectionWeight { connection, delta }) => {
                let current = graph.connection(*connection)?;
                if !current.is_learnable() {
                    return Err(AxiomError::ImmutableConnection(*connection));
                }
                let weight = current.weight + delta;
                if !weight.is_finite() || !(0.0..=MAX_CONNECTION_WEIGHT).contains(&weight) {
                    return Err(AxiomError::ProposalApplicationFailed(format!(
                        "weight of {connection} would become {weight}"
                    )));
                }
                let version = graph.update_connection(
                    *connection,
                    Some(current.version),
                    ConnectionUpdate::weight(weight),
                )?;
                outcome.changes.push(Change::scalar(
                    EntityRef::Connection(*connection),
                    ChangeField::Weight,
                    current.weight,
                    weight,
                    version,
                ));
            }
            Proposal::Modify(Modification::DomainConstant {
                domain,
                constant,
                delta,
            }) => {
                outcome.changes =
                    apply_constant_deltas(constants, *domain, &[(*constant, *delta)])?;
            }
            Proposal::Behavioral { domain, deltas } => {
                outcome.changes = apply_constant_deltas(constants, *domain, deltas)?;
            }
            Proposal::Create { target, key } => {
                if let Some(key) = key {
                    if self.applied_keys.contains(key) {
                        self.stats.duplicate_keys += 1;
                        if self.reject_duplicate_keys {
                            return Err(AxiomError::ProposalApplicationFailed(format!(
                                "duplicate create key '{key}'"
                            )));
                        }
                        tracing::debug!(key = %key, "duplicate create key allowed");
                    }
                }
                let (entity, version) = match target {
                    CreateTarget::Token(spec) => {
                        if !constants.contains(spec.domain) {
                            return Err(AxiomError::NotFound(EntityRef::Domain(spec.domain)));
                        }
                        let id = graph.create_token(spec.clone())?;
                        (EntityRef::Token(id), graph.token(id)?.version)
                    }
                    CreateTarget::Connection(spec) => {
                        let id = graph.create_connection_with(spec.clone())?;
                        (EntityRef::Connection(id), graph.connection(id)?.version)
                    }
                };
                outcome.created.push(entity);
                outcome.changes.push(Change::created(entity, version));
                if let Some(key) = key {
                    self.applied_keys.insert(key.clone());
                    outcome.key = Some(key.clone());
                }
            }
            Proposal::Delete(EntityRef::Token(id)) => {
                let removed = graph.delete_token(*id, None)?;
                for connection in &removed.connections {
                    outcome
                        .changes
                        .push(Change::deleted(EntityRef::Connection(connection.id)));
                }
                outcome.changes.push(Change::deleted(EntityRef::Token(*id)));
            }
            Proposal::Delete(EntityRef::Connection(id)) => {
                graph.delete_connection(*id, None)?;
                outcome.changes.push(Change::deleted(EntityRef::Connection(*id)));
            }
            Proposal::Delete(
                entity @ (EntityRef::Domain(_) | EntityRef::Signal(_) | EntityRef::Subscriber(_)),
            ) => {
                return Err(AxiomError::ProposalApplicationFailed(format!(
                    "{entity} cannot be deleted by a proposal"
                )));
            }
            Proposal::Promote { token, domain } => {
                let current = graph.token(*token)?;
                if !constants.contains(*domain) {
                    return Err(AxiomError::NotFound(EntityRef::Domain(*domain)));
                }
                if current.domain == Some(*domain) {
                    return Ok(outcome);
                }
                let version = graph.move_token(*token, Some(*domain), Some(current.version))?;
                outcome.changes.push(Change {
                    entity: EntityRef::Token(*token),
                    field: ChangeField::Domain,
                    old: ChangeValue::Domain(current.domain),
                    new: ChangeValue::Domain(Some(*domain)),
                    version: Some(version),
                });
            }
        }

        Ok(outcome)
    }
}

/// Apply constant deltas as one validated replacement and report each
/// constant whose value changed.
fn apply_constant_deltas(
    accessor: &mut dyn ConstantsAccessor,
    domain: DomainId,
    deltas: &[(DomainConstant, f32)],
) -> Result<Vec<Change>, AxiomError> {
    let before = accessor.constants(domain)?;
    let after = before.with_deltas(deltas)?;
    if after == before {
        return Ok(Vec::new());
    }
    let version = accessor.set_constants(domain, after)?;
    Ok(DomainConstant::ALL
        .into_iter()
        .filter(|c| before.get(*c).to_bits() != after.get(*c).to_bits())
        .map(|c| {
            Change::scalar(
                EntityRef::Domain(domain),
                ChangeField::Constant(c),
                before.get(c),
                after.get(c),
                version,
            )
        })
        .collect())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeletePolicy;
    use crate::graph::GraphOptions;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct Constants(BTreeMap<DomainId, (DomainConstants, Version)>);

    impl ConstantsAccessor for Constants {
        fn contains(&self, domain: DomainId) -> bool {
            self.0.contains_key(&domain)
        }

        fn constants(&self, domain: DomainId) -> Result<DomainConstants, AxiomError> {
            self.0
                .get(&domain)
                .map(|(c, _)| *c)
                .ok_or(AxiomError::NotFound(EntityRef::Domain(domain)))
        }

        fn set_constants(
            &mut self,
            domain: DomainId,
            constants: DomainConstants,
        ) -> Result<Version, AxiomError> {
            let entry = self
                .0
                .get_mut(&domain)
                .ok_or(AxiomError::NotFound(EntityRef::Domain(domain)))?;
            entry.0 = constants;
            entry.1 = entry.1.bump();
            Ok(entry.1)
        }
    }

    fn setup(reject: bool) -> (Graph, Constants, HybridLearning) {
        let options = GraphOptions {
            embedding_dim: 2,
            state_dim: 2,
            delete_policy: DeletePolicy::Cascade,
            ..GraphOptions::default()
        };
        let mut constants = Constants::default();
        constants
            .0
            .insert(DomainId(1), (DomainConstants::default(), Version::INITIAL));
        constants
            .0
            .insert(DomainId(2), (DomainConstants::default(), Version::INITIAL));
        (Graph::new(options), constants, HybridLearning::new(reject, 1.0))
    }

    fn create_token(key: Option<&str>) -> Proposal {
        Proposal::Create {
            target: CreateTarget::Token(TokenSpec::new(DomainId(1), vec![1.0, 0.0])),
            key: key.map(str::to_string),
        }
    }

    #[test]
    fn unkeyed_double_create_yields_distinct_tokens() {
        let (mut graph, mut constants, mut learning) = setup(true);
        let first = learning
            .apply(&mut graph, &mut constants, &create_token(None))
            .expect("create");
        let second = learning
            .apply(&mut graph, &mut constants, &create_token(None))
            .expect("create");
        assert_ne!(first.created, second.created);
        assert_eq!(graph.token_count(), 2);
    }

    #[test]
    fn keyed_double_create_rejected_when_configured() {
        let (mut graph, mut constants, mut learning) = setup(true);
        learning
            .apply(&mut graph, &mut constants, &create_token(Some("k")))
            .expect("create");
        let err = learning
            .apply(&mut graph, &mut constants, &create_token(Some("k")))
            .expect_err("duplicate");
        assert!(matches!(err, AxiomError::ProposalApplicationFailed(_)));
        assert_eq!(graph.token_count(), 1);
        assert_eq!(learning.stats().duplicate_keys, 1);
    }

    #[test]
    fn keyed_double_create_allowed_but_detected() {
        let (mut graph, mut constants, mut learning) = setup(false);
        learning
            .apply(&mut graph, &mut constants, &create_token(Some("k")))
            .expect("create");
        learning
            .apply(&mut graph, &mut constants, &create_token(Some("k")))
            .expect("allowed");
        assert_eq!(graph.token_count(), 2);
        assert_eq!(learning.stats().duplicate_keys, 1);
    }

    #[test]
    fn weight_modification_reports_old_and_new() {
        let (mut graph, mut constants, mut learning) = setup(true);
        let a = graph.create_token(TokenSpec::new(DomainId(1), vec![1.0, 0.0])).expect("token");
        let b = graph.create_token(TokenSpec::new(DomainId(1), vec![0.0, 1.0])).expect("token");
        let c = graph.create_connection(a, b, 1.0).expect("edge");

        let outcome = learning
            .apply(
                &mut graph,
                &mut constants,
                &Proposal::Modify(Modification::ConnectionWeight {
                    connection: c,
                    delta: 0.5,
                }),
            )
            .expect("modify");
        assert_eq!(outcome.changes[0].old, ChangeValue::Scalar(1.0));
        assert_eq!(outcome.changes[0].new, ChangeValue::Scalar(1.5));
        assert_eq!(outcome.changes[0].version, Some(Version(2)));

        let err = learning
            .apply(
                &mut graph,
                &mut constants,
                &Proposal::Modify(Modification::ConnectionWeight {
                    connection: c,
                    delta: -5.0,
                }),
            )
            .expect_err("negative weight");
        assert!(matches!(err, AxiomError::ProposalApplicationFailed(_)));
        assert_eq!(graph.connection(c).expect("edge").weight, 1.5);
    }

    #[test]
    fn behavioral_proposal_is_all_or_nothing() {
        let (mut graph, mut constants, mut learning) = setup(true);
        let err = learning
            .apply(
                &mut graph,
                &mut constants,
                &Proposal::Behavioral {
                    domain: DomainId(1),
                    deltas: vec![(DomainConstant::Attraction, 0.1), (DomainConstant::Inertia, -2.0)],
                },
            )
            .expect_err("invalid inertia");
        assert!(matches!(err, AxiomError::ProposalApplicationFailed(_)));
        assert_eq!(constants.0[&DomainId(1)].0, DomainConstants::default());

        let outcome = learning
            .apply(
                &mut graph,
                &mut constants,
                &Proposal::Behavioral {
                    domain: DomainId(1),
                    deltas: vec![(DomainConstant::Attraction, 0.1), (DomainConstant::Repulsion, 0.0)],
                },
            )
            .expect("valid deltas");
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(
            outcome.changes[0].field,
            ChangeField::Constant(DomainConstant::Attraction)
        );
    }

    #[test]
    fn promote_moves_token_and_reports_domains() {
        let (mut graph, mut constants, mut learning) = setup(true);
        let a = graph.create_token(TokenSpec::new(DomainId(1), vec![1.0, 0.0])).expect("token");
        let outcome = learning
            .apply(
                &mut graph,
                &mut constants,
                &Proposal::Promote {
                    token: a,
                    domain: DomainId(2),
                },
            )
            .expect("promote");
        assert_eq!(outcome.changes[0].old, ChangeValue::Domain(Some(DomainId(1))));
        assert_eq!(graph.member_count(DomainId(2)), 1);

        let err = learning
            .apply(
                &mut graph,
                &mut constants,
                &Proposal::Promote {
                    token: a,
                    domain: DomainId(9),
                },
            )
            .expect_err("unknown domain");
        assert_eq!(err, AxiomError::NotFound(EntityRef::Domain(DomainId(9))));
    }

    #[test]
    fn delete_token_lists_cascaded_connections() {
        let (mut graph, mut constants, mut learning) = setup(true);
        let a = graph.create_token(TokenSpec::new(DomainId(1), vec![1.0, 0.0])).expect("token");
        let b = graph.create_token(TokenSpec::new(DomainId(1), vec![0.0, 1.0])).expect("token");
        let c = graph.create_connection(a, b, 1.0).expect("edge");
        let outcome = learning
            .apply(&mut graph, &mut constants, &Proposal::Delete(EntityRef::Token(a)))
            .expect("delete");
        assert_eq!(
            outcome.changes,
            vec![
                Change::deleted(EntityRef::Connection(c)),
                Change::deleted(EntityRef::Token(a)),
            ]
        );
        let err = learning
            .apply(&mut graph, &mut constants, &Proposal::Delete(EntityRef::Token(a)))
            .expect_err("gone");
        assert!(matches!(err, AxiomError::NotFound(_)));
    }

    #[test]
    fn duplicate_edge_becomes_application_failure() {
        let (mut graph, mut constants, mut learning) = setup(true);
        let a = graph.create_token(TokenSpec::new(DomainId(1), vec![1.0, 0.0])).expect("token");
        let b = graph.create_token(TokenSpec::new(DomainId(1), vec![0.0, 1.0])).expect("token");
        graph.create_connection(a, b, 1.0).expect("edge");
        let proposal = Proposal::Create {
            target: CreateTarget::Connection(ConnectionSpec::new(b, a, 1.0)),
            key: None,
        };
        let err = learning
            .apply(&mut graph, &mut constants, &proposal)
            .expect_err("duplicate edge");
        assert!(matches!(err, AxiomError::ProposalApplicationFailed(_)));
        assert_eq!(learning.stats().failed, 1);
    }
}
