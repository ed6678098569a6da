//! # Action Controller
//!
//! Arbitrates candidate actions proposed by domains.
//!
//! Candidates contending for the same resource are resolved by a fixed,
//! deterministic policy: the highest priority wins, ties go to the lowest
//! candidate id, and non-finite priorities are rejected outright. Every losing
//! or rejected candidate is kept in a bounded audit log together with the
//! reason it lost.
//!
//! The policy version is an explicit integer. It is stamped on every
//! candidate when it is admitted and on every decision when it is made, so a
//! decision can always be traced back to the policy that produced it.

use crate::config::ArbiterConfig;
use crate::types::{CandidateId, DomainId, Tick, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

// =============================================================================
// CANDIDATES
// =============================================================================

/// A resource that at most one action may claim per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKey {
    /// The domain's single output channel (firing).
    Actor(DomainId),
    /// The domain's structural channel (linking).
    Structure(DomainId),
    /// A specific token.
    Token(TokenId),
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKey::Actor(d) => write!(f, "actor:{d}"),
            ResourceKey::Structure(d) => write!(f, "structure:{d}"),
            ResourceKey::Token(t) => write!(f, "token:{t}"),
        }
    }
}

/// What a candidate wants to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionKind {
    /// Emit the token as the domain's output.
    Fire { token: TokenId },
    /// Connect two co-firing tokens.
    Link { from: TokenId, to: TokenId },
}

/// How the candidate came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionSource {
    /// Produced by the physics alone.
    Deliberate,
    /// The associative memory recognised the activation.
    Reflex,
}

/// A candidate before it is admitted (no id, no policy stamp yet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionProposal {
    pub domain: DomainId,
    pub token: TokenId,
    pub resource: ResourceKey,
    pub kind: ActionKind,
    pub priority: f32,
    pub source: DecisionSource,
}

/// An admitted candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionCandidate {
    pub id: CandidateId,
    pub tick: Tick,
    pub domain: DomainId,
    pub token: TokenId,
    pub resource: ResourceKey,
    pub kind: ActionKind,
    pub priority: f32,
    pub policy_version: u32,
    pub source: DecisionSource,
}

/// The winner for one resource at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub tick: Tick,
    pub resource: ResourceKey,
    pub winner: ActionCandidate,
    /// Policy active when the decision was made.
    pub policy_version: u32,
    /// Candidates that lost to the winner, in id order.
    pub losers: Vec<CandidateId>,
}

/// Why a candidate did not win.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum RejectionReason {
    Outranked { by: CandidateId },
    NonFinitePriority,
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub tick: Tick,
    pub candidate: ActionCandidate,
    pub reason: RejectionReason,
}

/// Arbitration counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArbiterStats {
    pub admitted: u64,
    pub decisions: u64,
    pub outranked: u64,
    pub rejected_non_finite: u64,
    pub reflex_wins: u64,
}

// =============================================================================
// CONTROLLER
// =============================================================================

/// Deterministic arbiter with a bounded audit log.
#[derive(Debug)]
pub struct ActionController {
    policy_version: u32,
    next_candidate: u64,
    audit: VecDeque<AuditRecord>,
    audit_capacity: usize,
    stats: ArbiterStats,
}

impl ActionController {
    #[must_use]
    pub fn new(config: &ArbiterConfig) -> Self {
        Self {
            policy_version: config.policy_version,
            next_candidate: 0,
            audit: VecDeque::new(),
            audit_capacity: config.audit_capacity.max(1),
            stats: ArbiterStats::default(),
        }
    }

    #[must_use]
    pub fn policy_version(&self) -> u32 {
        self.policy_version
    }

    /// Switch policy. Applies to candidates admitted from now on.
    pub fn set_policy_version(&mut self, version: u32) {
        tracing::info!(from = self.policy_version, to = version, "policy version changed");
        self.policy_version = version;
    }

    /// The id the next admitted candidate will receive.
    #[must_use]
    pub fn next_candidate_id(&self) -> CandidateId {
        CandidateId(self.next_candidate)
    }

    /// Continue candidate numbering at `next` or later, e.g. after a restore.
    pub fn resume_from(&mut self, next: CandidateId) {
        self.next_candidate = self.next_candidate.max(next.0);
    }

    /// Assign ids and the current policy version, preserving order.
    pub fn admit(&mut self, tick: Tick, proposals: Vec<ActionProposal>) -> Vec<ActionCandidate> {
        proposals
            .into_iter()
            .map(|p| {
                let id = CandidateId(self.next_candidate);
                self.next_candidate = self.next_candidate.saturating_add(1);
                self.stats.admitted = self.stats.admitted.saturating_add(1);
                ActionCandidate {
                    id,
                    tick,
                    domain: p.domain,
                    token: p.token,
                    resource: p.resource,
                    kind: p.kind,
                    priority: p.priority,
                    policy_version: self.policy_version,
                    source: p.source,
                }
            })
            .collect()
    }

    /// Pick at most one winner per resource. Decisions come back in resource
    /// order.
    pub fn arbitrate(&mut self, tick: Tick, candidates: Vec<ActionCandidate>) -> Vec<Decision> {
        let mut contests: BTreeMap<ResourceKey, Vec<ActionCandidate>> = BTreeMap::new();
        for candidate in candidates {
            if !candidate.priority.is_finite() {
                tracing::warn!(candidate = %candidate.id, tick = tick.0, "non-finite priority rejected");
                self.stats.rejected_non_finite = self.stats.rejected_non_finite.saturating_add(1);
                self.log(AuditRecord {
                    tick,
                    candidate,
                    reason: RejectionReason::NonFinitePriority,
                });
                continue;
            }
            contests.entry(candidate.resource).or_default().push(candidate);
        }

        let mut decisions = Vec::with_capacity(contests.len());
        for (resource, mut entrants) in contests {
            entrants.sort_by(|a, b| b.priority.total_cmp(&a.priority).then(a.id.cmp(&b.id)));
            let mut entrants = entrants.into_iter();
            let Some(winner) = entrants.next() else {
                continue;
            };

            let mut losers: Vec<CandidateId> = Vec::new();
            for loser in entrants {
                losers.push(loser.id);
                self.stats.outranked = self.stats.outranked.saturating_add(1);
                self.log(AuditRecord {
                    tick,
                    candidate: loser,
                    reason: RejectionReason::Outranked { by: winner.id },
                });
            }
            losers.sort();

            if winner.source == DecisionSource::Reflex {
                self.stats.reflex_wins = self.stats.reflex_wins.saturating_add(1);
            }
            self.stats.decisions = self.stats.decisions.saturating_add(1);
            tracing::debug!(
                tick = tick.0,
                resource = %resource,
                winner = %winner.id,
                losers = losers.len(),
                policy = self.policy_version,
                "action decided"
            );
            decisions.push(Decision {
                tick,
                resource,
                winner,
                policy_version: self.policy_version,
                losers,
            });
        }
        decisions
    }

    /// Retained audit records, oldest first.
    pub fn audit_log(&self) -> impl Iterator<Item = &AuditRecord> {
        self.audit.iter()
    }

    #[must_use]
    pub fn stats(&self) -> ArbiterStats {
        self.stats
    }

    fn log(&mut self, record: AuditRecord) {
        self.audit.push_back(record);
        while self.audit.len() > self.audit_capacity {
            self.audit.pop_front();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
