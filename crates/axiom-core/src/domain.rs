//! # Domain
//!
//! A bounded partition of tokens with its own physical constants.
//!
//! Each tick a domain:
//! 1. drains its mailbox (activation impulses, the `SystemTick` that lets it
//!    advance),
//! 2. evolves a snapshot of its members taken at tick start with the pure
//!    function [`evolve`],
//! 3. turns rising activation edges into `Fire` candidates and co-firing,
//!    unconnected pairs into `Link` candidates, consulting its associative
//!    memory to tell familiar activations (`Reflex`) from new ones.
//!
//! `evolve` reads nothing but its arguments: no clock, no randomness, no
//! graph access. Stepping domains in parallel is therefore safe and
//! reproducible.

use crate::controller::{ActionKind, ActionProposal, DecisionSource, ResourceKey};
use crate::graph::Graph;
use crate::memory::{AssociativeMemory, Fingerprint, MemoryStats};
use crate::primitives::{
    FAMILIARITY_CAP, FAMILIARITY_GAIN, MAX_ACTIVATION, MAX_PAIR_FORCE, MIN_SEPARATION,
    cosine_similarity,
};
use crate::signals::{Mailbox, SignalKind, SignalPayload};
use crate::types::{AxiomError, DomainId, PhysicalState, Tick, TokenId, Version};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Name of a single physical constant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainConstant {
    Attraction,
    Repulsion,
    Inertia,
    Resistance,
    InteractionCutoff,
    ActivationThreshold,
    ActivationDecay,
    ActivationCoupling,
}

impl DomainConstant {
    pub const ALL: [DomainConstant; 8] = [
        DomainConstant::Attraction,
        DomainConstant::Repulsion,
        DomainConstant::Inertia,
        DomainConstant::Resistance,
        DomainConstant::InteractionCutoff,
        DomainConstant::ActivationThreshold,
        DomainConstant::ActivationDecay,
        DomainConstant::ActivationCoupling,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            DomainConstant::Attraction => "attraction",
            DomainConstant::Repulsion => "repulsion",
            DomainConstant::Inertia => "inertia",
            DomainConstant::Resistance => "resistance",
            DomainConstant::InteractionCutoff => "interaction_cutoff",
            DomainConstant::ActivationThreshold => "activation_threshold",
            DomainConstant::ActivationDecay => "activation_decay",
            DomainConstant::ActivationCoupling => "activation_coupling",
        }
    }
}

impl fmt::Display for DomainConstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Physical constants of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConstants {
    /// Pull per unit of (similarity + connection weight).
    pub attraction: f32,
    /// Push, divided by squared distance.
    pub repulsion: f32,
    /// Force is divided by inertia before it changes velocity.
    pub inertia: f32,
    /// Velocity is damped by `1 / (1 + resistance)` every tick.
    pub resistance: f32,
    /// Tokens further apart than this do not interact.
    pub interaction_cutoff: f32,
    /// Activation at which a token fires.
    pub activation_threshold: f32,
    /// Fraction of activation lost per tick, in `[0, 1]`.
    pub activation_decay: f32,
    /// Share of mean neighbour activation absorbed per tick, in `[0, 1]`.
    pub activation_coupling: f32,
}

impl Default for DomainConstants {
    fn default() -> Self {
        Self {
            attraction: 0.05,
            repulsion: 0.01,
            inertia: 1.0,
            resistance: 0.5,
            interaction_cutoff: 2.0,
            activation_threshold: 0.5,
            activation_decay: 0.2,
            activation_coupling: 0.1,
        }
    }
}

impl DomainConstants {
    #[must_use]
    pub fn get(&self, constant: DomainConstant) -> f32 {
        match constant {
            DomainConstant::Attraction => self.attraction,
            DomainConstant::Repulsion => self.repulsion,
            DomainConstant::Inertia => self.inertia,
            DomainConstant::Resistance => self.resistance,
            DomainConstant::InteractionCutoff => self.interaction_cutoff,
            DomainConstant::ActivationThreshold => self.activation_threshold,
            DomainConstant::ActivationDecay => self.activation_decay,
            DomainConstant::ActivationCoupling => self.activation_coupling,
        }
    }

    pub fn set(&mut self, constant: DomainConstant, value: f32) {
        let slot = match constant {
            DomainConstant::Attraction => &mut self.attraction,
            DomainConstant::Repulsion => &mut self.repulsion,
            DomainConstant::Inertia => &mut self.inertia,
            DomainConstant::Resistance => &mut self.resistance,
            DomainConstant::InteractionCutoff => &mut self.interaction_cutoff,
            DomainConstant::ActivationThreshold => &mut self.activation_threshold,
            DomainConstant::ActivationDecay => &mut self.activation_decay,
            DomainConstant::ActivationCoupling => &mut self.activation_coupling,
        };
        *slot = value;
    }

    /// A copy with every delta added, validated as a whole.
    pub fn with_deltas(&self, deltas: &[(DomainConstant, f32)]) -> Result<Self, AxiomError> {
        let mut next = *self;
        for &(constant, delta) in deltas {
            next.set(constant, next.get(constant) + delta);
        }
        next.validate()?;
        Ok(next)
    }

    /// Validate constant ranges.
    pub fn validate(&self) -> Result<(), AxiomError> {
        for constant in DomainConstant::ALL {
            let value = self.get(constant);
            if !value.is_finite() {
                return Err(AxiomError::InvalidConfig(format!(
                    "{constant} must be finite, got {value}"
                )));
            }
        }
        if self.attraction < 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "attraction must be >= 0, got {}",
                self.attraction
            )));
        }
        if self.repulsion < 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "repulsion must be >= 0, got {}",
                self.repulsion
            )));
        }
        if self.inertia <= 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "inertia must be > 0, got {}",
                self.inertia
            )));
        }
        if self.resistance <= 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "resistance must be > 0, got {}",
                self.resistance
            )));
        }
        if self.interaction_cutoff <= 0.0 {
            return Err(AxiomError::InvalidConfig(format!(
                "interaction_cutoff must be > 0, got {}",
                self.interaction_cutoff
            )));
        }
        if !(self.activation_threshold > 0.0 && self.activation_threshold <= MAX_ACTIVATION) {
            return Err(AxiomError::InvalidConfig(format!(
                "activation_threshold must be in (0, {MAX_ACTIVATION}], got {}",
                self.activation_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.activation_decay) {
            return Err(AxiomError::InvalidConfig(format!(
                "activation_decay must be in [0, 1], got {}",
                self.activation_decay
            )));
        }
        if !(0.0..=1.0).contains(&self.activation_coupling) {
            return Err(AxiomError::InvalidConfig(format!(
                "activation_coupling must be in [0, 1], got {}",
                self.activation_coupling
            )));
        }
        Ok(())
    }
}

// =============================================================================
// SNAPSHOT & PURE EVOLUTION
// =============================================================================

/// A member token as seen at tick start.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenView {
    pub id: TokenId,
    pub version: Version,
    pub embedding: Vec<f32>,
    pub state: PhysicalState,
}

/// Immutable view of a domain's members and the bonds between them.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainSnapshot {
    pub domain: DomainId,
    /// Members in id order.
    pub tokens: Vec<TokenView>,
    /// Summed signed connection weight per unordered member pair. A pair is
    /// present when at least one connection joins it.
    pub bonds: BTreeMap<(TokenId, TokenId), f32>,
}

fn ordered_pair(a: TokenId, b: TokenId) -> (TokenId, TokenId) {
    if a <= b { (a, b) } else { (b, a) }
}

impl DomainSnapshot {
    /// Capture the current members of `domain`. Call under a read lock.
    #[must_use]
    pub fn capture(graph: &Graph, domain: DomainId) -> Self {
        let tokens: Vec<TokenView> = graph
            .members(domain)
            .filter_map(|id| graph.get_token(id))
            .map(|token| TokenView {
                id: token.id,
                version: token.version,
                embedding: token.embedding.clone(),
                state: token.state.clone(),
            })
            .collect();

        let mut bonds = BTreeMap::new();
        for view in &tokens {
            for connection in graph.connections_of(view.id) {
                let Some(other) = connection.other(view.id) else {
                    continue;
                };
                // Count each connection once, from its lower endpoint, and
                // only when both endpoints belong to the domain.
                if other <= view.id {
                    continue;
                }
                let in_domain = graph
                    .get_token(other)
                    .is_some_and(|t| t.domain == Some(domain));
                if in_domain {
                    *bonds.entry(ordered_pair(view.id, other)).or_insert(0.0) +=
                        connection.bond();
                }
            }
        }

        Self {
            domain,
            tokens,
            bonds,
        }
    }

    #[must_use]
    pub fn bond(&self, a: TokenId, b: TokenId) -> Option<f32> {
        self.bonds.get(&ordered_pair(a, b)).copied()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// New state for one token, valid only if the token is still at `expected`.
#[derive(Debug, Clone, PartialEq)]
pub struct StateUpdate {
    pub token: TokenId,
    pub expected: Version,
    pub state: PhysicalState,
}

/// Result of evolving a snapshot by one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evolution {
    /// States that changed, in token-id order.
    pub updates: Vec<StateUpdate>,
    /// Tokens whose activation rose through the threshold, with the new
    /// activation, in token-id order.
    pub crossings: Vec<(TokenId, f32)>,
    /// Unconnected crossing pairs within the cutoff, with their embedding
    /// similarity, in pair order.
    pub link_pairs: Vec<(TokenId, TokenId, f32)>,
    /// Tokens whose computed state was not finite and was left unchanged.
    pub unstable: Vec<TokenId>,
}

/// Unit vector from `from` to `to` and their distance, separating coincident
/// positions along the first axis by id order.
fn direction(from: &TokenView, to: &TokenView) -> (Vec<f64>, f64) {
    let dim = from.state.dim();
    let delta: Vec<f64> = (0..dim)
        .map(|k| {
            let a = f64::from(from.state.position.get(k).copied().unwrap_or(0.0));
            let b = f64::from(to.state.position.get(k).copied().unwrap_or(0.0));
            b - a
        })
        .collect();
    let distance = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
    if distance < f64::from(MIN_SEPARATION) {
        let mut axis = vec![0.0; dim];
        if let Some(first) = axis.first_mut() {
            *first = if from.id < to.id { 1.0 } else { -1.0 };
        }
        return (axis, f64::from(MIN_SEPARATION));
    }
    (delta.iter().map(|d| d / distance).collect(), distance)
}

/// Evolve a snapshot by one tick.
///
/// `impulses` holds the activation delivered to each token by signals
/// received since the previous tick. Absent tokens in `impulses` are ignored.
#[must_use]
pub fn evolve(
    snapshot: &DomainSnapshot,
    constants: &DomainConstants,
    impulses: &BTreeMap<TokenId, f32>,
) -> Evolution {
    let attraction = f64::from(constants.attraction);
    let repulsion = f64::from(constants.repulsion);
    let cutoff = f64::from(constants.interaction_cutoff);
    let max_force = f64::from(MAX_PAIR_FORCE);

    let mut evolution = Evolution::default();
    let mut next_states: Vec<Option<PhysicalState>> = Vec::with_capacity(snapshot.tokens.len());

    for token in &snapshot.tokens {
        let dim = token.state.dim();
        let mut force = vec![0.0_f64; dim];
        let mut shared = 0.0_f64;
        let mut neighbours = 0usize;

        for other in &snapshot.tokens {
            if other.id == token.id {
                continue;
            }
            let (unit, distance) = direction(token, other);
            if distance > cutoff {
                continue;
            }
            let similarity = f64::from(cosine_similarity(&token.embedding, &other.embedding).max(0.0));
            let bond = f64::from(snapshot.bond(token.id, other.id).unwrap_or(0.0));
            let pull = attraction * (similarity + bond);
            let push = repulsion / (distance * distance);
            let magnitude = (pull - push).clamp(-max_force, max_force);
            for (f, u) in force.iter_mut().zip(&unit) {
                *f += u * magnitude;
            }
            shared += similarity * f64::from(other.state.activation);
            neighbours += 1;
        }

        let inertia = f64::from(constants.inertia);
        let damping = 1.0 + f64::from(constants.resistance);
        let velocity: Vec<f32> = (0..dim)
            .map(|k| {
                let v = f64::from(token.state.velocity.get(k).copied().unwrap_or(0.0));
                ((v + force[k] / inertia) / damping) as f32
            })
            .collect();
        let position: Vec<f32> = token
            .state
            .position
            .iter()
            .zip(&velocity)
            .map(|(p, v)| p + v)
            .collect();

        let impulse = f64::from(impulses.get(&token.id).copied().unwrap_or(0.0));
        let share = if neighbours > 0 {
            f64::from(constants.activation_coupling) * shared / neighbours as f64
        } else {
            0.0
        };
        let decayed = f64::from(token.state.activation) * (1.0 - f64::from(constants.activation_decay));
        let activation = (decayed + impulse + share).clamp(0.0, f64::from(MAX_ACTIVATION)) as f32;

        let state = PhysicalState {
            position,
            velocity,
            activation,
        };
        if state.is_finite() {
            next_states.push(Some(state));
        } else {
            evolution.unstable.push(token.id);
            next_states.push(None);
        }
    }

    for (token, next) in snapshot.tokens.iter().zip(next_states) {
        let Some(state) = next else {
            continue;
        };
        let threshold = constants.activation_threshold;
        if token.state.activation < threshold && state.activation >= threshold {
            evolution.crossings.push((token.id, state.activation));
        }
        if !state.same_bits(&token.state) {
            evolution.updates.push(StateUpdate {
                token: token.id,
                expected: token.version,
                state,
            });
        }
    }

    // Co-firing pairs, measured at their new positions.
    let positions: BTreeMap<TokenId, &PhysicalState> = snapshot
        .tokens
        .iter()
        .map(|t| (t.id, &t.state))
        .chain(evolution.updates.iter().map(|u| (u.token, &u.state)))
        .collect();
    let views: BTreeMap<TokenId, &TokenView> = snapshot.tokens.iter().map(|t| (t.id, t)).collect();
    for (i, &(a, _)) in evolution.crossings.iter().enumerate() {
        for &(b, _) in &evolution.crossings[i + 1..] {
            if snapshot.bond(a, b).is_some() {
                continue;
            }
            let (Some(state_a), Some(state_b)) = (positions.get(&a), positions.get(&b)) else {
                continue;
            };
            if state_a.distance_to(state_b) > constants.interaction_cutoff {
                continue;
            }
            let similarity = match (views.get(&a), views.get(&b)) {
                (Some(x), Some(y)) => cosine_similarity(&x.embedding, &y.embedding).max(0.0),
                _ => 0.0,
            };
            evolution.link_pairs.push((a, b, similarity));
        }
    }

    evolution
}

// =============================================================================
// DOMAIN
// =============================================================================

/// What the associative memory remembers about an activation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Recognition {
    pub count: u32,
    pub last_activation: f32,
}

/// Output of one domain step.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainStep {
    pub domain: DomainId,
    /// `false` when no `SystemTick` was received and the domain stood still.
    pub advanced: bool,
    pub tick: Tick,
    pub updates: Vec<StateUpdate>,
    pub proposals: Vec<ActionProposal>,
    pub signals_received: usize,
    pub unstable: Vec<TokenId>,
}

impl DomainStep {
    /// A step in which the domain stood still.
    #[must_use]
    pub fn idle(domain: DomainId, tick: Tick, signals_received: usize) -> Self {
        Self {
            domain,
            advanced: false,
            tick,
            updates: Vec::new(),
            proposals: Vec::new(),
            signals_received,
            unstable: Vec::new(),
        }
    }
}

/// A bounded partition with local physical constants.
#[derive(Debug)]
pub struct Domain {
    id: DomainId,
    name: String,
    constants: DomainConstants,
    tick: Tick,
    version: Version,
    memory: AssociativeMemory<Fingerprint, Recognition>,
    mailbox: Option<Mailbox>,
    /// Impulses absorbed but not yet applied by a tick.
    pending: BTreeMap<TokenId, f32>,
}

impl Domain {
    pub fn new(
        id: DomainId,
        name: impl Into<String>,
        constants: DomainConstants,
        memory_capacity: usize,
    ) -> Result<Self, AxiomError> {
        constants.validate()?;
        Ok(Self {
            id,
            name: name.into(),
            constants,
            tick: Tick::ZERO,
            version: Version::INITIAL,
            memory: AssociativeMemory::new(memory_capacity)?,
            mailbox: None,
            pending: BTreeMap::new(),
        })
    }

    #[must_use]
    pub fn id(&self) -> DomainId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    #[must_use]
    pub fn constants(&self) -> &DomainConstants {
        &self.constants
    }

    /// Replace the constants after validating them. Bumps the version.
    pub fn set_constants(&mut self, constants: DomainConstants) -> Result<Version, AxiomError> {
        constants.validate()?;
        self.constants = constants;
        self.version = self.version.bump();
        Ok(self.version)
    }

    #[must_use]
    pub fn tick(&self) -> Tick {
        self.tick
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    #[must_use]
    pub fn memory_stats(&self) -> MemoryStats {
        self.memory.stats()
    }

    /// Restore tick and version from a snapshot.
    pub fn restore_clock(&mut self, tick: Tick, version: Version) {
        self.tick = tick;
        self.version = version;
        self.memory.advance_to(tick);
    }

    /// Attach the mailbox through which this domain receives signals.
    pub fn attach(&mut self, mailbox: Mailbox) {
        self.mailbox = Some(mailbox);
    }

    /// Detach the mailbox, e.g. to unsubscribe it.
    pub fn detach(&mut self) -> Option<Mailbox> {
        self.mailbox.take()
    }

    /// Drain the mailbox and, if a `SystemTick` arrived, evolve one tick.
    pub fn step(&mut self, snapshot: &DomainSnapshot) -> DomainStep {
        let mut advance_to: Option<Tick> = None;
        let mut received = 0usize;

        let deliveries = self.mailbox.as_ref().map(Mailbox::drain).unwrap_or_default();
        for delivery in deliveries {
            received += 1;
            let signal = &delivery.signal;
            match (&signal.kind, &signal.payload) {
                (SignalKind::Input, SignalPayload::Activation { tokens, strength }) => {
                    for token in tokens {
                        *self.pending.entry(*token).or_insert(0.0) += *strength;
                    }
                    tracing::debug!(
                        domain = %self.id,
                        signal = %signal.id,
                        cause = %signal.cause,
                        tick = signal.tick.0,
                        tokens = tokens.len(),
                        "impulse absorbed"
                    );
                }
                (SignalKind::SystemTick, _) => {
                    advance_to = Some(advance_to.map_or(signal.tick, |t| t.max(signal.tick)));
                }
                _ => {}
            }
        }

        let Some(tick) = advance_to.filter(|t| *t > self.tick) else {
            // Impulses wait for the next tick the domain actually takes.
            return DomainStep::idle(self.id, self.tick, received);
        };

        let impulses = std::mem::take(&mut self.pending);
        self.tick = tick;
        self.memory.advance_to(tick);

        let evolution = evolve(snapshot, &self.constants, &impulses);
        let proposals = self.propose(&evolution);

        tracing::debug!(
            domain = %self.id,
            tick = tick.0,
            members = snapshot.tokens.len(),
            updates = evolution.updates.len(),
            proposals = proposals.len(),
            "domain evolved"
        );

        DomainStep {
            domain: self.id,
            advanced: true,
            tick,
            updates: evolution.updates,
            proposals,
            signals_received: received,
            unstable: evolution.unstable,
        }
    }

    /// Turn an evolution into action proposals, consulting memory.
    fn propose(&mut self, evolution: &Evolution) -> Vec<ActionProposal> {
        let mut proposals = Vec::new();

        for &(token, activation) in &evolution.crossings {
            let (source, familiarity) = self.recognise(Fingerprint::token(token, self.id), activation);
            proposals.push(ActionProposal {
                domain: self.id,
                token,
                resource: ResourceKey::Actor(self.id),
                kind: ActionKind::Fire { token },
                priority: activation * familiarity,
                source,
            });
        }

        for &(from, to, similarity) in &evolution.link_pairs {
            let mean = evolution
                .crossings
                .iter()
                .filter(|(t, _)| *t == from || *t == to)
                .map(|(_, a)| *a)
                .sum::<f32>()
                / 2.0;
            let (source, familiarity) =
                self.recognise(Fingerprint::sequence(&[from, to]), mean);
            proposals.push(ActionProposal {
                domain: self.id,
                token: from,
                resource: ResourceKey::Structure(self.id),
                kind: ActionKind::Link { from, to },
                priority: mean * similarity * familiarity,
                source,
            });
        }
        proposals
    }

    /// Look up and refresh a memory entry. Returns the decision source and
    /// the priority multiplier earned by familiarity.
    fn recognise(&mut self, key: Fingerprint, activation: f32) -> (DecisionSource, f32) {
        let previous = self.memory.get(&key).map(|entry| entry.value.count);
        let count = previous.unwrap_or(0).saturating_add(1);
        self.memory.put(
            key,
            Recognition {
                count,
                last_activation: activation,
            },
        );
        match previous {
            Some(seen) => {
                let boost = 1.0 + FAMILIARITY_GAIN * seen.min(FAMILIARITY_CAP) as f32;
                (DecisionSource::Reflex, boost)
            }
            None => (DecisionSource::Deliberate, 1.0),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
