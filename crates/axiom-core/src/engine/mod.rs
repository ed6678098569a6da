//! # Engine
//!
//! Wires the components into the signal-driven pipeline:
//!
//! ```text
//! external input -> Gateway -> Signal System -> Domains (parallel)
//!                -> Action Controller -> Hybrid Learning -> Graph Store
//! ```
//!
//! All state is per engine. Several engines can run side by side in one
//! process.
//!
//! ## Tick
//!
//! 1. Capture metrics and emit `SystemTick` (broadcast, caused by nothing).
//! 2. Dispatch: every signal queued since the last tick reaches its
//!    subscribers, impulses first, in emission order.
//! 3. Snapshot every domain under a short read lock.
//! 4. Step all domains in parallel over their snapshots.
//! 5. Write state updates back under a short write lock, in domain order.
//!    Updates made stale in between are skipped.
//! 6. Admit and arbitrate candidates; emit one `ActionDecided` per decision.
//! 7. With `learning.auto_link`, turn winning `Link` decisions into
//!    connections.
//! 8. Dispatch the tick's own signals and hand committed mutations to
//!    observers, outside every lock.

mod registry;

pub use registry::DomainRegistry;

use crate::config::{DomainConfig, EngineConfig};
use crate::controller::{ActionController, ArbiterStats, AuditRecord, Decision};
use crate::domain::{Domain, DomainConstants};
use crate::export::{EngineSnapshot, decode_snapshot, encode_snapshot, snapshot_hash};
use crate::feedback::{FeedbackProcessor, FeedbackStats};
use crate::gateway::{
    CuriosityQueue, Embedder, Gateway, GatewayContext, GatewayStats, HashingEmbedder,
    InputSignal, ProcessedSignal, UnresolvedInput,
};
use crate::graph::{Graph, GraphOptions, GraphStore, SharedGraph, TokenUpdate};
use crate::journal::MutationObserver;
use crate::learning::{HybridLearning, HybridLearningStats, Proposal, ProposalOutcome};
use crate::signals::{
    BusStats, Cause, DispatchReport, Mailbox, SignalBus, SignalKind, SignalPayload, SignalTarget,
    SubscriptionFilter,
};
use crate::system::SystemMetrics;
use crate::types::{
    AxiomError, CandidateId, Connection, ConnectionId, DomainId, EntityRef, SignalId, SubscriberId,
    Tick, Token, TokenId, Version,
};
use std::sync::Arc;

// =============================================================================
// REPORTS
// =============================================================================

/// What one tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: Tick,
    /// Metrics captured at tick start, as carried by `SystemTick`.
    pub metrics: SystemMetrics,
    pub system_tick: SignalId,
    pub dispatched: DispatchReport,
    pub domains_advanced: usize,
    pub state_updates: usize,
    /// Updates skipped because the token changed or vanished meanwhile.
    pub stale_updates: usize,
    /// Tokens whose evolution produced non-finite state and were held.
    pub unstable_tokens: Vec<TokenId>,
    pub decisions: Vec<Decision>,
    /// Connections created from `Link` decisions.
    pub links_created: Vec<ConnectionId>,
}

/// Read-only view of a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainInfo {
    pub id: DomainId,
    pub name: String,
    pub constants: DomainConstants,
    pub tick: Tick,
    pub version: Version,
    pub members: usize,
}

/// What happens to the members of a removed domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberPolicy {
    Reassign(DomainId),
    Orphan,
}

/// Counters of every component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineStats {
    pub gateway: GatewayStats,
    pub bus: BusStats,
    pub arbiter: ArbiterStats,
    pub feedback: FeedbackStats,
    pub learning: HybridLearningStats,
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builds an [`Engine`] from configuration and injected collaborators.
pub struct EngineBuilder {
    config: EngineConfig,
    embedder: Option<Arc<dyn Embedder>>,
    curiosity: Option<Arc<dyn CuriosityQueue>>,
    observers: Vec<Arc<dyn MutationObserver>>,
    snapshot: Option<EngineSnapshot>,
}

impl EngineBuilder {
    /// Replace the default hashed-trigram embedder.
    #[must_use]
    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Where unresolved inputs go.
    #[must_use]
    pub fn curiosity(mut self, queue: Arc<dyn CuriosityQueue>) -> Self {
        self.curiosity = Some(queue);
        self
    }

    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn MutationObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Start from a snapshot instead of an empty graph. The snapshot's
    /// domains replace the configured ones.
    #[must_use]
    pub fn snapshot(mut self, snapshot: EngineSnapshot) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    /// Start from canonical snapshot bytes.
    pub fn snapshot_bytes(self, bytes: &[u8]) -> Result<Self, AxiomError> {
        Ok(self.snapshot(decode_snapshot(bytes)?))
    }

    pub fn build(self) -> Result<Engine, AxiomError> {
        let config = self.config;
        config.validate()?;

        let options = GraphOptions::from_config(&config);
        let embedder: Arc<dyn Embedder> = match self.embedder {
            Some(embedder) => embedder,
            None => Arc::new(HashingEmbedder::new(config.embedding_dim)?),
        };
        let gateway = Gateway::new(
            config.gateway.clone(),
            config.embedding_dim,
            embedder,
            self.curiosity,
        )?;
        let feedback = FeedbackProcessor::new(&config.learning, config.gateway.default_domain);
        let mut learning =
            HybridLearning::new(config.learning.reject_duplicate_keys, config.learning.link_weight);
        let mut controller = ActionController::new(&config.arbiter);
        let bus = SignalBus::new();

        let (graph, tick, domains, resume) = match self.snapshot {
            Some(snapshot) => {
                let graph = snapshot.restore_graph(options)?;
                controller.resume_from(CandidateId(snapshot.next_candidate_id));
                controller.set_policy_version(snapshot.policy_version);
                learning.restore_keys(snapshot.applied_keys);
                let mut domains = Vec::with_capacity(snapshot.domains.len());
                for record in snapshot.domains {
                    let mut domain = Domain::new(
                        record.id,
                        record.name,
                        record.constants,
                        config.memory.capacity,
                    )?;
                    domain.restore_clock(record.tick, record.version);
                    domains.push(domain);
                }
                (graph, snapshot.tick, domains, Some(SignalId(snapshot.next_signal_id)))
            }
            None => {
                let domains = config
                    .domains
                    .iter()
                    .map(|d| Domain::new(d.id, d.name.clone(), d.constants, config.memory.capacity))
                    .collect::<Result<Vec<_>, _>>()?;
                (Graph::new(options), Tick::ZERO, domains, None)
            }
        };

        let mut engine = Engine {
            graph: graph.into_shared(),
            bus,
            domains: DomainRegistry::new(),
            gateway,
            feedback,
            learning,
            controller,
            observers: self.observers,
            tick,
            next_external: 0,
            shut_down: false,
            config,
        };
        for domain in domains {
            engine.install_domain(domain)?;
        }
        // Subscriptions above take fresh ids; numbering then continues
        // where the snapshot left off.
        if let Some(next) = resume {
            engine.bus.resume_from(next);
        }
        {
            let mut graph = engine.graph.write();
            graph.set_tick(engine.tick);
            engine.domains.flush_into(&mut graph);
        }
        engine.flush_events();

        tracing::info!(
            tick = engine.tick.0,
            domains = engine.domains.len(),
            tokens = engine.graph.read().token_count(),
            policy = engine.controller.policy_version(),
            "engine ready"
        );
        Ok(engine)
    }
}

// =============================================================================
// ENGINE
// =============================================================================

/// The semantic physics engine.
pub struct Engine {
    config: EngineConfig,
    graph: SharedGraph,
    bus: SignalBus,
    domains: DomainRegistry,
    gateway: Gateway,
    feedback: FeedbackProcessor,
    learning: HybridLearning,
    controller: ActionController,
    observers: Vec<Arc<dyn MutationObserver>>,
    tick: Tick,
    next_external: u64,
    shut_down: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("tick", &self.tick)
            .field("domains", &self.domains.len())
            .field("observers", &self.observers.len())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

impl Engine {
    #[must_use]
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            embedder: None,
            curiosity: None,
            observers: Vec::new(),
            snapshot: None,
        }
    }

    /// An engine with default collaborators.
    pub fn new(config: EngineConfig) -> Result<Self, AxiomError> {
        Self::builder(config).build()
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The last completed tick.
    #[must_use]
    pub fn current_tick(&self) -> Tick {
        self.tick
    }

    /// Shared handle to the Graph Store, for read access by API layers.
    #[must_use]
    pub fn graph(&self) -> SharedGraph {
        Arc::clone(&self.graph)
    }

    pub fn add_observer(&mut self, observer: Arc<dyn MutationObserver>) {
        self.observers.push(observer);
    }

    // -------------------------------------------------------------------------
    // Input
    // -------------------------------------------------------------------------

    /// Submit an external input. The resulting signal is delivered at the
    /// start of the next tick.
    pub fn submit(&mut self, input: InputSignal) -> Result<ProcessedSignal, AxiomError> {
        let cause = self.external_cause();
        self.submit_with_cause(input, cause)
    }

    /// Re-submit an input parked in the curiosity queue, e.g. after a
    /// collaborator created a token for it. The new signal carries the
    /// original cause.
    pub fn reoffer(&mut self, item: UnresolvedInput) -> Result<ProcessedSignal, AxiomError> {
        tracing::debug!(cause = %item.cause, from_tick = item.tick.0, "input re-offered");
        self.submit_with_cause(item.input, item.cause)
    }

    fn submit_with_cause(
        &mut self,
        input: InputSignal,
        cause: Cause,
    ) -> Result<ProcessedSignal, AxiomError> {
        self.ensure_running()?;
        let domains = self.domains.id_set();
        let result = self.gateway.process(
            GatewayContext {
                graph: &self.graph,
                bus: &mut self.bus,
                feedback: &mut self.feedback,
                domains: &domains,
                tick: self.tick,
            },
            input,
            cause,
        );
        self.flush_events();
        result
    }

    /// Apply a learning proposal and announce it with `ProposalApplied`.
    pub fn apply_proposal(&mut self, proposal: &Proposal) -> Result<ProposalOutcome, AxiomError> {
        self.ensure_running()?;
        let cause = self.external_cause();
        let result = self.apply_proposal_with(proposal, cause);
        self.flush_events();
        result.map(|(outcome, _)| outcome)
    }

    fn apply_proposal_with(
        &mut self,
        proposal: &Proposal,
        cause: Cause,
    ) -> Result<(ProposalOutcome, SignalId), AxiomError> {
        let outcome = {
            let mut graph = self.graph.write();
            graph.set_tick(self.tick);
            let result = self.learning.apply(&mut graph, &mut self.domains, proposal);
            self.domains.flush_into(&mut graph);
            result?
        };
        let signal = self.bus.emit(
            SignalKind::ProposalApplied,
            SignalPayload::Proposal(outcome.clone()),
            cause,
            SignalTarget::Broadcast,
            self.tick,
        )?;
        tracing::info!(
            signal = %signal,
            cause = %cause,
            tick = self.tick.0,
            proposal = proposal.label(),
            changes = outcome.changes.len(),
            "proposal applied"
        );
        Ok((outcome, signal))
    }

    // -------------------------------------------------------------------------
    // Tick
    // -------------------------------------------------------------------------

    /// Advance every domain by one tick.
    pub fn tick(&mut self) -> Result<TickReport, AxiomError> {
        self.ensure_running()?;
        let tick = self.tick.next();

        let metrics = self.capture_metrics(tick);
        let system_tick = self.bus.emit(
            SignalKind::SystemTick,
            SignalPayload::Tick(metrics.clone()),
            Cause::None,
            SignalTarget::Broadcast,
            tick,
        )?;
        let dispatched = self.bus.dispatch();

        let snapshots = {
            let graph = self.graph.read();
            self.domains.capture(&graph)
        };
        let steps = self.domains.step_all(&snapshots);

        let mut state_updates = 0;
        let mut stale_updates = 0;
        let mut unstable_tokens = Vec::new();
        let mut proposals = Vec::new();
        let mut domains_advanced = 0;
        {
            let mut graph = self.graph.write();
            graph.set_tick(tick);
            for step in steps {
                if step.advanced {
                    domains_advanced += 1;
                }
                for update in step.updates {
                    match graph.update_token(
                        update.token,
                        Some(update.expected),
                        TokenUpdate::state(update.state),
                    ) {
                        Ok(_) => state_updates += 1,
                        Err(AxiomError::NotFound(_) | AxiomError::VersionConflict { .. }) => {
                            stale_updates += 1;
                            tracing::trace!(token = %update.token, tick = tick.0, "stale update skipped");
                        }
                        Err(err) => return Err(err),
                    }
                }
                unstable_tokens.extend(step.unstable);
                proposals.extend(step.proposals);
            }
        }
        for token in &unstable_tokens {
            tracing::warn!(token = %token, tick = tick.0, "non-finite state held");
        }

        let candidates = self.controller.admit(tick, proposals);
        let decisions = self.controller.arbitrate(tick, candidates);

        self.tick = tick;
        let mut links_created = Vec::new();
        for decision in &decisions {
            let decided = self.bus.emit(
                SignalKind::ActionDecided,
                SignalPayload::Decision(decision.clone()),
                Cause::Signal(system_tick),
                SignalTarget::Domain(decision.winner.domain),
                tick,
            )?;
            if !self.config.learning.auto_link {
                continue;
            }
            let Some(proposal) = self.learning.link_proposal(decision) else {
                continue;
            };
            match self.apply_proposal_with(&proposal, Cause::Signal(decided)) {
                Ok((outcome, _)) => {
                    links_created.extend(outcome.created.iter().filter_map(|e| match e {
                        EntityRef::Connection(id) => Some(*id),
                        _ => None,
                    }));
                }
                Err(err) => {
                    tracing::debug!(candidate = %decision.winner.id, error = %err, "link not created");
                }
            }
        }

        self.bus.dispatch();
        self.flush_events();

        tracing::info!(
            tick = tick.0,
            signal = %system_tick,
            advanced = domains_advanced,
            updates = state_updates,
            decisions = decisions.len(),
            "tick complete"
        );

        Ok(TickReport {
            tick,
            metrics,
            system_tick,
            dispatched,
            domains_advanced,
            state_updates,
            stale_updates,
            unstable_tokens,
            decisions,
            links_created,
        })
    }

    /// Run `ticks` ticks back to back.
    pub fn run(&mut self, ticks: u64) -> Result<Vec<TickReport>, AxiomError> {
        (0..ticks).map(|_| self.tick()).collect()
    }

    // -------------------------------------------------------------------------
    // Subscribers & signals
    // -------------------------------------------------------------------------

    pub fn subscribe(&mut self, filter: SubscriptionFilter) -> Result<Mailbox, AxiomError> {
        self.bus.subscribe(filter, self.tick)
    }

    pub fn unsubscribe(&mut self, id: SubscriberId) -> Result<SignalId, AxiomError> {
        self.bus.unsubscribe(id, self.tick)
    }

    pub fn register_signal_kind(&mut self, name: &str) -> Result<SignalKind, AxiomError> {
        self.bus.register_kind(name)
    }

    /// Emit a signal on behalf of an external actor. The kind is given as a
    /// tag and may be a registered extension.
    pub fn emit(
        &mut self,
        tag: &str,
        payload: SignalPayload,
        target: SignalTarget,
    ) -> Result<SignalId, AxiomError> {
        self.ensure_running()?;
        let cause = self.external_cause();
        self.bus.emit_tagged(tag, payload, cause, target, self.tick)
    }

    /// Deliver every queued signal now.
    pub fn drain(&mut self) -> DispatchReport {
        let report = self.bus.dispatch();
        self.flush_events();
        report
    }

    /// Drain in-flight signals and refuse further work.
    pub fn shutdown(&mut self) -> DispatchReport {
        let report = self.drain();
        self.shut_down = true;
        tracing::info!(
            tick = self.tick.0,
            delivered = report.deliveries,
            "engine shut down"
        );
        report
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    // -------------------------------------------------------------------------
    // Domains
    // -------------------------------------------------------------------------

    /// Add a domain at runtime.
    pub fn add_domain(&mut self, config: DomainConfig) -> Result<(), AxiomError> {
        if config.name.trim().is_empty() {
            return Err(AxiomError::InvalidInput("domain name must not be empty".to_string()));
        }
        let domain = Domain::new(
            config.id,
            config.name,
            config.constants,
            self.config.memory.capacity,
        )?;
        self.install_domain(domain)?;
        {
            let mut graph = self.graph.write();
            graph.set_tick(self.tick);
            self.domains.flush_into(&mut graph);
        }
        self.flush_events();
        Ok(())
    }

    /// Remove a domain after reassigning or orphaning its members. Returns
    /// the number of members moved.
    pub fn remove_domain(&mut self, id: DomainId, members: MemberPolicy) -> Result<usize, AxiomError> {
        self.domains.get(id)?;
        let target = match members {
            MemberPolicy::Reassign(target) if target == id => {
                return Err(AxiomError::InvalidInput(format!(
                    "cannot reassign members of {id} to itself"
                )));
            }
            MemberPolicy::Reassign(target) => {
                self.domains.get(target)?;
                Some(target)
            }
            MemberPolicy::Orphan => None,
        };

        let moved = {
            let mut graph = self.graph.write();
            graph.set_tick(self.tick);
            let member_ids: Vec<TokenId> = graph.members(id).collect();
            for token in &member_ids {
                graph.move_token(*token, target, None)?;
            }
            member_ids.len()
        };

        let mut domain = self.domains.remove(id)?;
        if let Some(mailbox) = domain.detach() {
            self.bus.unsubscribe(mailbox.id(), self.tick)?;
        }
        {
            let mut graph = self.graph.write();
            self.domains.flush_into(&mut graph);
        }
        self.flush_events();
        tracing::info!(domain = %id, moved, reassigned_to = ?target, "domain removed");
        Ok(moved)
    }

    fn install_domain(&mut self, mut domain: Domain) -> Result<(), AxiomError> {
        let id = domain.id();
        if self.domains.get(id).is_ok() {
            return Err(AxiomError::InvalidInput(format!("domain {id} already exists")));
        }
        let mailbox = self.bus.subscribe(
            SubscriptionFilter::kinds([SignalKind::Input, SignalKind::SystemTick]).in_domain(id),
            self.tick,
        )?;
        domain.attach(mailbox);
        self.domains.insert(domain)?;
        tracing::debug!(domain = %id, "domain installed");
        Ok(())
    }

    /// Change a domain's display name.
    pub fn rename_domain(&mut self, id: DomainId, name: &str) -> Result<(), AxiomError> {
        if name.trim().is_empty() {
            return Err(AxiomError::InvalidInput("domain name must not be empty".to_string()));
        }
        self.domains.get_mut(id)?.rename(name);
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Queries
    // -------------------------------------------------------------------------

    pub fn token(&self, id: TokenId) -> Result<Token, AxiomError> {
        self.graph.read().token(id)
    }

    pub fn connection(&self, id: ConnectionId) -> Result<Connection, AxiomError> {
        self.graph.read().connection(id)
    }

    pub fn domain(&self, id: DomainId) -> Result<DomainInfo, AxiomError> {
        let domain = self.domains.get(id)?;
        Ok(DomainInfo {
            id,
            name: domain.name().to_string(),
            constants: *domain.constants(),
            tick: domain.tick(),
            version: domain.version(),
            members: self.graph.read().member_count(id),
        })
    }

    /// All domains in id order.
    #[must_use]
    pub fn domains(&self) -> Vec<DomainInfo> {
        self.domains.ids().filter_map(|id| self.domain(id).ok()).collect()
    }

    /// Embed a word with the Gateway's embedder.
    pub fn embed(&self, word: &str) -> Result<Vec<f32>, AxiomError> {
        self.gateway.embedder().embed(word)
    }

    pub fn shortest_path(
        &self,
        from: TokenId,
        to: TokenId,
    ) -> Result<Option<Vec<ConnectionId>>, AxiomError> {
        self.graph.read().shortest_path(from, to)
    }

    pub fn neighbors(&self, token: TokenId, radius: usize) -> Result<Vec<(TokenId, usize)>, AxiomError> {
        self.graph.read().neighbors(token, radius)
    }

    /// Aggregate state at the last completed tick.
    #[must_use]
    pub fn metrics(&self) -> SystemMetrics {
        self.capture_metrics(self.tick)
    }

    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.controller.audit_log().cloned().collect()
    }

    #[must_use]
    pub fn policy_version(&self) -> u32 {
        self.controller.policy_version()
    }

    pub fn set_policy_version(&mut self, version: u32) {
        self.controller.set_policy_version(version);
    }

    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            gateway: self.gateway.stats(),
            bus: self.bus.stats(),
            arbiter: self.controller.stats(),
            feedback: self.feedback.stats(),
            learning: self.learning.stats(),
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// Complete state in canonical order. Caches are not included.
    #[must_use]
    pub fn snapshot(&self) -> EngineSnapshot {
        let graph = self.graph.read();
        let (next_token_id, next_connection_id) = graph.next_ids();
        EngineSnapshot {
            tick: self.tick,
            policy_version: self.controller.policy_version(),
            next_token_id,
            next_connection_id,
            next_signal_id: self.bus.next_signal_id().0,
            next_candidate_id: self.controller.next_candidate_id().0,
            tokens: graph.tokens().cloned().collect(),
            connections: graph.connections().cloned().collect(),
            domains: self.domains.records(),
            applied_keys: self.learning.applied_keys().map(str::to_string).collect(),
        }
    }

    /// Canonical snapshot bytes.
    pub fn export(&self) -> Result<Vec<u8>, AxiomError> {
        encode_snapshot(&self.snapshot())
    }

    /// BLAKE3 hash of the canonical snapshot, as hex.
    pub fn state_hash(&self) -> Result<String, AxiomError> {
        Ok(snapshot_hash(&self.export()?))
    }

    // -------------------------------------------------------------------------
    // Internals
    // -------------------------------------------------------------------------

    fn external_cause(&mut self) -> Cause {
        let cause = Cause::External(self.next_external);
        self.next_external = self.next_external.saturating_add(1);
        cause
    }

    fn ensure_running(&self) -> Result<(), AxiomError> {
        if self.shut_down {
            return Err(AxiomError::InvalidInput("engine is shut down".to_string()));
        }
        Ok(())
    }

    fn capture_metrics(&self, tick: Tick) -> SystemMetrics {
        let samples = self.domains.samples();
        SystemMetrics::capture(&self.graph.read(), tick, &samples)
    }

    /// Hand committed mutations to observers. No lock is held during the
    /// calls.
    fn flush_events(&mut self) {
        let events = self.graph.write().drain_events();
        if events.is_empty() || self.observers.is_empty() {
            return;
        }
        for event in &events {
            for observer in &self.observers {
                observer.on_mutation(event);
            }
        }
    }
}
