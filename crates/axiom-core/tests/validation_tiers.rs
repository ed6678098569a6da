//! # Validation Tier Tests (T0-T7)
//!
//! If ANY tier fails, the system is INVALID.
//!
//! ## Tiers
//! - T0: Determinism
//! - T1: Associative Memory eviction
//! - T2: Graph traversal
//! - T3: Gateway resolution
//! - T4: Action arbitration
//! - T5: Structural proposals
//! - T6: Causal ordering
//! - T7: Store integrity

use axiom_core::controller::{ActionCandidate, ActionController};
use axiom_core::config::ArbiterConfig;
use axiom_core::graph::GraphOptions;
use axiom_core::{
    AxiomError, CandidateId, DomainId, Embedder, Engine, EngineConfig, Graph, GraphStore,
    HashingEmbedder, InputSignal, ProcessedSignal, Resolution, Tick, TokenId, TokenSpec,
};

fn engine_with(config: EngineConfig, words: &[&str]) -> Engine {
    let embedder = HashingEmbedder::new(config.embedding_dim).expect("embedder");
    let engine = Engine::new(config).expect("engine");
    {
        let graph = engine.graph();
        let mut graph = graph.write();
        for (i, word) in words.iter().enumerate() {
            let embedding = embedder.embed(word).expect("embed");
            graph
                .create_token(
                    TokenSpec::new(DomainId(1), embedding)
                        .with_label(*word)
                        .with_position(vec![i as f32 * 0.4, 0.0, 0.0]),
                )
                .expect("token");
        }
    }
    engine
}

// =============================================================================
// TIER T0: DETERMINISM
// =============================================================================

mod t0_determinism {
    use super::*;

    fn run_schedule() -> String {
        let mut config = EngineConfig::default();
        config.learning.auto_link = true;
        let mut engine = engine_with(config, &["cat", "dog", "kitten", "wolf"]);
        for (tick, word) in [(0, "cat"), (0, "kitten"), (2, "dog"), (3, "wolf"), (3, "cat")] {
            while engine.current_tick().value() < tick {
                engine.tick().expect("tick");
            }
            engine.submit(InputSignal::word(word)).expect("submit");
        }
        engine.run(6).expect("run");
        engine.state_hash().expect("hash")
    }

    /// T0.1: Same initial state and input schedule, same snapshot bytes.
    #[test]
    fn identical_runs_identical_snapshots() {
        assert_eq!(run_schedule(), run_schedule());
    }

    /// T0.2: Side-by-side engines do not share state.
    #[test]
    fn engines_are_independent() {
        let mut busy = engine_with(EngineConfig::default(), &["cat"]);
        let idle = engine_with(EngineConfig::default(), &["cat"]);
        busy.submit(InputSignal::word("cat")).expect("submit");
        busy.run(2).expect("run");
        assert_eq!(idle.current_tick(), Tick::ZERO);
        assert_ne!(
            busy.state_hash().expect("hash"),
            idle.state_hash().expect("hash")
        );
    }
}

// =============================================================================
// TIER T1: ASSOCIATIVE MEMORY
// =============================================================================

mod t1_memory {
    use axiom_core::AssociativeMemory;

    /// T1.1: capacity + k puts leave the last `capacity` keys resident.
    #[test]
    fn overflow_keeps_most_recent() {
        let mut memory: AssociativeMemory<u64, u64> = AssociativeMemory::new(4).expect("memory");
        for key in 0..7 {
            memory.put(key, key * 10);
        }
        assert_eq!(memory.len(), 4);
        for key in 0..3 {
            assert!(!memory.contains(&key));
        }
        for key in 3..7 {
            assert!(memory.contains(&key));
        }
    }

    /// T1.2: A get protects its key from the next eviction.
    #[test]
    fn get_protects_from_eviction() {
        let mut memory: AssociativeMemory<u64, u64> = AssociativeMemory::new(2).expect("memory");
        memory.put(1, 1);
        memory.put(2, 2);
        assert!(memory.get(&1).is_some());
        memory.put(3, 3);
        assert!(memory.contains(&1));
        assert!(!memory.contains(&2));
    }
}

// =============================================================================
// TIER T2: GRAPH TRAVERSAL
// =============================================================================

mod t2_traversal {
    use super::*;

    fn diamond() -> (Graph, [TokenId; 4]) {
        let mut graph = Graph::new(GraphOptions {
            embedding_dim: 2,
            state_dim: 2,
            ..GraphOptions::default()
        });
        let mut token = |x: f32| {
            graph
                .create_token(TokenSpec::new(DomainId(1), vec![1.0, x]))
                .expect("token")
        };
        let ids = [token(0.0), token(0.1), token(0.2), token(0.3)];
        (graph, ids)
    }

    /// T2.1: Cheapest route through the diamond is A-B-D.
    #[test]
    fn diamond_shortest_path() {
        let (mut graph, [a, b, c, d]) = diamond();
        let ab = graph.create_connection(a, b, 1.0).expect("edge");
        let bd = graph.create_connection(b, d, 1.0).expect("edge");
        graph.create_connection(a, c, 2.0).expect("edge");
        graph.create_connection(c, d, 2.0).expect("edge");

        assert_eq!(graph.shortest_path(a, d).expect("path"), Some(vec![ab, bd]));
        assert_eq!(graph.shortest_path(a, a).expect("path"), Some(vec![]));
    }

    /// T2.2: Unreachable targets give no path, missing tokens an error.
    #[test]
    fn unreachable_and_missing() {
        let (mut graph, [a, b, _, d]) = diamond();
        graph.create_connection(a, b, 1.0).expect("edge");
        assert_eq!(graph.shortest_path(a, d).expect("path"), None);
        assert!(matches!(
            graph.shortest_path(a, TokenId(99)),
            Err(AxiomError::NotFound(_))
        ));
    }

    /// T2.3: Neighbours are ordered by hop count, then id.
    #[test]
    fn neighbors_by_hops() {
        let (mut graph, [a, b, c, d]) = diamond();
        graph.create_connection(a, b, 1.0).expect("edge");
        graph.create_connection(a, c, 1.0).expect("edge");
        graph.create_connection(c, d, 1.0).expect("edge");

        let found = graph.neighbors(a, 2).expect("neighbors");
        assert_eq!(found, vec![(b, 1), (c, 1), (d, 2)]);
        assert_eq!(graph.neighbors(a, 1).expect("neighbors").len(), 2);
    }
}

// =============================================================================
// TIER T3: GATEWAY
// =============================================================================

mod t3_gateway {
    use super::*;

    /// T3.1: A vector close to "cat" resolves to the cat token.
    #[test]
    fn near_vector_resolves_to_cat() {
        let mut engine = engine_with(EngineConfig::default(), &["cat", "dog"]);
        let cat = engine.graph().read().find_by_label("cat").expect("cat");
        let mut near = engine.token(cat).expect("token").embedding;
        near[0] += 0.01;

        let processed = engine.submit(InputSignal::vector(near)).expect("resolved");
        assert!(matches!(
            processed,
            ProcessedSignal::Activated { token, resolution: Resolution::Nearest { similarity }, .. }
                if token == cat && similarity > 0.99
        ));
    }

    /// T3.2: A far vector without a curiosity queue is unresolved.
    #[test]
    fn far_vector_is_unresolved() {
        let mut engine = engine_with(EngineConfig::default(), &["cat"]);
        let cat = engine.graph().read().find_by_label("cat").expect("cat");
        let far: Vec<f32> = engine
            .token(cat)
            .expect("token")
            .embedding
            .iter()
            .map(|v| -v)
            .collect();

        let err = engine.submit(InputSignal::vector(far)).expect_err("unresolved");
        assert!(matches!(err, AxiomError::UnresolvedInput { queued: false, .. }));
        assert_eq!(engine.stats().gateway.unresolved, 1);
    }
}

// =============================================================================
// TIER T4: ARBITRATION
// =============================================================================

mod t4_arbitration {
    use super::*;
    use axiom_core::{ActionKind, DecisionSource, ResourceKey};

    fn candidate(id: u64, priority: f32) -> ActionCandidate {
        ActionCandidate {
            id: CandidateId(id),
            tick: Tick(1),
            domain: DomainId(1),
            token: TokenId(id),
            resource: ResourceKey::Actor(DomainId(1)),
            kind: ActionKind::Fire { token: TokenId(id) },
            priority,
            policy_version: 1,
            source: DecisionSource::Deliberate,
        }
    }

    /// T4.1: Equal priorities go to the lower candidate id.
    #[test]
    fn tie_goes_to_lower_id() {
        let mut controller = ActionController::new(&ArbiterConfig::default());
        let decisions = controller.arbitrate(Tick(1), vec![candidate(10, 5.0), candidate(7, 5.0)]);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].winner.id, CandidateId(7));
        assert_eq!(decisions[0].losers, vec![CandidateId(10)]);
    }

    /// T4.2: Higher priority wins regardless of id.
    #[test]
    fn priority_beats_id() {
        let mut controller = ActionController::new(&ArbiterConfig::default());
        let decisions = controller.arbitrate(Tick(1), vec![candidate(10, 6.0), candidate(7, 5.0)]);
        assert_eq!(decisions[0].winner.id, CandidateId(10));
    }
}

// =============================================================================
// TIER T5: STRUCTURAL PROPOSALS
// =============================================================================

mod t5_proposals {
    use super::*;
    use axiom_core::{CreateTarget, Proposal};

    fn create(key: Option<&str>) -> Proposal {
        Proposal::Create {
            target: CreateTarget::Token(TokenSpec::new(DomainId(1), vec![0.25; 16])),
            key: key.map(str::to_string),
        }
    }

    /// T5.1: Unkeyed double create yields two distinct tokens.
    #[test]
    fn double_create_distinct() {
        let mut engine = Engine::new(EngineConfig::default()).expect("engine");
        let first = engine.apply_proposal(&create(None)).expect("create");
        let second = engine.apply_proposal(&create(None)).expect("create");
        assert_ne!(first.created, second.created);
        assert_eq!(engine.graph().read().token_count(), 2);
    }

    /// T5.2: Keyed double create is rejected by default.
    #[test]
    fn keyed_double_create_rejected() {
        let mut engine = Engine::new(EngineConfig::default()).expect("engine");
        engine.apply_proposal(&create(Some("seed:cat"))).expect("create");
        let err = engine.apply_proposal(&create(Some("seed:cat"))).expect_err("duplicate");
        assert!(matches!(err, AxiomError::ProposalApplicationFailed(_)));
        assert_eq!(engine.graph().read().token_count(), 1);
    }

    /// T5.3: With rejection disabled, the duplicate is applied but counted.
    #[test]
    fn keyed_double_create_detected() {
        let mut config = EngineConfig::default();
        config.learning.reject_duplicate_keys = false;
        let mut engine = Engine::new(config).expect("engine");
        engine.apply_proposal(&create(Some("seed:cat"))).expect("create");
        engine.apply_proposal(&create(Some("seed:cat"))).expect("allowed");
        assert_eq!(engine.graph().read().token_count(), 2);
        assert_eq!(engine.stats().learning.duplicate_keys, 1);
    }
}

// =============================================================================
// TIER T6: CAUSAL ORDERING
// =============================================================================

mod t6_causality {
    use super::*;
    use axiom_core::{Cause, SubscriptionFilter};
    use std::collections::BTreeSet;

    /// T6.1: No subscriber sees an effect before its cause.
    #[test]
    fn effects_never_precede_causes() {
        let mut config = EngineConfig::default();
        config.learning.auto_link = true;
        let mut engine = engine_with(config, &["cat", "kitten"]);
        let observer = engine.subscribe(SubscriptionFilter::all()).expect("subscribe");

        engine.submit(InputSignal::word("cat")).expect("submit");
        engine.submit(InputSignal::word("kitten")).expect("submit");
        engine.run(3).expect("run");
        engine.drain();

        let deliveries = observer.drain();
        assert!(!deliveries.is_empty());
        let mut seen = BTreeSet::new();
        for delivery in &deliveries {
            let signal = &delivery.signal;
            if let Cause::Signal(parent) = signal.cause {
                assert!(seen.contains(&parent), "{} delivered before {}", signal.id, parent);
            }
            seen.insert(signal.id);
        }
    }
}

// =============================================================================
// TIER T7: STORE INTEGRITY
// =============================================================================

mod t7_integrity {
    use super::*;
    use axiom_core::config::DeletePolicy;
    use axiom_core::domain::DomainSnapshot;
    use axiom_core::graph::TokenUpdate;
    use axiom_core::{
        Cause, ConnectionId, Domain, DomainConstants, EntityRef, Proposal, SignalBus, SignalKind,
        SignalPayload, SignalTarget, SubscriptionFilter, SystemMetrics, Version,
    };

    /// T7.1: A state update computed from a stale snapshot is refused, and a
    /// quiet tick reports no stale updates.
    #[test]
    fn stale_state_update_is_refused() {
        let mut engine = engine_with(EngineConfig::default(), &["cat"]);
        let graph = engine.graph();
        let cat = graph.read().find_by_label("cat").expect("cat");
        let snapshot = DomainSnapshot::capture(&graph.read(), DomainId(1));

        let mut bus = SignalBus::new();
        let mut domain =
            Domain::new(DomainId(1), "language", DomainConstants::default(), 8).expect("domain");
        domain.attach(
            bus.subscribe(
                SubscriptionFilter::kinds([SignalKind::Input, SignalKind::SystemTick])
                    .in_domain(DomainId(1)),
                Tick::ZERO,
            )
            .expect("subscribe"),
        );
        bus.emit(
            SignalKind::Input,
            SignalPayload::Activation {
                tokens: vec![cat],
                strength: 1.0,
            },
            Cause::External(0),
            SignalTarget::Domain(DomainId(1)),
            Tick::ZERO,
        )
        .expect("emit");
        bus.emit(
            SignalKind::SystemTick,
            SignalPayload::Tick(SystemMetrics::empty(Tick(1))),
            Cause::None,
            SignalTarget::Broadcast,
            Tick(1),
        )
        .expect("emit");
        bus.dispatch();
        let step = domain.step(&snapshot);
        let update = step
            .updates
            .iter()
            .find(|u| u.token == cat)
            .expect("update")
            .clone();
        assert_eq!(update.expected, Version::INITIAL);

        // Another writer gets there first.
        graph
            .write()
            .update_token(cat, None, TokenUpdate::state(update.state.clone()))
            .expect("write");
        let err = graph
            .write()
            .update_token(cat, Some(update.expected), TokenUpdate::state(update.state))
            .expect_err("stale");
        assert_eq!(
            err,
            AxiomError::VersionConflict {
                entity: EntityRef::Token(cat),
                expected: Version::INITIAL,
                actual: Version(2),
            }
        );

        let report = engine.tick().expect("tick");
        assert_eq!(report.stale_updates, 0);
    }

    fn linked(policy: DeletePolicy) -> (Engine, TokenId, ConnectionId) {
        let mut config = EngineConfig::default();
        config.graph.delete_policy = policy;
        let engine = engine_with(config, &["cat", "dog"]);
        let graph = engine.graph();
        let (cat, edge) = {
            let mut graph = graph.write();
            let cat = graph.find_by_label("cat").expect("cat");
            let dog = graph.find_by_label("dog").expect("dog");
            let edge = graph.create_connection(cat, dog, 0.5).expect("edge");
            (cat, edge)
        };
        (engine, cat, edge)
    }

    /// T7.2: Under `Reject`, deleting a referenced token fails and changes
    /// nothing.
    #[test]
    fn delete_policy_reject() {
        let (mut engine, cat, edge) = linked(DeletePolicy::Reject);
        let err = engine
            .apply_proposal(&Proposal::Delete(EntityRef::Token(cat)))
            .expect_err("referenced");
        assert!(matches!(err, AxiomError::ProposalApplicationFailed(_)));
        assert!(engine.token(cat).is_ok());
        assert!(engine.connection(edge).is_ok());
    }

    /// T7.3: Under `Cascade`, referencing connections go first.
    #[test]
    fn delete_policy_cascade() {
        let (mut engine, cat, edge) = linked(DeletePolicy::Cascade);
        let outcome = engine
            .apply_proposal(&Proposal::Delete(EntityRef::Token(cat)))
            .expect("cascade");
        let deleted: Vec<EntityRef> = outcome.changes.iter().map(|c| c.entity).collect();
        assert_eq!(deleted, vec![EntityRef::Connection(edge), EntityRef::Token(cat)]);
        assert!(matches!(engine.token(cat), Err(AxiomError::NotFound(_))));
        assert!(matches!(engine.connection(edge), Err(AxiomError::NotFound(_))));
        assert_eq!(engine.graph().read().token_count(), 1);
    }

    /// T7.4: Extension kinds must be registered before they are emitted.
    #[test]
    fn unregistered_signal_kind_is_unknown() {
        let mut engine = Engine::new(EngineConfig::default()).expect("engine");
        let err = engine
            .emit("heartbeat", SignalPayload::Empty, SignalTarget::Broadcast)
            .expect_err("unregistered");
        assert_eq!(err, AxiomError::UnknownSignalKind("heartbeat".to_string()));

        let kind = engine.register_signal_kind("heartbeat").expect("register");
        let listener = engine
            .subscribe(SubscriptionFilter::kinds([kind.clone()]))
            .expect("subscribe");
        let id = engine
            .emit("heartbeat", SignalPayload::Empty, SignalTarget::Broadcast)
            .expect("registered");
        engine.drain();

        let deliveries = listener.drain();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].signal.id, id);
        assert_eq!(deliveries[0].signal.kind, kind);
    }
}
