//! # Property-Based Tests
//!
//! Determinism and correctness invariants checked with proptest.

use axiom_core::config::ArbiterConfig;
use axiom_core::controller::{ActionCandidate, ActionController};
use axiom_core::domain::{DomainSnapshot, TokenView, evolve};
use axiom_core::{
    ActionKind, AssociativeMemory, CandidateId, DecisionSource, DomainConstants, DomainId, Engine,
    EngineConfig, GraphStore, InputSignal, PhysicalState, ResourceKey, Tick, TokenId, TokenSpec,
    Version,
};
use proptest::collection::vec;
use proptest::prelude::*;
use std::collections::BTreeMap;

const LABELS: [&str; 6] = ["cat", "dog", "kitten", "wolf", "mouse", "owl"];

fn seeded_engine(positions: &[(f32, f32)]) -> Engine {
    let engine = Engine::new(EngineConfig::default()).expect("engine");
    {
        let graph = engine.graph();
        let mut graph = graph.write();
        for (i, (x, y)) in positions.iter().enumerate() {
            let mut embedding = vec![0.1; 16];
            embedding[i % 16] = 1.0;
            graph
                .create_token(
                    TokenSpec::new(DomainId(1), embedding)
                        .with_label(LABELS[i % LABELS.len()])
                        .with_position(vec![*x, *y, 0.0]),
                )
                .expect("token");
        }
    }
    engine
}

fn view(id: u64, x: f32, y: f32, activation: f32) -> TokenView {
    let mut embedding = vec![0.2; 4];
    embedding[(id % 4) as usize] = 1.0;
    TokenView {
        id: TokenId(id),
        version: Version::INITIAL,
        embedding,
        state: PhysicalState::at(vec![x, y], activation),
    }
}

// =============================================================================
// PROPERTY TESTS
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Same seed and input schedule produce the same canonical snapshot.
    #[test]
    fn determinism_identical_schedule_identical_snapshot(
        positions in vec((-2.0f32..2.0, -2.0f32..2.0), 1..6),
        schedule in vec((0usize..6, 0u64..4), 0..12),
        ticks in 1u64..6,
    ) {
        let run = || {
            let mut engine = seeded_engine(&positions);
            let mut schedule = schedule.clone();
            schedule.sort_by_key(|(_, at)| *at);
            for (word, at) in &schedule {
                while engine.current_tick().value() < *at {
                    engine.tick().expect("tick");
                }
                let label = LABELS[*word % positions.len().min(LABELS.len())];
                engine.submit(InputSignal::word(label)).expect("submit");
            }
            engine.run(ticks).expect("run");
            engine.state_hash().expect("hash")
        };
        prop_assert_eq!(run(), run());
    }

    /// Evolution is a pure function of snapshot, constants and impulses.
    #[test]
    fn evolution_is_pure(
        tokens in vec((-3.0f32..3.0, -3.0f32..3.0, 0.0f32..2.0), 1..8),
        impulse in 0.0f32..2.0,
    ) {
        let snapshot = DomainSnapshot {
            domain: DomainId(1),
            tokens: tokens
                .iter()
                .enumerate()
                .map(|(i, (x, y, a))| view(i as u64, *x, *y, *a))
                .collect(),
            bonds: BTreeMap::new(),
        };
        let impulses = BTreeMap::from([(TokenId(0), impulse)]);
        let first = evolve(&snapshot, &DomainConstants::default(), &impulses);
        let second = evolve(&snapshot, &DomainConstants::default(), &impulses);
        prop_assert_eq!(&first, &second);
        for update in &first.updates {
            prop_assert!(update.state.is_finite());
        }
    }

    /// After any put sequence, the resident set is the `capacity` most
    /// recently touched keys.
    #[test]
    fn memory_keeps_most_recent_keys(
        capacity in 1usize..8,
        keys in vec(0u64..16, 0..40),
    ) {
        let mut memory: AssociativeMemory<u64, u64> = AssociativeMemory::new(capacity).expect("memory");
        let mut recency: Vec<u64> = Vec::new();
        for key in &keys {
            memory.put(*key, *key);
            recency.retain(|k| k != key);
            recency.push(*key);
        }
        let expected: Vec<u64> = recency.iter().rev().take(capacity).copied().collect();
        prop_assert!(memory.len() <= capacity);
        prop_assert_eq!(memory.len(), expected.len());
        for key in &expected {
            prop_assert!(memory.contains(key));
        }
    }

    /// The winner has the highest priority and, among equals, the lowest id.
    #[test]
    fn arbitration_is_total_and_stable(
        entries in vec((0u64..1000, 0u8..4), 1..16),
    ) {
        let mut seen = std::collections::BTreeSet::new();
        let candidates: Vec<ActionCandidate> = entries
            .iter()
            .filter(|(id, _)| seen.insert(*id))
            .map(|(id, priority)| ActionCandidate {
                id: CandidateId(*id),
                tick: Tick(1),
                domain: DomainId(1),
                token: TokenId(*id),
                resource: ResourceKey::Actor(DomainId(1)),
                kind: ActionKind::Fire { token: TokenId(*id) },
                priority: f32::from(*priority),
                policy_version: 1,
                source: DecisionSource::Deliberate,
            })
            .collect();
        let best = candidates
            .iter()
            .max_by(|a, b| a.priority.total_cmp(&b.priority).then(b.id.cmp(&a.id)))
            .map(|c| c.id);

        let mut forward = ActionController::new(&ArbiterConfig::default());
        let mut reversed = ActionController::new(&ArbiterConfig::default());
        let mut backwards = candidates.clone();
        backwards.reverse();
        let a = forward.arbitrate(Tick(1), candidates);
        let b = reversed.arbitrate(Tick(1), backwards);

        prop_assert_eq!(a.len(), 1);
        prop_assert_eq!(Some(a[0].winner.id), best);
        prop_assert_eq!(&a[0].winner, &b[0].winner);
    }
}
