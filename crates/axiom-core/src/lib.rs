//! # axiom-core
//!
//! The deterministic semantic physics engine for Axiom - THE LOGIC.
//!
//! Words and concepts are tokens with a position, a velocity and an
//! activation. Tokens live in domains, bounded partitions with their own
//! physical constants, and drift under local forces: attraction between
//! similar or connected tokens, repulsion at short range, damped by inertia
//! and resistance. Co-activated tokens are linked, and feedback reshapes the
//! connections between them.
//!
//! ## Pipeline
//!
//! ```text
//! input -> Gateway -> Signal System -> Domains -> Action Controller
//!       -> Hybrid Learning -> Graph Store
//! ```
//!
//! ## Architectural Constraints
//!
//! - Deterministic: identical inputs, seeds and tick sequences give identical
//!   state, bit for bit
//! - No async, no network dependencies (pure Rust)
//! - The Graph Store is the single source of truth; every other component
//!   refers to tokens and connections by id
//! - Persistence and API layers observe committed mutations, they never take
//!   part in a transition

// =============================================================================
// MODULES
// =============================================================================

pub mod config;
pub mod controller;
pub mod domain;
pub mod engine;
pub mod export;
pub mod feedback;
pub mod gateway;
pub mod graph;
pub mod journal;
pub mod learning;
pub mod memory;
pub mod primitives;
pub mod signals;
pub mod system;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    AxiomError, CandidateId, Connection, ConnectionId, ConnectionKind, ConnectionSpec, DomainId,
    EntityRef, Mutability, PhysicalState, SignalId, SubscriberId, Tick, Token, TokenId, TokenSpec,
    Version,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use config::{DomainConfig, EngineConfig, UnknownInputStrategy};
pub use controller::{ActionController, ActionKind, Decision, DecisionSource, ResourceKey};
pub use domain::{Domain, DomainConstant, DomainConstants};
pub use engine::{DomainInfo, Engine, EngineBuilder, EngineStats, MemberPolicy, TickReport};
pub use export::{EngineSnapshot, decode_snapshot, encode_snapshot, snapshot_hash};
pub use feedback::{FeedbackKind, FeedbackOutcome, FeedbackSignal, FeedbackSubject};
pub use gateway::{
    CuriosityBuffer, CuriosityQueue, Embedder, Gateway, HashingEmbedder, InputSignal,
    ProcessedSignal, Resolution, UnresolvedInput,
};
pub use graph::{Graph, GraphStore, SharedGraph};
pub use journal::{MutationEvent, MutationObserver, MutationOp};
pub use learning::{CreateTarget, HybridLearning, Modification, Proposal, ProposalOutcome};
pub use memory::{AssociativeMemory, Fingerprint, SyncAssociativeMemory};
pub use signals::{
    Cause, Mailbox, Signal, SignalBus, SignalKind, SignalPayload, SignalTarget, SubscriptionFilter,
};

// =============================================================================
// RE-EXPORTS: System (from system module)
// =============================================================================

pub use system::{DomainMetrics, SystemMetrics};
