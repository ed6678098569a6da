//! # Scripts
//!
//! A script seeds an engine and schedules inputs and proposals by tick:
//!
//! ```json
//! {
//!   "ticks": 10,
//!   "seeds": [{ "label": "cat" }, { "label": "kitten", "position": [0.5, 0.0, 0.0] }],
//!   "connections": [{ "from": "cat", "to": "kitten", "weight": 0.8 }],
//!   "inputs": [{ "at": 0, "input": { "type": "word", "text": "cat" } }],
//!   "proposals": [{ "at": 3, "proposal": { "Behavioral": { "domain": 1, "deltas": [["attraction", 0.01]] } } }]
//! }
//! ```
//!
//! Seeds without an embedding are embedded by the engine's own embedder.

use axiom_core::{
    AxiomError, ConnectionKind, ConnectionSpec, CreateTarget, DomainId, Engine, GraphStore,
    InputSignal, Proposal, TokenSpec,
};
use serde::{Deserialize, Serialize};

/// A token created before the first tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedToken {
    pub label: String,
    #[serde(default)]
    pub domain: Option<DomainId>,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub position: Option<Vec<f32>>,
}

/// A connection between two seeded labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SeedConnection {
    pub from: String,
    pub to: String,
    pub weight: f32,
    #[serde(default)]
    pub kind: ConnectionKind,
    #[serde(default)]
    pub directed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimedInput {
    /// Submitted once the engine has completed this many ticks.
    pub at: u64,
    pub input: InputSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TimedProposal {
    pub at: u64,
    pub proposal: Proposal,
}

/// A complete run description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Script {
    /// Ticks to run when the command line does not say.
    #[serde(default)]
    pub ticks: Option<u64>,
    #[serde(default)]
    pub seeds: Vec<SeedToken>,
    #[serde(default)]
    pub connections: Vec<SeedConnection>,
    #[serde(default)]
    pub inputs: Vec<TimedInput>,
    #[serde(default)]
    pub proposals: Vec<TimedProposal>,
}

/// One scheduled item.
#[derive(Debug, Clone, PartialEq)]
pub enum Scheduled<'a> {
    Input(&'a InputSignal),
    Proposal(&'a Proposal),
}

impl Script {
    pub fn from_json(source: &str) -> Result<Self, AxiomError> {
        serde_json::from_str(source)
            .map_err(|e| AxiomError::SerializationError(format!("Script: {e}")))
    }

    /// The last tick anything is scheduled at.
    #[must_use]
    pub fn horizon(&self) -> u64 {
        self.inputs
            .iter()
            .map(|i| i.at)
            .chain(self.proposals.iter().map(|p| p.at))
            .max()
            .unwrap_or(0)
    }

    /// Items due at `tick`: proposals first, then inputs, each in script
    /// order.
    #[must_use]
    pub fn due(&self, tick: u64) -> Vec<Scheduled<'_>> {
        self.proposals
            .iter()
            .filter(|p| p.at == tick)
            .map(|p| Scheduled::Proposal(&p.proposal))
            .chain(
                self.inputs
                    .iter()
                    .filter(|i| i.at == tick)
                    .map(|i| Scheduled::Input(&i.input)),
            )
            .collect()
    }

    /// Create the seed tokens and connections through keyed `Create`
    /// proposals. Seeding twice is rejected by the duplicate-key check.
    pub fn seed(&self, engine: &mut Engine) -> Result<usize, AxiomError> {
        let default_domain = engine.config().gateway.default_domain;
        let state_dim = engine.config().state_dim;
        let mut created = 0;

        for seed in &self.seeds {
            let embedding = match &seed.embedding {
                Some(embedding) => embedding.clone(),
                None => engine.embed(&seed.label)?,
            };
            let mut spec = TokenSpec::new(seed.domain.unwrap_or(default_domain), embedding)
                .with_label(seed.label.clone());
            if let Some(position) = &seed.position {
                if position.len() != state_dim {
                    return Err(AxiomError::InvalidInput(format!(
                        "seed '{}' position must have {state_dim} components",
                        seed.label
                    )));
                }
                spec = spec.with_position(position.clone());
            }
            engine.apply_proposal(&Proposal::Create {
                target: CreateTarget::Token(spec),
                key: Some(format!("seed:{}", seed.label)),
            })?;
            created += 1;
        }

        for link in &self.connections {
            let (from, to) = {
                let graph = engine.graph();
                let graph = graph.read();
                let find = |label: &str| {
                    graph.find_by_label(label).ok_or_else(|| {
                        AxiomError::InvalidInput(format!("unknown seed label '{label}'"))
                    })
                };
                (find(&link.from)?, find(&link.to)?)
            };
            let mut spec = ConnectionSpec::new(from, to, link.weight).kind(link.kind);
            if link.directed {
                spec = spec.directed();
            }
            engine.apply_proposal(&Proposal::Create {
                target: CreateTarget::Connection(spec),
                key: Some(format!("seed:{}->{}", link.from, link.to)),
            })?;
            created += 1;
        }

        tracing::info!(
            tokens = engine.graph().read().token_count(),
            created,
            "script seeded"
        );
        Ok(created)
    }
}
