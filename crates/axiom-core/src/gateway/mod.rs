//! # Gateway
//!
//! Normalizes external input into graph-addressable signals.
//!
//! Resolution order for words and vectors:
//! 1. resolution cache (confirmed against the Graph Store on every hit),
//! 2. exact match: label for words, bit-identical embedding for both,
//! 3. nearest neighbour with cosine similarity at or above the threshold,
//! 4. the configured unknown-input strategy: defer to the curiosity queue and
//!    report `UnresolvedInput`, or create a token in the default domain.
//!
//! A resolved input becomes an `Input` signal carrying an activation impulse,
//! addressed to the token's domain. Feedback is handed to the
//! [`FeedbackProcessor`] and announced with a `Feedback` signal. Commands are
//! passed back to the caller untouched.

mod curiosity;
mod embedder;
mod input;
mod stats;

pub use curiosity::{CuriosityBuffer, CuriosityQueue, UnresolvedInput};
pub use embedder::{Embedder, HashingEmbedder};
pub use input::{Command, InputSignal, ProcessedSignal, Resolution};
pub use stats::GatewayStats;

use crate::config::{GatewayConfig, UnknownInputStrategy};
use crate::feedback::FeedbackProcessor;
use crate::graph::{Graph, GraphStore, SharedGraph};
use crate::memory::{Fingerprint, MemoryStats, SyncAssociativeMemory};
use crate::signals::{Cause, SignalBus, SignalKind, SignalPayload, SignalTarget};
use crate::types::{AxiomError, DomainId, EntityRef, Tick, TokenId, TokenSpec};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Collaborators the Gateway needs for one input.
pub struct GatewayContext<'a> {
    pub graph: &'a SharedGraph,
    pub bus: &'a mut SignalBus,
    pub feedback: &'a mut FeedbackProcessor,
    /// Domains that currently exist.
    pub domains: &'a BTreeSet<DomainId>,
    pub tick: Tick,
}

/// A resolved token, or the best match below the threshold.
type Resolved = Result<(TokenId, Resolution), Option<(TokenId, f32)>>;

/// A word or vector on its way to a token.
struct Lookup<'a> {
    key: Fingerprint,
    label: Option<&'a str>,
    embedding: Vec<f32>,
    domain: Option<DomainId>,
}

/// The input normalization pipeline.
pub struct Gateway {
    config: GatewayConfig,
    embedder: Arc<dyn Embedder>,
    curiosity: Option<Arc<dyn CuriosityQueue>>,
    cache: SyncAssociativeMemory<Fingerprint, TokenId>,
    stats: GatewayStats,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("embedding_dim", &self.embedder.dim())
            .field("curiosity", &self.curiosity.is_some())
            .field("stats", &self.stats)
            .finish()
    }
}

impl Gateway {
    /// Create a gateway. The embedder must produce `embedding_dim` components.
    pub fn new(
        config: GatewayConfig,
        embedding_dim: usize,
        embedder: Arc<dyn Embedder>,
        curiosity: Option<Arc<dyn CuriosityQueue>>,
    ) -> Result<Self, AxiomError> {
        if embedder.dim() != embedding_dim {
            return Err(AxiomError::InvalidConfig(format!(
                "embedder produces {} components, graph expects {embedding_dim}",
                embedder.dim()
            )));
        }
        let cache = SyncAssociativeMemory::new(config.cache_capacity)?;
        Ok(Self {
            config,
            embedder,
            curiosity,
            cache,
            stats: GatewayStats::default(),
        })
    }

    #[must_use]
    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    #[must_use]
    pub fn stats(&self) -> GatewayStats {
        self.stats
    }

    #[must_use]
    pub fn cache_stats(&self) -> MemoryStats {
        self.cache.stats()
    }

    /// Process one external input.
    pub fn process(
        &mut self,
        ctx: GatewayContext<'_>,
        input: InputSignal,
        cause: Cause,
    ) -> Result<ProcessedSignal, AxiomError> {
        self.stats.processed += 1;
        self.cache.advance_to(ctx.tick);

        match &input {
            InputSignal::Word {
                text,
                domain,
                strength,
            } => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(AxiomError::InvalidInput("empty word".to_string()));
                }
                let strength = self.strength(*strength)?;
                let lookup = Lookup {
                    key: Fingerprint::text(text),
                    label: Some(text),
                    embedding: self.embedder.embed(text)?,
                    domain: *domain,
                };
                self.resolve_and_activate(ctx, &input, lookup, strength, cause)
            }
            InputSignal::Vector {
                values,
                domain,
                strength,
            } => {
                let strength = self.strength(*strength)?;
                let lookup = Lookup {
                    key: Fingerprint::vector(values),
                    label: None,
                    embedding: values.clone(),
                    domain: *domain,
                };
                self.resolve_and_activate(ctx, &input, lookup, strength, cause)
            }
            InputSignal::DirectToken { token, strength } => {
                let strength = self.strength(*strength)?;
                let domain = ctx.graph.read().token(*token)?.domain;
                self.stats.direct += 1;
                self.activate(ctx, *token, domain, Resolution::Direct, strength, cause)
            }
            InputSignal::Feedback(signal) => {
                let outcome = {
                    let mut graph = ctx.graph.write();
                    graph.set_tick(ctx.tick);
                    ctx.feedback.apply(&mut graph, self.embedder.as_ref(), ctx.domains, signal)?
                };
                let id = ctx.bus.emit(
                    SignalKind::Feedback,
                    SignalPayload::Feedback(outcome.clone()),
                    cause,
                    SignalTarget::Broadcast,
                    ctx.tick,
                )?;
                self.stats.feedback += 1;
                tracing::info!(
                    signal = %id,
                    cause = %cause,
                    tick = ctx.tick.0,
                    changes = outcome.changes.len(),
                    "feedback routed"
                );
                Ok(ProcessedSignal::Feedback {
                    signal: id,
                    outcome,
                })
            }
            InputSignal::Command { command } => {
                self.stats.commands += 1;
                tracing::debug!(command = ?command, tick = ctx.tick.0, "command passed through");
                Ok(ProcessedSignal::Command(*command))
            }
        }
    }

    fn strength(&self, strength: Option<f32>) -> Result<f32, AxiomError> {
        let strength = strength.unwrap_or(self.config.default_strength);
        if !strength.is_finite() || strength < 0.0 {
            return Err(AxiomError::InvalidInput(format!(
                "activation strength must be finite and >= 0, got {strength}"
            )));
        }
        Ok(strength)
    }

    fn resolve_and_activate(
        &mut self,
        ctx: GatewayContext<'_>,
        input: &InputSignal,
        lookup: Lookup<'_>,
        strength: f32,
        cause: Cause,
    ) -> Result<ProcessedSignal, AxiomError> {
        if let Some(domain) = lookup.domain {
            if !ctx.domains.contains(&domain) {
                return Err(AxiomError::NotFound(EntityRef::Domain(domain)));
            }
        }

        let resolved = {
            let graph = ctx.graph.read();
            self.resolve(&graph, &lookup)?
        };

        let (token, resolution) = match resolved {
            Ok(found) => found,
            Err(best_guess) => match self.config.unknown_input {
                UnknownInputStrategy::CreateToken => {
                    let domain = lookup.domain.unwrap_or(self.config.default_domain);
                    if !ctx.domains.contains(&domain) {
                        return Err(AxiomError::NotFound(EntityRef::Domain(domain)));
                    }
                    let mut spec = TokenSpec::new(domain, lookup.embedding.clone());
                    if let Some(label) = lookup.label {
                        spec = spec.with_label(label);
                    }
                    let id = {
                        let mut graph = ctx.graph.write();
                        graph.set_tick(ctx.tick);
                        graph.create_token(spec)?
                    };
                    self.stats.created += 1;
                    tracing::info!(token = %id, input = %input, tick = ctx.tick.0, "token created for input");
                    (id, Resolution::Created)
                }
                UnknownInputStrategy::Defer => {
                    self.stats.unresolved += 1;
                    let queued = self.curiosity.as_ref().is_some_and(|queue| {
                        queue.enqueue(UnresolvedInput {
                            input: input.clone(),
                            cause,
                            tick: ctx.tick,
                            best_guess,
                        })
                    });
                    if queued {
                        self.stats.queued += 1;
                    }
                    tracing::debug!(input = %input, queued, tick = ctx.tick.0, "input unresolved");
                    return Err(AxiomError::UnresolvedInput {
                        input: input.to_string(),
                        queued,
                    });
                }
            },
        };

        self.cache.put(lookup.key, token);
        let domain = ctx.graph.read().token(token)?.domain;
        self.activate(ctx, token, domain, resolution, strength, cause)
    }

    /// Resolve against the graph. The inner `Err` carries the best match
    /// below the threshold when nothing qualified.
    fn resolve(&mut self, graph: &Graph, lookup: &Lookup<'_>) -> Result<Resolved, AxiomError> {
        if let Some(entry) = self.cache.get(&lookup.key) {
            let valid = graph.get_token(entry.value).is_some_and(|t| {
                lookup.domain.is_none() || t.domain == lookup.domain
            });
            if valid {
                self.stats.cached += 1;
                return Ok(Ok((entry.value, Resolution::Cached)));
            }
            self.stats.stale_cache_hits += 1;
            self.cache.remove(&lookup.key);
        }

        let in_domain = |id: TokenId| {
            lookup.domain.is_none() || graph.get_token(id).is_some_and(|t| t.domain == lookup.domain)
        };
        let exact = lookup
            .label
            .and_then(|label| graph.find_by_label(label))
            .filter(|id| in_domain(*id))
            .or_else(|| graph.find_by_embedding(&lookup.embedding).filter(|id| in_domain(*id)));
        if let Some(id) = exact {
            self.stats.exact += 1;
            return Ok(Ok((id, Resolution::Exact)));
        }

        let threshold = self.config.similarity_threshold;
        if let Some((id, similarity)) = graph.nearest_in(&lookup.embedding, threshold, lookup.domain)? {
            self.stats.nearest += 1;
            return Ok(Ok((id, Resolution::Nearest { similarity })));
        }
        Ok(Err(graph.nearest_in(&lookup.embedding, -1.0, lookup.domain)?))
    }

    fn activate(
        &mut self,
        ctx: GatewayContext<'_>,
        token: TokenId,
        domain: Option<DomainId>,
        resolution: Resolution,
        strength: f32,
        cause: Cause,
    ) -> Result<ProcessedSignal, AxiomError> {
        let target = domain.map_or(SignalTarget::Broadcast, SignalTarget::Domain);
        let id = ctx.bus.emit(
            SignalKind::Input,
            SignalPayload::Activation {
                tokens: vec![token],
                strength,
            },
            cause,
            target,
            ctx.tick,
        )?;
        tracing::info!(
            signal = %id,
            cause = %cause,
            tick = ctx.tick.0,
            token = %token,
            resolution = ?resolution,
            "input normalized"
        );
        Ok(ProcessedSignal::Activated {
            signal: id,
            token,
            domain,
            resolution,
        })
    }
}
