//! # System Metrics
//!
//! Aggregate state of the engine, computed from the Graph Store.
//!
//! Metrics are informational: they gate nothing. They are carried as the
//! payload of every `SystemTick` signal and returned by `Engine::metrics`.

use crate::graph::{Graph, GraphStore};
use crate::types::{DomainId, Tick};
use serde::{Deserialize, Serialize};

/// What the metrics pass needs to know about a domain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DomainSample {
    pub id: DomainId,
    pub tick: Tick,
    /// Activation at or above which a member counts as active.
    pub activation_threshold: f32,
}

/// Aggregate state of one domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainMetrics {
    pub domain: DomainId,
    pub tick: Tick,
    pub token_count: usize,
    /// Members with activation at or above the domain threshold.
    pub active_tokens: usize,
    pub mean_activation: f32,
    pub max_activation: f32,
    /// Sum of squared speeds, a measure of how far from rest the domain is.
    pub kinetic_energy: f32,
}

impl DomainMetrics {
    fn empty(sample: &DomainSample) -> Self {
        Self {
            domain: sample.id,
            tick: sample.tick,
            token_count: 0,
            active_tokens: 0,
            mean_activation: 0.0,
            max_activation: 0.0,
            kinetic_energy: 0.0,
        }
    }
}

/// Aggregate state of the whole engine at one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemMetrics {
    pub tick: Tick,
    pub token_count: usize,
    /// Tokens whose domain was removed without reassignment.
    pub orphaned_tokens: usize,
    pub connection_count: usize,
    /// Connections per token, as fixed-point millionths.
    pub density_millionths: u64,
    /// Per-domain aggregates in domain-id order.
    pub domains: Vec<DomainMetrics>,
}

impl SystemMetrics {
    /// Metrics of an empty engine.
    #[must_use]
    pub fn empty(tick: Tick) -> Self {
        Self {
            tick,
            token_count: 0,
            orphaned_tokens: 0,
            connection_count: 0,
            density_millionths: 0,
            domains: Vec::new(),
        }
    }

    /// Compute metrics from a graph. `samples` must be in domain-id order.
    #[must_use]
    pub fn capture(graph: &Graph, tick: Tick, samples: &[DomainSample]) -> Self {
        let token_count = graph.token_count();
        let connection_count = graph.connection_count();
        let orphaned_tokens = graph.tokens().filter(|t| t.is_orphaned()).count();

        let density_millionths = if token_count > 0 {
            (connection_count as u64).saturating_mul(1_000_000) / token_count as u64
        } else {
            0
        };

        let domains = samples
            .iter()
            .map(|sample| {
                let mut metrics = DomainMetrics::empty(sample);
                let mut activation_sum = 0.0_f64;
                let mut energy = 0.0_f64;
                for id in graph.members(sample.id) {
                    let Some(token) = graph.get_token(id) else {
                        continue;
                    };
                    let activation = token.state.activation;
                    metrics.token_count += 1;
                    if activation >= sample.activation_threshold {
                        metrics.active_tokens += 1;
                    }
                    metrics.max_activation = metrics.max_activation.max(activation);
                    activation_sum += f64::from(activation);
                    energy += token
                        .state
                        .velocity
                        .iter()
                        .map(|v| f64::from(*v) * f64::from(*v))
                        .sum::<f64>();
                }
                if metrics.token_count > 0 {
                    metrics.mean_activation = (activation_sum / metrics.token_count as f64) as f32;
                }
                metrics.kinetic_energy = energy as f32;
                metrics
            })
            .collect();

        Self {
            tick,
            token_count,
            orphaned_tokens,
            connection_count,
            density_millionths,
            domains,
        }
    }

    /// Metrics of one domain.
    #[must_use]
    pub fn domain(&self, id: DomainId) -> Option<&DomainMetrics> {
        self.domains.iter().find(|d| d.domain == id)
    }

    /// Active tokens across all domains.
    #[must_use]
    pub fn active_tokens(&self) -> usize {
        self.domains.iter().map(|d| d.active_tokens).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphOptions;
    use crate::types::TokenSpec;

    #[test]
    fn empty_graph_has_zero_metrics() {
        let graph = Graph::new(GraphOptions::default());
        let sample = DomainSample {
            id: DomainId(1),
            tick: Tick(3),
            activation_threshold: 0.5,
        };
        let metrics = SystemMetrics::capture(&graph, Tick(3), &[sample]);
        assert_eq!(metrics.token_count, 0);
        assert_eq!(metrics.density_millionths, 0);
        assert_eq!(metrics.domains[0].token_count, 0);
        assert_eq!(metrics.domains[0].tick, Tick(3));
    }

    #[test]
    fn aggregates_reflect_actual_state() {
        let options = GraphOptions {
            embedding_dim: 2,
            state_dim: 2,
            ..GraphOptions::default()
        };
        let mut graph = Graph::new(options);
        let a = graph
            .create_token(TokenSpec::new(DomainId(1), vec![1.0, 0.0]).with_activation(1.0))
            .expect("token");
        let b = graph
            .create_token(TokenSpec::new(DomainId(1), vec![0.0, 1.0]).with_activation(0.2))
            .expect("token");
        graph
            .create_token(TokenSpec::new(DomainId(2), vec![1.0, 1.0]))
            .expect("token");
        graph.create_connection(a, b, 1.0).expect("edge");

        let samples = [
            DomainSample {
                id: DomainId(1),
                tick: Tick(1),
                activation_threshold: 0.5,
            },
            DomainSample {
                id: DomainId(2),
                tick: Tick(1),
                activation_threshold: 0.5,
            },
        ];
        let metrics = SystemMetrics::capture(&graph, Tick(1), &samples);

        assert_eq!(metrics.token_count, 3);
        assert_eq!(metrics.connection_count, 1);
        assert_eq!(metrics.density_millionths, 333_333);
        let first = metrics.domain(DomainId(1)).expect("domain 1");
        assert_eq!(first.token_count, 2);
        assert_eq!(first.active_tokens, 1);
        assert!((first.mean_activation - 0.6).abs() < 1e-6);
        assert!((first.max_activation - 1.0).abs() < f32::EPSILON);
        assert_eq!(metrics.active_tokens(), 1);
    }
}
