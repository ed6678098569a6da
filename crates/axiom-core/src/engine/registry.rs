//! The engine's set of domains.

use crate::domain::{Domain, DomainConstants, DomainSnapshot, DomainStep};
use crate::export::DomainRecord;
use crate::graph::Graph;
use crate::journal::{MutationOp, MutationPayload};
use crate::learning::ConstantsAccessor;
use crate::system::DomainSample;
use crate::types::{AxiomError, DomainId, EntityRef, Tick, Version};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

/// A domain mutation waiting to be journaled.
#[derive(Debug)]
struct PendingEvent {
    domain: DomainId,
    op: MutationOp,
    before: Option<Version>,
    after: Option<Version>,
    constants: DomainConstants,
    tick: Tick,
}

/// Domains by id, plus the journal entries their mutations produced.
#[derive(Debug, Default)]
pub struct DomainRegistry {
    domains: BTreeMap<DomainId, Domain>,
    pending: Vec<PendingEvent>,
}

impl DomainRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.domains.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    pub fn get(&self, id: DomainId) -> Result<&Domain, AxiomError> {
        self.domains
            .get(&id)
            .ok_or(AxiomError::NotFound(EntityRef::Domain(id)))
    }

    /// Domain ids in order.
    pub fn ids(&self) -> impl Iterator<Item = DomainId> + '_ {
        self.domains.keys().copied()
    }

    #[must_use]
    pub fn id_set(&self) -> BTreeSet<DomainId> {
        self.domains.keys().copied().collect()
    }

    /// Add a domain. Journaled as a creation.
    pub fn insert(&mut self, domain: Domain) -> Result<(), AxiomError> {
        let id = domain.id();
        if self.domains.contains_key(&id) {
            return Err(AxiomError::InvalidInput(format!("domain {id} already exists")));
        }
        self.pending.push(PendingEvent {
            domain: id,
            op: MutationOp::Create,
            before: None,
            after: Some(domain.version()),
            constants: *domain.constants(),
            tick: domain.tick(),
        });
        self.domains.insert(id, domain);
        Ok(())
    }

    /// Remove a domain. Journaled as a deletion.
    pub fn remove(&mut self, id: DomainId) -> Result<Domain, AxiomError> {
        let domain = self
            .domains
            .remove(&id)
            .ok_or(AxiomError::NotFound(EntityRef::Domain(id)))?;
        self.pending.push(PendingEvent {
            domain: id,
            op: MutationOp::Delete,
            before: Some(domain.version()),
            after: None,
            constants: *domain.constants(),
            tick: domain.tick(),
        });
        Ok(domain)
    }

    /// Metrics samples in domain order.
    #[must_use]
    pub fn samples(&self) -> Vec<DomainSample> {
        self.domains
            .values()
            .map(|d| DomainSample {
                id: d.id(),
                tick: d.tick(),
                activation_threshold: d.constants().activation_threshold,
            })
            .collect()
    }

    /// Capture one snapshot per domain, in domain order. Call under a read
    /// lock.
    #[must_use]
    pub fn capture(&self, graph: &Graph) -> Vec<DomainSnapshot> {
        self.domains
            .keys()
            .map(|id| DomainSnapshot::capture(graph, *id))
            .collect()
    }

    /// Step every domain in parallel. `snapshots` must come from
    /// [`capture`](Self::capture). Results are in domain order.
    pub fn step_all(&mut self, snapshots: &[DomainSnapshot]) -> Vec<DomainStep> {
        let work: Vec<(&mut Domain, &DomainSnapshot)> = self
            .domains
            .values_mut()
            .zip(snapshots)
            .filter(|(domain, snapshot)| domain.id() == snapshot.domain)
            .collect();
        work.into_par_iter()
            .map(|(domain, snapshot)| domain.step(snapshot))
            .collect()
    }

    /// Domains as stored in a snapshot.
    #[must_use]
    pub fn records(&self) -> Vec<DomainRecord> {
        self.domains
            .values()
            .map(|d| DomainRecord {
                id: d.id(),
                name: d.name().to_string(),
                constants: *d.constants(),
                tick: d.tick(),
                version: d.version(),
            })
            .collect()
    }

    /// Move pending domain events into the graph's journal.
    pub fn flush_into(&mut self, graph: &mut Graph) {
        let tick = graph.tick();
        let journal = graph.journal_mut();
        for event in self.pending.drain(..) {
            journal.record(
                tick,
                EntityRef::Domain(event.domain),
                event.op,
                event.before,
                event.after,
                MutationPayload::Domain {
                    constants: event.constants,
                    tick: event.tick,
                },
            );
        }
    }

    pub(crate) fn get_mut(&mut self, id: DomainId) -> Result<&mut Domain, AxiomError> {
        self.domains
            .get_mut(&id)
            .ok_or(AxiomError::NotFound(EntityRef::Domain(id)))
    }
}

impl ConstantsAccessor for DomainRegistry {
    fn contains(&self, domain: DomainId) -> bool {
        self.domains.contains_key(&domain)
    }

    fn constants(&self, domain: DomainId) -> Result<DomainConstants, AxiomError> {
        self.get(domain).map(|d| *d.constants())
    }

    fn set_constants(
        &mut self,
        domain: DomainId,
        constants: DomainConstants,
    ) -> Result<Version, AxiomError> {
        let target = self.get_mut(domain)?;
        let before = target.version();
        let after = target.set_constants(constants)?;
        let tick = target.tick();
        self.pending.push(PendingEvent {
            domain,
            op: MutationOp::Update,
            before: Some(before),
            after: Some(after),
            constants,
            tick,
        });
        tracing::info!(domain = %domain, version = %after, "domain constants updated");
        Ok(after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphOptions;

    fn domain(id: u32) -> Domain {
        Domain::new(DomainId(id), format!("d{id}"), DomainConstants::default(), 4).expect("domain")
    }

    #[test]
    fn constant_updates_are_journaled() {
        let mut registry = DomainRegistry::new();
        registry.insert(domain(1)).expect("insert");
        let constants = DomainConstants {
            attraction: 0.2,
            ..DomainConstants::default()
        };
        let version = registry.set_constants(DomainId(1), constants).expect("set");
        assert_eq!(version, Version(2));

        let mut graph = Graph::new(GraphOptions::default());
        registry.flush_into(&mut graph);
        let events = graph.drain_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].op, MutationOp::Create);
        assert_eq!(events[1].op, MutationOp::Update);
        assert_eq!(events[1].after, Some(Version(2)));
    }

    #[test]
    fn duplicate_and_missing_domains() {
        let mut registry = DomainRegistry::new();
        registry.insert(domain(1)).expect("insert");
        assert!(registry.insert(domain(1)).is_err());
        assert!(registry.remove(DomainId(7)).is_err());
        assert!(!registry.contains(DomainId(7)));
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![DomainId(1)]);
    }

    #[test]
    fn invalid_constants_leave_domain_untouched() {
        let mut registry = DomainRegistry::new();
        registry.insert(domain(1)).expect("insert");
        let bad = DomainConstants {
            inertia: 0.0,
            ..DomainConstants::default()
        };
        assert!(registry.set_constants(DomainId(1), bad).is_err());
        assert_eq!(registry.get(DomainId(1)).expect("domain").version(), Version::INITIAL);
    }
}
