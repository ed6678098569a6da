//! # Mutation Journal
//!
//! Append-only record of committed mutations, the interface through which
//! persistence and API layers observe the engine.
//!
//! Events are numbered by a monotonic sequence and carry the affected entity's
//! version before and after the change. `(entity, after)` is unique per
//! mutation, so consumers with at-least-once delivery can apply events
//! idempotently.
//!
//! Observers are called by the engine after the mutation is committed and
//! after every lock is released. They must not block.

use crate::domain::{DomainConstant, DomainConstants};
use crate::types::{Connection, DomainId, EntityRef, Tick, Token, Version};
use serde::{Deserialize, Serialize};

/// What happened to the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MutationOp {
    Create,
    Update,
    Delete,
    /// Token moved to another domain (or orphaned).
    Move,
}

/// Post-mutation content of the entity, or `Removed` for deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MutationPayload {
    Token(Box<Token>),
    Connection(Connection),
    Domain {
        constants: DomainConstants,
        tick: Tick,
    },
    Removed,
}

/// A single committed mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationEvent {
    pub seq: u64,
    pub tick: Tick,
    pub entity: EntityRef,
    pub op: MutationOp,
    pub before: Option<Version>,
    pub after: Option<Version>,
    pub payload: MutationPayload,
}

impl MutationEvent {
    /// Idempotency key for at-least-once consumers.
    #[must_use]
    pub fn idempotency_key(&self) -> (EntityRef, Option<Version>) {
        (self.entity, self.after)
    }
}

/// Receives committed mutations in sequence order.
pub trait MutationObserver: Send + Sync {
    fn on_mutation(&self, event: &MutationEvent);
}

/// Pending events awaiting delivery to observers.
#[derive(Debug, Default)]
pub struct MutationJournal {
    next_seq: u64,
    pending: Vec<MutationEvent>,
}

impl MutationJournal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event, assigning the next sequence number.
    pub fn record(
        &mut self,
        tick: Tick,
        entity: EntityRef,
        op: MutationOp,
        before: Option<Version>,
        after: Option<Version>,
        payload: MutationPayload,
    ) -> u64 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        self.pending.push(MutationEvent {
            seq,
            tick,
            entity,
            op,
            before,
            after,
            payload,
        });
        seq
    }

    /// Take every pending event, oldest first.
    pub fn drain(&mut self) -> Vec<MutationEvent> {
        std::mem::take(&mut self.pending)
    }

    /// Sequence number the next event will receive.
    #[must_use]
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

// =============================================================================
// CHANGE RECORDS
// =============================================================================

/// The field a change touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeField {
    Created,
    Deleted,
    Weight,
    Activation,
    Domain,
    Constant(DomainConstant),
}

/// A value before or after a change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ChangeValue {
    Absent,
    Present,
    Scalar(f32),
    Domain(Option<DomainId>),
}

/// One applied change, reported by feedback and learning outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub entity: EntityRef,
    pub field: ChangeField,
    pub old: ChangeValue,
    pub new: ChangeValue,
    /// Version of the entity after the change (`None` for deletions).
    pub version: Option<Version>,
}

impl Change {
    #[must_use]
    pub fn created(entity: EntityRef, version: Version) -> Self {
        Self {
            entity,
            field: ChangeField::Created,
            old: ChangeValue::Absent,
            new: ChangeValue::Present,
            version: Some(version),
        }
    }

    #[must_use]
    pub fn deleted(entity: EntityRef) -> Self {
        Self {
            entity,
            field: ChangeField::Deleted,
            old: ChangeValue::Present,
            new: ChangeValue::Absent,
            version: None,
        }
    }

    #[must_use]
    pub fn scalar(entity: EntityRef, field: ChangeField, old: f32, new: f32, version: Version) -> Self {
        Self {
            entity,
            field,
            old: ChangeValue::Scalar(old),
            new: ChangeValue::Scalar(new),
            version: Some(version),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenId;

    #[test]
    fn sequence_is_monotonic_across_drains() {
        let mut journal = MutationJournal::new();
        let entity = EntityRef::Token(TokenId(1));
        journal.record(Tick(1), entity, MutationOp::Create, None, Some(Version(1)), MutationPayload::Removed);
        let first = journal.drain();
        journal.record(Tick(1), entity, MutationOp::Delete, Some(Version(1)), None, MutationPayload::Removed);
        let second = journal.drain();

        assert_eq!(first[0].seq, 0);
        assert_eq!(second[0].seq, 1);
        assert_eq!(journal.pending_len(), 0);
    }

    #[test]
    fn idempotency_key_uses_after_version() {
        let mut journal = MutationJournal::new();
        let entity = EntityRef::Token(TokenId(4));
        journal.record(Tick(2), entity, MutationOp::Update, Some(Version(1)), Some(Version(2)), MutationPayload::Removed);
        let event = &journal.drain()[0];
        assert_eq!(event.idempotency_key(), (entity, Some(Version(2))));
    }
}
