//! Signal bus: FIFO outbox, per-subscriber mailboxes.
//!
//! Emission appends to a single outbox; `dispatch` drains it front to back and
//! hands each signal to every matching subscriber's channel. Signals therefore
//! reach each subscriber in emission order, and since a cause is always
//! emitted before its effects, a subscriber never sees an effect before a
//! cause it also receives.

use super::{Cause, Signal, SignalKind, SignalPayload, SignalTarget};
use crate::types::{AxiomError, DomainId, EntityRef, SignalId, SubscriberId, Tick};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Default number of signals kept for cause tracing.
const DEFAULT_TRACE_CAPACITY: usize = 4096;

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// Which signals a subscriber wants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
    /// Accepted kinds. `None` accepts every kind.
    pub kinds: Option<BTreeSet<SignalKind>>,
    /// Domain binding. Unbound subscribers observe every domain's signals.
    pub domain: Option<DomainId>,
}

impl SubscriptionFilter {
    /// Accept everything.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the given kinds.
    #[must_use]
    pub fn kinds(kinds: impl IntoIterator<Item = SignalKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            domain: None,
        }
    }

    /// Bind to a domain.
    #[must_use]
    pub fn in_domain(mut self, domain: DomainId) -> Self {
        self.domain = Some(domain);
        self
    }

    fn accepts(&self, signal: &Signal, subscriber: SubscriberId) -> bool {
        if let Some(kinds) = &self.kinds
            && !kinds.contains(&signal.kind)
        {
            return false;
        }
        match &signal.target {
            SignalTarget::Broadcast => true,
            SignalTarget::Domain(domain) => self.domain.is_none_or(|bound| bound == *domain),
            SignalTarget::Subscribers(set) => set.contains(&subscriber),
        }
    }
}

/// A signal handed to one subscriber.
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Per-subscriber delivery counter, starting at 0.
    pub sequence: u64,
    pub signal: Arc<Signal>,
}

/// Receiving end of a subscription. Drained independently of other mailboxes.
#[derive(Debug)]
pub struct Mailbox {
    id: SubscriberId,
    receiver: Receiver<Delivery>,
}

impl Mailbox {
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Everything delivered so far, in delivery order.
    pub fn drain(&self) -> Vec<Delivery> {
        self.receiver.try_iter().collect()
    }

    /// The next delivery, if one is waiting.
    pub fn try_next(&self) -> Option<Delivery> {
        self.receiver.try_recv().ok()
    }

    /// Wait up to `timeout` for the next delivery.
    ///
    /// Returns `Ok(None)` on timeout and an error once the bus dropped the
    /// subscription.
    pub fn next_timeout(&self, timeout: Duration) -> Result<Option<Delivery>, AxiomError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(delivery) => Ok(Some(delivery)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(AxiomError::NotFound(EntityRef::Subscriber(self.id)))
            }
        }
    }
}

#[derive(Debug)]
struct Subscriber {
    filter: SubscriptionFilter,
    sender: Sender<Delivery>,
    delivered: u64,
    last_delivered: Option<SignalId>,
}

/// Public view of a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub id: SubscriberId,
    pub filter: SubscriptionFilter,
    pub delivered: u64,
    pub last_delivered: Option<SignalId>,
}

// =============================================================================
// BUS
// =============================================================================

/// Compact record of an emitted signal, kept for cause tracing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalRecord {
    pub id: SignalId,
    pub kind: SignalKind,
    pub cause: Cause,
    pub tick: Tick,
}

/// Result of one dispatch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub signals: usize,
    pub deliveries: usize,
    /// Subscribers dropped because their mailbox was gone.
    pub dropped_subscribers: usize,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    pub emitted: u64,
    pub dispatched: u64,
    pub deliveries: u64,
    pub dropped_subscribers: u64,
}

/// The event bus.
#[derive(Debug)]
pub struct SignalBus {
    next_signal: u64,
    next_subscriber: u64,
    extensions: BTreeSet<String>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    outbox: VecDeque<Arc<Signal>>,
    trace: BTreeMap<SignalId, SignalRecord>,
    trace_capacity: usize,
    stats: BusStats,
}

impl Default for SignalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_trace_capacity(DEFAULT_TRACE_CAPACITY)
    }

    /// A bus that remembers the last `capacity` signals for cause tracing.
    #[must_use]
    pub fn with_trace_capacity(capacity: usize) -> Self {
        Self {
            next_signal: 0,
            next_subscriber: 0,
            extensions: BTreeSet::new(),
            subscribers: BTreeMap::new(),
            outbox: VecDeque::new(),
            trace: BTreeMap::new(),
            trace_capacity: capacity.max(1),
            stats: BusStats::default(),
        }
    }

    /// Continue signal numbering at `next` or later, e.g. after a restore.
    pub fn resume_from(&mut self, next: SignalId) {
        self.next_signal = self.next_signal.max(next.0);
    }

    /// Register an extension kind.
    pub fn register_kind(&mut self, name: &str) -> Result<SignalKind, AxiomError> {
        let name = name.trim();
        if name.is_empty() || SignalKind::BUILTIN_TAGS.contains(&name) {
            return Err(AxiomError::InvalidInput(format!(
                "'{name}' cannot be registered as an extension kind"
            )));
        }
        self.extensions.insert(name.to_string());
        Ok(SignalKind::Extension(name.to_string()))
    }

    /// Parse a built-in or registered kind.
    pub fn parse_kind(&self, tag: &str) -> Result<SignalKind, AxiomError> {
        match tag.parse::<SignalKind>() {
            Ok(kind) => Ok(kind),
            Err(_) if self.extensions.contains(tag) => Ok(SignalKind::Extension(tag.to_string())),
            Err(e) => Err(e),
        }
    }

    /// Queue a signal for the next dispatch.
    pub fn emit(
        &mut self,
        kind: SignalKind,
        payload: SignalPayload,
        cause: Cause,
        target: SignalTarget,
        tick: Tick,
    ) -> Result<SignalId, AxiomError> {
        if let SignalKind::Extension(name) = &kind
            && !self.extensions.contains(name)
        {
            return Err(AxiomError::UnknownSignalKind(name.clone()));
        }
        if let Cause::Signal(parent) = cause
            && parent.0 >= self.next_signal
        {
            return Err(AxiomError::NotFound(EntityRef::Signal(parent)));
        }

        let id = SignalId(self.next_signal);
        self.next_signal = self.next_signal.saturating_add(1);

        tracing::debug!(signal = %id, kind = %kind, cause = %cause, tick = tick.0, "signal emitted");

        self.remember(SignalRecord {
            id,
            kind: kind.clone(),
            cause,
            tick,
        });
        self.outbox.push_back(Arc::new(Signal {
            id,
            kind,
            payload,
            cause,
            target,
            tick,
        }));
        self.stats.emitted = self.stats.emitted.saturating_add(1);
        Ok(id)
    }

    /// Queue a signal whose kind is given as a tag.
    pub fn emit_tagged(
        &mut self,
        tag: &str,
        payload: SignalPayload,
        cause: Cause,
        target: SignalTarget,
        tick: Tick,
    ) -> Result<SignalId, AxiomError> {
        let kind = self.parse_kind(tag)?;
        self.emit(kind, payload, cause, target, tick)
    }

    /// Register a subscriber and announce it with a `Subscribe` signal.
    pub fn subscribe(&mut self, filter: SubscriptionFilter, tick: Tick) -> Result<Mailbox, AxiomError> {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber = self.next_subscriber.saturating_add(1);

        let (sender, receiver) = mpsc::channel();
        self.subscribers.insert(
            id,
            Subscriber {
                filter,
                sender,
                delivered: 0,
                last_delivered: None,
            },
        );
        self.emit(
            SignalKind::Subscribe,
            SignalPayload::Subscription { subscriber: id },
            Cause::None,
            SignalTarget::Broadcast,
            tick,
        )?;
        tracing::debug!(subscriber = %id, tick = tick.0, "subscribed");
        Ok(Mailbox { id, receiver })
    }

    /// Remove a subscriber and announce it with an `Unsubscribe` signal.
    ///
    /// Signals still in the outbox are not delivered to it.
    pub fn unsubscribe(&mut self, id: SubscriberId, tick: Tick) -> Result<SignalId, AxiomError> {
        if self.subscribers.remove(&id).is_none() {
            return Err(AxiomError::NotFound(EntityRef::Subscriber(id)));
        }
        tracing::debug!(subscriber = %id, tick = tick.0, "unsubscribed");
        self.emit(
            SignalKind::Unsubscribe,
            SignalPayload::Subscription { subscriber: id },
            Cause::None,
            SignalTarget::Broadcast,
            tick,
        )
    }

    /// Deliver every queued signal, oldest first.
    pub fn dispatch(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut dead = BTreeSet::new();

        while let Some(signal) = self.outbox.pop_front() {
            report.signals += 1;
            for (&id, subscriber) in &mut self.subscribers {
                if dead.contains(&id) || !subscriber.filter.accepts(&signal, id) {
                    continue;
                }
                let delivery = Delivery {
                    sequence: subscriber.delivered,
                    signal: Arc::clone(&signal),
                };
                if subscriber.sender.send(delivery).is_err() {
                    dead.insert(id);
                    continue;
                }
                subscriber.delivered = subscriber.delivered.saturating_add(1);
                subscriber.last_delivered = Some(signal.id);
                report.deliveries += 1;
            }
        }

        for id in dead {
            self.subscribers.remove(&id);
            report.dropped_subscribers += 1;
            tracing::warn!(subscriber = %id, "mailbox closed, subscriber dropped");
        }

        self.stats.dispatched = self.stats.dispatched.saturating_add(report.signals as u64);
        self.stats.deliveries = self.stats.deliveries.saturating_add(report.deliveries as u64);
        self.stats.dropped_subscribers = self
            .stats
            .dropped_subscribers
            .saturating_add(report.dropped_subscribers as u64);
        report
    }

    /// Signals waiting for dispatch.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.outbox.len()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    #[must_use]
    pub fn subscriber(&self, id: SubscriberId) -> Option<SubscriberInfo> {
        self.subscribers.get(&id).map(|s| SubscriberInfo {
            id,
            filter: s.filter.clone(),
            delivered: s.delivered,
            last_delivered: s.last_delivered,
        })
    }

    /// The id the next signal will receive.
    #[must_use]
    pub fn next_signal_id(&self) -> SignalId {
        SignalId(self.next_signal)
    }

    #[must_use]
    pub fn record(&self, id: SignalId) -> Option<&SignalRecord> {
        self.trace.get(&id)
    }

    /// The cause chain of a signal, from the signal itself back to its root.
    ///
    /// Stops early when an ancestor has aged out of the trace buffer.
    #[must_use]
    pub fn causal_chain(&self, id: SignalId) -> Vec<SignalRecord> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        while let Some(id) = current {
            let Some(record) = self.trace.get(&id) else {
                break;
            };
            chain.push(record.clone());
            current = match record.cause {
                Cause::Signal(parent) => Some(parent),
                Cause::None | Cause::External(_) => None,
            };
        }
        chain
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.stats
    }

    fn remember(&mut self, record: SignalRecord) {
        self.trace.insert(record.id, record);
        while self.trace.len() > self.trace_capacity {
            self.trace.pop_first();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
