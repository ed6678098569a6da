//! # Signal System
//!
//! Typed, timestamped, causally tagged messages and the bus that delivers
//! them.
//!
//! A signal's logical timestamp is `(tick, id)`: ids are handed out by a
//! single counter, so they double as the global emission order. No wall-clock
//! time is recorded.

mod bus;

pub use bus::{
    BusStats, Delivery, DispatchReport, Mailbox, SignalBus, SignalRecord, SubscriberInfo,
    SubscriptionFilter,
};

use crate::controller::Decision;
use crate::feedback::FeedbackOutcome;
use crate::learning::ProposalOutcome;
use crate::system::SystemMetrics;
use crate::types::{AxiomError, DomainId, SignalId, SubscriberId, Tick, TokenId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

// =============================================================================
// KINDS
// =============================================================================

/// The kind of a signal.
///
/// Extension kinds must be registered on the bus before they can be emitted.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SignalKind {
    Subscribe,
    Unsubscribe,
    Input,
    Feedback,
    SystemTick,
    ActionDecided,
    ProposalApplied,
    Extension(String),
}

impl SignalKind {
    /// Tags of every built-in kind.
    pub const BUILTIN_TAGS: [&'static str; 7] = [
        "subscribe",
        "unsubscribe",
        "input",
        "feedback",
        "system_tick",
        "action_decided",
        "proposal_applied",
    ];

    /// The textual tag of this kind.
    #[must_use]
    pub fn tag(&self) -> &str {
        match self {
            SignalKind::Subscribe => "subscribe",
            SignalKind::Unsubscribe => "unsubscribe",
            SignalKind::Input => "input",
            SignalKind::Feedback => "feedback",
            SignalKind::SystemTick => "system_tick",
            SignalKind::ActionDecided => "action_decided",
            SignalKind::ProposalApplied => "proposal_applied",
            SignalKind::Extension(name) => name,
        }
    }

    #[must_use]
    pub fn is_builtin(&self) -> bool {
        !matches!(self, SignalKind::Extension(_))
    }
}

impl FromStr for SignalKind {
    type Err = AxiomError;

    /// Parse a built-in kind. Extension kinds are resolved by
    /// [`SignalBus::parse_kind`], which knows the registered names.
    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "subscribe" => Ok(SignalKind::Subscribe),
            "unsubscribe" => Ok(SignalKind::Unsubscribe),
            "input" => Ok(SignalKind::Input),
            "feedback" => Ok(SignalKind::Feedback),
            "system_tick" => Ok(SignalKind::SystemTick),
            "action_decided" => Ok(SignalKind::ActionDecided),
            "proposal_applied" => Ok(SignalKind::ProposalApplied),
            other => Err(AxiomError::UnknownSignalKind(other.to_string())),
        }
    }
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

// =============================================================================
// CAUSE & TARGET
// =============================================================================

/// Why a signal exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Cause {
    /// Emitted spontaneously by the engine (e.g. the tick scheduler).
    None,
    /// Triggered by an external event, numbered by the engine.
    External(u64),
    /// Triggered by an earlier signal.
    Signal(SignalId),
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::None => f.write_str("none"),
            Cause::External(event) => write!(f, "ext{event}"),
            Cause::Signal(id) => write!(f, "{id}"),
        }
    }
}

/// Who should receive a signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalTarget {
    Broadcast,
    /// Subscribers bound to the domain, plus unbound observers.
    Domain(DomainId),
    Subscribers(BTreeSet<SubscriberId>),
}

// =============================================================================
// SIGNAL
// =============================================================================

/// Content of a signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SignalPayload {
    Empty,
    Subscription { subscriber: SubscriberId },
    /// Activation impulse for tokens.
    Activation { tokens: Vec<TokenId>, strength: f32 },
    Vector(Vec<f32>),
    /// Scalar state per token.
    States(Vec<(TokenId, f32)>),
    Tick(SystemMetrics),
    Feedback(FeedbackOutcome),
    Decision(Decision),
    Proposal(ProposalOutcome),
    Text(String),
}

/// An immutable message on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: SignalId,
    pub kind: SignalKind,
    pub payload: SignalPayload,
    pub cause: Cause,
    pub target: SignalTarget,
    pub tick: Tick,
}

impl Signal {
    /// The prior signal this one was caused by, if any.
    #[must_use]
    pub fn parent(&self) -> Option<SignalId> {
        match self.cause {
            Cause::Signal(id) => Some(id),
            Cause::None | Cause::External(_) => None,
        }
    }
}
