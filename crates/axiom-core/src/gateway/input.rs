//! External inputs accepted by the Gateway and what they resolve to.

use crate::feedback::{FeedbackOutcome, FeedbackSignal};
use crate::types::{DomainId, SignalId, TokenId};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Requests for the runner rather than the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Advance the scheduler by `count` ticks.
    Tick { count: u64 },
    /// Drain in-flight signals and stop.
    Shutdown,
}

/// An input from outside the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputSignal {
    /// A word, resolved by label, embedding or nearest neighbour.
    Word {
        text: String,
        /// Restrict nearest-neighbour resolution to one domain.
        #[serde(default)]
        domain: Option<DomainId>,
        #[serde(default)]
        strength: Option<f32>,
    },
    /// A raw embedding vector.
    Vector {
        values: Vec<f32>,
        #[serde(default)]
        domain: Option<DomainId>,
        #[serde(default)]
        strength: Option<f32>,
    },
    /// An existing token, activated without resolution.
    DirectToken {
        token: TokenId,
        #[serde(default)]
        strength: Option<f32>,
    },
    Feedback(FeedbackSignal),
    Command { command: Command },
}

impl InputSignal {
    #[must_use]
    pub fn word(text: impl Into<String>) -> Self {
        InputSignal::Word {
            text: text.into(),
            domain: None,
            strength: None,
        }
    }

    #[must_use]
    pub fn vector(values: Vec<f32>) -> Self {
        InputSignal::Vector {
            values,
            domain: None,
            strength: None,
        }
    }

    #[must_use]
    pub fn token(token: TokenId) -> Self {
        InputSignal::DirectToken {
            token,
            strength: None,
        }
    }

    /// Short name for logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            InputSignal::Word { .. } => "word",
            InputSignal::Vector { .. } => "vector",
            InputSignal::DirectToken { .. } => "direct_token",
            InputSignal::Feedback(_) => "feedback",
            InputSignal::Command { .. } => "command",
        }
    }
}

impl fmt::Display for InputSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputSignal::Word { text, .. } => write!(f, "word '{text}'"),
            InputSignal::Vector { values, .. } => write!(f, "vector of {} components", values.len()),
            InputSignal::DirectToken { token, .. } => write!(f, "token {token}"),
            InputSignal::Feedback(signal) => write!(f, "feedback {:?}", signal.kind),
            InputSignal::Command { command } => write!(f, "command {command:?}"),
        }
    }
}

/// How a word or vector was mapped onto a token.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// Label match or bit-identical embedding.
    Exact,
    /// Nearest neighbour above the similarity threshold.
    Nearest { similarity: f32 },
    /// Resolution cache hit, confirmed against the Graph Store.
    Cached,
    /// Input named the token directly.
    Direct,
    /// A token was created for the input.
    Created,
}

/// Result of processing one input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessedSignal {
    /// An `Input` signal carrying an activation impulse was emitted.
    Activated {
        signal: SignalId,
        token: TokenId,
        domain: Option<DomainId>,
        resolution: Resolution,
    },
    /// Feedback was applied and a `Feedback` signal emitted.
    Feedback {
        signal: SignalId,
        outcome: FeedbackOutcome,
    },
    /// A runner command, passed through untouched.
    Command(Command),
}

impl ProcessedSignal {
    /// The emitted signal, if any.
    #[must_use]
    pub fn signal(&self) -> Option<SignalId> {
        match self {
            ProcessedSignal::Activated { signal, .. } | ProcessedSignal::Feedback { signal, .. } => {
                Some(*signal)
            }
            ProcessedSignal::Command(_) => None,
        }
    }
}
