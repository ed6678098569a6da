//! Curiosity queue: where inputs the Gateway could not resolve are parked.

use super::input::InputSignal;
use crate::signals::Cause;
use crate::types::{Tick, TokenId};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// An input that matched nothing closely enough.
#[derive(Debug, Clone, PartialEq)]
pub struct UnresolvedInput {
    pub input: InputSignal,
    /// Cause of the original submission. `Engine::reoffer` reuses it so the
    /// follow-up signal belongs to the same causal chain.
    pub cause: Cause,
    pub tick: Tick,
    /// Closest token below the threshold, if any, with its similarity.
    pub best_guess: Option<(TokenId, f32)>,
}

/// Receives unresolved inputs. Must not block.
pub trait CuriosityQueue: Send + Sync {
    /// Returns `false` if the input was not accepted.
    fn enqueue(&self, item: UnresolvedInput) -> bool;
}

/// Bounded in-memory curiosity queue.
#[derive(Debug)]
pub struct CuriosityBuffer {
    items: Mutex<VecDeque<UnresolvedInput>>,
    capacity: usize,
}

impl CuriosityBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Take every queued input, oldest first.
    pub fn drain(&self) -> Vec<UnresolvedInput> {
        self.items.lock().drain(..).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

impl CuriosityQueue for CuriosityBuffer {
    fn enqueue(&self, item: UnresolvedInput) -> bool {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            tracing::warn!(capacity = self.capacity, "curiosity queue full, input dropped");
            return false;
        }
        items.push_back(item);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(text: &str) -> UnresolvedInput {
        UnresolvedInput {
            input: InputSignal::word(text),
            cause: Cause::External(0),
            tick: Tick(0),
            best_guess: None,
        }
    }

    #[test]
    fn buffer_is_bounded_and_fifo() {
        let buffer = CuriosityBuffer::new(2);
        assert!(buffer.enqueue(item("a")));
        assert!(buffer.enqueue(item("b")));
        assert!(!buffer.enqueue(item("c")));
        let drained = buffer.drain();
        assert_eq!(drained[0].input, InputSignal::word("a"));
        assert_eq!(drained.len(), 2);
        assert!(buffer.is_empty());
    }
}
