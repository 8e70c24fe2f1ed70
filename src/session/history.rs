use crate::backend::Token;
use ringbuf::{traits::*, HeapRb};

/// Fixed-size ring of the most recently evaluated tokens
///
/// Fed with both sampled and human tokens; the backend reads it for
/// repetition penalties and the session scans its tail for turn markers.
pub struct RecentTokens {
    ring: HeapRb<Token>,
}

impl RecentTokens {
    /// Create an empty ring holding at most `capacity` tokens
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    /// Append a token, evicting the oldest one when full
    pub fn push(&mut self, token: Token) {
        if self.ring.try_push(token).is_err() {
            let _ = self.ring.try_pop();
            let _ = self.ring.try_push(token);
        }
    }

    /// All tokens, oldest first
    pub fn to_vec(&self) -> Vec<Token> {
        self.ring.iter().copied().collect()
    }

    /// The newest `n` tokens, oldest first
    pub fn tail(&self, n: usize) -> Vec<Token> {
        let skip = self.len().saturating_sub(n);
        self.ring.iter().skip(skip).copied().collect()
    }

    /// Most recently pushed token
    pub fn last(&self) -> Option<Token> {
        self.ring.iter().last().copied()
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn clear(&mut self) {
        self.ring.clear();
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }
}
