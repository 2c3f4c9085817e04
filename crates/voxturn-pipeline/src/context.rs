use std::sync::{Mutex, PoisonError};
use voxturn_core::BoundedHistory;
use voxturn_engine::ContextTurn;

/// The most recent finalized exchanges, handed to the response generator.
pub struct RecentContext {
    limit: usize,
    turns: Mutex<BoundedHistory<ContextTurn>>,
}

impl RecentContext {
    /// A `limit` of zero keeps no context at all.
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            turns: Mutex::new(BoundedHistory::new(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn push(&self, user: impl Into<String>, assistant: impl Into<String>) {
        if self.limit == 0 {
            return;
        }
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(ContextTurn {
                user: user.into(),
                assistant: assistant.into(),
            });
    }

    /// Oldest first.
    pub fn snapshot(&self) -> Vec<ContextTurn> {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .to_vec()
    }

    pub fn len(&self) -> usize {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.turns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
