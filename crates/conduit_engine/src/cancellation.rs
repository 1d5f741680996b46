//! Per-card cancellation tokens.
//!
//! At most one operation per model card is in flight. Starting a new one
//! cancels its predecessor before the new token is handed out, so two
//! operations for the same card never observe overlapping live tokens.

use crate::error::{EngineError, EngineResult};
use conduit_model::CardId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Token handed to one operation.
#[derive(Debug, Clone)]
pub struct CancellationItem {
    generation: u64,
    token: CancellationToken,
}

impl CancellationItem {
    /// The cancellation token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Monotonic id distinguishing this operation from its successors.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Registry of in-flight operations keyed by card id.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    items: DashMap<CardId, CancellationItem>,
    next_generation: AtomicU64,
}

impl CancellationRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any in-flight operation for `card_id` and registers a new one.
    pub fn begin(&self, card_id: &CardId) -> CancellationItem {
        let item = CancellationItem {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        // The shard lock is held across cancel and insert.
        match self.items.entry(card_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(mut entry) => {
                entry.get().token.cancel();
                tracing::debug!(card_id = %card_id, "cancelled superseded operation");
                entry.insert(item.clone());
            }
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(item.clone());
            }
        }
        item
    }

    /// Cancels and forgets the in-flight operation for `card_id`.
    ///
    /// Returns false if nothing was in flight.
    pub fn cancel(&self, card_id: &CardId) -> bool {
        match self.items.remove(card_id) {
            Some((_, item)) => {
                item.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Releases `item` once its operation ends.
    ///
    /// A superseded operation leaves its successor's registration in place.
    pub fn finish(&self, card_id: &CardId, item: &CancellationItem) {
        self.items
            .remove_if(card_id, |_, current| current.generation == item.generation);
    }

    /// Returns true if an operation for `card_id` is registered.
    pub fn is_in_flight(&self, card_id: &CardId) -> bool {
        self.items.contains_key(card_id)
    }

    /// Cancels every in-flight operation.
    pub fn cancel_all(&self) {
        self.items.retain(|_, item| {
            item.token.cancel();
            false
        });
    }

    /// Number of in-flight operations.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is in flight.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fails with [`EngineError::Cancelled`] once `token` is cancelled.
pub fn check(token: &CancellationToken) -> EngineResult<()> {
    if token.is_cancelled() {
        Err(EngineError::Cancelled)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn begin_cancels_previous() {
        let registry = CancellationRegistry::new();
        let card = CardId::from("card");

        let first = registry.begin(&card);
        let second = registry.begin(&card);

        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn finish_keeps_successor() {
        let registry = CancellationRegistry::new();
        let card = CardId::from("card");

        let first = registry.begin(&card);
        let second = registry.begin(&card);

        registry.finish(&card, &first);
        assert!(registry.is_in_flight(&card));

        registry.finish(&card, &second);
        assert!(!registry.is_in_flight(&card));
    }

    #[test]
    fn cancel_removes() {
        let registry = CancellationRegistry::new();
        let card = CardId::from("card");

        let item = registry.begin(&card);
        assert!(registry.cancel(&card));
        assert!(item.is_cancelled());
        assert!(!registry.is_in_flight(&card));
        assert!(!registry.cancel(&card));
    }

    #[test]
    fn cards_are_independent() {
        let registry = CancellationRegistry::new();
        let a = registry.begin(&CardId::from("a"));
        let b = registry.begin(&CardId::from("b"));

        registry.cancel(&CardId::from("a"));
        assert!(a.is_cancelled());
        assert!(!b.is_cancelled());
    }

    #[test]
    fn cancel_all_clears() {
        let registry = CancellationRegistry::new();
        let a = registry.begin(&CardId::from("a"));
        let b = registry.begin(&CardId::from("b"));

        registry.cancel_all();
        assert!(a.is_cancelled() && b.is_cancelled());
        assert!(registry.is_empty());
    }

    #[test]
    fn check_reports_cancellation() {
        let token = CancellationToken::new();
        assert!(check(&token).is_ok());
        token.cancel();
        assert!(check(&token).unwrap_err().is_cancelled());
    }

    #[test]
    fn concurrent_begins_leave_one_live_token() {
        let registry = Arc::new(CancellationRegistry::new());
        let card = CardId::from("card");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                let card = card.clone();
                std::thread::spawn(move || {
                    (0..50).map(|_| registry.begin(&card)).collect::<Vec<_>>()
                })
            })
            .collect();

        let items: Vec<CancellationItem> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();

        let live = items.iter().filter(|i| !i.is_cancelled()).count();
        assert_eq!(live, 1);
    }
}
