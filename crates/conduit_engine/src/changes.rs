//! Change tracking and sender card expiry.
//!
//! Host event plumbing translates native notifications into [`HostEvent`]s.
//! The [`ChangeListener`] coalesces them into one [`ChangeSet`] held by the
//! [`ChangeTracker`] and flushes on idle: sender cards touching the changes
//! are marked expired and the changed ids are evicted from the conversion
//! cache before the flush returns.
//!
//! Each flush is remembered under the cache [`Epoch`] it evicted at, so a
//! send that started earlier can tell which of its cards and ids went stale
//! while it ran.

use crate::cache::{ConversionCache, Epoch};
use crate::cards::ModelCardStore;
use crate::ui::{CardEvent, UiBridge};
use conduit_model::{CardId, ChangeSet};
use parking_lot::Mutex;
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A change notification from the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// Objects were added or modified.
    ObjectsChanged {
        /// Host ids.
        object_ids: Vec<String>,
    },
    /// Objects were deleted.
    ObjectsDeleted {
        /// Host ids.
        object_ids: Vec<String>,
    },
    /// A layer and its objects were deleted.
    LayerRemoved {
        /// Layer name.
        layer: String,
        /// Host ids of the objects on the layer.
        object_ids: Vec<String>,
    },
    /// The active document was replaced; every cached conversion is stale.
    DocumentSwapped,
    /// The host went idle.
    Idle,
}

impl HostEvent {
    /// The change set carried by the event, if any.
    pub fn into_change_set(self) -> Option<ChangeSet> {
        match self {
            HostEvent::ObjectsChanged { object_ids } => Some(ChangeSet::changed(object_ids)),
            HostEvent::ObjectsDeleted { object_ids }
            | HostEvent::LayerRemoved { object_ids, .. } => Some(ChangeSet::removed(object_ids)),
            HostEvent::DocumentSwapped | HostEvent::Idle => None,
        }
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushOutcome {
    /// Sender cards newly marked expired.
    pub expired: Vec<CardId>,
    /// Conversion cache entries evicted.
    pub evicted: usize,
}

impl FlushOutcome {
    /// Returns true if the flush had no effect.
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.evicted == 0
    }
}

/// Flushes remembered for [`ChangeTracker::expired_since`].
const FLUSH_HISTORY: usize = 256;

#[derive(Debug)]
struct FlushRecord {
    epoch: Epoch,
    expired: Vec<CardId>,
    removed: BTreeSet<String>,
}

#[derive(Debug, Default)]
struct FlushHistory {
    records: VecDeque<FlushRecord>,
    floor: Epoch,
}

impl FlushHistory {
    fn since(&self, since: Epoch) -> impl Iterator<Item = &FlushRecord> {
        self.records
            .iter()
            .rev()
            .take_while(move |record| record.epoch > since)
    }
}

/// Accumulates host changes between flushes.
#[derive(Debug, Default)]
pub struct ChangeTracker {
    pending: Mutex<ChangeSet>,
    history: Mutex<FlushHistory>,
}

impl ChangeTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a batch of changes.
    pub fn record(&self, changes: ChangeSet) {
        self.pending.lock().merge(changes);
    }

    /// Returns true if changes are waiting for a flush.
    pub fn has_pending(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Drops pending changes without flushing them.
    pub fn clear(&self) {
        *self.pending.lock() = ChangeSet::new();
    }

    /// Returns true if a flush after `since` expired `card_id`.
    ///
    /// Epochs older than the remembered history always count as expired.
    /// Call this while holding the card store lock to order it against
    /// [`ChangeTracker::flush`].
    pub fn expired_since(&self, card_id: &CardId, since: Epoch) -> bool {
        let history = self.history.lock();
        history.floor > since || history.since(since).any(|r| r.expired.contains(card_id))
    }

    /// Returns true if a flush after `since` removed `application_id`.
    pub fn removed_since(&self, application_id: &str, since: Epoch) -> bool {
        self.history
            .lock()
            .since(since)
            .any(|r| r.removed.contains(application_id))
    }

    /// Expires affected sender cards and evicts changed ids from the cache.
    ///
    /// Eviction happens first, so a send storing its references afterwards
    /// skips the changed ids. Flushing again without new changes is a no-op.
    pub fn flush(&self, cards: &ModelCardStore, cache: &ConversionCache) -> FlushOutcome {
        let changes = std::mem::take(&mut *self.pending.lock());
        if changes.is_empty() {
            return FlushOutcome::default();
        }

        let ids: BTreeSet<String> = changes.all_ids().cloned().collect();
        let evicted = cache.evict(&ids);
        let epoch = cache.epoch();
        self.remember(FlushRecord {
            epoch,
            expired: Vec::new(),
            removed: changes.removed.clone(),
        });

        let mut expired = Vec::new();
        cards.update_senders(|card| {
            let card_id = card.id.clone();
            let Some(sender) = card.as_sender_mut() else {
                return;
            };
            let intersects = sender.object_ids.iter().any(|id| changes.contains(id));
            if intersects || sender.filter.check_expiry(&changes) {
                sender.expired = true;
                self.mark_expired(epoch, &card_id);
                expired.push(card_id);
            }
            if changes.has_deletions() {
                sender.object_ids.retain(|id| !changes.removed.contains(id));
                sender.filter.remove_ids(&changes.removed);
            }
        });

        tracing::info!(
            changed = changes.changed.len(),
            removed = changes.removed.len(),
            expired = expired.len(),
            evicted,
            "flushed host changes"
        );
        FlushOutcome { expired, evicted }
    }

    fn remember(&self, record: FlushRecord) {
        let mut history = self.history.lock();
        history.records.push_back(record);
        while history.records.len() > FLUSH_HISTORY {
            if let Some(dropped) = history.records.pop_front() {
                history.floor = dropped.epoch;
            }
        }
    }

    fn mark_expired(&self, epoch: Epoch, card_id: &CardId) {
        let mut history = self.history.lock();
        if let Some(record) = history.records.iter_mut().rev().find(|r| r.epoch == epoch) {
            record.expired.push(card_id.clone());
        }
    }
}

/// Background task turning host events into flushes.
pub struct ChangeListener {
    tracker: Arc<ChangeTracker>,
    cards: Arc<ModelCardStore>,
    cache: Arc<ConversionCache>,
    ui: UiBridge,
    idle_interval: Duration,
}

impl ChangeListener {
    /// Creates a listener flushing after `idle_interval` without events.
    pub fn new(
        tracker: Arc<ChangeTracker>,
        cards: Arc<ModelCardStore>,
        cache: Arc<ConversionCache>,
        ui: UiBridge,
        idle_interval: Duration,
    ) -> Self {
        Self {
            tracker,
            cards,
            cache,
            ui,
            idle_interval,
        }
    }

    /// Spawns the listener on the current runtime.
    pub fn spawn(
        self,
        events: mpsc::UnboundedReceiver<HostEvent>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(events, token))
    }

    /// Processes events until the channel closes or `token` is cancelled.
    ///
    /// Pending changes are flushed when the channel closes.
    pub async fn run(self, mut events: mpsc::UnboundedReceiver<HostEvent>, token: CancellationToken) {
        let start = tokio::time::Instant::now() + self.idle_interval;
        let mut idle = tokio::time::interval_at(start, self.idle_interval);
        idle.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                event = events.recv() => match event {
                    Some(event) => self.handle(event),
                    None => {
                        self.flush_and_notify();
                        break;
                    }
                },
                _ = idle.tick() => {
                    if self.tracker.has_pending() {
                        self.flush_and_notify();
                    }
                }
            }
        }
        tracing::debug!("change listener stopped");
    }

    fn handle(&self, event: HostEvent) {
        match event {
            HostEvent::Idle => self.flush_and_notify(),
            HostEvent::DocumentSwapped => {
                self.tracker.clear();
                self.cache.clear();
                tracing::info!("document swapped, conversion cache cleared");
            }
            HostEvent::LayerRemoved { layer, object_ids } => {
                tracing::debug!(layer = %layer, objects = object_ids.len(), "layer removed");
                self.tracker.record(ChangeSet::removed(object_ids));
            }
            event => {
                if let Some(changes) = event.into_change_set() {
                    self.tracker.record(changes);
                }
            }
        }
    }

    fn flush_and_notify(&self) {
        let outcome = self.tracker.flush(&self.cards, &self.cache);
        if !outcome.expired.is_empty() {
            self.ui.send(CardEvent::Expired {
                card_ids: outcome.expired,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_model::{ModelCard, ModelTarget, ObjectId, ObjectReference, SendFilter};
    use std::collections::HashMap;

    fn target() -> ModelTarget {
        ModelTarget::new("acc", "https://server.test", "proj", "model")
    }

    fn sender(id: &str, filter: SendFilter, object_ids: &[&str]) -> ModelCard {
        let mut card = ModelCard::sender(CardId::from(id), target(), filter);
        card.as_sender_mut().unwrap().object_ids = object_ids.iter().map(|s| s.to_string()).collect();
        card
    }

    fn cached(ids: &[&str]) -> ConversionCache {
        let cache = ConversionCache::new();
        let refs: HashMap<_, _> = ids
            .iter()
            .map(|id| {
                (
                    id.to_string(),
                    ObjectReference::new(ObjectId::from(format!("h-{id}"))).with_application_id(*id),
                )
            })
            .collect();
        cache.store("proj", &refs);
        cache
    }

    #[test]
    fn intersection_expires_card_and_evicts() {
        let cards = ModelCardStore::with_cards(vec![
            sender("s1", SendFilter::Layers { names: vec!["L".into()] }, &["a", "b"]),
            sender("s2", SendFilter::Layers { names: vec!["M".into()] }, &["c"]),
        ]);
        let cache = cached(&["a", "b", "c"]);
        let tracker = ChangeTracker::new();

        tracker.record(ChangeSet::changed(["a"]));
        let outcome = tracker.flush(&cards, &cache);

        assert_eq!(outcome.expired, vec![CardId::from("s1")]);
        assert_eq!(outcome.evicted, 1);
        assert!(cache.lookup("proj", "a").is_none());
        assert!(cache.lookup("proj", "b").is_some());
        assert!(cards.get(&CardId::from("s1")).unwrap().as_sender().unwrap().expired);
        assert!(!cards.get(&CardId::from("s2")).unwrap().as_sender().unwrap().expired);
    }

    #[test]
    fn second_flush_is_noop() {
        let cards = ModelCardStore::with_cards(vec![sender("s1", SendFilter::Everything, &["a"])]);
        let cache = cached(&["a"]);
        let tracker = ChangeTracker::new();

        tracker.record(ChangeSet::changed(["a"]));
        assert!(!tracker.flush(&cards, &cache).is_empty());
        assert!(tracker.flush(&cards, &cache).is_empty());
        assert!(!tracker.has_pending());
    }

    #[test]
    fn everything_filter_expires_on_unrelated_change() {
        let cards = ModelCardStore::with_cards(vec![sender("s1", SendFilter::Everything, &["a"])]);
        let tracker = ChangeTracker::new();

        tracker.record(ChangeSet::changed(["zzz"]));
        let outcome = tracker.flush(&cards, &ConversionCache::new());
        assert_eq!(outcome.expired, vec![CardId::from("s1")]);
    }

    #[test]
    fn removed_ids_leave_cards_and_selection() {
        let filter = SendFilter::Selection {
            object_ids: vec!["a".into(), "b".into()],
        };
        let cards = ModelCardStore::with_cards(vec![ModelCard::sender(
            CardId::from("s1"),
            target(),
            filter,
        )]);
        let tracker = ChangeTracker::new();

        tracker.record(ChangeSet::removed(["b"]));
        let outcome = tracker.flush(&cards, &ConversionCache::new());

        assert_eq!(outcome.expired, vec![CardId::from("s1")]);
        let card = cards.get(&CardId::from("s1")).unwrap();
        let sender = card.as_sender().unwrap();
        assert_eq!(sender.object_ids, vec!["a".to_string()]);
        assert_eq!(sender.filter.selected_ids(), &["a".to_string()]);
    }

    #[test]
    fn flush_history_answers_since_queries() {
        let cards = ModelCardStore::with_cards(vec![
            sender("s1", SendFilter::Layers { names: vec!["L".into()] }, &["a", "b"]),
            sender("s2", SendFilter::Layers { names: vec!["M".into()] }, &["c"]),
        ]);
        let cache = ConversionCache::new();
        let tracker = ChangeTracker::new();
        let before = cache.epoch();

        tracker.record(ChangeSet::changed(["a"]));
        tracker.record(ChangeSet::removed(["b"]));
        tracker.flush(&cards, &cache);
        let after = cache.epoch();

        assert!(tracker.expired_since(&CardId::from("s1"), before));
        assert!(!tracker.expired_since(&CardId::from("s2"), before));
        assert!(!tracker.expired_since(&CardId::from("s1"), after));
        assert!(tracker.removed_since("b", before));
        assert!(!tracker.removed_since("a", before));
        assert!(!tracker.removed_since("b", after));
        // Nothing was cached, yet the ids can no longer be stored.
        assert!(cache.evicted_since("a", before));
    }

    #[test]
    fn receivers_are_untouched() {
        let cards = ModelCardStore::with_cards(vec![ModelCard::receiver(
            CardId::from("r1"),
            target(),
            None,
        )]);
        let tracker = ChangeTracker::new();
        tracker.record(ChangeSet::changed(["a"]));
        assert!(tracker.flush(&cards, &ConversionCache::new()).expired.is_empty());
    }

    #[test]
    fn host_event_translation() {
        let changed = HostEvent::ObjectsChanged {
            object_ids: vec!["a".into()],
        };
        assert_eq!(changed.into_change_set(), Some(ChangeSet::changed(["a"])));

        let layer = HostEvent::LayerRemoved {
            layer: "L".into(),
            object_ids: vec!["b".into()],
        };
        assert_eq!(layer.into_change_set(), Some(ChangeSet::removed(["b"])));
        assert_eq!(HostEvent::Idle.into_change_set(), None);
    }

    #[tokio::test]
    async fn listener_coalesces_and_flushes_on_idle() {
        let tracker = Arc::new(ChangeTracker::new());
        let cards = Arc::new(ModelCardStore::with_cards(vec![sender(
            "s1",
            SendFilter::Layers { names: vec![] },
            &["a", "b"],
        )]));
        let cache = Arc::new(cached(&["a", "b"]));
        let (ui, mut ui_rx) = UiBridge::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let listener = ChangeListener::new(
            Arc::clone(&tracker),
            Arc::clone(&cards),
            Arc::clone(&cache),
            ui,
            Duration::from_secs(3600),
        );
        let handle = listener.spawn(events_rx, CancellationToken::new());

        events_tx
            .send(HostEvent::ObjectsChanged { object_ids: vec!["a".into()] })
            .unwrap();
        events_tx
            .send(HostEvent::ObjectsChanged { object_ids: vec!["b".into()] })
            .unwrap();
        events_tx.send(HostEvent::Idle).unwrap();

        let event = ui_rx.recv().await.unwrap();
        assert_eq!(
            event,
            CardEvent::Expired {
                card_ids: vec![CardId::from("s1")]
            }
        );
        assert!(cache.is_empty());

        drop(events_tx);
        handle.await.unwrap();
        assert!(ui_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn document_swap_clears_cache() {
        let tracker = Arc::new(ChangeTracker::new());
        let cards = Arc::new(ModelCardStore::new());
        let cache = Arc::new(cached(&["a"]));
        let (ui, _ui_rx) = UiBridge::channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let handle = ChangeListener::new(
            Arc::clone(&tracker),
            cards,
            Arc::clone(&cache),
            ui,
            Duration::from_secs(3600),
        )
        .spawn(events_rx, CancellationToken::new());

        events_tx
            .send(HostEvent::ObjectsChanged { object_ids: vec!["a".into()] })
            .unwrap();
        events_tx.send(HostEvent::DocumentSwapped).unwrap();
        drop(events_tx);
        handle.await.unwrap();

        assert!(cache.is_empty());
        assert!(!tracker.has_pending());
    }
}
