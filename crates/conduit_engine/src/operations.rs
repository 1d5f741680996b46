//! Card-level entry points.
//!
//! These are what a connector's UI binding calls. Each operation registers
//! with the [`CancellationRegistry`] (cancelling any predecessor for the same
//! card), runs the pipeline, updates the card and reports the outcome on the
//! UI channel. Cancellation is swallowed; every other error becomes a
//! [`CardEvent::Error`].

use crate::builder::{
    completion_status, resolve_selection, HostObject, HostObjectBuilder, HostObjectBuilderResult,
    HostSelection, RootObjectBuilder,
};
use crate::cache::ConversionCache;
use crate::cancellation::CancellationRegistry;
use crate::cards::ModelCardStore;
use crate::changes::{ChangeListener, ChangeTracker, FlushOutcome};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::host_thread::HostThread;
use crate::object_cache::LocalObjectCache;
use crate::progress::ThrottledProgress;
use crate::receive::ReceiveOperation;
use crate::send::{SendOperation, SendOperationResult};
use crate::sender::RootObjectSender;
use crate::transport::{AccountProvider, ServerApi};
use crate::ui::{CardEvent, UiBridge};
use conduit_model::{CardId, ModelCard};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Shared state of one connector instance.
pub struct EngineContext {
    /// Configuration.
    pub config: Arc<EngineConfig>,
    /// Model cards of the open document.
    pub cards: Arc<ModelCardStore>,
    /// Conversion cache.
    pub cache: Arc<ConversionCache>,
    /// Local object cache.
    pub objects: Arc<LocalObjectCache>,
    /// Pending host changes.
    pub tracker: Arc<ChangeTracker>,
    /// In-flight operations.
    pub cancellation: Arc<CancellationRegistry>,
    /// Account lookup.
    pub accounts: Arc<dyn AccountProvider>,
    /// Server access.
    pub api: Arc<dyn ServerApi>,
    /// Host thread for conversions and baking.
    pub host: Arc<dyn HostThread>,
    /// UI channel.
    pub ui: UiBridge,
}

impl EngineContext {
    /// Creates a context with empty stores and caches.
    pub fn new(
        config: EngineConfig,
        accounts: Arc<dyn AccountProvider>,
        api: Arc<dyn ServerApi>,
        host: Arc<dyn HostThread>,
        ui: UiBridge,
    ) -> Self {
        Self {
            config: Arc::new(config),
            cards: Arc::new(ModelCardStore::new()),
            cache: Arc::new(ConversionCache::new()),
            objects: Arc::new(LocalObjectCache::new()),
            tracker: Arc::new(ChangeTracker::new()),
            cancellation: Arc::new(CancellationRegistry::new()),
            accounts,
            api,
            host,
            ui,
        }
    }

    /// Uses an existing card store.
    pub fn with_cards(mut self, cards: Arc<ModelCardStore>) -> Self {
        self.cards = cards;
        self
    }

    /// Shares a process-wide local object cache.
    pub fn with_object_cache(mut self, objects: Arc<LocalObjectCache>) -> Self {
        self.objects = objects;
        self
    }

    /// Creates a sender bound to this context.
    pub fn sender(&self) -> RootObjectSender {
        RootObjectSender::new(
            Arc::clone(&self.config),
            Arc::clone(&self.accounts),
            Arc::clone(&self.api),
            Arc::clone(&self.cache),
            Arc::clone(&self.objects),
        )
    }

    /// Creates a change listener bound to this context.
    pub fn change_listener(&self, idle_interval: Duration) -> ChangeListener {
        ChangeListener::new(
            Arc::clone(&self.tracker),
            Arc::clone(&self.cards),
            Arc::clone(&self.cache),
            self.ui.clone(),
            idle_interval,
        )
    }

    /// Flushes pending changes now and notifies the UI of expired cards.
    pub fn flush_changes(&self) -> FlushOutcome {
        let outcome = self.tracker.flush(&self.cards, &self.cache);
        if !outcome.expired.is_empty() {
            self.ui.send(CardEvent::Expired {
                card_ids: outcome.expired.clone(),
            });
        }
        outcome
    }

    fn progress_for(&self, card_id: &CardId) -> ThrottledProgress {
        ThrottledProgress::new(card_id.clone(), self.config.progress_interval, self.ui.clone())
    }
}

/// Send and receive entry points for one connector.
pub struct CardOperations<T> {
    context: Arc<EngineContext>,
    selection: Arc<dyn HostSelection<T>>,
    root_builder: Arc<dyn RootObjectBuilder<T>>,
    host_builder: Arc<dyn HostObjectBuilder>,
}

impl<T: HostObject> CardOperations<T> {
    /// Creates the entry points.
    pub fn new(
        context: Arc<EngineContext>,
        selection: Arc<dyn HostSelection<T>>,
        root_builder: Arc<dyn RootObjectBuilder<T>>,
        host_builder: Arc<dyn HostObjectBuilder>,
    ) -> Self {
        Self {
            context,
            selection,
            root_builder,
            host_builder,
        }
    }

    /// The shared context.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Sends a sender card and reports the outcome on the UI channel.
    ///
    /// Returns `None` if the send failed or was cancelled.
    pub async fn send(&self, card_id: &CardId) -> Option<SendOperationResult> {
        match self.try_send(card_id).await {
            Ok(result) => {
                self.context.ui.send(CardEvent::SendCompleted {
                    card_id: card_id.clone(),
                    version_id: result.version_id.clone(),
                    root_object_id: result.root_object_id.clone(),
                    status: completion_status(&result.conversion_results),
                    conversion_results: result.conversion_results.clone(),
                });
                Some(result)
            }
            Err(err) => {
                self.report_failure(card_id, "send", &err);
                None
            }
        }
    }

    /// Sends a sender card, returning errors to the caller.
    pub async fn try_send(&self, card_id: &CardId) -> EngineResult<SendOperationResult> {
        let card = self.context.cards.get(card_id)?;
        let item = self.context.cancellation.begin(card_id);
        let result = self.run_send(&card, item.token()).await;
        self.context.cancellation.finish(card_id, &item);
        result
    }

    async fn run_send(
        &self,
        card: &ModelCard,
        token: &CancellationToken,
    ) -> EngineResult<SendOperationResult> {
        let context = &self.context;
        let sender = card.as_sender().ok_or_else(|| EngineError::InvalidCard {
            card_id: card.id.clone(),
            reason: "not a sender card".into(),
        })?;
        let send_info = card
            .send_info(&context.config.source_application)
            .ok_or_else(|| EngineError::InvalidCard {
                card_id: card.id.clone(),
                reason: "not a sender card".into(),
            })?;

        let since = context.cache.epoch();
        let objects = resolve_selection(self.selection.as_ref(), &sender.filter)?;
        tracing::info!(card_id = %card.id, objects = objects.len(), "send started");

        let progress = context.progress_for(&card.id);
        let operation = SendOperation::new(
            Arc::clone(&self.root_builder),
            Arc::new(context.sender()),
        );
        let result = operation
            .execute(&objects, &send_info, since, &progress, token)
            .await?;

        let tracker = &context.tracker;
        let mut object_ids: Vec<String> = objects.iter().map(|o| o.id().to_string()).collect();
        let version_id = result.version_id.clone();
        // Flushes take the card lock too, so their history is complete here.
        let updated = context.cards.update(&card.id, move |card| {
            let card_id = card.id.clone();
            if let Some(sender) = card.as_sender_mut() {
                object_ids.retain(|id| !tracker.removed_since(id, since));
                sender.object_ids = object_ids;
                sender.latest_created_version_id = Some(version_id);
                if tracker.expired_since(&card_id, since) {
                    tracing::debug!(card_id = %card_id, "card changed during send, still expired");
                } else {
                    sender.expired = false;
                }
            }
        });
        card_removed_is_logged(updated, "send")?;
        Ok(result)
    }

    /// Receives a receiver card's selected version and reports the outcome.
    ///
    /// Returns `None` if the receive failed or was cancelled.
    pub async fn receive(&self, card_id: &CardId) -> Option<HostObjectBuilderResult> {
        match self.try_receive(card_id).await {
            Ok(result) => {
                self.context.ui.send(CardEvent::ReceiveCompleted {
                    card_id: card_id.clone(),
                    baked_object_ids: result.baked_object_ids.clone(),
                    status: completion_status(&result.conversion_results),
                    conversion_results: result.conversion_results.clone(),
                });
                Some(result)
            }
            Err(err) => {
                self.report_failure(card_id, "receive", &err);
                None
            }
        }
    }

    /// Receives a receiver card, returning errors to the caller.
    pub async fn try_receive(&self, card_id: &CardId) -> EngineResult<HostObjectBuilderResult> {
        let card = self.context.cards.get(card_id)?;
        let item = self.context.cancellation.begin(card_id);
        let result = self.run_receive(&card, item.token()).await;
        self.context.cancellation.finish(card_id, &item);
        result
    }

    async fn run_receive(
        &self,
        card: &ModelCard,
        token: &CancellationToken,
    ) -> EngineResult<HostObjectBuilderResult> {
        let context = &self.context;
        let receive_info = card
            .receive_info(&context.config.source_application)
            .ok_or_else(|| EngineError::InvalidCard {
                card_id: card.id.clone(),
                reason: "not a receiver card with a selected version".into(),
            })?;
        tracing::info!(
            card_id = %card.id,
            version_id = %receive_info.selected_version_id,
            "receive started"
        );

        let progress = context.progress_for(&card.id);
        let operation = ReceiveOperation::new(
            Arc::clone(&context.config),
            Arc::clone(&context.accounts),
            Arc::clone(&context.api),
            Arc::clone(&context.objects),
            Arc::clone(&self.host_builder),
        );
        let result = operation.execute(&receive_info, &progress, token).await?;

        let baked = result.baked_object_ids.clone();
        let updated = context.cards.update(&card.id, move |card| {
            if let Some(receiver) = card.as_receiver_mut() {
                receiver.baked_object_ids = baked;
            }
        });
        card_removed_is_logged(updated, "receive")?;
        Ok(result)
    }

    /// Cancels the in-flight operation of a card.
    pub fn cancel(&self, card_id: &CardId) -> bool {
        self.context.cancellation.cancel(card_id)
    }

    fn report_failure(&self, card_id: &CardId, operation: &str, err: &EngineError) {
        if err.is_cancelled() {
            tracing::debug!(card_id = %card_id, operation, "operation cancelled");
            return;
        }
        tracing::error!(card_id = %card_id, operation, error = %err, "operation failed");
        self.context.ui.error(card_id, err.to_string());
    }
}

/// The outcome of a finished operation stands even if its card was removed
/// meanwhile.
fn card_removed_is_logged(updated: EngineResult<()>, operation: &str) -> EngineResult<()> {
    match updated {
        Err(EngineError::CardNotFound(card_id)) => {
            tracing::warn!(card_id = %card_id, operation, "card removed while operation ran");
            Ok(())
        }
        other => other,
    }
}

impl<T: HostObject> CardOperations<T> {
    /// Runs [`CardOperations::send`] as a background task.
    pub fn spawn_send(self: &Arc<Self>, card_id: CardId) -> JoinHandle<Option<SendOperationResult>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.send(&card_id).await })
    }

    /// Runs [`CardOperations::receive`] as a background task.
    pub fn spawn_receive(
        self: &Arc<Self>,
        card_id: CardId,
    ) -> JoinHandle<Option<HostObjectBuilderResult>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.receive(&card_id).await })
    }
}
