//! Host-local model card store.

use crate::error::{EngineError, EngineResult};
use conduit_model::{CardId, ModelCard};
use parking_lot::RwLock;
use std::path::Path;

/// Model cards of one host document, persisted as JSON.
#[derive(Debug, Default)]
pub struct ModelCardStore {
    cards: RwLock<Vec<ModelCard>>,
}

impl ModelCardStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `cards`.
    pub fn with_cards(cards: Vec<ModelCard>) -> Self {
        Self {
            cards: RwLock::new(cards),
        }
    }

    /// Adds a card, replacing any card with the same id.
    pub fn add(&self, card: ModelCard) {
        let mut cards = self.cards.write();
        match cards.iter_mut().find(|c| c.id == card.id) {
            Some(existing) => *existing = card,
            None => cards.push(card),
        }
    }

    /// Removes a card.
    pub fn remove(&self, card_id: &CardId) -> Option<ModelCard> {
        let mut cards = self.cards.write();
        let index = cards.iter().position(|c| &c.id == card_id)?;
        Some(cards.remove(index))
    }

    /// Returns a copy of a card.
    pub fn get(&self, card_id: &CardId) -> EngineResult<ModelCard> {
        self.cards
            .read()
            .iter()
            .find(|c| &c.id == card_id)
            .cloned()
            .ok_or_else(|| EngineError::CardNotFound(card_id.clone()))
    }

    /// Applies `update` to a card under the write lock.
    pub fn update<R>(
        &self,
        card_id: &CardId,
        update: impl FnOnce(&mut ModelCard) -> R,
    ) -> EngineResult<R> {
        let mut cards = self.cards.write();
        let card = cards
            .iter_mut()
            .find(|c| &c.id == card_id)
            .ok_or_else(|| EngineError::CardNotFound(card_id.clone()))?;
        Ok(update(card))
    }

    /// Applies `update` to every sender card under one write lock.
    pub fn update_senders(&self, mut update: impl FnMut(&mut ModelCard)) {
        let mut cards = self.cards.write();
        for card in cards.iter_mut().filter(|c| c.as_sender().is_some()) {
            update(card);
        }
    }

    /// Returns copies of every sender card.
    pub fn senders(&self) -> Vec<ModelCard> {
        self.cards
            .read()
            .iter()
            .filter(|c| c.as_sender().is_some())
            .cloned()
            .collect()
    }

    /// Returns copies of every card.
    pub fn all(&self) -> Vec<ModelCard> {
        self.cards.read().clone()
    }

    /// Number of cards.
    pub fn len(&self) -> usize {
        self.cards.read().len()
    }

    /// Returns true if there are no cards.
    pub fn is_empty(&self) -> bool {
        self.cards.read().is_empty()
    }

    /// Encodes the cards as JSON.
    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(&*self.cards.read())?)
    }

    /// Decodes a store from JSON.
    pub fn from_json(json: &str) -> EngineResult<Self> {
        let cards: Vec<ModelCard> = serde_json::from_str(json)?;
        Ok(Self::with_cards(cards))
    }

    /// Writes the cards to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> EngineResult<()> {
        let json = self.to_json()?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Loads cards from `path`. A missing file yields an empty store.
    pub fn load(path: impl AsRef<Path>) -> EngineResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(json) => Self::from_json(&json),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(err) => Err(err.into()),
        }
    }
}
