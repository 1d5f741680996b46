//! Messages to the host UI panel.

use crate::builder::ConversionResult;
use crate::progress::CardProgress;
use conduit_model::{CardId, ObjectId};
use tokio::sync::mpsc;

/// An event delivered to the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum CardEvent {
    /// Throttled progress of a running operation.
    Progress {
        /// Card id.
        card_id: CardId,
        /// Progress snapshot.
        progress: CardProgress,
    },
    /// A send finished.
    SendCompleted {
        /// Card id.
        card_id: CardId,
        /// Created version.
        version_id: String,
        /// Root object of the version.
        root_object_id: ObjectId,
        /// Summary line, e.g. "Completed with 1 errors".
        status: String,
        /// Per-object conversion report.
        conversion_results: Vec<ConversionResult>,
    },
    /// A receive finished.
    ReceiveCompleted {
        /// Card id.
        card_id: CardId,
        /// Host ids of the created objects.
        baked_object_ids: Vec<String>,
        /// Summary line.
        status: String,
        /// Per-object conversion report.
        conversion_results: Vec<ConversionResult>,
    },
    /// An operation failed.
    Error {
        /// Card id.
        card_id: CardId,
        /// Error message.
        message: String,
    },
    /// Sender cards whose objects changed since the last send.
    Expired {
        /// Expired card ids.
        card_ids: Vec<CardId>,
    },
}

impl CardEvent {
    /// Card the event belongs to, if it concerns a single card.
    pub fn card_id(&self) -> Option<&CardId> {
        match self {
            CardEvent::Progress { card_id, .. }
            | CardEvent::SendCompleted { card_id, .. }
            | CardEvent::ReceiveCompleted { card_id, .. }
            | CardEvent::Error { card_id, .. } => Some(card_id),
            CardEvent::Expired { .. } => None,
        }
    }
}

/// Sending half of the UI channel.
///
/// Delivery is best effort: a closed panel never fails an operation.
#[derive(Debug, Clone)]
pub struct UiBridge {
    sender: mpsc::UnboundedSender<CardEvent>,
}

impl UiBridge {
    /// Creates a bridge and the receiver the UI reads from.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<CardEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Sends an event, ignoring a closed receiver.
    pub fn send(&self, event: CardEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("ui channel closed, event dropped");
        }
    }

    /// Reports progress for a card.
    pub fn progress(&self, card_id: &CardId, progress: CardProgress) {
        self.send(CardEvent::Progress {
            card_id: card_id.clone(),
            progress,
        });
    }

    /// Reports an error for a card.
    pub fn error(&self, card_id: &CardId, message: impl Into<String>) {
        self.send(CardEvent::Error {
            card_id: card_id.clone(),
            message: message.into(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order() {
        let (ui, mut rx) = UiBridge::channel();
        let card = CardId::from("c");

        ui.error(&card, "boom");
        ui.send(CardEvent::Expired {
            card_ids: vec![card.clone()],
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.card_id(), Some(&card));
        assert!(matches!(first, CardEvent::Error { message, .. } if message == "boom"));
        assert!(matches!(rx.recv().await.unwrap(), CardEvent::Expired { .. }));
    }

    #[test]
    fn closed_receiver_is_ignored() {
        let (ui, rx) = UiBridge::channel();
        drop(rx);
        ui.error(&CardId::from("c"), "nobody listens");
    }
}
