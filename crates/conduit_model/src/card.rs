//! Model cards: persistent sender and receiver bindings.

use crate::change::ChangeSet;
use crate::ids::CardId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// The server model a card is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTarget {
    /// Account used to talk to the server.
    pub account_id: String,
    /// Server URL.
    pub server_url: String,
    /// Project id.
    pub project_id: String,
    /// Model id.
    pub model_id: String,
}

impl ModelTarget {
    /// Creates a target.
    pub fn new(
        account_id: impl Into<String>,
        server_url: impl Into<String>,
        project_id: impl Into<String>,
        model_id: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            server_url: server_url.into(),
            project_id: project_id.into(),
            model_id: model_id.into(),
        }
    }
}

/// How a sender card selects host objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SendFilter {
    /// Every object in the document.
    Everything,
    /// An explicit list of host object ids.
    Selection {
        /// Selected ids.
        object_ids: Vec<String>,
    },
    /// Every object on the named layers.
    Layers {
        /// Layer names.
        names: Vec<String>,
    },
}

impl SendFilter {
    /// Ids the filter names explicitly.
    pub fn selected_ids(&self) -> &[String] {
        match self {
            SendFilter::Selection { object_ids } => object_ids,
            _ => &[],
        }
    }

    /// Filter-specific expiry check, on top of the id intersection.
    ///
    /// A selection is expired as soon as one of its ids is deleted; an
    /// everything filter by any change at all.
    pub fn check_expiry(&self, changes: &ChangeSet) -> bool {
        match self {
            SendFilter::Everything => !changes.is_empty(),
            SendFilter::Selection { object_ids } => {
                object_ids.iter().any(|id| changes.removed.contains(id))
            }
            SendFilter::Layers { .. } => false,
        }
    }

    /// Drops deleted ids from an explicit selection.
    pub fn remove_ids(&mut self, removed: &BTreeSet<String>) {
        if let SendFilter::Selection { object_ids } = self {
            object_ids.retain(|id| !removed.contains(id));
        }
    }
}

/// State of a sender card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderCard {
    /// Object filter.
    pub filter: SendFilter,
    /// Host ids resolved by the last send (or the explicit selection).
    #[serde(default)]
    pub object_ids: Vec<String>,
    /// Whether previously sent objects have changed since.
    #[serde(default)]
    pub expired: bool,
    /// Version created by the last successful send.
    #[serde(default)]
    pub latest_created_version_id: Option<String>,
}

/// State of a receiver card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverCard {
    /// Version to receive.
    pub selected_version_id: Option<String>,
    /// Host ids created by the last receive.
    #[serde(default)]
    pub baked_object_ids: Vec<String>,
}

/// Sender or receiver state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CardKind {
    /// Sends host objects to the model.
    Sender(SenderCard),
    /// Receives a model version into the host.
    Receiver(ReceiverCard),
}

/// A persistent channel between a host selection and a server model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCard {
    /// Card id.
    pub id: CardId,
    /// Bound model.
    pub target: ModelTarget,
    /// Sender or receiver state.
    pub kind: CardKind,
}

impl ModelCard {
    /// Creates a sender card. Explicit selections seed the tracked ids.
    pub fn sender(id: CardId, target: ModelTarget, filter: SendFilter) -> Self {
        let object_ids = filter.selected_ids().to_vec();
        Self {
            id,
            target,
            kind: CardKind::Sender(SenderCard {
                filter,
                object_ids,
                expired: false,
                latest_created_version_id: None,
            }),
        }
    }

    /// Creates a receiver card.
    pub fn receiver(id: CardId, target: ModelTarget, selected_version_id: Option<String>) -> Self {
        Self {
            id,
            target,
            kind: CardKind::Receiver(ReceiverCard {
                selected_version_id,
                baked_object_ids: Vec::new(),
            }),
        }
    }

    /// Returns the sender state.
    pub fn as_sender(&self) -> Option<&SenderCard> {
        match &self.kind {
            CardKind::Sender(sender) => Some(sender),
            CardKind::Receiver(_) => None,
        }
    }

    /// Returns the mutable sender state.
    pub fn as_sender_mut(&mut self) -> Option<&mut SenderCard> {
        match &mut self.kind {
            CardKind::Sender(sender) => Some(sender),
            CardKind::Receiver(_) => None,
        }
    }

    /// Returns the receiver state.
    pub fn as_receiver(&self) -> Option<&ReceiverCard> {
        match &self.kind {
            CardKind::Receiver(receiver) => Some(receiver),
            CardKind::Sender(_) => None,
        }
    }

    /// Returns the mutable receiver state.
    pub fn as_receiver_mut(&mut self) -> Option<&mut ReceiverCard> {
        match &mut self.kind {
            CardKind::Receiver(receiver) => Some(receiver),
            CardKind::Sender(_) => None,
        }
    }

    /// Builds the per-operation send record. `None` for receiver cards.
    pub fn send_info(&self, source_application: &str) -> Option<SendInfo> {
        self.as_sender()?;
        Some(SendInfo {
            account_id: self.target.account_id.clone(),
            server_url: self.target.server_url.clone(),
            project_id: self.target.project_id.clone(),
            model_id: self.target.model_id.clone(),
            source_application: source_application.to_string(),
        })
    }

    /// Builds the per-operation receive record. `None` for sender cards or
    /// when no version is selected.
    pub fn receive_info(&self, source_application: &str) -> Option<ReceiveInfo> {
        let version = self.as_receiver()?.selected_version_id.clone()?;
        Some(ReceiveInfo {
            account_id: self.target.account_id.clone(),
            server_url: self.target.server_url.clone(),
            project_id: self.target.project_id.clone(),
            model_id: self.target.model_id.clone(),
            selected_version_id: version,
            source_application: source_application.to_string(),
        })
    }
}

/// Everything a send needs to know about its destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendInfo {
    /// Account id.
    pub account_id: String,
    /// Server URL.
    pub server_url: String,
    /// Project id.
    pub project_id: String,
    /// Model id.
    pub model_id: String,
    /// Name of the sending host application.
    pub source_application: String,
}

/// Everything a receive needs to know about its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiveInfo {
    /// Account id.
    pub account_id: String,
    /// Server URL.
    pub server_url: String,
    /// Project id.
    pub project_id: String,
    /// Model id.
    pub model_id: String,
    /// Version to receive.
    pub selected_version_id: String,
    /// Name of the receiving host application.
    pub source_application: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> ModelTarget {
        ModelTarget::new("acc", "https://server.test", "proj", "model")
    }

    #[test]
    fn selection_seeds_object_ids() {
        let card = ModelCard::sender(
            CardId::from("c1"),
            target(),
            SendFilter::Selection {
                object_ids: vec!["L1".into(), "L2".into()],
            },
        );
        assert_eq!(card.as_sender().unwrap().object_ids, vec!["L1", "L2"]);
        assert!(card.as_receiver().is_none());
    }

    #[test]
    fn selection_expires_on_removal_only() {
        let filter = SendFilter::Selection {
            object_ids: vec!["a".into()],
        };
        assert!(!filter.check_expiry(&ChangeSet::changed(["a"])));
        assert!(filter.check_expiry(&ChangeSet::removed(["a"])));
        assert!(!filter.check_expiry(&ChangeSet::removed(["b"])));
    }

    #[test]
    fn everything_expires_on_any_change() {
        assert!(SendFilter::Everything.check_expiry(&ChangeSet::changed(["x"])));
        assert!(!SendFilter::Everything.check_expiry(&ChangeSet::new()));
    }

    #[test]
    fn receive_info_requires_version() {
        let card = ModelCard::receiver(CardId::from("r"), target(), None);
        assert!(card.receive_info("host").is_none());

        let card = ModelCard::receiver(CardId::from("r"), target(), Some("v1".into()));
        let info = card.receive_info("host").unwrap();
        assert_eq!(info.selected_version_id, "v1");
        assert!(card.send_info("host").is_none());
    }

    #[test]
    fn cards_round_trip_through_json() {
        let card = ModelCard::sender(CardId::from("c"), target(), SendFilter::Everything);
        let json = serde_json::to_string(&card).unwrap();
        let back: ModelCard = serde_json::from_str(&json).unwrap();
        assert_eq!(card, back);
    }
}
