//! Content-addressed pointers to stored objects.

use crate::base::{Base, BaseKind};
use crate::ids::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A pointer to an object already stored on the server.
///
/// Produced by the serializer for every detached object that carries an
/// application id. The closure lists every descendant of the referenced
/// object with its minimum depth, so a reference can be re-embedded in a new
/// graph without re-serializing what it points to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectReference {
    /// Id of the referenced stored object.
    pub referenced_id: ObjectId,
    /// Application id of the host entity that produced the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// Descendants of the referenced object and their depth below it.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub closure: BTreeMap<ObjectId, u32>,
}

impl ObjectReference {
    /// Creates a reference without closure.
    pub fn new(referenced_id: ObjectId) -> Self {
        Self {
            referenced_id,
            application_id: None,
            closure: BTreeMap::new(),
        }
    }

    /// Sets the application id.
    #[must_use]
    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Sets the closure.
    #[must_use]
    pub fn with_closure(mut self, closure: BTreeMap<ObjectId, u32>) -> Self {
        self.closure = closure;
        self
    }

    /// Wraps the reference in a graph node, keeping its closure.
    ///
    /// Used by builders to embed a cached reference in place of a freshly
    /// converted object.
    pub fn into_base(self) -> Base {
        Base {
            id: None,
            application_id: self.application_id.clone(),
            name: None,
            properties: BTreeMap::new(),
            closure: BTreeMap::new(),
            kind: BaseKind::Reference(self),
        }
    }

    /// Returns a closure-free pointer node as stored inside a parent object.
    pub fn pointer(&self) -> Base {
        Self {
            referenced_id: self.referenced_id.clone(),
            application_id: self.application_id.clone(),
            closure: BTreeMap::new(),
        }
        .into_base()
    }
}
