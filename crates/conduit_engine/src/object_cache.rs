//! Process-wide local object cache.
//!
//! Holds encoded objects by content id so receives can skip downloading
//! what a previous send or receive already produced. Entries are validated
//! on read; a corrupt entry is dropped and reported as a miss.

use conduit_model::{codec, Base, ObjectId};
use dashmap::DashMap;

/// Content-addressed cache of encoded objects.
#[derive(Debug, Default)]
pub struct LocalObjectCache {
    objects: DashMap<ObjectId, Vec<u8>>,
}

impl LocalObjectCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an encoded object.
    pub fn put(&self, id: ObjectId, bytes: Vec<u8>) {
        self.objects.insert(id, bytes);
    }

    /// Returns the encoded object if present and decodable.
    pub fn get_valid(&self, id: &ObjectId) -> Option<Vec<u8>> {
        let bytes = self.objects.get(id)?.value().clone();
        match codec::decode::<Base>(&bytes) {
            Ok(_) => Some(bytes),
            Err(err) => {
                tracing::warn!(object_id = %id, error = %err, "dropping corrupt local cache entry");
                self.objects.remove(id);
                None
            }
        }
    }

    /// Returns true if the id is cached, without validating it.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Number of cached objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}
