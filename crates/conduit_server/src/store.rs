//! Per-project object and version storage.

use crate::error::{ServerError, ServerResult};
use conduit_model::ObjectId;
use std::collections::HashMap;

/// A recorded model version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRecord {
    /// Version id.
    pub id: String,
    /// Model the version belongs to.
    pub model_id: String,
    /// Root object.
    pub root_object_id: ObjectId,
    /// Message.
    pub message: String,
    /// Application that created the version.
    pub source_application: String,
    /// Applications that reported receiving the version.
    pub received_by: Vec<String>,
}

/// Objects and versions of one project.
#[derive(Debug, Default)]
pub struct ProjectStore {
    objects: HashMap<ObjectId, Vec<u8>>,
    versions: Vec<VersionRecord>,
}

impl ProjectStore {
    /// Returns true if the object is stored.
    pub fn contains(&self, id: &ObjectId) -> bool {
        self.objects.contains_key(id)
    }

    /// Stores an object. Returns false if it was already present.
    pub fn put(&mut self, id: ObjectId, bytes: Vec<u8>) -> bool {
        if self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(id, bytes);
        true
    }

    /// Fetches an object.
    pub fn get(&self, id: &ObjectId) -> ServerResult<&[u8]> {
        self.objects
            .get(id)
            .map(Vec::as_slice)
            .ok_or_else(|| ServerError::ObjectNotFound(id.clone()))
    }

    /// Appends a version.
    pub fn push_version(&mut self, version: VersionRecord) {
        self.versions.push(version);
    }

    /// Finds a version of `model_id`.
    pub fn version(&self, model_id: &str, version_id: &str) -> ServerResult<&VersionRecord> {
        self.versions
            .iter()
            .find(|v| v.id == version_id && v.model_id == model_id)
            .ok_or_else(|| ServerError::VersionNotFound(version_id.to_string()))
    }

    /// Finds a version of any model for mutation.
    pub fn version_mut(&mut self, version_id: &str) -> ServerResult<&mut VersionRecord> {
        self.versions
            .iter_mut()
            .find(|v| v.id == version_id)
            .ok_or_else(|| ServerError::VersionNotFound(version_id.to_string()))
    }

    /// Most recent version of `model_id`.
    pub fn latest_version(&self, model_id: &str) -> Option<&VersionRecord> {
        self.versions.iter().rev().find(|v| v.model_id == model_id)
    }

    /// Number of stored objects.
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of versions across all models.
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(id: &str, model: &str) -> VersionRecord {
        VersionRecord {
            id: id.into(),
            model_id: model.into(),
            root_object_id: ObjectId::from("root"),
            message: String::new(),
            source_application: "test".into(),
            received_by: Vec::new(),
        }
    }

    #[test]
    fn put_is_idempotent() {
        let mut store = ProjectStore::default();
        assert!(store.put(ObjectId::from("a"), vec![1]));
        assert!(!store.put(ObjectId::from("a"), vec![2]));
        assert_eq!(store.get(&ObjectId::from("a")).unwrap(), &[1]);
        assert_eq!(store.object_count(), 1);
    }

    #[test]
    fn missing_object() {
        let store = ProjectStore::default();
        assert!(matches!(
            store.get(&ObjectId::from("x")),
            Err(ServerError::ObjectNotFound(_))
        ));
    }

    #[test]
    fn versions_are_scoped_by_model() {
        let mut store = ProjectStore::default();
        store.push_version(version("v1", "m1"));
        store.push_version(version("v2", "m2"));
        store.push_version(version("v3", "m1"));

        assert!(store.version("m1", "v1").is_ok());
        assert!(store.version("m2", "v1").is_err());
        assert_eq!(store.latest_version("m1").unwrap().id, "v3");
        assert!(store.latest_version("m3").is_none());
    }
}
