//! The in-process object server.

use crate::auth::TokenValidator;
use crate::config::ServerConfig;
use crate::error::{ServerError, ServerResult};
use crate::store::{ProjectStore, VersionRecord};
use conduit_model::{ObjectId, SerializedObject};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use uuid::Uuid;

/// Request counters, for assertions in tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Objects accepted by uploads (new ones only).
    pub objects_stored: u64,
    /// Objects served by downloads.
    pub objects_served: u64,
    /// Versions created.
    pub versions_created: u64,
}

/// Content-addressed object store with model versions.
///
/// Every request names a project and carries an account token. When
/// authentication is enabled the token must have been issued by
/// [`ObjectServer::issue_token`].
///
/// ```
/// use conduit_server::{ObjectServer, ServerConfig};
/// use conduit_model::{ObjectId, SerializedObject};
///
/// let server = ObjectServer::new(ServerConfig::default());
/// let token = server.issue_token("alice").unwrap();
/// let object = SerializedObject { id: ObjectId::from("a"), bytes: vec![1, 2, 3] };
///
/// server.put_objects(&token, "project", &[object]).unwrap();
/// let present = server.has_objects(&token, "project", &[ObjectId::from("a")]).unwrap();
/// assert_eq!(present, vec![ObjectId::from("a")]);
/// ```
pub struct ObjectServer {
    config: ServerConfig,
    validator: Option<TokenValidator>,
    projects: RwLock<HashMap<String, ProjectStore>>,
    pending_failures: Mutex<u32>,
    stats: Mutex<ServerStats>,
}

impl ObjectServer {
    /// Creates a server.
    pub fn new(config: ServerConfig) -> Self {
        let validator = match (&config.auth_secret, config.require_auth) {
            (Some(secret), true) => Some(TokenValidator::new(secret.clone(), config.token_expiry)),
            _ => None,
        };
        Self {
            config,
            validator,
            projects: RwLock::new(HashMap::new()),
            pending_failures: Mutex::new(0),
            stats: Mutex::new(ServerStats::default()),
        }
    }

    /// Issues a token for `account_id`.
    ///
    /// Without authentication the account id itself is returned.
    pub fn issue_token(&self, account_id: &str) -> ServerResult<String> {
        match &self.validator {
            Some(validator) => validator.create_token(account_id),
            None => Ok(account_id.to_string()),
        }
    }

    /// Checks a token. Returns the account id.
    pub fn authenticate(&self, token: &str) -> ServerResult<String> {
        match &self.validator {
            Some(validator) => validator.validate_token(token),
            None => Ok(token.to_string()),
        }
    }

    /// Makes the next `count` requests fail with [`ServerError::Unavailable`].
    pub fn fail_next(&self, count: u32) {
        *self.pending_failures.lock() = count;
    }

    /// Returns the subset of `ids` stored in `project`.
    pub fn has_objects(
        &self,
        token: &str,
        project: &str,
        ids: &[ObjectId],
    ) -> ServerResult<Vec<ObjectId>> {
        self.admit(token)?;
        let projects = self.projects.read();
        let Some(store) = projects.get(project) else {
            return Ok(Vec::new());
        };
        Ok(ids.iter().filter(|id| store.contains(id)).cloned().collect())
    }

    /// Stores objects. Objects already present are left untouched.
    pub fn put_objects(
        &self,
        token: &str,
        project: &str,
        objects: &[SerializedObject],
    ) -> ServerResult<usize> {
        self.admit(token)?;
        if objects.len() > self.config.max_upload_batch {
            return Err(ServerError::InvalidRequest(format!(
                "batch of {} objects exceeds limit {}",
                objects.len(),
                self.config.max_upload_batch
            )));
        }
        if let Some(large) = objects
            .iter()
            .find(|o| o.bytes.len() > self.config.max_object_size)
        {
            return Err(ServerError::ObjectTooLarge {
                id: large.id.clone(),
                size: large.bytes.len(),
                limit: self.config.max_object_size,
            });
        }

        let mut projects = self.projects.write();
        let store = projects.entry(project.to_string()).or_default();
        let stored = objects
            .iter()
            .filter(|o| store.put(o.id.clone(), o.bytes.clone()))
            .count();
        self.stats.lock().objects_stored += stored as u64;
        tracing::debug!(project, received = objects.len(), stored, "objects uploaded");
        Ok(stored)
    }

    /// Fetches objects. Fails if any is missing.
    pub fn get_objects(
        &self,
        token: &str,
        project: &str,
        ids: &[ObjectId],
    ) -> ServerResult<Vec<SerializedObject>> {
        self.admit(token)?;
        let projects = self.projects.read();
        let store = projects
            .get(project)
            .ok_or_else(|| ServerError::InvalidRequest(format!("unknown project {project}")))?;
        let objects = ids
            .iter()
            .map(|id| {
                store.get(id).map(|bytes| SerializedObject {
                    id: id.clone(),
                    bytes: bytes.to_vec(),
                })
            })
            .collect::<ServerResult<Vec<_>>>()?;
        self.stats.lock().objects_served += objects.len() as u64;
        Ok(objects)
    }

    /// Records a version. The root object must already be stored.
    pub fn create_version(
        &self,
        token: &str,
        project: &str,
        model_id: &str,
        root_object_id: &ObjectId,
        message: &str,
        source_application: &str,
    ) -> ServerResult<VersionRecord> {
        self.admit(token)?;
        let mut projects = self.projects.write();
        let store = projects.entry(project.to_string()).or_default();
        if !store.contains(root_object_id) {
            return Err(ServerError::InvalidRequest(format!(
                "root object {root_object_id} was not uploaded"
            )));
        }

        let version = VersionRecord {
            id: Uuid::new_v4().simple().to_string(),
            model_id: model_id.to_string(),
            root_object_id: root_object_id.clone(),
            message: message.to_string(),
            source_application: source_application.to_string(),
            received_by: Vec::new(),
        };
        store.push_version(version.clone());
        self.stats.lock().versions_created += 1;
        tracing::info!(project, model_id, version_id = %version.id, "version created");
        Ok(version)
    }

    /// Fetches a version.
    pub fn get_version(
        &self,
        token: &str,
        project: &str,
        model_id: &str,
        version_id: &str,
    ) -> ServerResult<VersionRecord> {
        self.admit(token)?;
        let projects = self.projects.read();
        projects
            .get(project)
            .ok_or_else(|| ServerError::VersionNotFound(version_id.to_string()))?
            .version(model_id, version_id)
            .cloned()
    }

    /// Most recent version of a model.
    pub fn latest_version(
        &self,
        token: &str,
        project: &str,
        model_id: &str,
    ) -> ServerResult<Option<VersionRecord>> {
        self.admit(token)?;
        Ok(self
            .projects
            .read()
            .get(project)
            .and_then(|store| store.latest_version(model_id).cloned()))
    }

    /// Records that `source_application` received a version.
    pub fn mark_received(
        &self,
        token: &str,
        project: &str,
        version_id: &str,
        source_application: &str,
    ) -> ServerResult<()> {
        self.admit(token)?;
        let mut projects = self.projects.write();
        let version = projects
            .get_mut(project)
            .ok_or_else(|| ServerError::VersionNotFound(version_id.to_string()))?
            .version_mut(version_id)?;
        version.received_by.push(source_application.to_string());
        Ok(())
    }

    /// Number of objects stored in a project.
    pub fn object_count(&self, project: &str) -> usize {
        self.projects
            .read()
            .get(project)
            .map_or(0, ProjectStore::object_count)
    }

    /// Number of versions recorded in a project.
    pub fn version_count(&self, project: &str) -> usize {
        self.projects
            .read()
            .get(project)
            .map_or(0, ProjectStore::version_count)
    }

    /// Request counters.
    pub fn stats(&self) -> ServerStats {
        *self.stats.lock()
    }

    fn admit(&self, token: &str) -> ServerResult<()> {
        {
            let mut pending = self.pending_failures.lock();
            if *pending > 0 {
                *pending -= 1;
                return Err(ServerError::Unavailable("injected failure".into()));
            }
        }
        self.authenticate(token).map(|_| ())
    }
}
