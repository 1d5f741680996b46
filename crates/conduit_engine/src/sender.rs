//! Uploading built graphs and recording versions.

use crate::cache::{ConversionCache, Epoch};
use crate::cancellation::check;
use crate::config::EngineConfig;
use crate::error::EngineResult;
use crate::object_cache::LocalObjectCache;
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink};
use crate::transport::{retrying, AccountProvider, CreateVersion, ServerApi};
use conduit_model::{Base, ObjectId, ObjectReference, SendInfo, SerializedGraph, SerializedObject, Serializer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a successful send.
#[derive(Debug, Clone)]
pub struct SendOutcome {
    /// Root object of the created version.
    pub root_object_id: ObjectId,
    /// Created version.
    pub version_id: String,
    /// References of every object carrying an application id.
    pub references: HashMap<String, ObjectReference>,
    /// References stored in the conversion cache.
    pub cached: usize,
    /// Objects uploaded.
    pub uploaded: usize,
    /// Objects the server already had.
    pub skipped: usize,
}

/// Serializes a root object, uploads what the server lacks and records a
/// version. The only component that creates versions.
pub struct RootObjectSender {
    config: Arc<EngineConfig>,
    accounts: Arc<dyn AccountProvider>,
    api: Arc<dyn ServerApi>,
    cache: Arc<ConversionCache>,
    objects: Arc<LocalObjectCache>,
}

impl RootObjectSender {
    /// Creates a sender.
    pub fn new(
        config: Arc<EngineConfig>,
        accounts: Arc<dyn AccountProvider>,
        api: Arc<dyn ServerApi>,
        cache: Arc<ConversionCache>,
        objects: Arc<LocalObjectCache>,
    ) -> Self {
        Self {
            config,
            accounts,
            api,
            cache,
            objects,
        }
    }

    /// Sends `root` to the model named by `send_info`.
    ///
    /// The conversion cache is only updated once the version exists, and
    /// only for ids not evicted after `since`, the epoch captured before
    /// the host objects were read.
    pub async fn send(
        &self,
        root: &Base,
        send_info: &SendInfo,
        since: Epoch,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<SendOutcome> {
        check(token)?;
        let retry = &self.config.retry;
        let account = self
            .accounts
            .account(&send_info.account_id, &send_info.server_url)?;
        let transport = retrying(retry, token, "open", || {
            self.api.open(&account, &send_info.project_id)
        })
        .await?;

        let SerializedGraph {
            root_id,
            objects,
            references,
            reused,
        } = Serializer::serialize(root)?;
        check(token)?;

        for object in &objects {
            self.objects.put(object.id.clone(), object.bytes.clone());
        }

        let ids: Vec<ObjectId> = objects.iter().map(|o| o.id.clone()).collect();
        let existing = retrying(retry, token, "has_objects", || transport.has_objects(&ids)).await?;
        let (missing, present): (Vec<_>, Vec<_>) = objects
            .into_iter()
            .partition(|object| !existing.contains(&object.id));
        let uploaded = missing.len();
        let skipped = present.len();

        let total_bytes: u64 = missing.iter().map(|o| o.bytes.len() as u64).sum();
        let mut sent_bytes = 0u64;
        for batch in split_batches(missing, self.config.upload_batch_bytes) {
            check(token)?;
            retrying(retry, token, "upload_objects", || transport.upload_objects(&batch)).await?;
            sent_bytes += batch.iter().map(|o| o.bytes.len() as u64).sum::<u64>();
            progress.report(ProgressEvent::new(
                ProgressKind::UploadBytes,
                sent_bytes,
                Some(total_bytes),
            ));
        }

        check(token)?;
        let request = CreateVersion {
            model_id: send_info.model_id.clone(),
            root_object_id: root_id.clone(),
            message: self.config.version_message.clone(),
            source_application: send_info.source_application.clone(),
        };
        let version_id = retrying(retry, token, "create_version", || {
            transport.create_version(request.clone())
        })
        .await?;

        let cached = self
            .cache
            .store_since(&send_info.project_id, &references, since);

        tracing::info!(
            project_id = %send_info.project_id,
            model_id = %send_info.model_id,
            version_id = %version_id,
            uploaded,
            skipped,
            reused,
            cached,
            "root object sent"
        );
        Ok(SendOutcome {
            root_object_id: root_id,
            version_id,
            references,
            cached,
            uploaded,
            skipped,
        })
    }
}

/// Groups objects into batches of at most `limit` bytes.
///
/// An object larger than `limit` travels alone.
fn split_batches(objects: Vec<SerializedObject>, limit: usize) -> Vec<Vec<SerializedObject>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_bytes = 0usize;
    for object in objects {
        if !current.is_empty() && current_bytes + object.bytes.len() > limit {
            batches.push(std::mem::take(&mut current));
            current_bytes = 0;
        }
        current_bytes += object.bytes.len();
        current.push(object);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}
