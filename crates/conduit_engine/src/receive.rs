//! The receive operation.

use crate::builder::{HostObjectBuilder, HostObjectBuilderResult};
use crate::cancellation::check;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::object_cache::LocalObjectCache;
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink};
use crate::transport::{retrying, AccountProvider, ProjectTransport, ServerApi};
use conduit_model::{codec, Base, Deserializer, ObjectId, ReceiveInfo, SerializedObject};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Downloads a version's graph and hands it to a [`HostObjectBuilder`].
pub struct ReceiveOperation {
    config: Arc<EngineConfig>,
    accounts: Arc<dyn AccountProvider>,
    api: Arc<dyn ServerApi>,
    objects: Arc<LocalObjectCache>,
    builder: Arc<dyn HostObjectBuilder>,
}

impl ReceiveOperation {
    /// Creates an operation.
    pub fn new(
        config: Arc<EngineConfig>,
        accounts: Arc<dyn AccountProvider>,
        api: Arc<dyn ServerApi>,
        objects: Arc<LocalObjectCache>,
        builder: Arc<dyn HostObjectBuilder>,
    ) -> Self {
        Self {
            config,
            accounts,
            api,
            objects,
            builder,
        }
    }

    /// Receives the version named by `receive_info` into the host.
    pub async fn execute(
        &self,
        receive_info: &ReceiveInfo,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<HostObjectBuilderResult> {
        check(token)?;
        let retry = &self.config.retry;
        let account = self
            .accounts
            .account(&receive_info.account_id, &receive_info.server_url)?;
        let transport = retrying(retry, token, "open", || {
            self.api.open(&account, &receive_info.project_id)
        })
        .await?;
        let version = retrying(retry, token, "version", || {
            transport.version(&receive_info.model_id, &receive_info.selected_version_id)
        })
        .await?;

        let root = self
            .download_graph(transport.as_ref(), &version.root_object_id, progress, token)
            .await?;
        check(token)?;

        let result = self
            .builder
            .build(root, receive_info, progress, token)
            .await?;

        // Host objects exist at this point; a failed receipt is only logged.
        if let Err(err) = transport
            .mark_received(&version.id, &receive_info.source_application)
            .await
        {
            tracing::warn!(version_id = %version.id, error = %err, "failed to mark version received");
        }

        tracing::info!(
            project_id = %receive_info.project_id,
            version_id = %version.id,
            baked = result.baked_object_ids.len(),
            "version received"
        );
        Ok(result)
    }

    async fn download_graph(
        &self,
        transport: &dyn ProjectTransport,
        root_id: &ObjectId,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<Base> {
        let retry = &self.config.retry;
        let mut store: HashMap<ObjectId, Vec<u8>> = HashMap::new();

        let root_bytes = match self.objects.get_valid(root_id) {
            Some(bytes) => bytes,
            None => {
                let ids = [root_id.clone()];
                let downloaded =
                    retrying(retry, token, "download_root", || transport.download_objects(&ids))
                        .await?;
                let root = downloaded
                    .into_iter()
                    .find(|o| &o.id == root_id)
                    .ok_or_else(|| EngineError::ObjectNotFound(root_id.clone()))?;
                self.objects.put(root.id, root.bytes.clone());
                root.bytes
            }
        };
        let root: Base = codec::decode(&root_bytes)?;
        store.insert(root_id.clone(), root_bytes);

        let children: Vec<ObjectId> = root.closure.keys().cloned().collect();
        let total_children = children.len() as u64;
        progress.report(ProgressEvent::new(
            ProgressKind::FindChildren,
            total_children,
            Some(total_children),
        ));

        let mut missing = Vec::new();
        for (index, id) in children.into_iter().enumerate() {
            match self.objects.get_valid(&id) {
                Some(bytes) => {
                    store.insert(id, bytes);
                }
                None => missing.push(id),
            }
            progress.report(ProgressEvent::new(
                ProgressKind::CacheCheck,
                index as u64 + 1,
                Some(total_children),
            ));
        }
        check(token)?;

        let mut downloaded_bytes = 0u64;
        let mut downloaded_objects = 0usize;
        for batch in missing.chunks(self.config.download_batch_size.max(1)) {
            check(token)?;
            let objects =
                retrying(retry, token, "download_objects", || transport.download_objects(batch))
                    .await?;
            let (added, bytes) = absorb_downloaded(&mut store, &self.objects, batch, objects);
            downloaded_objects += added;
            downloaded_bytes += bytes;
            progress.report(ProgressEvent::new(
                ProgressKind::DownloadBytes,
                downloaded_bytes,
                None,
            ));
        }
        check(token)?;

        tracing::debug!(
            root_id = %root_id,
            cached = store.len().saturating_sub(downloaded_objects),
            downloaded = downloaded_objects,
            "object graph fetched"
        );

        let total = store.len() as u64;
        let mut on_object =
            |count: u64| progress.report(ProgressEvent::new(ProgressKind::Deserialize, count, Some(total)));
        let root = Deserializer::new(&store).deserialize(root_id, &mut on_object)?;
        Ok(root)
    }
}

/// Adds a downloaded batch to `store` and the local cache.
///
/// Objects that were not requested are ignored and duplicates count once.
/// Returns the number of newly stored objects and their bytes.
fn absorb_downloaded(
    store: &mut HashMap<ObjectId, Vec<u8>>,
    local: &LocalObjectCache,
    requested: &[ObjectId],
    objects: Vec<SerializedObject>,
) -> (usize, u64) {
    let mut added = 0;
    let mut bytes = 0u64;
    for object in objects {
        if !requested.contains(&object.id) {
            tracing::warn!(object_id = %object.id, "server returned an object that was not requested");
            continue;
        }
        if store.contains_key(&object.id) {
            continue;
        }
        bytes += object.bytes.len() as u64;
        added += 1;
        local.put(object.id.clone(), object.bytes.clone());
        store.insert(object.id, object.bytes);
    }
    (added, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(id: &str) -> SerializedObject {
        SerializedObject {
            id: ObjectId::from(id),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn duplicates_and_unrequested_objects_are_not_counted() {
        let mut store = HashMap::new();
        let local = LocalObjectCache::new();
        let requested = vec![ObjectId::from("a"), ObjectId::from("b")];

        let (added, bytes) = absorb_downloaded(
            &mut store,
            &local,
            &requested,
            vec![object("a"), object("a"), object("stray"), object("b")],
        );

        assert_eq!(added, 2);
        assert_eq!(bytes, 6);
        assert_eq!(store.len(), 2);
        assert!(!store.contains_key(&ObjectId::from("stray")));
        assert_eq!(local.len(), 2);
    }
}
