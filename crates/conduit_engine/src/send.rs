//! The send operation: build, then send.

use crate::builder::{ConversionResult, RootObjectBuilder};
use crate::cache::Epoch;
use crate::cancellation::check;
use crate::error::EngineResult;
use crate::progress::ProgressSink;
use crate::sender::RootObjectSender;
use conduit_model::{ObjectId, ObjectReference, SendInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Result of a send operation.
#[derive(Debug, Clone)]
pub struct SendOperationResult {
    /// Root object of the created version.
    pub root_object_id: ObjectId,
    /// Created version.
    pub version_id: String,
    /// References of every sent object carrying an application id.
    pub converted_references: HashMap<String, ObjectReference>,
    /// Per-object conversion report.
    pub conversion_results: Vec<ConversionResult>,
}

/// Runs a [`RootObjectBuilder`] and a [`RootObjectSender`] as one
/// cancellable call.
pub struct SendOperation<T> {
    builder: Arc<dyn RootObjectBuilder<T>>,
    sender: Arc<RootObjectSender>,
}

impl<T: Send + Sync + 'static> SendOperation<T> {
    /// Creates an operation.
    pub fn new(builder: Arc<dyn RootObjectBuilder<T>>, sender: Arc<RootObjectSender>) -> Self {
        Self { builder, sender }
    }

    /// Converts `objects` and sends the result as a new version.
    ///
    /// `since` is the cache epoch captured before `objects` were read from
    /// the host. A cancelled send never records a version.
    pub async fn execute(
        &self,
        objects: &[T],
        send_info: &SendInfo,
        since: Epoch,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<SendOperationResult> {
        let built = self
            .builder
            .build(objects, send_info, progress, token)
            .await?;
        check(token)?;

        let outcome = self
            .sender
            .send(&built.root, send_info, since, progress, token)
            .await?;

        Ok(SendOperationResult {
            root_object_id: outcome.root_object_id,
            version_id: outcome.version_id,
            converted_references: outcome.references,
            conversion_results: built.conversion_results,
        })
    }
}
