//! Test fixtures and engine helpers.
//!
//! Provides a fake host document, converters and bakers, an adapter that
//! runs the engine against the in-process object server, and a wired-up
//! [`TestEngine`].

use async_trait::async_trait;
use conduit_engine::{
    Account, CancellationToken, CardEvent, CardOperations, ConversionError, ConverterRegistry,
    ConvertingRootObjectBuilder, CreateVersion, EngineConfig, EngineContext, EngineError,
    EngineResult, FlatHostObjectBuilder, FlushOutcome, HostBaker, HostEvent, HostObject,
    HostSelection, HostThread, InlineHostThread, NullProgress, ObjectStyle, ProjectTransport,
    RetryConfig, SendOutcome, ServerApi, StaticAccounts, ToServerConverter, UiBridge, Version,
};
use conduit_model::{
    Base, CardId, ColorProxy, Geometry, InstanceDefinitionProxy, Matrix4, ModelCard, ModelTarget,
    ObjectId, Point, ProxyTables, SendFilter, SendInfo, SerializedObject,
};
use conduit_server::{ObjectServer, ServerConfig, ServerError};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::{Notify, Semaphore};

/// Server URL used by test accounts.
pub const TEST_SERVER_URL: &str = "https://conduit.test";
/// Project used by test cards.
pub const TEST_PROJECT: &str = "project";
/// Model used by test cards.
pub const TEST_MODEL: &str = "model";
/// Account used by test cards.
pub const TEST_ACCOUNT: &str = "tester";

/// Installs a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A host object living in a [`FakeDocument`].
#[derive(Debug, Clone, PartialEq)]
pub struct FakeObject {
    /// Host id.
    pub id: String,
    /// Type tag.
    pub kind: String,
    /// Layer path.
    pub layers: Vec<String>,
    /// Position along the x axis.
    pub x: f64,
}

impl FakeObject {
    /// A point at `(x, 0, 0)` on `layers`.
    pub fn point(id: &str, x: f64, layers: &[&str]) -> Self {
        Self::new(id, "point", x, layers)
    }

    /// An object of an arbitrary type.
    pub fn new(id: &str, kind: &str, x: f64, layers: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            kind: kind.to_string(),
            layers: layers.iter().map(|s| s.to_string()).collect(),
            x,
        }
    }
}

impl HostObject for FakeObject {
    fn id(&self) -> &str {
        &self.id
    }

    fn type_tag(&self) -> &str {
        &self.kind
    }

    fn layer_path(&self) -> Vec<String> {
        self.layers.clone()
    }
}

/// In-memory host document.
#[derive(Debug, Default)]
pub struct FakeDocument {
    objects: RwLock<Vec<FakeObject>>,
}

impl FakeDocument {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an object.
    pub fn insert(&self, object: FakeObject) {
        let mut objects = self.objects.write();
        match objects.iter_mut().find(|o| o.id == object.id) {
            Some(existing) => *existing = object,
            None => objects.push(object),
        }
    }

    /// Moves an object. Returns false if it does not exist.
    pub fn move_to(&self, id: &str, x: f64) -> bool {
        match self.objects.write().iter_mut().find(|o| o.id == id) {
            Some(object) => {
                object.x = x;
                true
            }
            None => false,
        }
    }

    /// Deletes an object.
    pub fn remove(&self, id: &str) -> Option<FakeObject> {
        let mut objects = self.objects.write();
        let index = objects.iter().position(|o| o.id == id)?;
        Some(objects.remove(index))
    }

    /// Number of objects.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// Returns true if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

impl HostSelection<FakeObject> for FakeDocument {
    fn resolve(&self, filter: &SendFilter) -> EngineResult<Vec<FakeObject>> {
        let objects = self.objects.read();
        let resolved = match filter {
            SendFilter::Everything => objects.clone(),
            SendFilter::Selection { object_ids } => object_ids
                .iter()
                .filter_map(|id| objects.iter().find(|o| &o.id == id).cloned())
                .collect(),
            SendFilter::Layers { names } => objects
                .iter()
                .filter(|o| o.layers.iter().any(|layer| names.contains(layer)))
                .cloned()
                .collect(),
        };
        Ok(resolved)
    }
}

/// Converts `point` objects and records every call.
#[derive(Debug, Default)]
pub struct PointConverter {
    calls: Mutex<Vec<String>>,
    failing: RwLock<HashSet<String>>,
}

impl PointConverter {
    /// Creates a converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes conversion of `id` fail.
    pub fn fail_on(&self, id: &str) {
        self.failing.write().insert(id.to_string());
    }

    /// Ids converted so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Forgets recorded calls.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }
}

impl ToServerConverter<FakeObject> for PointConverter {
    fn convert(&self, object: &FakeObject) -> Result<Base, ConversionError> {
        self.calls.lock().push(object.id.clone());
        if self.failing.read().contains(&object.id) {
            return Err(ConversionError::Failed(format!("cannot convert {}", object.id)));
        }
        Ok(Base::geometry(
            &object.id,
            Geometry::Point(Point::new(object.x, 0.0, 0.0)),
        ))
    }
}

/// An object created by a [`RecordingBaker`].
#[derive(Debug, Clone, PartialEq)]
pub struct BakedObject {
    /// Application id of the baked node.
    pub application_id: String,
    /// Layer path the object was created on.
    pub layers: Vec<String>,
    /// Resolved display style.
    pub style: ObjectStyle,
    /// World-space vertices.
    pub vertices: Vec<Point>,
}

/// Records baked objects instead of creating them.
#[derive(Debug, Default)]
pub struct RecordingBaker {
    baked: Mutex<Vec<BakedObject>>,
    failing: RwLock<HashSet<String>>,
}

impl RecordingBaker {
    /// Creates a baker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes baking of `application_id` fail.
    pub fn fail_on(&self, application_id: &str) {
        self.failing.write().insert(application_id.to_string());
    }

    /// Objects baked so far.
    pub fn baked(&self) -> Vec<BakedObject> {
        self.baked.lock().clone()
    }

    /// Baked objects whose application id starts with `prefix`.
    pub fn baked_with_prefix(&self, prefix: &str) -> Vec<BakedObject> {
        self.baked
            .lock()
            .iter()
            .filter(|b| b.application_id.starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl HostBaker for RecordingBaker {
    fn bake(
        &self,
        object: &Base,
        layer_path: &[String],
        style: &ObjectStyle,
    ) -> Result<Vec<String>, ConversionError> {
        let application_id = object.identity().unwrap_or_default().to_string();
        if self.failing.read().contains(&application_id) {
            return Err(ConversionError::Failed(format!("cannot bake {application_id}")));
        }
        let geometry = object
            .as_geometry()
            .ok_or_else(|| ConversionError::Unsupported(object.type_name().to_string()))?;
        self.baked.lock().push(BakedObject {
            application_id: application_id.clone(),
            layers: layer_path.to_vec(),
            style: style.clone(),
            vertices: geometry.vertices(),
        });
        Ok(vec![format!("host-{application_id}")])
    }
}

/// Holds uploads until released, to observe in-flight operations.
#[derive(Debug)]
pub struct UploadGate {
    entered: Notify,
    release: Semaphore,
}

impl UploadGate {
    /// Creates a closed gate.
    pub fn new() -> Self {
        Self {
            entered: Notify::new(),
            release: Semaphore::new(0),
        }
    }

    /// Waits until an upload reaches the gate.
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    /// Lets `uploads` waiting or future uploads through.
    pub fn release(&self, uploads: usize) {
        self.release.add_permits(uploads);
    }

    async fn pass(&self) {
        self.entered.notify_one();
        if let Ok(permit) = self.release.acquire().await {
            permit.forget();
        }
    }
}

/// Maps object server errors to engine errors.
pub fn engine_error(err: ServerError) -> EngineError {
    match err {
        ServerError::Unavailable(message) => EngineError::transport_retryable(message),
        ServerError::ObjectNotFound(id) => EngineError::ObjectNotFound(id),
        ServerError::VersionNotFound(id) => EngineError::VersionNotFound(id),
        ServerError::Internal(message) => EngineError::Server(message),
        other @ (ServerError::NotAuthorized(_)
        | ServerError::InvalidRequest(_)
        | ServerError::ObjectTooLarge { .. }) => EngineError::transport_fatal(other.to_string()),
    }
}

/// Runs the engine against an [`ObjectServer`].
pub struct ServerAdapter {
    server: Arc<ObjectServer>,
    gate: Option<Arc<UploadGate>>,
}

impl Default for UploadGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerAdapter {
    /// Creates an adapter.
    pub fn new(server: Arc<ObjectServer>) -> Self {
        Self { server, gate: None }
    }

    /// Routes uploads through `gate`.
    pub fn with_upload_gate(mut self, gate: Arc<UploadGate>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl ServerApi for ServerAdapter {
    async fn open(
        &self,
        account: &Account,
        project_id: &str,
    ) -> EngineResult<Arc<dyn ProjectTransport>> {
        self.server
            .authenticate(&account.token)
            .map_err(engine_error)?;
        Ok(Arc::new(ServerTransport {
            server: Arc::clone(&self.server),
            token: account.token.clone(),
            project_id: project_id.to_string(),
            gate: self.gate.clone(),
        }))
    }
}

struct ServerTransport {
    server: Arc<ObjectServer>,
    token: String,
    project_id: String,
    gate: Option<Arc<UploadGate>>,
}

#[async_trait]
impl ProjectTransport for ServerTransport {
    fn project_id(&self) -> &str {
        &self.project_id
    }

    async fn has_objects(&self, ids: &[ObjectId]) -> EngineResult<HashSet<ObjectId>> {
        self.server
            .has_objects(&self.token, &self.project_id, ids)
            .map(|present| present.into_iter().collect())
            .map_err(engine_error)
    }

    async fn upload_objects(&self, objects: &[SerializedObject]) -> EngineResult<()> {
        if let Some(gate) = &self.gate {
            gate.pass().await;
        }
        self.server
            .put_objects(&self.token, &self.project_id, objects)
            .map(|_| ())
            .map_err(engine_error)
    }

    async fn download_objects(&self, ids: &[ObjectId]) -> EngineResult<Vec<SerializedObject>> {
        self.server
            .get_objects(&self.token, &self.project_id, ids)
            .map_err(engine_error)
    }

    async fn create_version(&self, request: CreateVersion) -> EngineResult<String> {
        self.server
            .create_version(
                &self.token,
                &self.project_id,
                &request.model_id,
                &request.root_object_id,
                &request.message,
                &request.source_application,
            )
            .map(|version| version.id)
            .map_err(engine_error)
    }

    async fn version(&self, model_id: &str, version_id: &str) -> EngineResult<Version> {
        let record = self
            .server
            .get_version(&self.token, &self.project_id, model_id, version_id)
            .map_err(engine_error)?;
        Ok(Version {
            id: record.id,
            model_id: record.model_id,
            root_object_id: record.root_object_id,
            message: record.message,
            source_application: record.source_application,
        })
    }

    async fn mark_received(&self, version_id: &str, source_application: &str) -> EngineResult<()> {
        self.server
            .mark_received(&self.token, &self.project_id, version_id, source_application)
            .map_err(engine_error)
    }
}

/// A connector wired to an in-process server, a fake document and a
/// recording baker.
pub struct TestEngine {
    /// The object server.
    pub server: Arc<ObjectServer>,
    /// The host document.
    pub document: Arc<FakeDocument>,
    /// The point converter.
    pub converter: Arc<PointConverter>,
    /// The baker.
    pub baker: Arc<RecordingBaker>,
    /// The upload gate, if any.
    pub gate: Option<Arc<UploadGate>>,
    /// Shared engine state.
    pub context: Arc<EngineContext>,
    /// Card entry points.
    pub operations: Arc<CardOperations<FakeObject>>,
    events: UnboundedReceiver<CardEvent>,
}

impl TestEngine {
    /// Creates an engine with a fresh server.
    pub fn new() -> Self {
        Self::build(Self::test_server(), None)
    }

    /// Creates an engine whose uploads wait on a gate.
    pub fn with_upload_gate() -> Self {
        Self::build(Self::test_server(), Some(Arc::new(UploadGate::new())))
    }

    /// Creates a second connector on an existing server, with cold caches.
    pub fn with_server(server: Arc<ObjectServer>) -> Self {
        Self::build(server, None)
    }

    fn test_server() -> Arc<ObjectServer> {
        Arc::new(ObjectServer::new(
            ServerConfig::default().with_auth(b"test-secret".to_vec()),
        ))
    }

    fn build(server: Arc<ObjectServer>, gate: Option<Arc<UploadGate>>) -> Self {
        init_test_logging();

        let token = server
            .issue_token(TEST_ACCOUNT)
            .expect("failed to issue token");
        let accounts = Arc::new(StaticAccounts::new(vec![Account::new(
            TEST_ACCOUNT,
            TEST_SERVER_URL,
            token,
        )]));
        let mut api = ServerAdapter::new(Arc::clone(&server));
        if let Some(gate) = &gate {
            api = api.with_upload_gate(Arc::clone(gate));
        }

        let config = EngineConfig::new("conduit-test").with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(5))
                .without_jitter(),
        );
        let host: Arc<dyn HostThread> = Arc::new(InlineHostThread);
        let (ui, events) = UiBridge::channel();
        let context = Arc::new(EngineContext::new(
            config,
            accounts,
            Arc::new(api),
            Arc::clone(&host),
            ui,
        ));

        let document = Arc::new(FakeDocument::new());
        let converter = Arc::new(PointConverter::new());
        let baker = Arc::new(RecordingBaker::new());
        let registry = ConverterRegistry::<FakeObject>::new().register("point", converter.clone());
        let root_builder = ConvertingRootObjectBuilder::new(
            Arc::new(registry),
            Arc::clone(&context.cache),
            Arc::clone(&host),
        );
        let host_builder = FlatHostObjectBuilder::new(baker.clone(), Arc::clone(&host));
        let operations = Arc::new(CardOperations::new(
            Arc::clone(&context),
            document.clone(),
            Arc::new(root_builder),
            Arc::new(host_builder),
        ));

        Self {
            server,
            document,
            converter,
            baker,
            gate,
            context,
            operations,
            events,
        }
    }

    /// The model every test card targets.
    pub fn target() -> ModelTarget {
        ModelTarget::new(TEST_ACCOUNT, TEST_SERVER_URL, TEST_PROJECT, TEST_MODEL)
    }

    /// Send info for publishing hand-built graphs.
    pub fn send_info() -> SendInfo {
        SendInfo {
            account_id: TEST_ACCOUNT.to_string(),
            server_url: TEST_SERVER_URL.to_string(),
            project_id: TEST_PROJECT.to_string(),
            model_id: TEST_MODEL.to_string(),
            source_application: "conduit-test".to_string(),
        }
    }

    /// Registers a sender card.
    pub fn add_sender(&self, id: &str, filter: SendFilter) -> CardId {
        let card_id = CardId::from(id);
        self.context
            .cards
            .add(ModelCard::sender(card_id.clone(), Self::target(), filter));
        card_id
    }

    /// Registers a receiver card for `version_id`.
    pub fn add_receiver(&self, id: &str, version_id: &str) -> CardId {
        let card_id = CardId::from(id);
        self.context.cards.add(ModelCard::receiver(
            card_id.clone(),
            Self::target(),
            Some(version_id.to_string()),
        ));
        card_id
    }

    /// Current state of a card.
    pub fn card(&self, id: &CardId) -> ModelCard {
        self.context.cards.get(id).expect("card not found")
    }

    /// Moves an object in the document and records the change.
    pub fn edit(&self, id: &str, x: f64) {
        assert!(self.document.move_to(id, x), "no object {id}");
        self.host_event(HostEvent::ObjectsChanged {
            object_ids: vec![id.to_string()],
        });
    }

    /// Deletes an object from the document and records the deletion.
    pub fn delete(&self, id: &str) {
        self.document.remove(id);
        self.host_event(HostEvent::ObjectsDeleted {
            object_ids: vec![id.to_string()],
        });
    }

    /// Records the change carried by a host event.
    pub fn host_event(&self, event: HostEvent) {
        if let Some(changes) = event.into_change_set() {
            self.context.tracker.record(changes);
        }
    }

    /// Flushes pending changes.
    pub fn flush(&self) -> FlushOutcome {
        self.context.flush_changes()
    }

    /// Uploads a hand-built graph and creates a version.
    pub async fn publish(&self, root: &Base) -> SendOutcome {
        let since = self.context.cache.epoch();
        self.context
            .sender()
            .send(root, &Self::send_info(), since, &NullProgress, &CancellationToken::new())
            .await
            .expect("publish failed")
    }

    /// UI events received so far.
    pub fn drain_events(&mut self) -> Vec<CardEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A point geometry node.
pub fn point(application_id: &str, x: f64, y: f64, z: f64) -> Base {
    Base::geometry(application_id, Geometry::Point(Point::new(x, y, z)))
}

fn red(objects: &[&str]) -> ColorProxy {
    ColorProxy {
        application_id: "red".to_string(),
        argb: 0xffff0000,
        name: Some("Red".to_string()),
        objects: objects.iter().map(|s| s.to_string()).collect(),
    }
}

/// A document with one block placed twice.
///
/// Definition `chair` holds point `leg` at `(1, 0, 0)`, colored red. The
/// placements `chair-1` and `chair-2` sit on layer `Room`, translated by 10
/// and 20 along x. A loose point `lamp` sits on layer `Room` too.
pub fn block_graph() -> Base {
    Base::collection("Document")
        .with_proxies(ProxyTables {
            colors: vec![red(&["leg"])],
            instance_definitions: vec![InstanceDefinitionProxy {
                application_id: "chair".to_string(),
                name: "Chair".to_string(),
                objects: vec!["leg".to_string()],
                max_depth: 0,
            }],
            ..Default::default()
        })
        .with_element(Base::collection("Definitions").with_element(point("leg", 1.0, 0.0, 0.0)))
        .with_element(
            Base::collection("Room")
                .with_element(Base::instance(
                    "chair-1",
                    "chair",
                    Matrix4::translation(10.0, 0.0, 0.0),
                ))
                .with_element(Base::instance(
                    "chair-2",
                    "chair",
                    Matrix4::translation(20.0, 0.0, 0.0),
                ))
                .with_element(point("lamp", 0.0, 0.0, 3.0)),
        )
}

/// A document with a block nested in another block.
///
/// Definition `table` holds point `top` at `(0, 0, 1)` and a placement of
/// `chair` translated by 5 along y; `chair` holds `leg` at `(1, 0, 0)`. One
/// `table` placement on layer `Hall` is translated by 100 along x, so `leg`
/// lands at `(101, 5, 0)` and `top` at `(100, 0, 1)`.
pub fn nested_block_graph() -> Base {
    Base::collection("Document")
        .with_proxies(ProxyTables {
            colors: vec![red(&["leg"])],
            instance_definitions: vec![
                InstanceDefinitionProxy {
                    application_id: "chair".to_string(),
                    name: "Chair".to_string(),
                    objects: vec!["leg".to_string()],
                    max_depth: 0,
                },
                InstanceDefinitionProxy {
                    application_id: "table".to_string(),
                    name: "Table".to_string(),
                    objects: vec!["top".to_string(), "table-chair".to_string()],
                    max_depth: 1,
                },
            ],
            ..Default::default()
        })
        .with_element(
            Base::collection("Definitions")
                .with_element(point("leg", 1.0, 0.0, 0.0))
                .with_element(point("top", 0.0, 0.0, 1.0))
                .with_element(Base::instance(
                    "table-chair",
                    "chair",
                    Matrix4::translation(0.0, 5.0, 0.0),
                )),
        )
        .with_element(Base::collection("Hall").with_element(Base::instance(
            "table-1",
            "table",
            Matrix4::translation(100.0, 0.0, 0.0),
        )))
}

/// Version ids by card, read from completion events.
pub fn completed_versions(events: &[CardEvent]) -> HashMap<CardId, String> {
    events
        .iter()
        .filter_map(|event| match event {
            CardEvent::SendCompleted {
                card_id,
                version_id,
                ..
            } => Some((card_id.clone(), version_id.clone())),
            _ => None,
        })
        .collect()
}
