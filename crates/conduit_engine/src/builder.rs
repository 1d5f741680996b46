//! Building root objects from host selections.
//!
//! Connectors plug in per-type converters through a [`ConverterRegistry`];
//! [`ConvertingRootObjectBuilder`] drives them, reusing conversion cache
//! hits and grouping results into one collection per layer path.

use crate::cache::ConversionCache;
use crate::cancellation::check;
use crate::error::{ConversionError, EngineError, EngineResult};
use crate::host_thread::HostThread;
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink};
use async_trait::async_trait;
use conduit_model::{Base, ProxyTables, ReceiveInfo, SendFilter, SendInfo};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Outcome class of one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStatus {
    /// Converted.
    Success,
    /// Converted, with a note.
    Info,
    /// Converted with loss.
    Warning,
    /// Not converted.
    Error,
}

/// Report line for one source object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionResult {
    /// Outcome.
    pub status: ConversionStatus,
    /// Id of the source object.
    pub source_id: String,
    /// Type of the source object.
    pub source_type: String,
    /// Id of the produced object.
    pub result_id: Option<String>,
    /// Type of the produced object.
    pub result_type: Option<String>,
    /// Failure description.
    pub error: Option<String>,
}

impl ConversionResult {
    /// A successful conversion.
    pub fn success(
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        result_id: impl Into<String>,
        result_type: impl Into<String>,
    ) -> Self {
        Self {
            status: ConversionStatus::Success,
            source_id: source_id.into(),
            source_type: source_type.into(),
            result_id: Some(result_id.into()),
            result_type: Some(result_type.into()),
            error: None,
        }
    }

    /// A failed conversion.
    pub fn failure(
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self {
            status: ConversionStatus::Error,
            source_id: source_id.into(),
            source_type: source_type.into(),
            result_id: None,
            result_type: None,
            error: Some(error.to_string()),
        }
    }

    /// Returns true for failed conversions.
    pub fn is_error(&self) -> bool {
        self.status == ConversionStatus::Error
    }
}

/// Summary line for a finished operation.
pub fn completion_status(results: &[ConversionResult]) -> String {
    match results.iter().filter(|r| r.is_error()).count() {
        0 => "Completed".to_string(),
        errors => format!("Completed with {errors} errors"),
    }
}

/// Output of a [`RootObjectBuilder`].
#[derive(Debug, Clone)]
pub struct RootObjectBuilderResult {
    /// Root collection.
    pub root: Base,
    /// Per-object report.
    pub conversion_results: Vec<ConversionResult>,
}

/// Output of a [`HostObjectBuilder`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostObjectBuilderResult {
    /// Host ids of the created objects.
    pub baked_object_ids: Vec<String>,
    /// Per-object report.
    pub conversion_results: Vec<ConversionResult>,
}

/// Turns host objects into one root graph node.
#[async_trait]
pub trait RootObjectBuilder<T>: Send + Sync
where
    T: Send + Sync + 'static,
{
    /// Builds the root. Per-object failures are reported, not returned.
    async fn build(
        &self,
        objects: &[T],
        send_info: &SendInfo,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<RootObjectBuilderResult>;
}

/// Materializes a received graph in the host.
#[async_trait]
pub trait HostObjectBuilder: Send + Sync {
    /// Creates host objects for `root`.
    async fn build(
        &self,
        root: Base,
        receive_info: &ReceiveInfo,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<HostObjectBuilderResult>;
}

/// A native object of the host application.
pub trait HostObject: Clone + Send + Sync + 'static {
    /// Stable host id, used as the application id.
    fn id(&self) -> &str;

    /// Type tag used to pick a converter.
    fn type_tag(&self) -> &str;

    /// Layer names from the outermost to the object's own layer.
    fn layer_path(&self) -> Vec<String>;
}

/// Resolves send filters against the live document.
pub trait HostSelection<T>: Send + Sync {
    /// Returns the live objects matching `filter`.
    fn resolve(&self, filter: &SendFilter) -> EngineResult<Vec<T>>;
}

/// Resolves `filter` to an ordered list without duplicate ids.
///
/// Fails with [`EngineError::NoObjectsMatched`] if nothing matches.
pub fn resolve_selection<T: HostObject>(
    selection: &dyn HostSelection<T>,
    filter: &SendFilter,
) -> EngineResult<Vec<T>> {
    let mut seen = HashSet::new();
    let objects: Vec<T> = selection
        .resolve(filter)?
        .into_iter()
        .filter(|object| seen.insert(object.id().to_string()))
        .collect();
    if objects.is_empty() {
        return Err(EngineError::NoObjectsMatched);
    }
    Ok(objects)
}

/// Converts one host type to a graph node.
pub trait ToServerConverter<T>: Send + Sync {
    /// Converts `object`.
    fn convert(&self, object: &T) -> Result<Base, ConversionError>;
}

/// Converters keyed by host type tag.
pub struct ConverterRegistry<T> {
    converters: HashMap<String, Arc<dyn ToServerConverter<T>>>,
}

impl<T> ConverterRegistry<T> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            converters: HashMap::new(),
        }
    }

    /// Registers `converter` for `type_tag`.
    pub fn register(
        mut self,
        type_tag: impl Into<String>,
        converter: Arc<dyn ToServerConverter<T>>,
    ) -> Self {
        self.converters.insert(type_tag.into(), converter);
        self
    }

    /// Returns the converter for `type_tag`.
    pub fn resolve(&self, type_tag: &str) -> Result<Arc<dyn ToServerConverter<T>>, ConversionError> {
        self.converters
            .get(type_tag)
            .cloned()
            .ok_or_else(|| ConversionError::Unsupported(type_tag.to_string()))
    }

    /// Number of registered converters.
    pub fn len(&self) -> usize {
        self.converters.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.converters.is_empty()
    }
}

impl<T> Default for ConverterRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Gathers color, material and definition tables for a selection.
pub trait ProxyCollector<T>: Send + Sync {
    /// Returns the proxy tables referenced by `objects`.
    fn collect(&self, objects: &[T]) -> ProxyTables;
}

/// Generic builder on top of a [`ConverterRegistry`].
pub struct ConvertingRootObjectBuilder<T> {
    registry: Arc<ConverterRegistry<T>>,
    cache: Arc<ConversionCache>,
    host: Arc<dyn HostThread>,
    proxies: Option<Arc<dyn ProxyCollector<T>>>,
    root_name: String,
}

impl<T: HostObject> ConvertingRootObjectBuilder<T> {
    /// Creates a builder.
    pub fn new(
        registry: Arc<ConverterRegistry<T>>,
        cache: Arc<ConversionCache>,
        host: Arc<dyn HostThread>,
    ) -> Self {
        Self {
            registry,
            cache,
            host,
            proxies: None,
            root_name: "Document".to_string(),
        }
    }

    /// Attaches a proxy collector.
    pub fn with_proxy_collector(mut self, proxies: Arc<dyn ProxyCollector<T>>) -> Self {
        self.proxies = Some(proxies);
        self
    }

    /// Sets the root collection name.
    pub fn with_root_name(mut self, name: impl Into<String>) -> Self {
        self.root_name = name.into();
        self
    }

    async fn convert(&self, object: &T) -> EngineResult<Result<Base, ConversionError>> {
        let converter = match self.registry.resolve(object.type_tag()) {
            Ok(converter) => converter,
            Err(err) => return Ok(Err(err)),
        };
        let owned = object.clone();
        let converted = self.host.run(move || converter.convert(&owned)).await?;
        Ok(converted.map(|mut base| {
            if base.application_id.is_none() {
                base.application_id = Some(object.id().to_string());
            }
            base
        }))
    }
}

#[async_trait]
impl<T: HostObject> RootObjectBuilder<T> for ConvertingRootObjectBuilder<T> {
    async fn build(
        &self,
        objects: &[T],
        send_info: &SendInfo,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<RootObjectBuilderResult> {
        let total = objects.len() as u64;
        let mut root = Base::collection(self.root_name.clone());
        let mut results = Vec::with_capacity(objects.len());
        let mut reused = 0usize;

        for (index, object) in objects.iter().enumerate() {
            check(token)?;

            let converted = match self.cache.lookup(&send_info.project_id, object.id()) {
                Some(reference) => {
                    reused += 1;
                    Ok(reference.into_base())
                }
                None => self.convert(object).await?,
            };

            match converted {
                Ok(base) => {
                    results.push(ConversionResult::success(
                        object.id(),
                        object.type_tag(),
                        object.id(),
                        base.type_name(),
                    ));
                    insert_at_path(&mut root, &object.layer_path(), base);
                }
                Err(err) => {
                    tracing::warn!(object_id = object.id(), error = %err, "conversion failed");
                    results.push(ConversionResult::failure(object.id(), object.type_tag(), err));
                }
            }
            progress.report(ProgressEvent::new(
                ProgressKind::Conversion,
                index as u64 + 1,
                Some(total),
            ));
        }

        if !objects.is_empty() && results.iter().all(ConversionResult::is_error) {
            return Err(EngineError::NothingConverted(objects.len()));
        }

        if let Some(collector) = &self.proxies {
            let tables = collector.collect(objects);
            if !tables.is_empty() {
                root = root.with_proxies(tables);
            }
        }

        tracing::debug!(
            objects = objects.len(),
            reused,
            failed = results.iter().filter(|r| r.is_error()).count(),
            "root object built"
        );
        Ok(RootObjectBuilderResult {
            root,
            conversion_results: results,
        })
    }
}

/// Appends `base` to the collection at `path` below `parent`, creating
/// intermediate collections by name.
fn insert_at_path(parent: &mut Base, path: &[String], base: Base) {
    let Some(collection) = parent.as_collection_mut() else {
        return;
    };
    match path.split_first() {
        None => collection.elements.push(base),
        Some((name, rest)) => {
            let existing = collection
                .elements
                .iter()
                .position(|e| e.as_collection().is_some() && e.name.as_deref() == Some(name.as_str()));
            let index = match existing {
                Some(index) => index,
                None => {
                    collection.elements.push(Base::collection(name.clone()));
                    collection.elements.len() - 1
                }
            };
            insert_at_path(&mut collection.elements[index], rest, base);
        }
    }
}
