//! Materializing received graphs in hosts without instancing.

use crate::builder::{ConversionResult, HostObjectBuilder, HostObjectBuilderResult};
use crate::cancellation::check;
use crate::error::{ConversionError, EngineResult};
use crate::host_thread::HostThread;
use crate::instances::InstanceUnpacker;
use crate::progress::{ProgressEvent, ProgressKind, ProgressSink};
use crate::unpack::unpack_root;
use async_trait::async_trait;
use conduit_model::{Base, ProxyTables, ReceiveInfo};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Display attributes resolved from the proxy tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectStyle {
    /// Packed ARGB color.
    pub color: Option<u32>,
    /// Application id of the render material.
    pub material: Option<String>,
}

/// Creates native host objects. Called on the host thread.
pub trait HostBaker: Send + Sync {
    /// Bakes one flattened object on `layer_path` and returns the created
    /// host ids.
    fn bake(
        &self,
        object: &Base,
        layer_path: &[String],
        style: &ObjectStyle,
    ) -> Result<Vec<String>, ConversionError>;
}

/// Object id to style index.
#[derive(Debug, Clone, Default)]
pub struct ProxyLookup {
    colors: HashMap<String, u32>,
    materials: HashMap<String, String>,
}

impl ProxyLookup {
    /// Indexes the color and material tables.
    pub async fn build(tables: &ProxyTables, yield_every: usize) -> Self {
        let yield_every = yield_every.max(1);
        let mut lookup = Self::default();
        let mut visited = 0usize;

        for color in &tables.colors {
            for id in &color.objects {
                lookup.colors.insert(id.clone(), color.argb);
                visited += 1;
                if visited % yield_every == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }
        for material in &tables.materials {
            for id in &material.objects {
                lookup
                    .materials
                    .insert(id.clone(), material.application_id.clone());
                visited += 1;
                if visited % yield_every == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }
        lookup
    }

    /// Style of the object with application id `id`.
    pub fn style_for(&self, id: &str) -> ObjectStyle {
        ObjectStyle {
            color: self.colors.get(id).copied(),
            material: self.materials.get(id).cloned(),
        }
    }
}

/// Host builder that flattens instances and bakes every object on its own.
pub struct FlatHostObjectBuilder {
    baker: Arc<dyn HostBaker>,
    host: Arc<dyn HostThread>,
    unpacker: InstanceUnpacker,
    yield_every: usize,
}

impl FlatHostObjectBuilder {
    /// Creates a builder.
    pub fn new(baker: Arc<dyn HostBaker>, host: Arc<dyn HostThread>) -> Self {
        Self {
            baker,
            host,
            unpacker: InstanceUnpacker::default(),
            yield_every: 100,
        }
    }

    /// Replaces the instance unpacker.
    pub fn with_unpacker(mut self, unpacker: InstanceUnpacker) -> Self {
        self.unpacker = unpacker;
        self
    }

    /// Sets how often proxy indexing yields.
    pub fn with_yield_every(mut self, items: usize) -> Self {
        self.yield_every = items.max(1);
        self
    }
}

#[async_trait]
impl HostObjectBuilder for FlatHostObjectBuilder {
    async fn build(
        &self,
        root: Base,
        receive_info: &ReceiveInfo,
        progress: &dyn ProgressSink,
        token: &CancellationToken,
    ) -> EngineResult<HostObjectBuilderResult> {
        let mut unpacked = unpack_root(root);
        let mut maps = self.unpacker.unpack(&unpacked)?;
        check(token)?;

        let remap = self.unpacker.flatten(&mut maps).await;
        remap.apply_to_tables(&mut unpacked.proxies);
        let lookup = ProxyLookup::build(&unpacked.proxies, self.yield_every).await;

        let model_layer = format!("{} - {}", receive_info.project_id, receive_info.model_id);
        let total = maps.len() as u64;
        let mut result = HostObjectBuilderResult::default();

        for (index, map) in maps.into_iter().enumerate() {
            check(token)?;
            let source_id = map.atomic_object.identity().unwrap_or_default().to_string();
            let source_type = map.atomic_object.type_name();
            let style = lookup.style_for(&source_id);
            let mut layer_path = Vec::with_capacity(map.path.len() + 1);
            layer_path.push(model_layer.clone());
            layer_path.extend(map.path);

            let baker = Arc::clone(&self.baker);
            let object = map.atomic_object;
            let baked = self
                .host
                .run(move || baker.bake(&object, &layer_path, &style))
                .await?;

            match baked {
                Ok(ids) => {
                    result.conversion_results.push(ConversionResult::success(
                        &source_id,
                        source_type,
                        ids.join(","),
                        source_type,
                    ));
                    result.baked_object_ids.extend(ids);
                }
                Err(err) => {
                    tracing::warn!(object_id = %source_id, error = %err, "baking failed");
                    result
                        .conversion_results
                        .push(ConversionResult::failure(&source_id, source_type, err));
                }
            }
            progress.report(ProgressEvent::new(
                ProgressKind::Baking,
                index as u64 + 1,
                Some(total),
            ));
        }

        tracing::debug!(
            baked = result.baked_object_ids.len(),
            remapped = remap.len(),
            "host objects built"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host_thread::InlineHostThread;
    use crate::progress::NullProgress;
    use conduit_model::{
        ColorProxy, Geometry, InstanceDefinitionProxy, Matrix4, Point, RenderMaterial,
        RenderMaterialProxy,
    };
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        baked: Mutex<Vec<(String, Vec<String>, ObjectStyle)>>,
    }

    impl HostBaker for Recorder {
        fn bake(
            &self,
            object: &Base,
            layer_path: &[String],
            style: &ObjectStyle,
        ) -> Result<Vec<String>, ConversionError> {
            let id = object.application_id.clone().unwrap_or_default();
            if id == "broken" {
                return Err(ConversionError::Failed("invalid geometry".into()));
            }
            self.baked
                .lock()
                .push((id.clone(), layer_path.to_vec(), style.clone()));
            Ok(vec![format!("host-{id}")])
        }
    }

    fn receive_info() -> ReceiveInfo {
        ReceiveInfo {
            account_id: "acc".into(),
            server_url: "https://server.test".into(),
            project_id: "proj".into(),
            model_id: "model".into(),
            selected_version_id: "v1".into(),
            source_application: "test".into(),
        }
    }

    fn point(id: &str) -> Base {
        Base::geometry(id, Geometry::Point(Point::new(0.0, 0.0, 0.0)))
    }

    #[tokio::test]
    async fn lookup_indexes_colors_and_materials() {
        let tables = ProxyTables {
            colors: vec![ColorProxy {
                application_id: "red".into(),
                argb: 0xffff0000,
                name: None,
                objects: vec!["a".into()],
            }],
            materials: vec![RenderMaterialProxy {
                application_id: "steel".into(),
                value: RenderMaterial {
                    name: "Steel".into(),
                    diffuse_argb: 0xff808080,
                    opacity: 1.0,
                    metalness: 1.0,
                    roughness: 0.3,
                },
                objects: vec!["a".into(), "b".into()],
            }],
            ..Default::default()
        };

        let lookup = ProxyLookup::build(&tables, 1).await;

        assert_eq!(
            lookup.style_for("a"),
            ObjectStyle {
                color: Some(0xffff0000),
                material: Some("steel".into())
            }
        );
        assert_eq!(lookup.style_for("b").color, None);
        assert_eq!(lookup.style_for("zzz"), ObjectStyle::default());
    }

    #[tokio::test]
    async fn bakes_flattened_objects_with_remapped_styles() {
        let root = Base::collection("root")
            .with_proxies(ProxyTables {
                colors: vec![ColorProxy {
                    application_id: "blue".into(),
                    argb: 0xff0000ff,
                    name: None,
                    objects: vec!["m".into()],
                }],
                instance_definitions: vec![InstanceDefinitionProxy {
                    application_id: "def".into(),
                    name: "Block".into(),
                    objects: vec!["m".into()],
                    max_depth: 0,
                }],
                ..Default::default()
            })
            .with_element(
                Base::collection("Blocks")
                    .with_element(point("m"))
                    .with_element(Base::instance("i1", "def", Matrix4::translation(1.0, 0.0, 0.0))),
            )
            .with_element(point("broken"));

        let recorder = Arc::new(Recorder::default());
        let builder = FlatHostObjectBuilder::new(recorder.clone(), Arc::new(InlineHostThread));

        let result = builder
            .build(root, &receive_info(), &NullProgress, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.baked_object_ids.len(), 1);
        assert_eq!(result.conversion_results.len(), 2);
        assert!(result.conversion_results[1].is_error());

        let baked = recorder.baked.lock();
        let (id, layers, style) = &baked[0];
        assert!(id.starts_with("m_"));
        assert_eq!(layers, &vec!["proj - model".to_string(), "Blocks".to_string()]);
        assert_eq!(style.color, Some(0xff0000ff));
    }
}
