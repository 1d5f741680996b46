//! Proxy tables attached to the root collection.
//!
//! Proxies are indirection records: instead of inlining a color, material or
//! block definition on every object, the root carries one record per value
//! listing the application ids of the objects that use it.

use crate::transform::Matrix4;
use serde::{Deserialize, Serialize};

/// A proxy that lists the application ids of the objects it applies to.
pub trait ObjectProxy {
    /// Application id of the proxy itself.
    fn application_id(&self) -> &str;

    /// Application ids of the referenced objects.
    fn objects(&self) -> &[String];

    /// Mutable access to the referenced ids.
    fn objects_mut(&mut self) -> &mut Vec<String>;
}

/// A display color shared by several objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorProxy {
    /// Application id of the color.
    pub application_id: String,
    /// Packed ARGB value.
    pub argb: u32,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Objects using this color.
    pub objects: Vec<String>,
}

/// Render material values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderMaterial {
    /// Material name.
    pub name: String,
    /// Packed ARGB diffuse color.
    pub diffuse_argb: u32,
    /// Opacity in `[0, 1]`.
    pub opacity: f64,
    /// Metalness in `[0, 1]`.
    pub metalness: f64,
    /// Roughness in `[0, 1]`.
    pub roughness: f64,
}

/// A render material shared by several objects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderMaterialProxy {
    /// Application id of the material.
    pub application_id: String,
    /// Material values.
    pub value: RenderMaterial,
    /// Objects using this material.
    pub objects: Vec<String>,
}

/// A named geometry template referenced by instance proxies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDefinitionProxy {
    /// Application id of the definition; instance proxies point at it.
    pub application_id: String,
    /// Definition name.
    pub name: String,
    /// Application ids of the member objects (geometry or nested instances).
    pub objects: Vec<String>,
    /// Nesting depth of the definition.
    #[serde(default)]
    pub max_depth: u32,
}

/// A placement of an instance definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceProxy {
    /// Application id of the referenced definition.
    pub definition_id: String,
    /// Placement transform, local to the enclosing frame.
    pub transform: Matrix4,
    /// Nesting depth of the placement.
    #[serde(default)]
    pub max_depth: u32,
}

impl InstanceProxy {
    /// Creates a placement of `definition_id`.
    pub fn new(definition_id: impl Into<String>, transform: Matrix4) -> Self {
        Self {
            definition_id: definition_id.into(),
            transform,
            max_depth: 0,
        }
    }
}

macro_rules! impl_object_proxy {
    ($($ty:ty),*) => {
        $(
            impl ObjectProxy for $ty {
                fn application_id(&self) -> &str {
                    &self.application_id
                }

                fn objects(&self) -> &[String] {
                    &self.objects
                }

                fn objects_mut(&mut self) -> &mut Vec<String> {
                    &mut self.objects
                }
            }
        )*
    };
}

impl_object_proxy!(ColorProxy, RenderMaterialProxy, InstanceDefinitionProxy);

/// Side-channel tables carried by a root collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProxyTables {
    /// Color proxies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub colors: Vec<ColorProxy>,
    /// Render material proxies.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub materials: Vec<RenderMaterialProxy>,
    /// Instance definitions.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub instance_definitions: Vec<InstanceDefinitionProxy>,
}

impl ProxyTables {
    /// Returns true if no table has entries.
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.materials.is_empty() && self.instance_definitions.is_empty()
    }

    /// Appends every table of `other` to this one.
    pub fn extend(&mut self, other: ProxyTables) {
        self.colors.extend(other.colors);
        self.materials.extend(other.materials);
        self.instance_definitions.extend(other.instance_definitions);
    }
}
