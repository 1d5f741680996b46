//! Graph nodes.

use crate::geometry::Geometry;
use crate::ids::ObjectId;
use crate::proxies::{InstanceProxy, ProxyTables};
use crate::reference::ObjectReference;
use crate::transform::Matrix4;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A dynamic property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    /// No value.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Integer(i64),
    /// Floating point number.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Ordered list.
    List(Vec<PropertyValue>),
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<f64> for PropertyValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Named properties of a node, ordered by key.
pub type Properties = BTreeMap<String, PropertyValue>;

/// A container of child nodes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Collection {
    /// Child nodes. Each one is detached into its own stored object.
    pub elements: Vec<Base>,
    /// Proxy tables; only populated on the root collection.
    #[serde(default, skip_serializing_if = "ProxyTables::is_empty")]
    pub proxies: ProxyTables,
}

/// What a node holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BaseKind {
    /// A named container.
    Collection(Collection),
    /// An atomic geometric object.
    Geometry(Geometry),
    /// A placement of an instance definition.
    Instance(InstanceProxy),
    /// A pointer to an object stored elsewhere.
    Reference(ObjectReference),
    /// An atomic non-geometric object that only carries properties.
    Data,
}

/// A node of the object graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Base {
    /// Content id, set once the node has been serialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    /// Id of the host entity this node was converted from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_id: Option<String>,
    /// Display name (collection or layer name for containers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Dynamic properties.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    /// Descendants of a stored node and their depth; empty for inline nodes.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub closure: BTreeMap<ObjectId, u32>,
    /// Node payload.
    pub kind: BaseKind,
}

impl Base {
    fn with_kind(kind: BaseKind) -> Self {
        Self {
            id: None,
            application_id: None,
            name: None,
            properties: BTreeMap::new(),
            closure: BTreeMap::new(),
            kind,
        }
    }

    /// Creates an empty named collection.
    pub fn collection(name: impl Into<String>) -> Self {
        let mut base = Self::with_kind(BaseKind::Collection(Collection::default()));
        base.name = Some(name.into());
        base
    }

    /// Creates a geometric object.
    pub fn geometry(application_id: impl Into<String>, geometry: Geometry) -> Self {
        Self::with_kind(BaseKind::Geometry(geometry)).with_application_id(application_id)
    }

    /// Creates an instance placement.
    pub fn instance(application_id: impl Into<String>, definition_id: impl Into<String>, transform: Matrix4) -> Self {
        Self::with_kind(BaseKind::Instance(InstanceProxy::new(definition_id, transform)))
            .with_application_id(application_id)
    }

    /// Creates a non-geometric data object.
    pub fn data(application_id: impl Into<String>) -> Self {
        Self::with_kind(BaseKind::Data).with_application_id(application_id)
    }

    /// Sets the application id.
    #[must_use]
    pub fn with_application_id(mut self, application_id: impl Into<String>) -> Self {
        self.application_id = Some(application_id.into());
        self
    }

    /// Sets the name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Adds a child element. Has no effect on non-collection nodes.
    #[must_use]
    pub fn with_element(mut self, element: Base) -> Self {
        self.push(element);
        self
    }

    /// Sets the proxy tables. Has no effect on non-collection nodes.
    #[must_use]
    pub fn with_proxies(mut self, proxies: ProxyTables) -> Self {
        if let Some(collection) = self.as_collection_mut() {
            collection.proxies = proxies;
        }
        self
    }

    /// Appends a child element. Returns false on non-collection nodes.
    pub fn push(&mut self, element: Base) -> bool {
        match self.as_collection_mut() {
            Some(collection) => {
                collection.elements.push(element);
                true
            }
            None => false,
        }
    }

    /// Type name used in conversion reports.
    pub fn type_name(&self) -> &'static str {
        match &self.kind {
            BaseKind::Collection(_) => "Collection",
            BaseKind::Geometry(geometry) => geometry.type_name(),
            BaseKind::Instance(_) => "InstanceProxy",
            BaseKind::Reference(_) => "ObjectReference",
            BaseKind::Data => "DataObject",
        }
    }

    /// Returns the application id, falling back to the content id.
    pub fn identity(&self) -> Option<&str> {
        self.application_id
            .as_deref()
            .or_else(|| self.id.as_ref().map(ObjectId::as_str))
    }

    /// Returns true for objects converted one-to-one into host objects.
    pub fn is_atomic(&self) -> bool {
        matches!(
            self.kind,
            BaseKind::Geometry(_) | BaseKind::Instance(_) | BaseKind::Data
        )
    }

    /// Returns the collection payload.
    pub fn as_collection(&self) -> Option<&Collection> {
        match &self.kind {
            BaseKind::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Returns the mutable collection payload.
    pub fn as_collection_mut(&mut self) -> Option<&mut Collection> {
        match &mut self.kind {
            BaseKind::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    /// Returns the instance payload.
    pub fn as_instance(&self) -> Option<&InstanceProxy> {
        match &self.kind {
            BaseKind::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Returns the geometry payload.
    pub fn as_geometry(&self) -> Option<&Geometry> {
        match &self.kind {
            BaseKind::Geometry(geometry) => Some(geometry),
            _ => None,
        }
    }

    /// Applies a transform to the node's geometry and, for instances, to the
    /// placement. Other kinds are left untouched.
    pub fn transform(&mut self, matrix: &Matrix4) {
        match &mut self.kind {
            BaseKind::Geometry(geometry) => geometry.transform(matrix),
            BaseKind::Instance(instance) => instance.transform = matrix.multiply(&instance.transform),
            _ => {}
        }
    }

    /// Counts this node and all inline descendants.
    pub fn count_nodes(&self) -> usize {
        1 + self
            .as_collection()
            .map(|c| c.elements.iter().map(Base::count_nodes).sum())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Point;

    #[test]
    fn collection_builder() {
        let root = Base::collection("root")
            .with_element(Base::geometry("a", Geometry::Point(Point::new(1.0, 2.0, 3.0))))
            .with_element(Base::data("b").with_property("level", "L1"));

        let collection = root.as_collection().unwrap();
        assert_eq!(collection.elements.len(), 2);
        assert_eq!(root.count_nodes(), 3);
        assert_eq!(collection.elements[1].properties["level"], PropertyValue::from("L1"));
    }

    #[test]
    fn push_on_leaf_is_rejected() {
        let mut leaf = Base::data("x");
        assert!(!leaf.push(Base::data("y")));
    }

    #[test]
    fn identity_prefers_application_id() {
        let mut base = Base::data("app");
        base.id = Some(ObjectId::new("hash"));
        assert_eq!(base.identity(), Some("app"));

        base.application_id = None;
        assert_eq!(base.identity(), Some("hash"));
    }

    #[test]
    fn transform_instance_composes_outside() {
        let mut instance = Base::instance("i", "def", Matrix4::scale(2.0));
        instance.transform(&Matrix4::translation(1.0, 0.0, 0.0));
        let transform = instance.as_instance().unwrap().transform;
        assert_eq!(transform.transform_point(Point::new(1.0, 0.0, 0.0)), Point::new(3.0, 0.0, 0.0));
    }
}
