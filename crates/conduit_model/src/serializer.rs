//! Content-addressed graph serialization.
//!
//! Every collection element is detached into its own stored object and
//! replaced in its parent by a closure-free reference node. A stored object's
//! id is the hash of its encoding with `id` cleared, so unchanged subtrees
//! always produce the same ids and the server can skip them. Reference nodes
//! already present in the input (conversion cache hits) are embedded as-is
//! and never re-serialized.

use crate::base::{Base, BaseKind, Collection};
use crate::codec;
use crate::error::{ModelError, ModelResult};
use crate::ids::ObjectId;
use crate::reference::ObjectReference;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One encoded object ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedObject {
    /// Content id.
    pub id: ObjectId,
    /// CBOR encoding (including the id).
    pub bytes: Vec<u8>,
}

/// Result of serializing a root node.
#[derive(Debug, Clone)]
pub struct SerializedGraph {
    /// Id of the root object.
    pub root_id: ObjectId,
    /// Newly encoded objects, children before parents, deduplicated by id.
    pub objects: Vec<SerializedObject>,
    /// References for every detached node carrying an application id,
    /// including embedded cache hits.
    pub references: HashMap<String, ObjectReference>,
    /// Number of embedded references that were reused without encoding.
    pub reused: usize,
}

impl SerializedGraph {
    /// Total encoded size in bytes.
    pub fn total_bytes(&self) -> u64 {
        self.objects.iter().map(|o| o.bytes.len() as u64).sum()
    }
}

/// Serializes object graphs into content-addressed stored objects.
#[derive(Default)]
pub struct Serializer {
    objects: Vec<SerializedObject>,
    seen: HashSet<ObjectId>,
    references: HashMap<String, ObjectReference>,
    reused: usize,
}

impl Serializer {
    /// Serializes `root` and everything below it.
    pub fn serialize(root: &Base) -> ModelResult<SerializedGraph> {
        let mut serializer = Self::default();
        let root_ref = serializer.detach(root)?;
        Ok(SerializedGraph {
            root_id: root_ref.referenced_id,
            objects: serializer.objects,
            references: serializer.references,
            reused: serializer.reused,
        })
    }

    fn detach(&mut self, node: &Base) -> ModelResult<ObjectReference> {
        if let BaseKind::Reference(reference) = &node.kind {
            self.reused += 1;
            if let Some(app_id) = &reference.application_id {
                self.references.insert(app_id.clone(), reference.clone());
            }
            return Ok(reference.clone());
        }

        let mut closure = BTreeMap::new();
        let kind = match &node.kind {
            BaseKind::Collection(collection) => {
                let mut elements = Vec::with_capacity(collection.elements.len());
                for element in &collection.elements {
                    let child = self.detach(element)?;
                    merge_closure(&mut closure, &child);
                    elements.push(child.pointer());
                }
                BaseKind::Collection(Collection {
                    elements,
                    proxies: collection.proxies.clone(),
                })
            }
            other => other.clone(),
        };

        let mut stored = Base {
            id: None,
            application_id: node.application_id.clone(),
            name: node.name.clone(),
            properties: node.properties.clone(),
            closure,
            kind,
        };
        let id = ObjectId::for_content(&codec::encode(&stored)?);
        stored.id = Some(id.clone());

        if self.seen.insert(id.clone()) {
            self.objects.push(SerializedObject {
                id: id.clone(),
                bytes: codec::encode(&stored)?,
            });
        }

        let mut reference = ObjectReference::new(id).with_closure(stored.closure);
        reference.application_id = stored.application_id;
        if let Some(app_id) = &reference.application_id {
            self.references.insert(app_id.clone(), reference.clone());
        }
        Ok(reference)
    }
}

fn merge_closure(closure: &mut BTreeMap<ObjectId, u32>, child: &ObjectReference) {
    let mut insert = |id: &ObjectId, depth: u32| {
        closure
            .entry(id.clone())
            .and_modify(|d| *d = (*d).min(depth))
            .or_insert(depth);
    };
    insert(&child.referenced_id, 1);
    for (id, depth) in &child.closure {
        insert(id, depth + 1);
    }
}

/// Rebuilds graphs from stored objects.
pub struct Deserializer<'a> {
    store: &'a HashMap<ObjectId, Vec<u8>>,
    resolved: u64,
}

impl<'a> Deserializer<'a> {
    /// Creates a deserializer reading from `store`.
    pub fn new(store: &'a HashMap<ObjectId, Vec<u8>>) -> Self {
        Self { store, resolved: 0 }
    }

    /// Decodes `root_id` and resolves every reference below it.
    ///
    /// `on_object` is called with the running count of decoded objects.
    pub fn deserialize(
        &mut self,
        root_id: &ObjectId,
        on_object: &mut dyn FnMut(u64),
    ) -> ModelResult<Base> {
        let bytes = self
            .store
            .get(root_id)
            .ok_or_else(|| ModelError::MissingObject(root_id.clone()))?;
        let mut node: Base = codec::decode(bytes)?;
        self.resolved += 1;
        on_object(self.resolved);

        if let BaseKind::Reference(_) = node.kind {
            return Err(ModelError::UnexpectedObject {
                id: root_id.clone(),
                message: "stored object is itself a reference".into(),
            });
        }

        if let Some(collection) = node.as_collection_mut() {
            for element in &mut collection.elements {
                if let BaseKind::Reference(reference) = &element.kind {
                    let target = reference.referenced_id.clone();
                    *element = self.deserialize(&target, on_object)?;
                }
            }
        }
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, Point};
    use crate::proxies::{ColorProxy, ProxyTables};
    use proptest::prelude::*;

    fn point(app_id: &str, x: f64) -> Base {
        Base::geometry(app_id, Geometry::Point(Point::new(x, 0.0, 0.0)))
    }

    fn store_of(graph: &SerializedGraph) -> HashMap<ObjectId, Vec<u8>> {
        graph
            .objects
            .iter()
            .map(|o| (o.id.clone(), o.bytes.clone()))
            .collect()
    }

    #[test]
    fn detaches_elements_and_builds_closure() {
        let root = Base::collection("root")
            .with_element(Base::collection("layer").with_element(point("a", 1.0)))
            .with_element(point("b", 2.0));

        let graph = Serializer::serialize(&root).unwrap();
        assert_eq!(graph.objects.len(), 4);
        assert!(graph.references.contains_key("a"));
        assert!(graph.references.contains_key("b"));

        let store = store_of(&graph);
        let stored_root: Base = codec::decode(&store[&graph.root_id]).unwrap();
        assert_eq!(stored_root.closure.len(), 3);
        let a_id = &graph.references["a"].referenced_id;
        assert_eq!(stored_root.closure[a_id], 2);
    }

    #[test]
    fn unchanged_content_keeps_its_id() {
        let first = Serializer::serialize(&Base::collection("r").with_element(point("a", 1.0))).unwrap();
        let second = Serializer::serialize(&Base::collection("r").with_element(point("a", 1.0))).unwrap();
        let changed = Serializer::serialize(&Base::collection("r").with_element(point("a", 9.0))).unwrap();

        assert_eq!(first.root_id, second.root_id);
        assert_eq!(first.references["a"], second.references["a"]);
        assert_ne!(first.references["a"], changed.references["a"]);
    }

    #[test]
    fn embedded_references_are_not_reencoded() {
        let original = Serializer::serialize(&Base::collection("r").with_element(point("a", 1.0))).unwrap();
        let cached = original.references["a"].clone();

        let root = Base::collection("r")
            .with_element(cached.clone().into_base())
            .with_element(point("b", 2.0));
        let graph = Serializer::serialize(&root).unwrap();

        assert_eq!(graph.reused, 1);
        assert!(!graph.objects.iter().any(|o| o.id == cached.referenced_id));
        assert_eq!(graph.references["a"], cached);
    }

    #[test]
    fn round_trip_restores_tree_and_proxies() {
        let proxies = ProxyTables {
            colors: vec![ColorProxy {
                application_id: "red".into(),
                argb: 0xffff0000,
                name: None,
                objects: vec!["a".into()],
            }],
            ..Default::default()
        };
        let root = Base::collection("root")
            .with_element(Base::collection("layer").with_element(point("a", 1.0)))
            .with_proxies(proxies.clone());

        let graph = Serializer::serialize(&root).unwrap();
        let store = store_of(&graph);
        let mut count = 0;
        let restored = Deserializer::new(&store)
            .deserialize(&graph.root_id, &mut |n| count = n)
            .unwrap();

        assert_eq!(count, 3);
        assert_eq!(restored.as_collection().unwrap().proxies, proxies);
        let layer = &restored.as_collection().unwrap().elements[0];
        let leaf = &layer.as_collection().unwrap().elements[0];
        assert_eq!(leaf.application_id.as_deref(), Some("a"));
        assert!(leaf.id.is_some());
        assert!(leaf.as_geometry().is_some());
    }

    #[test]
    fn missing_child_is_reported() {
        let graph = Serializer::serialize(&Base::collection("r").with_element(point("a", 1.0))).unwrap();
        let mut store = store_of(&graph);
        let child = graph.references["a"].referenced_id.clone();
        store.remove(&child);

        let err = Deserializer::new(&store)
            .deserialize(&graph.root_id, &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, ModelError::MissingObject(id) if id == child));
    }

    proptest! {
        #[test]
        fn serialization_is_deterministic(xs in prop::collection::vec(-1e6f64..1e6, 1..20)) {
            let build = || {
                xs.iter().enumerate().fold(Base::collection("root"), |root, (i, x)| {
                    root.with_element(point(&format!("p{i}"), *x))
                })
            };
            let a = Serializer::serialize(&build()).unwrap();
            let b = Serializer::serialize(&build()).unwrap();
            prop_assert_eq!(a.root_id, b.root_id);
            prop_assert_eq!(a.objects, b.objects);
        }
    }
}
