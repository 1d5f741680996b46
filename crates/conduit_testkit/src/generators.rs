//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random graphs, host documents and
//! change sets that keep the invariants the engine relies on.

use crate::fixtures::FakeObject;
use conduit_model::{Base, ChangeSet, Geometry, Line, Matrix4, Point};
use proptest::prelude::*;

/// Strategy for generating host/application ids.
pub fn application_id_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z][a-z0-9]{0,11}").expect("Invalid regex")
}

/// Strategy for generating layer names.
pub fn layer_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,7}").expect("Invalid regex")
}

/// Strategy for generating finite points.
pub fn point_strategy() -> impl Strategy<Value = Point> {
    (-1e4..1e4f64, -1e4..1e4f64, -1e4..1e4f64).prop_map(|(x, y, z)| Point::new(x, y, z))
}

/// Strategy for generating point or line geometry.
pub fn geometry_strategy() -> impl Strategy<Value = Geometry> {
    prop_oneof![
        point_strategy().prop_map(Geometry::Point),
        (point_strategy(), point_strategy())
            .prop_map(|(start, end)| Geometry::Line(Line { start, end })),
    ]
}

/// Strategy for generating rigid placement transforms.
pub fn transform_strategy() -> impl Strategy<Value = Matrix4> {
    (
        -1e3..1e3f64,
        -1e3..1e3f64,
        -1e3..1e3f64,
        -std::f64::consts::PI..std::f64::consts::PI,
    )
        .prop_map(|(x, y, z, angle)| {
            Matrix4::translation(x, y, z).multiply(&Matrix4::rotation_z(angle))
        })
}

/// Strategy for generating a two-level layered graph with unique
/// application ids.
pub fn layered_graph_strategy() -> impl Strategy<Value = Base> {
    prop::collection::btree_map(
        application_id_strategy(),
        (layer_name_strategy(), geometry_strategy()),
        1..24,
    )
    .prop_map(|objects| {
        let mut root = Base::collection("Document");
        for (id, (layer, geometry)) in objects {
            let node = Base::geometry(id, geometry);
            let collection = root.as_collection_mut().expect("root is a collection");
            match collection
                .elements
                .iter_mut()
                .find(|e| e.name.as_deref() == Some(layer.as_str()))
            {
                Some(existing) => {
                    existing.push(node);
                }
                None => {
                    collection
                        .elements
                        .push(Base::collection(layer).with_element(node));
                }
            }
        }
        root
    })
}

/// Strategy for generating host documents with unique ids.
pub fn document_strategy() -> impl Strategy<Value = Vec<FakeObject>> {
    prop::collection::btree_map(
        application_id_strategy(),
        (layer_name_strategy(), -1e3..1e3f64),
        1..32,
    )
    .prop_map(|objects| {
        objects
            .into_iter()
            .map(|(id, (layer, x))| FakeObject::point(&id, x, &[layer.as_str()]))
            .collect()
    })
}

/// Strategy for generating change sets over `ids`.
pub fn change_set_strategy(ids: Vec<String>) -> impl Strategy<Value = ChangeSet> {
    let count = ids.len();
    prop::collection::vec((any::<bool>(), any::<bool>()), count).prop_map(move |flags| {
        let mut changes = ChangeSet::new();
        for (id, (touched, deleted)) in ids.iter().zip(flags) {
            match (touched, deleted) {
                (true, true) => {
                    changes.removed.insert(id.clone());
                }
                (true, false) => {
                    changes.changed.insert(id.clone());
                }
                _ => {}
            }
        }
        changes
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn layered_graphs_group_by_layer(root in layered_graph_strategy()) {
            let layers = &root.as_collection().unwrap().elements;
            let mut names: Vec<_> = layers.iter().filter_map(|l| l.name.clone()).collect();
            let total = names.len();
            names.sort();
            names.dedup();
            prop_assert_eq!(names.len(), total);
            prop_assert!(layers.iter().all(|l| !l.as_collection().unwrap().elements.is_empty()));
        }

        #[test]
        fn documents_have_unique_ids(objects in document_strategy()) {
            let mut ids: Vec<_> = objects.iter().map(|o| o.id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), objects.len());
        }
    }
}
