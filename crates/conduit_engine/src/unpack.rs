//! Walking a received root into atomic objects and proxy tables.

use conduit_model::{Base, BaseKind, ProxyTables};

/// An atomic object and the names of the collections above it.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAtPath {
    /// The object.
    pub object: Base,
    /// Collection names from the outermost (below the root) inwards.
    pub path: Vec<String>,
}

/// Everything a host builder needs from a received root.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnpackedRoot {
    /// Atomic objects in document order.
    pub objects: Vec<ObjectAtPath>,
    /// Proxy tables gathered from every collection.
    pub proxies: ProxyTables,
}

/// Collects atomic objects and proxy tables from `root`.
///
/// Unresolved references are skipped.
pub fn unpack_root(root: Base) -> UnpackedRoot {
    let mut unpacked = UnpackedRoot::default();
    match root.kind {
        BaseKind::Collection(collection) => {
            unpacked.proxies.extend(collection.proxies);
            for element in collection.elements {
                walk(element, &mut Vec::new(), &mut unpacked);
            }
        }
        _ => walk(root, &mut Vec::new(), &mut unpacked),
    }
    unpacked
}

fn walk(node: Base, path: &mut Vec<String>, unpacked: &mut UnpackedRoot) {
    if node.is_atomic() {
        unpacked.objects.push(ObjectAtPath {
            object: node,
            path: path.clone(),
        });
        return;
    }
    match node.kind {
        BaseKind::Collection(collection) => {
            unpacked.proxies.extend(collection.proxies);
            path.push(node.name.unwrap_or_else(|| "Unnamed".to_string()));
            for element in collection.elements {
                walk(element, path, unpacked);
            }
            path.pop();
        }
        BaseKind::Reference(reference) => {
            tracing::warn!(referenced_id = %reference.referenced_id, "skipping unresolved reference");
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_model::{ColorProxy, Geometry, Matrix4, ObjectId, ObjectReference, Point};

    fn point(id: &str) -> Base {
        Base::geometry(id, Geometry::Point(Point::new(0.0, 0.0, 0.0)))
    }

    #[test]
    fn collects_objects_with_paths() {
        let root = Base::collection("root")
            .with_element(Base::collection("L1").with_element(point("a")).with_element(
                Base::collection("Sub").with_element(Base::instance("i", "def", Matrix4::IDENTITY)),
            ))
            .with_element(point("b"))
            .with_element(ObjectReference::new(ObjectId::from("dangling")).into_base());

        let unpacked = unpack_root(root);
        let summary: Vec<(Option<&str>, Vec<&str>)> = unpacked
            .objects
            .iter()
            .map(|o| {
                (
                    o.object.application_id.as_deref(),
                    o.path.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        assert_eq!(
            summary,
            vec![
                (Some("a"), vec!["L1"]),
                (Some("i"), vec!["L1", "Sub"]),
                (Some("b"), vec![]),
            ]
        );
    }

    #[test]
    fn gathers_proxies_from_nested_collections() {
        let color = |id: &str| ColorProxy {
            application_id: id.into(),
            argb: 0xff00ff00,
            name: None,
            objects: vec![],
        };
        let root = Base::collection("root")
            .with_proxies(ProxyTables {
                colors: vec![color("c1")],
                ..Default::default()
            })
            .with_element(Base::collection("L").with_proxies(ProxyTables {
                colors: vec![color("c2")],
                ..Default::default()
            }));

        let unpacked = unpack_root(root);
        assert_eq!(unpacked.proxies.colors.len(), 2);
    }
}
