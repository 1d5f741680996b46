//! Local-to-global instance flattening.
//!
//! Hosts without hierarchical instancing cannot bake instance proxies. The
//! unpacker expands every top-level placement through its definition (and
//! any nested definitions) into one [`LocalToGlobalMap`] per leaf, carrying
//! the transform stack from the outermost placement inwards. Flattening then
//! bakes the composed transform into a private copy of the leaf and gives it
//! a fresh application id, so every placement becomes an independent object.

use crate::error::{EngineError, EngineResult};
use crate::unpack::UnpackedRoot;
use conduit_model::{Base, InstanceDefinitionProxy, Matrix4, ObjectProxy, ProxyTables};
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::collections::{BTreeMap, HashMap, HashSet};

/// One leaf placement.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalToGlobalMap {
    /// Private copy of the atomic object.
    pub atomic_object: Base,
    /// Collection path of the top-level object that produced the placement.
    pub path: Vec<String>,
    /// Placement transforms, outermost first. Cleared once flattened.
    pub matrix_stack: Vec<Matrix4>,
}

impl LocalToGlobalMap {
    /// Returns true if the object comes from an instance placement.
    pub fn is_instanced(&self) -> bool {
        !self.matrix_stack.is_empty()
    }
}

/// Original application ids and the ids generated for their placements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdRemap {
    ids: BTreeMap<String, Vec<String>>,
}

impl IdRemap {
    /// Records that `original` was placed as `generated`.
    pub fn record(&mut self, original: impl Into<String>, generated: impl Into<String>) {
        self.ids.entry(original.into()).or_default().push(generated.into());
    }

    /// Generated ids for `original`.
    pub fn get(&self, original: &str) -> Option<&[String]> {
        self.ids.get(original).map(Vec::as_slice)
    }

    /// Number of remapped originals.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if nothing was remapped.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Replaces remapped ids in every proxy's object list by all their
    /// generated ids.
    pub fn apply<P: ObjectProxy>(&self, proxies: &mut [P]) {
        for proxy in proxies {
            let objects = proxy.objects_mut();
            let mut rewritten = Vec::with_capacity(objects.len());
            for id in objects.drain(..) {
                match self.ids.get(&id) {
                    Some(generated) => rewritten.extend(generated.iter().cloned()),
                    None => rewritten.push(id),
                }
            }
            *objects = rewritten;
        }
    }

    /// Rewrites the color and material tables.
    pub fn apply_to_tables(&self, tables: &mut ProxyTables) {
        self.apply(&mut tables.colors);
        self.apply(&mut tables.materials);
    }
}

/// Expands instance proxies into flat placements.
#[derive(Debug, Clone)]
pub struct InstanceUnpacker {
    suffix_len: usize,
    yield_every: usize,
}

impl InstanceUnpacker {
    /// Creates an unpacker appending `suffix_len` random characters to
    /// generated ids.
    pub fn new(suffix_len: usize) -> Self {
        Self {
            suffix_len: suffix_len.max(1),
            yield_every: 100,
        }
    }

    /// Sets how often flattening yields to the runtime.
    pub fn with_yield_every(mut self, items: usize) -> Self {
        self.yield_every = items.max(1);
        self
    }

    /// Builds one map per top-level atomic object and per instanced leaf.
    ///
    /// Definition members are not baked on their own. Placements of unknown
    /// definitions are dropped; a definition containing itself is an error.
    pub fn unpack(&self, root: &UnpackedRoot) -> EngineResult<Vec<LocalToGlobalMap>> {
        let definitions: HashMap<&str, &InstanceDefinitionProxy> = root
            .proxies
            .instance_definitions
            .iter()
            .map(|d| (d.application_id.as_str(), d))
            .collect();
        let members: HashSet<&str> = root
            .proxies
            .instance_definitions
            .iter()
            .flat_map(|d| d.objects.iter().map(String::as_str))
            .collect();

        let mut by_id: HashMap<&str, &Base> = HashMap::new();
        for entry in &root.objects {
            if let Some(app_id) = entry.object.application_id.as_deref() {
                by_id.insert(app_id, &entry.object);
            }
            if let Some(id) = &entry.object.id {
                by_id.insert(id.as_str(), &entry.object);
            }
        }

        let context = ExpandContext {
            definitions,
            by_id,
        };

        let mut maps = Vec::new();
        for entry in &root.objects {
            if is_member(&entry.object, &members) {
                continue;
            }
            match entry.object.as_instance() {
                Some(instance) => {
                    let mut stack = vec![instance.transform];
                    let mut visiting = Vec::new();
                    context.expand(
                        &instance.definition_id,
                        &entry.path,
                        &mut stack,
                        &mut visiting,
                        &mut maps,
                    )?;
                }
                None => maps.push(LocalToGlobalMap {
                    atomic_object: entry.object.clone(),
                    path: entry.path.clone(),
                    matrix_stack: Vec::new(),
                }),
            }
        }
        Ok(maps)
    }

    /// Bakes each map's transform stack into its object and assigns
    /// instanced objects a fresh unique application id.
    pub async fn flatten(&self, maps: &mut [LocalToGlobalMap]) -> IdRemap {
        let mut remap = IdRemap::default();
        let mut used: HashSet<String> = HashSet::new();

        for (index, map) in maps.iter_mut().enumerate() {
            if map.is_instanced() {
                let matrix = Matrix4::compose(map.matrix_stack.iter());
                map.atomic_object.transform(&matrix);
                if let Some(original) = map.atomic_object.identity().map(str::to_string) {
                    let generated = self.unique_id(&original, &mut used);
                    map.atomic_object.application_id = Some(generated.clone());
                    map.atomic_object.id = None;
                    remap.record(original, generated);
                }
                map.matrix_stack.clear();
            }
            if (index + 1) % self.yield_every == 0 {
                tokio::task::yield_now().await;
            }
        }
        remap
    }

    fn unique_id(&self, original: &str, used: &mut HashSet<String>) -> String {
        let mut len = self.suffix_len;
        let mut attempts = 0;
        loop {
            let candidate = format!("{original}_{}", random_suffix(len));
            if used.insert(candidate.clone()) {
                return candidate;
            }
            attempts += 1;
            if attempts % 8 == 0 {
                len += 1;
            }
        }
    }
}

impl Default for InstanceUnpacker {
    fn default() -> Self {
        Self::new(6)
    }
}

struct ExpandContext<'a> {
    definitions: HashMap<&'a str, &'a InstanceDefinitionProxy>,
    by_id: HashMap<&'a str, &'a Base>,
}

impl<'a> ExpandContext<'a> {
    fn expand(
        &self,
        definition_id: &'a str,
        path: &[String],
        stack: &mut Vec<Matrix4>,
        visiting: &mut Vec<&'a str>,
        maps: &mut Vec<LocalToGlobalMap>,
    ) -> EngineResult<()> {
        let Some(definition) = self.definitions.get(definition_id) else {
            tracing::warn!(definition_id, "dropping instance of unknown definition");
            return Ok(());
        };
        if visiting.contains(&definition_id) {
            return Err(EngineError::MalformedGraph(format!(
                "instance definition `{definition_id}` contains itself"
            )));
        }
        visiting.push(definition_id);

        for member_id in &definition.objects {
            let Some(&member) = self.by_id.get(member_id.as_str()) else {
                tracing::warn!(definition_id, member_id = %member_id, "definition member not found");
                continue;
            };
            match member.as_instance() {
                Some(nested) => {
                    stack.push(nested.transform);
                    self.expand(&nested.definition_id, path, stack, visiting, maps)?;
                    stack.pop();
                }
                None => maps.push(LocalToGlobalMap {
                    atomic_object: member.clone(),
                    path: path.to_vec(),
                    matrix_stack: stack.clone(),
                }),
            }
        }

        visiting.pop();
        Ok(())
    }
}

fn is_member(object: &Base, members: &HashSet<&str>) -> bool {
    object
        .application_id
        .as_deref()
        .is_some_and(|id| members.contains(id))
        || object.id.as_ref().is_some_and(|id| members.contains(id.as_str()))
}

fn random_suffix(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unpack::{unpack_root, ObjectAtPath};
    use conduit_model::{ColorProxy, Geometry, Point};

    fn point(id: &str, x: f64) -> Base {
        Base::geometry(id, Geometry::Point(Point::new(x, 0.0, 0.0)))
    }

    fn definition(id: &str, objects: &[&str]) -> InstanceDefinitionProxy {
        InstanceDefinitionProxy {
            application_id: id.into(),
            name: id.into(),
            objects: objects.iter().map(|s| s.to_string()).collect(),
            max_depth: 0,
        }
    }

    fn root_of(objects: Vec<Base>, definitions: Vec<InstanceDefinitionProxy>) -> UnpackedRoot {
        UnpackedRoot {
            objects: objects
                .into_iter()
                .map(|object| ObjectAtPath {
                    object,
                    path: vec!["Layer".into()],
                })
                .collect(),
            proxies: ProxyTables {
                instance_definitions: definitions,
                ..Default::default()
            },
        }
    }

    fn x_of(base: &Base) -> f64 {
        base.as_geometry().unwrap().vertices()[0].x
    }

    #[tokio::test]
    async fn two_members_instanced_twice() {
        let root = root_of(
            vec![
                point("m1", 1.0),
                point("m2", 2.0),
                Base::instance("i1", "def", Matrix4::translation(10.0, 0.0, 0.0)),
                Base::instance("i2", "def", Matrix4::translation(20.0, 0.0, 0.0)),
            ],
            vec![definition("def", &["m1", "m2"])],
        );

        let unpacker = InstanceUnpacker::new(6);
        let mut maps = unpacker.unpack(&root).unwrap();
        assert_eq!(maps.len(), 4);
        assert!(maps.iter().all(LocalToGlobalMap::is_instanced));

        let remap = unpacker.flatten(&mut maps).await;

        let ids: HashSet<_> = maps
            .iter()
            .map(|m| m.atomic_object.application_id.clone().unwrap())
            .collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(remap.get("m1").unwrap().len(), 2);
        assert_eq!(remap.get("m2").unwrap().len(), 2);
        assert!(remap.get("m1").unwrap()[0].starts_with("m1_"));
        assert_eq!(remap.get("m1").unwrap()[0].len(), "m1_".len() + 6);
        assert!(maps.iter().all(|m| m.matrix_stack.is_empty()));

        let xs: Vec<f64> = maps.iter().map(|m| x_of(&m.atomic_object)).collect();
        assert_eq!(xs, vec![11.0, 12.0, 21.0, 22.0]);
    }

    #[test]
    fn members_are_excluded_from_top_level() {
        let root = root_of(
            vec![
                point("m1", 1.0),
                point("free", 5.0),
                Base::instance("i1", "def", Matrix4::IDENTITY),
            ],
            vec![definition("def", &["m1"])],
        );

        let maps = InstanceUnpacker::default().unpack(&root).unwrap();
        let top_level: Vec<_> = maps
            .iter()
            .filter(|m| !m.is_instanced())
            .map(|m| m.atomic_object.application_id.as_deref().unwrap())
            .collect();

        assert_eq!(top_level, vec!["free"]);
        assert_eq!(maps.len(), 2);
        assert!(maps.iter().all(|m| m.path == vec!["Layer".to_string()]));
    }

    #[tokio::test]
    async fn nested_definitions_compose_outer_to_inner() {
        // inner: point at x=1; outer places inner scaled by 2; top places outer at x=100.
        let root = root_of(
            vec![
                point("leaf", 1.0),
                Base::instance("inner-i", "inner", Matrix4::scale(2.0)),
                Base::instance("top", "outer", Matrix4::translation(100.0, 0.0, 0.0)),
            ],
            vec![definition("inner", &["leaf"]), definition("outer", &["inner-i"])],
        );

        let unpacker = InstanceUnpacker::default();
        let mut maps = unpacker.unpack(&root).unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].matrix_stack.len(), 2);

        unpacker.flatten(&mut maps).await;
        assert_eq!(x_of(&maps[0].atomic_object), 102.0);
    }

    #[tokio::test]
    async fn nested_definition_placed_twice_reaches_each_member_twice() {
        let root = root_of(
            vec![
                point("m1", 1.0),
                point("m2", 2.0),
                Base::instance("p1", "inner", Matrix4::translation(10.0, 0.0, 0.0)),
                Base::instance("p2", "inner", Matrix4::translation(20.0, 0.0, 0.0)),
                Base::instance("top", "outer", Matrix4::translation(100.0, 0.0, 0.0)),
            ],
            vec![
                definition("inner", &["m1", "m2"]),
                definition("outer", &["p1", "p2"]),
            ],
        );

        let unpacker = InstanceUnpacker::default();
        let mut maps = unpacker.unpack(&root).unwrap();
        assert_eq!(maps.len(), 4);
        assert!(maps.iter().all(|m| m.matrix_stack.len() == 2));

        let remap = unpacker.flatten(&mut maps).await;

        let ids: HashSet<_> = maps
            .iter()
            .map(|m| m.atomic_object.application_id.clone().unwrap())
            .collect();
        assert_eq!(ids.len(), 4);
        for original in ["m1", "m2"] {
            let generated = remap.get(original).unwrap();
            assert_eq!(generated.len(), 2);
            assert!(generated.iter().all(|id| ids.contains(id)));
        }

        let mut xs: Vec<f64> = maps.iter().map(|m| x_of(&m.atomic_object)).collect();
        xs.sort_by(f64::total_cmp);
        assert_eq!(xs, vec![111.0, 112.0, 121.0, 122.0]);
    }

    #[test]
    fn self_containing_definition_is_malformed() {
        let root = root_of(
            vec![
                Base::instance("loop-i", "loop", Matrix4::IDENTITY),
                Base::instance("top", "loop", Matrix4::IDENTITY),
            ],
            vec![definition("loop", &["loop-i"])],
        );

        assert!(matches!(
            InstanceUnpacker::default().unpack(&root),
            Err(EngineError::MalformedGraph(_))
        ));
    }

    #[test]
    fn unknown_definition_is_dropped() {
        let root = root_of(
            vec![point("a", 0.0), Base::instance("i", "missing", Matrix4::IDENTITY)],
            vec![],
        );

        let maps = InstanceUnpacker::default().unpack(&root).unwrap();
        assert_eq!(maps.len(), 1);
        assert_eq!(maps[0].atomic_object.application_id.as_deref(), Some("a"));
    }

    #[test]
    fn remap_rewrites_proxy_objects() {
        let mut remap = IdRemap::default();
        remap.record("m1", "m1_aaa");
        remap.record("m1", "m1_bbb");

        let mut tables = ProxyTables {
            colors: vec![ColorProxy {
                application_id: "red".into(),
                argb: 0xffff0000,
                name: None,
                objects: vec!["m1".into(), "other".into()],
            }],
            ..Default::default()
        };
        remap.apply_to_tables(&mut tables);

        assert_eq!(tables.colors[0].objects, vec!["m1_aaa", "m1_bbb", "other"]);
    }

    #[tokio::test]
    async fn non_instanced_objects_keep_ids() {
        let root = unpack_root(Base::collection("root").with_element(point("a", 3.0)));
        let unpacker = InstanceUnpacker::default();
        let mut maps = unpacker.unpack(&root).unwrap();

        let remap = unpacker.flatten(&mut maps).await;

        assert!(remap.is_empty());
        assert_eq!(maps[0].atomic_object.application_id.as_deref(), Some("a"));
        assert_eq!(x_of(&maps[0].atomic_object), 3.0);
    }
}
