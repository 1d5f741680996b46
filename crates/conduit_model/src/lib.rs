//! # Conduit Model
//!
//! Object graph types shared by every Conduit connector.
//!
//! This crate provides:
//! - `Base` graph nodes (collections, geometry, instances, references)
//! - Proxy tables (colors, render materials, instance definitions)
//! - Row-major 4x4 transforms
//! - Model cards and the per-operation send/receive records
//! - Content-addressed CBOR serialization and graph reassembly
//!
//! This is a pure data crate with no I/O.
//!
//! ## Usage
//!
//! ```
//! use conduit_model::{Base, Geometry, Point, Serializer};
//!
//! let root = Base::collection("root")
//!     .with_element(Base::geometry("wall-1", Geometry::Point(Point::new(0.0, 0.0, 0.0))));
//!
//! let graph = Serializer::serialize(&root).unwrap();
//! assert_eq!(graph.objects.len(), 2);
//! assert!(graph.references.contains_key("wall-1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod base;
mod card;
mod change;
pub mod codec;
mod error;
mod geometry;
mod ids;
mod proxies;
mod reference;
mod serializer;
mod transform;

pub use base::{Base, BaseKind, Collection, Properties, PropertyValue};
pub use card::{
    CardKind, ModelCard, ModelTarget, ReceiveInfo, ReceiverCard, SendFilter, SendInfo, SenderCard,
};
pub use change::ChangeSet;
pub use error::{ModelError, ModelResult};
pub use geometry::{Geometry, Line, Mesh, Point, Polyline};
pub use ids::{CardId, ObjectId};
pub use proxies::{
    ColorProxy, InstanceDefinitionProxy, InstanceProxy, ObjectProxy, ProxyTables, RenderMaterial,
    RenderMaterialProxy,
};
pub use reference::ObjectReference;
pub use serializer::{Deserializer, SerializedGraph, SerializedObject, Serializer};
pub use transform::Matrix4;
