//! # Conduit Engine
//!
//! The operation pipeline shared by every Conduit connector.
//!
//! A connector supplies the host-specific pieces (a [`HostSelection`],
//! converters, a [`HostBaker`], an [`AccountProvider`] and a [`ServerApi`])
//! and gets:
//!
//! - Send: selection, conversion with per-object cache reuse, content
//!   addressed upload of only what the server lacks, version creation
//! - Receive: version lookup, closure download with local cache reuse,
//!   graph reassembly, instance flattening and baking
//! - Change tracking that expires sender cards and evicts stale cache entries
//! - Per-card single-flight cancellation and throttled progress
//!
//! ## Architecture
//!
//! ```text
//! host objects -> RootObjectBuilder -> RootObjectSender -> server
//! server -> ReceiveOperation -> InstanceUnpacker -> HostBaker -> host objects
//! ```
//!
//! Operations run as tokio tasks. Conversion and baking are marshaled onto
//! the host through a [`HostThread`]; network I/O never is.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod bake;
mod builder;
mod cache;
mod cancellation;
mod cards;
mod changes;
mod config;
mod error;
mod host_thread;
mod instances;
mod object_cache;
mod operations;
mod progress;
mod receive;
mod send;
mod sender;
mod transport;
mod ui;
mod unpack;

pub use bake::{FlatHostObjectBuilder, HostBaker, ObjectStyle, ProxyLookup};
pub use builder::{
    completion_status, resolve_selection, ConversionResult, ConversionStatus, ConverterRegistry,
    ConvertingRootObjectBuilder, HostObject, HostObjectBuilder, HostObjectBuilderResult,
    HostSelection, ProxyCollector, RootObjectBuilder, RootObjectBuilderResult, ToServerConverter,
};
pub use cache::{ConversionCache, Epoch};
pub use cancellation::{check, CancellationItem, CancellationRegistry};
pub use cards::ModelCardStore;
pub use changes::{ChangeListener, ChangeTracker, FlushOutcome, HostEvent};
pub use config::{EngineConfig, RetryConfig};
pub use error::{ConversionError, EngineError, EngineResult};
pub use host_thread::{DedicatedHostThread, HostJob, HostThread, InlineHostThread};
pub use instances::{IdRemap, InstanceUnpacker, LocalToGlobalMap};
pub use object_cache::LocalObjectCache;
pub use operations::{CardOperations, EngineContext};
pub use progress::{
    format_byte_rate, CardProgress, NullProgress, ProgressEvent, ProgressKind, ProgressSink,
    ThrottledProgress,
};
pub use receive::ReceiveOperation;
pub use send::{SendOperation, SendOperationResult};
pub use sender::{RootObjectSender, SendOutcome};
pub use transport::{
    retrying, Account, AccountProvider, CreateVersion, ProjectTransport, ServerApi,
    StaticAccounts, Version,
};
pub use ui::{CardEvent, UiBridge};
pub use unpack::{unpack_root, ObjectAtPath, UnpackedRoot};

pub use tokio_util::sync::CancellationToken;
