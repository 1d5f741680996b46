//! # Conduit Testkit
//!
//! Test utilities for Conduit.
//!
//! This crate provides:
//! - A fake host document, converters and a recording baker
//! - An adapter running the engine against the in-process object server
//! - A ready-wired [`TestEngine`] harness
//! - Graph fixtures with nested instances
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conduit_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn send_roundtrip() {
//!     let mut engine = TestEngine::new();
//!     engine.document.insert(FakeObject::point("a", 0.0, &["Layer"]));
//!     let card = engine.add_sender("card", SendFilter::Everything);
//!     assert!(engine.operations.send(&card).await.is_some());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
