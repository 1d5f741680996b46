//! # Conduit Server
//!
//! In-process reference object server for Conduit.
//!
//! This crate provides:
//! - A project-scoped, content-addressed object store
//! - Model versions (create, get, latest, mark received)
//! - HMAC-SHA256 account tokens, validated on every request when enabled
//! - Failure injection for transport error tests
//!
//! The server has no network layer. Connectors and tests adapt it to the
//! engine's transport traits.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod auth;
mod config;
mod error;
mod server;
mod store;

pub use auth::TokenValidator;
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{ObjectServer, ServerStats};
pub use store::{ProjectStore, VersionRecord};
