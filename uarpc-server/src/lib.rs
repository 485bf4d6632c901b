//! # uarpc-server
//!
//! TCP server for uarpc.
//!
//! This crate provides:
//! - The accept loop and per-connection frame pump
//! - [`ConnectionRegistry`]: live-connection tracking with listener
//!   notification and consistent snapshots
//! - [`RequestContext`]: the per-request correlation object with a
//!   respond-exactly-once obligation
//! - Trust gating of client certificates during channel establishment
//! - YAML/environment configuration

pub mod config;
pub mod context;
pub mod error;
pub mod registry;
pub mod server;

pub use config::{Config, ConfigError};
pub use context::{EndpointDescription, RequestContext};
pub use error::ServerError;
pub use registry::{ConnectionHandle, ConnectionListener, ConnectionRegistry, ListenerId};
pub use server::{LoopbackHandler, Server, ServerConfig, ServerStats, ServiceHandler};
