//! # uarpc-client
//!
//! Client transport for uarpc.
//!
//! This crate provides:
//! - [`AsyncResult`]: a single-assignment future with blocking wait,
//!   listener attachment and an injectable execution context
//! - [`SecureChannel`]: the session-oriented connection abstraction with
//!   open/reconnect/close/dispose lifecycle, request/response correlation
//!   and timeout enforcement

pub mod async_result;
pub mod channel;
pub mod error;

pub use async_result::{
    AsyncResult, Completion, InlineSpawner, ServiceFault, Spawner, TokioSpawner,
};
pub use channel::{ChannelConfig, ChannelFeatures, ChannelState, SecureChannel};
pub use error::ClientError;
