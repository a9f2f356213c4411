//! Sluice Protocol - Core types that flow through the pipeline
//!
//! This crate provides the foundational types shared by every stage:
//! - `Message` - The in-flight unit of work (tag, payload, id, merged ids)
//! - `Value` / `Payload` - Dynamically typed payload with fallible accessors
//! - `MessagePool` - Lock-free free list of reusable messages
//! - `Inlet` / `Outlet` - Named, bounded MPMC channels used at every stage boundary
//!
//! # Design Principles
//!
//! - **Owned messages**: a `Message` is moved between stages, never aliased
//! - **Bounded everywhere**: every stage boundary is a bounded channel
//! - **Arc-friendly**: messages are wrapped in `Arc` only for multi-sink fan-out

mod channel;
mod error;
mod message;
mod pool;
mod value;

pub use channel::{Inlet, Outlet, SendFailure, inlet};
pub use error::ProtocolError;
pub use message::Message;
pub use pool::{MessagePool, PoolMetrics, PoolMetricsSnapshot};
pub use value::{Payload, Value};

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Default number of pooled messages kept on the free list
pub const DEFAULT_POOL_SIZE: usize = 10_000;

#[cfg(test)]
mod pool_test;
