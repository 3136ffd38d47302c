//! modsync-core library.
//!
//! Everything in this crate is synchronous and free of I/O: the assignment
//! state model, the wire codec, the reducer that folds server frames into
//! state, the subscription registry, and the connection state machine that
//! decides *what* to do. `modsync-client` decides *how* (tokio, websockets).
//!
//! # Conventions
//!
//! - **Errors**: `thiserror` enums carrying an [`error::ErrorCode`]; `anyhow::Result` for config loading.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

#![forbid(unsafe_code)]

pub mod config;
pub mod endpoint;
pub mod engine;
pub mod error;
pub mod model;
pub mod protocol;
pub mod reducer;
pub mod registry;
