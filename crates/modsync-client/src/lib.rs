//! modsync-client library.
//!
//! Runs the `modsync-core` connection engine on tokio: one websocket shared
//! by every [`SyncClient`] handle, with RAII guards for queue subscriptions
//! and review claims.
//!
//! # Conventions
//!
//! - **Errors**: nothing crosses the facade; failures are logged and retried.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).

#![forbid(unsafe_code)]

pub mod client;
pub mod listeners;
pub mod token;
pub mod transport;

pub use client::{ClientOptions, QueueSubscription, ReviewClaim, SyncClient};
pub use listeners::ListenerId;
pub use modsync_core::engine::Phase;
