//! Presence tracking and message routing for the chat relay.
//!
//! This crate knows which logical identity is reachable over which live
//! connection, fans messages out to the right connections, and hands every
//! routed message to a durable store without ever blocking delivery on it.
//!
//! # Architecture
//!
//! - **ConnectionRegistry**: identity -> connection and connection -> identities
//!   indices behind a single lock, so lookups always see them in agreement.
//! - **ConnectionLifecycle**: the only writer of the registry. Drives each
//!   connection through `Open -> Registered -> Closed`.
//! - **MessageRouter**: broadcast and direct delivery, stale-handle cleanup.
//! - **PersistenceSink**: bounded queue drained by a background writer with
//!   exponential backoff and a dead-letter log.
//! - **Manager**: the facade the transport layer talks to.
//!
//! # Message Flow
//!
//! 1. The transport accepts a socket and calls `Manager::open_connection`
//! 2. Each decoded `Inbound` event goes through `Manager::handle_inbound`
//! 3. The router pushes `Outbound` frames onto recipients' channels
//! 4. The routed `Message` is enqueued on the sink; the writer stores it
//!    in the background
//! 5. When the transport goes away it calls `Manager::close_connection`
//!
//! Delivery is best-effort and ephemeral: an offline recipient misses the
//! message, but the message is still persisted.

pub mod connection;
pub mod dead_letter;
pub mod error;
pub mod event_handler;
pub mod lifecycle;
pub mod manager;
pub mod message;
pub mod retry;
pub mod router;
pub mod sink;
pub mod store;

pub use manager::Manager;
