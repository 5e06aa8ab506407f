//! WebSocket transport for the relay.
//!
//! The handler upgrades the HTTP request; each upgraded socket then runs as
//! its own actor, translating text frames into `presence` events and
//! outbound events back into text frames.

pub(crate) mod actor;
pub(crate) mod handler;
