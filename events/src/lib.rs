//! Observability events for the chat relay.
//!
//! This crate provides the event system that lets the routing engine report
//! what happened to connections and messages without knowing who is listening
//! (logs, tests, future metrics exporters).
//!
//! # Architecture
//!
//! - **RelayEvent**: Enum representing every observable state change or failure
//! - **EventHandler**: Trait for implementing event handlers
//! - **EventPublisher**: Publishes events to registered handlers
//!
//! This crate has no dependencies on internal crates, avoiding circular
//! dependencies. Connections and messages are referenced by their ids only.

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// A type alias that represents a connection or message id.
pub type Id = Uuid;

/// Events emitted by the presence and routing engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelayEvent {
    /// A transport connection was accepted and is now `Open`.
    ConnectionOpened { connection_id: Id },
    /// A connection reached the terminal `Closed` state.
    ConnectionClosed { connection_id: Id },
    /// A connection registered (or re-registered) a logical identity.
    IdentityRegistered { connection_id: Id, identity: String },
    /// An identity moved from one live connection to another. The previous
    /// connection is not notified.
    IdentitySuperseded {
        identity: String,
        previous_connection_id: Id,
        connection_id: Id,
    },
    /// A direct send named an identity with no live registration.
    UnresolvedRecipient {
        sender_connection_id: Id,
        recipient_identity: String,
    },
    /// Delivery to a registered connection failed because its transport is
    /// gone; the connection has been closed as a result.
    StaleHandle { connection_id: Id },
    /// A persistence write failed and will be attempted again.
    PersistenceRetry {
        message_id: Id,
        attempt: u32,
        error: String,
    },
    /// A message could not be persisted and was written to the dead-letter log.
    DeadLettered { message_id: Id, error: String },
}

impl RelayEvent {
    /// Short, stable name used as a log tag.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayEvent::ConnectionOpened { .. } => "connection_opened",
            RelayEvent::ConnectionClosed { .. } => "connection_closed",
            RelayEvent::IdentityRegistered { .. } => "identity_registered",
            RelayEvent::IdentitySuperseded { .. } => "identity_superseded",
            RelayEvent::UnresolvedRecipient { .. } => "unresolved_recipient",
            RelayEvent::StaleHandle { .. } => "stale_handle",
            RelayEvent::PersistenceRetry { .. } => "persistence_retry",
            RelayEvent::DeadLettered { .. } => "dead_lettered",
        }
    }
}

/// Trait for handling relay events.
/// Implementations can perform side effects like logging, counting, or
/// recording events for assertions in tests.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &RelayEvent);
}

/// Publishes relay events to registered handlers.
/// Handlers are called sequentially in registration order.
#[derive(Clone)]
pub struct EventPublisher {
    handlers: Arc<Vec<Arc<dyn EventHandler>>>,
}

impl EventPublisher {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    /// Note: This creates a new publisher instance with the additional handler.
    /// Store the returned publisher wherever events are emitted.
    pub fn with_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        let mut handlers = (*self.handlers).clone();
        handlers.push(handler);
        self.handlers = Arc::new(handlers);
        self
    }

    /// Publish an event to all registered handlers.
    pub async fn publish(&self, event: RelayEvent) {
        for handler in self.handlers.iter() {
            handler.handle(&event).await;
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
