use async_trait::async_trait;
use events::{EventHandler, RelayEvent};
use log::*;

/// Log target for relay events, so operators can route them separately.
pub const RELAY_EVENT_TARGET: &str = "relay_events";

/// Writes every relay event to the log as one JSON object.
///
/// Routine lifecycle traffic goes out at info, anything that means a message
/// or connection went astray at warn, and dead letters at error.
#[derive(Debug, Default)]
pub struct LoggingEventHandler;

impl LoggingEventHandler {
    pub fn new() -> Self {
        Self
    }

    fn level(event: &RelayEvent) -> Level {
        match event {
            RelayEvent::ConnectionOpened { .. }
            | RelayEvent::ConnectionClosed { .. }
            | RelayEvent::IdentityRegistered { .. }
            | RelayEvent::IdentitySuperseded { .. } => Level::Info,
            RelayEvent::UnresolvedRecipient { .. }
            | RelayEvent::StaleHandle { .. }
            | RelayEvent::PersistenceRetry { .. } => Level::Warn,
            RelayEvent::DeadLettered { .. } => Level::Error,
        }
    }
}

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle(&self, event: &RelayEvent) {
        match serde_json::to_string(event) {
            Ok(json) => log!(target: RELAY_EVENT_TARGET, Self::level(event), "{json}"),
            Err(e) => warn!("Failed to serialize {} event: {e}", event.kind()),
        }
    }
}
