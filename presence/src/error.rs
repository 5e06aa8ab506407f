//! Error types for the presence and routing engine.
use std::error::Error as StdError;
use std::fmt;

use entity_api::error::Error as EntityApiError;

/// Errors raised by the relay core.
/// Nothing here is fatal to the process: every error is scoped to a single
/// connection or a single message, and the caller decides whether to log it,
/// drop the frame, or retry.
#[derive(Debug)]
pub struct Error {
    pub source: Option<Box<dyn StdError + Send + Sync>>,
    pub error_kind: RelayErrorKind,
}

#[derive(Debug, PartialEq)]
pub enum RelayErrorKind {
    // An inbound frame could not be decoded into a known event
    InvalidFrame,
    // The connection has already reached the `Closed` state
    ConnectionClosed,
    // The outbound channel of a registered connection is gone
    StaleHandle,
    // Writing a message to the durable store failed
    Store(StoreErrorKind),
}

#[derive(Debug, PartialEq)]
pub enum StoreErrorKind {
    // Worth retrying: connection drops, pool exhaustion, timeouts
    Transient,
    // Retrying will not help: the record itself was rejected
    Permanent,
}

impl Error {
    pub fn new(error_kind: RelayErrorKind) -> Self {
        Self {
            source: None,
            error_kind,
        }
    }

    /// Whether a failed store write should be attempted again.
    pub fn is_transient(&self) -> bool {
        self.error_kind == RelayErrorKind::Store(StoreErrorKind::Transient)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "Relay Error ({:?}): {source}", self.error_kind),
            None => write!(f, "Relay Error ({:?})", self.error_kind),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn StdError + 'static))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error {
            source: Some(Box::new(err)),
            error_kind: RelayErrorKind::InvalidFrame,
        }
    }
}

// Store failures cross from the `entity_api` layer into the relay layer here.
impl From<EntityApiError> for Error {
    fn from(err: EntityApiError) -> Self {
        let store_error_kind = if err.is_transient() {
            StoreErrorKind::Transient
        } else {
            StoreErrorKind::Permanent
        };

        Error {
            source: Some(Box::new(err)),
            error_kind: RelayErrorKind::Store(store_error_kind),
        }
    }
}
