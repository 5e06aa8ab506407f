use crate::error::{Error, RelayErrorKind};
use crate::message::Outbound;
use entity_api::Id;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc::UnboundedSender;

/// Caller-chosen logical name used to address a user for direct delivery.
pub type UserIdentity = String;

/// Unique identifier for a connection (server-generated)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConnectionId(Id);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Id::new_v4())
    }

    pub fn as_uuid(&self) -> Id {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque reference to one live transport session.
///
/// Carries the sending half of the connection's outbound channel. Two handles
/// are equal when they refer to the same connection, regardless of channel.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    pub fn new(outbound: UnboundedSender<Outbound>) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Push a frame onto this connection's outbound channel. Never blocks.
    pub fn deliver(&self, frame: Outbound) -> Result<(), Error> {
        self.outbound.send(frame).map_err(|e| Error {
            source: Some(Box::new(e)),
            error_kind: RelayErrorKind::StaleHandle,
        })
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl Hash for ConnectionHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// A tracked connection and every identity it currently holds, oldest first.
#[derive(Debug)]
struct Registration {
    handle: ConnectionHandle,
    identities: Vec<UserIdentity>,
}

impl Registration {
    fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            identities: Vec::new(),
        }
    }
}

/// Both indices live behind one lock so that every operation observes them
/// in agreement.
#[derive(Debug, Default)]
struct Indices {
    /// Primary storage: identity -> handle, used for direct-message routing
    by_identity: HashMap<UserIdentity, ConnectionHandle>,
    /// Secondary index: every live connection -> its identities, used for
    /// cleanup and broadcast
    by_connection: HashMap<ConnectionId, Registration>,
}

/// Thread-safe mapping from logical identity to live connection.
///
/// Every live connection is tracked, with or without an identity. At most one
/// handle is registered per identity; the newest registration wins. Lock hold
/// times are bounded by map operations: callers deliver and persist after the
/// lock has been released.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    indices: Mutex<Indices>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave the indices half-updated in
    // a way later operations depend on, so a poisoned lock is still usable.
    fn indices(&self) -> MutexGuard<'_, Indices> {
        self.indices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking a live connection that holds no identity yet, so it
    /// takes part in broadcasts.
    pub fn track(&self, handle: ConnectionHandle) {
        self.indices()
            .by_connection
            .entry(handle.id().clone())
            .or_insert_with(|| Registration::new(handle));
    }

    /// Install or replace the mapping for `identity`.
    ///
    /// Returns the handle that previously held the identity when it was a
    /// different connection. The displaced connection stays tracked but no
    /// longer holds `identity`; it is not notified.
    pub fn register(
        &self,
        identity: UserIdentity,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut indices = self.indices();

        let previous = indices
            .by_identity
            .insert(identity.clone(), handle.clone())
            .filter(|previous| previous != &handle);

        if let Some(previous) = &previous {
            if let Some(registration) = indices.by_connection.get_mut(previous.id()) {
                registration.identities.retain(|held| held != &identity);
            }
        }

        let registration = indices
            .by_connection
            .entry(handle.id().clone())
            .or_insert_with(|| Registration::new(handle));
        // Re-registering moves the identity to the newest position
        registration.identities.retain(|held| held != &identity);
        registration.identities.push(identity);

        previous
    }

    /// Remove every entry owned by `handle`, whatever identities it holds.
    /// Identities another connection has since taken over are left alone.
    ///
    /// Returns the identities that were released.
    pub fn unregister(&self, handle: &ConnectionHandle) -> Vec<UserIdentity> {
        let mut indices = self.indices();

        let Some(registration) = indices.by_connection.remove(handle.id()) else {
            return Vec::new();
        };

        let mut released = Vec::with_capacity(registration.identities.len());
        for identity in registration.identities {
            let owned = indices
                .by_identity
                .get(&identity)
                .is_some_and(|current| current == handle);
            if owned {
                indices.by_identity.remove(&identity);
                released.push(identity);
            }
        }

        released
    }

    /// The handle currently registered for `identity`.
    pub fn lookup(&self, identity: &str) -> Option<ConnectionHandle> {
        self.indices().by_identity.get(identity).cloned()
    }

    /// Identities a connection currently holds, oldest first. Identities it
    /// lost to another connection are not included.
    pub fn identities_of(&self, connection_id: &ConnectionId) -> Vec<UserIdentity> {
        self.indices()
            .by_connection
            .get(connection_id)
            .map(|registration| registration.identities.clone())
            .unwrap_or_default()
    }

    /// Every live connection other than `handle`, each listed once.
    pub fn all_handles_except(&self, handle: &ConnectionHandle) -> Vec<ConnectionHandle> {
        self.indices()
            .by_connection
            .values()
            .filter(|registration| &registration.handle != handle)
            .map(|registration| registration.handle.clone())
            .collect()
    }
}
