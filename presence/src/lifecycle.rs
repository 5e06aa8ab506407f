use crate::connection::{ConnectionHandle, ConnectionId, ConnectionRegistry, UserIdentity};
use crate::error::{Error, RelayErrorKind};
use crate::message::Outbound;
use dashmap::DashMap;
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Where a connection is in its life. A connection absent from the lifecycle
/// table is `Closed`; that state is terminal.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// Transport established, no identity registered yet.
    Open,
    /// At least one identity registered; `identity` is the most recent one.
    Registered { identity: UserIdentity },
}

/// Owns the open/close transitions of every connection and is the only
/// component that mutates the [`ConnectionRegistry`].
pub struct ConnectionLifecycle {
    registry: Arc<ConnectionRegistry>,
    connections: DashMap<ConnectionId, ConnectionState>,
}

impl ConnectionLifecycle {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            connections: DashMap::new(),
        }
    }

    /// Track a newly accepted transport connection in the `Open` state.
    pub fn open(&self, outbound: UnboundedSender<Outbound>) -> ConnectionHandle {
        let handle = ConnectionHandle::new(outbound);
        self.registry.track(handle.clone());
        self.connections
            .insert(handle.id().clone(), ConnectionState::Open);
        debug!("Connection {} opened", handle.id());
        handle
    }

    /// Register `identity` for `handle`, moving it to `Registered`.
    ///
    /// Returns the connection that previously held the identity, if any.
    /// Fails with `ConnectionClosed` once the handle has been closed.
    pub fn register(
        &self,
        handle: &ConnectionHandle,
        identity: UserIdentity,
    ) -> Result<Option<ConnectionHandle>, Error> {
        // The shard guard is held across the registry update: a concurrent
        // `close` removes the entry first and unregisters second, so it either
        // sees this registration or this call sees the connection gone.
        let Some(mut state) = self.connections.get_mut(handle.id()) else {
            return Err(Error::new(RelayErrorKind::ConnectionClosed));
        };

        let displaced = self.registry.register(identity.clone(), handle.clone());
        *state = ConnectionState::Registered { identity };
        // Release this shard before touching the displaced connection's entry
        drop(state);

        if let Some(previous) = &displaced {
            self.refresh(previous);
        }

        Ok(displaced)
    }

    /// Re-derive a live connection's state from the identities it still holds
    /// after another connection took one of them over.
    fn refresh(&self, handle: &ConnectionHandle) {
        let Some(mut state) = self.connections.get_mut(handle.id()) else {
            return;
        };

        *state = match self.registry.identities_of(handle.id()).pop() {
            Some(identity) => ConnectionState::Registered { identity },
            None => ConnectionState::Open,
        };
        debug!("Connection {} lost an identity, now {:?}", handle.id(), *state);
    }

    /// Move `handle` to `Closed` and release its registry entries.
    ///
    /// Returns `true` for the call that performed the transition; repeated
    /// closes return `false` and touch nothing.
    pub fn close(&self, handle: &ConnectionHandle) -> bool {
        if self.connections.remove(handle.id()).is_none() {
            return false;
        }

        let released = self.registry.unregister(handle);
        debug!(
            "Connection {} closed, released identities {:?}",
            handle.id(),
            released
        );
        true
    }

    /// Current state of a connection, `None` once it is closed.
    pub fn state(&self, connection_id: &ConnectionId) -> Option<ConnectionState> {
        self.connections
            .get(connection_id)
            .map(|state| state.value().clone())
    }

    /// The identity most recently registered by a connection.
    ///
    /// Only identities the connection still owns count: one taken over by
    /// another connection is never reported here.
    pub fn identity_of(&self, connection_id: &ConnectionId) -> Option<UserIdentity> {
        self.state(connection_id)?;
        self.registry.identities_of(connection_id).pop()
    }

    /// Number of connections not yet closed.
    pub fn open_connections(&self) -> usize {
        self.connections.len()
    }
}
