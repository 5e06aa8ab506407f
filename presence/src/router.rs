use crate::connection::{ConnectionHandle, ConnectionRegistry, UserIdentity};
use crate::lifecycle::ConnectionLifecycle;
use crate::message::{Message, Outbound};
use crate::sink::PersistenceSink;
use entity_api::Id;
use events::{EventPublisher, RelayEvent};
use log::*;
use serde_json::Value;
use std::sync::Arc;

/// What routing decided for one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteOutcome {
    /// The connection registered an identity; `superseded` is the connection
    /// that held it before, if any.
    Registered { superseded: Option<Id> },
    /// A broadcast was fanned out to `delivered` connections.
    Broadcast { message_id: Id, delivered: usize },
    /// A direct message was resolved; `delivered` is false when the
    /// recipient's transport turned out to be gone.
    Direct { message_id: Id, delivered: bool },
    /// The recipient identity has no live registration. Nothing was built,
    /// delivered, or persisted.
    UnresolvedRecipient,
}

/// Decides the fan-out of every message event and hands a copy of each routed
/// message to the persistence sink.
///
/// The router only reads the registry. Stale handles found during delivery
/// are closed through the lifecycle, which owns all registry mutation.
#[derive(Clone)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
    lifecycle: Arc<ConnectionLifecycle>,
    sink: PersistenceSink,
    publisher: EventPublisher,
    notify_unresolved_recipient: bool,
}

impl MessageRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        lifecycle: Arc<ConnectionLifecycle>,
        sink: PersistenceSink,
        publisher: EventPublisher,
    ) -> Self {
        Self {
            registry,
            lifecycle,
            sink,
            publisher,
            notify_unresolved_recipient: false,
        }
    }

    /// Send a `recipientUnavailable` frame back to senders of unresolved
    /// direct messages.
    pub fn notify_unresolved_recipient(mut self, enabled: bool) -> Self {
        self.notify_unresolved_recipient = enabled;
        self
    }

    /// Deliver `content` to every live connection except the sender,
    /// then persist it. Persistence happens however many deliveries succeed.
    pub async fn broadcast(&self, from: &ConnectionHandle, content: Value) -> RouteOutcome {
        let message = Message::broadcast(
            content,
            from.id().clone(),
            self.lifecycle.identity_of(from.id()),
        );
        let recipients = self.registry.all_handles_except(from);
        let frame = message.outbound();

        let mut delivered = 0;
        for recipient in &recipients {
            if self.deliver(recipient, frame.clone()).await {
                delivered += 1;
            }
        }

        debug!(
            "Broadcast {} from {} delivered to {delivered}/{} connection(s)",
            message.id,
            from.id(),
            recipients.len()
        );

        let message_id = message.id;
        self.sink.record(message).await;

        RouteOutcome::Broadcast {
            message_id,
            delivered,
        }
    }

    /// Deliver `content` to the connection registered as `recipient`, then
    /// persist it. An unknown recipient is reported, never persisted.
    pub async fn direct(
        &self,
        from: &ConnectionHandle,
        recipient: UserIdentity,
        content: Value,
    ) -> RouteOutcome {
        let Some(target) = self.registry.lookup(&recipient) else {
            info!(
                "Direct message from {} to unknown recipient {recipient:?} dropped",
                from.id()
            );
            self.publisher
                .publish(RelayEvent::UnresolvedRecipient {
                    sender_connection_id: from.id().as_uuid(),
                    recipient_identity: recipient.clone(),
                })
                .await;

            if self.notify_unresolved_recipient {
                self.deliver(
                    from,
                    Outbound::RecipientUnavailable {
                        recipient_identity: recipient,
                    },
                )
                .await;
            }
            return RouteOutcome::UnresolvedRecipient;
        };

        let message = Message::direct(
            content,
            from.id().clone(),
            self.lifecycle.identity_of(from.id()),
            recipient,
        );
        let delivered = self.deliver(&target, message.outbound()).await;

        debug!(
            "Direct message {} from {} to {} (delivered: {delivered})",
            message.id,
            from.id(),
            target.id()
        );

        let message_id = message.id;
        self.sink.record(message).await;

        RouteOutcome::Direct {
            message_id,
            delivered,
        }
    }

    /// Push one frame; a failed push means the transport is gone, so the
    /// connection is closed as if the transport had reported it.
    async fn deliver(&self, recipient: &ConnectionHandle, frame: Outbound) -> bool {
        let Err(e) = recipient.deliver(frame) else {
            return true;
        };

        warn!(
            "Failed to deliver to connection {}: {e}. Connection will be cleaned up.",
            recipient.id()
        );
        if self.lifecycle.close(recipient) {
            let connection_id = recipient.id().as_uuid();
            self.publisher
                .publish(RelayEvent::StaleHandle { connection_id })
                .await;
            self.publisher
                .publish(RelayEvent::ConnectionClosed { connection_id })
                .await;
        }
        false
    }
}
