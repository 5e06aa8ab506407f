use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::error::{Error, RelayErrorKind};
use crate::lifecycle::ConnectionLifecycle;
use crate::message::{DirectMessage, Inbound, Outbound};
use crate::router::{MessageRouter, RouteOutcome};
use crate::sink::PersistenceSink;
use events::{EventPublisher, RelayEvent};
use log::*;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Entry point for the transport gateway: one instance per relay, shared by
/// every connection task.
pub struct Manager {
    registry: Arc<ConnectionRegistry>,
    lifecycle: Arc<ConnectionLifecycle>,
    router: MessageRouter,
    publisher: EventPublisher,
}

impl Manager {
    pub fn new(sink: PersistenceSink, publisher: EventPublisher) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let lifecycle = Arc::new(ConnectionLifecycle::new(Arc::clone(&registry)));
        let router = MessageRouter::new(
            Arc::clone(&registry),
            Arc::clone(&lifecycle),
            sink,
            publisher.clone(),
        );

        Self {
            registry,
            lifecycle,
            router,
            publisher,
        }
    }

    /// See [`MessageRouter::notify_unresolved_recipient`].
    pub fn notify_unresolved_recipient(mut self, enabled: bool) -> Self {
        self.router = self.router.notify_unresolved_recipient(enabled);
        self
    }

    /// Track a newly accepted connection whose outbound frames go to `outbound`.
    pub async fn open_connection(&self, outbound: UnboundedSender<Outbound>) -> ConnectionHandle {
        let handle = self.lifecycle.open(outbound);
        info!("Opened relay connection {}", handle.id());
        self.publisher
            .publish(RelayEvent::ConnectionOpened {
                connection_id: handle.id().as_uuid(),
            })
            .await;
        handle
    }

    /// Route one inbound event to completion.
    ///
    /// Callers process a connection's events one at a time; events of
    /// different connections may be handled concurrently.
    pub async fn handle_inbound(
        &self,
        from: &ConnectionHandle,
        event: Inbound,
    ) -> Result<RouteOutcome, Error> {
        if self.lifecycle.state(from.id()).is_none() {
            return Err(Error::new(RelayErrorKind::ConnectionClosed));
        }

        match event {
            Inbound::Register(identity) => self.register(from, identity).await,
            Inbound::Broadcast(content) => Ok(self.router.broadcast(from, content).await),
            Inbound::Direct(DirectMessage {
                recipient_identity,
                content,
            }) => Ok(self.router.direct(from, recipient_identity, content).await),
        }
    }

    async fn register(
        &self,
        from: &ConnectionHandle,
        identity: String,
    ) -> Result<RouteOutcome, Error> {
        let displaced = self.lifecycle.register(from, identity.clone())?;
        let connection_id = from.id().as_uuid();

        info!("Connection {connection_id} registered as {identity:?}");

        if let Some(previous) = &displaced {
            // Last writer wins; the previous holder keeps its connection
            info!(
                "Identity {identity:?} moved from connection {} to {connection_id}",
                previous.id()
            );
            self.publisher
                .publish(RelayEvent::IdentitySuperseded {
                    identity: identity.clone(),
                    previous_connection_id: previous.id().as_uuid(),
                    connection_id,
                })
                .await;
        }

        self.publisher
            .publish(RelayEvent::IdentityRegistered {
                connection_id,
                identity,
            })
            .await;

        Ok(RouteOutcome::Registered {
            superseded: displaced.map(|previous| previous.id().as_uuid()),
        })
    }

    /// Transport reported the connection closed. Safe to call more than once.
    pub async fn close_connection(&self, handle: &ConnectionHandle) {
        if self.lifecycle.close(handle) {
            info!("Closed relay connection {}", handle.id());
            self.publisher
                .publish(RelayEvent::ConnectionClosed {
                    connection_id: handle.id().as_uuid(),
                })
                .await;
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &ConnectionLifecycle {
        &self.lifecycle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dead_letter::DeadLetterLog;
    use crate::lifecycle::ConnectionState;
    use crate::sink::tests::{MemoryStore, RecordingHandler};
    use crate::sink::{SinkConfig, SinkWorker};
    use serde_json::json;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct Relay {
        manager: Manager,
        worker: SinkWorker,
        store: Arc<MemoryStore>,
        recorder: Arc<RecordingHandler>,
    }

    fn relay() -> Relay {
        let store = Arc::new(MemoryStore::default());
        let recorder = Arc::new(RecordingHandler::default());
        let publisher = EventPublisher::new().with_handler(recorder.clone());
        let (sink, worker) = PersistenceSink::spawn(
            store.clone(),
            SinkConfig::default(),
            DeadLetterLog::log_only(),
            publisher.clone(),
        );

        Relay {
            manager: Manager::new(sink, publisher),
            worker,
            store,
            recorder,
        }
    }

    async fn connect(
        manager: &Manager,
        identity: &str,
    ) -> (ConnectionHandle, UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = manager.open_connection(tx).await;
        manager
            .handle_inbound(&handle, Inbound::Register(identity.to_string()))
            .await
            .unwrap();
        (handle, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<Outbound>) -> Vec<Outbound> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[tokio::test]
    async fn alice_bob_and_carol_exchange_messages() {
        let Relay {
            manager,
            worker,
            store,
            recorder,
        } = relay();
        let (alice, mut alice_rx) = connect(&manager, "alice").await;
        let (bob, mut bob_rx) = connect(&manager, "bob").await;
        let (_carol, mut carol_rx) = connect(&manager, "carol").await;

        let outcome = manager
            .handle_inbound(&alice, Inbound::Broadcast(json!("hi")))
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Broadcast { delivered: 2, .. }));
        assert_eq!(drain(&mut bob_rx), vec![Outbound::Broadcast(json!("hi"))]);
        assert_eq!(drain(&mut carol_rx), vec![Outbound::Broadcast(json!("hi"))]);
        assert!(drain(&mut alice_rx).is_empty());

        let outcome = manager
            .handle_inbound(
                &alice,
                Inbound::Direct(DirectMessage {
                    recipient_identity: "bob".to_string(),
                    content: json!("yo"),
                }),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, RouteOutcome::Direct { delivered: true, .. }));
        assert_eq!(drain(&mut bob_rx), vec![Outbound::Direct(json!("yo"))]);
        assert!(drain(&mut carol_rx).is_empty());

        manager.close_connection(&bob).await;
        drop(bob_rx);

        let outcome = manager
            .handle_inbound(
                &alice,
                Inbound::Direct(DirectMessage {
                    recipient_identity: "bob".to_string(),
                    content: json!("still there?"),
                }),
            )
            .await
            .unwrap();
        assert_eq!(outcome, RouteOutcome::UnresolvedRecipient);
        assert!(drain(&mut carol_rx).is_empty());
        assert!(drain(&mut alice_rx).is_empty());

        worker.shutdown().await;

        // Only the two routed messages were persisted, with alice as sender
        let saved = store.saved.lock().unwrap();
        assert_eq!(saved.len(), 2);
        assert!(saved
            .iter()
            .all(|message| message.sender_identity.as_deref() == Some("alice")));
        assert_eq!(
            recorder
                .kinds()
                .iter()
                .filter(|kind| **kind == "unresolved_recipient")
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn re_registering_an_identity_reports_the_superseded_connection() {
        let Relay {
            manager, recorder, ..
        } = relay();
        let (first, _first_rx) = connect(&manager, "alice").await;
        let (tx, _second_rx) = mpsc::unbounded_channel();
        let second = manager.open_connection(tx).await;

        let outcome = manager
            .handle_inbound(&second, Inbound::Register("alice".to_string()))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RouteOutcome::Registered {
                superseded: Some(first.id().as_uuid())
            }
        );
        assert_eq!(manager.registry().lookup("alice"), Some(second));
        assert!(recorder.kinds().contains(&"identity_superseded"));
    }

    #[tokio::test]
    async fn clients_that_never_register_still_chat() {
        let Relay { manager, .. } = relay();
        let (tx, mut first_rx) = mpsc::unbounded_channel();
        let first = manager.open_connection(tx).await;
        let (tx, mut second_rx) = mpsc::unbounded_channel();
        let second = manager.open_connection(tx).await;

        let event = Inbound::parse(r#"{"event":"message","data":"hi"}"#).unwrap();
        let outcome = manager.handle_inbound(&first, event).await.unwrap();

        assert!(matches!(outcome, RouteOutcome::Broadcast { delivered: 1, .. }));
        assert_eq!(drain(&mut second_rx), vec![Outbound::Broadcast(json!("hi"))]);

        let event = Inbound::parse(r#"{"event":"message","data":"hey"}"#).unwrap();
        manager.handle_inbound(&second, event).await.unwrap();

        assert_eq!(drain(&mut first_rx), vec![Outbound::Broadcast(json!("hey"))]);
    }

    #[tokio::test]
    async fn taken_over_connection_returns_to_open_and_keeps_receiving() {
        let Relay { manager, .. } = relay();
        let (alice, _alice_rx) = connect(&manager, "alice").await;
        let (first_bob, mut first_bob_rx) = connect(&manager, "bob").await;
        let (_second_bob, mut second_bob_rx) = connect(&manager, "bob").await;

        assert_eq!(
            manager.lifecycle().state(first_bob.id()),
            Some(ConnectionState::Open)
        );

        let outcome = manager
            .handle_inbound(&alice, Inbound::Broadcast(json!("hi")))
            .await
            .unwrap();

        assert!(matches!(outcome, RouteOutcome::Broadcast { delivered: 2, .. }));
        assert_eq!(drain(&mut first_bob_rx), vec![Outbound::Broadcast(json!("hi"))]);
        assert_eq!(drain(&mut second_bob_rx), vec![Outbound::Broadcast(json!("hi"))]);
    }

    #[tokio::test]
    async fn closed_connections_cannot_send() {
        let Relay { manager, store, worker, .. } = relay();
        let (alice, _alice_rx) = connect(&manager, "alice").await;
        let (_bob, mut bob_rx) = connect(&manager, "bob").await;

        manager.close_connection(&alice).await;
        let error = manager
            .handle_inbound(&alice, Inbound::Broadcast(json!("hi")))
            .await
            .unwrap_err();

        assert_eq!(error.error_kind, RelayErrorKind::ConnectionClosed);
        assert!(drain(&mut bob_rx).is_empty());

        worker.shutdown().await;
        assert!(store.saved_ids().is_empty());
    }

    #[tokio::test]
    async fn closing_twice_emits_one_close_event() {
        let Relay {
            manager, recorder, ..
        } = relay();
        let (alice, _alice_rx) = connect(&manager, "alice").await;

        manager.close_connection(&alice).await;
        manager.close_connection(&alice).await;

        assert_eq!(
            recorder
                .kinds()
                .iter()
                .filter(|kind| **kind == "connection_closed")
                .count(),
            1
        );
        assert_eq!(manager.lifecycle().open_connections(), 0);
    }

    #[tokio::test]
    async fn connections_route_concurrently() {
        let Relay {
            manager,
            worker,
            store,
            ..
        } = relay();
        let manager = Arc::new(manager);
        let (_listener, mut listener_rx) = connect(&manager, "listener").await;

        let mut senders = Vec::new();
        for n in 0..10 {
            let (handle, rx) = connect(&manager, &format!("sender-{n}")).await;
            senders.push((handle, rx));
        }

        let tasks: Vec<_> = senders
            .iter()
            .map(|(handle, _)| {
                let manager = Arc::clone(&manager);
                let handle = handle.clone();
                tokio::spawn(async move {
                    for i in 0..5 {
                        manager
                            .handle_inbound(
                                &handle,
                                Inbound::Direct(DirectMessage {
                                    recipient_identity: "listener".to_string(),
                                    content: json!(i),
                                }),
                            )
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(drain(&mut listener_rx).len(), 50);

        worker.shutdown().await;
        assert_eq!(store.saved_ids().len(), 50);
    }
}
