use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use log::*;
use presence::error::RelayErrorKind;
use presence::message::{Inbound, Outbound};
use presence::Manager;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};

/// Ping interval: the server pings every connection this often.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A connection whose pong has not arrived this long after a ping is closed.
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the writer gets to flush queued frames, a close frame included,
/// once the connection is done.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Run one relay connection until its transport goes away.
///
/// The socket is split into a writer task, fed by the connection's outbound
/// channel and a control channel for pings and close frames, and the reader
/// loop below, which hands each inbound event to the relay in arrival order.
pub(crate) async fn run_connection(socket: WebSocket, relay: Arc<Manager>) {
    let (ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
    let (control_tx, control_rx) = mpsc::unbounded_channel::<Message>();

    let handle = relay.open_connection(outbound_tx).await;
    let connection_id = handle.id().clone();

    let writer_handle = tokio::spawn(writer_task(ws_sender, outbound_rx, control_rx));

    let pongs = Arc::new(Notify::new());
    let mut ping_handle = tokio::spawn(keep_alive(control_tx.clone(), Arc::clone(&pongs)));

    loop {
        let frame = tokio::select! {
            frame = ws_receiver.next() => frame,
            _ = &mut ping_handle => {
                info!("Connection {connection_id} stopped answering pings");
                break;
            }
        };

        match frame {
            Some(Ok(Message::Text(text))) => {
                let event = match Inbound::parse(text.as_str()) {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Ignoring malformed frame from connection {connection_id}: {e}");
                        continue;
                    }
                };

                match relay.handle_inbound(&handle, event).await {
                    Ok(outcome) => trace!("Connection {connection_id}: {outcome:?}"),
                    Err(e) if e.error_kind == RelayErrorKind::ConnectionClosed => {
                        debug!("Connection {connection_id} was closed by the relay");
                        break;
                    }
                    Err(e) => warn!("Failed to route frame from connection {connection_id}: {e}"),
                }
            }
            Some(Ok(Message::Binary(_))) => {
                debug!("Ignoring binary frame from connection {connection_id}");
            }
            // Only a ping in flight is waiting; unprompted pongs are dropped
            Some(Ok(Message::Pong(_))) => pongs.notify_waiters(),
            // The protocol layer answers pings on its own
            Some(Ok(Message::Ping(_))) => {}
            Some(Ok(Message::Close(frame))) => {
                info!("Connection {connection_id} initiated close: {frame:?}");
                break;
            }
            Some(Err(e)) => {
                warn!("WebSocket receive error on connection {connection_id}: {e}");
                break;
            }
            None => {
                info!("WebSocket stream for connection {connection_id} ended");
                break;
            }
        }
    }

    relay.close_connection(&handle).await;

    ping_handle.abort();
    // The writer stops once every sender for its channels is gone
    drop(control_tx);
    drop(handle);
    finish_writer(writer_handle).await;
}

/// Wait up to [`WRITER_GRACE`] for the writer to drain, then abort it.
async fn finish_writer(mut writer: JoinHandle<()>) {
    if timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("Writer did not finish within {WRITER_GRACE:?}, aborting it");
        writer.abort();
        let _ = writer.await;
    }
}

/// Forwards control frames and serialized outbound events to the socket until
/// either side goes away or a close frame has been sent.
async fn writer_task<S>(
    mut ws_sender: S,
    mut outbound: UnboundedReceiver<Outbound>,
    mut control: UnboundedReceiver<Message>,
) where
    S: Sink<Message> + Unpin,
{
    loop {
        let message = tokio::select! {
            // Control frames first so a pending close is not starved
            biased;
            Some(message) = control.recv() => message,
            Some(event) = outbound.recv() => match event.to_frame() {
                Ok(frame) => Message::Text(frame.into()),
                Err(e) => {
                    warn!("Dropping outbound event that failed to serialize: {e}");
                    continue;
                }
            },
            else => break,
        };

        let closing = matches!(message, Message::Close(_));
        if ws_sender.send(message).await.is_err() {
            // Socket is broken; dropping `outbound` lets the relay notice
            break;
        }
        if closing {
            break;
        }
    }
}

/// Pings through `control` every [`PING_INTERVAL`] and returns once a pong
/// fails to arrive within [`PONG_TIMEOUT`] or the writer is gone.
///
/// Only a pong notified after the ping went out counts.
async fn keep_alive(control: UnboundedSender<Message>, pongs: Arc<Notify>) {
    let mut ping_timer = interval(PING_INTERVAL);
    // Skip the first immediate tick
    ping_timer.tick().await;

    loop {
        ping_timer.tick().await;

        let pong = pongs.notified();
        if control.send(Message::Ping(Default::default())).is_err() {
            break;
        }

        match timeout(PONG_TIMEOUT, pong).await {
            Ok(()) => {}
            Err(_elapsed) => {
                warn!("Pong timeout, closing connection");
                let _ = control.send(Message::Close(Some(CloseFrame {
                    code: close_code::AWAY,
                    reason: "Pong timeout".into(),
                })));
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc as futures_mpsc;
    use serde_json::{json, Value};

    fn text_of(message: &Message) -> Value {
        match message {
            Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
            other => panic!("expected a text frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn writer_serializes_outbound_events_as_text_frames() {
        let (sink, mut socket) = futures_mpsc::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_task(sink, outbound_rx, control_rx));

        outbound_tx.send(Outbound::Broadcast(json!("hi"))).unwrap();
        outbound_tx.send(Outbound::Direct(json!({"text": "yo"}))).unwrap();

        assert_eq!(
            text_of(&socket.next().await.unwrap()),
            json!({"event": "message", "data": "hi"})
        );
        assert_eq!(
            text_of(&socket.next().await.unwrap()),
            json!({"event": "receiveMessage", "data": {"text": "yo"}})
        );

        writer.abort();
    }

    #[tokio::test]
    async fn writer_stops_after_sending_a_close_frame() {
        let (sink, mut socket) = futures_mpsc::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        control_tx.send(Message::Close(None)).unwrap();
        writer_task(sink, outbound_rx, control_rx).await;

        assert_eq!(socket.next().await, Some(Message::Close(None)));
        // The outbound receiver was dropped with the writer
        assert!(outbound_tx.send(Outbound::Broadcast(json!("late"))).is_err());
    }

    #[tokio::test]
    async fn writer_stops_when_the_socket_is_gone() {
        let (sink, socket) = futures_mpsc::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        drop(socket);

        outbound_tx.send(Outbound::Broadcast(json!("hi"))).unwrap();
        writer_task(sink, outbound_rx, control_rx).await;

        assert!(outbound_tx.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_pong_closes_the_connection() {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();

        keep_alive(control_tx, Arc::new(Notify::new())).await;

        assert!(matches!(control_rx.recv().await, Some(Message::Ping(_))));
        match control_rx.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn answered_pings_keep_the_connection_alive() {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let pongs = Arc::new(Notify::new());
        let keep_alive = tokio::spawn(keep_alive(control_tx, Arc::clone(&pongs)));

        for _ in 0..3 {
            assert!(matches!(control_rx.recv().await, Some(Message::Ping(_))));
            pongs.notify_waiters();
        }

        assert!(!keep_alive.is_finished());
        keep_alive.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn pongs_sent_before_the_ping_do_not_count() {
        let (control_tx, mut control_rx) = mpsc::unbounded_channel();
        let pongs = Arc::new(Notify::new());

        // A burst of unprompted pongs arrives before the first ping
        for _ in 0..5 {
            pongs.notify_waiters();
        }
        keep_alive(control_tx, pongs).await;

        assert!(matches!(control_rx.recv().await, Some(Message::Ping(_))));
        match control_rx.recv().await {
            Some(Message::Close(Some(frame))) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected a close frame, got {other:?}"),
        }
        assert!(control_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn finishing_delivers_the_queued_close_frame() {
        let (sink, socket) = futures_mpsc::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        outbound_tx.send(Outbound::Broadcast(json!("last words"))).unwrap();
        control_tx
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "Pong timeout".into(),
            })))
            .unwrap();
        let writer = tokio::spawn(writer_task(sink, outbound_rx, control_rx));
        drop(control_tx);
        drop(outbound_tx);

        finish_writer(writer).await;

        let frames: Vec<Message> = socket.collect().await;
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            Message::Close(Some(frame)) => assert_eq!(frame.code, close_code::AWAY),
            other => panic!("expected a close frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn finishing_drains_outbound_frames_when_no_close_is_queued() {
        let (sink, socket) = futures_mpsc::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();

        outbound_tx.send(Outbound::Broadcast(json!("one"))).unwrap();
        outbound_tx.send(Outbound::Broadcast(json!("two"))).unwrap();
        let writer = tokio::spawn(writer_task(sink, outbound_rx, control_rx));
        drop(control_tx);
        drop(outbound_tx);

        finish_writer(writer).await;

        let frames: Vec<Value> = socket.map(|frame| text_of(&frame)).collect().await;
        assert_eq!(
            frames,
            vec![
                json!({"event": "message", "data": "one"}),
                json!({"event": "message", "data": "two"}),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn writer_that_cannot_finish_is_aborted_after_the_grace_period() {
        let (sink, _socket) = futures_mpsc::unbounded::<Message>();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel::<Outbound>();
        // Held open, so the writer never runs out of senders
        let (_control_tx, control_rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(writer_task(sink, outbound_rx, control_rx));

        finish_writer(writer).await;

        assert!(outbound_tx.is_closed());
    }
}
