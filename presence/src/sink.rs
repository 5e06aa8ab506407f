//! Write-behind persistence for routed messages.
//!
//! The router hands every routed [`Message`] to [`PersistenceSink::record`],
//! which only enqueues it. A background writer drains the bounded queue,
//! retrying transient store failures with exponential backoff. Anything that
//! cannot be stored ends up in the [`DeadLetterLog`], so no record is dropped
//! without a logged failure.

use crate::dead_letter::DeadLetterLog;
use crate::error::Error;
use crate::message::Message;
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use events::{EventPublisher, RelayEvent};
use log::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{sleep, timeout};

/// Durable destination for routed messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Store one message. Implementations must tolerate the same message
    /// being saved more than once.
    async fn save(&self, message: &Message) -> Result<(), Error>;
}

#[derive(Debug, Clone)]
pub struct SinkConfig {
    /// Messages that may wait for the writer before `record` has to wait.
    pub queue_capacity: usize,
    /// Writes in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    /// How long `record` waits for room in a full queue before giving up on
    /// the message and dead-lettering it.
    pub enqueue_timeout: Duration,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            concurrency: 8,
            retry: RetryPolicy::default(),
            enqueue_timeout: Duration::from_millis(250),
        }
    }
}

/// Producer side of the persistence pipeline. Cheap to clone.
#[derive(Clone)]
pub struct PersistenceSink {
    queue: mpsc::Sender<Message>,
    enqueue_timeout: Duration,
    dead_letters: DeadLetterLog,
    publisher: EventPublisher,
}

/// Owns the background writer. Dropping it without calling
/// [`SinkWorker::shutdown`] also stops intake, but nothing waits for the
/// queue to drain.
pub struct SinkWorker {
    shutdown: oneshot::Sender<()>,
    writer: JoinHandle<()>,
}

impl SinkWorker {
    /// Stop accepting messages, then wait until everything already queued
    /// has been stored or dead-lettered.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(());
        if let Err(e) = self.writer.await {
            error!("Persistence writer terminated abnormally: {e}");
        }
    }
}

impl PersistenceSink {
    /// Start the background writer. Must be called inside a Tokio runtime.
    pub fn spawn(
        store: Arc<dyn MessageStore>,
        config: SinkConfig,
        dead_letters: DeadLetterLog,
        publisher: EventPublisher,
    ) -> (Self, SinkWorker) {
        debug!(
            "Starting persistence writer: queue {}, concurrency {}, up to {} retries",
            config.queue_capacity,
            config.concurrency,
            config.retry.max_retries()
        );
        let (queue, intake) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown, shutdown_signal) = oneshot::channel();

        let writer = Writer {
            store,
            retry: config.retry,
            dead_letters: dead_letters.clone(),
            publisher: publisher.clone(),
        };
        let writer = tokio::spawn(writer.run(intake, shutdown_signal, config.concurrency.max(1)));

        let sink = Self {
            queue,
            enqueue_timeout: config.enqueue_timeout,
            dead_letters,
            publisher,
        };

        (sink, SinkWorker { shutdown, writer })
    }

    /// Hand a message to the writer. Returns as soon as it is queued; never
    /// reports failure to the caller.
    pub async fn record(&self, message: Message) {
        let reason = match timeout(self.enqueue_timeout, self.queue.reserve()).await {
            Ok(Ok(permit)) => {
                permit.send(message);
                return;
            }
            Ok(Err(_closed)) => "persistence queue closed",
            Err(_elapsed) => "persistence queue full",
        };

        warn!("Could not enqueue message {} for persistence: {reason}", message.id);
        dead_letter(&self.dead_letters, &self.publisher, &message, reason).await;
    }
}

async fn dead_letter(
    dead_letters: &DeadLetterLog,
    publisher: &EventPublisher,
    message: &Message,
    reason: &str,
) {
    dead_letters.write(message, reason).await;
    publisher
        .publish(RelayEvent::DeadLettered {
            message_id: message.id,
            error: reason.to_owned(),
        })
        .await;
}

#[derive(Clone)]
struct Writer {
    store: Arc<dyn MessageStore>,
    retry: RetryPolicy,
    dead_letters: DeadLetterLog,
    publisher: EventPublisher,
}

impl Writer {
    async fn run(
        self,
        mut intake: mpsc::Receiver<Message>,
        mut shutdown: oneshot::Receiver<()>,
        concurrency: usize,
    ) {
        let permits = Arc::new(Semaphore::new(concurrency));
        let mut in_flight = JoinSet::new();
        let mut closing = false;

        loop {
            tokio::select! {
                _ = &mut shutdown, if !closing => {
                    debug!("Persistence writer draining");
                    closing = true;
                    // Already-queued messages are still delivered by recv
                    intake.close();
                }
                next = intake.recv() => {
                    let Some(message) = next else { break };

                    let Ok(permit) = Arc::clone(&permits).acquire_owned().await else {
                        break;
                    };
                    let writer = self.clone();
                    in_flight.spawn(async move {
                        writer.write(message).await;
                        drop(permit);
                    });
                }
            }

            // Reap finished writes so the set does not grow unbounded
            while let Some(result) = in_flight.try_join_next() {
                if let Err(e) = result {
                    error!("Persistence write task failed: {e}");
                }
            }
        }

        while let Some(result) = in_flight.join_next().await {
            if let Err(e) = result {
                error!("Persistence write task failed: {e}");
            }
        }
        debug!("Persistence writer stopped");
    }

    async fn write(&self, message: Message) {
        let mut past_retries = 0;

        loop {
            let error = match self.store.save(&message).await {
                Ok(()) => {
                    trace!("Persisted message {}", message.id);
                    return;
                }
                Err(e) => e,
            };

            let delay = if error.is_transient() {
                self.retry.delay_for(past_retries)
            } else {
                None
            };

            let Some(delay) = delay else {
                error!(
                    "Giving up on message {} after {} attempt(s): {error}",
                    message.id,
                    past_retries + 1
                );
                dead_letter(
                    &self.dead_letters,
                    &self.publisher,
                    &message,
                    &error.to_string(),
                )
                .await;
                return;
            };

            past_retries += 1;
            warn!(
                "Persisting message {} failed (retry {past_retries} of {}), retrying in {delay:?}: {error}",
                message.id,
                self.retry.max_retries()
            );
            self.publisher
                .publish(RelayEvent::PersistenceRetry {
                    message_id: message.id,
                    attempt: past_retries,
                    error: error.to_string(),
                })
                .await;

            sleep(delay).await;
        }
    }
}
