// NATS JetStream binding for the moderation queue.
//
// Topology (declared on every connect, idempotent):
// - stream   MODERATION, subjects [moderation.jobs], interest retention, file storage
// - consumer moderation-worker, durable pull consumer, explicit ack
//
// Every worker binds the same durable consumer, so each message is handed
// to exactly one of them. Ack = `+ACK`, nack with requeue = `-NAK`,
// nack without requeue = `+TERM`.

use crate::core::moderation::{Delivery, QueueError, QueueMessage, QueueTransport};
use async_nats::jetstream::{
    self,
    consumer::{pull, AckPolicy, PullConsumer},
    stream, AckKind,
};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct NatsQueueConfig {
    pub url: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub stream: String,
    pub subject: String,
    pub consumer: String,
    /// Redelivery timeout for messages that are neither acked nor nacked.
    pub ack_wait: Duration,
}

impl Default for NatsQueueConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            user: None,
            password: None,
            stream: "MODERATION".to_string(),
            subject: "moderation.jobs".to_string(),
            consumer: "moderation-worker".to_string(),
            ack_wait: Duration::from_secs(120),
        }
    }
}

impl NatsQueueConfig {
    fn stream_config(&self) -> stream::Config {
        stream::Config {
            name: self.stream.clone(),
            subjects: vec![self.subject.clone()],
            retention: stream::RetentionPolicy::Interest,
            storage: stream::StorageType::File,
            ..Default::default()
        }
    }

    fn consumer_config(&self) -> pull::Config {
        pull::Config {
            durable_name: Some(self.consumer.clone()),
            ack_policy: AckPolicy::Explicit,
            ack_wait: self.ack_wait,
            filter_subject: self.subject.clone(),
            ..Default::default()
        }
    }

    fn connect_options(&self) -> async_nats::ConnectOptions {
        let options = async_nats::ConnectOptions::new().name("dance-moderation");
        match (&self.user, &self.password) {
            (Some(user), Some(password)) => {
                options.user_and_password(user.clone(), password.clone())
            }
            _ => options,
        }
    }
}

#[derive(Clone)]
struct Connection {
    jetstream: jetstream::Context,
    consumer: PullConsumer,
}

pub struct NatsQueue {
    config: NatsQueueConfig,
    connection: Mutex<Option<Connection>>,
    in_flight: DashMap<u64, jetstream::Message>,
    next_tag: AtomicU64,
}

fn broker_err(e: impl std::fmt::Display) -> QueueError {
    QueueError::Broker(e.to_string())
}

fn ack_kind(requeue: bool) -> AckKind {
    if requeue {
        AckKind::Nak(None)
    } else {
        AckKind::Term
    }
}

impl NatsQueue {
    /// Does not connect; the first call to `ensure_connected` (or any
    /// queue operation) does.
    pub fn new(config: NatsQueueConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            in_flight: DashMap::new(),
            next_tag: AtomicU64::new(1),
        }
    }

    async fn connect(&self) -> Result<Connection, QueueError> {
        let client = self
            .config
            .connect_options()
            .connect(self.config.url.as_str())
            .await
            .map_err(broker_err)?;
        let jetstream = jetstream::new(client);

        let stream = jetstream
            .get_or_create_stream(self.config.stream_config())
            .await
            .map_err(broker_err)?;
        let consumer = stream
            .get_or_create_consumer(&self.config.consumer, self.config.consumer_config())
            .await
            .map_err(broker_err)?;

        info!(
            url = %self.config.url,
            stream = %self.config.stream,
            subject = %self.config.subject,
            consumer = %self.config.consumer,
            "Connected to NATS JetStream"
        );
        Ok(Connection {
            jetstream,
            consumer,
        })
    }

    /// Current connection, connecting first if needed.
    async fn connection(&self) -> Result<Connection, QueueError> {
        let mut guard = self.connection.lock().await;
        if let Some(connection) = guard.as_ref() {
            return Ok(connection.clone());
        }
        let connection = self.connect().await?;
        *guard = Some(connection.clone());
        Ok(connection)
    }

    /// Drop the connection so the next call reconnects and redeclares topology.
    async fn disconnect(&self, reason: &QueueError) {
        let mut guard = self.connection.lock().await;
        if guard.take().is_some() {
            warn!(error = %reason, "NATS connection dropped");
        }
        // Messages fetched on the old connection will be redelivered by the server.
        self.in_flight.clear();
    }

    async fn settle(&self, delivery: &Delivery, kind: AckKind) -> Result<(), QueueError> {
        // Deliveries from a dropped connection are already back with the server.
        if self.connection.lock().await.is_none() {
            self.in_flight.remove(&delivery.tag);
            return Err(QueueError::NotConnected);
        }

        let (_, message) = self
            .in_flight
            .remove(&delivery.tag)
            .ok_or(QueueError::UnknownDelivery(delivery.tag))?;

        if let Err(e) = message.ack_with(kind).await {
            let err = broker_err(e);
            self.disconnect(&err).await;
            return Err(err);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueTransport for NatsQueue {
    async fn ensure_connected(&self) -> Result<(), QueueError> {
        self.connection().await.map(|_| ())
    }

    async fn publish(&self, message: &QueueMessage) -> Result<(), QueueError> {
        let payload = message.to_bytes()?;
        let connection = self.connection().await?;

        let result = async {
            connection
                .jetstream
                .publish(self.config.subject.clone(), payload.into())
                .await
                .map_err(broker_err)?
                // Wait for the stream to persist it.
                .await
                .map_err(broker_err)
        }
        .await;

        if let Err(e) = result {
            self.disconnect(&e).await;
            return Err(e);
        }
        Ok(())
    }

    async fn consume_one(&self, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let connection = self.connection().await?;

        let result = async {
            let mut batch = connection
                .consumer
                .batch()
                .max_messages(1)
                .expires(timeout)
                .messages()
                .await
                .map_err(broker_err)?;
            match batch.next().await {
                Some(message) => message.map(Some).map_err(broker_err),
                None => Ok(None),
            }
        }
        .await;

        let message = match result {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(None),
            Err(e) => {
                self.disconnect(&e).await;
                return Err(e);
            }
        };

        let redelivered = message
            .info()
            .map(|info| info.delivered > 1)
            .unwrap_or(false);
        let tag = self.next_tag.fetch_add(1, Ordering::SeqCst);
        let delivery = Delivery {
            tag,
            payload: message.payload.to_vec(),
            redelivered,
        };
        self.in_flight.insert(tag, message);
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        self.settle(delivery, AckKind::Ack).await
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), QueueError> {
        self.settle(delivery, ack_kind(requeue)).await
    }
}
