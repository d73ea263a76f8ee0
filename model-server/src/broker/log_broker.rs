//! Broker adapter for partitioned log backends.
//!
//! Consumption is a continuous stream: every record the cluster delivers is
//! handed to the handler, with no explicit acknowledgment. Offsets are
//! committed by the backend's own configuration.

use async_trait::async_trait;
use serde_json::Value;
use stream_serve_common::message;

use super::{Broker, MessageHandler, ProvisionReport};
use crate::error::{Error, Result};

/// Administrative and client factory side of a log backend.
#[async_trait]
pub trait LogCluster: Send + Sync {
    /// Backend name (e.g., "kafka").
    fn name(&self) -> &'static str;

    /// Create single-partition, single-replica topics.
    async fn create_topics(&self, topics: &[String]) -> Result<ProvisionReport>;

    async fn delete_topics(&self, topics: &[String]) -> Result<ProvisionReport>;

    /// Open a producer able to publish to `topic`.
    async fn producer(&self, topic: &str) -> Result<Box<dyn LogProducer>>;

    /// Open a consumer subscribed to `topic`.
    async fn consumer(&self, topic: &str) -> Result<Box<dyn LogConsumer>>;
}

/// Producer handle for a log backend.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Append a record and wait for the backend to confirm it.
    async fn send_and_wait(&self, topic: &str, payload: &[u8]) -> Result<()>;
}

/// Consumer handle for a log backend.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Wait for the next record and return its payload.
    async fn recv(&self) -> Result<Vec<u8>>;
}

/// [`Broker`] over any [`LogCluster`].
pub struct LogBroker<C> {
    cluster: C,
    producer: Option<Box<dyn LogProducer>>,
    consumer: Option<Box<dyn LogConsumer>>,
}

impl<C: LogCluster> LogBroker<C> {
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            producer: None,
            consumer: None,
        }
    }
}

#[async_trait]
impl<C: LogCluster> Broker for LogBroker<C> {
    fn backend(&self) -> &'static str {
        self.cluster.name()
    }

    async fn create(&self, topics: &[String]) -> Result<ProvisionReport> {
        self.cluster.create_topics(topics).await
    }

    async fn delete(&self, topics: &[String]) -> Result<ProvisionReport> {
        self.cluster.delete_topics(topics).await
    }

    async fn start_producer(&mut self, topic: &str) -> Result<()> {
        let producer = self.cluster.producer(topic).await?;
        self.producer = Some(producer);
        tracing::debug!(backend = self.cluster.name(), topic, "Producer started");
        Ok(())
    }

    async fn start_consumer(&mut self, topic: &str) -> Result<()> {
        let consumer = self.cluster.consumer(topic).await?;
        self.consumer = Some(consumer);
        tracing::debug!(backend = self.cluster.name(), topic, "Consumer started");
        Ok(())
    }

    async fn push(&self, message: &Value, topic: &str) -> Result<()> {
        let producer = self
            .producer
            .as_ref()
            .ok_or(Error::HandleNotReady("producer"))?;
        let payload = message::encode(message).map_err(Error::Encode)?;
        producer.send_and_wait(topic, &payload).await
    }

    async fn pull(&self, handler: &mut dyn MessageHandler) -> Result<()> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or(Error::HandleNotReady("consumer"))?;

        loop {
            let payload = consumer.recv().await?;
            handler.handle(payload).await?;
        }
    }

    async fn stop(&mut self) {
        if self.consumer.take().is_some() {
            tracing::debug!(backend = self.cluster.name(), "Consumer stopped");
        }
        if self.producer.take().is_some() {
            tracing::debug!(backend = self.cluster.name(), "Producer stopped");
        }
    }

    fn producer_ready(&self) -> bool {
        self.producer.is_some()
    }

    fn consumer_ready(&self) -> bool {
        self.consumer.is_some()
    }
}
