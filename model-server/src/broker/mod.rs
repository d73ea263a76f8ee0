//! Stream broker abstraction layer.
//!
//! This module defines the `Broker` trait that hides different pub/sub
//! backends (Kafka, Google Cloud Pub/Sub) behind a common interface. The
//! serving pipeline only ever holds a `Box<dyn Broker>`.

mod auth;
mod kafka;
mod log_broker;
mod pubsub;

pub use auth::{ServiceAccountKey, TokenSource};
pub use kafka::KafkaCluster;
pub use log_broker::{LogBroker, LogCluster, LogConsumer, LogProducer};
pub use pubsub::PubSubBroker;

use std::future::Future;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{BrokerKind, Config};
use crate::error::Result;

/// Outcome of a topic create/delete call.
///
/// Conflicts (a topic that already exists on create, or never existed on
/// delete) are not errors; they are collected here and logged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionReport {
    /// Topics that were created or deleted.
    pub applied: Vec<String>,
    /// Topics that were left untouched because of a conflict.
    pub conflicts: Vec<String>,
}

impl ProvisionReport {
    pub(crate) fn applied(&mut self, topic: impl Into<String>) {
        self.applied.push(topic.into());
    }

    pub(crate) fn conflict(&mut self, topic: impl Into<String>, reason: &str) {
        let topic = topic.into();
        tracing::warn!(topic = %topic, "{}", reason);
        self.conflicts.push(topic);
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Async callback invoked once per delivered message.
#[async_trait]
pub trait MessageHandler: Send {
    async fn handle(&mut self, payload: Vec<u8>) -> Result<()>;
}

/// A [`MessageHandler`] backed by an async closure. See [`handler_fn`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap an async closure as a [`MessageHandler`].
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: FnMut(Vec<u8>) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    FnHandler { f }
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: FnMut(Vec<u8>) -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send,
{
    async fn handle(&mut self, payload: Vec<u8>) -> Result<()> {
        (self.f)(payload).await
    }
}

/// Primary trait for stream brokers.
///
/// Each instance owns at most one producer and one consumer handle. Handles
/// are acquired with `start_producer`/`start_consumer` and released by
/// `stop`; `push` and `pull` fail with `HandleNotReady` without them.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Backend name used in logs (e.g., "kafka", "pubsub").
    fn backend(&self) -> &'static str;

    /// Create topics so they can receive and emit messages.
    async fn create(&self, topics: &[String]) -> Result<ProvisionReport>;

    /// Delete topics.
    async fn delete(&self, topics: &[String]) -> Result<ProvisionReport>;

    /// Acquire a producer handle for publishing to `topic`.
    async fn start_producer(&mut self, topic: &str) -> Result<()>;

    /// Acquire a consumer handle bound to `topic`.
    async fn start_consumer(&mut self, topic: &str) -> Result<()>;

    /// Publish a message, returning once the backend has accepted it.
    async fn push(&self, message: &Value, topic: &str) -> Result<()>;

    /// Deliver every consumed payload to `handler`, in delivery order.
    ///
    /// Runs until the returned future is dropped, or until the handler or the
    /// backend fails.
    async fn pull(&self, handler: &mut dyn MessageHandler) -> Result<()>;

    /// Release all open handles. Safe to call repeatedly.
    async fn stop(&mut self);

    fn producer_ready(&self) -> bool;

    fn consumer_ready(&self) -> bool;
}

/// Build the broker selected in the configuration.
///
/// Each call returns a fresh instance with no handles, so every serving
/// pipeline gets its own.
pub fn build(config: &Config) -> Result<Box<dyn Broker>> {
    match config.options.stream_broker {
        BrokerKind::Kafka => {
            let cluster = KafkaCluster::new(config.kafka()?.clone());
            Ok(Box::new(LogBroker::new(cluster)))
        }
        BrokerKind::PubSub => Ok(Box::new(PubSubBroker::new(config.pubsub()?.clone())?)),
    }
}
