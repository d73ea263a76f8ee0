//! Kafka log cluster backed by rdkafka.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::metadata::Metadata;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use rdkafka::Message;

use super::{LogCluster, LogConsumer, LogProducer, ProvisionReport};
use crate::config::KafkaConfig;
use crate::error::{Error, Result};

/// Kafka cluster reachable through the configured bootstrap servers.
///
/// Clients are created on demand; constructing the cluster does not connect.
pub struct KafkaCluster {
    config: KafkaConfig,
}

impl KafkaCluster {
    pub fn new(config: KafkaConfig) -> Self {
        Self { config }
    }

    fn client_config(&self) -> ClientConfig {
        let mut client = ClientConfig::new();
        client.set("bootstrap.servers", &self.config.bootstrap_servers);
        client
    }

    fn admin(&self) -> Result<AdminClient<DefaultClientContext>> {
        self.client_config()
            .create()
            .map_err(|e| Error::BackendUnavailable(format!("Kafka admin client: {}", e)))
    }

    fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.config.admin_timeout_secs)
    }

    fn admin_options(&self) -> AdminOptions {
        AdminOptions::new()
            .operation_timeout(Some(Duration::from_secs(self.config.admin_timeout_secs)))
    }
}

#[async_trait]
impl LogCluster for KafkaCluster {
    fn name(&self) -> &'static str {
        "kafka"
    }

    async fn create_topics(&self, topics: &[String]) -> Result<ProvisionReport> {
        let admin = self.admin()?;
        let new_topics: Vec<NewTopic<'_>> = topics
            .iter()
            .map(|topic| NewTopic::new(topic, 1, TopicReplication::Fixed(1)))
            .collect();

        let results = admin
            .create_topics(&new_topics, &self.admin_options())
            .await
            .map_err(admin_error)?;

        let mut report = ProvisionReport::default();
        for result in results {
            match result {
                Ok(topic) => {
                    tracing::info!(topic = %topic, "Created Kafka topic");
                    report.applied(topic);
                }
                Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    report.conflict(topic, "Topic already exists");
                }
                Err((topic, code)) => {
                    return Err(Error::Backend(format!(
                        "Failed to create topic {}: {}",
                        topic, code
                    )));
                }
            }
        }
        Ok(report)
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<ProvisionReport> {
        let admin = self.admin()?;
        let names: Vec<&str> = topics.iter().map(String::as_str).collect();

        let results = admin
            .delete_topics(&names, &self.admin_options())
            .await
            .map_err(admin_error)?;

        let mut report = ProvisionReport::default();
        for result in results {
            match result {
                Ok(topic) => {
                    tracing::info!(topic = %topic, "Deleted Kafka topic");
                    report.applied(topic);
                }
                Err((topic, RDKafkaErrorCode::UnknownTopicOrPartition)) => {
                    report.conflict(topic, "Topic has not been created yet");
                }
                Err((topic, code)) => {
                    return Err(Error::Backend(format!(
                        "Failed to delete topic {}: {}",
                        topic, code
                    )));
                }
            }
        }
        Ok(report)
    }

    async fn producer(&self, topic: &str) -> Result<Box<dyn LogProducer>> {
        let producer: FutureProducer = self
            .client_config()
            .set("compression.type", &self.config.compression_type)
            .create()
            .map_err(|e| Error::BackendUnavailable(format!("Kafka producer: {}", e)))?;

        let probe = producer.clone();
        let metadata_topic = topic.to_string();
        ensure_reachable("producer", self.metadata_timeout(), move |timeout| {
            probe.client().fetch_metadata(Some(metadata_topic.as_str()), timeout)
        })
        .await?;

        Ok(Box::new(KafkaProducer {
            producer,
            queue_timeout: Duration::from_secs(self.config.send_timeout_secs),
        }))
    }

    async fn consumer(&self, topic: &str) -> Result<Box<dyn LogConsumer>> {
        let consumer: Arc<StreamConsumer> = self
            .client_config()
            .set("group.id", &self.config.group_id)
            .set("auto.offset.reset", &self.config.auto_offset_reset)
            .set("enable.auto.commit", "true")
            .create::<StreamConsumer>()
            .map(Arc::new)
            .map_err(|e| Error::BackendUnavailable(format!("Kafka consumer: {}", e)))?;

        let probe = Arc::clone(&consumer);
        let metadata_topic = topic.to_string();
        ensure_reachable("consumer", self.metadata_timeout(), move |timeout| {
            probe.fetch_metadata(Some(metadata_topic.as_str()), timeout)
        })
        .await?;

        consumer
            .subscribe(&[topic])
            .map_err(|e| Error::BackendUnavailable(format!("Failed to subscribe to {}: {}", topic, e)))?;

        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

/// Fail unless the brokers answer a metadata request within `timeout`.
///
/// Clients connect lazily, so this is what turns a dead cluster into a startup
/// error. The request blocks, hence the blocking pool.
async fn ensure_reachable<F>(client: &'static str, timeout: Duration, fetch: F) -> Result<()>
where
    F: FnOnce(Timeout) -> KafkaResult<Metadata> + Send + 'static,
{
    tokio::task::spawn_blocking(move || fetch(Timeout::After(timeout)))
        .await
        .map_err(|e| Error::Backend(format!("Kafka {} metadata task failed: {}", client, e)))?
        .map(|_| ())
        .map_err(|e| {
            Error::BackendUnavailable(format!("Kafka {} cannot reach brokers: {}", client, e))
        })
}

fn admin_error(e: KafkaError) -> Error {
    Error::BackendUnavailable(format!("Kafka admin request failed: {}", e))
}

struct KafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

#[async_trait]
impl LogProducer for KafkaProducer {
    async fn send_and_wait(&self, topic: &str, payload: &[u8]) -> Result<()> {
        let record = FutureRecord::<(), [u8]>::to(topic).payload(payload);
        let (partition, offset) = self
            .producer
            .send(record, Timeout::After(self.queue_timeout))
            .await
            .map_err(|(e, _)| Error::Backend(format!("Failed to send to {}: {}", topic, e)))?;

        tracing::trace!(topic, partition, offset, "Record delivered");
        Ok(())
    }
}

struct KafkaConsumer {
    consumer: Arc<StreamConsumer>,
}

#[async_trait]
impl LogConsumer for KafkaConsumer {
    async fn recv(&self) -> Result<Vec<u8>> {
        let message = self
            .consumer
            .recv()
            .await
            .map_err(|e| Error::Backend(format!("Kafka receive failed: {}", e)))?;

        record_payload(message.payload(), message.topic())
    }
}

fn record_payload(payload: Option<&[u8]>, topic: &str) -> Result<Vec<u8>> {
    payload
        .map(<[u8]>::to_vec)
        .ok_or_else(|| Error::Backend(format!("Record on {} has no payload", topic)))
}
