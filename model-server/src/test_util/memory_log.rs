//! In-memory log cluster.
//!
//! Each topic is a single append-only partition. Consumers read from offset
//! zero, so records appended before a consumer starts are still delivered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::broker::{LogCluster, LogConsumer, LogProducer, ProvisionReport};
use crate::error::{Error, Result};

#[derive(Default)]
struct Partition {
    records: Mutex<Vec<Vec<u8>>>,
    appended: Notify,
}

impl Partition {
    fn append(&self, payload: Vec<u8>) {
        self.records.lock().unwrap().push(payload);
        self.appended.notify_waiters();
    }
}

#[derive(Default)]
struct Inner {
    topics: Mutex<HashMap<String, Arc<Partition>>>,
    unavailable: AtomicBool,
    open_consumers: AtomicUsize,
}

/// Shared in-memory log. Clones refer to the same cluster.
#[derive(Clone, Default)]
pub struct MemoryLog {
    inner: Arc<Inner>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent producer/consumer acquisition fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Append a raw payload, bypassing serialization.
    pub fn append(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.partition(topic).append(payload.into());
    }

    /// Snapshot of the records in a topic.
    pub fn records(&self, topic: &str) -> Vec<Vec<u8>> {
        self.partition(topic).records.lock().unwrap().clone()
    }

    pub fn has_topic(&self, topic: &str) -> bool {
        self.inner.topics.lock().unwrap().contains_key(topic)
    }

    /// Number of consumers that have not been dropped yet.
    pub fn open_consumers(&self) -> usize {
        self.inner.open_consumers.load(Ordering::SeqCst)
    }

    /// Topics are created on first use, like a broker with auto-creation enabled.
    fn partition(&self, topic: &str) -> Arc<Partition> {
        self.inner
            .topics
            .lock()
            .unwrap()
            .entry(topic.to_string())
            .or_default()
            .clone()
    }

    fn check_available(&self) -> Result<()> {
        if self.inner.unavailable.load(Ordering::SeqCst) {
            return Err(Error::BackendUnavailable(
                "memory log is unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl LogCluster for MemoryLog {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn create_topics(&self, topics: &[String]) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();
        let mut existing = self.inner.topics.lock().unwrap();
        for topic in topics {
            if existing.contains_key(topic) {
                report.conflict(topic, "Topic already exists");
            } else {
                existing.insert(topic.clone(), Arc::default());
                report.applied(topic);
            }
        }
        Ok(report)
    }

    async fn delete_topics(&self, topics: &[String]) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();
        let mut existing = self.inner.topics.lock().unwrap();
        for topic in topics {
            if existing.remove(topic).is_some() {
                report.applied(topic);
            } else {
                report.conflict(topic, "Topic has not been created yet");
            }
        }
        Ok(report)
    }

    async fn producer(&self, _topic: &str) -> Result<Box<dyn LogProducer>> {
        self.check_available()?;
        Ok(Box::new(MemoryProducer { log: self.clone() }))
    }

    async fn consumer(&self, topic: &str) -> Result<Box<dyn LogConsumer>> {
        self.check_available()?;
        self.inner.open_consumers.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConsumer {
            log: self.clone(),
            partition: self.partition(topic),
            offset: AtomicUsize::new(0),
        }))
    }
}

struct MemoryProducer {
    log: MemoryLog,
}

#[async_trait]
impl LogProducer for MemoryProducer {
    async fn send_and_wait(&self, topic: &str, payload: &[u8]) -> Result<()> {
        self.log.append(topic, payload);
        Ok(())
    }
}

struct MemoryConsumer {
    log: MemoryLog,
    partition: Arc<Partition>,
    offset: AtomicUsize,
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn recv(&self) -> Result<Vec<u8>> {
        loop {
            // Registered before the check so an append in between still wakes us.
            let appended = self.partition.appended.notified();
            {
                let records = self.partition.records.lock().unwrap();
                let offset = self.offset.load(Ordering::SeqCst);
                if let Some(record) = records.get(offset) {
                    self.offset.store(offset + 1, Ordering::SeqCst);
                    return Ok(record.clone());
                }
            }
            appended.await;
        }
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.log.inner.open_consumers.fetch_sub(1, Ordering::SeqCst);
    }
}
