//! Shared helpers for model-server integration tests.

#![allow(dead_code)]

pub mod fake_pubsub;

use std::time::Duration;

use model_server::{handler_fn, Broker};
use tokio::sync::mpsc;

/// Pull from `broker` until `count` payloads have arrived, then cancel the pull.
pub async fn collect(broker: &dyn Broker, count: usize) -> Vec<Vec<u8>> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut handler = handler_fn(move |payload| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
            Ok(())
        }
    });

    let mut received = Vec::with_capacity(count);
    let pull = broker.pull(&mut handler);
    tokio::pin!(pull);

    let deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(deadline);

    while received.len() < count {
        tokio::select! {
            result = &mut pull => panic!("pull returned before cancellation: {:?}", result),
            Some(payload) = rx.recv() => received.push(payload),
            _ = &mut deadline => panic!("timed out with {} of {} messages", received.len(), count),
        }
    }
    received
}

/// Decode collected payloads as JSON.
pub fn decode_all(payloads: &[Vec<u8>]) -> Vec<serde_json::Value> {
    payloads
        .iter()
        .map(|payload| serde_json::from_slice(payload).expect("payload is JSON"))
        .collect()
}
