//! Serving pipeline binding one predictor to one broker.

use async_trait::async_trait;
use stream_serve_common::{message, topics_for, ModelIdentity};

use crate::broker::{Broker, MessageHandler};
use crate::error::{Error, Result};
use crate::predictor::Predictor;

/// Lifecycle state of a [`ModelServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed; no broker handles yet.
    Created,
    /// Consumer and producer handles acquired.
    Started,
    /// Pulling inputs and publishing predictions.
    Processing,
    /// Handles released. Terminal.
    Stopped,
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerState::Created => write!(f, "created"),
            ServerState::Started => write!(f, "started"),
            ServerState::Processing => write!(f, "processing"),
            ServerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Consumes a model's input topic and publishes its predictions.
pub struct ModelServer {
    predictor: Box<dyn Predictor>,
    broker: Box<dyn Broker>,
    identity: ModelIdentity,
    input_topic: String,
    output_topic: String,
    state: ServerState,
}

impl ModelServer {
    pub fn new(predictor: Box<dyn Predictor>, broker: Box<dyn Broker>) -> Self {
        let identity = predictor.identity();
        let (input_topic, output_topic) = topics_for(&identity);

        tracing::info!("Initialized model server for {}", identity);
        tracing::info!("{}: consuming data from topic {}", identity.name, input_topic);
        tracing::info!("{}: producing predictions to topic {}", identity.name, output_topic);

        Self {
            predictor,
            broker,
            identity,
            input_topic,
            output_topic,
            state: ServerState::Created,
        }
    }

    pub fn identity(&self) -> &ModelIdentity {
        &self.identity
    }

    pub fn state(&self) -> ServerState {
        self.state
    }

    pub fn input_topic(&self) -> &str {
        &self.input_topic
    }

    pub fn output_topic(&self) -> &str {
        &self.output_topic
    }

    /// Whether any broker handle is still held.
    pub fn has_open_handles(&self) -> bool {
        self.broker.producer_ready() || self.broker.consumer_ready()
    }

    fn invalid_state(&self, action: &'static str) -> Error {
        Error::InvalidState {
            model: self.identity.to_string(),
            action,
            state: self.state,
        }
    }

    /// Acquire the consumer on the input topic, then the producer on the output topic.
    pub async fn start(&mut self) -> Result<()> {
        if self.state != ServerState::Created {
            return Err(self.invalid_state("start"));
        }

        tracing::info!(
            "{}: starting producer and consumer on {}",
            self.identity.name,
            self.broker.backend()
        );
        self.broker.start_consumer(&self.input_topic).await?;
        self.broker.start_producer(&self.output_topic).await?;

        self.state = ServerState::Started;
        Ok(())
    }

    /// Predict on every input message until cancelled or a message fails.
    ///
    /// Messages are handled one at a time: each prediction is published before
    /// the next input is pulled.
    pub async fn process(&mut self) -> Result<()> {
        if self.state != ServerState::Started {
            return Err(self.invalid_state("process"));
        }
        self.state = ServerState::Processing;

        let mut handler = PredictAndPush {
            predictor: self.predictor.as_ref(),
            broker: self.broker.as_ref(),
            model: &self.identity,
            topic: &self.output_topic,
        };
        self.broker.pull(&mut handler).await
    }

    /// Release broker handles. Safe from any state, including repeatedly.
    pub async fn stop(&mut self) {
        tracing::info!("{}: stopping stream broker", self.identity.name);
        self.broker.stop().await;
        self.state = ServerState::Stopped;
    }
}

struct PredictAndPush<'a> {
    predictor: &'a dyn Predictor,
    broker: &'a dyn Broker,
    model: &'a ModelIdentity,
    topic: &'a str,
}

#[async_trait]
impl<'a> MessageHandler for PredictAndPush<'a> {
    async fn handle(&mut self, payload: Vec<u8>) -> Result<()> {
        let input = message::decode(&payload).map_err(Error::Decode)?;
        let prediction = self
            .predictor
            .predict(&input)
            .map_err(|e| Error::Prediction {
                model: self.model.to_string(),
                message: e.to_string(),
            })?;
        self.broker.push(&prediction, self.topic).await
    }
}
