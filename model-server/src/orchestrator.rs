//! Orchestrator driving every configured model server through its lifecycle.

use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};

use crate::broker;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::predictor::PredictorRegistry;
use crate::server::ModelServer;

/// Runs a set of model servers on the current task.
pub struct Orchestrator {
    servers: Vec<ModelServer>,
}

impl Orchestrator {
    pub fn new(servers: Vec<ModelServer>) -> Self {
        Self { servers }
    }

    /// One server per configured model, each with its own broker instance.
    pub fn from_config(config: &Config, registry: &PredictorRegistry) -> Result<Self> {
        let servers = config
            .options
            .models
            .iter()
            .map(|model| -> Result<ModelServer> {
                let predictor = registry.load(model)?;
                let broker = broker::build(config)?;
                Ok(ModelServer::new(predictor, broker))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(servers))
    }

    pub fn servers(&self) -> &[ModelServer] {
        &self.servers
    }

    /// Start every server, process until `shutdown` resolves, then stop every server.
    ///
    /// Processing of all servers is interleaved; a server whose processing
    /// fails is logged and stopped, and the others keep running. Returns the first startup
    /// or processing error, after every server has been stopped.
    pub async fn run<S>(&mut self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        tracing::info!("Starting all model servers");
        if let Err(e) = self.start_all().await {
            tracing::error!("Startup failed, not entering processing: {}", e);
            self.stop_all().await;
            return Err(e);
        }

        tracing::info!("Ready to serve predictions...");
        let failure = self.process_all(shutdown).await;

        self.stop_all().await;
        tracing::info!("Shutdown all model servers successfully");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn start_all(&mut self) -> Result<()> {
        for server in &mut self.servers {
            server.start().await?;
        }
        Ok(())
    }

    /// Drive all processing phases until shutdown or until every one has ended.
    async fn process_all<S>(&mut self, shutdown: S) -> Option<Error>
    where
        S: Future<Output = ()>,
    {
        let mut processing: FuturesUnordered<_> = self
            .servers
            .iter_mut()
            .map(|server| async move {
                let model = server.identity().to_string();
                let result = server.process().await;
                // A pipeline that ended releases its handles right away, while
                // the others keep running.
                server.stop().await;
                (model, result)
            })
            .collect();

        tokio::pin!(shutdown);
        let mut first_failure = None;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Model serving interrupted");
                    break;
                }
                next = processing.next() => match next {
                    Some((model, Ok(()))) => {
                        tracing::info!(model = %model, "Processing finished");
                    }
                    Some((model, Err(e))) => {
                        tracing::error!(model = %model, "Processing failed: {}", e);
                        first_failure.get_or_insert(e);
                    }
                    None => break,
                },
            }
        }

        // Dropping the remaining futures cancels their pulls.
        first_failure
    }

    async fn stop_all(&mut self) {
        for server in &mut self.servers {
            server.stop().await;
        }
    }
}
