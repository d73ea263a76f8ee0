//! Google Cloud Pub/Sub broker over the REST API.
//!
//! Every topic gets a companion subscription (`<topic><suffix>`). Messages are
//! pulled one at a time and acknowledged only after the handler returns, so a
//! failure mid-processing leaves the message to be redelivered.

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use stream_serve_common::message;

use super::auth::{ServiceAccountKey, TokenSource};
use super::{Broker, MessageHandler, ProvisionReport};
use crate::config::PubSubConfig;
use crate::error::{Error, Result};

/// Maximum messages requested per pull.
const MAX_MESSAGES: u32 = 1;

// ============================================================================
// Pub/Sub API types
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PublishRequest {
    messages: Vec<OutgoingMessage>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    data: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PublishResponse {
    #[serde(default)]
    message_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReceivedMessage {
    ack_id: String,
    message: IncomingMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomingMessage {
    #[serde(default)]
    data: String,
    #[serde(default)]
    message_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

// ============================================================================
// Broker implementation
// ============================================================================

/// Publisher handle. Publishing is project-scoped, so one handle serves any topic.
struct Publisher;

/// Subscriber handle bound to one subscription.
struct Subscriber {
    subscription_path: String,
}

/// Ack-based [`Broker`] for Google Cloud Pub/Sub.
pub struct PubSubBroker {
    config: PubSubConfig,
    http_client: Client,
    base_url: String,
    auth: Option<TokenSource>,
    publisher: Option<Publisher>,
    subscriber: Option<Subscriber>,
}

impl PubSubBroker {
    /// Create a broker. Credentials are read from `credentials_path` when set;
    /// without it requests are sent unauthenticated (emulator mode).
    pub fn new(config: PubSubConfig) -> Result<Self> {
        let http_client = Client::new();
        let auth = match &config.credentials_path {
            Some(path) => Some(TokenSource::new(
                ServiceAccountKey::from_file(path)?,
                http_client.clone(),
            )?),
            None => None,
        };

        Ok(Self {
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            config,
            http_client,
            auth,
            publisher: None,
            subscriber: None,
        })
    }

    fn topic_path(&self, topic: &str) -> String {
        format!("projects/{}/topics/{}", self.config.project, topic)
    }

    fn subscription_path(&self, topic: &str) -> String {
        format!(
            "projects/{}/subscriptions/{}{}",
            self.config.project, topic, self.config.subscription_suffix
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1/{}", self.base_url, path)
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        match &self.auth {
            Some(auth) => Ok(request.bearer_auth(auth.token().await?)),
            None => Ok(request),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        self.authorized(request)
            .await?
            .send()
            .await
            .map_err(Error::transport)
    }

    /// Create a topic or subscription resource. Returns false if it already existed.
    async fn put_resource(&self, path: &str, body: Value) -> Result<bool> {
        let response = self.send(self.http_client.put(self.url(path)).json(&body)).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::CONFLICT => Ok(false),
            _ => Err(api_error(path, response).await),
        }
    }

    /// Delete a topic or subscription resource. Returns false if it did not exist.
    async fn delete_resource(&self, path: &str) -> Result<bool> {
        let response = self.send(self.http_client.delete(self.url(path))).await?;
        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(api_error(path, response).await),
        }
    }

    async fn pull_batch(&self, subscription_path: &str) -> Result<Vec<ReceivedMessage>> {
        let url = self.url(&format!("{}:pull", subscription_path));
        let request = self.http_client.post(url).json(&PullRequest {
            max_messages: MAX_MESSAGES,
        });

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(api_error(subscription_path, response).await);
        }

        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Invalid pull response: {}", e)))?;
        Ok(body.received_messages)
    }

    async fn acknowledge(&self, subscription_path: &str, ack_ids: &[String]) -> Result<()> {
        let url = self.url(&format!("{}:acknowledge", subscription_path));
        let request = self
            .http_client
            .post(url)
            .json(&AcknowledgeRequest { ack_ids });

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(api_error(subscription_path, response).await);
        }
        Ok(())
    }
}

async fn api_error(path: &str, response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Error::BackendUnavailable(format!("{} rejected credentials ({}): {}", path, status, body))
    } else {
        Error::Backend(format!("{} returned {}: {}", path, status, body))
    }
}

#[async_trait]
impl Broker for PubSubBroker {
    fn backend(&self) -> &'static str {
        "pubsub"
    }

    async fn create(&self, topics: &[String]) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();
        for topic in topics {
            let topic_path = self.topic_path(topic);
            let subscription_path = self.subscription_path(topic);

            let topic_created = self.put_resource(&topic_path, json!({})).await?;
            let subscription_created = self
                .put_resource(&subscription_path, json!({ "topic": topic_path }))
                .await?;

            if topic_created && subscription_created {
                tracing::info!(topic = %topic, "Created Pub/Sub topic and subscription");
                report.applied(topic);
            } else {
                report.conflict(topic, "Topic or subscription already exists");
            }
        }
        Ok(report)
    }

    async fn delete(&self, topics: &[String]) -> Result<ProvisionReport> {
        let mut report = ProvisionReport::default();
        for topic in topics {
            // The subscription goes first; it references the topic.
            let subscription_deleted = self
                .delete_resource(&self.subscription_path(topic))
                .await?;
            let topic_deleted = self.delete_resource(&self.topic_path(topic)).await?;

            if subscription_deleted && topic_deleted {
                tracing::info!(topic = %topic, "Deleted Pub/Sub topic and subscription");
                report.applied(topic);
            } else {
                report.conflict(topic, "Topic or subscription has not been created yet");
            }
        }
        Ok(report)
    }

    async fn start_producer(&mut self, topic: &str) -> Result<()> {
        // Acquiring a token up front surfaces bad credentials at startup.
        if let Some(auth) = &self.auth {
            auth.token().await?;
        }
        self.publisher = Some(Publisher);
        tracing::debug!(topic, "Publisher started");
        Ok(())
    }

    async fn start_consumer(&mut self, topic: &str) -> Result<()> {
        let subscription_path = self.subscription_path(topic);
        let response = self
            .send(self.http_client.get(self.url(&subscription_path)))
            .await?;

        match response.status() {
            status if status.is_success() => {}
            StatusCode::NOT_FOUND => {
                return Err(Error::BackendUnavailable(format!(
                    "Subscription {} does not exist",
                    subscription_path
                )));
            }
            _ => return Err(api_error(&subscription_path, response).await),
        }

        tracing::debug!(subscription = %subscription_path, "Subscriber started");
        self.subscriber = Some(Subscriber { subscription_path });
        Ok(())
    }

    async fn push(&self, message: &Value, topic: &str) -> Result<()> {
        if self.publisher.is_none() {
            return Err(Error::HandleNotReady("publisher"));
        }

        let payload = message::encode(message).map_err(Error::Encode)?;
        let topic_path = self.topic_path(topic);
        let request = self
            .http_client
            .post(self.url(&format!("{}:publish", topic_path)))
            .json(&PublishRequest {
                messages: vec![OutgoingMessage {
                    data: BASE64.encode(payload),
                }],
            });

        let response = self.send(request).await?;
        if !response.status().is_success() {
            return Err(api_error(&topic_path, response).await);
        }

        let published: PublishResponse = response
            .json()
            .await
            .map_err(|e| Error::Backend(format!("Invalid publish response: {}", e)))?;
        tracing::trace!(topic, message_ids = ?published.message_ids, "Message published");
        Ok(())
    }

    async fn pull(&self, handler: &mut dyn MessageHandler) -> Result<()> {
        let subscriber = self
            .subscriber
            .as_ref()
            .ok_or(Error::HandleNotReady("subscriber"))?;
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);

        loop {
            let received = self.pull_batch(&subscriber.subscription_path).await?;
            if received.is_empty() {
                tokio::time::sleep(poll_interval).await;
                continue;
            }

            let mut ack_ids = Vec::with_capacity(received.len());
            for msg in received {
                let payload = BASE64.decode(msg.message.data.as_bytes()).map_err(|e| {
                    Error::Backend(format!(
                        "Message {:?} has invalid base64 data: {}",
                        msg.message.message_id, e
                    ))
                })?;
                handler.handle(payload).await?;
                ack_ids.push(msg.ack_id);
            }

            self.acknowledge(&subscriber.subscription_path, &ack_ids)
                .await?;
        }
    }

    async fn stop(&mut self) {
        if let Some(subscriber) = self.subscriber.take() {
            tracing::debug!(subscription = %subscriber.subscription_path, "Subscriber stopped");
        }
        if self.publisher.take().is_some() {
            tracing::debug!("Publisher stopped");
        }
    }

    fn producer_ready(&self) -> bool {
        self.publisher.is_some()
    }

    fn consumer_ready(&self) -> bool {
        self.subscriber.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::handler_fn;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(endpoint: &str) -> PubSubConfig {
        PubSubConfig {
            project: "demo".to_string(),
            credentials_path: None,
            endpoint: endpoint.to_string(),
            subscription_suffix: ".sub".to_string(),
            poll_interval_ms: 10,
        }
    }

    #[test]
    fn test_resource_paths() {
        let broker = PubSubBroker::new(test_config("http://localhost:8085/")).unwrap();
        assert_eq!(broker.base_url, "http://localhost:8085");
        assert_eq!(
            broker.topic_path("model_server.echo.0.1.inputs"),
            "projects/demo/topics/model_server.echo.0.1.inputs"
        );
        assert_eq!(
            broker.subscription_path("model_server.echo.0.1.inputs"),
            "projects/demo/subscriptions/model_server.echo.0.1.inputs.sub"
        );
    }

    #[test]
    fn test_missing_credentials_file() {
        let mut config = test_config("http://localhost:8085");
        config.credentials_path = Some("/nonexistent/key.json".to_string());
        assert!(matches!(
            PubSubBroker::new(config),
            Err(Error::Credentials(_))
        ));
    }

    #[tokio::test]
    async fn test_handles_not_ready() {
        let broker = PubSubBroker::new(test_config("http://localhost:8085")).unwrap();

        let err = broker.push(&json!(1), "t").await.unwrap_err();
        assert!(matches!(err, Error::HandleNotReady(_)));

        let mut handler = handler_fn(|_| async { Ok(()) });
        let err = broker.pull(&mut handler).await.unwrap_err();
        assert!(matches!(err, Error::HandleNotReady(_)));
    }

    #[tokio::test]
    async fn test_create_reports_existing_topic() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/projects/demo/topics/existing"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/projects/demo/subscriptions/existing.sub"))
            .and(body_json(json!({"topic": "projects/demo/topics/existing"})))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let broker = PubSubBroker::new(test_config(&server.uri())).unwrap();
        let report = broker.create(&["existing".to_string()]).await.unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.conflicts, vec!["existing".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_removes_subscription_then_topic() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/v1/projects/demo/subscriptions/t.sub"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/v1/projects/demo/topics/t"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let broker = PubSubBroker::new(test_config(&server.uri())).unwrap();
        let report = broker.delete(&["t".to_string()]).await.unwrap();
        assert_eq!(report.applied, vec!["t".to_string()]);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
        assert!(requests[0].url.path().ends_with("/subscriptions/t.sub"));
        assert!(requests[1].url.path().ends_with("/topics/t"));
    }

    #[tokio::test]
    async fn test_start_consumer_requires_subscription() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/demo/subscriptions/missing.sub"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut broker = PubSubBroker::new(test_config(&server.uri())).unwrap();
        let err = broker.start_consumer("missing").await.unwrap_err();
        assert!(matches!(err, Error::BackendUnavailable(_)));
        assert!(!broker.consumer_ready());
    }

    #[tokio::test]
    async fn test_push_publishes_base64_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/topics/t:publish"))
            .and(body_json(json!({
                "messages": [{"data": BASE64.encode(br#"{"label":4}"#)}]
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"messageIds": ["1"]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let mut broker = PubSubBroker::new(test_config(&server.uri())).unwrap();
        broker.start_producer("t").await.unwrap();
        broker.push(&json!({"label": 4}), "t").await.unwrap();
    }

    #[tokio::test]
    async fn test_handler_failure_skips_acknowledge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/projects/demo/subscriptions/t.sub"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/subscriptions/t.sub:pull"))
            .and(body_json(json!({"maxMessages": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "receivedMessages": [{
                    "ackId": "ack-1",
                    "message": {"data": BASE64.encode(b"1"), "messageId": "m-1"}
                }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/projects/demo/subscriptions/t.sub:acknowledge"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(0)
            .mount(&server)
            .await;

        let mut broker = PubSubBroker::new(test_config(&server.uri())).unwrap();
        broker.start_consumer("t").await.unwrap();

        let mut handler = handler_fn(|_| async {
            Err(Error::Prediction {
                model: "test".to_string(),
                message: "boom".to_string(),
            })
        });
        let err = broker.pull(&mut handler).await.unwrap_err();
        assert!(matches!(err, Error::Prediction { .. }));
    }
}
