//! Stateful Pub/Sub REST fake on top of wiremock.
//!
//! Implements just enough of the v1 API for the broker: topic and
//! subscription create/get/delete, publish, pull and acknowledge.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use wiremock::matchers::any;
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

#[derive(Default)]
struct Subscription {
    topic: String,
    pending: VecDeque<(String, String)>,
}

#[derive(Default)]
struct State {
    topics: HashMap<String, ()>,
    subscriptions: HashMap<String, Subscription>,
    /// Delivered but not yet acknowledged, by ack id.
    outstanding: HashMap<String, String>,
    acknowledged: Vec<String>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self) -> String {
        self.next_id += 1;
        self.next_id.to_string()
    }
}

/// Handle to a running fake server.
#[derive(Clone)]
pub struct FakePubSub {
    state: Arc<Mutex<State>>,
}

impl FakePubSub {
    /// Start a mock server answering every request from the fake.
    pub async fn start() -> (MockServer, FakePubSub) {
        let server = MockServer::start().await;
        let fake = FakePubSub {
            state: Arc::new(Mutex::new(State::default())),
        };
        Mock::given(any())
            .respond_with(fake.clone())
            .mount(&server)
            .await;
        (server, fake)
    }

    pub fn has_topic(&self, name: &str) -> bool {
        self.state.lock().unwrap().topics.contains_key(name)
    }

    pub fn has_subscription(&self, name: &str) -> bool {
        self.state.lock().unwrap().subscriptions.contains_key(name)
    }

    /// Ack ids acknowledged so far, in order.
    pub fn acknowledged(&self) -> Vec<String> {
        self.state.lock().unwrap().acknowledged.clone()
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().unwrap().outstanding.len()
    }

    fn handle(&self, method: &str, path: &str, body: Value) -> ResponseTemplate {
        let mut state = self.state.lock().unwrap();

        let Some(resource) = path.strip_prefix("/v1/projects/") else {
            return not_found();
        };
        let Some((_project, rest)) = resource.split_once('/') else {
            return not_found();
        };
        let (kind, name) = rest.split_once('/').unwrap_or((rest, ""));
        let (name, action) = match name.split_once(':') {
            Some((name, action)) => (name, Some(action)),
            None => (name, None),
        };

        match (method, kind, action) {
            ("PUT", "topics", None) => {
                if state.topics.insert(name.to_string(), ()).is_some() {
                    return conflict();
                }
                ok(json!({ "name": path }))
            }
            ("DELETE", "topics", None) => match state.topics.remove(name) {
                Some(()) => ok(json!({})),
                None => not_found(),
            },
            ("POST", "topics", Some("publish")) => {
                if !state.topics.contains_key(name) {
                    return not_found();
                }
                let mut ids = Vec::new();
                let messages = body["messages"].as_array().cloned().unwrap_or_default();
                for message in messages {
                    let data = message["data"].as_str().unwrap_or_default().to_string();
                    let id = state.next_id();
                    let topic = name.to_string();
                    let mut deliveries = Vec::new();
                    for (sub_name, sub) in state.subscriptions.iter() {
                        if sub.topic.ends_with(&format!("/topics/{}", topic)) {
                            deliveries.push(sub_name.clone());
                        }
                    }
                    for sub_name in deliveries {
                        if let Some(sub) = state.subscriptions.get_mut(&sub_name) {
                            sub.pending.push_back((id.clone(), data.clone()));
                        }
                    }
                    ids.push(id);
                }
                ok(json!({ "messageIds": ids }))
            }
            ("PUT", "subscriptions", None) => {
                if state.subscriptions.contains_key(name) {
                    return conflict();
                }
                let topic = body["topic"].as_str().unwrap_or_default().to_string();
                state.subscriptions.insert(
                    name.to_string(),
                    Subscription {
                        topic,
                        pending: VecDeque::new(),
                    },
                );
                ok(json!({ "name": path }))
            }
            ("GET", "subscriptions", None) => match state.subscriptions.get(name) {
                Some(sub) => ok(json!({ "name": path, "topic": sub.topic })),
                None => not_found(),
            },
            ("DELETE", "subscriptions", None) => match state.subscriptions.remove(name) {
                Some(_) => ok(json!({})),
                None => not_found(),
            },
            ("POST", "subscriptions", Some("pull")) => {
                let max = body["maxMessages"].as_u64().unwrap_or(1) as usize;
                let mut delivered = Vec::new();
                while delivered.len() < max {
                    let next = match state.subscriptions.get_mut(name) {
                        Some(sub) => sub.pending.pop_front(),
                        None => return not_found(),
                    };
                    let Some((message_id, data)) = next else {
                        break;
                    };
                    let ack_id = format!("ack-{}", message_id);
                    state.outstanding.insert(ack_id.clone(), message_id.clone());
                    delivered.push(json!({
                        "ackId": ack_id,
                        "message": { "data": data, "messageId": message_id }
                    }));
                }
                if delivered.is_empty() {
                    ok(json!({}))
                } else {
                    ok(json!({ "receivedMessages": delivered }))
                }
            }
            ("POST", "subscriptions", Some("acknowledge")) => {
                let ack_ids = body["ackIds"].as_array().cloned().unwrap_or_default();
                for ack_id in ack_ids {
                    if let Some(ack_id) = ack_id.as_str() {
                        state.outstanding.remove(ack_id);
                        state.acknowledged.push(ack_id.to_string());
                    }
                }
                ok(json!({}))
            }
            _ => not_found(),
        }
    }
}

impl Respond for FakePubSub {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body = serde_json::from_slice(&request.body).unwrap_or(Value::Null);
        self.handle(request.method.as_str(), request.url.path(), body)
    }
}

fn ok(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

fn conflict() -> ResponseTemplate {
    ResponseTemplate::new(409).set_body_json(json!({
        "error": { "code": 409, "status": "ALREADY_EXISTS" }
    }))
}

fn not_found() -> ResponseTemplate {
    ResponseTemplate::new(404).set_body_json(json!({
        "error": { "code": 404, "status": "NOT_FOUND" }
    }))
}
