//! Helpers for driving the drivers against a mock Alpaca server.

mod logging_env;

use crate::config::DeviceConfig;
use crate::AlpacaClient;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing_subscriber::layer::{Context, SubscriberExt};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockBuilder, MockServer, Request, Respond, ResponseTemplate};

/// JSON response with the given Alpaca envelope.
pub(crate) fn envelope(body: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(body)
}

/// Successful GET envelope carrying `value`.
pub(crate) fn value_envelope(value: Value) -> ResponseTemplate {
    envelope(json!({
        "ClientTransactionID": 0,
        "ServerTransactionID": 1,
        "ErrorNumber": 0,
        "ErrorMessage": "",
        "Value": value,
    }))
}

/// Responds with each value in turn, repeating the last one forever.
pub(crate) struct Sequence {
    values: Vec<Value>,
    next: AtomicUsize,
}

impl Sequence {
    pub(crate) fn new(values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            values: values.into_iter().collect(),
            next: AtomicUsize::new(0),
        }
    }
}

impl Respond for Sequence {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        let index = self.next.fetch_add(1, Ordering::Relaxed);
        let value = self
            .values
            .get(index)
            .or_else(|| self.values.last())
            .cloned()
            .unwrap_or(Value::Null);
        value_envelope(value)
    }
}

/// A mock Alpaca server exposing a single device at index 0.
pub(crate) struct MockAlpaca {
    pub(crate) server: MockServer,
    device_type: &'static str,
}

impl MockAlpaca {
    pub(crate) async fn start(device_type: &'static str) -> Self {
        Self {
            server: MockServer::start().await,
            device_type,
        }
    }

    pub(crate) fn config(&self) -> DeviceConfig {
        let addr = self.server.address();
        DeviceConfig::new(addr.ip().to_string(), addr.port(), self.device_type, 0)
    }

    pub(crate) fn client(&self) -> AlpacaClient {
        let endpoint = self
            .config()
            .endpoint()
            .expect("mock endpoint should be valid");
        AlpacaClient::new(endpoint)
    }

    pub(crate) fn path(&self, name: &str) -> String {
        format!(
            "/api/v1/{}/0/{}",
            self.device_type,
            name.to_ascii_lowercase()
        )
    }

    /// Start building a mock for a property or method.
    pub(crate) fn on(&self, http_method: &str, name: &str) -> MockBuilder {
        Mock::given(method(http_method)).and(path(self.path(name)))
    }

    /// Serve a constant value for a GET.
    pub(crate) async fn value(&self, name: &str, value: Value) {
        self.on("GET", name)
            .respond_with(value_envelope(value))
            .mount(&self.server)
            .await;
    }

    /// Serve the given values for consecutive GETs.
    pub(crate) async fn sequence(&self, name: &str, values: impl IntoIterator<Item = Value>) {
        self.on("GET", name)
            .respond_with(Sequence::new(values))
            .mount(&self.server)
            .await;
    }

    /// Accept a request without a value, as for most PUTs.
    pub(crate) async fn ok(&self, http_method: &str, name: &str) {
        self.on(http_method, name)
            .respond_with(envelope(json!({"ErrorNumber": 0, "ErrorMessage": ""})))
            .mount(&self.server)
            .await;
    }

    pub(crate) async fn device_error(&self, http_method: &str, name: &str, code: i32, message: &str) {
        self.on(http_method, name)
            .respond_with(envelope(json!({"ErrorNumber": code, "ErrorMessage": message})))
            .mount(&self.server)
            .await;
    }

    /// Bodies of all requests received so far for the given method and name.
    pub(crate) async fn requests(&self, http_method: &str, name: &str) -> Vec<String> {
        let path = self.path(name);
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|request| {
                request.method.as_str() == http_method && request.url.path() == path
            })
            .map(|request| String::from_utf8_lossy(&request.body).into_owned())
            .collect()
    }
}

/// Records formatted log messages emitted while it's installed as the thread default.
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    events: Arc<Mutex<Vec<(tracing::Level, String)>>>,
}

struct MessageVisitor<'msg>(&'msg mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        }
    }
}

impl<S: tracing::Subscriber> tracing_subscriber::Layer<S> for LogCapture {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.events
            .lock()
            .expect("log capture lock poisoned")
            .push((*event.metadata().level(), message));
    }
}

impl LogCapture {
    /// Install the capture for the current thread until the guard is dropped.
    pub(crate) fn install(&self) -> tracing::subscriber::DefaultGuard {
        tracing::subscriber::set_default(tracing_subscriber::registry().with(self.clone()))
    }

    /// Number of captured messages at `level` containing `needle`.
    pub(crate) fn count(&self, level: tracing::Level, needle: &str) -> usize {
        self.events
            .lock()
            .expect("log capture lock poisoned")
            .iter()
            .filter(|(event_level, message)| *event_level == level && message.contains(needle))
            .count()
    }
}
