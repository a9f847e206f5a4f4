#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use b2b_webhooks::auth::{HmacSigner, format_signature_header};
use b2b_webhooks::clock::{Clock, ManualClock};
use b2b_webhooks::domain::Registration;
use b2b_webhooks::{Engine, config::Config, server::Server};
use tokio::net::TcpListener;
use uuid::Uuid;
use webhook_events::{Event, EventStatus, EventStore};

pub struct TestApp {
    pub address: String,
    pub engine: Engine,
    pub clock: Arc<ManualClock>,
    pub client: reqwest::Client,
}

pub async fn spawn_server() -> TestApp {
    spawn_server_with(|_| {}).await
}

/// Like [`spawn_server`], with a hook to adjust the config first.
pub async fn spawn_server_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let config = {
        let mut config = Config::load().unwrap();
        config.server.host = "localhost".to_string();
        config.server.port = 0;
        config.delivery.timeout_secs = 5;
        configure(&mut config);
        config
    };

    let clock = Arc::new(ManualClock::starting_now());
    let engine = Engine::with_clock(&config, clock.clone()).unwrap();
    let server = Server::with_engine(&config, engine.clone()).await.unwrap();

    let port = server.port();
    tokio::spawn(server.run());

    TestApp {
        address: format!("http://{}:{}", config.server.host, port),
        engine,
        clock,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    pub fn unix_now(&self) -> i64 {
        self.clock.unix_timestamp()
    }

    /// Headers a partner would attach to `body`.
    pub fn signed_headers(
        &self,
        registration: &Registration,
        timestamp: i64,
        nonce: &str,
        body: &[u8],
    ) -> Vec<(&'static str, String)> {
        let key = self
            .engine
            .vault
            .hash_secret(&registration.credentials.api_secret);
        let ts = timestamp.to_string();
        let signature = HmacSigner::new(key).sign_parts(&[ts.as_bytes(), body]);
        vec![
            ("X-API-Key", registration.credentials.api_key.clone()),
            ("X-Signature", format_signature_header(&signature)),
            ("X-Timestamp", ts),
            ("X-Nonce", nonce.to_string()),
        ]
    }

    pub async fn post_signed(
        &self,
        path: &str,
        headers: &[(&'static str, String)],
        body: &[u8],
    ) -> reqwest::Response {
        let mut request = self
            .client
            .post(self.url(path))
            .header("Content-Type", "application/json")
            .body(body.to_vec());
        for (name, value) in headers {
            request = request.header(*name, value);
        }
        request.send().await.expect("Failed to execute request.")
    }

    /// Poll until the event leaves `PENDING`/`PROCESSING`.
    pub async fn wait_for_settled(&self, event_id: Uuid) -> Event {
        for _ in 0..200 {
            let event = self
                .engine
                .events
                .get(event_id)
                .await
                .unwrap()
                .expect("event exists");
            if !matches!(event.status, EventStatus::Pending | EventStatus::Processing) {
                return event;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("event {event_id} never settled");
    }
}

// ---------------------------------------------------------------------------
// Scripted partner endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ReceivedRequest {
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ReceivedRequest {
    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }
}

#[derive(Clone, Default)]
struct MockState {
    script: Arc<Mutex<VecDeque<u16>>>,
    fallback: Arc<Mutex<u16>>,
    delay: Arc<Mutex<Duration>>,
    received: Arc<Mutex<Vec<ReceivedRequest>>>,
}

/// A throwaway partner endpoint that answers with scripted status codes and
/// records every request it sees.
pub struct MockPartner {
    pub url: String,
    state: MockState,
}

impl MockPartner {
    /// Responds with `script` in order, then keeps repeating its last entry.
    pub async fn start(script: &[u16]) -> Self {
        let state = MockState::default();
        *state.script.lock().unwrap() = script.iter().copied().collect();
        *state.fallback.lock().unwrap() = script.last().copied().unwrap_or(200);

        let router = Router::new()
            .route("/hook", post(record))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move { axum::serve(listener, router).await });

        Self {
            url: format!("http://127.0.0.1:{port}/hook"),
            state,
        }
    }

    pub fn respond_with(&self, status: u16) {
        self.state.script.lock().unwrap().clear();
        *self.state.fallback.lock().unwrap() = status;
    }

    /// Hold every later response for `delay` before answering.
    pub fn respond_after(&self, delay: Duration) {
        *self.state.delay.lock().unwrap() = delay;
    }

    pub fn received(&self) -> Vec<ReceivedRequest> {
        self.state.received.lock().unwrap().clone()
    }
}

async fn record(State(state): State<MockState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    state
        .received
        .lock()
        .unwrap()
        .push(ReceivedRequest { headers, body });
    let next = state.script.lock().unwrap().pop_front();
    let code = next.unwrap_or_else(|| *state.fallback.lock().unwrap());

    let delay = *state.delay.lock().unwrap();
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    StatusCode::from_u16(code).unwrap()
}
