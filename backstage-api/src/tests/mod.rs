pub mod notification_routes_tests;

use crate::auth::generate_token;
use crate::{router, ApiState};
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use backstage_core::memory::{InMemoryConversationStore, InMemoryTokenStore};
use backstage_delivery::testing::{FakeGateway, FakeRelay};
use backstage_messaging::memory::{MemoryChangeFeed, MemoryUnreadCache};
use backstage_messaging::MessagingService;
use backstage_notify::Dispatcher;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const SECRET: &str = "test-secret";

pub struct TestApp {
    pub router: Router,
    pub tokens: Arc<InMemoryTokenStore>,
    pub gateway: Arc<FakeGateway>,
    pub relay: Arc<FakeRelay>,
    pub bearer: String,
}

pub struct TestParts {
    pub state: ApiState,
    pub tokens: Arc<InMemoryTokenStore>,
    pub gateway: Arc<FakeGateway>,
    pub relay: Arc<FakeRelay>,
}

pub fn test_parts() -> TestParts {
    let tokens = Arc::new(InMemoryTokenStore::new());
    let gateway = Arc::new(FakeGateway::new());
    let relay = Arc::new(FakeRelay::new());
    let dispatcher = Dispatcher::new(tokens.clone(), gateway.clone(), relay.clone(), Duration::from_secs(5));
    let messaging = MessagingService::new(
        Arc::new(InMemoryConversationStore::new()),
        Arc::new(MemoryUnreadCache::new()),
        Arc::new(MemoryChangeFeed::new()),
    );

    TestParts {
        state: ApiState::new(dispatcher, messaging, SECRET),
        tokens,
        gateway,
        relay,
    }
}

pub fn bearer_for(subject: &str) -> String {
    format!("Bearer {}", generate_token(subject, SECRET, 1).unwrap())
}

pub fn test_app() -> TestApp {
    let parts = test_parts();
    TestApp {
        router: router(parts.state),
        tokens: parts.tokens,
        gateway: parts.gateway,
        relay: parts.relay,
        bearer: bearer_for("console-admin"),
    }
}

impl TestApp {
    pub async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("authorization", &self.bearer)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.call(request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header("authorization", &self.bearer)
            .body(Body::empty())
            .unwrap();
        self.call(request).await
    }

    pub async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }
}
