pub mod reconcile_tests;
pub mod token_admin_tests;

use crate::request::{NotificationPayload, SendRequest, Target};
use crate::Dispatcher;
use backstage_core::memory::InMemoryTokenStore;
use backstage_delivery::testing::{FakeGateway, FakeRelay};
use std::sync::Arc;
use std::time::Duration;

pub struct Harness {
    pub store: Arc<InMemoryTokenStore>,
    pub gateway: Arc<FakeGateway>,
    pub relay: Arc<FakeRelay>,
    pub dispatcher: Dispatcher,
}

pub fn harness() -> Harness {
    harness_with(FakeGateway::new(), FakeRelay::new(), Duration::from_secs(5))
}

pub fn harness_with(gateway: FakeGateway, relay: FakeRelay, timeout: Duration) -> Harness {
    let store = Arc::new(InMemoryTokenStore::new());
    let gateway = Arc::new(gateway);
    let relay = Arc::new(relay);
    let dispatcher = Dispatcher::new(store.clone(), gateway.clone(), relay.clone(), timeout);
    Harness {
        store,
        gateway,
        relay,
        dispatcher,
    }
}

pub fn send_request(targets: Vec<Target>) -> SendRequest {
    SendRequest::new(
        targets,
        NotificationPayload {
            title: "Doors open".into(),
            body: "The venue is now open for guests".into(),
            ..Default::default()
        },
    )
}

pub fn users(ids: &[&str]) -> Target {
    Target::Users(ids.iter().map(|id| id.to_string()).collect())
}

pub fn tokens(values: &[&str]) -> Target {
    Target::Tokens(values.iter().map(|t| t.to_string()).collect())
}
