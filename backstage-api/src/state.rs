use backstage_messaging::MessagingService;
use backstage_notify::Dispatcher;
use std::sync::Arc;

/// Services shared by every handler, injected as a request extension.
#[derive(Clone)]
pub struct ApiState {
    pub dispatcher: Dispatcher,
    pub messaging: MessagingService,
    pub jwt_secret: Arc<str>,
}

impl ApiState {
    pub fn new(dispatcher: Dispatcher, messaging: MessagingService, jwt_secret: &str) -> Self {
        Self {
            dispatcher,
            messaging,
            jwt_secret: Arc::from(jwt_secret),
        }
    }
}
