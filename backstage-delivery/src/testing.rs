//! Scriptable provider fakes for dispatcher and API tests.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::provider::{
    GatewayError, GatewayErrorCode, MulticastMessage, MulticastResponse, PushGateway, PushRelay,
    RelayMessage, RelayTicket, SendResponse, TicketDetails, TicketStatus,
};

#[derive(Default)]
pub struct FakeGateway {
    token_errors: Mutex<HashMap<String, GatewayErrorCode>>,
    call_error: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<MulticastMessage>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn fail_token(&self, token: &str, code: GatewayErrorCode) {
        self.token_errors.lock().unwrap().insert(token.to_string(), code);
    }

    pub fn fail_calls(&self, reason: &str) {
        *self.call_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<MulticastMessage> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushGateway for FakeGateway {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse> {
        self.calls.lock().unwrap().push(message.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.call_error.lock().unwrap().clone() {
            return Err(anyhow!(reason));
        }

        let errors = self.token_errors.lock().unwrap();
        let responses = message
            .tokens
            .iter()
            .enumerate()
            .map(|(i, token)| SendResponse {
                token: token.clone(),
                result: match errors.get(token) {
                    Some(code) => Err(GatewayError {
                        code: code.clone(),
                        message: format!("scripted failure for {}", token),
                    }),
                    None => Ok(format!("projects/test/messages/{}", i)),
                },
            })
            .collect();

        Ok(MulticastResponse { responses })
    }
}

#[derive(Default)]
pub struct FakeRelay {
    ticket_errors: Mutex<HashMap<String, String>>,
    call_error: Mutex<Option<String>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<Vec<RelayMessage>>>,
}

impl FakeRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Answer `token` with an error ticket carrying `detail` (e.g. "DeviceNotRegistered").
    pub fn fail_token(&self, token: &str, detail: &str) {
        self.ticket_errors
            .lock()
            .unwrap()
            .insert(token.to_string(), detail.to_string());
    }

    pub fn fail_calls(&self, reason: &str) {
        *self.call_error.lock().unwrap() = Some(reason.to_string());
    }

    pub fn calls(&self) -> Vec<Vec<RelayMessage>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent_tokens(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .flatten()
            .map(|message| message.to)
            .collect()
    }
}

#[async_trait]
impl PushRelay for FakeRelay {
    async fn send_batch(&self, messages: &[RelayMessage]) -> Result<Vec<RelayTicket>> {
        self.calls.lock().unwrap().push(messages.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = self.call_error.lock().unwrap().clone() {
            return Err(anyhow!(reason));
        }

        let errors = self.ticket_errors.lock().unwrap();
        Ok(messages
            .iter()
            .enumerate()
            .map(|(i, message)| match errors.get(&message.to) {
                Some(detail) => RelayTicket {
                    status: TicketStatus::Error,
                    id: None,
                    message: Some(format!("scripted failure for {}", message.to)),
                    details: Some(TicketDetails {
                        error: Some(detail.clone()),
                    }),
                },
                None => RelayTicket {
                    status: TicketStatus::Ok,
                    id: Some(format!("ticket-{}", i)),
                    message: None,
                    details: None,
                },
            })
            .collect())
    }
}
