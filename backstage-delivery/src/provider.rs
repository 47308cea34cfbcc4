use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Maximum number of messages the Expo relay accepts per request.
pub const EXPO_MAX_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    High,
    Normal,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::High => "high",
            Priority::Normal => "normal",
        }
    }
}

/// Provider-independent notification content.
#[derive(Debug, Clone, PartialEq)]
pub struct PushNotification {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub data: BTreeMap<String, Value>,
    pub priority: Priority,
}

impl PushNotification {
    /// FCM only accepts string values in the data map.
    pub fn string_data(&self) -> BTreeMap<String, String> {
        self.data
            .iter()
            .map(|(key, value)| {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

/// One notification addressed to many FCM registration tokens.
#[derive(Debug, Clone)]
pub struct MulticastMessage {
    pub tokens: Vec<String>,
    pub notification: PushNotification,
    /// Android presentation overrides; defaults are derived from the priority.
    pub android: Option<Value>,
    /// APNs presentation overrides; defaults are derived from the priority.
    pub apns: Option<Value>,
}

/// Per-token failure reasons reported by the messaging gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayErrorCode {
    RegistrationTokenNotRegistered,
    InvalidRegistrationToken,
    MismatchedCredential,
    InvalidArgument,
    MessageRateExceeded,
    ServerUnavailable,
    InternalError,
    ThirdPartyAuthError,
    Unknown(String),
}

impl GatewayErrorCode {
    /// Codes meaning the token can never be used again. Everything else,
    /// payload errors included, leaves the token active.
    pub fn is_token_permanently_invalid(&self) -> bool {
        matches!(
            self,
            GatewayErrorCode::RegistrationTokenNotRegistered
                | GatewayErrorCode::InvalidRegistrationToken
                | GatewayErrorCode::MismatchedCredential
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            GatewayErrorCode::RegistrationTokenNotRegistered => "messaging/registration-token-not-registered",
            GatewayErrorCode::InvalidRegistrationToken => "messaging/invalid-registration-token",
            GatewayErrorCode::MismatchedCredential => "messaging/mismatched-credential",
            GatewayErrorCode::InvalidArgument => "messaging/invalid-argument",
            GatewayErrorCode::MessageRateExceeded => "messaging/message-rate-exceeded",
            GatewayErrorCode::ServerUnavailable => "messaging/server-unavailable",
            GatewayErrorCode::InternalError => "messaging/internal-error",
            GatewayErrorCode::ThirdPartyAuthError => "messaging/third-party-auth-error",
            GatewayErrorCode::Unknown(code) => code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayError {
    pub code: GatewayErrorCode,
    pub message: String,
}

/// Outcome for one token of a multicast, in submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendResponse {
    pub token: String,
    /// Provider message id on success.
    pub result: std::result::Result<String, GatewayError>,
}

#[derive(Debug, Clone, Default)]
pub struct MulticastResponse {
    pub responses: Vec<SendResponse>,
}

/// Messaging gateway (provider A).
#[async_trait]
pub trait PushGateway: Send + Sync {
    /// Returns one response per submitted token. An `Err` means the call as a
    /// whole failed (not configured, credentials, transport).
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse>;
}

/// One entry of a push-relay batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayMessage {
    pub to: String,
    pub title: String,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sound: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TicketDetails {
    #[serde(default)]
    pub error: Option<String>,
}

/// Per-message receipt returned by the push relay, parallel to the request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RelayTicket {
    pub status: TicketStatus,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<TicketDetails>,
}

impl RelayTicket {
    pub fn is_ok(&self) -> bool {
        self.status == TicketStatus::Ok
    }

    /// The relay reports the device as gone for good.
    pub fn is_device_not_registered(&self) -> bool {
        self.details
            .as_ref()
            .and_then(|details| details.error.as_deref())
            == Some("DeviceNotRegistered")
    }
}

/// Third-party push relay (provider B).
#[async_trait]
pub trait PushRelay: Send + Sync {
    /// Sends at most [`EXPO_MAX_BATCH`] messages; returns tickets parallel to `messages`.
    async fn send_batch(&self, messages: &[RelayMessage]) -> Result<Vec<RelayTicket>>;
}

/// Success/failure tally of one provider path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderResult {
    pub success: usize,
    pub failure: usize,
    /// Tokens the provider confirmed as permanently invalid.
    pub invalid_tokens: Vec<String>,
}

impl ProviderResult {
    pub fn all_failed(count: usize) -> Self {
        ProviderResult {
            success: 0,
            failure: count,
            invalid_tokens: Vec::new(),
        }
    }

    pub fn merge(&mut self, other: ProviderResult) {
        self.success += other.success;
        self.failure += other.failure;
        self.invalid_tokens.extend(other.invalid_tokens);
    }

    pub fn attempted(&self) -> usize {
        self.success + self.failure
    }
}
