use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backstage_core::config::DeliveryConfig;
use futures::stream::{self, StreamExt};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::provider::{
    GatewayError, GatewayErrorCode, MulticastMessage, MulticastResponse, Priority, PushGateway,
    PushNotification, SendResponse,
};
use crate::service_account::{ServiceAccountAuth, ServiceAccountKey};

const FCM_API_BASE: &str = "https://fcm.googleapis.com/v1/projects";

#[derive(Debug, Serialize)]
struct SendRequest<'a> {
    message: FcmMessage<'a>,
}

#[derive(Debug, Serialize)]
struct FcmMessage<'a> {
    token: &'a str,
    notification: FcmNotification<'a>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    data: BTreeMap<String, String>,
    android: Value,
    apns: Value,
}

#[derive(Debug, Serialize)]
struct FcmNotification<'a> {
    title: &'a str,
    body: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorStatus,
}

#[derive(Debug, Deserialize)]
struct ErrorStatus {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(rename = "@type", default)]
    type_url: Option<String>,
    #[serde(rename = "errorCode", default)]
    error_code: Option<String>,
}

pub fn default_android_config(priority: Priority) -> Value {
    json!({
        "priority": priority.as_str(),
        "notification": { "sound": "default" }
    })
}

pub fn default_apns_config(notification: &PushNotification) -> Value {
    let apns_priority = match notification.priority {
        Priority::High => "10",
        Priority::Normal => "5",
    };
    let mut aps = json!({ "sound": "default" });
    if notification.image_url.is_some() {
        aps["mutable-content"] = json!(1);
    }
    json!({
        "headers": { "apns-priority": apns_priority },
        "payload": { "aps": aps }
    })
}

/// Maps an FCM v1 error response to a gateway error code. The FCM-specific
/// `errorCode` detail wins over the canonical status.
pub(crate) fn map_fcm_error(status: StatusCode, body: &str) -> GatewayError {
    let envelope: ErrorEnvelope = match serde_json::from_str(body) {
        Ok(envelope) => envelope,
        Err(_) => {
            let code = if status.is_server_error() {
                GatewayErrorCode::ServerUnavailable
            } else {
                GatewayErrorCode::Unknown(format!("http-{}", status.as_u16()))
            };
            return GatewayError {
                code,
                message: body.to_string(),
            };
        }
    };

    let error = envelope.error;
    let fcm_code = error
        .details
        .iter()
        .find(|detail| {
            detail
                .type_url
                .as_deref()
                .is_some_and(|t| t.ends_with("google.firebase.fcm.v1.FcmError"))
        })
        .and_then(|detail| detail.error_code.clone())
        .or(error.status.clone())
        .unwrap_or_default();

    let code = match fcm_code.as_str() {
        "UNREGISTERED" | "NOT_FOUND" => GatewayErrorCode::RegistrationTokenNotRegistered,
        "SENDER_ID_MISMATCH" => GatewayErrorCode::MismatchedCredential,
        "INVALID_ARGUMENT" => {
            if error.message.to_lowercase().contains("registration token") {
                GatewayErrorCode::InvalidRegistrationToken
            } else {
                GatewayErrorCode::InvalidArgument
            }
        }
        "QUOTA_EXCEEDED" | "RESOURCE_EXHAUSTED" => GatewayErrorCode::MessageRateExceeded,
        "UNAVAILABLE" => GatewayErrorCode::ServerUnavailable,
        "INTERNAL" => GatewayErrorCode::InternalError,
        "THIRD_PARTY_AUTH_ERROR" => GatewayErrorCode::ThirdPartyAuthError,
        other => GatewayErrorCode::Unknown(format!("messaging/{}", other.to_lowercase().replace('_', "-"))),
    };

    GatewayError {
        code,
        message: error.message,
    }
}

struct FcmClient {
    http: reqwest::Client,
    send_url: String,
    auth: ServiceAccountAuth,
    concurrency: usize,
}

impl FcmClient {
    async fn send_one(
        &self,
        access_token: &str,
        token: &str,
        message: &MulticastMessage,
        android: &Value,
        apns: &Value,
    ) -> SendResponse {
        let notification = &message.notification;
        let request = SendRequest {
            message: FcmMessage {
                token,
                notification: FcmNotification {
                    title: &notification.title,
                    body: &notification.body,
                    image: notification.image_url.as_deref(),
                },
                data: notification.string_data(),
                android: android.clone(),
                apns: apns.clone(),
            },
        };

        let result = match self
            .http
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => match response.json::<SendResult>().await {
                Ok(sent) => Ok(sent.name),
                Err(e) => Err(GatewayError {
                    code: GatewayErrorCode::Unknown("messaging/unparsable-response".into()),
                    message: e.to_string(),
                }),
            },
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                Err(map_fcm_error(status, &body))
            }
            Err(e) => Err(GatewayError {
                code: GatewayErrorCode::ServerUnavailable,
                message: format!("Failed to send HTTP request to FCM: {}", e),
            }),
        };

        SendResponse {
            token: token.to_string(),
            result,
        }
    }
}

/// Provider A: Firebase Cloud Messaging over the HTTP v1 API.
pub struct FcmGateway {
    client: Option<FcmClient>,
}

impl FcmGateway {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let key = match ServiceAccountKey::from_config(config)? {
            Some(key) => key,
            None => {
                tracing::warn!("FCM delivery disabled (missing service account)");
                return Ok(Self { client: None });
            }
        };

        tracing::info!("Initializing FCM client");
        let auth = ServiceAccountAuth::new(key);
        let project_id = config
            .fcm_project_id
            .clone()
            .or_else(|| auth.project_id().map(str::to_string))
            .ok_or_else(|| anyhow!("FCM project id missing from configuration and service account"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        tracing::info!("FCM client initialized for project {}", project_id);
        Ok(Self {
            client: Some(FcmClient {
                http,
                send_url: format!("{}/{}/messages:send", FCM_API_BASE, project_id),
                auth,
                concurrency: config.fcm_concurrency.max(1),
            }),
        })
    }

    pub fn is_configured(&self) -> bool {
        self.client.is_some()
    }
}

#[async_trait]
impl PushGateway for FcmGateway {
    async fn send_multicast(&self, message: &MulticastMessage) -> Result<MulticastResponse> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("FCM delivery not configured"))?;

        if message.tokens.is_empty() {
            return Ok(MulticastResponse::default());
        }

        let access_token = client.auth.access_token(&client.http).await?;
        let android = message
            .android
            .clone()
            .unwrap_or_else(|| default_android_config(message.notification.priority));
        let apns = message
            .apns
            .clone()
            .unwrap_or_else(|| default_apns_config(&message.notification));

        // Built eagerly; a lazy borrowing closure breaks the Send bound of the boxed future
        let sends: Vec<_> = message
            .tokens
            .iter()
            .map(|token| client.send_one(&access_token, token, message, &android, &apns))
            .collect();
        let responses: Vec<SendResponse> = stream::iter(sends)
            .buffered(client.concurrency)
            .collect()
            .await;

        tracing::debug!(
            "FCM multicast finished: {} tokens, {} failed",
            responses.len(),
            responses.iter().filter(|r| r.result.is_err()).count()
        );

        Ok(MulticastResponse { responses })
    }
}
