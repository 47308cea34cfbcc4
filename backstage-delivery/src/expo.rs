use anyhow::{anyhow, Result};
use async_trait::async_trait;
use backstage_core::config::DeliveryConfig;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::provider::{PushRelay, RelayMessage, RelayTicket, EXPO_MAX_BATCH};

#[derive(Debug, Deserialize)]
struct ExpoPushResponse {
    #[serde(default)]
    data: Vec<RelayTicket>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

/// Provider B: the Expo push relay. Needs no credentials; an access token is
/// sent when the project has enhanced push security enabled.
pub struct ExpoRelay {
    client: Arc<reqwest::Client>,
    push_url: String,
    access_token: Option<String>,
}

impl ExpoRelay {
    pub fn new(config: &DeliveryConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.provider_timeout_secs))
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        tracing::info!("Expo push relay initialized ({})", config.expo_push_url);
        Ok(Self {
            client: Arc::new(client),
            push_url: config.expo_push_url.clone(),
            access_token: config.expo_access_token.clone(),
        })
    }
}

#[async_trait]
impl PushRelay for ExpoRelay {
    async fn send_batch(&self, messages: &[RelayMessage]) -> Result<Vec<RelayTicket>> {
        if messages.is_empty() {
            return Ok(Vec::new());
        }
        if messages.len() > EXPO_MAX_BATCH {
            return Err(anyhow!(
                "Expo batch of {} exceeds the limit of {}",
                messages.len(),
                EXPO_MAX_BATCH
            ));
        }

        let mut request = self
            .client
            .post(&self.push_url)
            .header("Accept", "application/json")
            .json(messages);
        if let Some(token) = &self.access_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| anyhow!("Failed to send HTTP request to Expo: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(anyhow!("Expo API returned error status {}: {}", status, error_text));
        }

        let body: ExpoPushResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Expo API response: {}", e))?;

        parse_tickets(body, messages.len())
    }
}

fn parse_tickets(body: ExpoPushResponse, expected: usize) -> Result<Vec<RelayTicket>> {
    if let Some(errors) = body.errors {
        return Err(anyhow!("Expo API rejected the batch: {}", errors));
    }
    if body.data.len() != expected {
        return Err(anyhow!(
            "Expo API returned {} tickets for {} messages",
            body.data.len(),
            expected
        ));
    }

    tracing::debug!("Expo accepted batch of {} messages", expected);
    Ok(body.data)
}
