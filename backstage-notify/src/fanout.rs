use backstage_core::is_valid_expo_token;
use backstage_delivery::{
    MulticastMessage, ProviderResult, PushGateway, PushNotification, PushRelay, RelayMessage, EXPO_MAX_BATCH,
};
use serde_json::Value;

use crate::request::SendRequest;

/// One multicast for all FCM tokens. Only allow-listed error codes mark a
/// token invalid; any other per-token error is a plain failure.
pub async fn send_fcm(gateway: &dyn PushGateway, tokens: &[String], request: &SendRequest) -> ProviderResult {
    if tokens.is_empty() {
        return ProviderResult::default();
    }

    let message = MulticastMessage {
        tokens: tokens.to_vec(),
        notification: request.push_notification(),
        android: request.android.clone(),
        apns: request.apns.clone(),
    };

    let response = match gateway.send_multicast(&message).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!("FCM multicast to {} tokens failed: {}", tokens.len(), e);
            return ProviderResult::all_failed(tokens.len());
        }
    };

    let mut result = ProviderResult::default();
    for response in &response.responses {
        match &response.result {
            Ok(_) => result.success += 1,
            Err(error) => {
                result.failure += 1;
                if error.code.is_token_permanently_invalid() {
                    tracing::info!("FCM reports token invalid ({}): {}", error.code.as_str(), response.token);
                    result.invalid_tokens.push(response.token.clone());
                } else {
                    tracing::warn!(
                        "FCM send failed for token {} ({}): {}",
                        response.token,
                        error.code.as_str(),
                        error.message
                    );
                }
            }
        }
    }

    // Tokens the gateway did not answer for count as failed
    let answered = response.responses.len();
    if answered < tokens.len() {
        result.failure += tokens.len() - answered;
    }

    tracing::info!("FCM delivery: {} succeeded, {} failed", result.success, result.failure);
    result
}

fn relay_message(token: &str, notification: &PushNotification) -> RelayMessage {
    RelayMessage {
        to: token.to_string(),
        title: notification.title.clone(),
        body: notification.body.clone(),
        data: if notification.data.is_empty() {
            None
        } else {
            Some(Value::Object(notification.data.clone().into_iter().collect()))
        },
        priority: notification.priority,
        sound: Some("default".to_string()),
    }
}

/// Batches for the Expo relay. Malformed tokens fail without a network call.
pub async fn send_expo(relay: &dyn PushRelay, tokens: &[String], request: &SendRequest) -> ProviderResult {
    let mut result = ProviderResult::default();
    let (valid, malformed): (Vec<&String>, Vec<&String>) =
        tokens.iter().partition(|token| is_valid_expo_token(token));

    if !malformed.is_empty() {
        tracing::warn!("Skipping {} malformed Expo tokens", malformed.len());
        result.failure += malformed.len();
    }

    let notification = request.push_notification();
    for chunk in valid.chunks(EXPO_MAX_BATCH) {
        let messages: Vec<RelayMessage> = chunk.iter().map(|token| relay_message(token, &notification)).collect();

        let tickets = match relay.send_batch(&messages).await {
            Ok(tickets) => tickets,
            Err(e) => {
                tracing::error!("Expo batch of {} failed: {}", chunk.len(), e);
                result.failure += chunk.len();
                continue;
            }
        };

        for (token, ticket) in chunk.iter().zip(tickets.iter()) {
            if ticket.is_ok() {
                result.success += 1;
                continue;
            }
            result.failure += 1;
            if ticket.is_device_not_registered() {
                tracing::info!("Expo reports device not registered: {}", token);
                result.invalid_tokens.push((*token).clone());
            } else {
                tracing::warn!(
                    "Expo ticket error for {}: {}",
                    token,
                    ticket.message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        if tickets.len() < chunk.len() {
            result.failure += chunk.len() - tickets.len();
        }
    }

    tracing::info!("Expo delivery: {} succeeded, {} failed", result.success, result.failure);
    result
}
