use backstage_core::{DeactivationBatch, DeviceToken, TokenStore};
use backstage_delivery::{ProviderResult, PushGateway, PushRelay};
use serde::Serialize;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::DispatchError;
use crate::fanout::{send_expo, send_fcm};
use crate::request::{RegisterToken, SendRequest};
use crate::resolve::{resolve_targets, ResolvedTargets};

/// Aggregate delivery counts of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchStats {
    pub total_success: usize,
    pub total_failure: usize,
    pub fcm_success: usize,
    pub fcm_failure: usize,
    pub expo_success: usize,
    pub expo_failure: usize,
}

impl DispatchStats {
    fn from_results(fcm: &ProviderResult, expo: &ProviderResult) -> Self {
        DispatchStats {
            total_success: fcm.success + expo.success,
            total_failure: fcm.failure + expo.failure,
            fcm_success: fcm.success,
            fcm_failure: fcm.failure,
            expo_success: expo.success,
            expo_failure: expo.failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reactivation {
    pub reactivated: u64,
    pub total: usize,
}

/// Resolves targets, fans a notification out to both providers, and
/// deactivates tokens the providers report as permanently invalid.
#[derive(Clone)]
pub struct Dispatcher {
    tokens: Arc<dyn TokenStore>,
    gateway: Arc<dyn PushGateway>,
    relay: Arc<dyn PushRelay>,
    provider_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        tokens: Arc<dyn TokenStore>,
        gateway: Arc<dyn PushGateway>,
        relay: Arc<dyn PushRelay>,
        provider_timeout: Duration,
    ) -> Self {
        Self {
            tokens,
            gateway,
            relay,
            provider_timeout,
        }
    }

    pub async fn dispatch(&self, request: &SendRequest) -> Result<DispatchStats, DispatchError> {
        request.validate()?;

        let resolved = resolve_targets(self.tokens.as_ref(), &request.targets).await;
        if resolved.is_empty() {
            return Err(DispatchError::NoTargets);
        }

        tracing::info!(
            "Dispatching \"{}\" to {} FCM and {} Expo tokens",
            request.notification.title,
            resolved.fcm.len(),
            resolved.expo.len()
        );

        let (fcm, expo) = tokio::join!(
            self.bounded("FCM", resolved.fcm.len(), send_fcm(self.gateway.as_ref(), &resolved.fcm, request)),
            self.bounded("Expo", resolved.expo.len(), send_expo(self.relay.as_ref(), &resolved.expo, request)),
        );

        let stats = DispatchStats::from_results(&fcm, &expo);

        let invalid: Vec<String> = fcm.invalid_tokens.into_iter().chain(expo.invalid_tokens).collect();
        if !invalid.is_empty() {
            let deactivated = self.reconcile(&resolved, &invalid).await;
            tracing::info!("Deactivated {} of {} invalid tokens", deactivated, invalid.len());
        }

        tracing::info!(
            "Dispatch finished: {} succeeded, {} failed",
            stats.total_success,
            stats.total_failure
        );
        Ok(stats)
    }

    async fn bounded<F>(&self, provider: &str, token_count: usize, send: F) -> ProviderResult
    where
        F: Future<Output = ProviderResult>,
    {
        if token_count == 0 {
            return ProviderResult::default();
        }
        match tokio::time::timeout(self.provider_timeout, send).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    "{} send timed out after {:?}, counting {} tokens as failed",
                    provider,
                    self.provider_timeout,
                    token_count
                );
                ProviderResult::all_failed(token_count)
            }
        }
    }

    /// Flip invalid tokens inactive in one commit. Owners whose token list
    /// cannot be read are skipped; the rest are still reconciled.
    async fn reconcile(&self, resolved: &ResolvedTargets, invalid: &[String]) -> u64 {
        let invalid_set: HashSet<&str> = invalid.iter().map(String::as_str).collect();
        let mut batch = DeactivationBatch::default();

        for (user_id, owned) in &resolved.owners {
            if !owned.iter().any(|token| invalid_set.contains(token.as_str())) {
                continue;
            }

            let entries = match self.tokens.user_tokens(user_id).await {
                Ok(Some(entries)) => entries,
                Ok(None) => {
                    tracing::warn!("User {} disappeared before token cleanup", user_id);
                    continue;
                }
                Err(e) => {
                    tracing::error!("Failed to read tokens for user {}, skipping cleanup: {}", user_id, e);
                    continue;
                }
            };

            let flip: Vec<String> = entries
                .into_iter()
                .filter(|entry| entry.is_active && invalid_set.contains(entry.token.as_str()))
                .map(|entry| entry.token)
                .collect();
            if !flip.is_empty() {
                batch.by_owner.push((user_id.clone(), flip));
            }
        }

        batch.unowned = invalid
            .iter()
            .filter(|token| !resolved.is_owned(token))
            .cloned()
            .collect();

        if batch.is_empty() {
            return 0;
        }

        match self.tokens.deactivate(&batch).await {
            Ok(changed) => changed,
            Err(e) => {
                tracing::error!("Failed to commit token deactivation: {}", e);
                0
            }
        }
    }

    /// Reactivate every inactive token of a user.
    pub async fn reactivate(&self, user_id: &str) -> Result<Reactivation, DispatchError> {
        if user_id.trim().is_empty() {
            return Err(DispatchError::Validation("userId is required".into()));
        }

        let tokens = self
            .tokens
            .user_tokens(user_id)
            .await?
            .ok_or_else(|| DispatchError::NotFound(format!("User {}", user_id)))?;

        let reactivated = self.tokens.reactivate_all(user_id).await?;
        tracing::info!("Reactivated {} of {} tokens for user {}", reactivated, tokens.len(), user_id);

        Ok(Reactivation {
            reactivated,
            total: tokens.len(),
        })
    }

    pub async fn register(&self, registration: RegisterToken) -> Result<DeviceToken, DispatchError> {
        let registration = registration.into_registration()?;
        let token = self.tokens.register(&registration).await?;
        tracing::info!(
            "Registered {} token for user {} device {}",
            token.token_type,
            token.user_id,
            token.device_id
        );
        Ok(token)
    }

    /// Deactivate one device's token, or all of the user's tokens.
    pub async fn disable(&self, user_id: &str, device_id: Option<&str>) -> Result<u64, DispatchError> {
        if user_id.trim().is_empty() {
            return Err(DispatchError::Validation("userId is required".into()));
        }
        let changed = self.tokens.disable(user_id, device_id).await?;
        tracing::info!("Disabled {} tokens for user {}", changed, user_id);
        Ok(changed)
    }
}
