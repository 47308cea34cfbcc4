use backstage_core::{classify_token, TokenFamily, TokenStore, USER_QUERY_BATCH};
use std::collections::{BTreeMap, HashSet};

use crate::request::Target;

/// Deduplicated delivery tokens grouped by family.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTargets {
    pub fcm: Vec<String>,
    pub expo: Vec<String>,
    /// Tokens found through a user lookup, keyed by owner.
    pub owners: BTreeMap<String, Vec<String>>,
}

impl ResolvedTargets {
    pub fn is_empty(&self) -> bool {
        self.fcm.is_empty() && self.expo.is_empty()
    }

    pub fn is_owned(&self, token: &str) -> bool {
        self.owners.values().any(|tokens| tokens.iter().any(|t| t == token))
    }
}

#[derive(Default)]
struct Collector {
    seen: HashSet<String>,
    resolved: ResolvedTargets,
}

impl Collector {
    fn push(&mut self, token: String, family: TokenFamily) {
        if !self.seen.insert(token.clone()) {
            return;
        }
        match family {
            TokenFamily::Fcm => self.resolved.fcm.push(token),
            TokenFamily::Expo => self.resolved.expo.push(token),
        }
    }
}

/// Turns request targets into per-family token lists.
///
/// Direct tokens are classified by format. User ids are merged, deduplicated,
/// and looked up in chunks of [`USER_QUERY_BATCH`]; a failing chunk is logged
/// and skipped so the remaining users still resolve.
pub async fn resolve_targets(store: &dyn TokenStore, targets: &[Target]) -> ResolvedTargets {
    let mut collector = Collector::default();
    let mut user_ids: Vec<String> = Vec::new();
    let mut seen_users: HashSet<String> = HashSet::new();

    for target in targets {
        match target {
            Target::Tokens(tokens) => {
                for token in tokens.iter().filter(|t| !t.trim().is_empty()) {
                    collector.push(token.clone(), classify_token(token));
                }
            }
            Target::User(id) => {
                if !id.trim().is_empty() && seen_users.insert(id.clone()) {
                    user_ids.push(id.clone());
                }
            }
            Target::Users(ids) => {
                for id in ids.iter().filter(|id| !id.trim().is_empty()) {
                    if seen_users.insert(id.clone()) {
                        user_ids.push(id.clone());
                    }
                }
            }
        }
    }

    for chunk in user_ids.chunks(USER_QUERY_BATCH) {
        let tokens = match store.active_tokens_for_users(chunk).await {
            Ok(tokens) => tokens,
            Err(e) => {
                tracing::warn!("Token lookup failed for {} users, skipping batch: {}", chunk.len(), e);
                continue;
            }
        };

        for device_token in tokens.into_iter().filter(|t| t.is_active) {
            collector
                .resolved
                .owners
                .entry(device_token.user_id.clone())
                .or_default()
                .push(device_token.token.clone());
            collector.push(device_token.token, device_token.token_type);
        }
    }

    let resolved = collector.resolved;
    tracing::debug!(
        "Resolved {} users into {} FCM and {} Expo tokens",
        user_ids.len(),
        resolved.fcm.len(),
        resolved.expo.len()
    );
    resolved
}
