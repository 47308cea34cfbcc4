use crate::types::TokenFamily;

const EXPO_PREFIXES: &[&str] = &["ExponentPushToken[", "ExpoPushToken["];

/// Infer the provider family of a raw token from its string format.
///
/// Expo tokens use a bracketed prefix; anything else is treated as an FCM
/// registration token. This is format sniffing, so it only applies where no
/// stored `token_type` exists (tokens supplied directly in a send request, or
/// legacy rows registered without a type).
pub fn classify_token(token: &str) -> TokenFamily {
    if EXPO_PREFIXES.iter().any(|prefix| token.starts_with(prefix)) {
        TokenFamily::Expo
    } else {
        TokenFamily::Fcm
    }
}

/// Whether a token is well formed for the Expo relay.
pub fn is_valid_expo_token(token: &str) -> bool {
    EXPO_PREFIXES.iter().any(|prefix| {
        token
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_suffix(']'))
            .map(|inner| !inner.is_empty())
            .unwrap_or(false)
    })
}
