use backstage_core::{classify_token, Platform, TokenFamily, TokenRegistration};
use backstage_delivery::{Priority, PushNotification};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::DispatchError;

/// Who a notification is addressed to. A request may combine several forms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    User(String),
    Users(Vec<String>),
    Tokens(Vec<String>),
}

impl Target {
    fn is_empty(&self) -> bool {
        match self {
            Target::User(id) => id.trim().is_empty(),
            Target::Users(ids) => ids.is_empty(),
            Target::Tokens(tokens) => tokens.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub image_url: Option<String>,
    pub data: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendRequest {
    pub targets: Vec<Target>,
    pub notification: NotificationPayload,
    pub priority: Priority,
    pub android: Option<Value>,
    pub apns: Option<Value>,
}

impl SendRequest {
    pub fn new(targets: Vec<Target>, notification: NotificationPayload) -> Self {
        Self {
            targets,
            notification,
            priority: Priority::default(),
            android: None,
            apns: None,
        }
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.notification.title.trim().is_empty() || self.notification.body.trim().is_empty() {
            return Err(DispatchError::Validation(
                "notification.title and notification.body are required".into(),
            ));
        }
        if self.targets.iter().all(Target::is_empty) {
            return Err(DispatchError::Validation(
                "one of userId, userIds or tokens is required".into(),
            ));
        }
        Ok(())
    }

    pub(crate) fn push_notification(&self) -> PushNotification {
        PushNotification {
            title: self.notification.title.clone(),
            body: self.notification.body.clone(),
            image_url: self.notification.image_url.clone(),
            data: self.notification.data.clone(),
            priority: self.priority,
        }
    }
}

/// Device registration as submitted by a client; the token family is
/// derived from the token format when not given.
#[derive(Debug, Clone)]
pub struct RegisterToken {
    pub user_id: String,
    pub device_id: String,
    pub token: String,
    pub platform: Platform,
    pub token_type: Option<TokenFamily>,
}

impl RegisterToken {
    pub(crate) fn into_registration(self) -> Result<TokenRegistration, DispatchError> {
        for (field, value) in [
            ("userId", &self.user_id),
            ("deviceId", &self.device_id),
            ("token", &self.token),
        ] {
            if value.trim().is_empty() {
                return Err(DispatchError::Validation(format!("{} is required", field)));
            }
        }

        let token_type = self
            .token_type
            .unwrap_or_else(|| classify_token(&self.token));

        Ok(TokenRegistration {
            user_id: self.user_id,
            device_id: self.device_id,
            token: self.token,
            platform: self.platform,
            token_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(title: &str, body: &str) -> NotificationPayload {
        NotificationPayload {
            title: title.into(),
            body: body.into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_missing_title_or_body_is_rejected() {
        let targets = vec![Target::User("u1".into())];
        assert!(matches!(
            SendRequest::new(targets.clone(), payload("", "body")).validate(),
            Err(DispatchError::Validation(_))
        ));
        assert!(matches!(
            SendRequest::new(targets, payload("title", "   ")).validate(),
            Err(DispatchError::Validation(_))
        ));
    }

    #[test]
    fn test_request_needs_a_target_form() {
        let request = SendRequest::new(vec![], payload("t", "b"));
        assert!(request.validate().is_err());

        let request = SendRequest::new(vec![Target::Users(vec![]), Target::Tokens(vec![])], payload("t", "b"));
        assert!(request.validate().is_err());

        let request = SendRequest::new(vec![Target::Tokens(vec!["tok".into()])], payload("t", "b"));
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_registration_classifies_missing_type() {
        let registration = RegisterToken {
            user_id: "u1".into(),
            device_id: "pixel-8".into(),
            token: "ExponentPushToken[xyz]".into(),
            platform: Platform::Android,
            token_type: None,
        }
        .into_registration()
        .unwrap();
        assert_eq!(registration.token_type, TokenFamily::Expo);

        let registration = RegisterToken {
            user_id: "u1".into(),
            device_id: "pixel-8".into(),
            token: "ExponentPushToken[xyz]".into(),
            platform: Platform::Android,
            token_type: Some(TokenFamily::Fcm),
        }
        .into_registration()
        .unwrap();
        assert_eq!(registration.token_type, TokenFamily::Fcm);
    }

    #[test]
    fn test_registration_requires_device() {
        let result = RegisterToken {
            user_id: "u1".into(),
            device_id: "".into(),
            token: "abc".into(),
            platform: Platform::Web,
            token_type: None,
        }
        .into_registration();
        assert!(matches!(result, Err(DispatchError::Validation(msg)) if msg.contains("deviceId")));
    }
}
