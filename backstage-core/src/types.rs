use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum stored as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::Validation(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Ios,
    Android,
}

text_enum!(Platform { Web => "web", Ios => "ios", Android => "android" });

/// Delivery-provider protocol a device token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenFamily {
    /// Firebase Cloud Messaging registration token.
    Fcm,
    /// Expo push token, `ExponentPushToken[...]`.
    Expo,
}

text_enum!(TokenFamily { Fcm => "fcm", Expo => "expo" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceToken {
    pub token: String,
    pub user_id: String,
    pub device_id: String,
    pub platform: Platform,
    pub token_type: TokenFamily,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A client registering (or re-registering) its push endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRegistration {
    pub user_id: String,
    pub device_id: String,
    pub token: String,
    pub platform: Platform,
    pub token_type: TokenFamily,
}

/// Token entries to flip inactive in one commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeactivationBatch {
    /// `(user_id, tokens)`; only these entries of each user are touched.
    pub by_owner: Vec<(String, Vec<String>)>,
    /// Invalid tokens with no known owner, deactivated wherever stored.
    pub unowned: Vec<String>,
}

impl DeactivationBatch {
    pub fn is_empty(&self) -> bool {
        self.by_owner.iter().all(|(_, tokens)| tokens.is_empty()) && self.unowned.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
    Closed,
}

text_enum!(ConversationStatus { Active => "active", Archived => "archived", Closed => "closed" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub operator_id: String,
    pub client_id: String,
    pub status: ConversationStatus,
    /// Unread counter per participant id.
    pub unread: HashMap<String, i64>,
    pub last_message_text: Option<String>,
    pub last_message_sender: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Joins the ordered participant pair of a conversation id.
pub const ID_SEPARATOR: char = ':';

impl Conversation {
    /// Deterministic id for a participant pair. Unambiguous only when neither
    /// id contains [`ID_SEPARATOR`].
    pub fn id_for(a: &str, b: &str) -> String {
        let (p1, p2) = if a < b { (a, b) } else { (b, a) };
        format!("{}{}{}", p1, ID_SEPARATOR, p2)
    }

    pub fn is_participant(&self, user_id: &str) -> bool {
        self.operator_id == user_id || self.client_id == user_id
    }

    /// The other party of the thread, `None` when `user_id` is not a participant.
    pub fn counterpart(&self, user_id: &str) -> Option<&str> {
        if self.operator_id == user_id {
            Some(&self.client_id)
        } else if self.client_id == user_id {
            Some(&self.operator_id)
        } else {
            None
        }
    }

    pub fn unread_for(&self, user_id: &str) -> i64 {
        self.unread.get(user_id).copied().unwrap_or(0).max(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    Operator,
    Client,
    System,
}

text_enum!(SenderRole { Operator => "operator", Client => "client", System => "system" });

/// Delivery state of a message. Ordered: a status only ever moves to a greater one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

text_enum!(MessageStatus { Sent => "sent", Delivered => "delivered", Read => "read" });

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub sender_role: SenderRole,
    pub text: String,
    pub status: MessageStatus,
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(conversation_id: &str, sender_id: &str, sender_role: SenderRole, text: &str) -> Self {
        Message {
            id: uuid::Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: sender_id.to_string(),
            sender_role,
            text: text.to_string(),
            status: MessageStatus::Sent,
            is_system: sender_role == SenderRole::System,
            created_at: Utc::now(),
        }
    }

    pub fn system(conversation_id: &str, text: &str) -> Self {
        Message::new(conversation_id, "system", SenderRole::System, text)
    }
}
