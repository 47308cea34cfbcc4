pub mod expo;
pub mod fcm;
pub mod provider;
pub mod service_account;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use expo::ExpoRelay;
pub use fcm::FcmGateway;
pub use provider::{
    GatewayError, GatewayErrorCode, MulticastMessage, MulticastResponse, Priority, ProviderResult,
    PushGateway, PushNotification, PushRelay, RelayMessage, RelayTicket, SendResponse, TicketDetails,
    TicketStatus, EXPO_MAX_BATCH,
};
