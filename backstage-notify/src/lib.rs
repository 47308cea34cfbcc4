pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod request;
pub mod resolve;

pub use dispatcher::{DispatchStats, Dispatcher, Reactivation};
pub use error::DispatchError;
pub use request::{NotificationPayload, RegisterToken, SendRequest, Target};
pub use resolve::{resolve_targets, ResolvedTargets};

#[cfg(test)]
mod tests;
