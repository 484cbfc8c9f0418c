//! GENA subscription bookkeeping, renewal and event dispatch.

mod manager;
mod timeout;

pub use manager::{SubscriptionInfo, SubscriptionManager};
pub use timeout::{parse_timeout, DEFAULT_SUBSCRIPTION_TIMEOUT};
