//! Immutable device model built from description documents.
//!
//! A root [`Device`] owns its embedded devices and [`Service`]s through
//! `Arc`; children refer back to their parent with `Weak`, so dropping the
//! root releases the whole tree.

mod action;
mod device;
pub(crate) mod icon;
mod service;
mod state_variable;

use std::sync::{Arc, Weak};

pub use action::{Action, Argument, Direction};
pub use device::Device;
pub use icon::{Icon, IconFilter};
pub use service::Service;
pub use state_variable::{AllowedValueRange, StateVariable};

use crate::executor::TaskExecutor;
use crate::subscription::SubscriptionManager;
use crate::transport::ActionInvoker;

/// Engine collaborators reachable from every model object.
pub(crate) struct DeviceContext {
    pub(crate) subscriptions: Weak<SubscriptionManager>,
    pub(crate) invoker: Arc<dyn ActionInvoker>,
    pub(crate) executor: Arc<TaskExecutor>,
}
