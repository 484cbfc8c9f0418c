//! # upnp-control-point
//!
//! A UPnP control point: discovers devices over SSDP, keeps a live registry
//! of them, fetches their descriptions, invokes their actions and manages
//! GENA event subscriptions.
//!
//! Work runs on two lanes. Description fetches and GENA/SOAP requests run
//! on a pool of IO threads; every listener callback runs on one callback
//! thread, so application code observes discovery, loss and events in a
//! single total order and is never called concurrently.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use upnp_control_point::{ControlPoint, ControlPointConfig, Device, DiscoveryListener};
//!
//! struct Printer;
//!
//! impl DiscoveryListener for Printer {
//!     fn on_discover(&self, device: &Arc<Device>) {
//!         println!("found {} at {}", device.friendly_name(), device.location());
//!     }
//!
//!     fn on_lost(&self, device: &Arc<Device>) {
//!         println!("lost {}", device.friendly_name());
//!     }
//! }
//!
//! let control_point = ControlPoint::new(ControlPointConfig::default())?;
//! control_point.add_discovery_listener(Arc::new(Printer));
//! control_point.start()?;
//! control_point.search(None)?;
//! ```

pub mod address;
pub mod config;
pub mod description;
mod engine;
pub mod error;
pub mod executor;
mod listener;
mod loader;
pub mod logging;
pub mod model;
mod registry;
pub mod subscription;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use address::{needs_update, Protocol};
pub use config::ControlPointConfig;
pub use description::{DescriptionFetcher, HttpDescriptionFetcher};
pub use engine::{ControlPoint, ControlPointBuilder, LifecycleState, SsdpMessageFilter};
pub use error::{BuildError, ControlPointError, DescriptionError, FetchError, Result};
pub use listener::{DiscoveryListener, EventListener, NotifyEventListener};
pub use model::{Action, Argument, Device, Direction, Icon, IconFilter, Service, StateVariable};
pub use registry::DeviceRegistry;
pub use subscription::{parse_timeout, SubscriptionManager};
pub use transport::{
    ActionInvoker, CallbackEventReceiver, EventTransport, SsdpMessageSink, SsdpNetwork, SsdpTransport,
    SubscriptionTransport,
};

pub use callback_server::{Notification, NotificationHandler};
pub use upnp_http::{GenaResponse, HttpClient, HttpError};
pub use upnp_ssdp::{Nts, SsdpMessage};
