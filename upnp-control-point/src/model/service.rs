use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Action, Device, DeviceContext, StateVariable};
use crate::description::resolve_url;
use crate::error::{ControlPointError, Result};

/// A service of a device, with its SCPD actions and state table.
pub struct Service {
    pub(crate) device: Weak<Device>,
    pub(crate) service_type: String,
    pub(crate) service_id: String,
    pub(crate) scpd_url: String,
    pub(crate) control_url: String,
    pub(crate) event_sub_url: String,
    pub(crate) description: String,
    pub(crate) actions: Vec<Arc<Action>>,
    pub(crate) state_variables: Vec<StateVariable>,
    pub(crate) subscription_id: Mutex<Option<String>>,
    pub(crate) context: Arc<DeviceContext>,
}

impl Service {
    pub fn device(&self) -> Option<Arc<Device>> {
        self.device.upgrade()
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    pub fn scpd_url(&self) -> &str {
        &self.scpd_url
    }

    pub fn control_url(&self) -> &str {
        &self.control_url
    }

    pub fn event_sub_url(&self) -> &str {
        &self.event_sub_url
    }

    /// Raw SCPD XML
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn actions(&self) -> &[Arc<Action>] {
        &self.actions
    }

    pub fn state_variables(&self) -> &[StateVariable] {
        &self.state_variables
    }

    pub fn find_action(&self, name: &str) -> Option<Arc<Action>> {
        self.actions.iter().find(|action| action.name() == name).cloned()
    }

    pub fn find_state_variable(&self, name: &str) -> Option<&StateVariable> {
        self.state_variables.iter().find(|variable| variable.name == name)
    }

    /// SID of the active subscription, if any
    pub fn subscription_id(&self) -> Option<String> {
        self.subscription_id.lock().clone()
    }

    pub(crate) fn set_subscription_id(&self, sid: Option<String>) {
        *self.subscription_id.lock() = sid;
    }

    /// Clear the SID only if it is still `sid`
    pub(crate) fn clear_subscription_id(&self, sid: &str) {
        let mut current = self.subscription_id.lock();
        if current.as_deref() == Some(sid) {
            *current = None;
        }
    }

    /// Resolve a URL from the description against the device base URL
    pub fn absolute_url(&self, relative: &str) -> Result<String> {
        let device = self.device().ok_or(ControlPointError::Unavailable("device"))?;
        resolve_url(&device.base_url(), relative, device.scope_id())
    }

    pub fn control_url_absolute(&self) -> Result<String> {
        self.absolute_url(&self.control_url)
    }

    pub fn event_sub_url_absolute(&self) -> Result<String> {
        self.absolute_url(&self.event_sub_url)
    }

    /// Subscribe to this service's events, or renew if already subscribed.
    ///
    /// With `keep_renew` the subscription is renewed in the background until
    /// unsubscribed or the device is lost. Blocks on the HTTP request.
    pub fn subscribe(self: &Arc<Self>, keep_renew: bool) -> bool {
        match self.context.subscriptions.upgrade() {
            Some(manager) => manager.subscribe(self, keep_renew),
            None => false,
        }
    }

    pub fn renew_subscribe(self: &Arc<Self>) -> bool {
        match self.context.subscriptions.upgrade() {
            Some(manager) => manager.renew(self),
            None => false,
        }
    }

    pub fn unsubscribe(self: &Arc<Self>) -> bool {
        match self.context.subscriptions.upgrade() {
            Some(manager) => manager.unsubscribe(self),
            None => false,
        }
    }

    /// [`Service::subscribe`] on the IO lane; `on_complete` runs on the
    /// callback lane. Returns false if the work could not be queued.
    pub fn subscribe_async<F>(self: &Arc<Self>, keep_renew: bool, on_complete: F) -> bool
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.run_async(move |service| service.subscribe(keep_renew), on_complete)
    }

    pub fn renew_subscribe_async<F>(self: &Arc<Self>, on_complete: F) -> bool
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.run_async(|service| service.renew_subscribe(), on_complete)
    }

    pub fn unsubscribe_async<F>(self: &Arc<Self>, on_complete: F) -> bool
    where
        F: FnOnce(bool) + Send + 'static,
    {
        self.run_async(|service| service.unsubscribe(), on_complete)
    }

    fn run_async<W, F>(self: &Arc<Self>, work: W, on_complete: F) -> bool
    where
        W: FnOnce(&Arc<Service>) -> bool + Send + 'static,
        F: FnOnce(bool) + Send + 'static,
    {
        let service = self.clone();
        let executor = self.context.executor.clone();
        self.context.executor.io(move || {
            let result = work(&service);
            executor.callback(move || on_complete(result));
        })
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("service_type", &self.service_type)
            .field("service_id", &self.service_id)
            .field("subscription_id", &self.subscription_id())
            .finish()
    }
}
