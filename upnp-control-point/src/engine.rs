//! The control point: lifecycle, discovery and device management.

use std::fmt;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::Instant;

use callback_server::NotificationHandler;
use parking_lot::{Mutex, RwLock};
use upnp_http::HttpClient;
use upnp_ssdp::{SsdpMessage, DEFAULT_MAX_AGE};

use crate::address::{local_address_for, needs_update, url_host_ip};
use crate::config::ControlPointConfig;
use crate::description::{DescriptionFetcher, HttpDescriptionFetcher};
use crate::error::{ControlPointError, Result};
use crate::executor::{TaskExecutor, Ticker};
use crate::listener::{DiscoveryListener, EventListener, ListenerSet, NotifyEventListener};
use crate::loader::LoadCoordinator;
use crate::model::{Device, DeviceContext, IconFilter};
use crate::registry::{DeviceRegistry, RegistryState};
use crate::subscription::SubscriptionManager;
use crate::transport::{
    ActionInvoker, CallbackEventReceiver, EventTransport, SsdpMessageSink, SsdpNetwork, SsdpTransport,
    SubscriptionTransport,
};

/// Decides which received SSDP messages are processed; the default accepts all
pub type SsdpMessageFilter = Arc<dyn Fn(&SsdpMessage) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    Started,
    Stopped,
    Terminated,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Initialized => "initialized",
            LifecycleState::Started => "started",
            LifecycleState::Stopped => "stopped",
            LifecycleState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Assembles a [`ControlPoint`], substituting any of its network seams.
///
/// Transports that are not set use the real network.
pub struct ControlPointBuilder {
    config: ControlPointConfig,
    ssdp: Option<Arc<dyn SsdpTransport>>,
    events: Option<Arc<dyn EventTransport>>,
    fetcher: Option<Arc<dyn DescriptionFetcher>>,
    subscriptions: Option<Arc<dyn SubscriptionTransport>>,
    invoker: Option<Arc<dyn ActionInvoker>>,
}

impl ControlPointBuilder {
    pub fn new(config: ControlPointConfig) -> Self {
        Self {
            config,
            ssdp: None,
            events: None,
            fetcher: None,
            subscriptions: None,
            invoker: None,
        }
    }

    pub fn ssdp_transport(mut self, transport: Arc<dyn SsdpTransport>) -> Self {
        self.ssdp = Some(transport);
        self
    }

    pub fn event_transport(mut self, transport: Arc<dyn EventTransport>) -> Self {
        self.events = Some(transport);
        self
    }

    pub fn description_fetcher(mut self, fetcher: Arc<dyn DescriptionFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn subscription_transport(mut self, transport: Arc<dyn SubscriptionTransport>) -> Self {
        self.subscriptions = Some(transport);
        self
    }

    pub fn action_invoker(mut self, invoker: Arc<dyn ActionInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn build(self) -> Result<ControlPoint> {
        let config = self.config;
        config.validate()?;

        let http = Arc::new(HttpClient::with_timeouts(
            config.http_connect_timeout,
            config.http_read_timeout,
        ));
        let executor = Arc::new(TaskExecutor::new(config.io_workers)?);

        let subscription_transport: Arc<dyn SubscriptionTransport> = match self.subscriptions {
            Some(transport) => transport,
            None => http.clone(),
        };
        let invoker: Arc<dyn ActionInvoker> = match self.invoker {
            Some(invoker) => invoker,
            None => http,
        };
        let fetcher: Arc<dyn DescriptionFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(HttpDescriptionFetcher::new(
                config.http_connect_timeout,
                config.http_connect_timeout + config.http_read_timeout,
            )?),
        };
        let ssdp: Arc<dyn SsdpTransport> = match self.ssdp {
            Some(ssdp) => ssdp,
            None => Arc::new(SsdpNetwork::for_protocol(config.protocol, config.search_mx)),
        };
        let events: Arc<dyn EventTransport> = match self.events {
            Some(events) => events,
            None => Arc::new(CallbackEventReceiver::for_protocol(config.protocol, config.event_port_range)),
        };

        let subscriptions = SubscriptionManager::new(
            executor.clone(),
            subscription_transport,
            config.subscription_timeout,
            config.renewal_check_interval,
        );
        let context = Arc::new(DeviceContext {
            subscriptions: Arc::downgrade(&subscriptions),
            invoker,
            executor: executor.clone(),
        });

        Ok(ControlPoint {
            inner: Arc::new(Inner {
                loader: LoadCoordinator::new(fetcher, context),
                config,
                state: Mutex::new(LifecycleState::Uninitialized),
                executor,
                registry: DeviceRegistry::new(),
                subscriptions,
                discovery_listeners: ListenerSet::new(),
                ssdp_filter: RwLock::new(None),
                ssdp,
                events,
                expiration: Mutex::new(None),
            }),
        })
    }
}

/// A UPnP control point.
///
/// Discovers devices over SSDP, keeps them in a registry while they keep
/// announcing themselves, and manages GENA subscriptions to their services.
/// Listener callbacks are delivered one at a time on a dedicated thread.
///
/// ```rust,ignore
/// let control_point = ControlPoint::new(ControlPointConfig::default())?;
/// control_point.add_discovery_listener(Arc::new(MyListener));
/// control_point.start()?;
/// control_point.search(None)?;
/// ```
pub struct ControlPoint {
    inner: Arc<Inner>,
}

struct Inner {
    config: ControlPointConfig,
    state: Mutex<LifecycleState>,
    executor: Arc<TaskExecutor>,
    registry: DeviceRegistry,
    loader: LoadCoordinator,
    subscriptions: Arc<SubscriptionManager>,
    discovery_listeners: ListenerSet<dyn DiscoveryListener>,
    ssdp_filter: RwLock<Option<SsdpMessageFilter>>,
    ssdp: Arc<dyn SsdpTransport>,
    events: Arc<dyn EventTransport>,
    expiration: Mutex<Option<Ticker>>,
}

impl ControlPoint {
    /// Control point on the real network
    pub fn new(config: ControlPointConfig) -> Result<Self> {
        ControlPointBuilder::new(config).build()
    }

    pub fn builder(config: ControlPointConfig) -> ControlPointBuilder {
        ControlPointBuilder::new(config)
    }

    pub fn state(&self) -> LifecycleState {
        *self.inner.state.lock()
    }

    pub fn config(&self) -> &ControlPointConfig {
        &self.inner.config
    }

    pub fn initialize(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match *state {
            LifecycleState::Uninitialized => {
                *state = LifecycleState::Initialized;
                tracing::debug!("control point initialized");
                Ok(())
            }
            LifecycleState::Terminated => Err(ControlPointError::InvalidState {
                operation: "initialize",
                state: *state,
            }),
            _ => Ok(()),
        }
    }

    /// Open the sockets and start the timers, initializing first if needed
    pub fn start(&self) -> Result<()> {
        let mut state = self.inner.state.lock();
        match *state {
            LifecycleState::Started => return Ok(()),
            LifecycleState::Terminated => {
                return Err(ControlPointError::InvalidState {
                    operation: "start",
                    state: *state,
                })
            }
            _ => {}
        }

        let handler: Arc<dyn NotificationHandler> = self.inner.subscriptions.clone();
        let port = self.inner.events.start(handler)?;
        if let Err(e) = self.inner.subscriptions.start(port) {
            self.inner.events.stop();
            return Err(e);
        }

        let weak = Arc::downgrade(&self.inner);
        let sink: SsdpMessageSink = Arc::new(move |message| Inner::hand_off(&weak, message));
        if let Err(e) = self.inner.ssdp.start(sink) {
            self.inner.subscriptions.stop();
            self.inner.events.stop();
            return Err(e);
        }

        let weak = Arc::downgrade(&self.inner);
        let ticker = Ticker::start("upnp-expiration", self.inner.config.expiration_check_interval, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove_expired_devices(Instant::now());
            }
        });
        match ticker {
            Ok(ticker) => *self.inner.expiration.lock() = Some(ticker),
            Err(e) => {
                self.inner.ssdp.stop();
                self.inner.subscriptions.stop();
                self.inner.events.stop();
                return Err(e.into());
            }
        }

        *state = LifecycleState::Started;
        tracing::info!(event_port = port, "control point started");
        Ok(())
    }

    /// Close the sockets and lose every device
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        if *state == LifecycleState::Started {
            self.inner.stop_locked();
            *state = LifecycleState::Stopped;
            tracing::info!("control point stopped");
        }
    }

    /// Stop if running and shut down the task lanes. Final.
    pub fn terminate(&self) {
        let mut state = self.inner.state.lock();
        match *state {
            LifecycleState::Terminated => return,
            LifecycleState::Started => self.inner.stop_locked(),
            _ => {}
        }
        *state = LifecycleState::Terminated;
        drop(state);

        self.inner.executor.terminate();
        tracing::info!("control point terminated");
    }

    /// Send an M-SEARCH for `search_target`, `ssdp:all` by default
    pub fn search(&self, search_target: Option<&str>) -> Result<()> {
        let state = self.state();
        if state != LifecycleState::Started {
            return Err(ControlPointError::InvalidState {
                operation: "search",
                state,
            });
        }
        let search_target = search_target.unwrap_or(self.inner.config.default_search_target.as_str());
        tracing::debug!(search_target, "sending M-SEARCH");
        self.inner.ssdp.search(search_target)
    }

    /// `None` restores the accept-all default
    pub fn set_ssdp_message_filter(&self, filter: Option<SsdpMessageFilter>) {
        *self.inner.ssdp_filter.write() = filter;
    }

    /// `None` restores the default of downloading no icons
    pub fn set_icon_filter(&self, filter: Option<IconFilter>) {
        self.inner.loader.set_icon_filter(filter);
    }

    pub fn add_discovery_listener(&self, listener: Arc<dyn DiscoveryListener>) -> bool {
        self.inner.discovery_listeners.add(listener)
    }

    pub fn remove_discovery_listener(&self, listener: &Arc<dyn DiscoveryListener>) -> bool {
        self.inner.discovery_listeners.remove(listener)
    }

    pub fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        self.inner.subscriptions.add_event_listener(listener)
    }

    pub fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        self.inner.subscriptions.remove_event_listener(listener)
    }

    pub fn add_notify_event_listener(&self, listener: Arc<dyn NotifyEventListener>) -> bool {
        self.inner.subscriptions.add_notify_event_listener(listener)
    }

    pub fn remove_notify_event_listener(&self, listener: &Arc<dyn NotifyEventListener>) -> bool {
        self.inner.subscriptions.remove_notify_event_listener(listener)
    }

    /// Root device owning `udn`, which may be the UDN of an embedded device
    pub fn device(&self, udn: &str) -> Option<Arc<Device>> {
        self.inner.registry.get(udn)
    }

    pub fn device_list(&self) -> Vec<Arc<Device>> {
        self.inner.registry.devices()
    }

    pub fn device_list_size(&self) -> usize {
        self.inner.registry.len()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.inner.registry
    }

    pub fn subscriptions(&self) -> &Arc<SubscriptionManager> {
        &self.inner.subscriptions
    }

    /// Feed a message from an application-owned SSDP listener.
    ///
    /// The message filter applies. Blocks only for the registry lock;
    /// description loads run on the IO lane.
    pub fn on_receive_ssdp_message(&self, message: SsdpMessage) {
        self.inner.on_receive_ssdp_message(message);
    }

    /// Discover a device as if it had announced itself, bypassing the filter
    pub fn try_add_device(&self, uuid: &str, location: &str) {
        let uuid = if uuid.starts_with("uuid:") {
            uuid.to_string()
        } else {
            format!("uuid:{uuid}")
        };
        let mut message = SsdpMessage::alive(uuid, location, DEFAULT_MAX_AGE);
        message.local_address = route_to(location);
        self.inner.handle_ssdp_message(message);
    }

    /// Load the device at `location` and keep it until explicitly removed.
    ///
    /// A pinned device ignores byebye and never expires.
    pub fn try_add_pinned_device(&self, location: &str) {
        self.inner.try_add_pinned_device(location);
    }

    /// Cancel a pending pinned load, or lose the pinned device at `location`
    pub fn remove_pinned_device(&self, location: &str) {
        self.inner.remove_pinned_device(location);
    }

    /// Lose every registered device
    pub fn clear_device_list(&self) {
        let mut registry = self.inner.registry.lock();
        for device in registry.roots() {
            self.inner.lost_device(&mut registry, &device);
        }
    }
}

impl Drop for ControlPoint {
    fn drop(&mut self) {
        self.terminate();
    }
}

impl Inner {
    /// Network thread entry: move the message onto the IO lane
    fn hand_off(weak: &Weak<Inner>, message: SsdpMessage) {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        let task_inner = inner.clone();
        if !inner.executor.io(move || task_inner.on_receive_ssdp_message(message)) {
            tracing::trace!("dropping SSDP message, executor shut down");
        }
    }

    fn on_receive_ssdp_message(self: &Arc<Self>, message: SsdpMessage) {
        let filter = self.ssdp_filter.read().clone();
        if let Some(filter) = filter {
            if !filter(&message) {
                tracing::trace!(uuid = %message.uuid, "SSDP message filtered out");
                return;
            }
        }
        self.handle_ssdp_message(message);
    }

    fn handle_ssdp_message(self: &Arc<Self>, message: SsdpMessage) {
        let mut registry = self.registry.lock();

        if let Some(device) = registry.get(&message.uuid) {
            if message.is_byebye() {
                if device.is_pinned() {
                    tracing::debug!(udn = device.udn(), "ignoring byebye for pinned device");
                } else {
                    self.lost_device(&mut registry, &device);
                }
            } else if !device.is_pinned() {
                let current = device.ssdp_message();
                if needs_update(&current, &message, self.config.protocol) {
                    tracing::trace!(udn = device.udn(), from = %message.uuid, "refreshing SSDP message");
                    let mut message = message;
                    // announcements of embedded devices refresh the root's entry
                    message.uuid = current.uuid;
                    message.usn = current.usn;
                    device.update_ssdp_message(message);
                }
            }
            return;
        }

        let uuid = message.uuid.clone();
        if message.is_byebye() {
            if registry.cancel_loading(&uuid) {
                tracing::debug!(%uuid, "byebye during load, abandoning");
            }
            return;
        }

        if let Some(entry) = registry.loading_mut(&uuid) {
            if needs_update(&entry.message, &message, self.config.protocol) {
                entry.message = message;
            }
            return;
        }

        let token = self.registry.next_token();
        registry.begin_loading(uuid.clone(), token, message.clone());
        let inner = self.clone();
        if !self.executor.io(move || inner.load_device(message, token)) {
            registry.cancel_loading(&uuid);
            tracing::debug!(%uuid, "executor shut down, load not started");
        }
    }

    fn load_device(self: &Arc<Self>, message: SsdpMessage, token: u64) {
        let uuid = message.uuid.clone();
        let loaded = self.loader.load(&message);

        let mut registry = self.registry.lock();
        let device = match loaded {
            Ok(device) => device,
            Err(e) => {
                registry.finish_loading(&uuid, token);
                tracing::warn!(%uuid, location = ?message.location, error = %e, "failed to load device");
                return;
            }
        };

        let Some(latest) = registry.finish_loading(&uuid, token) else {
            tracing::debug!(%uuid, "load superseded, discarding device");
            return;
        };
        if device.all_udns().iter().any(|udn| registry.get(udn).is_some()) {
            tracing::debug!(%uuid, "device already registered, discarding duplicate");
            return;
        }
        device.update_ssdp_message(latest);
        self.discover_device(&mut registry, device);
    }

    fn try_add_pinned_device(self: &Arc<Self>, location: &str) {
        let mut registry = self.registry.lock();
        if registry
            .find_by_location(location)
            .is_some_and(|device| device.is_pinned())
        {
            tracing::debug!(location, "pinned device already registered");
            return;
        }
        if registry.is_pinned_loading(location) {
            return;
        }

        let token = self.registry.next_token();
        registry.begin_pinned(location.to_string(), token);
        let message = SsdpMessage::pinned(location, route_to(location));
        let inner = self.clone();
        if !self.executor.io(move || inner.load_pinned_device(message, token)) {
            registry.cancel_pinned(location);
            tracing::debug!(location, "executor shut down, pinned load not started");
        }
    }

    fn load_pinned_device(self: &Arc<Self>, message: SsdpMessage, token: u64) {
        let location = message.location.clone().unwrap_or_default();
        let loaded = self.loader.load(&message);

        let mut registry = self.registry.lock();
        if !registry.finish_pinned(&location, token) {
            tracing::debug!(%location, "pinned load cancelled");
            return;
        }
        let device = match loaded {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(%location, error = %e, "failed to load pinned device");
                return;
            }
        };

        let mut replaced: Vec<Arc<Device>> = Vec::new();
        for udn in device.all_udns() {
            let Some(existing) = registry.get(&udn) else {
                continue;
            };
            if existing.is_pinned() {
                tracing::debug!(%udn, "device already pinned");
                return;
            }
            if !replaced.iter().any(|device| Arc::ptr_eq(device, &existing)) {
                replaced.push(existing);
            }
        }
        for existing in &replaced {
            tracing::debug!(udn = existing.udn(), "replacing discovered device with pinned one");
            self.lost_device(&mut registry, existing);
        }

        device.set_pinned(true);
        self.discover_device(&mut registry, device);
    }

    fn remove_pinned_device(&self, location: &str) {
        let mut registry = self.registry.lock();
        if registry.cancel_pinned(location) {
            tracing::debug!(location, "pinned load cancelled");
            return;
        }
        match registry.find_by_location(location) {
            Some(device) if device.is_pinned() => self.lost_device(&mut registry, &device),
            _ => tracing::debug!(location, "no pinned device at location"),
        }
    }

    fn discover_device(&self, registry: &mut RegistryState, device: Arc<Device>) {
        registry.insert(&device);
        tracing::info!(
            udn = device.udn(),
            friendly_name = device.friendly_name(),
            location = %device.location(),
            pinned = device.is_pinned(),
            "device discovered"
        );

        let listeners = self.discovery_listeners.clone();
        self.executor.callback(move || {
            for listener in listeners.snapshot() {
                listener.on_discover(&device);
            }
        });
    }

    fn lost_device(&self, registry: &mut RegistryState, device: &Arc<Device>) {
        self.subscriptions.unregister_device(device);
        registry.remove(device);
        tracing::info!(udn = device.udn(), friendly_name = device.friendly_name(), "device lost");

        let listeners = self.discovery_listeners.clone();
        let device = device.clone();
        self.executor.callback(move || {
            for listener in listeners.snapshot() {
                listener.on_lost(&device);
            }
        });
    }

    fn remove_expired_devices(&self, now: Instant) {
        let mut registry = self.registry.lock();
        for device in registry.expired(now, self.config.expiration_margin) {
            tracing::info!(udn = device.udn(), "device expired");
            self.lost_device(&mut registry, &device);
        }
    }

    /// Shared by stop and terminate; the lifecycle lock is held
    fn stop_locked(&self) {
        self.ssdp.stop();
        if let Some(ticker) = self.expiration.lock().take() {
            ticker.stop();
        }

        {
            let mut registry = self.registry.lock();
            registry.clear_loading();
            for device in registry.roots() {
                self.lost_device(&mut registry, &device);
            }
        }

        self.subscriptions.stop();
        self.events.stop();
    }
}

/// Local address routing to the host of `location`
fn route_to(location: &str) -> Option<IpAddr> {
    url_host_ip(location).and_then(local_address_for)
}
