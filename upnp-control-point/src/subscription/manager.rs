use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use callback_server::{Notification, NotificationHandler};
use parking_lot::{Mutex, RwLock};

use super::timeout::parse_timeout;
use crate::address::{local_address_for, url_host_ip};
use crate::error::Result;
use crate::executor::{TaskExecutor, Ticker};
use crate::listener::{EventListener, ListenerSet, NotifyEventListener};
use crate::model::{Device, Service};
use crate::transport::SubscriptionTransport;

struct Subscription {
    service: Arc<Service>,
    started_at: Instant,
    timeout: Duration,
    keep_renew: bool,
    renewing: bool,
}

impl Subscription {
    fn expires_at(&self) -> Instant {
        self.started_at + self.timeout
    }

    fn renew_at(&self) -> Instant {
        self.started_at + self.timeout / 2
    }
}

/// Snapshot of an active subscription
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionInfo {
    pub sid: String,
    pub timeout: Duration,
    pub expires_at: Instant,
    pub keep_renew: bool,
}

/// Owns every active GENA subscription of the control point.
///
/// Subscribe, renew and unsubscribe block on HTTP and are meant to run on
/// the IO lane. Incoming events are matched by SID and delivered to the
/// event listeners on the callback lane.
pub struct SubscriptionManager {
    me: Weak<SubscriptionManager>,
    executor: Arc<TaskExecutor>,
    transport: Arc<dyn SubscriptionTransport>,
    requested_timeout: Duration,
    renewal_check_interval: Duration,
    subscriptions: RwLock<HashMap<String, Subscription>>,
    callback_port: Mutex<Option<u16>>,
    renewal: Mutex<Option<Ticker>>,
    event_listeners: ListenerSet<dyn EventListener>,
    notify_listeners: ListenerSet<dyn NotifyEventListener>,
}

impl SubscriptionManager {
    pub(crate) fn new(
        executor: Arc<TaskExecutor>,
        transport: Arc<dyn SubscriptionTransport>,
        requested_timeout: Duration,
        renewal_check_interval: Duration,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            me: me.clone(),
            executor,
            transport,
            requested_timeout,
            renewal_check_interval,
            subscriptions: RwLock::new(HashMap::new()),
            callback_port: Mutex::new(None),
            renewal: Mutex::new(None),
            event_listeners: ListenerSet::new(),
            notify_listeners: ListenerSet::new(),
        })
    }

    /// Accept subscriptions with callbacks to `callback_port` and start the
    /// renewal scheduler
    pub(crate) fn start(&self, callback_port: u16) -> Result<()> {
        *self.callback_port.lock() = Some(callback_port);

        let mut renewal = self.renewal.lock();
        if renewal.is_none() {
            let me = self.me.clone();
            *renewal = Some(Ticker::start("upnp-renewal", self.renewal_check_interval, move || {
                if let Some(manager) = me.upgrade() {
                    manager.renew_due(Instant::now());
                }
            })?);
        }
        Ok(())
    }

    pub(crate) fn stop(&self) {
        *self.callback_port.lock() = None;
        if let Some(ticker) = self.renewal.lock().take() {
            ticker.stop();
        }
    }

    /// Subscribe `service`, or renew its subscription if it already has one.
    pub fn subscribe(&self, service: &Arc<Service>, keep_renew: bool) -> bool {
        if let Some(sid) = service.subscription_id() {
            if !self.renew(service) {
                return false;
            }
            if let Some(subscription) = self.subscriptions.write().get_mut(&sid) {
                subscription.keep_renew = keep_renew;
            }
            return true;
        }

        let url = match service.event_sub_url_absolute() {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(service_id = service.service_id(), error = %e, "cannot resolve event URL");
                return false;
            }
        };
        let Some(callback_url) = self.callback_url(service) else {
            tracing::warn!(
                service_id = service.service_id(),
                "no callback address available, is the control point started?"
            );
            return false;
        };

        let response = match self.transport.subscribe(&url, &callback_url, self.requested_timeout) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%url, error = %e, "SUBSCRIBE failed");
                return false;
            }
        };
        if response.status != 200 {
            tracing::warn!(%url, status = response.status, "SUBSCRIBE rejected");
            return false;
        }
        let Some(sid) = response.sid.filter(|sid| !sid.trim().is_empty()) else {
            tracing::warn!(%url, "SUBSCRIBE response without SID");
            return false;
        };
        let timeout = parse_timeout(response.timeout.as_deref());
        if timeout.is_zero() {
            tracing::warn!(%url, %sid, "SUBSCRIBE response with zero timeout");
            return false;
        }

        {
            let mut subscriptions = self.subscriptions.write();
            if !is_live(service) {
                drop(subscriptions);
                tracing::info!(%sid, service_id = service.service_id(), "device lost during SUBSCRIBE, cancelling");
                self.unsubscribe_in_background(url, sid);
                return false;
            }
            subscriptions.insert(
                sid.clone(),
                Subscription {
                    service: service.clone(),
                    started_at: Instant::now(),
                    timeout,
                    keep_renew,
                    renewing: false,
                },
            );
            // under the table lock so unregister_device always sees it
            service.set_subscription_id(Some(sid.clone()));
        }
        tracing::info!(%sid, service_id = service.service_id(), timeout_secs = timeout.as_secs(), "subscribed");
        true
    }

    /// Renew the current subscription of `service`.
    ///
    /// A failure leaves the registration in place.
    pub fn renew(&self, service: &Arc<Service>) -> bool {
        let Some(sid) = service.subscription_id() else {
            tracing::debug!(service_id = service.service_id(), "renew without subscription");
            return false;
        };
        let url = match service.event_sub_url_absolute() {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(%sid, error = %e, "cannot resolve event URL");
                return false;
            }
        };

        let response = match self.transport.renew(&url, &sid, self.requested_timeout) {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(%sid, error = %e, "RENEW failed");
                return false;
            }
        };
        if response.status != 200 {
            tracing::warn!(%sid, status = response.status, "RENEW rejected");
            return false;
        }
        if response.sid.as_deref().map(str::trim) != Some(sid.as_str()) {
            tracing::warn!(%sid, returned = ?response.sid, "RENEW returned a different SID");
            return false;
        }
        let timeout = parse_timeout(response.timeout.as_deref());
        if timeout.is_zero() {
            tracing::warn!(%sid, "RENEW response with zero timeout");
            return false;
        }

        let mut subscriptions = self.subscriptions.write();
        match subscriptions.get_mut(&sid) {
            Some(subscription) => {
                subscription.started_at = Instant::now();
                subscription.timeout = timeout;
            }
            None if !is_live(service) => {
                tracing::debug!(%sid, "device lost during RENEW, not registering");
                return false;
            }
            None => {
                subscriptions.insert(
                    sid.clone(),
                    Subscription {
                        service: service.clone(),
                        started_at: Instant::now(),
                        timeout,
                        keep_renew: false,
                        renewing: false,
                    },
                );
            }
        }
        tracing::debug!(%sid, timeout_secs = timeout.as_secs(), "renewed");
        true
    }

    /// Cancel the subscription of `service`.
    ///
    /// Local state is dropped whatever the device answers; the return value
    /// reports whether the device acknowledged with 200.
    pub fn unsubscribe(&self, service: &Arc<Service>) -> bool {
        let Some(sid) = service.subscription_id() else {
            return false;
        };
        let acknowledged = match service.event_sub_url_absolute() {
            Ok(url) => match self.transport.unsubscribe(&url, &sid) {
                Ok(response) => response.status == 200,
                Err(e) => {
                    tracing::warn!(%sid, error = %e, "UNSUBSCRIBE failed");
                    false
                }
            },
            Err(e) => {
                tracing::warn!(%sid, error = %e, "cannot resolve event URL");
                false
            }
        };

        self.subscriptions.write().remove(&sid);
        service.clear_subscription_id(&sid);
        tracing::info!(%sid, acknowledged, "unsubscribed");
        acknowledged
    }

    /// Forget every subscription of `device`'s tree and send best-effort
    /// UNSUBSCRIBE requests on the IO lane.
    ///
    /// The device is marked lost first, so a SUBSCRIBE still in flight
    /// cancels itself instead of registering afterwards.
    pub(crate) fn unregister_device(&self, device: &Device) {
        device.mark_lost();

        let mut cancelled = Vec::new();
        {
            let mut subscriptions = self.subscriptions.write();
            for service in device.all_services() {
                let Some(sid) = service.subscription_id() else {
                    continue;
                };
                subscriptions.remove(&sid);
                service.clear_subscription_id(&sid);
                if let Ok(url) = service.event_sub_url_absolute() {
                    cancelled.push((url, sid));
                }
            }
        }

        for (url, sid) in cancelled {
            self.unsubscribe_in_background(url, sid);
        }
    }

    fn unsubscribe_in_background(&self, url: String, sid: String) {
        let transport = self.transport.clone();
        self.executor.io(move || match transport.unsubscribe(&url, &sid) {
            Ok(response) => tracing::debug!(%sid, status = response.status, "unsubscribed lost device"),
            Err(e) => tracing::debug!(%sid, error = %e, "unsubscribe of lost device failed"),
        });
    }

    /// Deliver an incoming event. Returns false for an unknown SID.
    pub fn dispatch(&self, sid: &str, seq: u64, properties: Vec<(String, Option<String>)>) -> bool {
        let Some(service) = self
            .subscriptions
            .read()
            .get(sid)
            .map(|subscription| subscription.service.clone())
        else {
            tracing::debug!(sid, seq, "event for unknown subscription");
            return false;
        };

        let accepted: Vec<(String, String)> = properties
            .into_iter()
            .filter_map(|(name, value)| {
                let Some(variable) = service.find_state_variable(&name) else {
                    tracing::warn!(sid, variable = %name, "event for undeclared state variable");
                    return None;
                };
                if !variable.send_events {
                    tracing::warn!(sid, variable = %name, "event for non-evented state variable");
                    return None;
                }
                let Some(value) = value else {
                    tracing::warn!(sid, variable = %name, "event value is not text");
                    return None;
                };
                Some((name, value))
            })
            .collect();

        tracing::trace!(sid, seq, count = accepted.len(), "event accepted");
        if accepted.is_empty() {
            return true;
        }

        let event_listeners = self.event_listeners.clone();
        let notify_listeners = self.notify_listeners.clone();
        self.executor.callback(move || {
            for listener in event_listeners.snapshot() {
                listener.on_event(&service, seq, &accepted);
            }
            for listener in notify_listeners.snapshot() {
                for (name, value) in &accepted {
                    listener.on_notify_event(&service, seq, name, value);
                }
            }
        });
        true
    }

    /// One pass of the renewal scheduler
    pub(crate) fn renew_due(&self, now: Instant) {
        let mut due = Vec::new();
        {
            let mut subscriptions = self.subscriptions.write();
            subscriptions.retain(|sid, subscription| {
                if subscription.keep_renew || now < subscription.expires_at() {
                    return true;
                }
                tracing::info!(%sid, "subscription expired");
                subscription.service.clear_subscription_id(sid);
                false
            });

            for (sid, subscription) in subscriptions.iter_mut() {
                if subscription.keep_renew && !subscription.renewing && now >= subscription.renew_at() {
                    subscription.renewing = true;
                    due.push((sid.clone(), subscription.service.clone()));
                }
            }
        }

        for (sid, service) in due {
            let me = self.me.clone();
            let task_sid = sid.clone();
            let submitted = self.executor.io(move || {
                let Some(manager) = me.upgrade() else {
                    return;
                };
                if !manager.renew(&service) {
                    tracing::warn!(sid = %task_sid, "scheduled renewal failed, retrying next tick");
                }
                manager.finish_renewal(&task_sid);
            });
            if !submitted {
                self.finish_renewal(&sid);
            }
        }
    }

    fn finish_renewal(&self, sid: &str) {
        if let Some(subscription) = self.subscriptions.write().get_mut(sid) {
            subscription.renewing = false;
        }
    }

    /// `http://<local address>:<port>/` as the device should see us
    fn callback_url(&self, service: &Service) -> Option<String> {
        let port = (*self.callback_port.lock())?;
        let device = service.device()?;
        let address = device
            .local_address()
            .or_else(|| url_host_ip(&device.location()).and_then(local_address_for))?;
        Some(format!("http://{}/", SocketAddr::new(address, port)))
    }

    pub fn subscription(&self, sid: &str) -> Option<SubscriptionInfo> {
        self.subscriptions.read().get(sid).map(|subscription| SubscriptionInfo {
            sid: sid.to_string(),
            timeout: subscription.timeout,
            expires_at: subscription.expires_at(),
            keep_renew: subscription.keep_renew,
        })
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub(crate) fn add_event_listener(&self, listener: Arc<dyn EventListener>) -> bool {
        self.event_listeners.add(listener)
    }

    pub(crate) fn remove_event_listener(&self, listener: &Arc<dyn EventListener>) -> bool {
        self.event_listeners.remove(listener)
    }

    pub(crate) fn add_notify_event_listener(&self, listener: Arc<dyn NotifyEventListener>) -> bool {
        self.notify_listeners.add(listener)
    }

    pub(crate) fn remove_notify_event_listener(&self, listener: &Arc<dyn NotifyEventListener>) -> bool {
        self.notify_listeners.remove(listener)
    }
}

/// Whether the device owning `service` is still registered
fn is_live(service: &Service) -> bool {
    service.device().is_some_and(|device| !device.is_lost())
}

impl NotificationHandler for SubscriptionManager {
    fn on_notification(&self, notification: Notification) -> bool {
        self.dispatch(&notification.subscription_id, notification.seq, notification.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, RecordingGena};
    use std::sync::mpsc;

    const EVENT_SERVICE: &str = "urn:upnp-org:serviceId:RenderingControl";

    fn setup(gena: Arc<RecordingGena>) -> (Arc<SubscriptionManager>, Arc<Service>, Arc<Device>) {
        let executor = Arc::new(TaskExecutor::new(2).unwrap());
        let manager = SubscriptionManager::new(executor.clone(), gena, Duration::from_secs(300), Duration::from_secs(60));
        let device = test_support::build_renderer_with(
            "http://192.168.1.20:1400/desc.xml",
            test_support::context_for(&manager, executor),
        );
        let service = device.find_service_by_id(EVENT_SERVICE).unwrap();
        manager.start(8058).unwrap();
        (manager, service, device)
    }

    #[test]
    fn test_subscribe_then_subscribe_renews() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, _device) = setup(gena.clone());

        assert!(manager.subscribe(&service, true));
        assert_eq!(service.subscription_id().as_deref(), Some("uuid:sid1"));
        assert!(manager.subscribe(&service, false));

        let calls = gena.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].method, "SUBSCRIBE");
        assert_eq!(calls[0].url, "http://192.168.1.20:1400/RenderingControl/Event");
        assert_eq!(calls[0].callback.as_deref(), Some("http://192.168.1.5:8058/"));
        assert_eq!(calls[1].method, "RENEW");
        assert_eq!(calls[1].sid.as_deref(), Some("uuid:sid1"));
        assert!(!manager.subscription("uuid:sid1").unwrap().keep_renew);
    }

    #[test]
    fn test_subscribe_requires_sid_and_status() {
        let gena = RecordingGena::responding(200, None, Some("Second-300"));
        let (manager, service, _device) = setup(gena);
        assert!(!manager.subscribe(&service, false));
        assert_eq!(manager.subscription_count(), 0);

        let gena = RecordingGena::responding(412, Some("uuid:sid1"), Some("Second-300"));
        let (manager, service, _device) = setup(gena);
        assert!(!manager.subscribe(&service, false));
        assert!(service.subscription_id().is_none());

        let gena = RecordingGena::responding(200, Some("uuid:sid1"), Some("Second-0"));
        let (manager, service, _device) = setup(gena);
        assert!(!manager.subscribe(&service, false));
    }

    #[test]
    fn test_subscribe_without_callback_port() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, _device) = setup(gena.clone());
        manager.stop();

        assert!(!manager.subscribe(&service, false));
        assert!(gena.calls().is_empty());
    }

    #[test]
    fn test_renew_rejects_foreign_sid() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, _device) = setup(gena.clone());
        assert!(manager.subscribe(&service, true));

        gena.respond_with(200, Some("uuid:other"), Some("Second-300"));
        assert!(!manager.renew(&service));
        // failure keeps the registration
        assert!(manager.subscription("uuid:sid1").is_some());
        assert_eq!(service.subscription_id().as_deref(), Some("uuid:sid1"));
    }

    #[test]
    fn test_unsubscribe_cleans_up_on_error_status() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, _device) = setup(gena.clone());
        assert!(manager.subscribe(&service, false));

        gena.respond_with(500, None, None);
        assert!(!manager.unsubscribe(&service));
        assert!(service.subscription_id().is_none());
        assert_eq!(manager.subscription_count(), 0);
        assert!(!manager.unsubscribe(&service));
    }

    #[test]
    fn test_dispatch_filters_properties() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, _device) = setup(gena);
        assert!(manager.subscribe(&service, false));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listener: Arc<dyn EventListener> =
            Arc::new(move |_: &Arc<Service>, seq: u64, properties: &[(String, String)]| {
                tx.lock().send((seq, properties.to_vec())).unwrap();
            });
        assert!(manager.add_event_listener(listener));

        let accepted = manager.dispatch(
            "uuid:sid1",
            4,
            vec![
                ("Volume".to_string(), Some("35".to_string())),
                ("A_ARG_TYPE_InstanceID".to_string(), Some("0".to_string())),
                ("Mute".to_string(), None),
                ("Unknown".to_string(), Some("x".to_string())),
            ],
        );

        assert!(accepted);
        let (seq, properties) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(seq, 4);
        assert_eq!(properties, vec![("Volume".to_string(), "35".to_string())]);
    }

    #[test]
    fn test_dispatch_unknown_sid() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, _service, _device) = setup(gena);

        assert!(!manager.dispatch("uuid:nobody", 0, vec![("Volume".to_string(), Some("1".to_string()))]));
    }

    #[test]
    fn test_renew_due_drops_expired_one_shot_subscriptions() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-10");
        let (manager, service, _device) = setup(gena.clone());
        assert!(manager.subscribe(&service, false));

        manager.renew_due(Instant::now() + Duration::from_secs(11));

        assert_eq!(manager.subscription_count(), 0);
        assert!(service.subscription_id().is_none());
        assert_eq!(gena.calls().len(), 1);
    }

    #[test]
    fn test_renew_due_renews_keep_renew_at_half_timeout() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-10");
        let (manager, service, _device) = setup(gena.clone());
        assert!(manager.subscribe(&service, true));

        manager.renew_due(Instant::now() + Duration::from_secs(2));
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(gena.calls().len(), 1);

        manager.renew_due(Instant::now() + Duration::from_secs(6));
        gena.wait_for_calls(2, Duration::from_secs(5));
        assert_eq!(gena.calls()[1].method, "RENEW");
        // still registered even past its deadline
        manager.renew_due(Instant::now() + Duration::from_secs(60));
        assert!(manager.subscription("uuid:sid1").is_some());
    }

    #[test]
    fn test_subscribe_in_flight_when_device_lost() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, device) = setup(gena.clone());
        gena.hold();

        let subscriber = {
            let manager = manager.clone();
            let service = service.clone();
            std::thread::spawn(move || manager.subscribe(&service, true))
        };
        gena.wait_for_calls(1, Duration::from_secs(5));
        manager.unregister_device(&device);
        gena.release();

        assert!(!subscriber.join().unwrap());
        assert_eq!(manager.subscription_count(), 0);
        assert!(service.subscription_id().is_none());
        // the SID granted late is cancelled on the device
        gena.wait_for_calls(2, Duration::from_secs(5));
        let calls = gena.calls();
        assert_eq!(calls[1].method, "UNSUBSCRIBE");
        assert_eq!(calls[1].sid.as_deref(), Some("uuid:sid1"));
    }

    #[test]
    fn test_renew_after_loss_does_not_register() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, device) = setup(gena);
        assert!(manager.subscribe(&service, false));
        manager.unregister_device(&device);

        service.set_subscription_id(Some("uuid:sid1".to_string()));
        assert!(!manager.renew(&service));
        assert_eq!(manager.subscription_count(), 0);
    }

    #[test]
    fn test_dispatch_forwards_empty_value() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, _device) = setup(gena);
        assert!(manager.subscribe(&service, false));

        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let listener: Arc<dyn EventListener> =
            Arc::new(move |_: &Arc<Service>, _: u64, properties: &[(String, String)]| {
                tx.lock().send(properties.to_vec()).unwrap();
            });
        manager.add_event_listener(listener);

        assert!(manager.dispatch("uuid:sid1", 1, vec![("Mute".to_string(), Some(String::new()))]));

        let properties = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(properties, vec![("Mute".to_string(), String::new())]);
    }

    #[test]
    fn test_unregister_device_forgets_subscriptions() {
        let gena = RecordingGena::granting("uuid:sid1", "Second-300");
        let (manager, service, device) = setup(gena.clone());
        assert!(manager.subscribe(&service, true));

        manager.unregister_device(&device);

        assert_eq!(manager.subscription_count(), 0);
        assert!(service.subscription_id().is_none());
        gena.wait_for_calls(2, Duration::from_secs(5));
        assert_eq!(gena.calls()[1].method, "UNSUBSCRIBE");
    }
}
