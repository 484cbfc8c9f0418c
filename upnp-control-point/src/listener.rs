//! Application listener traits.
//!
//! Every listener call is made on the callback lane, one at a time, in the
//! order the underlying events were processed.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::{Device, Service};

/// Notified when root devices join or leave the registry.
pub trait DiscoveryListener: Send + Sync {
    fn on_discover(&self, device: &Arc<Device>);

    fn on_lost(&self, device: &Arc<Device>);
}

/// Receives each accepted GENA event as one batch of changed variables.
pub trait EventListener: Send + Sync {
    fn on_event(&self, service: &Arc<Service>, seq: u64, properties: &[(String, String)]);
}

impl<F> EventListener for F
where
    F: Fn(&Arc<Service>, u64, &[(String, String)]) + Send + Sync,
{
    fn on_event(&self, service: &Arc<Service>, seq: u64, properties: &[(String, String)]) {
        self(service, seq, properties)
    }
}

/// Receives each changed variable of an accepted GENA event separately.
pub trait NotifyEventListener: Send + Sync {
    fn on_notify_event(&self, service: &Arc<Service>, seq: u64, variable: &str, value: &str);
}

impl<F> NotifyEventListener for F
where
    F: Fn(&Arc<Service>, u64, &str, &str) + Send + Sync,
{
    fn on_notify_event(&self, service: &Arc<Service>, seq: u64, variable: &str, value: &str) {
        self(service, seq, variable, value)
    }
}

/// Registration set compared by identity.
pub(crate) struct ListenerSet<T: ?Sized> {
    listeners: Arc<RwLock<Vec<Arc<T>>>>,
}

impl<T: ?Sized> Clone for ListenerSet<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: ?Sized> Default for ListenerSet<T> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl<T: ?Sized> ListenerSet<T> {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns false if this exact listener is already registered
    pub(crate) fn add(&self, listener: Arc<T>) -> bool {
        let mut listeners = self.listeners.write();
        if listeners.iter().any(|existing| same_listener(existing, &listener)) {
            return false;
        }
        listeners.push(listener);
        true
    }

    pub(crate) fn remove(&self, listener: &Arc<T>) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|existing| !same_listener(existing, listener));
        listeners.len() != before
    }

    pub(crate) fn snapshot(&self) -> Vec<Arc<T>> {
        self.listeners.read().clone()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.listeners.read().len()
    }
}

fn same_listener<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_registration_rejected() {
        let set: ListenerSet<dyn NotifyEventListener> = ListenerSet::new();
        let listener: Arc<dyn NotifyEventListener> = Arc::new(|_: &Arc<Service>, _: u64, _: &str, _: &str| {});

        assert!(set.add(listener.clone()));
        assert!(!set.add(listener.clone()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_remove_unknown_listener() {
        let set: ListenerSet<dyn NotifyEventListener> = ListenerSet::new();
        let registered: Arc<dyn NotifyEventListener> = Arc::new(|_: &Arc<Service>, _: u64, _: &str, _: &str| {});
        let stranger: Arc<dyn NotifyEventListener> = Arc::new(|_: &Arc<Service>, _: u64, _: &str, _: &str| {});

        set.add(registered.clone());
        assert!(!set.remove(&stranger));
        assert!(set.remove(&registered));
        assert!(!set.remove(&registered));
        assert_eq!(set.len(), 0);
    }

    #[test]
    fn test_clones_share_registrations() {
        let set: ListenerSet<dyn EventListener> = ListenerSet::new();
        let shared = set.clone();
        let listener: Arc<dyn EventListener> = Arc::new(|_: &Arc<Service>, _: u64, _: &[(String, String)]| {});

        set.add(listener);
        assert_eq!(shared.snapshot().len(), 1);
    }
}
