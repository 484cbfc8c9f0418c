//! UDN to root device map plus the in-flight load tables.
//!
//! Everything here lives behind one lock so that "is this uuid known or
//! loading" is answered atomically with discover and lose transitions.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};
use upnp_ssdp::SsdpMessage;

use crate::model::Device;

/// A description load that has not committed yet
#[derive(Debug, Clone)]
pub(crate) struct LoadingEntry {
    pub(crate) token: u64,
    /// Latest message accumulated while the load runs
    pub(crate) message: SsdpMessage,
}

#[derive(Default)]
pub(crate) struct RegistryState {
    devices: HashMap<String, Arc<Device>>,
    loading: HashMap<String, LoadingEntry>,
    pinned_loading: HashMap<String, u64>,
}

impl RegistryState {
    /// Root device owning `udn`
    pub(crate) fn get(&self, udn: &str) -> Option<Arc<Device>> {
        self.devices.get(udn).cloned()
    }

    /// Register every UDN of `device`'s subtree to it
    pub(crate) fn insert(&mut self, device: &Arc<Device>) {
        for udn in device.all_udns() {
            self.devices.insert(udn, device.clone());
        }
    }

    pub(crate) fn remove(&mut self, device: &Arc<Device>) {
        for udn in device.all_udns() {
            if self
                .devices
                .get(&udn)
                .is_some_and(|registered| Arc::ptr_eq(registered, device))
            {
                self.devices.remove(&udn);
            }
        }
    }

    pub(crate) fn roots(&self) -> Vec<Arc<Device>> {
        self.devices
            .iter()
            .filter(|(udn, device)| device.udn() == udn.as_str())
            .map(|(_, device)| device.clone())
            .collect()
    }

    pub(crate) fn root_count(&self) -> usize {
        self.devices
            .iter()
            .filter(|(udn, device)| device.udn() == udn.as_str())
            .count()
    }

    /// Unpinned roots whose expire time plus `margin` lies before `now`
    pub(crate) fn expired(&self, now: Instant, margin: Duration) -> Vec<Arc<Device>> {
        self.roots()
            .into_iter()
            .filter(|device| !device.is_pinned() && device.expire_time() + margin < now)
            .collect()
    }

    pub(crate) fn find_by_location(&self, location: &str) -> Option<Arc<Device>> {
        self.roots().into_iter().find(|device| device.location() == location)
    }

    pub(crate) fn loading_mut(&mut self, uuid: &str) -> Option<&mut LoadingEntry> {
        self.loading.get_mut(uuid)
    }

    pub(crate) fn begin_loading(&mut self, uuid: String, token: u64, message: SsdpMessage) {
        self.loading.insert(uuid, LoadingEntry { token, message });
    }

    /// Drop the entry for `uuid`, aborting its load
    pub(crate) fn cancel_loading(&mut self, uuid: &str) -> bool {
        self.loading.remove(uuid).is_some()
    }

    /// Take the entry if it still belongs to the load holding `token`
    pub(crate) fn finish_loading(&mut self, uuid: &str, token: u64) -> Option<SsdpMessage> {
        match self.loading.get(uuid) {
            Some(entry) if entry.token == token => self.loading.remove(uuid).map(|entry| entry.message),
            _ => None,
        }
    }

    pub(crate) fn is_pinned_loading(&self, location: &str) -> bool {
        self.pinned_loading.contains_key(location)
    }

    pub(crate) fn begin_pinned(&mut self, location: String, token: u64) {
        self.pinned_loading.insert(location, token);
    }

    pub(crate) fn cancel_pinned(&mut self, location: &str) -> bool {
        self.pinned_loading.remove(location).is_some()
    }

    pub(crate) fn finish_pinned(&mut self, location: &str, token: u64) -> bool {
        if self.pinned_loading.get(location) == Some(&token) {
            self.pinned_loading.remove(location);
            true
        } else {
            false
        }
    }

    pub(crate) fn loading_count(&self) -> usize {
        self.loading.len() + self.pinned_loading.len()
    }

    pub(crate) fn clear_loading(&mut self) {
        self.loading.clear();
        self.pinned_loading.clear();
    }
}

/// Thread-safe device registry
#[derive(Default)]
pub struct DeviceRegistry {
    state: Mutex<RegistryState>,
    next_token: AtomicU64,
}

impl DeviceRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock()
    }

    /// Fresh token identifying one load attempt
    pub(crate) fn next_token(&self) -> u64 {
        self.next_token.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Root device for any UDN in its subtree
    pub fn get(&self, udn: &str) -> Option<Arc<Device>> {
        self.lock().get(udn)
    }

    pub fn devices(&self) -> Vec<Arc<Device>> {
        self.lock().roots()
    }

    pub fn len(&self) -> usize {
        self.lock().root_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Loads in flight, SSDP-triggered and pinned
    pub fn loading_count(&self) -> usize {
        self.lock().loading_count()
    }
}
