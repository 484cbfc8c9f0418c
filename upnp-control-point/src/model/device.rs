use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::RwLock;
use upnp_ssdp::SsdpMessage;

use super::{Icon, Service};

/// A UPnP device, root or embedded.
///
/// Only the root carries live discovery state: the SSDP message on file and
/// the pinned flag. Embedded devices answer those queries from their root.
pub struct Device {
    pub(crate) parent: Weak<Device>,
    pub(crate) udn: String,
    pub(crate) device_type: String,
    pub(crate) friendly_name: String,
    pub(crate) manufacturer: String,
    pub(crate) manufacturer_url: Option<String>,
    pub(crate) model_name: String,
    pub(crate) model_number: Option<String>,
    pub(crate) model_description: Option<String>,
    pub(crate) model_url: Option<String>,
    pub(crate) serial_number: Option<String>,
    pub(crate) upc: Option<String>,
    pub(crate) presentation_url: Option<String>,
    pub(crate) url_base: Option<String>,
    pub(crate) description: Arc<str>,
    pub(crate) icons: Vec<Arc<Icon>>,
    pub(crate) services: Vec<Arc<Service>>,
    pub(crate) embedded_devices: Vec<Arc<Device>>,
    pub(crate) ssdp_message: RwLock<SsdpMessage>,
    pub(crate) pinned: AtomicBool,
    pub(crate) lost: AtomicBool,
}

impl Device {
    pub fn udn(&self) -> &str {
        &self.udn
    }

    pub fn device_type(&self) -> &str {
        &self.device_type
    }

    pub fn friendly_name(&self) -> &str {
        &self.friendly_name
    }

    pub fn manufacturer(&self) -> &str {
        &self.manufacturer
    }

    pub fn manufacturer_url(&self) -> Option<&str> {
        self.manufacturer_url.as_deref()
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn model_number(&self) -> Option<&str> {
        self.model_number.as_deref()
    }

    pub fn model_description(&self) -> Option<&str> {
        self.model_description.as_deref()
    }

    pub fn model_url(&self) -> Option<&str> {
        self.model_url.as_deref()
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.serial_number.as_deref()
    }

    pub fn upc(&self) -> Option<&str> {
        self.upc.as_deref()
    }

    pub fn presentation_url(&self) -> Option<&str> {
        self.presentation_url.as_deref()
    }

    /// Raw device description XML of the tree this device belongs to
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn icons(&self) -> &[Arc<Icon>] {
        &self.icons
    }

    pub fn services(&self) -> &[Arc<Service>] {
        &self.services
    }

    pub fn embedded_devices(&self) -> &[Arc<Device>] {
        &self.embedded_devices
    }

    /// The enclosing device, `None` for a root device
    pub fn parent(&self) -> Option<Arc<Device>> {
        self.parent.upgrade()
    }

    pub fn is_embedded(&self) -> bool {
        self.parent.strong_count() > 0
    }

    /// The SSDP message currently on file for this device tree
    pub fn ssdp_message(&self) -> SsdpMessage {
        self.with_root(|root| root.ssdp_message.read().clone())
    }

    pub fn location(&self) -> String {
        self.with_root(|root| root.ssdp_message.read().location.clone().unwrap_or_default())
    }

    pub fn expire_time(&self) -> Instant {
        self.with_root(|root| root.ssdp_message.read().expire_time())
    }

    /// Local address on which the device was last heard
    pub fn local_address(&self) -> Option<IpAddr> {
        self.with_root(|root| root.ssdp_message.read().local_address)
    }

    pub fn scope_id(&self) -> u32 {
        self.with_root(|root| root.ssdp_message.read().scope_id)
    }

    pub fn is_pinned(&self) -> bool {
        self.with_root(|root| root.pinned.load(Ordering::Acquire))
    }

    /// URL relative references in the description resolve against:
    /// the root's URLBase when present, its location otherwise
    pub fn base_url(&self) -> String {
        self.with_root(|root| match root.url_base.as_deref() {
            Some(url_base) if !url_base.trim().is_empty() => url_base.trim().to_string(),
            _ => root.location(),
        })
    }

    /// UDNs of this device and every device embedded below it
    pub fn all_udns(&self) -> Vec<String> {
        let mut udns = vec![self.udn.clone()];
        for embedded in &self.embedded_devices {
            udns.extend(embedded.all_udns());
        }
        udns
    }

    pub fn find_service_by_id(&self, service_id: &str) -> Option<Arc<Service>> {
        self.services
            .iter()
            .find(|service| service.service_id() == service_id)
            .cloned()
    }

    pub fn find_service_by_type(&self, service_type: &str) -> Option<Arc<Service>> {
        self.services
            .iter()
            .find(|service| service.service_type() == service_type)
            .cloned()
    }

    /// Search this device's subtree, depth first, for a device type
    pub fn find_device_by_type(self: &Arc<Self>, device_type: &str) -> Option<Arc<Device>> {
        if self.device_type == device_type {
            return Some(self.clone());
        }
        self.embedded_devices
            .iter()
            .find_map(|embedded| embedded.find_device_by_type(device_type))
    }

    /// Services of this device and all embedded devices
    pub fn all_services(&self) -> Vec<Arc<Service>> {
        let mut services = self.services.clone();
        for embedded in &self.embedded_devices {
            services.extend(embedded.all_services());
        }
        services
    }

    pub(crate) fn all_devices(self: &Arc<Self>) -> Vec<Arc<Device>> {
        let mut devices = vec![self.clone()];
        for embedded in &self.embedded_devices {
            devices.extend(embedded.all_devices());
        }
        devices
    }

    pub(crate) fn update_ssdp_message(&self, message: SsdpMessage) {
        self.with_root(|root| *root.ssdp_message.write() = message);
    }

    pub(crate) fn set_pinned(&self, pinned: bool) {
        self.with_root(|root| root.pinned.store(pinned, Ordering::Release));
    }

    /// Set once the device tree has left the registry; never cleared
    pub(crate) fn mark_lost(&self) {
        self.with_root(|root| root.lost.store(true, Ordering::SeqCst));
    }

    pub(crate) fn is_lost(&self) -> bool {
        self.with_root(|root| root.lost.load(Ordering::SeqCst))
    }

    fn with_root<R>(&self, f: impl FnOnce(&Device) -> R) -> R {
        match self.parent.upgrade() {
            Some(parent) => parent.with_root(f),
            None => f(self),
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("udn", &self.udn)
            .field("device_type", &self.device_type)
            .field("friendly_name", &self.friendly_name)
            .field("location", &self.location())
            .field("services", &self.services.len())
            .field("embedded_devices", &self.embedded_devices)
            .finish()
    }
}
