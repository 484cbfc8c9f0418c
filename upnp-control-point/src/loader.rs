//! Description load pipeline: fetch, parse, SCPDs, validate, build, icons.

use std::sync::Arc;

use parking_lot::RwLock;
use upnp_ssdp::SsdpMessage;

use crate::description::{parse_device_description, parse_scpd, resolve_url, DescriptionFetcher, DeviceBuilder};
use crate::error::{BuildError, ControlPointError, Result};
use crate::model::icon::no_icons;
use crate::model::{Device, DeviceContext, IconFilter};

pub(crate) struct LoadCoordinator {
    fetcher: Arc<dyn DescriptionFetcher>,
    icon_filter: RwLock<IconFilter>,
    context: Arc<DeviceContext>,
}

impl LoadCoordinator {
    pub(crate) fn new(fetcher: Arc<dyn DescriptionFetcher>, context: Arc<DeviceContext>) -> Self {
        Self {
            fetcher,
            icon_filter: RwLock::new(no_icons()),
            context,
        }
    }

    /// `None` restores the default of downloading no icons
    pub(crate) fn set_icon_filter(&self, filter: Option<IconFilter>) {
        *self.icon_filter.write() = filter.unwrap_or_else(no_icons);
    }

    /// Build the device announced by `message`. Blocks on HTTP.
    ///
    /// Pinned messages carry no uuid; the device keeps a copy of the
    /// message with the uuid taken from its UDN.
    pub(crate) fn load(&self, message: &SsdpMessage) -> Result<Arc<Device>> {
        let location = message
            .location
            .clone()
            .filter(|location| !location.trim().is_empty())
            .ok_or_else(|| ControlPointError::InvalidUrl {
                url: String::new(),
                reason: "message has no LOCATION".to_string(),
            })?;

        let xml = String::from_utf8_lossy(&self.fetcher.fetch(&location)?).into_owned();
        let document = parse_device_description(&xml)?;
        let mut builder = document.device.ok_or(BuildError::MissingField {
            element: "root",
            field: "device",
        })?;

        let base = match document.url_base.as_deref().map(str::trim) {
            Some(url_base) if !url_base.is_empty() => url_base.to_string(),
            _ => location.clone(),
        };
        self.load_scpds(&mut builder, &base, message.scope_id)?;

        let expected_uuid = (!message.pinned).then_some(message.uuid.as_str());
        builder.validate(expected_uuid)?;

        let mut message = message.clone();
        if message.pinned {
            let udn = builder.udn.as_deref().map(str::trim).unwrap_or_default().to_string();
            message.usn = udn.clone();
            message.uuid = udn;
        }

        let device = builder.build(document.url_base, message, Arc::from(xml), &self.context);
        self.load_icons(&device);
        tracing::debug!(udn = device.udn(), %location, "description loaded");
        Ok(device)
    }

    fn load_scpds(&self, builder: &mut DeviceBuilder, base: &str, scope_id: u32) -> Result<()> {
        for service in &mut builder.service_list.services {
            let Some(scpd_url) = service.scpd_url.as_deref().filter(|url| !url.trim().is_empty()) else {
                // validation reports the missing SCPDURL
                continue;
            };
            let url = resolve_url(base, scpd_url, scope_id)?;
            let xml = String::from_utf8_lossy(&self.fetcher.fetch(&url)?).into_owned();
            service.scpd = Some(parse_scpd(&xml)?);
            service.scpd_xml = Some(xml);
        }
        for embedded in &mut builder.device_list.devices {
            self.load_scpds(embedded, base, scope_id)?;
        }
        Ok(())
    }

    fn load_icons(&self, device: &Arc<Device>) {
        let filter = self.icon_filter.read().clone();
        let base = device.base_url();
        let scope_id = device.scope_id();

        for device in device.all_devices() {
            for icon in filter(device.icons()) {
                let fetched = resolve_url(&base, &icon.url, scope_id)
                    .and_then(|url| self.fetcher.fetch(&url).map_err(ControlPointError::from));
                match fetched {
                    Ok(data) => icon.set_binary(data),
                    Err(e) => tracing::warn!(udn = device.udn(), url = %icon.url, error = %e, "icon download failed"),
                }
            }
        }
    }
}
