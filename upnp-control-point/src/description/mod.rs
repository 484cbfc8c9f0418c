//! Device description and SCPD documents.
//!
//! Documents are deserialized with quick-xml into builder structs whose
//! fields are all optional. [`DeviceBuilder::validate`] then reports the
//! first missing mandatory field before the model is built.

mod builder;
mod fetch;

pub use builder::{
    ActionBuilder, ActionList, AllowedValueList, AllowedValueRangeBuilder, ArgumentBuilder, ArgumentList,
    DescriptionDocument, DeviceBuilder, DeviceList, IconBuilder, IconList, ScpdBuilder, ServiceBuilder,
    ServiceList, StateTable, StateVariableBuilder,
};
pub use fetch::{DescriptionFetcher, HttpDescriptionFetcher};

use std::net::Ipv6Addr;

use url::{Host, Url};

use crate::error::{ControlPointError, DescriptionError, Result};

/// Parse a device description document
pub fn parse_device_description(xml: &str) -> std::result::Result<DescriptionDocument, DescriptionError> {
    quick_xml::de::from_str(xml).map_err(|e| DescriptionError::Xml {
        document: "device description",
        reason: e.to_string(),
    })
}

/// Parse a service control protocol description
pub fn parse_scpd(xml: &str) -> std::result::Result<ScpdBuilder, DescriptionError> {
    quick_xml::de::from_str(xml).map_err(|e| DescriptionError::Xml {
        document: "SCPD",
        reason: e.to_string(),
    })
}

/// Resolve `relative` against `base`.
///
/// A non-zero `scope_id` is written into link-local IPv6 hosts as a zone
/// identifier (`[fe80::1%252]`).
pub fn resolve_url(base: &str, relative: &str, scope_id: u32) -> Result<String> {
    let base_url = Url::parse(base.trim()).map_err(|e| ControlPointError::InvalidUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    let url = base_url
        .join(relative.trim())
        .map_err(|e| ControlPointError::InvalidUrl {
            url: relative.to_string(),
            reason: e.to_string(),
        })?;

    let resolved = url.to_string();
    match url.host() {
        Some(Host::Ipv6(address)) if scope_id != 0 && is_link_local_v6(&address) => Ok(resolved.replacen(
            &format!("[{address}]"),
            &format!("[{address}%25{scope_id}]"),
            1,
        )),
        _ => Ok(resolved),
    }
}

fn is_link_local_v6(address: &Ipv6Addr) -> bool {
    (address.segments()[0] & 0xffc0) == 0xfe80
}
