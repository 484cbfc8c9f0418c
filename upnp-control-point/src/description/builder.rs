use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use upnp_ssdp::SsdpMessage;

use crate::error::BuildError;
use crate::model::{
    Action, AllowedValueRange, Argument, Device, DeviceContext, Direction, Icon, Service, StateVariable,
};

/// The `<root>` element of a device description
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DescriptionDocument {
    #[serde(rename = "URLBase")]
    pub url_base: Option<String>,
    pub device: Option<DeviceBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeviceBuilder {
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    #[serde(rename = "manufacturerURL")]
    pub manufacturer_url: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub model_description: Option<String>,
    #[serde(rename = "modelURL")]
    pub model_url: Option<String>,
    pub serial_number: Option<String>,
    #[serde(rename = "UDN")]
    pub udn: Option<String>,
    #[serde(rename = "UPC")]
    pub upc: Option<String>,
    #[serde(rename = "presentationURL")]
    pub presentation_url: Option<String>,
    pub icon_list: IconList,
    pub service_list: ServiceList,
    pub device_list: DeviceList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IconList {
    #[serde(rename = "icon")]
    pub icons: Vec<IconBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ServiceList {
    #[serde(rename = "service")]
    pub services: Vec<ServiceBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DeviceList {
    #[serde(rename = "device")]
    pub devices: Vec<DeviceBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IconBuilder {
    pub mimetype: Option<String>,
    pub width: Option<String>,
    pub height: Option<String>,
    pub depth: Option<String>,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServiceBuilder {
    pub service_type: Option<String>,
    pub service_id: Option<String>,
    #[serde(rename = "SCPDURL")]
    pub scpd_url: Option<String>,
    #[serde(rename = "controlURL")]
    pub control_url: Option<String>,
    #[serde(rename = "eventSubURL")]
    pub event_sub_url: Option<String>,
    /// Filled in after the SCPD has been fetched
    #[serde(skip)]
    pub scpd: Option<ScpdBuilder>,
    #[serde(skip)]
    pub scpd_xml: Option<String>,
}

/// The `<scpd>` element of a service description
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScpdBuilder {
    pub action_list: ActionList,
    pub service_state_table: StateTable,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ActionList {
    #[serde(rename = "action")]
    pub actions: Vec<ActionBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ActionBuilder {
    pub name: Option<String>,
    pub argument_list: ArgumentList,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ArgumentList {
    #[serde(rename = "argument")]
    pub arguments: Vec<ArgumentBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ArgumentBuilder {
    pub name: Option<String>,
    pub direction: Option<String>,
    pub related_state_variable: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StateTable {
    #[serde(rename = "stateVariable")]
    pub variables: Vec<StateVariableBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StateVariableBuilder {
    #[serde(rename = "@sendEvents")]
    pub send_events: Option<String>,
    #[serde(rename = "@multicast")]
    pub multicast: Option<String>,
    pub name: Option<String>,
    pub data_type: Option<String>,
    pub default_value: Option<String>,
    pub allowed_value_list: AllowedValueList,
    pub allowed_value_range: Option<AllowedValueRangeBuilder>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AllowedValueList {
    #[serde(rename = "allowedValue")]
    pub values: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AllowedValueRangeBuilder {
    pub minimum: Option<String>,
    pub maximum: Option<String>,
    pub step: Option<String>,
}

impl DeviceBuilder {
    /// Check mandatory fields of this device and everything below it.
    ///
    /// `expected_uuid` is the uuid the device announced itself with; the
    /// UDN must equal it. Pass `None` for pinned loads. Embedded devices are
    /// never checked against it.
    pub fn validate(&self, expected_uuid: Option<&str>) -> Result<(), BuildError> {
        require(&self.device_type, "device", "deviceType")?;
        require(&self.friendly_name, "device", "friendlyName")?;
        require(&self.manufacturer, "device", "manufacturer")?;
        require(&self.model_name, "device", "modelName")?;
        require(&self.udn, "device", "UDN")?;

        if let Some(expected) = expected_uuid {
            let actual = text(&self.udn);
            if actual != expected.trim() {
                return Err(BuildError::UdnMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        for icon in &self.icon_list.icons {
            icon.validate()?;
        }
        for service in &self.service_list.services {
            service.validate()?;
        }
        for embedded in &self.device_list.devices {
            embedded.validate(None)?;
        }
        Ok(())
    }

    /// Build the device tree. Call [`DeviceBuilder::validate`] first;
    /// missing mandatory text becomes empty strings here.
    pub(crate) fn build(
        self,
        url_base: Option<String>,
        message: SsdpMessage,
        description: Arc<str>,
        context: &Arc<DeviceContext>,
    ) -> Arc<Device> {
        self.build_with_parent(Weak::new(), optional(url_base), message, description, context)
    }

    fn build_with_parent(
        self,
        parent: Weak<Device>,
        url_base: Option<String>,
        message: SsdpMessage,
        description: Arc<str>,
        context: &Arc<DeviceContext>,
    ) -> Arc<Device> {
        Arc::new_cyclic(|me: &Weak<Device>| {
            let services = self
                .service_list
                .services
                .into_iter()
                .map(|service| service.build(me.clone(), context))
                .collect();
            let embedded_devices = self
                .device_list
                .devices
                .into_iter()
                .map(|embedded| {
                    embedded.build_with_parent(me.clone(), None, message.clone(), description.clone(), context)
                })
                .collect();
            let icons = self.icon_list.icons.into_iter().map(|icon| Arc::new(icon.build())).collect();

            Device {
                parent,
                udn: text(&self.udn),
                device_type: text(&self.device_type),
                friendly_name: text(&self.friendly_name),
                manufacturer: text(&self.manufacturer),
                manufacturer_url: optional(self.manufacturer_url),
                model_name: text(&self.model_name),
                model_number: optional(self.model_number),
                model_description: optional(self.model_description),
                model_url: optional(self.model_url),
                serial_number: optional(self.serial_number),
                upc: optional(self.upc),
                presentation_url: optional(self.presentation_url),
                url_base,
                description,
                icons,
                services,
                embedded_devices,
                ssdp_message: RwLock::new(message),
                pinned: Default::default(),
                lost: Default::default(),
            }
        })
    }
}

impl IconBuilder {
    pub fn validate(&self) -> Result<(), BuildError> {
        require(&self.mimetype, "icon", "mimetype")?;
        require(&self.url, "icon", "url")
    }

    fn build(self) -> Icon {
        Icon::new(
            text(&self.mimetype),
            number(&self.width),
            number(&self.height),
            number(&self.depth),
            text(&self.url),
        )
    }
}

impl ServiceBuilder {
    pub fn validate(&self) -> Result<(), BuildError> {
        require(&self.service_type, "service", "serviceType")?;
        require(&self.service_id, "service", "serviceId")?;
        require(&self.scpd_url, "service", "SCPDURL")?;
        require(&self.control_url, "service", "controlURL")?;
        require(&self.event_sub_url, "service", "eventSubURL")?;
        match &self.scpd {
            Some(scpd) => scpd.validate(),
            None => Ok(()),
        }
    }

    fn build(self, device: Weak<Device>, context: &Arc<DeviceContext>) -> Arc<Service> {
        let scpd = self.scpd.unwrap_or_default();
        Arc::new_cyclic(|me: &Weak<Service>| Service {
            device,
            service_type: text(&self.service_type),
            service_id: text(&self.service_id),
            scpd_url: text(&self.scpd_url),
            control_url: text(&self.control_url),
            event_sub_url: text(&self.event_sub_url),
            description: self.scpd_xml.unwrap_or_default(),
            actions: scpd
                .action_list
                .actions
                .into_iter()
                .map(|action| Arc::new(action.build(me.clone())))
                .collect(),
            state_variables: scpd
                .service_state_table
                .variables
                .into_iter()
                .map(StateVariableBuilder::build)
                .collect(),
            subscription_id: Mutex::new(None),
            context: context.clone(),
        })
    }
}

impl ScpdBuilder {
    pub fn validate(&self) -> Result<(), BuildError> {
        for variable in &self.service_state_table.variables {
            require(&variable.name, "stateVariable", "name")?;
            require(&variable.data_type, "stateVariable", "dataType")?;
        }

        for action in &self.action_list.actions {
            require(&action.name, "action", "name")?;
            for argument in &action.argument_list.arguments {
                require(&argument.name, "argument", "name")?;
                require(&argument.direction, "argument", "direction")?;
                require(&argument.related_state_variable, "argument", "relatedStateVariable")?;

                if parse_direction(&text(&argument.direction)).is_none() {
                    return Err(BuildError::InvalidDirection {
                        action: text(&action.name),
                        argument: text(&argument.name),
                        direction: text(&argument.direction),
                    });
                }

                let related = text(&argument.related_state_variable);
                let known = self
                    .service_state_table
                    .variables
                    .iter()
                    .any(|variable| text(&variable.name) == related);
                if !known {
                    return Err(BuildError::UnknownStateVariable {
                        action: text(&action.name),
                        argument: text(&argument.name),
                        variable: related,
                    });
                }
            }
        }
        Ok(())
    }
}

impl ActionBuilder {
    fn build(self, service: Weak<Service>) -> Action {
        Action {
            service,
            name: text(&self.name),
            arguments: self
                .argument_list
                .arguments
                .into_iter()
                .map(|argument| Argument {
                    name: text(&argument.name),
                    direction: parse_direction(&text(&argument.direction)).unwrap_or(Direction::In),
                    related_state_variable: text(&argument.related_state_variable),
                })
                .collect(),
        }
    }
}

impl StateVariableBuilder {
    fn build(self) -> StateVariable {
        StateVariable {
            name: text(&self.name),
            data_type: text(&self.data_type),
            send_events: flag(&self.send_events, true),
            multicast: flag(&self.multicast, false),
            default_value: optional(self.default_value),
            allowed_values: self
                .allowed_value_list
                .values
                .into_iter()
                .map(|value| value.trim().to_string())
                .collect(),
            allowed_value_range: self.allowed_value_range.map(|range| AllowedValueRange {
                minimum: text(&range.minimum),
                maximum: text(&range.maximum),
                step: optional(range.step),
            }),
        }
    }
}

fn require(value: &Option<String>, element: &'static str, field: &'static str) -> Result<(), BuildError> {
    match value.as_deref().map(str::trim) {
        Some(value) if !value.is_empty() => Ok(()),
        _ => Err(BuildError::MissingField { element, field }),
    }
}

fn text(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn number(value: &Option<String>) -> u32 {
    value.as_deref().and_then(|value| value.trim().parse().ok()).unwrap_or(0)
}

fn flag(value: &Option<String>, default: bool) -> bool {
    match value.as_deref().map(|value| value.trim().to_ascii_lowercase()) {
        Some(value) if value == "yes" || value == "true" || value == "1" => true,
        Some(value) if value == "no" || value == "false" || value == "0" => false,
        _ => default,
    }
}

fn parse_direction(value: &str) -> Option<Direction> {
    match value.to_ascii_lowercase().as_str() {
        "in" => Some(Direction::In),
        "out" => Some(Direction::Out),
        _ => None,
    }
}
