//! Blocking HTTP client for UPnP eventing and control
//!
//! This crate speaks the two request/response protocols a control point needs
//! after discovery: GENA (`SUBSCRIBE`/`UNSUBSCRIBE` against a service's event
//! URL) and SOAP action invocation against its control URL. URLs are taken as
//! already resolved absolute strings.

mod error;

pub use error::{HttpError, Result};

use std::time::Duration;
use tracing::debug;
use xmltree::Element;

/// Status and headers of a GENA response.
///
/// Non-2xx statuses are reported here rather than as errors so the caller can
/// apply its own acceptance rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenaResponse {
    pub status: u16,
    /// `SID` header, if present
    pub sid: Option<String>,
    /// Raw `TIMEOUT` header, e.g. `Second-1800`
    pub timeout: Option<String>,
}

impl GenaResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    fn from_response(response: &ureq::Response) -> Self {
        Self {
            status: response.status(),
            sid: response.header("SID").map(|sid| sid.trim().to_string()),
            timeout: response.header("TIMEOUT").map(|timeout| timeout.trim().to_string()),
        }
    }
}

/// A blocking GENA and SOAP client
#[derive(Debug, Clone)]
pub struct HttpClient {
    agent: ureq::Agent,
}

impl HttpClient {
    /// Create a client with a 5 s connect and 10 s read timeout
    pub fn new() -> Self {
        Self::with_timeouts(Duration::from_secs(5), Duration::from_secs(10))
    }

    pub fn with_timeouts(connect: Duration, read: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout_connect(connect)
                .timeout_read(read)
                .build(),
        }
    }

    /// Issue an initial `SUBSCRIBE`
    ///
    /// # Arguments
    /// * `url` - Absolute event subscription URL of the service
    /// * `callback_url` - URL the device should deliver NOTIFY requests to
    /// * `timeout_seconds` - Requested subscription duration
    pub fn subscribe(&self, url: &str, callback_url: &str, timeout_seconds: u64) -> Result<GenaResponse> {
        let request = self
            .agent
            .request("SUBSCRIBE", url)
            .set("NT", "upnp:event")
            .set("CALLBACK", &callback_header(callback_url))
            .set("TIMEOUT", &timeout_header(timeout_seconds));
        gena_call("SUBSCRIBE", url, request)
    }

    /// Renew an existing subscription with `SUBSCRIBE` and `SID`
    pub fn renew(&self, url: &str, sid: &str, timeout_seconds: u64) -> Result<GenaResponse> {
        let request = self
            .agent
            .request("SUBSCRIBE", url)
            .set("SID", sid)
            .set("TIMEOUT", &timeout_header(timeout_seconds));
        gena_call("RENEW", url, request)
    }

    /// Cancel a subscription
    pub fn unsubscribe(&self, url: &str, sid: &str) -> Result<GenaResponse> {
        let request = self.agent.request("UNSUBSCRIBE", url).set("SID", sid);
        gena_call("UNSUBSCRIBE", url, request)
    }

    /// Invoke a SOAP action and return its out arguments in document order
    pub fn call(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let body = soap_envelope(service_type, action, arguments);
        let soap_action = format!("\"{}#{}\"", service_type, action);

        let result = self
            .agent
            .post(control_url)
            .set("Content-Type", "text/xml; charset=\"utf-8\"")
            .set("SOAPACTION", &soap_action)
            .send_string(&body);

        let (status, response) = match result {
            Ok(response) => (response.status(), response),
            Err(ureq::Error::Status(status, response)) => (status, response),
            Err(e) => return Err(HttpError::Network(e.to_string())),
        };

        let xml_text = response
            .into_string()
            .map_err(|e| HttpError::Network(e.to_string()))?;
        let xml = match Element::parse(xml_text.as_bytes()) {
            Ok(xml) => xml,
            Err(_) if status != 200 => return Err(HttpError::Status(status)),
            Err(e) => return Err(HttpError::Parse(e.to_string())),
        };

        let response = extract_response(&xml, action)?;
        Ok(response
            .children
            .iter()
            .filter_map(|node| node.as_element())
            .map(|element| {
                let value = element.get_text().map(|text| text.into_owned()).unwrap_or_default();
                (element.name.clone(), value)
            })
            .collect())
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

fn gena_call(label: &str, url: &str, request: ureq::Request) -> Result<GenaResponse> {
    let response = match request.call() {
        Ok(response) => GenaResponse::from_response(&response),
        Err(ureq::Error::Status(_, response)) => GenaResponse::from_response(&response),
        Err(e) => return Err(HttpError::Network(e.to_string())),
    };
    debug!(request = label, url, status = response.status, sid = ?response.sid, "GENA response");
    Ok(response)
}

/// `CALLBACK` header value for a callback URL
pub fn callback_header(callback_url: &str) -> String {
    format!("<{}>", callback_url)
}

/// `TIMEOUT` header value for a duration in seconds
pub fn timeout_header(timeout_seconds: u64) -> String {
    format!("Second-{}", timeout_seconds)
}

fn soap_envelope(service_type: &str, action: &str, arguments: &[(String, String)]) -> String {
    let payload: String = arguments
        .iter()
        .map(|(name, value)| format!("<{name}>{}</{name}>", escape_xml(value)))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/"><s:Body><u:{action} xmlns:u="{service_type}">{payload}</u:{action}></s:Body></s:Envelope>"#
    )
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn extract_response<'a>(xml: &'a Element, action: &str) -> Result<&'a Element> {
    let body = xml
        .get_child("Body")
        .ok_or_else(|| HttpError::Parse("missing SOAP Body".to_string()))?;

    if let Some(fault) = body.get_child("Fault") {
        let upnp_error = fault
            .get_child("detail")
            .and_then(|d| d.get_child("UPnPError").or_else(|| d.get_child("UpnPError")));
        let text = |name: &str| {
            upnp_error
                .and_then(|e| e.get_child(name))
                .and_then(|c| c.get_text())
                .map(|t| t.trim().to_string())
        };
        return Err(HttpError::Fault {
            error_code: text("errorCode").and_then(|t| t.parse().ok()).unwrap_or(500),
            description: text("errorDescription").unwrap_or_default(),
        });
    }

    let response_name = format!("{}Response", action);
    body.get_child(response_name.as_str())
        .ok_or_else(|| HttpError::Parse(format!("missing {} element", response_name)))
}
