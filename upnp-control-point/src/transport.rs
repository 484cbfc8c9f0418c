//! Seams between the control point and the network.
//!
//! The engine talks to SSDP, the event receiver, GENA and SOAP only through
//! these traits. The default implementations wrap the sibling crates;
//! tests substitute in-memory fakes.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;
use std::time::Duration;

use callback_server::{CallbackServer, NotificationHandler};
use parking_lot::Mutex;
use upnp_http::{GenaResponse, HttpClient, HttpError};
use upnp_ssdp::{SsdpConfig, SsdpMessage, SsdpServer};

use crate::address::Protocol;
use crate::error::{ControlPointError, Result};

/// Receives every SSDP message heard on the network
pub type SsdpMessageSink = Arc<dyn Fn(SsdpMessage) + Send + Sync>;

pub trait SsdpTransport: Send + Sync {
    /// Start listening; messages go to `sink` from the listener threads
    fn start(&self, sink: SsdpMessageSink) -> Result<()>;

    fn search(&self, search_target: &str) -> Result<()>;

    fn stop(&self);
}

pub trait EventTransport: Send + Sync {
    /// Start receiving NOTIFY requests and return the bound port
    fn start(&self, handler: Arc<dyn NotificationHandler>) -> Result<u16>;

    fn stop(&self);
}

/// GENA requests. Non-2xx statuses are responses, not errors.
pub trait SubscriptionTransport: Send + Sync {
    fn subscribe(&self, url: &str, callback_url: &str, timeout: Duration) -> std::result::Result<GenaResponse, HttpError>;

    fn renew(&self, url: &str, sid: &str, timeout: Duration) -> std::result::Result<GenaResponse, HttpError>;

    fn unsubscribe(&self, url: &str, sid: &str) -> std::result::Result<GenaResponse, HttpError>;
}

/// SOAP action invocation returning the out arguments in document order
pub trait ActionInvoker: Send + Sync {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(String, String)],
    ) -> std::result::Result<Vec<(String, String)>, HttpError>;
}

impl SubscriptionTransport for HttpClient {
    fn subscribe(&self, url: &str, callback_url: &str, timeout: Duration) -> std::result::Result<GenaResponse, HttpError> {
        HttpClient::subscribe(self, url, callback_url, timeout.as_secs())
    }

    fn renew(&self, url: &str, sid: &str, timeout: Duration) -> std::result::Result<GenaResponse, HttpError> {
        HttpClient::renew(self, url, sid, timeout.as_secs())
    }

    fn unsubscribe(&self, url: &str, sid: &str) -> std::result::Result<GenaResponse, HttpError> {
        HttpClient::unsubscribe(self, url, sid)
    }
}

impl ActionInvoker for HttpClient {
    fn invoke(
        &self,
        control_url: &str,
        service_type: &str,
        action: &str,
        arguments: &[(String, String)],
    ) -> std::result::Result<Vec<(String, String)>, HttpError> {
        self.call(control_url, service_type, action, arguments)
    }
}

/// [`SsdpTransport`] backed by the multicast sockets of `upnp-ssdp`
pub struct SsdpNetwork {
    config: SsdpConfig,
    server: Mutex<Option<SsdpServer>>,
}

impl SsdpNetwork {
    pub fn new(config: SsdpConfig) -> Self {
        Self {
            config,
            server: Mutex::new(None),
        }
    }

    pub fn for_protocol(protocol: Protocol, mx: u8) -> Self {
        Self::new(SsdpConfig {
            ipv4: protocol.allows_ipv4(),
            ipv6: protocol.allows_ipv6(),
            mx,
            ..SsdpConfig::default()
        })
    }
}

impl SsdpTransport for SsdpNetwork {
    fn start(&self, sink: SsdpMessageSink) -> Result<()> {
        let mut server = self.server.lock();
        if server.is_some() {
            return Ok(());
        }
        *server = Some(SsdpServer::start(self.config.clone(), move |message| sink(message))?);
        Ok(())
    }

    fn search(&self, search_target: &str) -> Result<()> {
        let server = self.server.lock();
        let server = server.as_ref().ok_or(ControlPointError::Unavailable("SSDP server"))?;
        server.search(search_target)?;
        Ok(())
    }

    fn stop(&self) {
        if let Some(mut server) = self.server.lock().take() {
            server.stop();
        }
    }
}

/// [`EventTransport`] backed by the warp NOTIFY endpoint of `callback-server`
pub struct CallbackEventReceiver {
    bind_address: IpAddr,
    port_range: (u16, u16),
    server: Mutex<Option<CallbackServer>>,
}

impl CallbackEventReceiver {
    pub fn new(bind_address: IpAddr, port_range: (u16, u16)) -> Self {
        Self {
            bind_address,
            port_range,
            server: Mutex::new(None),
        }
    }

    /// Listen on the unspecified address of the families `protocol` allows
    pub fn for_protocol(protocol: Protocol, port_range: (u16, u16)) -> Self {
        let bind_address = match protocol {
            Protocol::Ipv4Only => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            // a dual-stack socket on [::] also accepts IPv4-mapped peers
            Protocol::Ipv6Only | Protocol::DualStack => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        };
        Self::new(bind_address, port_range)
    }
}

impl EventTransport for CallbackEventReceiver {
    fn start(&self, handler: Arc<dyn NotificationHandler>) -> Result<u16> {
        let mut server = self.server.lock();
        if let Some(running) = server.as_ref() {
            return Ok(running.port());
        }
        let started = CallbackServer::start(self.bind_address, self.port_range, handler)?;
        let port = started.port();
        *server = Some(started);
        Ok(port)
    }

    fn stop(&self) {
        if let Some(server) = self.server.lock().take() {
            server.shutdown();
        }
    }
}
