//! Configuration types for the control point
//!
//! [`ControlPointConfig`] controls worker counts, timer intervals, the
//! address family policy and the network timeouts used by the default
//! transports.

use std::time::Duration;

use upnp_ssdp::ST_ALL;

use crate::address::Protocol;
use crate::error::{ControlPointError, Result};

/// Configuration for the [`ControlPoint`](crate::ControlPoint)
#[derive(Debug, Clone)]
pub struct ControlPointConfig {
    /// Address families used for SSDP and address preference
    /// Default: dual stack
    pub protocol: Protocol,

    /// Number of IO lane workers
    /// Default: 4
    pub io_workers: usize,

    /// How often the expiration sweep runs
    /// Default: 1 second
    pub expiration_check_interval: Duration,

    /// Grace period added to a device's expire time before it is lost
    /// Default: 10 seconds
    pub expiration_margin: Duration,

    /// How often the renewal scheduler scans subscriptions
    /// Default: 5 seconds
    pub renewal_check_interval: Duration,

    /// Timeout requested in SUBSCRIBE and RENEW
    /// Default: 300 seconds
    pub subscription_timeout: Duration,

    /// Port range for the event receiver, (0, 0) lets the OS choose
    /// Default: (0, 0)
    pub event_port_range: (u16, u16),

    /// MX value of outgoing M-SEARCH requests
    /// Default: 1
    pub search_mx: u8,

    pub http_connect_timeout: Duration,

    pub http_read_timeout: Duration,

    /// Search target used when `search(None)` is called
    /// Default: ssdp:all
    pub default_search_target: String,
}

impl Default for ControlPointConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::DualStack,
            io_workers: 4,
            expiration_check_interval: Duration::from_secs(1),
            expiration_margin: Duration::from_secs(10),
            renewal_check_interval: Duration::from_secs(5),
            subscription_timeout: Duration::from_secs(300),
            event_port_range: (0, 0),
            search_mx: 1,
            http_connect_timeout: Duration::from_secs(5),
            http_read_timeout: Duration::from_secs(10),
            default_search_target: ST_ALL.to_string(),
        }
    }
}

impl ControlPointConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Short timer intervals, mostly useful for tests and demos
    pub fn fast_polling() -> Self {
        Self {
            expiration_check_interval: Duration::from_millis(100),
            expiration_margin: Duration::ZERO,
            renewal_check_interval: Duration::from_millis(200),
            ..Default::default()
        }
    }

    pub fn ipv4_only() -> Self {
        Self {
            protocol: Protocol::Ipv4Only,
            ..Default::default()
        }
    }

    /// Validate the configuration and return the first issue found
    pub fn validate(&self) -> Result<()> {
        if self.io_workers == 0 {
            return Err(ControlPointError::Config(
                "IO worker count must be greater than 0".to_string(),
            ));
        }

        if self.expiration_check_interval.is_zero() || self.renewal_check_interval.is_zero() {
            return Err(ControlPointError::Config(
                "Timer intervals must be greater than 0".to_string(),
            ));
        }

        if self.subscription_timeout.as_secs() == 0 {
            return Err(ControlPointError::Config(
                "Subscription timeout must be at least one second".to_string(),
            ));
        }

        if self.event_port_range.0 > self.event_port_range.1 {
            return Err(ControlPointError::Config(
                "Invalid event port range: start must not exceed end".to_string(),
            ));
        }

        if !(1..=5).contains(&self.search_mx) {
            return Err(ControlPointError::Config(format!(
                "Search MX must be between 1 and 5, got {}",
                self.search_mx
            )));
        }

        if self.default_search_target.trim().is_empty() {
            return Err(ControlPointError::Config(
                "Default search target must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_protocol(mut self, protocol: Protocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_io_workers(mut self, workers: usize) -> Self {
        self.io_workers = workers;
        self
    }

    pub fn with_expiration(mut self, check_interval: Duration, margin: Duration) -> Self {
        self.expiration_check_interval = check_interval;
        self.expiration_margin = margin;
        self
    }

    pub fn with_renewal_check_interval(mut self, interval: Duration) -> Self {
        self.renewal_check_interval = interval;
        self
    }

    pub fn with_subscription_timeout(mut self, timeout: Duration) -> Self {
        self.subscription_timeout = timeout;
        self
    }

    pub fn with_event_ports(mut self, start: u16, end: u16) -> Self {
        self.event_port_range = (start, end);
        self
    }

    pub fn with_search_mx(mut self, mx: u8) -> Self {
        self.search_mx = mx;
        self
    }

    pub fn with_http_timeouts(mut self, connect: Duration, read: Duration) -> Self {
        self.http_connect_timeout = connect;
        self.http_read_timeout = read;
        self
    }

    pub fn with_default_search_target(mut self, search_target: impl Into<String>) -> Self {
        self.default_search_target = search_target.into();
        self
    }
}
