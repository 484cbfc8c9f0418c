//! Validation and routing of incoming NOTIFY requests.
//!
//! This module provides the `EventRouter`, which checks the GENA headers of a
//! request, parses its property set and hands the result to a
//! [`NotificationHandler`]. The handler decides whether the subscription is
//! known; the router turns that answer into a response status.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::propertyset::parse_property_set;

/// A validated event notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// The subscription ID from the SID header
    pub subscription_id: String,
    /// Event key from the SEQ header
    pub seq: u64,
    /// Changed state variables in document order
    pub properties: Vec<(String, Option<String>)>,
}

/// Receiver of validated notifications.
///
/// Returns `true` when the subscription is known and the event was accepted.
pub trait NotificationHandler: Send + Sync {
    fn on_notification(&self, notification: Notification) -> bool;
}

impl<F> NotificationHandler for F
where
    F: Fn(Notification) -> bool + Send + Sync,
{
    fn on_notification(&self, notification: Notification) -> bool {
        self(notification)
    }
}

/// Borrowed view of the parts of an HTTP request the router looks at.
#[derive(Debug, Clone, Copy)]
pub struct NotifyRequest<'a> {
    pub method: &'a str,
    pub sid: Option<&'a str>,
    pub seq: Option<&'a str>,
    pub nt: Option<&'a str>,
    pub nts: Option<&'a str>,
    pub body: &'a [u8],
}

/// Result of routing a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Accepted,
    BadRequest(&'static str),
    PreconditionFailed(&'static str),
    MethodNotAllowed,
}

impl RouteOutcome {
    pub fn status_code(&self) -> u16 {
        match self {
            RouteOutcome::Accepted => 200,
            RouteOutcome::BadRequest(_) => 400,
            RouteOutcome::PreconditionFailed(_) => 412,
            RouteOutcome::MethodNotAllowed => 405,
        }
    }
}

/// Routes NOTIFY requests to a [`NotificationHandler`].
#[derive(Clone)]
pub struct EventRouter {
    handler: Arc<dyn NotificationHandler>,
}

impl EventRouter {
    pub fn new(handler: Arc<dyn NotificationHandler>) -> Self {
        Self { handler }
    }

    /// Validate a request and deliver it to the handler.
    ///
    /// NT and NTS are only checked when present, since some devices omit them
    /// on event messages.
    pub fn route(&self, request: &NotifyRequest<'_>) -> RouteOutcome {
        if !request.method.eq_ignore_ascii_case("NOTIFY") {
            return RouteOutcome::MethodNotAllowed;
        }

        if let Some(outcome) = validate_upnp_headers(request) {
            debug!(sid = ?request.sid, ?outcome, "rejecting NOTIFY");
            return outcome;
        }
        let Some(sid) = request.sid.map(str::trim).filter(|sid| !sid.is_empty()) else {
            return RouteOutcome::PreconditionFailed("missing SID");
        };
        let Some(seq) = request.seq.and_then(|seq| seq.trim().parse::<u64>().ok()) else {
            return RouteOutcome::BadRequest("missing or invalid SEQ");
        };

        let properties = match parse_property_set(request.body) {
            Ok(properties) => properties,
            Err(e) => {
                warn!(sid, error = %e, "NOTIFY body is not a property set");
                return RouteOutcome::BadRequest("invalid body");
            }
        };

        let accepted = self.handler.on_notification(Notification {
            subscription_id: sid.to_string(),
            seq,
            properties,
        });
        if accepted {
            RouteOutcome::Accepted
        } else {
            debug!(sid, "NOTIFY for unknown subscription");
            RouteOutcome::PreconditionFailed("unknown SID")
        }
    }
}

fn validate_upnp_headers(request: &NotifyRequest<'_>) -> Option<RouteOutcome> {
    if request.nt.is_some_and(|nt| nt.trim() != "upnp:event") {
        return Some(RouteOutcome::PreconditionFailed("invalid NT"));
    }
    if request.nts.is_some_and(|nts| nts.trim() != "upnp:propchange") {
        return Some(RouteOutcome::PreconditionFailed("invalid NTS"));
    }
    None
}
