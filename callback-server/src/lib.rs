//! GENA event receiver for the UPnP control point
//!
//! Devices deliver state-variable changes by sending `NOTIFY` requests to the
//! callback URL given at subscription time. This crate runs the HTTP endpoint
//! that receives them, validates the GENA headers, parses the `propertyset`
//! body and asks a [`NotificationHandler`] whether the subscription is known.
//!
//! | Request | Response |
//! |---|---|
//! | valid, known SID | 200 |
//! | unknown or missing SID, wrong NT/NTS | 412 |
//! | missing SEQ, body not a property set | 400 |
//! | any method other than NOTIFY | 405 |

mod error;
mod propertyset;
pub mod router;
pub mod server;

pub use error::{CallbackError, Result};
pub use propertyset::parse_property_set;
pub use router::{EventRouter, Notification, NotificationHandler, NotifyRequest, RouteOutcome};
pub use server::CallbackServer;
