//! SSDP discovery plumbing for the UPnP control point.
//!
//! This crate turns UDP discovery traffic into [`SsdpMessage`] values. It owns
//! the sockets (a multicast NOTIFY listener plus one M-SEARCH socket per
//! interface) and the datagram parser; deciding what a message means for the
//! device registry is left to the caller.
//!
//! # Listening for announcements
//!
//! ```no_run
//! use upnp_ssdp::{SsdpConfig, SsdpServer};
//!
//! let server = SsdpServer::start(SsdpConfig::default(), |message| {
//!     println!("{} {} at {:?}", message.nts.as_str(), message.uuid, message.location);
//! })?;
//! server.search("upnp:rootdevice")?;
//! # Ok::<(), upnp_ssdp::SsdpError>(())
//! ```

mod error;
mod interface;
mod message;
mod server;

pub use error::{Result, SsdpError};
pub use interface::{local_interfaces, select_local_address, LocalInterface};
pub use message::{
    parse_message, search_request, Nts, SsdpMessage, DEFAULT_MAX_AGE, SSDP_ADDR_V4, SSDP_ADDR_V6,
    SSDP_PORT, ST_ALL,
};
pub use server::{MessageHandler, SsdpConfig, SsdpServer};
