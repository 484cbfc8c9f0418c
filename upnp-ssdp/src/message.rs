//! SSDP message model and datagram parsing.
//!
//! Discovery traffic arrives as HTTP-over-UDP datagrams: `NOTIFY * HTTP/1.1`
//! announcements (alive, byebye, update) and `HTTP/1.1 200 OK` replies to an
//! M-SEARCH. Both are folded into a single [`SsdpMessage`].

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::{Duration, Instant};

use crate::error::{Result, SsdpError};

/// Well-known SSDP port.
pub const SSDP_PORT: u16 = 1900;

/// IPv4 SSDP multicast group.
pub const SSDP_ADDR_V4: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);

/// IPv6 link-local SSDP multicast group (`FF02::C`).
pub const SSDP_ADDR_V6: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0, 0x000c);

/// Max-age applied when a message carries no usable `CACHE-CONTROL`.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(1800);

/// Search target used when the caller does not name one.
pub const ST_ALL: &str = "ssdp:all";

/// Kind of an SSDP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Nts {
    /// `ssdp:alive` announcement
    Alive,
    /// `ssdp:byebye` announcement
    ByeBye,
    /// `ssdp:update` announcement, handled like alive
    Update,
    /// Unicast reply to an M-SEARCH
    SearchResponse,
}

impl Nts {
    /// Parse an NTS header value.
    pub fn from_header(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ssdp:alive" => Some(Nts::Alive),
            "ssdp:byebye" => Some(Nts::ByeBye),
            "ssdp:update" => Some(Nts::Update),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Nts::Alive => "ssdp:alive",
            Nts::ByeBye => "ssdp:byebye",
            Nts::Update => "ssdp:update",
            Nts::SearchResponse => "search-response",
        }
    }
}

/// A parsed discovery message, annotated with where it was received.
#[derive(Debug, Clone, PartialEq)]
pub struct SsdpMessage {
    pub nts: Nts,
    /// Device identity taken from the USN, e.g. `uuid:4d696e69-...`
    pub uuid: String,
    pub usn: String,
    /// `NT` of a NOTIFY or `ST` of a search response
    pub notification_type: Option<String>,
    pub location: Option<String>,
    pub max_age: Duration,
    pub received_at: Instant,
    /// Local interface address the message arrived on
    pub local_address: Option<IpAddr>,
    /// IPv6 scope id of the sender, zero for IPv4
    pub scope_id: u32,
    /// Synthetic message for a manually added device
    pub pinned: bool,
    pub server: Option<String>,
}

impl SsdpMessage {
    /// Synthetic alive message for a device announced out of band.
    pub fn alive(uuid: impl Into<String>, location: impl Into<String>, max_age: Duration) -> Self {
        let uuid = uuid.into();
        Self {
            nts: Nts::Alive,
            usn: uuid.clone(),
            uuid,
            notification_type: None,
            location: Some(location.into()),
            max_age,
            received_at: Instant::now(),
            local_address: None,
            scope_id: 0,
            pinned: false,
            server: None,
        }
    }

    /// Synthetic message for a pinned device.
    ///
    /// The uuid is unknown until the description has been read, so it is left empty.
    pub fn pinned(location: impl Into<String>, local_address: Option<IpAddr>) -> Self {
        Self {
            local_address,
            pinned: true,
            ..Self::alive(String::new(), location, DEFAULT_MAX_AGE)
        }
    }

    pub fn with_local_address(mut self, local_address: IpAddr) -> Self {
        self.local_address = Some(local_address);
        self
    }

    pub fn with_nts(mut self, nts: Nts) -> Self {
        self.nts = nts;
        self
    }

    /// Instant after which the announcement is no longer valid.
    pub fn expire_time(&self) -> Instant {
        self.received_at + self.max_age
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.nts, Nts::Alive | Nts::Update | Nts::SearchResponse)
    }

    pub fn is_byebye(&self) -> bool {
        self.nts == Nts::ByeBye
    }

    /// Whether the LOCATION host agrees with the datagram source.
    ///
    /// Hosts given by name cannot be checked and are accepted.
    pub fn location_matches(&self, source: IpAddr) -> bool {
        let Some(location) = &self.location else {
            return true;
        };
        match location_host(location).and_then(|host| host.parse::<IpAddr>().ok()) {
            Some(host) => host == source,
            None => true,
        }
    }
}

/// Parse a received datagram into an [`SsdpMessage`].
///
/// The receive annotations (`local_address`, `scope_id`) are left empty for the
/// socket layer to fill in.
pub fn parse_message(datagram: &str) -> Result<SsdpMessage> {
    let mut lines = datagram.lines();
    let start_line = lines.next().map(str::trim).unwrap_or_default();

    let is_notify = start_line.starts_with("NOTIFY ");
    let is_response = start_line.starts_with("HTTP/1.1 200") || start_line.starts_with("HTTP/1.0 200");
    if !is_notify && !is_response {
        return Err(SsdpError::Parse(format!("unexpected start line: {start_line}")));
    }

    let mut nt = None;
    let mut nts = None;
    let mut st = None;
    let mut usn = None;
    let mut location = None;
    let mut cache_control = None;
    let mut server = None;

    for line in lines {
        let line = line.trim();

        if let Some(value) = extract_header_value(line, "NT:") {
            nt = Some(value);
        } else if let Some(value) = extract_header_value(line, "NTS:") {
            nts = Some(value);
        } else if let Some(value) = extract_header_value(line, "ST:") {
            st = Some(value);
        } else if let Some(value) = extract_header_value(line, "USN:") {
            usn = Some(value);
        } else if let Some(value) = extract_header_value(line, "LOCATION:") {
            location = Some(value);
        } else if let Some(value) = extract_header_value(line, "CACHE-CONTROL:") {
            cache_control = Some(value);
        } else if let Some(value) = extract_header_value(line, "SERVER:") {
            server = Some(value);
        }
    }

    let nts = if is_notify {
        let value = nts.ok_or_else(|| SsdpError::Parse("NOTIFY without NTS".to_string()))?;
        Nts::from_header(&value).ok_or_else(|| SsdpError::Parse(format!("unknown NTS: {value}")))?
    } else {
        Nts::SearchResponse
    };

    let usn = usn
        .filter(|usn| !usn.is_empty())
        .ok_or_else(|| SsdpError::Parse("missing USN".to_string()))?;
    let uuid = uuid_from_usn(&usn).ok_or_else(|| SsdpError::Parse(format!("USN without uuid: {usn}")))?;

    let location = location.filter(|location| !location.is_empty());
    if nts != Nts::ByeBye && location.is_none() {
        return Err(SsdpError::Parse(format!("{} without LOCATION", nts.as_str())));
    }

    Ok(SsdpMessage {
        nts,
        uuid,
        usn,
        notification_type: if is_notify { nt } else { st },
        location,
        max_age: cache_control
            .as_deref()
            .and_then(parse_max_age)
            .unwrap_or(DEFAULT_MAX_AGE),
        received_at: Instant::now(),
        local_address: None,
        scope_id: 0,
        pinned: false,
        server,
    })
}

/// Render an M-SEARCH request datagram.
pub fn search_request(search_target: &str, mx: u8, ipv6: bool) -> String {
    let host = if ipv6 {
        format!("[{}]:{}", SSDP_ADDR_V6, SSDP_PORT)
    } else {
        format!("{}:{}", SSDP_ADDR_V4, SSDP_PORT)
    };
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {host}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {mx}\r\n\
         ST: {search_target}\r\n\
         USER-AGENT: upnp-control-point/{} UPnP/1.1\r\n\
         \r\n",
        env!("CARGO_PKG_VERSION")
    )
}

/// Extract header value from a line like "HEADER: value"
fn extract_header_value(line: &str, header: &str) -> Option<String> {
    if line.len() > header.len()
        && line.is_char_boundary(header.len())
        && line[..header.len()].eq_ignore_ascii_case(header)
    {
        Some(line[header.len()..].trim().to_string())
    } else {
        None
    }
}

fn uuid_from_usn(usn: &str) -> Option<String> {
    let uuid = usn.split("::").next()?.trim();
    let prefixed = uuid.get(..5).is_some_and(|prefix| prefix.eq_ignore_ascii_case("uuid:"));
    if prefixed && uuid.len() > 5 {
        Some(uuid.to_string())
    } else {
        None
    }
}

fn parse_max_age(cache_control: &str) -> Option<Duration> {
    cache_control.split(',').find_map(|directive| {
        let (name, value) = directive.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("max-age") {
            return None;
        }
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    })
}

/// Host part of an `http://host:port/path` URL, without brackets or zone id.
fn location_host(location: &str) -> Option<&str> {
    let rest = location.split_once("://").map_or(location, |(_, rest)| rest);
    let authority = rest.split('/').next()?;
    let authority = authority.rsplit_once('@').map_or(authority, |(_, host)| host);
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        authority.split(':').next()?
    };
    let host = host.split('%').next()?;
    (!host.is_empty()).then_some(host)
}
