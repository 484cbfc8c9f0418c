//! Multicast NOTIFY listener and M-SEARCH sockets.
//!
//! One receive thread is spawned per socket. Every thread polls a shared
//! running flag between reads, so [`SsdpServer::stop`] returns within one read
//! timeout.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::error::{Result, SsdpError};
use crate::interface::{local_interfaces, select_local_address, LocalInterface};
use crate::message::{parse_message, search_request, SSDP_ADDR_V4, SSDP_ADDR_V6, SSDP_PORT};
use crate::SsdpMessage;

/// Callback receiving every accepted message.
pub type MessageHandler = Arc<dyn Fn(SsdpMessage) + Send + Sync>;

/// Socket configuration for [`SsdpServer`].
#[derive(Debug, Clone)]
pub struct SsdpConfig {
    pub ipv4: bool,
    pub ipv6: bool,
    /// MX value sent with every M-SEARCH
    pub mx: u8,
    /// Multicast TTL / hop limit
    pub multicast_ttl: u32,
    /// Read timeout of every socket; bounds how long `stop` waits
    pub read_timeout: Duration,
}

impl Default for SsdpConfig {
    fn default() -> Self {
        Self {
            ipv4: true,
            ipv6: true,
            mx: 1,
            multicast_ttl: 2,
            read_timeout: Duration::from_millis(500),
        }
    }
}

/// How a receive thread fills in [`SsdpMessage::local_address`].
#[derive(Debug, Clone)]
enum LocalAddress {
    /// Socket bound to a single interface address
    Fixed(IpAddr),
    /// Shared socket; infer from the sender's subnet
    Infer(Arc<Vec<LocalInterface>>),
}

impl LocalAddress {
    fn resolve(&self, remote: IpAddr) -> Option<IpAddr> {
        match self {
            LocalAddress::Fixed(address) => Some(*address),
            LocalAddress::Infer(interfaces) => select_local_address(interfaces, remote),
        }
    }
}

struct SearchEndpoint {
    socket: Arc<UdpSocket>,
    group: SocketAddr,
}

/// Running set of SSDP sockets.
pub struct SsdpServer {
    running: Arc<AtomicBool>,
    search_endpoints: Vec<SearchEndpoint>,
    threads: Vec<JoinHandle<()>>,
    mx: u8,
}

impl SsdpServer {
    /// Open the sockets enabled in `config` and start receiving.
    ///
    /// Every message that parses and whose LOCATION agrees with its sender is
    /// handed to `handler` on the receive thread.
    pub fn start<F>(config: SsdpConfig, handler: F) -> Result<Self>
    where
        F: Fn(SsdpMessage) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(handler);
        let interfaces = Arc::new(local_interfaces()?);
        let mut server = SsdpServer {
            running: Arc::new(AtomicBool::new(true)),
            search_endpoints: Vec::new(),
            threads: Vec::new(),
            mx: config.mx,
        };

        if config.ipv4 {
            if let Err(e) = server.open_ipv4(&config, &interfaces, &handler) {
                warn!(error = %e, "IPv4 SSDP sockets unavailable");
            }
        }
        if config.ipv6 {
            if let Err(e) = server.open_ipv6(&config, &interfaces, &handler) {
                warn!(error = %e, "IPv6 SSDP sockets unavailable");
            }
        }

        if server.threads.is_empty() {
            server.stop();
            let family = match (config.ipv4, config.ipv6) {
                (true, false) => "IPv4",
                (false, true) => "IPv6",
                _ => "IPv4 or IPv6",
            };
            return Err(SsdpError::NoInterface(family));
        }

        info!(
            sockets = server.threads.len(),
            search_sockets = server.search_endpoints.len(),
            "SSDP server started"
        );
        Ok(server)
    }

    /// Multicast an M-SEARCH for `search_target` from every search socket.
    pub fn search(&self, search_target: &str) -> Result<()> {
        let mut last_error = None;
        let mut sent = 0;
        for endpoint in &self.search_endpoints {
            let request = search_request(search_target, self.mx, endpoint.group.is_ipv6());
            match endpoint.socket.send_to(request.as_bytes(), endpoint.group) {
                Ok(_) => sent += 1,
                Err(e) => {
                    warn!(group = %endpoint.group, error = %e, "failed to send M-SEARCH");
                    last_error = Some(e);
                }
            }
        }
        debug!(st = search_target, sent, "M-SEARCH sent");
        match last_error {
            Some(e) if sent == 0 => Err(e.into()),
            _ => Ok(()),
        }
    }

    /// Stop every receive thread and close the sockets.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                warn!("SSDP receive thread panicked");
            }
        }
        self.search_endpoints.clear();
    }

    fn open_ipv4(
        &mut self,
        config: &SsdpConfig,
        interfaces: &Arc<Vec<LocalInterface>>,
        handler: &MessageHandler,
    ) -> Result<()> {
        let addresses: Vec<Ipv4Addr> = interfaces
            .iter()
            .filter_map(|interface| match interface.address {
                IpAddr::V4(address) => Some(address),
                IpAddr::V6(_) => None,
            })
            .collect();
        if addresses.is_empty() {
            return Err(SsdpError::NoInterface("IPv4"));
        }

        let notify = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        reuse(&notify)?;
        notify.bind(&SocketAddr::from((Ipv4Addr::UNSPECIFIED, SSDP_PORT)).into())?;
        for address in &addresses {
            if let Err(e) = notify.join_multicast_v4(&SSDP_ADDR_V4, address) {
                warn!(interface = %address, error = %e, "failed to join SSDP group");
            }
        }
        self.spawn_receiver(
            "ssdp-notify-v4",
            into_udp(notify, config)?,
            LocalAddress::Infer(interfaces.clone()),
            handler.clone(),
            config.read_timeout,
        )?;

        for address in addresses {
            let search = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
            search.bind(&SocketAddr::from((address, 0)).into())?;
            search.set_multicast_if_v4(&address)?;
            search.set_multicast_ttl_v4(config.multicast_ttl)?;
            let socket = Arc::new(into_udp(search, config)?);
            self.spawn_receiver(
                &format!("ssdp-search-{address}"),
                socket.clone(),
                LocalAddress::Fixed(IpAddr::V4(address)),
                handler.clone(),
                config.read_timeout,
            )?;
            self.search_endpoints.push(SearchEndpoint {
                socket,
                group: SocketAddr::from((SSDP_ADDR_V4, SSDP_PORT)),
            });
        }
        Ok(())
    }

    fn open_ipv6(
        &mut self,
        config: &SsdpConfig,
        interfaces: &Arc<Vec<LocalInterface>>,
        handler: &MessageHandler,
    ) -> Result<()> {
        if !interfaces.iter().any(|interface| !interface.is_ipv4()) {
            return Err(SsdpError::NoInterface("IPv6"));
        }

        let notify = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        notify.set_only_v6(true)?;
        reuse(&notify)?;
        notify.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, SSDP_PORT)).into())?;
        notify.join_multicast_v6(&SSDP_ADDR_V6, 0)?;
        self.spawn_receiver(
            "ssdp-notify-v6",
            into_udp(notify, config)?,
            LocalAddress::Infer(interfaces.clone()),
            handler.clone(),
            config.read_timeout,
        )?;

        let search = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?;
        search.set_only_v6(true)?;
        search.bind(&SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)).into())?;
        search.set_multicast_hops_v6(config.multicast_ttl)?;
        let socket = Arc::new(into_udp(search, config)?);
        self.spawn_receiver(
            "ssdp-search-v6",
            socket.clone(),
            LocalAddress::Infer(interfaces.clone()),
            handler.clone(),
            config.read_timeout,
        )?;
        self.search_endpoints.push(SearchEndpoint {
            socket,
            group: SocketAddr::from((SSDP_ADDR_V6, SSDP_PORT)),
        });
        Ok(())
    }

    fn spawn_receiver(
        &mut self,
        name: &str,
        socket: impl Into<Arc<UdpSocket>>,
        local: LocalAddress,
        handler: MessageHandler,
        read_timeout: Duration,
    ) -> Result<()> {
        let socket: Arc<UdpSocket> = socket.into();
        let running = self.running.clone();
        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            let mut buffer = [0u8; 8192];
            while running.load(Ordering::Acquire) {
                match socket.recv_from(&mut buffer) {
                    Ok((size, source)) => handle_datagram(&buffer[..size], source, &local, &handler),
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                        ) => {}
                    Err(e) => {
                        warn!(error = %e, "SSDP receive failed");
                        thread::sleep(read_timeout);
                    }
                }
            }
            debug!("SSDP receive thread exiting");
        })?;
        self.threads.push(handle);
        Ok(())
    }
}

impl Drop for SsdpServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_datagram(datagram: &[u8], source: SocketAddr, local: &LocalAddress, handler: &MessageHandler) {
    let Ok(text) = std::str::from_utf8(datagram) else {
        trace!(%source, "ignoring non UTF-8 datagram");
        return;
    };
    let mut message = match parse_message(text) {
        Ok(message) => message,
        Err(e) => {
            trace!(%source, error = %e, "ignoring datagram");
            return;
        }
    };
    if !message.location_matches(source.ip()) {
        debug!(
            %source,
            location = ?message.location,
            "dropping message whose location does not match its sender"
        );
        return;
    }
    message.local_address = local.resolve(source.ip());
    if let SocketAddr::V6(v6) = source {
        message.scope_id = v6.scope_id();
    }
    handler(message);
}

fn reuse(socket: &Socket) -> Result<()> {
    socket.set_reuse_address(true)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuse_port(true)?;
    Ok(())
}

fn into_udp(socket: Socket, config: &SsdpConfig) -> Result<UdpSocket> {
    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(config.read_timeout))?;
    Ok(socket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect() -> (MessageHandler, Arc<Mutex<Vec<SsdpMessage>>>) {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let handler: MessageHandler = Arc::new(move |message| sink.lock().unwrap().push(message));
        (handler, received)
    }

    const ALIVE: &str = "NOTIFY * HTTP/1.1\r\n\
        LOCATION: http://192.168.1.50:8200/rootDesc.xml\r\n\
        NTS: ssdp:alive\r\n\
        NT: upnp:rootdevice\r\n\
        USN: uuid:abc::upnp:rootdevice\r\n\r\n";

    #[test]
    fn test_handle_datagram_annotates_local_address() {
        let (handler, received) = collect();
        let local = LocalAddress::Fixed("192.168.1.20".parse().unwrap());

        handle_datagram(ALIVE.as_bytes(), "192.168.1.50:1900".parse().unwrap(), &local, &handler);

        let received = received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].local_address, Some("192.168.1.20".parse().unwrap()));
        assert_eq!(received[0].scope_id, 0);
    }

    #[test]
    fn test_handle_datagram_drops_spoofed_location() {
        let (handler, received) = collect();
        let local = LocalAddress::Fixed("192.168.1.20".parse().unwrap());

        handle_datagram(ALIVE.as_bytes(), "192.168.1.66:1900".parse().unwrap(), &local, &handler);

        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_handle_datagram_ignores_garbage() {
        let (handler, received) = collect();
        let local = LocalAddress::Fixed("192.168.1.20".parse().unwrap());

        handle_datagram(&[0xff, 0xfe, 0x00], "192.168.1.50:1900".parse().unwrap(), &local, &handler);
        handle_datagram(b"M-SEARCH * HTTP/1.1\r\n\r\n", "192.168.1.50:1900".parse().unwrap(), &local, &handler);

        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = SsdpConfig::default();
        assert!(config.ipv4);
        assert!(config.ipv6);
        assert_eq!(config.mx, 1);
    }
}
