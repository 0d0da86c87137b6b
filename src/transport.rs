//! UDP transport boundary.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::time::Duration;

use log::warn;

use crate::config::ServiceConfig;
use crate::errors::Error;

type Result<T> = std::result::Result<T, Error>;

/// Outbound message boundary.
///
/// The engine only ever pushes a payload at an address; everything else about
/// the socket lives behind this trait, so tests can swap in an in-memory
/// recorder.
pub trait Transport: Send + Sync {
    /// Best-effort unicast or multicast send. No delivery guarantee.
    fn send(&self, ip: Ipv4Addr, port: u16, payload: &[u8]) -> Result<()>;
}

/// The real UDP endpoint: server port bound, multicast group joined.
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    /// Receive timeout on the listener socket, so a stopped service's thread
    /// notices the shutdown flag promptly.
    pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

    /// Bind the server port and join the multicast group.
    ///
    /// A failed bind is fatal; a failed multicast join is logged and
    /// tolerated, since unicast replies still flow without it.
    pub fn open(config: &ServiceConfig) -> Result<Self> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, config.server_port))
            .map_err(|e| Error::socket("bind", e))?;
        let interface = config.bind_address.unwrap_or(Ipv4Addr::UNSPECIFIED);
        if let Err(err) = socket.join_multicast_v4(&config.multicast_address, &interface) {
            warn!(
                "could not join multicast group {}: {}",
                config.multicast_address, err
            );
        }
        socket
            .set_read_timeout(Some(Self::READ_TIMEOUT))
            .map_err(|e| Error::socket("set_read_timeout", e))?;
        Ok(UdpTransport { socket })
    }

    /// A second handle on the socket for the listener thread.
    pub(crate) fn listener_socket(&self) -> Result<UdpSocket> {
        self.socket.try_clone().map_err(|e| Error::socket("clone", e))
    }

    /// The locally bound address, mainly useful when binding port 0.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket
            .local_addr()
            .map_err(|e| Error::socket("local_addr", e))
    }
}

impl Transport for UdpTransport {
    fn send(&self, ip: Ipv4Addr, port: u16, payload: &[u8]) -> Result<()> {
        self.socket
            .send_to(payload, SocketAddr::from((ip, port)))
            .map_err(|e| Error::socket("send_to", e))?;
        Ok(())
    }
}
