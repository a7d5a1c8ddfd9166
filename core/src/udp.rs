//! Non-blocking UDP plumbing shared by all engines.

use std::fmt::Write as _;
use std::io::ErrorKind;
use std::net::{SocketAddr, ToSocketAddrs};

use tracing::debug;

use crate::error::{GatewayError, Result};

/// How strictly an inbound datagram's source must match the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    AddressAndPort,
    AddressOnly,
}

/// Resolve a configured host/port pair, preferring IPv4 results.
pub fn lookup(address: &str, port: u16) -> Result<SocketAddr> {
    let addrs: Vec<SocketAddr> = (address, port)
        .to_socket_addrs()
        .map_err(|_| GatewayError::AddressResolution {
            address: address.to_string(),
            port,
        })?
        .collect();

    addrs
        .iter()
        .copied()
        .find(SocketAddr::is_ipv4)
        .or_else(|| addrs.first().copied())
        .ok_or_else(|| GatewayError::AddressResolution {
            address: address.to_string(),
            port,
        })
}

/// Check an inbound source address against the configured peer.
pub fn source_matches(source: &SocketAddr, expected: &SocketAddr, match_type: MatchType) -> bool {
    match match_type {
        MatchType::AddressAndPort => source == expected,
        MatchType::AddressOnly => source.ip() == expected.ip(),
    }
}

/// A bound, non-blocking UDP socket.
pub struct UdpSocket {
    socket: std::net::UdpSocket,
}

impl UdpSocket {
    /// Bind to the given local endpoint and switch to non-blocking mode.
    pub fn bind(local_address: &str, local_port: u16) -> Result<Self> {
        let local = lookup(local_address, local_port)?;
        let socket = std::net::UdpSocket::bind(local)?;
        socket.set_nonblocking(true)?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Receive one pending datagram, or `None` when nothing is queued.
    pub fn read(&self, buffer: &mut [u8]) -> Result<Option<(usize, SocketAddr)>> {
        match self.socket.recv_from(buffer) {
            Ok((length, source)) => Ok(Some((length, source))),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write(&self, data: &[u8], destination: &SocketAddr) -> Result<()> {
        self.socket.send_to(data, destination)?;
        Ok(())
    }
}

/// Emit a hex dump of a datagram at debug level.
pub fn dump(title: &str, data: &[u8]) {
    let mut hex = String::with_capacity(data.len() * 3);
    for byte in data {
        let _ = write!(hex, "{byte:02X} ");
    }
    debug!("{} ({} bytes): {}", title, data.len(), hex.trim_end());
}
