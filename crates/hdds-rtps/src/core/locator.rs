// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! RTPS locators (transport kind, port, 16-byte address).

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::{Error, Result};

/// Transport kind of a locator.
pub mod kind {
    pub const INVALID: i32 = -1;
    pub const RESERVED: i32 = 0;
    pub const UDPV4: i32 = 1;
    pub const UDPV6: i32 = 2;
    pub const TCPV4: i32 = 4;
    pub const TCPV6: i32 = 8;
    pub const SHM: i32 = 16;
}

/// Immutable transport endpoint address.
///
/// Ordering and equality are byte-wise over (kind, port, address).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locator {
    pub kind: i32,
    pub port: u32,
    pub address: [u8; 16],
}

impl Locator {
    pub const INVALID: Locator = Locator {
        kind: kind::INVALID,
        port: 0,
        address: [0; 16],
    };

    /// Encoded size on the wire.
    pub const WIRE_SIZE: usize = 24;

    #[must_use]
    pub const fn new(kind: i32, port: u32, address: [u8; 16]) -> Self {
        Self {
            kind,
            port,
            address,
        }
    }

    /// UDPv4 locator (address stored in the last four bytes).
    #[must_use]
    pub fn udpv4(addr: Ipv4Addr, port: u16) -> Self {
        let mut address = [0u8; 16];
        address[12..].copy_from_slice(&addr.octets());
        Self::new(kind::UDPV4, u32::from(port), address)
    }

    #[must_use]
    pub fn udpv6(addr: Ipv6Addr, port: u16) -> Self {
        Self::new(kind::UDPV6, u32::from(port), addr.octets())
    }

    /// Shared-memory locator identified by a port (segment id).
    #[must_use]
    pub fn shm(port: u32) -> Self {
        Self::new(kind::SHM, port, [0; 16])
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(
            self.kind,
            kind::UDPV4 | kind::UDPV6 | kind::TCPV4 | kind::TCPV6 | kind::SHM
        )
    }

    #[must_use]
    pub fn is_multicast(&self) -> bool {
        match self.kind {
            kind::UDPV4 => self.address[12] & 0xF0 == 0xE0,
            kind::UDPV6 => self.address[0] == 0xFF,
            _ => false,
        }
    }

    /// Reject locators that cannot be used as a send destination.
    pub fn validate(&self) -> Result<()> {
        if !self.is_valid() {
            return Err(Error::InvalidLocator(format!("unknown kind {}", self.kind)));
        }
        if self.port == 0 || (self.port > u32::from(u16::MAX) && self.kind != kind::SHM) {
            return Err(Error::InvalidLocator(format!("bad port {}", self.port)));
        }
        Ok(())
    }

    /// Socket address for IP locators.
    #[must_use]
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        let port = u16::try_from(self.port).ok()?;
        match self.kind {
            kind::UDPV4 | kind::TCPV4 => {
                let ip = Ipv4Addr::new(
                    self.address[12],
                    self.address[13],
                    self.address[14],
                    self.address[15],
                );
                Some(SocketAddr::new(IpAddr::V4(ip), port))
            }
            kind::UDPV6 | kind::TCPV6 => {
                Some(SocketAddr::new(IpAddr::V6(Ipv6Addr::from(self.address)), port))
            }
            _ => None,
        }
    }
}

impl From<SocketAddr> for Locator {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Locator::udpv4(*v4.ip(), v4.port()),
            SocketAddr::V6(v6) => Locator::udpv6(*v6.ip(), v6.port()),
        }
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_socket_addr() {
            Some(addr) => write!(f, "{}:{}", self.kind, addr),
            None => write!(f, "{}:port{}", self.kind, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_udpv4_locator_socket_addr() {
        let loc = Locator::udpv4(Ipv4Addr::new(192, 168, 1, 10), 7411);
        assert_eq!(
            loc.to_socket_addr(),
            Some("192.168.1.10:7411".parse().expect("valid addr"))
        );
        assert!(!loc.is_multicast());
        assert!(Locator::udpv4(Ipv4Addr::new(239, 255, 0, 1), 7400).is_multicast());
        assert_eq!(Locator::from(loc.to_socket_addr().expect("ip")), loc);
    }

    #[test]
    fn test_locator_validation() {
        assert!(Locator::INVALID.validate().is_err());
        assert!(Locator::udpv4(Ipv4Addr::LOCALHOST, 0).validate().is_err());
        assert!(Locator::udpv4(Ipv4Addr::LOCALHOST, 7410).validate().is_ok());
        assert!(Locator::shm(70_000).validate().is_ok());
    }

    #[test]
    fn test_locator_ordering_is_bytewise() {
        let a = Locator::udpv4(Ipv4Addr::new(10, 0, 0, 1), 7410);
        let b = Locator::udpv4(Ipv4Addr::new(10, 0, 0, 2), 7410);
        assert!(a < b);
        assert_ne!(a, b);
    }
}
