//! Conversion between foreign endpoints and host socket addresses.

use crate::vppcom::{Endpoint, SessionHandle};
use socket2::SockAddr;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

/// Failure to build a host address from raw socket address storage.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("unsupported address family {0}")]
    UnsupportedFamily(i32),
}

/// Build the foreign endpoint for a host address. Cut-through is disabled.
pub fn to_endpoint(address: &SocketAddr) -> Endpoint {
    let mut ep = Endpoint {
        is_cut_thru: false,
        port: address.port().to_be(),
        ..Default::default()
    };
    match address.ip() {
        IpAddr::V4(ip) => {
            ep.is_ip4 = true;
            ep.ip[..4].copy_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            ep.is_ip4 = false;
            ep.ip.copy_from_slice(&ip.octets());
        }
    }
    ep
}

/// Raw socket address storage for an endpoint.
fn endpoint_storage(ep: &Endpoint) -> SockAddr {
    let port = ep.port_host();
    if ep.is_ip4 {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&ep.ip[..4]);
        SockAddr::from(SocketAddrV4::new(Ipv4Addr::from(octets), port))
    } else {
        SockAddr::from(SocketAddrV6::new(Ipv6Addr::from(ep.ip), port, 0, 0))
    }
}

/// Build a host address from raw storage.
///
/// When `v6only` is false the storage is assumed to come from a dual stack
/// socket, so IPv4-mapped IPv6 addresses are normalized to IPv4.
pub fn address_from_sockaddr(storage: &SockAddr, v6only: bool) -> Result<SocketAddr, AddressError> {
    let address = storage
        .as_socket()
        .ok_or(AddressError::UnsupportedFamily(storage.family() as i32))?;
    match address {
        SocketAddr::V6(v6) if !v6only => match v6.ip().to_ipv4_mapped() {
            Some(v4) => Ok(SocketAddr::V4(SocketAddrV4::new(v4, v6.port()))),
            None => Ok(address),
        },
        _ => Ok(address),
    }
}

/// Translate an endpoint reported by the library into a host address.
///
/// Endpoints always encode an inet family, so the storage built for them
/// decodes. `sh` names the session if it ever does not.
pub fn to_address(ep: &Endpoint, sh: SessionHandle) -> SocketAddr {
    decode(&endpoint_storage(ep), sh)
}

/// Normalized host address for storage describing session `sh`.
///
/// # Panics
///
/// Panics naming `sh` if the storage does not hold an inet address.
fn decode(storage: &SockAddr, sh: SessionHandle) -> SocketAddr {
    match address_from_sockaddr(storage, false) {
        Ok(address) => address,
        Err(e) => panic!("invalid remote address for sh: {sh:#x}, error: {e}"),
    }
}

/// Copy an endpoint into a host address without normalization, the way an
/// accepted peer is reported.
pub fn endpoint_to_socket_addr(ep: &Endpoint) -> SocketAddr {
    let port = ep.port_host();
    if ep.is_ip4 {
        let mut octets = [0u8; 4];
        octets.copy_from_slice(&ep.ip[..4]);
        SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::from(octets), port))
    } else {
        SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::from(ep.ip), port, 0, 0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_endpoint_v4() {
        let addr: SocketAddr = "10.1.2.3:8080".parse().unwrap();
        let ep = to_endpoint(&addr);
        assert!(ep.is_ip4);
        assert!(!ep.is_cut_thru);
        assert_eq!(ep.ip_bytes(), &[10, 1, 2, 3]);
        assert_eq!(ep.port, 8080u16.to_be());
        assert_eq!(to_address(&ep, 1), addr);
    }

    #[test]
    fn test_to_endpoint_v6() {
        let addr: SocketAddr = "[2001:db8::1]:443".parse().unwrap();
        let ep = to_endpoint(&addr);
        assert!(!ep.is_ip4);
        assert_eq!(ep.port_host(), 443);
        assert_eq!(to_address(&ep, 1), addr);
    }

    #[test]
    fn test_mapped_v4_is_normalized() {
        let addr: SocketAddr = "[::ffff:192.168.0.1]:53".parse().unwrap();
        let ep = to_endpoint(&addr);
        assert!(!ep.is_ip4);

        let expected: SocketAddr = "192.168.0.1:53".parse().unwrap();
        assert_eq!(to_address(&ep, 1), expected);
        // accepted peers are copied as-is
        assert_eq!(endpoint_to_socket_addr(&ep), addr);
    }

    #[test]
    fn test_v6only_keeps_mapped_address() {
        let addr: SocketAddr = "[::ffff:192.168.0.1]:53".parse().unwrap();
        let storage = SockAddr::from(addr);
        assert_eq!(address_from_sockaddr(&storage, true), Ok(addr));
    }

    #[test]
    fn test_non_inet_storage_is_rejected() {
        let storage = SockAddr::unix("/tmp/vcl.sock").unwrap();
        assert_eq!(
            address_from_sockaddr(&storage, false),
            Err(AddressError::UnsupportedFamily(libc::AF_UNIX))
        );
    }

    #[test]
    #[should_panic(expected = "invalid remote address for sh: 0x100002a")]
    fn test_decode_names_session() {
        let storage = SockAddr::unix("/tmp/vcl.sock").unwrap();
        decode(&storage, 0x0100_002a);
    }
}
