//! Socket option translation.
//!
//! Options are mapped onto session attributes through a fixed table. Pairs
//! outside the table are accepted and have no effect.

use crate::error::{IoError, SysCallResult, sys_call_result};
use crate::vppcom::{Attr, SessionHandle, VppCom, attr_value};
use tracing::debug;

/// Congestion control algorithm reported for every session.
pub const CONGESTION_ALGORITHM: &str = "cubic";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Translation {
    /// Pass through to a session attribute.
    Attr(Attr),
    /// Accepted without effect.
    Ignore,
    Congestion,
    Info,
    /// Pass through, reporting a stream/datagram socket type.
    Protocol,
    Unsupported,
}

fn lookup_set(level: i32, optname: i32) -> Translation {
    match (level, optname) {
        (libc::IPPROTO_TCP, libc::TCP_NODELAY) => Translation::Attr(Attr::TcpNodelay),
        (libc::IPPROTO_TCP, libc::TCP_MAXSEG) => Translation::Attr(Attr::TcpUserMss),
        (libc::IPPROTO_TCP, libc::TCP_KEEPIDLE) => Translation::Attr(Attr::TcpKeepIdle),
        (libc::IPPROTO_TCP, libc::TCP_KEEPINTVL) => Translation::Attr(Attr::TcpKeepIntvl),
        (libc::IPPROTO_TCP, libc::TCP_CONGESTION | libc::TCP_CORK) => Translation::Ignore,
        (libc::IPPROTO_IPV6, libc::IPV6_V6ONLY) => Translation::Attr(Attr::V6Only),
        (libc::SOL_SOCKET, libc::SO_KEEPALIVE) => Translation::Attr(Attr::KeepAlive),
        (libc::SOL_SOCKET, libc::SO_REUSEADDR) => Translation::Attr(Attr::ReuseAddr),
        (libc::SOL_SOCKET, libc::SO_BROADCAST) => Translation::Attr(Attr::Broadcast),
        _ => Translation::Unsupported,
    }
}

fn lookup_get(level: i32, optname: i32) -> Translation {
    match (level, optname) {
        (libc::IPPROTO_TCP, libc::TCP_NODELAY) => Translation::Attr(Attr::TcpNodelay),
        (libc::IPPROTO_TCP, libc::TCP_MAXSEG) => Translation::Attr(Attr::TcpUserMss),
        (libc::IPPROTO_TCP, libc::TCP_KEEPIDLE) => Translation::Attr(Attr::TcpKeepIdle),
        (libc::IPPROTO_TCP, libc::TCP_KEEPINTVL) => Translation::Attr(Attr::TcpKeepIntvl),
        (libc::IPPROTO_TCP, libc::TCP_CONGESTION) => Translation::Congestion,
        (libc::IPPROTO_TCP, libc::TCP_CORK) => Translation::Ignore,
        (libc::IPPROTO_TCP, libc::TCP_INFO) => Translation::Info,
        (libc::IPPROTO_IPV6, libc::IPV6_V6ONLY) => Translation::Attr(Attr::V6Only),
        (libc::SOL_SOCKET, libc::SO_ACCEPTCONN) => Translation::Attr(Attr::Listen),
        (libc::SOL_SOCKET, libc::SO_KEEPALIVE) => Translation::Attr(Attr::KeepAlive),
        (libc::SOL_SOCKET, libc::SO_PROTOCOL) => Translation::Protocol,
        (libc::SOL_SOCKET, libc::SO_SNDBUF) => Translation::Attr(Attr::TxFifoLen),
        (libc::SOL_SOCKET, libc::SO_RCVBUF) => Translation::Attr(Attr::RxFifoLen),
        (libc::SOL_SOCKET, libc::SO_REUSEADDR) => Translation::Attr(Attr::ReuseAddr),
        (libc::SOL_SOCKET, libc::SO_BROADCAST) => Translation::Attr(Attr::Broadcast),
        (libc::SOL_SOCKET, libc::SO_ERROR) => Translation::Attr(Attr::Error),
        _ => Translation::Unsupported,
    }
}

/// Apply a socket option to `sh`.
pub(crate) fn set_option(
    api: &dyn VppCom,
    sh: SessionHandle,
    level: i32,
    optname: i32,
    optval: &[u8],
) -> SysCallResult {
    match lookup_set(level, optname) {
        Translation::Attr(attr) => sys_call_result(api.set_attr(sh, attr, optval)),
        Translation::Ignore => Ok(()),
        _ => {
            debug!(sh, level, optname, "set_option: unsupported option");
            Ok(())
        }
    }
}

/// Read a socket option of `sh` into `optval`, returning its length.
pub(crate) fn get_option(
    api: &dyn VppCom,
    sh: SessionHandle,
    level: i32,
    optname: i32,
    optval: &mut [u8],
) -> SysCallResult<usize> {
    match lookup_get(level, optname) {
        Translation::Attr(attr) => get_attr(api, sh, attr, optval),
        Translation::Protocol => {
            let len = get_attr(api, sh, Attr::Protocol, optval)?;
            let socket_type = match attr_value(optval) {
                Some(0) => libc::SOCK_STREAM,
                Some(_) => libc::SOCK_DGRAM,
                None => return Ok(len),
            };
            optval[..4].copy_from_slice(&socket_type.to_ne_bytes());
            Ok(len)
        }
        Translation::Congestion => {
            let name = CONGESTION_ALGORITHM.as_bytes();
            // nul terminated when it fits
            let n = optval.len().min(name.len() + 1);
            for (i, dst) in optval[..n].iter_mut().enumerate() {
                *dst = name.get(i).copied().unwrap_or(0);
            }
            Ok(name.len())
        }
        Translation::Info => {
            if optval.len() != std::mem::size_of::<libc::tcp_info>() {
                return Err(IoError::Os(libc::EFAULT));
            }
            debug!(sh, optname, "get_option: TCP_INFO unsupported, zero filled");
            optval.fill(0);
            Ok(optval.len())
        }
        Translation::Ignore => Ok(0),
        Translation::Unsupported => {
            debug!(sh, level, optname, "get_option: unsupported option");
            Ok(0)
        }
    }
}

fn get_attr(api: &dyn VppCom, sh: SessionHandle, attr: Attr, optval: &mut [u8]) -> SysCallResult<usize> {
    let rv = api.get_attr(sh, attr, optval);
    sys_call_result(rv)?;
    Ok(rv as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;
    use crate::vppcom::{PROTO_TCP, PROTO_UDP};

    fn session(proto: u32) -> (Loopback, SessionHandle) {
        let lb = Loopback::new();
        lb.worker_register();
        let sh = lb.session_create(proto, true) as SessionHandle;
        (lb, sh)
    }

    fn int(value: i32) -> [u8; 4] {
        value.to_ne_bytes()
    }

    #[test]
    fn test_pass_through() {
        let (lb, sh) = session(PROTO_TCP);
        set_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_NODELAY, &int(1)).unwrap();
        assert_eq!(lb.attr(sh, Attr::TcpNodelay), Some(1));

        set_option(&lb, sh, libc::SOL_SOCKET, libc::SO_KEEPALIVE, &int(1)).unwrap();
        let mut out = [0u8; 4];
        let len = get_option(&lb, sh, libc::SOL_SOCKET, libc::SO_KEEPALIVE, &mut out).unwrap();
        assert_eq!(len, 4);
        assert_eq!(attr_value(&out), Some(1));

        set_option(&lb, sh, libc::IPPROTO_IPV6, libc::IPV6_V6ONLY, &int(1)).unwrap();
        assert_eq!(lb.attr(sh, Attr::V6Only), Some(1));
    }

    #[test]
    fn test_congestion_is_cubic() {
        let (lb, sh) = session(PROTO_TCP);
        let mut out = [0xffu8; 16];
        let len = get_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_CONGESTION, &mut out).unwrap();
        assert_eq!(len, 5);
        assert_eq!(&out[..6], b"cubic\0");

        // setting it does nothing
        set_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_CONGESTION, b"reno").unwrap();
        let len = get_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_CONGESTION, &mut out).unwrap();
        assert_eq!(&out[..len], b"cubic");
    }

    #[test]
    fn test_cork_is_ignored() {
        let (lb, sh) = session(PROTO_TCP);
        set_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_CORK, &int(1)).unwrap();
        assert_eq!(lb.attr(sh, Attr::TcpNodelay), None);

        let mut out = [0u8; 4];
        let len = get_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_CORK, &mut out).unwrap();
        assert_eq!(len, 0);
    }

    #[test]
    fn test_tcp_info_requires_exact_size() {
        let (lb, sh) = session(PROTO_TCP);
        let mut info = vec![0xffu8; std::mem::size_of::<libc::tcp_info>()];
        let len = get_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_INFO, &mut info).unwrap();
        assert_eq!(len, info.len());
        assert!(info.iter().all(|b| *b == 0));

        let mut short = [0u8; 8];
        assert_eq!(
            get_option(&lb, sh, libc::IPPROTO_TCP, libc::TCP_INFO, &mut short),
            Err(IoError::Os(libc::EFAULT))
        );
    }

    #[test]
    fn test_protocol_reports_socket_type() {
        let (lb, sh) = session(PROTO_UDP);
        let mut out = [0u8; 4];
        get_option(&lb, sh, libc::SOL_SOCKET, libc::SO_PROTOCOL, &mut out).unwrap();
        assert_eq!(attr_value(&out), Some(libc::SOCK_DGRAM));

        let tcp = lb.session_create(PROTO_TCP, true) as SessionHandle;
        get_option(&lb, tcp, libc::SOL_SOCKET, libc::SO_PROTOCOL, &mut out).unwrap();
        assert_eq!(attr_value(&out), Some(libc::SOCK_STREAM));
    }

    #[test]
    fn test_get_only_options() {
        let (lb, sh) = session(PROTO_TCP);
        let mut out = [0u8; 4];
        get_option(&lb, sh, libc::SOL_SOCKET, libc::SO_RCVBUF, &mut out).unwrap();
        assert!(attr_value(&out).unwrap() > 0);

        // accepted, but not forwarded
        set_option(&lb, sh, libc::SOL_SOCKET, libc::SO_RCVBUF, &int(1)).unwrap();
        get_option(&lb, sh, libc::SOL_SOCKET, libc::SO_ERROR, &mut out).unwrap();
        assert_eq!(attr_value(&out), Some(0));
    }

    #[test]
    fn test_unsupported_is_noop() {
        let (lb, sh) = session(PROTO_TCP);
        set_option(&lb, sh, libc::IPPROTO_IP, libc::IP_TOS, &int(0x10)).unwrap();
        let mut out = [0u8; 4];
        assert_eq!(get_option(&lb, sh, libc::IPPROTO_IP, libc::IP_TOS, &mut out), Ok(0));
    }

    #[test]
    fn test_attribute_failure_is_reported() {
        let (lb, _) = session(PROTO_TCP);
        let closed = 42;
        assert_eq!(
            set_option(&lb, closed, libc::IPPROTO_TCP, libc::TCP_NODELAY, &int(1)),
            Err(IoError::Os(libc::EBADFD))
        );
    }
}
