//! The session library function table.
//!
//! [`VppCom`] is the boundary to the foreign userspace network stack. Every
//! method mirrors one library entry point and keeps its calling convention:
//! a non-negative return value is a result (bytes, handle, index) and a
//! negative value is an errno-style failure code. Mapping those codes into
//! errors happens in the adapter, not here.

use std::ptr;

/// Opaque identifier of one foreign session.
pub type SessionHandle = u32;

/// Sentinel marking a closed or never-opened session.
pub const INVALID_SESSION: SessionHandle = u32::MAX;

/// Returns true if `sh` refers to a session.
#[inline]
pub fn session_is_valid(sh: SessionHandle) -> bool {
    sh != INVALID_SESSION
}

pub const VPPCOM_OK: i32 = 0;
pub const VPPCOM_EAGAIN: i32 = -libc::EAGAIN;
pub const VPPCOM_EINVAL: i32 = -libc::EINVAL;
pub const VPPCOM_EBADFD: i32 = -libc::EBADFD;
pub const VPPCOM_EFAULT: i32 = -libc::EFAULT;
pub const VPPCOM_ENOTCONN: i32 = -libc::ENOTCONN;
pub const VPPCOM_ECONNREFUSED: i32 = -libc::ECONNREFUSED;
pub const VPPCOM_ECONNRESET: i32 = -libc::ECONNRESET;
pub const VPPCOM_EADDRINUSE: i32 = -libc::EADDRINUSE;
pub const VPPCOM_EAFNOSUPPORT: i32 = -libc::EAFNOSUPPORT;

/// Transport protocol of a session, as understood by the library.
pub const PROTO_TCP: u32 = 0;
pub const PROTO_UDP: u32 = 1;

/// Segment count used for zero-copy reads.
pub const MAX_READ_SEGMENTS: usize = 16;

/// Foreign endpoint representation.
///
/// The address occupies the leading 4 (IPv4) or 16 (IPv6) bytes of `ip`.
/// The port is kept in network byte order, as the library stores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub is_ip4: bool,
    pub ip: [u8; 16],
    pub port: u16,
    pub is_cut_thru: bool,
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            is_ip4: true,
            ip: [0; 16],
            port: 0,
            is_cut_thru: false,
        }
    }
}

impl Endpoint {
    /// The significant address bytes for the endpoint's family.
    pub fn ip_bytes(&self) -> &[u8] {
        if self.is_ip4 {
            &self.ip[..4]
        } else {
            &self.ip[..]
        }
    }

    /// Port in host byte order.
    #[inline]
    pub fn port_host(&self) -> u16 {
        u16::from_be(self.port)
    }
}

/// One contiguous run of received data owned by the library.
///
/// The memory stays valid until the owner calls
/// [`VppCom::session_free_segments`] for the session.
#[derive(Debug, Clone, Copy)]
pub struct DataSegment {
    pub data: *const u8,
    pub len: u32,
}

impl Default for DataSegment {
    fn default() -> Self {
        Self {
            data: ptr::null(),
            len: 0,
        }
    }
}

/// Session attributes reachable through [`VppCom::get_attr`] and
/// [`VppCom::set_attr`]. Values are native-endian `int` sized buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    Flags,
    Listen,
    Protocol,
    TxFifoLen,
    RxFifoLen,
    ReuseAddr,
    Broadcast,
    V6Only,
    KeepAlive,
    TcpNodelay,
    TcpUserMss,
    TcpKeepIdle,
    TcpKeepIntvl,
    Error,
}

/// Which endpoint of a session to look up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointAttr {
    Local,
    Peer,
}

/// Multiplexer control operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpollOp {
    Add,
    Mod,
    Del,
}

/// The foreign session library.
///
/// The library is a process-wide singleton in practice; implementations are
/// shared between workers behind an `Arc`.
pub trait VppCom: Send + Sync {
    // === Session lifecycle ===

    /// Create a session for `proto`. Returns the new handle or a negative code.
    fn session_create(&self, proto: u32, is_nonblocking: bool) -> i32;

    fn session_close(&self, sh: SessionHandle) -> i32;

    // === Data path ===

    fn session_read(&self, sh: SessionHandle, buf: &mut [u8]) -> i32;

    fn session_write(&self, sh: SessionHandle, buf: &[u8]) -> i32;

    /// Write and flush: the data forms the end of a message.
    fn session_write_msg(&self, sh: SessionHandle, buf: &[u8]) -> i32;

    /// Expose up to `segments.len()` runs of received data without copying,
    /// bounded by `max_bytes`. Returns the total bytes exposed.
    fn session_read_segments(
        &self,
        sh: SessionHandle,
        segments: &mut [DataSegment],
        max_bytes: u32,
    ) -> i32;

    /// Return `n_bytes` of previously exposed segment memory.
    fn session_free_segments(&self, sh: SessionHandle, n_bytes: u32);

    /// Receive, optionally reporting the sender endpoint.
    fn session_recvfrom(
        &self,
        sh: SessionHandle,
        buf: &mut [u8],
        flags: i32,
        ep: Option<&mut Endpoint>,
    ) -> i32;

    // === Connection management ===

    fn session_bind(&self, sh: SessionHandle, ep: &Endpoint) -> i32;

    fn session_listen(&self, sh: SessionHandle, backlog: u32) -> i32;

    /// Accept a pending connection. Returns the new handle or a negative code.
    fn session_accept(&self, sh: SessionHandle, ep: &mut Endpoint, flags: i32) -> i32;

    fn session_connect(&self, sh: SessionHandle, ep: &Endpoint) -> i32;

    // === Attributes ===

    /// Read an attribute into `buf`. Returns bytes written or a negative code.
    fn get_attr(&self, sh: SessionHandle, attr: Attr, buf: &mut [u8]) -> i32;

    fn set_attr(&self, sh: SessionHandle, attr: Attr, buf: &[u8]) -> i32;

    fn get_endpoint(&self, sh: SessionHandle, which: EndpointAttr, ep: &mut Endpoint) -> i32;

    // === Workers ===

    /// Index of the current worker, or -1 if the caller is not registered.
    fn worker_index(&self) -> i32;

    fn worker_index_set(&self, index: i32);

    /// Register a new worker and make it current. Returns 0 or a negative code.
    fn worker_register(&self) -> i32;

    /// Worker owning `sh`, or -1 if unknown.
    fn session_worker(&self, sh: SessionHandle) -> i32;

    // === Multiplexer ===

    fn epoll_handle(&self, worker: u32) -> u32;

    /// Control the interest of `sh`. `token` is returned with its events.
    fn epoll_ctl(&self, epoll: u32, op: EpollOp, sh: SessionHandle, events: u32, token: u64)
        -> i32;
}

/// Read a native-endian `int` attribute value.
pub(crate) fn attr_value(buf: &[u8]) -> Option<i32> {
    let bytes: [u8; 4] = buf.get(..4)?.try_into().ok()?;
    Some(i32::from_ne_bytes(bytes))
}
