//! Contracts of the host proxy this crate plugs into.
//!
//! The host owns the event loop, the byte buffers and the choice of socket
//! implementation. Those are described here as traits, together with small
//! reference implementations ([`LocalDispatcher`], [`ChainBuffer`]) that
//! follow the same contracts.

mod buffer;
mod dispatcher;

pub use buffer::{Buffer, BufferFragment, ChainBuffer};
pub use dispatcher::{Dispatcher, LocalDispatcher, SchedulableCallback};

use crate::error::{IoCallResult, SysCallResult};
use std::io::{IoSlice, IoSliceMut};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

bitflags::bitflags! {
    /// Readiness of a socket.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileReadyType: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const CLOSED = 0x4;
    }
}

/// How the host wants readiness reported. Only meaningful for sources that
/// need edge emulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileTriggerType {
    #[default]
    Level,
    Edge,
    EmulatedEdge,
}

/// Callback invoked with the readiness of a socket.
pub type FileReadyCb = Box<dyn FnMut(FileReadyType)>;

/// Readiness source for one socket.
pub trait FileEvent {
    /// Inject readiness as if the multiplexer had reported it.
    fn activate(&mut self, events: FileReadyType);

    /// Change the readiness the host is interested in.
    fn set_enabled(&mut self, events: FileReadyType);

    fn register_event_if_emulated_edge(&mut self, events: FileReadyType);

    fn unregister_event_if_emulated_edge(&mut self, events: FileReadyType);
}

/// Per-packet result of a message receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecvMsgPerPacketInfo {
    pub peer_address: Option<SocketAddr>,
    pub local_address: Option<SocketAddr>,
    pub msg_len: usize,
}

/// Output of [`IoHandle::recvmsg`] and [`IoHandle::recvmmsg`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecvMsgOutput {
    pub msgs: Vec<RecvMsgPerPacketInfo>,
    /// Packets dropped by the socket, when the implementation can tell.
    pub dropped_packets: Option<u32>,
}

impl RecvMsgOutput {
    pub fn new(num_packets: usize) -> Self {
        Self {
            msgs: vec![RecvMsgPerPacketInfo::default(); num_packets.max(1)],
            dropped_packets: None,
        }
    }
}

/// Owned socket implementation.
pub type IoHandlePtr = Box<dyn IoHandle>;

/// The socket contract the host proxy programs against.
///
/// Implementations are driven from a single worker thread.
pub trait IoHandle {
    // === Lifecycle ===

    fn close(&mut self) -> IoCallResult;

    fn is_open(&self) -> bool;

    // === Data path ===

    /// Scatter read into `slices`, reading at most `max_length` bytes.
    fn readv(&mut self, max_length: usize, slices: &mut [IoSliceMut<'_>]) -> IoCallResult;

    /// Read into `buffer`, optionally bounded by `max_length` bytes.
    fn read(&mut self, buffer: &mut dyn Buffer, max_length: Option<usize>) -> IoCallResult;

    fn writev(&mut self, slices: &[IoSlice<'_>]) -> IoCallResult;

    /// Write from `buffer`, draining what was written.
    fn write(&mut self, buffer: &mut dyn Buffer) -> IoCallResult;

    fn recv(&mut self, buf: &mut [u8], flags: i32) -> IoCallResult;

    fn sendmsg(
        &mut self,
        slices: &[IoSlice<'_>],
        flags: i32,
        self_ip: Option<IpAddr>,
        peer_address: &SocketAddr,
    ) -> IoCallResult;

    fn recvmsg(
        &mut self,
        slices: &mut [IoSliceMut<'_>],
        self_port: u16,
        output: &mut RecvMsgOutput,
    ) -> IoCallResult;

    fn recvmmsg(
        &mut self,
        slices: &mut [Vec<IoSliceMut<'_>>],
        self_port: u16,
        output: &mut RecvMsgOutput,
    ) -> IoCallResult;

    fn supports_mmsg(&self) -> bool;

    fn supports_udp_gro(&self) -> bool;

    // === Connection management ===

    fn bind(&mut self, address: &SocketAddr) -> SysCallResult;

    fn listen(&mut self, backlog: i32) -> SysCallResult;

    /// Accept a connection, returning its handle and the peer address.
    fn accept(&mut self) -> SysCallResult<(IoHandlePtr, SocketAddr)>;

    fn connect(&mut self, address: &SocketAddr) -> SysCallResult;

    fn shutdown(&mut self, how: i32) -> SysCallResult;

    // === Options ===

    fn set_option(&mut self, level: i32, optname: i32, optval: &[u8]) -> SysCallResult;

    /// Read an option into `optval`, returning the option length.
    fn get_option(&self, level: i32, optname: i32, optval: &mut [u8]) -> SysCallResult<usize>;

    fn ioctl(&mut self, control_code: u64, in_buffer: &[u8], out_buffer: &mut [u8])
        -> SysCallResult<usize>;

    fn set_blocking(&mut self, blocking: bool) -> SysCallResult;

    fn domain(&self) -> Option<i32>;

    fn local_address(&self) -> Option<SocketAddr>;

    fn peer_address(&self) -> Option<SocketAddr>;

    fn last_round_trip_time(&self) -> Option<Duration>;

    // === Readiness ===

    fn initialize_file_event(
        &mut self,
        dispatcher: &dyn Dispatcher,
        cb: FileReadyCb,
        trigger: FileTriggerType,
        events: FileReadyType,
    );

    fn activate_file_events(&mut self, events: FileReadyType);

    fn enable_file_events(&mut self, events: FileReadyType);

    fn reset_file_events(&mut self);

    /// A handle to the same socket usable from the calling worker.
    fn duplicate(&mut self) -> IoHandlePtr;
}

/// Socket type requested from a [`SocketInterface`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    Stream,
    Datagram,
}

/// IP version of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

/// Factory the host selects to create sockets.
pub trait SocketInterface {
    fn socket(&self, socket_type: SocketType, version: IpVersion) -> SysCallResult<IoHandlePtr>;

    fn socket_for_address(
        &self,
        socket_type: SocketType,
        address: &SocketAddr,
    ) -> SysCallResult<IoHandlePtr> {
        let version = match address {
            SocketAddr::V4(_) => IpVersion::V4,
            SocketAddr::V6(_) => IpVersion::V6,
        };
        self.socket(socket_type, version)
    }

    fn ip_family_supported(&self, domain: i32) -> bool;
}
