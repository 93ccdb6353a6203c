//! Sessions as host socket handles.
//!
//! [`VclIoHandle`] implements the host [`IoHandle`] contract on top of one
//! session of the library. Data path calls map one to one onto library
//! calls; message oriented calls are emulated with plain reads and writes,
//! and socket options go through the translation table in
//! [`options`](crate::options).

use crate::address::{endpoint_to_socket_addr, to_address, to_endpoint};
use crate::config::ActivationMode;
use crate::error::{
    IoCallResult, IoError, SysCallResult, io_call_result, sys_call_result, transfer_result,
};
use crate::event::{Registration, VclFileEvent, from_epoll_events, token};
use crate::host::{
    Buffer, Dispatcher, FileEvent, FileReadyCb, FileReadyType, FileTriggerType, IoHandle,
    IoHandlePtr, RecvMsgOutput, RecvMsgPerPacketInfo,
};
use crate::options;
use crate::vppcom::*;
use crate::worker::WorkerContext;
use crate::zero_copy::fragments_from_segments;
use std::cell::Cell;
use std::io::{IoSlice, IoSliceMut};
use std::net::{IpAddr, SocketAddr};
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Maximum slices handed to a single vectored write from a buffer.
const MAX_WRITE_SLICES: usize = 16;

/// Owner of a session handle, shared by handles that duplicate it on the
/// same worker. The session is closed once: explicitly, or when the last
/// owner is dropped.
pub(crate) struct Session {
    sh: Cell<SessionHandle>,
    listener: Cell<bool>,
    registered: Cell<bool>,
    api: Arc<dyn VppCom>,
}

impl Session {
    pub(crate) fn new(sh: SessionHandle, api: Arc<dyn VppCom>) -> Self {
        Self {
            sh: Cell::new(sh),
            listener: Cell::new(false),
            registered: Cell::new(false),
            api,
        }
    }

    #[inline]
    pub(crate) fn sh(&self) -> SessionHandle {
        self.sh.get()
    }

    pub(crate) fn registered(&self) -> bool {
        self.registered.get()
    }

    pub(crate) fn set_registered(&self) {
        self.registered.set(true);
    }

    fn is_listener(&self) -> bool {
        self.listener.get()
    }

    fn close(&self) -> i32 {
        let sh = self.sh();
        assert!(session_is_valid(sh), "sh must be valid");
        let rv = self.api.session_close(sh);
        self.sh.set(INVALID_SESSION);
        self.registered.set(false);
        rv
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if session_is_valid(self.sh()) {
            let sh = self.sh();
            let rv = self.close();
            trace!(sh, rv, "closed session on drop");
        }
    }
}

/// A session of the library behind the host socket contract.
///
/// Not `Send`: a handle is driven by the worker thread that owns it.
pub struct VclIoHandle {
    session: Rc<Session>,
    ctx: WorkerContext,
    mode: ActivationMode,
    file_event: Option<VclFileEvent>,
}

impl VclIoHandle {
    /// Take ownership of session `sh`.
    pub fn new(sh: SessionHandle, ctx: WorkerContext, mode: ActivationMode) -> Self {
        Self {
            session: Rc::new(Session::new(sh, ctx.api_arc().clone())),
            ctx,
            mode,
            file_event: None,
        }
    }

    /// The session handle, or [`INVALID_SESSION`] once closed.
    #[inline]
    pub fn sh(&self) -> SessionHandle {
        self.session.sh()
    }

    /// Token the multiplexer reports for this handle.
    #[inline]
    pub fn token(&self) -> u64 {
        token(self.sh())
    }

    pub fn is_listener(&self) -> bool {
        self.session.is_listener()
    }

    pub fn mode(&self) -> ActivationMode {
        self.mode
    }

    pub fn file_event(&self) -> Option<&VclFileEvent> {
        self.file_event.as_ref()
    }

    /// Deliver readiness the multiplexer reported for this handle.
    pub fn on_ready(&self, raw_events: u32) {
        let events = from_epoll_events(raw_events);
        if events.is_empty() {
            return;
        }
        match &self.file_event {
            Some(file_event) => file_event.ready(events),
            None => trace!(sh = self.sh(), raw_events, "no file event, dropping events"),
        }
    }

    /// A handle to this session usable from the calling worker.
    ///
    /// On the owning worker the returned handle shares the session. On any
    /// other worker a new session of the same protocol is created and bound
    /// to this session's local address.
    ///
    /// # Panics
    ///
    /// Panics if the session cannot be inspected or a new one created.
    pub fn duplicate_session(&self) -> VclIoHandle {
        let worker = self.ctx.resolve_or_register();
        let sh = self.sh();
        debug!(sh, worker, "duplicating session");

        if self.ctx.session_worker(sh) == Some(worker) {
            return VclIoHandle {
                session: self.session.clone(),
                ctx: self.ctx.clone(),
                mode: self.mode,
                file_event: None,
            };
        }

        let (ep, proto) = match self.ctx.peek_session(sh) {
            Ok(found) => found,
            Err(rv) => panic!("failed to inspect sh: {sh:#x}, rv: {rv}"),
        };
        let address = to_address(&ep, INVALID_SESSION);
        let rv = self.ctx.api().session_create(proto, true);
        assert!(rv >= 0, "failed to create session for sh: {sh:#x}, rv: {rv}");

        let mut handle = VclIoHandle::new(rv as SessionHandle, self.ctx.clone(), self.mode);
        if let Err(e) = handle.bind(&address) {
            warn!(sh = handle.sh(), %address, error = %e, "failed to bind duplicated session");
        }
        handle
    }

    /// Accept a pending connection on this listener.
    ///
    /// # Panics
    ///
    /// Panics if the session is not listening.
    pub fn accept_session(&mut self) -> SysCallResult<(VclIoHandle, SocketAddr)> {
        let worker = self.ctx.resolve_or_register();
        let sh = self.sh();
        assert!(self.is_listener(), "must have worker and must be listener");

        let mut ep = Endpoint::default();
        let rv = self.api().session_accept(sh, &mut ep, libc::O_NONBLOCK);
        if rv < 0 {
            trace!(sh, worker, rv, "accept");
            return Err(IoError::from_code(rv));
        }

        let peer = endpoint_to_socket_addr(&ep);
        trace!(sh, worker, accepted = rv, %peer, "accept");
        let accepted = VclIoHandle::new(rv as SessionHandle, self.ctx.clone(), self.mode);
        Ok((accepted, peer))
    }

    fn registration(&self) -> Registration {
        Registration::new(self.ctx.clone(), self.session.clone())
    }

    fn file_event_mut(&mut self) -> &mut VclFileEvent {
        let sh = self.sh();
        match self.file_event.as_mut() {
            Some(file_event) => file_event,
            None => panic!("file event not initialized for sh: {sh:#x}"),
        }
    }

    fn api(&self) -> &dyn VppCom {
        self.ctx.api()
    }
}

impl std::fmt::Debug for VclIoHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VclIoHandle")
            .field("sh", &self.sh())
            .field("listener", &self.is_listener())
            .field("mode", &self.mode)
            .finish()
    }
}

impl IoHandle for VclIoHandle {
    fn close(&mut self) -> IoCallResult {
        let sh = self.sh();
        trace!(sh, "closing session");
        self.file_event = None;
        let rv = self.session.close();
        if rv < 0 {
            debug!(sh, rv, "session close reported failure");
        }
        Ok(0)
    }

    fn is_open(&self) -> bool {
        session_is_valid(self.sh())
    }

    fn readv(&mut self, max_length: usize, slices: &mut [IoSliceMut<'_>]) -> IoCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return io_call_result(VPPCOM_EBADFD);
        }

        let api = self.ctx.api();
        let mut read = 0;
        let mut rv = 0;
        for slice in slices.iter_mut() {
            let len = slice.len().min(max_length - read);
            rv = api.session_read(sh, &mut slice[..len]);
            if rv < 0 {
                break;
            }
            read += rv as usize;
            if read == max_length {
                break;
            }
        }
        trace!(sh, read, rv, "readv");
        transfer_result(read, rv)
    }

    fn read(&mut self, buffer: &mut dyn Buffer, max_length: Option<usize>) -> IoCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return io_call_result(VPPCOM_EBADFD);
        }

        let mut segments = [DataSegment::default(); MAX_READ_SEGMENTS];
        let max_bytes = max_length.map_or(u32::MAX, |n| u32::try_from(n).unwrap_or(u32::MAX));
        let rv = self.api().session_read_segments(sh, &mut segments, max_bytes);
        if rv < 0 {
            return io_call_result(rv);
        }

        let fragments = fragments_from_segments(self.ctx.api_arc(), sh, &segments, rv);
        trace!(sh, bytes = rv, fragments = fragments.len(), "read");
        for fragment in fragments {
            buffer.add_fragment(fragment);
        }
        io_call_result(rv)
    }

    fn writev(&mut self, slices: &[IoSlice<'_>]) -> IoCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return io_call_result(VPPCOM_EBADFD);
        }

        let api = self.ctx.api();
        let mut written = 0;
        let mut rv = 0;
        for slice in slices {
            rv = api.session_write(sh, slice);
            if rv < 0 {
                break;
            }
            written += rv as usize;
        }
        trace!(sh, written, rv, "writev");
        transfer_result(written, rv)
    }

    fn write(&mut self, buffer: &mut dyn Buffer) -> IoCallResult {
        let result = {
            let slices = buffer.raw_slices(MAX_WRITE_SLICES);
            self.writev(&slices)
        };
        if let Ok(n) = result
            && n > 0
        {
            buffer.drain(n);
        }
        result
    }

    fn recv(&mut self, buf: &mut [u8], flags: i32) -> IoCallResult {
        let sh = self.sh();
        trace!(sh, len = buf.len(), "recv");
        io_call_result(self.api().session_recvfrom(sh, buf, flags, None))
    }

    fn sendmsg(
        &mut self,
        slices: &[IoSlice<'_>],
        _flags: i32,
        _self_ip: Option<IpAddr>,
        peer_address: &SocketAddr,
    ) -> IoCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return io_call_result(VPPCOM_EBADFD);
        }

        let mut pending = slices.iter().filter(|s| !s.is_empty()).peekable();
        if pending.peek().is_none() {
            return Ok(0);
        }

        // no message semantics: plain writes, flushing with the last one
        let api = self.ctx.api();
        let mut written = 0;
        let mut rv = 0;
        while let Some(slice) = pending.next() {
            rv = if pending.peek().is_some() {
                api.session_write(sh, slice)
            } else {
                api.session_write_msg(sh, slice)
            };
            if rv < 0 {
                break;
            }
            written += rv as usize;
        }
        trace!(sh, written, rv, peer = %peer_address, "sendmsg");
        transfer_result(written, rv)
    }

    fn recvmsg(
        &mut self,
        slices: &mut [IoSliceMut<'_>],
        _self_port: u16,
        output: &mut RecvMsgOutput,
    ) -> IoCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return io_call_result(VPPCOM_EBADFD);
        }
        if output.msgs.is_empty() {
            output.msgs.push(RecvMsgPerPacketInfo::default());
        }

        // no message semantics: one receive per slice
        let api = self.ctx.api();
        let mut ep = Endpoint::default();
        let mut received = 0;
        let mut rv = 0;
        for (i, slice) in slices.iter_mut().filter(|s| !s.is_empty()).enumerate() {
            rv = api.session_recvfrom(sh, slice, 0, Some(&mut ep));
            if rv < 0 {
                break;
            }
            if i == 0 {
                output.msgs[0].peer_address = Some(to_address(&ep, sh));
            }
            received += rv as usize;
        }
        trace!(sh, received, rv, "recvmsg");

        let n = transfer_result(received, rv)?;
        output.msgs[0].msg_len = n;
        output.dropped_packets = None;
        Ok(n)
    }

    fn recvmmsg(
        &mut self,
        _slices: &mut [Vec<IoSliceMut<'_>>],
        _self_port: u16,
        _output: &mut RecvMsgOutput,
    ) -> IoCallResult {
        Err(IoError::Unsupported)
    }

    fn supports_mmsg(&self) -> bool {
        false
    }

    fn supports_udp_gro(&self) -> bool {
        false
    }

    fn bind(&mut self, address: &SocketAddr) -> SysCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return Err(IoError::Os(libc::EBADFD));
        }
        self.ctx.resolve_or_register();

        let rv = self.api().session_bind(sh, &to_endpoint(address));
        trace!(sh, %address, rv, "bind");
        sys_call_result(rv)
    }

    fn listen(&mut self, backlog: i32) -> SysCallResult {
        let worker = self.ctx.resolve_or_register();
        let sh = self.sh();
        trace!(sh, worker, backlog, "listen");

        assert!(!self.is_listener(), "sh: {sh:#x} is already listening");
        assert_eq!(
            self.ctx.session_worker(sh),
            Some(worker),
            "sh: {sh:#x} must be owned by the listening worker"
        );
        self.session.listener.set(true);

        let rv = self.api().session_listen(sh, backlog.max(0) as u32);
        sys_call_result(rv)?;
        sys_call_result(self.registration().register(FileReadyType::READ))
    }

    fn accept(&mut self) -> SysCallResult<(IoHandlePtr, SocketAddr)> {
        let (accepted, peer) = self.accept_session()?;
        let handle: IoHandlePtr = Box::new(accepted);
        Ok((handle, peer))
    }

    fn connect(&mut self, address: &SocketAddr) -> SysCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return Err(IoError::Os(libc::EBADFD));
        }
        self.ctx.resolve_or_register();

        let rv = self.api().session_connect(sh, &to_endpoint(address));
        trace!(sh, %address, rv, "connect");
        sys_call_result(rv)
    }

    fn shutdown(&mut self, _how: i32) -> SysCallResult {
        Ok(())
    }

    fn set_option(&mut self, level: i32, optname: i32, optval: &[u8]) -> SysCallResult {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return Err(IoError::Os(libc::EBADFD));
        }
        options::set_option(self.api(), sh, level, optname, optval)
    }

    fn get_option(&self, level: i32, optname: i32, optval: &mut [u8]) -> SysCallResult<usize> {
        let sh = self.sh();
        if !session_is_valid(sh) {
            return Err(IoError::Os(libc::EBADFD));
        }
        options::get_option(self.api(), sh, level, optname, optval)
    }

    fn ioctl(
        &mut self,
        _control_code: u64,
        _in_buffer: &[u8],
        _out_buffer: &mut [u8],
    ) -> SysCallResult<usize> {
        Ok(0)
    }

    fn set_blocking(&mut self, _blocking: bool) -> SysCallResult {
        // sessions are always non-blocking
        let flags = libc::O_NONBLOCK.to_ne_bytes();
        sys_call_result(self.api().set_attr(self.sh(), Attr::Flags, &flags))
    }

    fn domain(&self) -> Option<i32> {
        Some(libc::AF_INET)
    }

    fn local_address(&self) -> Option<SocketAddr> {
        let sh = self.sh();
        let mut ep = Endpoint::default();
        if self.api().get_endpoint(sh, EndpointAttr::Local, &mut ep) < 0 {
            return None;
        }
        Some(to_address(&ep, sh))
    }

    fn peer_address(&self) -> Option<SocketAddr> {
        let sh = self.sh();
        let mut ep = Endpoint::default();
        if self.api().get_endpoint(sh, EndpointAttr::Peer, &mut ep) < 0 {
            return None;
        }
        Some(to_address(&ep, sh))
    }

    fn last_round_trip_time(&self) -> Option<Duration> {
        None
    }

    fn initialize_file_event(
        &mut self,
        dispatcher: &dyn Dispatcher,
        cb: FileReadyCb,
        _trigger: FileTriggerType,
        events: FileReadyType,
    ) {
        let registration = self.registration();
        let rv = registration.register(events);
        trace!(sh = self.sh(), listener = self.is_listener(), ?events, rv, "initialize file event");
        self.file_event = Some(VclFileEvent::new(self.mode, dispatcher, registration, cb));
    }

    fn activate_file_events(&mut self, events: FileReadyType) {
        self.file_event_mut().activate(events);
    }

    fn enable_file_events(&mut self, events: FileReadyType) {
        self.file_event_mut().set_enabled(events);
    }

    fn reset_file_events(&mut self) {
        self.file_event = None;
    }

    fn duplicate(&mut self) -> IoHandlePtr {
        Box::new(self.duplicate_session())
    }
}
