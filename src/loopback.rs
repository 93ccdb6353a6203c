//! In-process session library.
//!
//! [`Loopback`] implements the [`VppCom`] function table without a foreign
//! network stack: sessions are connected to each other inside the process.
//! It keeps the library's observable conventions:
//!
//! - a process-wide current worker, with sessions owned by the worker that
//!   created them and handles encoding the owner (`worker << 24 | index`)
//! - bounded per-session receive FIFOs, so writes can be partial or fail
//!   with `EAGAIN`
//! - segment reads that pin received memory until it is freed
//! - a level-triggered multiplexer per worker, polled with
//!   [`Loopback::epoll_wait`]

use crate::vppcom::*;
use parking_lot::Mutex;
use slab::Slab;
use std::collections::{HashMap, VecDeque};
use tracing::trace;

/// Default receive FIFO size in bytes.
pub const DEFAULT_FIFO_SIZE: usize = 64 * 1024;

const WORKER_SHIFT: u32 = 24;
const INDEX_MASK: u32 = (1 << WORKER_SHIFT) - 1;
const EPHEMERAL_PORT_START: u16 = 49152;

const EPOLLIN: u32 = libc::EPOLLIN as u32;
const EPOLLOUT: u32 = libc::EPOLLOUT as u32;
const EPOLLERR: u32 = libc::EPOLLERR as u32;
const EPOLLHUP: u32 = libc::EPOLLHUP as u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Bound,
    Listening,
    Connected,
    /// Closed with segments still pinned. The slot, and with it the handle,
    /// is not reused until they are freed.
    Closed,
}

#[derive(Debug, Clone, Copy)]
struct Interest {
    epoll: u32,
    events: u32,
    token: u64,
}

struct Chunk {
    data: Box<[u8]>,
    from: Endpoint,
}

/// Received data. Chunks never move their bytes, so exposed segments stay
/// valid until released.
#[derive(Default)]
struct Rx {
    chunks: VecDeque<Chunk>,
    /// Consumed bytes of the front chunk.
    head: usize,
    /// Unconsumed bytes.
    len: usize,
    /// Bytes exposed as segments and not freed yet, counted from the front.
    pinned: usize,
}

impl Rx {
    fn push(&mut self, data: &[u8], from: Endpoint) {
        self.len += data.len();
        self.chunks.push_back(Chunk {
            data: data.into(),
            from,
        });
    }

    fn available(&self) -> usize {
        self.len - self.pinned
    }

    fn consume(&mut self, mut n: usize) {
        self.len -= n;
        while n > 0 {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let remaining = front.data.len() - self.head;
            if n < remaining {
                self.head += n;
                break;
            }
            n -= remaining;
            self.head = 0;
            self.chunks.pop_front();
        }
    }

    fn read_stream(&mut self, buf: &mut [u8]) -> usize {
        let mut copied = 0;
        while copied < buf.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let src = &front.data[self.head..];
            let n = src.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&src[..n]);
            copied += n;
            self.consume(n);
        }
        copied
    }

    /// Pop one datagram, truncating it to `buf`.
    fn read_datagram(&mut self, buf: &mut [u8]) -> Option<(usize, Endpoint)> {
        let chunk = self.chunks.pop_front()?;
        let src = &chunk.data[self.head..];
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        self.len -= src.len();
        self.head = 0;
        Some((n, chunk.from))
    }

    fn expose(&mut self, segments: &mut [DataSegment], max_bytes: usize) -> usize {
        let mut skip = self.pinned;
        let mut exposed = 0;
        let mut count = 0;
        for (i, chunk) in self.chunks.iter().enumerate() {
            let start = if i == 0 { self.head } else { 0 };
            let src = &chunk.data[start..];
            if skip >= src.len() {
                skip -= src.len();
                continue;
            }
            if count == segments.len() || exposed >= max_bytes {
                break;
            }
            let src = &src[skip..];
            skip = 0;
            let n = src.len().min(max_bytes - exposed);
            segments[count] = DataSegment {
                data: src.as_ptr(),
                len: n as u32,
            };
            count += 1;
            exposed += n;
        }
        self.pinned += exposed;
        exposed
    }

    fn release(&mut self, n: usize) {
        let n = n.min(self.pinned);
        self.pinned -= n;
        self.consume(n);
    }
}

struct Session {
    proto: u32,
    state: State,
    nonblocking: bool,
    local: Option<Endpoint>,
    peer: Option<Endpoint>,
    /// Connected stream peer, cleared when the peer closes.
    peer_sh: Option<SessionHandle>,
    peer_closed: bool,
    backlog: VecDeque<SessionHandle>,
    backlog_max: usize,
    rx: Rx,
    attrs: HashMap<Attr, i32>,
    interest: Option<Interest>,
    msg_flushes: usize,
}

impl Session {
    fn new(proto: u32, nonblocking: bool) -> Self {
        Self {
            proto,
            state: State::Idle,
            nonblocking,
            local: None,
            peer: None,
            peer_sh: None,
            peer_closed: false,
            backlog: VecDeque::new(),
            backlog_max: 0,
            rx: Rx::default(),
            attrs: HashMap::new(),
            interest: None,
            msg_flushes: 0,
        }
    }
}

struct Inner {
    current: i32,
    workers: Vec<Slab<Session>>,
    fifo_size: usize,
    next_port: u16,
}

impl Inner {
    /// Slot of `sh`, including a closed session waiting for its segments.
    fn slot(&self, sh: SessionHandle) -> Option<&Session> {
        let worker = (sh >> WORKER_SHIFT) as usize;
        self.workers.get(worker)?.get((sh & INDEX_MASK) as usize)
    }

    fn slot_mut(&mut self, sh: SessionHandle) -> Option<&mut Session> {
        let worker = (sh >> WORKER_SHIFT) as usize;
        self.workers.get_mut(worker)?.get_mut((sh & INDEX_MASK) as usize)
    }

    fn session(&self, sh: SessionHandle) -> Option<&Session> {
        self.slot(sh).filter(|s| s.state != State::Closed)
    }

    fn session_mut(&mut self, sh: SessionHandle) -> Option<&mut Session> {
        self.slot_mut(sh).filter(|s| s.state != State::Closed)
    }

    fn remove(&mut self, sh: SessionHandle) -> Option<Session> {
        let worker = (sh >> WORKER_SHIFT) as usize;
        self.workers
            .get_mut(worker)?
            .try_remove((sh & INDEX_MASK) as usize)
    }

    fn insert(&mut self, worker: u32, session: Session) -> SessionHandle {
        let index = self.workers[worker as usize].insert(session) as u32;
        debug_assert!(index <= INDEX_MASK);
        worker << WORKER_SHIFT | index
    }

    fn handles(&self) -> impl Iterator<Item = SessionHandle> + '_ {
        self.workers.iter().enumerate().flat_map(|(worker, slab)| {
            slab.iter()
                .map(move |(index, _)| (worker as u32) << WORKER_SHIFT | index as u32)
        })
    }

    /// Session of `proto` bound to `ep`. Unspecified addresses match any
    /// address of the same family.
    fn find_bound(&self, proto: u32, ep: &Endpoint, states: &[State]) -> Option<SessionHandle> {
        self.handles().find(|sh| {
            self.session(*sh).is_some_and(|s| {
                s.proto == proto
                    && states.contains(&s.state)
                    && s.local.is_some_and(|local| endpoint_matches(&local, ep))
            })
        })
    }

    /// Returns true if a session of `worker` is bound to `ep`. Workers bind
    /// the same address independently, the way listeners are shared.
    fn address_in_use(&self, worker: u32, proto: u32, ep: &Endpoint) -> bool {
        self.handles()
            .filter(|sh| sh >> WORKER_SHIFT == worker)
            .filter_map(|sh| self.session(sh))
            .any(|s| {
                s.proto == proto
                    && s.state != State::Idle
                    && s.local.is_some_and(|local| {
                        endpoint_matches(&local, ep) || endpoint_matches(ep, &local)
                    })
            })
    }

    fn ephemeral_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.checked_add(1).unwrap_or(EPHEMERAL_PORT_START);
        port
    }

    /// Local endpoint of `sh`, binding it to an ephemeral port first if it
    /// has none.
    fn auto_bind(&mut self, sh: SessionHandle, towards: &Endpoint) -> Endpoint {
        if let Some(local) = self.session(sh).and_then(|s| s.local) {
            return local;
        }
        let local = Endpoint {
            port: self.ephemeral_port().to_be(),
            ..*towards
        };
        if let Some(s) = self.session_mut(sh) {
            s.local = Some(local);
        }
        local
    }

    fn readiness(&self, s: &Session) -> u32 {
        let mut ready = 0;
        match s.state {
            State::Listening => {
                if !s.backlog.is_empty() {
                    ready |= EPOLLIN;
                }
            }
            State::Connected if s.proto == PROTO_TCP => {
                if s.rx.available() > 0 || s.peer_closed {
                    ready |= EPOLLIN;
                }
                match s.peer_sh.and_then(|p| self.session(p)) {
                    Some(peer) if peer.rx.len < self.fifo_size => ready |= EPOLLOUT,
                    Some(_) => {}
                    None => ready |= EPOLLHUP,
                }
            }
            _ => {
                if s.rx.available() > 0 {
                    ready |= EPOLLIN;
                }
                if s.proto == PROTO_UDP {
                    ready |= EPOLLOUT;
                }
            }
        }
        ready
    }

    fn deliver(&mut self, sh: SessionHandle, buf: &[u8], flush: bool) -> i32 {
        let fifo_size = self.fifo_size;
        let Some(s) = self.session(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.state != State::Connected {
            return VPPCOM_ENOTCONN;
        }

        if s.proto == PROTO_UDP {
            let Some(peer) = s.peer else {
                return VPPCOM_ENOTCONN;
            };
            let from = self.auto_bind(sh, &peer);
            if let Some(dst) = self.find_bound(PROTO_UDP, &peer, &[State::Bound, State::Connected])
                && let Some(dst) = self.session_mut(dst)
            {
                if dst.rx.len + buf.len() > fifo_size {
                    return VPPCOM_EAGAIN;
                }
                dst.rx.push(buf, from);
            }
            self.count_flush(sh, flush);
            return buf.len() as i32;
        }

        let Some(peer_sh) = s.peer_sh else {
            return VPPCOM_ECONNRESET;
        };
        if buf.is_empty() {
            return 0;
        }
        let from = s.local.unwrap_or_default();
        let Some(peer) = self.session_mut(peer_sh) else {
            return VPPCOM_ECONNRESET;
        };
        let n = buf.len().min(fifo_size - peer.rx.len.min(fifo_size));
        if n == 0 {
            return VPPCOM_EAGAIN;
        }
        peer.rx.push(&buf[..n], from);
        self.count_flush(sh, flush);
        n as i32
    }

    fn count_flush(&mut self, sh: SessionHandle, flush: bool) {
        if flush && let Some(s) = self.session_mut(sh) {
            s.msg_flushes += 1;
        }
    }

    fn receive(&mut self, sh: SessionHandle, buf: &mut [u8], ep: Option<&mut Endpoint>) -> i32 {
        let Some(s) = self.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.rx.pinned > 0 {
            return -libc::EBUSY;
        }
        if s.proto == PROTO_UDP {
            let Some((n, from)) = s.rx.read_datagram(buf) else {
                return VPPCOM_EAGAIN;
            };
            if let Some(ep) = ep {
                *ep = from;
            }
            return n as i32;
        }

        if s.rx.len == 0 {
            return match s.state {
                State::Connected if s.peer_closed => 0,
                State::Connected => VPPCOM_EAGAIN,
                _ => VPPCOM_ENOTCONN,
            };
        }
        let n = s.rx.read_stream(buf);
        if let (Some(ep), Some(peer)) = (ep, s.peer) {
            *ep = peer;
        }
        n as i32
    }
}

fn endpoint_matches(bound: &Endpoint, ep: &Endpoint) -> bool {
    bound.is_ip4 == ep.is_ip4
        && bound.port == ep.port
        && (bound.ip_bytes() == ep.ip_bytes() || bound.ip_bytes().iter().all(|b| *b == 0))
}

fn write_attr(buf: &mut [u8], value: i32) -> i32 {
    match buf.get_mut(..4) {
        Some(dst) => {
            dst.copy_from_slice(&value.to_ne_bytes());
            4
        }
        None => VPPCOM_EINVAL,
    }
}

/// In-process implementation of the session library.
pub struct Loopback {
    inner: Mutex<Inner>,
}

impl Default for Loopback {
    fn default() -> Self {
        Self::with_fifo_size(DEFAULT_FIFO_SIZE)
    }
}

impl Loopback {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a library whose receive FIFOs hold `fifo_size` bytes.
    pub fn with_fifo_size(fifo_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current: -1,
                workers: Vec::new(),
                fifo_size,
                next_port: EPHEMERAL_PORT_START,
            }),
        }
    }

    /// Number of registered workers.
    pub fn worker_count(&self) -> usize {
        self.inner.lock().workers.len()
    }

    /// Ready sessions registered with the multiplexer of `worker`, as
    /// `(token, events)` pairs. Level-triggered: readiness is reported for as
    /// long as it holds.
    pub fn epoll_wait(&self, worker: u32) -> Vec<(u64, u32)> {
        let inner = self.inner.lock();
        inner
            .handles()
            .filter_map(|sh| {
                let s = inner.session(sh)?;
                let interest = s.interest.filter(|i| i.epoll == worker)?;
                let events = inner.readiness(s) & (interest.events | EPOLLERR | EPOLLHUP);
                (events != 0).then_some((interest.token, events))
            })
            .collect()
    }

    /// Multiplexer interest registered for `sh`.
    pub fn interest(&self, sh: SessionHandle) -> Option<u32> {
        self.inner.lock().session(sh)?.interest.map(|i| i.events)
    }

    /// Number of writes on `sh` that ended a message.
    pub fn msg_flushes(&self, sh: SessionHandle) -> usize {
        self.inner
            .lock()
            .session(sh)
            .map(|s| s.msg_flushes)
            .unwrap_or_default()
    }

    /// Bytes of `sh` exposed as segments and not freed yet.
    pub fn pinned_bytes(&self, sh: SessionHandle) -> usize {
        self.inner
            .lock()
            .slot(sh)
            .map(|s| s.rx.pinned)
            .unwrap_or_default()
    }

    /// Raw value of a stored attribute, bypassing the attribute API.
    pub fn attr(&self, sh: SessionHandle, attr: Attr) -> Option<i32> {
        self.inner.lock().session(sh)?.attrs.get(&attr).copied()
    }

    /// Returns true if `sh` is an open session.
    pub fn is_open(&self, sh: SessionHandle) -> bool {
        self.inner.lock().session(sh).is_some()
    }
}

impl VppCom for Loopback {
    fn session_create(&self, proto: u32, is_nonblocking: bool) -> i32 {
        let mut inner = self.inner.lock();
        if proto != PROTO_TCP && proto != PROTO_UDP {
            return -libc::EPROTONOSUPPORT;
        }
        let Ok(worker) = u32::try_from(inner.current) else {
            return VPPCOM_EINVAL;
        };
        let sh = inner.insert(worker, Session::new(proto, is_nonblocking));
        trace!(sh, proto, worker, "session created");
        sh as i32
    }

    fn session_close(&self, sh: SessionHandle) -> i32 {
        let mut inner = self.inner.lock();
        let Some(session) = inner.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        let peer_sh = session.peer_sh.take();
        let backlog = std::mem::take(&mut session.backlog);
        let pinned = session.rx.pinned;
        if pinned > 0 {
            session.state = State::Closed;
            session.interest = None;
        } else {
            inner.remove(sh);
        }
        trace!(sh, pinned, "session closed");

        if let Some(peer_sh) = peer_sh
            && let Some(peer) = inner.session_mut(peer_sh)
        {
            peer.peer_sh = None;
            peer.peer_closed = true;
        }
        for pending in backlog {
            inner.remove(pending);
        }
        VPPCOM_OK
    }

    fn session_read(&self, sh: SessionHandle, buf: &mut [u8]) -> i32 {
        self.inner.lock().receive(sh, buf, None)
    }

    fn session_write(&self, sh: SessionHandle, buf: &[u8]) -> i32 {
        self.inner.lock().deliver(sh, buf, false)
    }

    fn session_write_msg(&self, sh: SessionHandle, buf: &[u8]) -> i32 {
        self.inner.lock().deliver(sh, buf, true)
    }

    fn session_read_segments(
        &self,
        sh: SessionHandle,
        segments: &mut [DataSegment],
        max_bytes: u32,
    ) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.rx.available() == 0 {
            return match s.state {
                State::Connected if s.peer_closed => 0,
                _ => VPPCOM_EAGAIN,
            };
        }
        let max_bytes = (max_bytes as usize).min(i32::MAX as usize);
        s.rx.expose(segments, max_bytes) as i32
    }

    fn session_free_segments(&self, sh: SessionHandle, n_bytes: u32) {
        let mut inner = self.inner.lock();
        let Some(s) = inner.slot_mut(sh) else {
            return;
        };
        s.rx.release(n_bytes as usize);
        if s.state == State::Closed && s.rx.pinned == 0 {
            inner.remove(sh);
            trace!(sh, "released closed session");
        }
    }

    fn session_recvfrom(
        &self,
        sh: SessionHandle,
        buf: &mut [u8],
        _flags: i32,
        ep: Option<&mut Endpoint>,
    ) -> i32 {
        self.inner.lock().receive(sh, buf, ep)
    }

    fn session_bind(&self, sh: SessionHandle, ep: &Endpoint) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.state != State::Idle {
            return VPPCOM_EINVAL;
        }
        let proto = s.proto;
        let reuse = s.attrs.get(&Attr::ReuseAddr).is_some_and(|v| *v != 0);

        let mut ep = *ep;
        if ep.port == 0 {
            ep.port = inner.ephemeral_port().to_be();
        } else if !reuse && inner.address_in_use(sh >> WORKER_SHIFT, proto, &ep) {
            return VPPCOM_EADDRINUSE;
        }

        if let Some(s) = inner.session_mut(sh) {
            s.local = Some(ep);
            s.state = State::Bound;
        }
        trace!(sh, port = ep.port_host(), "session bound");
        VPPCOM_OK
    }

    fn session_listen(&self, sh: SessionHandle, backlog: u32) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.proto != PROTO_TCP {
            return -libc::EOPNOTSUPP;
        }
        if s.state != State::Bound {
            return VPPCOM_EINVAL;
        }
        s.state = State::Listening;
        s.backlog_max = backlog.max(1) as usize;
        VPPCOM_OK
    }

    fn session_accept(&self, sh: SessionHandle, ep: &mut Endpoint, flags: i32) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.state != State::Listening {
            return VPPCOM_EINVAL;
        }
        let Some(accepted) = s.backlog.pop_front() else {
            return VPPCOM_EAGAIN;
        };
        let Some(session) = inner.session_mut(accepted) else {
            return VPPCOM_ECONNRESET;
        };
        session.nonblocking = flags & libc::O_NONBLOCK != 0;
        *ep = session.peer.unwrap_or_default();
        trace!(sh, accepted, "session accepted");
        accepted as i32
    }

    fn session_connect(&self, sh: SessionHandle, ep: &Endpoint) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session(sh) else {
            return VPPCOM_EBADFD;
        };
        if s.state == State::Connected || s.state == State::Listening {
            return -libc::EISCONN;
        }

        if s.proto == PROTO_UDP {
            inner.auto_bind(sh, ep);
            if let Some(s) = inner.session_mut(sh) {
                s.peer = Some(*ep);
                s.state = State::Connected;
            }
            return VPPCOM_OK;
        }

        let Some(listener) = inner.find_bound(PROTO_TCP, ep, &[State::Listening]) else {
            return VPPCOM_ECONNREFUSED;
        };
        let (owner, full) = match inner.session(listener) {
            Some(l) => (listener >> WORKER_SHIFT, l.backlog.len() >= l.backlog_max),
            None => return VPPCOM_ECONNREFUSED,
        };
        if full {
            return VPPCOM_ECONNREFUSED;
        }

        let local = inner.auto_bind(sh, ep);
        let mut server = Session::new(PROTO_TCP, true);
        server.state = State::Connected;
        server.local = Some(*ep);
        server.peer = Some(local);
        server.peer_sh = Some(sh);
        let server_sh = inner.insert(owner, server);

        if let Some(l) = inner.session_mut(listener) {
            l.backlog.push_back(server_sh);
        }
        if let Some(s) = inner.session_mut(sh) {
            s.state = State::Connected;
            s.peer = Some(*ep);
            s.peer_sh = Some(server_sh);
        }
        trace!(sh, listener, server_sh, "session connected");
        VPPCOM_OK
    }

    fn get_attr(&self, sh: SessionHandle, attr: Attr, buf: &mut [u8]) -> i32 {
        let inner = self.inner.lock();
        let Some(s) = inner.session(sh) else {
            return VPPCOM_EBADFD;
        };
        let value = match attr {
            Attr::Flags => {
                if s.nonblocking {
                    libc::O_NONBLOCK
                } else {
                    0
                }
            }
            Attr::Listen => (s.state == State::Listening) as i32,
            Attr::Protocol => s.proto as i32,
            Attr::TxFifoLen | Attr::RxFifoLen => inner.fifo_size as i32,
            Attr::Error => 0,
            _ => s.attrs.get(&attr).copied().unwrap_or_default(),
        };
        write_attr(buf, value)
    }

    fn set_attr(&self, sh: SessionHandle, attr: Attr, buf: &[u8]) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        let Some(value) = attr_value(buf) else {
            return VPPCOM_EINVAL;
        };
        match attr {
            Attr::Flags => s.nonblocking = value & libc::O_NONBLOCK != 0,
            Attr::Listen | Attr::Protocol | Attr::TxFifoLen | Attr::RxFifoLen | Attr::Error => {
                return VPPCOM_EINVAL;
            }
            _ => {
                s.attrs.insert(attr, value);
            }
        }
        VPPCOM_OK
    }

    fn get_endpoint(&self, sh: SessionHandle, which: EndpointAttr, ep: &mut Endpoint) -> i32 {
        let inner = self.inner.lock();
        let Some(s) = inner.session(sh) else {
            return VPPCOM_EBADFD;
        };
        let found = match which {
            EndpointAttr::Local => s.local,
            EndpointAttr::Peer => s.peer,
        };
        match found {
            Some(found) => {
                *ep = found;
                VPPCOM_OK
            }
            None => VPPCOM_ENOTCONN,
        }
    }

    fn worker_index(&self) -> i32 {
        self.inner.lock().current
    }

    fn worker_index_set(&self, index: i32) {
        self.inner.lock().current = index;
    }

    fn worker_register(&self) -> i32 {
        let mut inner = self.inner.lock();
        inner.workers.push(Slab::new());
        inner.current = inner.workers.len() as i32 - 1;
        trace!(worker = inner.current, "worker registered");
        VPPCOM_OK
    }

    fn session_worker(&self, sh: SessionHandle) -> i32 {
        match self.inner.lock().session(sh) {
            Some(_) => (sh >> WORKER_SHIFT) as i32,
            None => -1,
        }
    }

    fn epoll_handle(&self, worker: u32) -> u32 {
        worker
    }

    fn epoll_ctl(&self, epoll: u32, op: EpollOp, sh: SessionHandle, events: u32, token: u64) -> i32 {
        let mut inner = self.inner.lock();
        let Some(s) = inner.session_mut(sh) else {
            return VPPCOM_EBADFD;
        };
        match (op, s.interest.is_some()) {
            (EpollOp::Add, true) => return -libc::EEXIST,
            (EpollOp::Mod | EpollOp::Del, false) => return -libc::ENOENT,
            (EpollOp::Del, true) => s.interest = None,
            (EpollOp::Add | EpollOp::Mod, _) => {
                s.interest = Some(Interest {
                    epoll,
                    events,
                    token,
                })
            }
        }
        VPPCOM_OK
    }
}
