//! Readiness events for sessions.
//!
//! The session library's multiplexer is level-triggered and reports
//! readiness through the worker's event loop. [`VclEvent`] sits between that
//! source and the host callback and adds injected readiness: events raised
//! with [`FileEvent::activate`] are accumulated and delivered together on the
//! next loop iteration, so a burst of activations turns into a single
//! callback.
//!
//! Two delivery policies exist. [`NextIteration`] only ever delivers through
//! the merged callback. [`Immediate`] also invokes the callback synchronously
//! from `activate`. The policy is fixed when the event is created; see
//! [`VclFileEvent`].
//!
//! Every file event is routed by its multiplexer token on the worker thread
//! that created it. The host feeds what it polls from the worker's
//! multiplexer to [`dispatch_ready`], which reaches the events of accepted
//! and duplicated handles as well, whatever owns them.

use crate::config::ActivationMode;
use crate::host::{Dispatcher, FileEvent, FileReadyCb, FileReadyType, SchedulableCallback};
use crate::io_handle::Session;
use crate::vppcom::{EpollOp, SessionHandle};
use crate::worker::WorkerContext;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};
use tracing::{debug, trace};

const EPOLLIN: u32 = libc::EPOLLIN as u32;
const EPOLLOUT: u32 = libc::EPOLLOUT as u32;
const EPOLLERR: u32 = libc::EPOLLERR as u32;
const EPOLLHUP: u32 = libc::EPOLLHUP as u32;

/// Multiplexer bits for a readiness set.
pub fn to_epoll_events(events: FileReadyType) -> u32 {
    let mut raw = 0;
    if events.contains(FileReadyType::READ) {
        raw |= EPOLLIN;
    }
    if events.contains(FileReadyType::WRITE) {
        raw |= EPOLLOUT;
    }
    if events.contains(FileReadyType::CLOSED) {
        raw |= EPOLLERR | EPOLLHUP;
    }
    raw
}

/// Readiness set for multiplexer bits.
pub fn from_epoll_events(raw: u32) -> FileReadyType {
    let mut events = FileReadyType::empty();
    if raw & EPOLLIN != 0 {
        events |= FileReadyType::READ;
    }
    if raw & EPOLLOUT != 0 {
        events |= FileReadyType::WRITE;
    }
    if raw & (EPOLLERR | EPOLLHUP) != 0 {
        events |= FileReadyType::CLOSED;
    }
    events
}

/// Token reported by the multiplexer for a session.
#[inline]
pub fn token(sh: SessionHandle) -> u64 {
    sh as u64
}

thread_local! {
    /// File events of the calling worker by multiplexer token.
    static ROUTES: RefCell<HashMap<u64, Weak<Inner>>> = RefCell::new(HashMap::new());
}

/// Deliver readiness polled from the calling worker's multiplexer, as
/// `(token, events)` pairs, to the file events registered for each token.
/// Returns the number of callbacks reached.
pub fn dispatch_ready(ready: impl IntoIterator<Item = (u64, u32)>) -> usize {
    let mut delivered = 0;
    for (token, raw) in ready {
        let events = from_epoll_events(raw);
        if events.is_empty() {
            continue;
        }
        let route = ROUTES.with(|routes| routes.borrow().get(&token).and_then(Weak::upgrade));
        let Some(inner) = route else {
            trace!(token, raw, "no file event for token");
            continue;
        };
        inner.merge_injected_and_run(events);
        delivered += 1;
    }
    delivered
}

/// A session's entry in the multiplexer of the calling worker.
#[derive(Clone)]
pub struct Registration {
    ctx: WorkerContext,
    session: Rc<Session>,
}

impl Registration {
    pub(crate) fn new(ctx: WorkerContext, session: Rc<Session>) -> Self {
        Self { ctx, session }
    }

    /// Start watching `events`, or replace the interest if the session is
    /// already registered.
    pub(crate) fn register(&self, events: FileReadyType) -> i32 {
        let op = if self.session.registered() {
            EpollOp::Mod
        } else {
            EpollOp::Add
        };
        let rv = self.ctl(op, to_epoll_events(events));
        if rv >= 0 {
            self.session.set_registered();
        }
        rv
    }

    /// Replace the interest of a registered session.
    pub(crate) fn modify(&self, events: FileReadyType) -> i32 {
        self.ctl(EpollOp::Mod, to_epoll_events(events))
    }

    pub(crate) fn ctl(&self, op: EpollOp, raw: u32) -> i32 {
        let sh = self.session.sh();
        let worker = self.ctx.resolve_or_register();
        let api = self.ctx.api();
        let rv = api.epoll_ctl(api.epoll_handle(worker), op, sh, raw, token(sh));
        trace!(sh, worker, ?op, events = raw, rv, "epoll_ctl");
        if rv < 0 {
            debug!(sh, ?op, rv, "epoll_ctl failed");
        }
        rv
    }
}

/// How `activate` treats the callback before the merged delivery.
pub trait ActivationPolicy: 'static {
    const MODE: ActivationMode;

    /// `activate` also invokes the callback with the activated events.
    const SYNCHRONOUS: bool;
}

/// Invoke the callback synchronously on every activation.
#[derive(Debug, Clone, Copy)]
pub struct Immediate;

/// Defer every activation to the next loop iteration.
#[derive(Debug, Clone, Copy)]
pub struct NextIteration;

impl ActivationPolicy for Immediate {
    const MODE: ActivationMode = ActivationMode::Immediate;
    const SYNCHRONOUS: bool = true;
}

impl ActivationPolicy for NextIteration {
    const MODE: ActivationMode = ActivationMode::NextIteration;
    const SYNCHRONOUS: bool = false;
}

struct Inner {
    token: u64,
    /// Taken out while the callback runs, so the callback may activate its
    /// own handle.
    cb: Cell<Option<FileReadyCb>>,
    /// Injected events waiting for the merged delivery. Non-empty exactly
    /// when the activation callback is scheduled.
    injected: Cell<FileReadyType>,
    activation_cb: Box<dyn SchedulableCallback>,
}

impl Inner {
    /// Invoke the callback. Returns false if it is already running further
    /// up the stack.
    fn run(&self, events: FileReadyType) -> bool {
        let Some(mut cb) = self.cb.take() else {
            return false;
        };
        cb(events);
        self.cb.set(Some(cb));
        true
    }

    fn inject(&self, events: FileReadyType) {
        let injected = self.injected.get();
        if injected.is_empty() {
            debug_assert!(!self.activation_cb.enabled());
            self.activation_cb.schedule_callback_next_iteration();
        }
        self.injected.set(injected | events);
    }

    fn merge_injected_and_run(&self, mut events: FileReadyType) {
        let injected = self.injected.take();
        if !injected.is_empty() {
            events |= injected;
            self.activation_cb.cancel();
        }
        if !self.run(events) {
            trace!(token = self.token, ?events, "callback running, deferring delivery");
            self.inject(events);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let this: *const Inner = self;
        let token = self.token;
        // the thread may be exiting
        let _ = ROUTES.try_with(|routes| {
            let mut routes = routes.borrow_mut();
            if routes
                .get(&token)
                .is_some_and(|route| std::ptr::eq(route.as_ptr(), this))
            {
                routes.remove(&token);
            }
        });
    }
}

/// Readiness source of one session, with injected events coalesced into one
/// delivery per loop iteration.
pub struct VclEvent<P: ActivationPolicy> {
    inner: Rc<Inner>,
    registration: Registration,
    _policy: PhantomData<P>,
}

impl<P: ActivationPolicy> VclEvent<P> {
    pub fn new(dispatcher: &dyn Dispatcher, registration: Registration, cb: FileReadyCb) -> Self {
        let token = token(registration.session.sh());
        let inner = Rc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let activation_cb = dispatcher.create_schedulable_callback(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    assert!(
                        !inner.injected.get().is_empty(),
                        "activation callback without injected events"
                    );
                    inner.merge_injected_and_run(FileReadyType::empty());
                }
            }));
            Inner {
                token,
                cb: Cell::new(Some(cb)),
                injected: Cell::new(FileReadyType::empty()),
                activation_cb,
            }
        });
        ROUTES.with(|routes| routes.borrow_mut().insert(token, Rc::downgrade(&inner)));

        Self {
            inner,
            registration,
            _policy: PhantomData,
        }
    }

    /// Deliver readiness reported by the multiplexer, together with any
    /// injected events still pending.
    pub fn ready(&self, events: FileReadyType) {
        self.inner.merge_injected_and_run(events);
    }

    /// Injected events waiting for delivery.
    pub fn injected(&self) -> FileReadyType {
        self.inner.injected.get()
    }

    /// Returns true while a merged delivery is scheduled.
    pub fn scheduled(&self) -> bool {
        self.inner.activation_cb.enabled()
    }
}

impl<P: ActivationPolicy> FileEvent for VclEvent<P> {
    fn activate(&mut self, events: FileReadyType) {
        assert!(!events.is_empty(), "activate needs at least one event");
        assert!(
            FileReadyType::all().contains(events),
            "unsupported events: {:#x}",
            events.bits()
        );

        if P::SYNCHRONOUS && !self.inner.run(events) {
            // the merged delivery still carries these events
            trace!(token = self.inner.token, ?events, "callback running, not invoked");
        }
        self.inner.inject(events);
    }

    fn set_enabled(&mut self, events: FileReadyType) {
        self.registration.modify(events);
    }

    // the multiplexer is level-triggered: there is no edge to emulate

    fn register_event_if_emulated_edge(&mut self, _events: FileReadyType) {}

    fn unregister_event_if_emulated_edge(&mut self, _events: FileReadyType) {}
}

/// A [`VclEvent`] with its delivery policy chosen at runtime.
pub enum VclFileEvent {
    Immediate(VclEvent<Immediate>),
    NextIteration(VclEvent<NextIteration>),
}

impl VclFileEvent {
    pub fn new(
        mode: ActivationMode,
        dispatcher: &dyn Dispatcher,
        registration: Registration,
        cb: FileReadyCb,
    ) -> Self {
        match mode {
            ActivationMode::Immediate => {
                VclFileEvent::Immediate(VclEvent::new(dispatcher, registration, cb))
            }
            ActivationMode::NextIteration => {
                VclFileEvent::NextIteration(VclEvent::new(dispatcher, registration, cb))
            }
        }
    }

    pub fn mode(&self) -> ActivationMode {
        match self {
            VclFileEvent::Immediate(_) => Immediate::MODE,
            VclFileEvent::NextIteration(_) => NextIteration::MODE,
        }
    }

    pub fn ready(&self, events: FileReadyType) {
        match self {
            VclFileEvent::Immediate(e) => e.ready(events),
            VclFileEvent::NextIteration(e) => e.ready(events),
        }
    }

    pub fn injected(&self) -> FileReadyType {
        match self {
            VclFileEvent::Immediate(e) => e.injected(),
            VclFileEvent::NextIteration(e) => e.injected(),
        }
    }

    pub fn scheduled(&self) -> bool {
        match self {
            VclFileEvent::Immediate(e) => e.scheduled(),
            VclFileEvent::NextIteration(e) => e.scheduled(),
        }
    }
}

impl FileEvent for VclFileEvent {
    fn activate(&mut self, events: FileReadyType) {
        match self {
            VclFileEvent::Immediate(e) => e.activate(events),
            VclFileEvent::NextIteration(e) => e.activate(events),
        }
    }

    fn set_enabled(&mut self, events: FileReadyType) {
        match self {
            VclFileEvent::Immediate(e) => e.set_enabled(events),
            VclFileEvent::NextIteration(e) => e.set_enabled(events),
        }
    }

    fn register_event_if_emulated_edge(&mut self, events: FileReadyType) {
        match self {
            VclFileEvent::Immediate(e) => e.register_event_if_emulated_edge(events),
            VclFileEvent::NextIteration(e) => e.register_event_if_emulated_edge(events),
        }
    }

    fn unregister_event_if_emulated_edge(&mut self, events: FileReadyType) {
        match self {
            VclFileEvent::Immediate(e) => e.unregister_event_if_emulated_edge(events),
            VclFileEvent::NextIteration(e) => e.unregister_event_if_emulated_edge(events),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::LocalDispatcher;
    use crate::loopback::Loopback;
    use crate::vppcom::{PROTO_TCP, VppCom};
    use std::sync::Arc;

    struct Fixture {
        lb: Arc<Loopback>,
        dispatcher: LocalDispatcher,
        session: Rc<Session>,
        delivered: Rc<RefCell<Vec<FileReadyType>>>,
    }

    impl Fixture {
        fn new() -> Self {
            let lb = Arc::new(Loopback::new());
            lb.worker_register();
            let sh = lb.session_create(PROTO_TCP, true) as SessionHandle;
            Self {
                session: Rc::new(Session::new(sh, lb.clone())),
                lb,
                dispatcher: LocalDispatcher::new(),
                delivered: Rc::new(RefCell::new(Vec::new())),
            }
        }

        fn registration(&self) -> Registration {
            Registration::new(WorkerContext::new(self.lb.clone()), self.session.clone())
        }

        fn event(&self, mode: ActivationMode) -> VclFileEvent {
            let delivered = self.delivered.clone();
            VclFileEvent::new(
                mode,
                &self.dispatcher,
                self.registration(),
                Box::new(move |events| delivered.borrow_mut().push(events)),
            )
        }

        fn delivered(&self) -> Vec<FileReadyType> {
            self.delivered.borrow_mut().drain(..).collect()
        }
    }

    fn event_inner(event: &VclFileEvent) -> &Inner {
        match event {
            VclFileEvent::Immediate(e) => &e.inner,
            VclFileEvent::NextIteration(e) => &e.inner,
        }
    }

    fn subsets() -> impl Iterator<Item = FileReadyType> {
        (1..=FileReadyType::all().bits()).map(FileReadyType::from_bits_truncate)
    }

    #[test]
    fn test_epoll_bits() {
        assert_eq!(to_epoll_events(FileReadyType::READ), EPOLLIN);
        assert_eq!(
            to_epoll_events(FileReadyType::WRITE | FileReadyType::CLOSED),
            EPOLLOUT | EPOLLERR | EPOLLHUP
        );
        assert_eq!(from_epoll_events(EPOLLHUP), FileReadyType::CLOSED);
        assert_eq!(
            from_epoll_events(EPOLLIN | EPOLLOUT),
            FileReadyType::READ | FileReadyType::WRITE
        );
        for events in subsets() {
            assert_eq!(from_epoll_events(to_epoll_events(events)), events);
        }
    }

    #[test]
    fn test_activations_coalesce() {
        for mode in [ActivationMode::Immediate, ActivationMode::NextIteration] {
            for first in subsets() {
                for second in subsets() {
                    let f = Fixture::new();
                    let mut event = f.event(mode);
                    event.activate(first);
                    event.activate(second);
                    assert_eq!(event.injected(), first | second);
                    assert!(event.scheduled());
                    f.delivered();

                    assert_eq!(f.dispatcher.run_iteration(), 1);
                    assert_eq!(f.delivered(), vec![first | second]);
                    assert!(event.injected().is_empty());
                    assert!(!event.scheduled());

                    assert_eq!(f.dispatcher.run_iteration(), 0);
                    assert!(f.delivered().is_empty());
                }
            }
        }
    }

    #[test]
    fn test_next_iteration_is_never_synchronous() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::NextIteration);
        event.activate(FileReadyType::READ);
        event.activate(FileReadyType::WRITE);
        assert!(f.delivered().is_empty());

        f.dispatcher.run_iteration();
        assert_eq!(f.delivered(), vec![FileReadyType::READ | FileReadyType::WRITE]);
    }

    #[test]
    fn test_immediate_is_synchronous_and_merged() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::Immediate);
        event.activate(FileReadyType::READ);
        event.activate(FileReadyType::WRITE);
        assert_eq!(f.delivered(), vec![FileReadyType::READ, FileReadyType::WRITE]);

        f.dispatcher.run_iteration();
        assert_eq!(f.delivered(), vec![FileReadyType::READ | FileReadyType::WRITE]);
    }

    #[test]
    fn test_ready_merges_injected() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::NextIteration);
        event.activate(FileReadyType::WRITE);

        event.ready(FileReadyType::READ);
        assert_eq!(f.delivered(), vec![FileReadyType::READ | FileReadyType::WRITE]);
        assert!(!event.scheduled());

        // the merge was satisfied early
        assert_eq!(f.dispatcher.run_iteration(), 0);
        assert!(f.delivered().is_empty());
    }

    #[test]
    fn test_activate_after_delivery_reschedules() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::NextIteration);
        event.activate(FileReadyType::READ);
        f.dispatcher.run_iteration();
        event.activate(FileReadyType::CLOSED);
        f.dispatcher.run_iteration();
        assert_eq!(f.delivered(), vec![FileReadyType::READ, FileReadyType::CLOSED]);
    }

    #[test]
    fn test_callback_reactivates_own_event() {
        for mode in [ActivationMode::Immediate, ActivationMode::NextIteration] {
            let f = Fixture::new();
            let slot: Rc<RefCell<Option<VclFileEvent>>> = Rc::new(RefCell::new(None));
            let rearm = Rc::new(Cell::new(false));

            let delivered = f.delivered.clone();
            let weak = Rc::downgrade(&slot);
            let r = rearm.clone();
            let event = VclFileEvent::new(
                mode,
                &f.dispatcher,
                f.registration(),
                Box::new(move |events| {
                    delivered.borrow_mut().push(events);
                    if r.replace(false)
                        && let Some(slot) = weak.upgrade()
                    {
                        let mut event = slot.borrow_mut();
                        event.as_mut().unwrap().activate(FileReadyType::WRITE);
                    }
                }),
            );
            *slot.borrow_mut() = Some(event);

            slot.borrow_mut()
                .as_mut()
                .unwrap()
                .activate(FileReadyType::READ);
            f.delivered();
            rearm.set(true);

            assert_eq!(f.dispatcher.run_iteration(), 1);
            assert_eq!(f.delivered(), vec![FileReadyType::READ]);
            {
                let event = slot.borrow();
                let event = event.as_ref().unwrap();
                assert_eq!(event.injected(), FileReadyType::WRITE);
                assert!(event.scheduled());
            }

            assert_eq!(f.dispatcher.run_iteration(), 1);
            assert_eq!(f.delivered(), vec![FileReadyType::WRITE]);
        }
    }

    #[test]
    fn test_immediate_reentry_defers_to_merge() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::Immediate);
        // the callback is running further up the stack
        let cb = event_inner(&event).cb.take();
        event.activate(FileReadyType::READ);
        assert!(f.delivered().is_empty());
        event_inner(&event).cb.set(cb);

        f.dispatcher.run_iteration();
        assert_eq!(f.delivered(), vec![FileReadyType::READ]);
    }

    #[test]
    fn test_dispatch_ready_routes_by_token() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::NextIteration);
        let sh = f.session.sh();
        event.activate(FileReadyType::WRITE);

        let stray = token(sh) + 1000;
        assert_eq!(dispatch_ready([(stray, EPOLLIN), (token(sh), 0)]), 0);
        assert!(f.delivered().is_empty());

        assert_eq!(dispatch_ready([(token(sh), EPOLLIN)]), 1);
        assert_eq!(f.delivered(), vec![FileReadyType::READ | FileReadyType::WRITE]);
        assert!(!event.scheduled());

        drop(event);
        assert_eq!(dispatch_ready([(token(sh), EPOLLIN)]), 0);
    }

    #[test]
    fn test_replaced_route_survives_old_event() {
        let f = Fixture::new();
        let old = f.event(ActivationMode::NextIteration);
        let current = f.event(ActivationMode::NextIteration);
        drop(old);

        assert_eq!(dispatch_ready([(token(f.session.sh()), EPOLLOUT)]), 1);
        assert_eq!(f.delivered(), vec![FileReadyType::WRITE]);
        drop(current);
    }

    #[test]
    fn test_drop_cancels_merge() {
        let f = Fixture::new();
        let mut event = f.event(ActivationMode::NextIteration);
        event.activate(FileReadyType::READ);
        drop(event);
        assert_eq!(f.dispatcher.run_iteration(), 0);
        assert!(f.delivered().is_empty());
    }

    #[test]
    #[should_panic(expected = "at least one event")]
    fn test_activate_empty_panics() {
        let f = Fixture::new();
        f.event(ActivationMode::NextIteration)
            .activate(FileReadyType::empty());
    }

    #[test]
    #[should_panic(expected = "unsupported events")]
    fn test_activate_unknown_bits_panics() {
        let f = Fixture::new();
        f.event(ActivationMode::NextIteration)
            .activate(FileReadyType::from_bits_retain(0x10));
    }

    #[test]
    fn test_set_enabled_updates_interest() {
        let f = Fixture::new();
        let registration = f.registration();
        assert!(registration.register(FileReadyType::READ) >= 0);
        assert_eq!(f.lb.interest(f.session.sh()), Some(EPOLLIN));

        let mut event = f.event(ActivationMode::NextIteration);
        event.set_enabled(FileReadyType::READ | FileReadyType::WRITE);
        assert_eq!(f.lb.interest(f.session.sh()), Some(EPOLLIN | EPOLLOUT));
        // injected state is untouched
        assert!(event.injected().is_empty());
        assert!(!event.scheduled());
    }

    #[test]
    fn test_register_twice_modifies() {
        let f = Fixture::new();
        let registration = f.registration();
        assert_eq!(registration.register(FileReadyType::READ), 0);
        assert_eq!(registration.register(FileReadyType::WRITE), 0);
        assert_eq!(f.lb.interest(f.session.sh()), Some(EPOLLOUT));
    }
}
