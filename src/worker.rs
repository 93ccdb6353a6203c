//! Worker identity in the session library.
//!
//! Sessions belong to the worker that created them. Attribute queries on a
//! session owned by another worker need the library's current worker to be
//! switched to the owner first. That identity is process-wide and
//! unsynchronized, so the switch is scoped by [`WorkerGuard`] and must stay
//! off the I/O path.

use crate::vppcom::{Attr, Endpoint, EndpointAttr, SessionHandle, VppCom, attr_value};
use std::sync::Arc;
use tracing::trace;

/// Handle to the session library's worker state.
#[derive(Clone)]
pub struct WorkerContext {
    api: Arc<dyn VppCom>,
}

impl WorkerContext {
    pub fn new(api: Arc<dyn VppCom>) -> Self {
        Self { api }
    }

    /// The session library.
    #[inline]
    pub fn api(&self) -> &dyn VppCom {
        &*self.api
    }

    pub(crate) fn api_arc(&self) -> &Arc<dyn VppCom> {
        &self.api
    }

    /// Index of the calling worker, registering one if needed.
    ///
    /// # Panics
    ///
    /// Panics if the library cannot register a worker.
    pub fn resolve_or_register(&self) -> u32 {
        let mut index = self.api.worker_index();
        if index == -1 {
            let rv = self.api.worker_register();
            index = self.api.worker_index();
            trace!(rv, index, "registered worker");
        }
        assert!(index != -1, "worker should be initialized");
        index as u32
    }

    /// Worker owning `sh`, if the library knows the session.
    pub fn session_worker(&self, sh: SessionHandle) -> Option<u32> {
        u32::try_from(self.api.session_worker(sh)).ok()
    }

    /// Make the owner of `sh` the current worker until the guard drops.
    pub fn enter_session_worker(&self, sh: SessionHandle) -> WorkerGuard<'_> {
        let previous = self.api.worker_index();
        let owner = self.api.session_worker(sh);
        self.api.worker_index_set(owner);
        WorkerGuard {
            api: &*self.api,
            previous,
        }
    }

    /// Run `f` with the owner of `sh` as the current worker.
    pub fn with_session_worker<T>(&self, sh: SessionHandle, f: impl FnOnce(&dyn VppCom) -> T) -> T {
        let _guard = self.enter_session_worker(sh);
        f(&*self.api)
    }

    /// Discover the local endpoint and protocol of a session that may belong
    /// to another worker. Returns the failing return code on error.
    pub fn peek_session(&self, sh: SessionHandle) -> Result<(Endpoint, u32), i32> {
        self.with_session_worker(sh, |api| {
            let mut ep = Endpoint::default();
            let rv = api.get_endpoint(sh, EndpointAttr::Local, &mut ep);
            if rv < 0 {
                return Err(rv);
            }

            let mut buf = [0u8; 4];
            let rv = api.get_attr(sh, Attr::Protocol, &mut buf);
            if rv < 0 {
                return Err(rv);
            }
            let proto = attr_value(&buf).unwrap_or_default();
            Ok((ep, proto as u32))
        })
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("worker_index", &self.api.worker_index())
            .finish()
    }
}

/// Restores the previous current worker on drop.
pub struct WorkerGuard<'a> {
    api: &'a dyn VppCom,
    previous: i32,
}

impl Drop for WorkerGuard<'_> {
    fn drop(&mut self) {
        self.api.worker_index_set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;
    use crate::vppcom::PROTO_UDP;

    #[test]
    fn test_resolve_or_register() {
        let lb = Arc::new(Loopback::new());
        let ctx = WorkerContext::new(lb.clone());
        assert_eq!(lb.worker_index(), -1);

        let index = ctx.resolve_or_register();
        assert_eq!(index, 0);
        // already registered
        assert_eq!(ctx.resolve_or_register(), 0);
        assert_eq!(lb.worker_count(), 1);
    }

    #[test]
    fn test_with_session_worker_restores_identity() {
        let lb = Arc::new(Loopback::new());
        let ctx = WorkerContext::new(lb.clone());

        ctx.resolve_or_register();
        let sh = lb.session_create(PROTO_UDP, true) as SessionHandle;

        lb.worker_register();
        assert_eq!(lb.worker_index(), 1);

        let seen = ctx.with_session_worker(sh, |api| api.worker_index());
        assert_eq!(seen, 0);
        assert_eq!(lb.worker_index(), 1);
    }

    #[test]
    fn test_peek_session_restores_identity_on_failure() {
        let lb = Arc::new(Loopback::new());
        let ctx = WorkerContext::new(lb.clone());

        ctx.resolve_or_register();
        // unbound: no local endpoint
        let sh = lb.session_create(PROTO_UDP, true) as SessionHandle;
        lb.worker_register();

        assert!(ctx.peek_session(sh).is_err());
        assert_eq!(lb.worker_index(), 1);
    }

    #[test]
    fn test_peek_session() {
        let lb = Arc::new(Loopback::new());
        let ctx = WorkerContext::new(lb.clone());

        ctx.resolve_or_register();
        let sh = lb.session_create(PROTO_UDP, true) as SessionHandle;
        let addr = "127.0.0.1:4000".parse().unwrap();
        assert_eq!(lb.session_bind(sh, &crate::address::to_endpoint(&addr)), 0);

        lb.worker_register();
        let (ep, proto) = ctx.peek_session(sh).unwrap();
        assert_eq!(proto, PROTO_UDP);
        assert_eq!(crate::address::to_address(&ep, sh), addr);
    }
}
