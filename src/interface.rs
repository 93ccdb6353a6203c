//! Session creation for the host.

use crate::config::ActivationMode;
use crate::error::{IoError, SysCallResult};
use crate::host::{IoHandlePtr, IpVersion, SocketInterface, SocketType};
use crate::io_handle::VclIoHandle;
use crate::vppcom::{PROTO_TCP, PROTO_UDP, SessionHandle, VppCom};
use crate::worker::WorkerContext;
use std::sync::Arc;
use tracing::trace;

/// Creates host sockets backed by sessions of the library.
#[derive(Debug, Clone)]
pub struct VclSocketInterface {
    ctx: WorkerContext,
    mode: ActivationMode,
}

impl VclSocketInterface {
    pub fn new(api: Arc<dyn VppCom>, mode: ActivationMode) -> Self {
        Self {
            ctx: WorkerContext::new(api),
            mode,
        }
    }

    pub fn worker_context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Create a session and return the concrete handle.
    pub fn session(&self, socket_type: SocketType) -> SysCallResult<VclIoHandle> {
        let worker = self.ctx.resolve_or_register();
        let proto = match socket_type {
            SocketType::Stream => PROTO_TCP,
            SocketType::Datagram => PROTO_UDP,
        };
        let rv = self.ctx.api().session_create(proto, true);
        if rv < 0 {
            return Err(IoError::from_code(rv));
        }
        trace!(sh = rv, worker, proto, "created session");
        Ok(VclIoHandle::new(
            rv as SessionHandle,
            self.ctx.clone(),
            self.mode,
        ))
    }
}

impl SocketInterface for VclSocketInterface {
    fn socket(&self, socket_type: SocketType, _version: IpVersion) -> SysCallResult<IoHandlePtr> {
        let handle: IoHandlePtr = Box::new(self.session(socket_type)?);
        Ok(handle)
    }

    fn ip_family_supported(&self, domain: i32) -> bool {
        domain == libc::AF_INET || domain == libc::AF_INET6
    }
}
