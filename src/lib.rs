//! vcl-io - VPP comms library sessions as event-driven proxy I/O handles.
//!
//! This crate lets a proxy that programs against a socket abstraction run
//! its connections on top of a userspace transport stack reached through
//! the VPP comms library (VCL) instead of kernel sockets.
//!
//! # Overview
//!
//! - [`VclSocketInterface`] creates sessions on the calling worker and
//!   wraps them as [`VclIoHandle`]s.
//! - [`VclIoHandle`] implements the host [`IoHandle`](host::IoHandle)
//!   contract: vectored reads and writes, zero-copy reads into host
//!   buffers, datagram emulation, socket options and addresses.
//! - [`VclFileEvent`] reports readiness to the host and coalesces injected
//!   readiness into one callback per loop iteration.
//! - [`WorkerContext`] tracks which library worker owns a session and
//!   switches to it for cross-worker queries.
//!
//! The library itself is reached through the [`VppCom`] trait. [`Loopback`]
//! is an in-process implementation with the same semantics, used by the
//! tests and the `vcl-loopback-echo` binary.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vcl_io::host::{IoHandle, SocketType};
//! use vcl_io::{ActivationMode, Loopback, VclSocketInterface};
//!
//! let interface = VclSocketInterface::new(Arc::new(Loopback::new()), ActivationMode::default());
//! let mut listener = interface.session(SocketType::Stream)?;
//! listener.bind(&"127.0.0.1:8080".parse()?)?;
//! listener.listen(128)?;
//! ```

pub mod address;
pub mod config;
pub mod error;
pub mod event;
pub mod host;
pub mod interface;
pub mod io_handle;
pub mod logging;
pub mod loopback;
pub mod options;
pub mod vppcom;
pub mod worker;
pub mod zero_copy;

pub use config::{ActivationMode, Config};
pub use error::{ConfigError, IoCallResult, IoError, SysCallResult};
pub use event::{Immediate, NextIteration, VclEvent, VclFileEvent};
pub use interface::VclSocketInterface;
pub use io_handle::VclIoHandle;
pub use loopback::Loopback;
pub use vppcom::{SessionHandle, VppCom};
pub use worker::{WorkerContext, WorkerGuard};
