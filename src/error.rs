//! Error types for the session adapter.
//!
//! Foreign calls report failures as negative errno-style return codes. Those
//! codes are mapped into [`IoError`] at the adapter boundary. Codes that can
//! only be produced by a programming error (an invalid argument on an I/O
//! call) are not mapped; they abort.

use crate::vppcom::{VPPCOM_EAGAIN, VPPCOM_EINVAL};
use std::io;

/// A recoverable I/O condition reported by the session library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IoError {
    /// The operation would block. Allocation free, so it is cheap to return
    /// from the hot read/write paths.
    #[error("resource temporarily unavailable")]
    Again,
    /// Any other failure, carrying the positive errno value.
    #[error("os error {0}")]
    Os(i32),
    /// The operation has no equivalent in the session library.
    #[error("operation not supported")]
    Unsupported,
}

impl IoError {
    /// Map a negative foreign return code to an error.
    #[inline]
    pub fn from_code(rv: i32) -> Self {
        debug_assert!(rv < 0);
        if rv == VPPCOM_EAGAIN {
            IoError::Again
        } else {
            IoError::Os(-rv)
        }
    }

    /// The errno equivalent of this error.
    pub fn errno(&self) -> i32 {
        match self {
            IoError::Again => libc::EAGAIN,
            IoError::Os(errno) => *errno,
            IoError::Unsupported => libc::EOPNOTSUPP,
        }
    }

    /// Returns true for the would-block condition.
    #[inline]
    pub fn is_again(&self) -> bool {
        matches!(self, IoError::Again)
    }
}

impl From<IoError> for io::Error {
    fn from(e: IoError) -> Self {
        match e {
            IoError::Again => io::Error::from(io::ErrorKind::WouldBlock),
            IoError::Os(errno) => io::Error::from_raw_os_error(errno),
            IoError::Unsupported => io::Error::new(io::ErrorKind::Unsupported, e),
        }
    }
}

/// Result of a call that transfers bytes.
pub type IoCallResult = Result<usize, IoError>;

/// Result of a control call (bind, listen, options).
pub type SysCallResult<T = ()> = Result<T, IoError>;

/// Convert the return value of a foreign I/O call.
///
/// # Panics
///
/// Panics if the foreign layer reports an invalid argument.
pub(crate) fn io_call_result(rv: i32) -> IoCallResult {
    if rv >= 0 {
        return Ok(rv as usize);
    }
    assert!(rv != VPPCOM_EINVAL, "invalid argument passed in");
    Err(IoError::from_code(rv))
}

/// Result for a transfer that may have been interrupted part way through a
/// slice list: bytes moved so far win over the failure that stopped it.
pub(crate) fn transfer_result(transferred: usize, last_rv: i32) -> IoCallResult {
    if transferred == 0 {
        io_call_result(last_rv)
    } else {
        Ok(transferred)
    }
}

/// Convert the return value of a foreign control call.
pub(crate) fn sys_call_result(rv: i32) -> SysCallResult {
    if rv < 0 {
        Err(IoError::from_code(rv))
    } else {
        Ok(())
    }
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vppcom::VPPCOM_EBADFD;

    #[test]
    fn test_io_call_result_success() {
        assert_eq!(io_call_result(0), Ok(0));
        assert_eq!(io_call_result(42), Ok(42));
    }

    #[test]
    fn test_io_call_result_again() {
        assert_eq!(io_call_result(VPPCOM_EAGAIN), Err(IoError::Again));
    }

    #[test]
    fn test_io_call_result_errno() {
        let err = io_call_result(VPPCOM_EBADFD).unwrap_err();
        assert_eq!(err, IoError::Os(libc::EBADFD));
        assert_eq!(err.errno(), libc::EBADFD);
    }

    #[test]
    #[should_panic(expected = "invalid argument")]
    fn test_io_call_result_einval_is_fatal() {
        let _ = io_call_result(VPPCOM_EINVAL);
    }

    #[test]
    fn test_transfer_result() {
        assert_eq!(transfer_result(10, VPPCOM_EAGAIN), Ok(10));
        assert_eq!(transfer_result(0, VPPCOM_EAGAIN), Err(IoError::Again));
        assert_eq!(transfer_result(0, 0), Ok(0));
    }

    #[test]
    fn test_sys_call_result_does_not_abort_on_einval() {
        assert_eq!(sys_call_result(VPPCOM_EINVAL), Err(IoError::Os(libc::EINVAL)));
        assert_eq!(sys_call_result(0), Ok(()));
    }

    #[test]
    fn test_into_io_error() {
        let e: io::Error = IoError::Again.into();
        assert_eq!(e.kind(), io::ErrorKind::WouldBlock);

        let e: io::Error = IoError::Os(libc::ECONNREFUSED).into();
        assert_eq!(e.raw_os_error(), Some(libc::ECONNREFUSED));

        let e: io::Error = IoError::Unsupported.into();
        assert_eq!(e.kind(), io::ErrorKind::Unsupported);
    }
}
