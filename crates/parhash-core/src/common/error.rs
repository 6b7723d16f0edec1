//! Error types for the parallel hash service.
//!
//! This module defines the central `Error` enum, which captures every failure
//! a `ParallelHash` batch can end with. It implements `From<Error>` for
//! `tonic::Status` so handlers can propagate with `?` and clients receive an
//! appropriate status code.
//!
//! ## Error Cases
//! - `Connect`: A backend address could not be parsed or dialled.
//! - `Backend`: A backend answered `Hash` with a non-OK status. The remote
//!   code is passed through, except that `CANCELLED` and `DEADLINE_EXCEEDED`
//!   (how a per-call backend timeout surfaces) become `UNAVAILABLE` so they
//!   cannot be mistaken for the caller's own cancellation.
//! - `Cancelled`: The call's cancellation scope fired (client went away,
//!   deadline passed, or the service is stopping).
//! - `InvalidRequest`: The client request exceeded configured bounds.
//! - `ServiceShutdown`: A request arrived while the service was shutting down.
//! - `TaskFailed`: A spawned backend task panicked or was aborted.

use tonic::{Code, Status};

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the parallel hash service.
#[derive(Clone, thiserror::Error, Debug, PartialEq, Eq)]
pub enum Error {
    /// Establishing a channel to a backend failed.
    #[error("Failed to connect to backend {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// The backend rejected or failed the `Hash` call.
    #[error("Backend {index} ({addr}) failed with {code:?}: {message}")]
    Backend {
        index: usize,
        addr: String,
        code: Code,
        message: String,
    },

    /// The batch was cancelled before every buffer was hashed.
    #[error("Request cancelled")]
    Cancelled,

    /// The client request was invalid or exceeded constraints.
    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    /// The service is in the process of shutting down.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// A backend task did not run to completion (panic or abort).
    #[error("Task failed: {reason}")]
    TaskFailed { reason: String },
}

impl Error {
    /// Wraps a status returned by backend `index`.
    pub fn backend(index: usize, addr: impl Into<String>, status: &Status) -> Self {
        Self::Backend {
            index,
            addr: addr.into(),
            code: status.code(),
            message: status.message().to_string(),
        }
    }
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::Connect { addr, reason } => {
                Status::unavailable(format!("Backend {addr} unreachable: {reason}"))
            }
            Error::Backend {
                index,
                addr,
                code,
                message,
            } => {
                let code = match code {
                    Code::Cancelled | Code::DeadlineExceeded => Code::Unavailable,
                    code => code,
                };
                Status::new(code, format!("Backend {index} ({addr}): {message}"))
            }
            Error::Cancelled => Status::cancelled("Request was cancelled"),
            Error::InvalidRequest { reason } => Status::invalid_argument(reason),
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::TaskFailed { reason } => Status::internal(format!("Task failed: {reason}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_status_keeps_remote_code() {
        let err = Error::backend(1, "http://10.0.0.2:7000", &Status::resource_exhausted("full"));
        let status = Status::from(err);
        assert_eq!(status.code(), Code::ResourceExhausted);
        assert!(status.message().contains("full"));
        assert!(status.message().contains("10.0.0.2:7000"));
    }

    #[test]
    fn backend_timeouts_are_not_caller_cancellations() {
        for status in [
            Status::cancelled("Timeout expired"),
            Status::deadline_exceeded("too slow"),
        ] {
            let message = status.message().to_string();
            let status = Status::from(Error::backend(0, "http://10.0.0.1:7000", &status));
            assert_eq!(status.code(), Code::Unavailable);
            assert!(status.message().contains(&message), "{status:?}");
        }
        assert_eq!(Status::from(Error::Cancelled).code(), Code::Cancelled);
    }

    #[test]
    fn local_failures_map_to_distinct_codes() {
        let connect = Error::Connect {
            addr: "http://127.0.0.1:1".into(),
            reason: "refused".into(),
        };
        assert_eq!(Status::from(connect).code(), Code::Unavailable);
        assert_eq!(Status::from(Error::Cancelled).code(), Code::Cancelled);
        assert_eq!(Status::from(Error::ServiceShutdown).code(), Code::Unavailable);
        assert_eq!(
            Status::from(Error::InvalidRequest {
                reason: "too many".into()
            })
            .code(),
            Code::InvalidArgument
        );
        assert_eq!(
            Status::from(Error::TaskFailed {
                reason: "panic".into()
            })
            .code(),
            Code::Internal
        );
    }
}
