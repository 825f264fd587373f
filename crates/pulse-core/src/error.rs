// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy shared by the agent and the collector service.
//!
//! Every retry loop in the pipeline consults [`is_transient`]; nothing else
//! is allowed to decide what is worth retrying.

use std::io;

/// Transport-level failure categories, assigned when a network error is
/// converted into a [`RelayError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    ConnectionRefused,
    TimedOut,
    HostUnreachable,
    AddrNotAvailable,
    ConnectionReset,
    Other,
}

/// SQLSTATE classes reported by PostgreSQL when the connection itself is
/// broken: connection_exception, connection_does_not_exist,
/// connection_failure, invalid_transaction_initiation.
const BROKEN_CONNECTION_SQLSTATES: [&str; 4] = ["08000", "08003", "08006", "0B000"];

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// A metric that violates the kind/value invariant or carries no name.
    #[error("invalid metric: {0}")]
    InvalidMetric(String),

    /// Lookup miss. Fatal for the single request, not a health signal.
    #[error("metric {0} not found")]
    NotFound(String),

    /// Serialization, compression or crypto failure while packaging a batch.
    #[error("payload error: {0}")]
    Payload(String),

    /// Network-level failure, classified by [`TransportKind`].
    #[error("transport error ({kind:?}): {message}")]
    Transport {
        kind: TransportKind,
        message: String,
    },

    /// Storage failure. `code` carries the SQLSTATE when the backend
    /// reported one.
    #[error("database error ({code:?}): {message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    /// A bounded operation ran past its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The remote endpoint answered with a permanent protocol failure.
    #[error("protocol error (status {status}): {message}")]
    Protocol { status: u16, message: String },

    /// A channel or task the operation depends on is gone.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl RelayError {
    pub fn payload(err: impl std::fmt::Display) -> Self {
        RelayError::Payload(err.to_string())
    }

    pub fn database(code: Option<String>, err: impl std::fmt::Display) -> Self {
        RelayError::Database {
            code,
            message: err.to_string(),
        }
    }
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionRefused => TransportKind::ConnectionRefused,
            io::ErrorKind::TimedOut => TransportKind::TimedOut,
            io::ErrorKind::HostUnreachable => TransportKind::HostUnreachable,
            io::ErrorKind::AddrNotAvailable => TransportKind::AddrNotAvailable,
            io::ErrorKind::ConnectionReset => TransportKind::ConnectionReset,
            _ => TransportKind::Other,
        };
        RelayError::Transport {
            kind,
            message: err.to_string(),
        }
    }
}

/// The single source of truth for retry decisions.
///
/// Transient covers connection-level transport failures, deadline misses and
/// the fixed set of broken-connection SQLSTATEs. Validation, not-found,
/// payload and protocol errors are never retried.
pub fn is_transient(err: &RelayError) -> bool {
    match err {
        RelayError::Transport { kind, .. } => matches!(
            kind,
            TransportKind::ConnectionRefused
                | TransportKind::TimedOut
                | TransportKind::HostUnreachable
                | TransportKind::AddrNotAvailable
                | TransportKind::ConnectionReset
        ),
        RelayError::Database {
            code: Some(code), ..
        } => BROKEN_CONNECTION_SQLSTATES.contains(&code.as_str()),
        RelayError::Timeout(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_connection_errors_are_transient() {
        for kind in [
            TransportKind::ConnectionRefused,
            TransportKind::TimedOut,
            TransportKind::HostUnreachable,
            TransportKind::AddrNotAvailable,
            TransportKind::ConnectionReset,
        ] {
            let err = RelayError::Transport {
                kind,
                message: "boom".into(),
            };
            assert!(is_transient(&err), "{kind:?} should be transient");
        }

        let err = RelayError::Transport {
            kind: TransportKind::Other,
            message: "boom".into(),
        };
        assert!(!is_transient(&err));
    }

    #[test]
    fn broken_connection_sqlstates_are_transient() {
        for code in ["08000", "08003", "08006", "0B000"] {
            let err = RelayError::database(Some(code.to_string()), "connection lost");
            assert!(is_transient(&err), "{code} should be transient");
        }

        // Unique violation is a data problem, not a connectivity one.
        let err = RelayError::database(Some("23505".to_string()), "duplicate key");
        assert!(!is_transient(&err));

        let err = RelayError::database(None, "no code at all");
        assert!(!is_transient(&err));
    }

    #[test]
    fn validation_and_lookup_errors_are_fatal() {
        assert!(!is_transient(&RelayError::InvalidMetric("no name".into())));
        assert!(!is_transient(&RelayError::NotFound("Alloc".into())));
        assert!(!is_transient(&RelayError::Payload("bad json".into())));
        assert!(!is_transient(&RelayError::Protocol {
            status: 400,
            message: "bad request".into(),
        }));
    }

    #[test]
    fn timeouts_are_transient() {
        assert!(is_transient(&RelayError::Timeout("health check".into())));
    }

    #[test]
    fn io_error_kinds_map_to_transport_kinds() {
        let err: RelayError = io::Error::from(io::ErrorKind::ConnectionRefused).into();
        assert!(matches!(
            err,
            RelayError::Transport {
                kind: TransportKind::ConnectionRefused,
                ..
            }
        ));

        let err: RelayError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(matches!(
            err,
            RelayError::Transport {
                kind: TransportKind::Other,
                ..
            }
        ));
    }
}
