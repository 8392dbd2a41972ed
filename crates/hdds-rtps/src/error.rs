// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Engine-wide error type.
//!
//! Layer-local errors (`SerError`, `ParseError`, `PoolError`)
//! convert into [`Error`] so endpoint operations can use `?` throughout.

use crate::core::ser::SerError;

/// Errors returned by RTPS engine operations.
#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// QoS policy is invalid or inconsistent (rejected at endpoint creation).
    InvalidQos(String),
    /// Locator cannot be used (unknown kind, zero port on unicast, ...).
    InvalidLocator(String),
    /// Named flow controller or profile does not exist.
    UnknownFlowController(String),
    /// Configuration file could not be read or parsed.
    ConfigLoad(String),
    /// Invalid state for the requested operation.
    InvalidState(String),

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// History is full and `max_blocking_time` is zero.
    WouldBlock,
    /// History stayed full for the whole `max_blocking_time`.
    WriteTimeout,
    /// Resource limit exceeded (max_samples, max_instances, ...).
    ResourceLimitExceeded(String),
    /// Payload pool has no buffer left or the request is larger than the pool allows.
    OutOfResources(String),
    /// Change with the same (writer GUID, sequence number) is already stored.
    DuplicateChange,
    /// Change not present in the history.
    ChangeNotFound,

    // ========================================================================
    // Data Errors
    // ========================================================================
    /// Serialization into or out of a CDR buffer failed.
    Serialization(SerError),
    /// Inbound RTPS message could not be parsed.
    MalformedMessage(String),
    /// Security transform rejected a message or submessage.
    SecurityRejected(String),

    // ========================================================================
    // Transport & Storage Errors
    // ========================================================================
    /// Send operation failed.
    SendFailed(String),
    /// Shared memory segment could not be created or opened.
    SharedMemory(String),
    /// I/O error with underlying cause.
    IoError(std::io::Error),
    /// Persistence backend failure.
    Persistence(String),

    /// Requested feature or operation is not supported.
    Unsupported,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidQos(msg) => write!(f, "Invalid QoS: {}", msg),
            Error::InvalidLocator(msg) => write!(f, "Invalid locator: {}", msg),
            Error::UnknownFlowController(name) => write!(f, "Unknown flow controller: {}", name),
            Error::ConfigLoad(msg) => write!(f, "Config load failed: {}", msg),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::WouldBlock => write!(f, "Operation would block"),
            Error::WriteTimeout => write!(f, "Write timeout"),
            Error::ResourceLimitExceeded(msg) => write!(f, "Resource limit exceeded: {}", msg),
            Error::OutOfResources(msg) => write!(f, "Out of resources: {}", msg),
            Error::DuplicateChange => write!(f, "Duplicate change"),
            Error::ChangeNotFound => write!(f, "Change not found"),
            Error::Serialization(e) => write!(f, "CDR serialization failed: {}", e),
            Error::MalformedMessage(msg) => write!(f, "Malformed message: {}", msg),
            Error::SecurityRejected(msg) => write!(f, "Security transform rejected: {}", msg),
            Error::SendFailed(msg) => write!(f, "Send failed: {}", msg),
            Error::SharedMemory(msg) => write!(f, "Shared memory error: {}", msg),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            Error::Unsupported => write!(f, "Unsupported operation"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<SerError> for Error {
    fn from(e: SerError) -> Self {
        Error::Serialization(e)
    }
}

/// Convenient alias for engine results.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        assert_eq!(Error::WouldBlock.to_string(), "Operation would block");
        assert_eq!(
            Error::ResourceLimitExceeded("max_samples=4".into()).to_string(),
            "Resource limit exceeded: max_samples=4"
        );
        let ser = SerError::ReadFailed {
            offset: 8,
            reason: "unexpected end of buffer".into(),
        };
        assert_eq!(
            Error::from(ser).to_string(),
            "CDR serialization failed: read failed at offset 8: unexpected end of buffer"
        );
    }

    #[test]
    fn test_io_error_has_source() {
        let err = Error::from(std::io::Error::new(std::io::ErrorKind::Other, "boom"));
        assert!(std::error::Error::source(&err).is_some());
        assert!(std::error::Error::source(&Error::Unsupported).is_none());
    }
}
