//! Error types for narpc.

use std::fmt;

use crate::na::NaError;
use crate::registry::RpcId;

/// Header or framing violations detected while decoding peer messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Magic field of a received header does not match the protocol magic.
    BadMagic { expected: u32, got: u32 },
    /// Protocol version of a received header is not supported.
    BadVersion { expected: u8, got: u8 },
    /// Response cookie does not correlate with the outstanding request.
    CookieMismatch { expected: u32, got: u32 },
    /// Context still holds undispatched completions.
    ContextBusy,
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::BadMagic { expected, got } => {
                write!(f, "bad header magic: expected {:#x}, got {:#x}", expected, got)
            }
            ProtocolError::BadVersion { expected, got } => {
                write!(f, "bad protocol version: expected {}, got {}", expected, got)
            }
            ProtocolError::CookieMismatch { expected, got } => {
                write!(f, "response cookie {} does not match request cookie {}", got, expected)
            }
            ProtocolError::ContextBusy => {
                write!(f, "completion queue is not drained")
            }
        }
    }
}

/// Error type for RPC operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Operation did not complete within the requested timeout.
    Timeout,
    /// Invalid argument passed to a public entry point.
    InvalidParam(&'static str),
    /// Buffer or message size mismatch.
    Size { expected: usize, actual: usize },
    /// Memory allocation failure reported by a collaborator.
    NoMem,
    /// Header verification or framing failure.
    Protocol(ProtocolError),
    /// No function registered under the requested operation id.
    NoMatch(RpcId),
    /// Payload checksum mismatch reported by an encoding layer.
    Checksum,
    /// Network abstraction failure other than timeout.
    Na(NaError),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Timeout => write!(f, "operation timed out"),
            Error::InvalidParam(what) => write!(f, "invalid parameter: {}", what),
            Error::Size { expected, actual } => {
                write!(f, "size mismatch: expected {} bytes, got {} bytes", expected, actual)
            }
            Error::NoMem => write!(f, "out of memory"),
            Error::Protocol(e) => write!(f, "protocol error: {}", e),
            Error::NoMatch(id) => write!(f, "no function registered for id {:#x}", id),
            Error::Checksum => write!(f, "checksum mismatch"),
            Error::Na(e) => write!(f, "NA error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Na(e) => Some(e),
            _ => None,
        }
    }
}

impl From<NaError> for Error {
    fn from(e: NaError) -> Self {
        match e {
            NaError::Timeout => Error::Timeout,
            other => Error::Na(other),
        }
    }
}

/// Result type for RPC operations.
pub type Result<T> = std::result::Result<T, Error>;
