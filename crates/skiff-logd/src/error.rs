//! Error types for the log server.

use std::net::SocketAddr;

use thiserror::Error;

/// Errors that can occur in the log server.
#[derive(Debug, Error)]
pub enum LogdError {
    /// A frame announced more bytes than allowed.
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge {
        /// Announced length.
        len: usize,
        /// Configured limit.
        max: usize,
    },

    /// The peer closed the connection inside a frame.
    #[error("truncated frame: expected {expected} bytes, got {got}")]
    Truncated {
        /// Announced length.
        expected: usize,
        /// Bytes received.
        got: usize,
    },

    /// A record payload could not be decoded.
    #[error("undecodable record: {0}")]
    Decode(String),

    /// A record name is not `<mode>:-:<name>` or names an unusable file.
    #[error("invalid log name: {0}")]
    InvalidName(String),

    /// A lifecycle message lacks its `<job> : ` prefix.
    #[error("malformed job message: {0}")]
    Malformed(String),

    /// The `--launch_logger` value is not `type::host::port::dir::njobs`.
    #[error("invalid launch spec '{spec}': {reason}")]
    InvalidLaunchSpec {
        /// The raw value.
        spec: String,
        /// Why.
        reason: String,
    },

    /// Unknown scheduler type.
    #[error("unknown scheduler: {0}")]
    UnknownScheduler(String),

    /// The job total could not be read.
    #[error("cannot read the job total: {0}")]
    JobTotal(String),

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address tried.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Every port from the search start was taken.
    #[error("no free port from {0} upward")]
    NoFreePort(u16),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for log server operations.
pub type Result<T> = std::result::Result<T, LogdError>;
