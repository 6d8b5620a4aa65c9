//! # Error Types
//!
//! A single error enum covering every failure kind named in the TAPS core
//! design: synchronous construction failures (returned directly) and
//! asynchronous post-establishment failures (delivered as the `reason`
//! argument of a callback, formatted with `.to_string()`).

use thiserror::Error;

/// Errors produced by the TAPS core.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TapsError {
    /// A caller-supplied argument violated a precondition (e.g. a `receive`
    /// call missing one of the three required callbacks).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A set-once field (on an `Endpoint`) was assigned a second time.
    #[error("field already set")]
    Busy,

    /// Allocation failed while servicing a request.
    #[error("out of memory")]
    OutOfMemory,

    /// More than 8 local or remote endpoints were supplied to a
    /// `Preconnection`.
    #[error("too many endpoints (max 8 per side)")]
    TooManyEndpoints,

    /// The Property Reducer found no catalog entry compatible with the
    /// requested `TransportProperties`.
    #[error("no viable protocol for the requested transport properties")]
    NoViableProtocol,

    /// The Protocol Module Loader could not resolve the requested module.
    #[error("failed to load protocol module: {0}")]
    LoadError(String),

    /// A module was missing a required entry point.
    #[error("protocol module is missing required entry point: {0}")]
    IncompleteModule(String),

    /// A listener or the catalog directory could not be brought up.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The protocol module reported a failure for a specific send/receive
    /// item or for the connection itself.
    #[error("protocol failure: {0}")]
    ProtocolFailure(String),

    /// The peer closed the connection before a `receive`'s `minLength` was
    /// satisfied.
    #[error("message below minimum length")]
    MessageBelowMinLength,

    /// The connection died while items were still outstanding.
    #[error("connection died")]
    ConnectionDied,
}

impl TapsError {
    /// The reason string handed to a `sendError`/`receiveError`/
    /// `connectionError` callback when the module itself supplied none.
    pub fn protocol_failure_default() -> Self {
        TapsError::ProtocolFailure("Protocol failure".to_string())
    }

    /// The reason string used when draining a connection's queues during
    /// `connection_free`.
    pub fn connection_died() -> Self {
        TapsError::ConnectionDied
    }
}

/// Convenience alias used throughout the crate for synchronous results.
pub type TapsResult<T> = std::result::Result<T, TapsError>;
