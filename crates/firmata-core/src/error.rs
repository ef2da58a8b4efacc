//! Error types for the Firmata engine.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Caller contract violations, engine state
//! errors, and transport failures are all captured here.

/// The error type for all Firmata engine operations.
///
/// Encoding and state errors are returned synchronously to the caller of a
/// query. Decode-time anomalies never surface through this type from
/// `receive`: the decoder degrades them to an unknown message instead.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A query parameter was out of range (pin index above 127, a value
    /// byte that does not fit in 7 bits, a pin the board never reported).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation needs pin capability data that has not arrived yet.
    #[error("not ready: {0}")]
    NotReady(String),

    /// No active connection when a send was attempted.
    #[error("transport unavailable")]
    TransportUnavailable,

    /// A received frame could not be interpreted.
    ///
    /// Only used inside the decoder; callers see the frame as
    /// `Message::Unknown` instead.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A discovery query was not answered within the configured timeout.
    #[error("query timed out")]
    QueryTimedOut,

    /// A transport read returned no data before its deadline.
    #[error("timeout waiting for data")]
    Timeout,

    /// The connection to the board was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// A transport-level error (serial port, TCP socket).
    #[error("transport error: {0}")]
    Transport(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
