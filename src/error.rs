//! # Error Kinds
//!
//! Every fallible operation of the download core returns [`Result`], whose
//! error side tells the caller how to react:
//!
//! | Kind | Raised by | Reaction |
//! |------|-----------|----------|
//! | `Connection` | socket creation, connect, reset | retry the session |
//! | `ConnectionClosed` | peer closed the stream mid-read | retry the session |
//! | `Timeout` | connect/send/receive deadline | retry the session |
//! | `Protocol` | malformed handshake or message | retry the session |
//! | `Io` | output file errors | abort the download |
//! | `State` | misuse of a piece (logic error) | abort the session |
//!
//! Running out of pieces is not an error: a session simply terminates.

use std::io;
use thiserror::Error;

/// Errors raised by the transport, codec, piece model, storage and sessions.
#[derive(Debug, Error)]
pub enum Error {
    /// The TCP connection could not be established or was reset.
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer closed the stream before the expected bytes arrived.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// A deadline elapsed.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local file I/O failed.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// An operation was called in a state that does not allow it.
    #[error("invalid state: {0}")]
    State(&'static str),
}

impl Error {
    /// Whether a worker may retry its session after this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Connection(_)
            | Error::ConnectionClosed
            | Error::Timeout(_)
            | Error::Protocol(_) => true,
            Error::Io(_) | Error::State(_) => false,
        }
    }

    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        Error::Protocol(message.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
