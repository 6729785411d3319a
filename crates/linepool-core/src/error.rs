//! Error taxonomy surfaced to callers, and classification into retry kinds.

use serde::{Deserialize, Serialize};
use std::io;

/// Failure of a single line request (or of the connection carrying it).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LineError {
    /// Malformed call: disconnected session, invalid payload.
    #[error("client error: {0}")]
    Client(String),
    /// The response line was not the success sentinel; carries the raw line.
    #[error("unexpected response: {0}")]
    Response(String),
    /// No traffic within the idle timeout.
    #[error("timeout: {0}")]
    Timeout(String),
    /// Non-retryable server-side failure. The session never produces it;
    /// it is for callers' own operations run under the retry scheduler.
    #[error("server error: {0}")]
    Server(String),
    /// Transport failure: connect refused, peer closed, read/write error.
    #[error("connection error: {0}")]
    Connection(String),
}

impl From<io::Error> for LineError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::TimedOut => LineError::Timeout(e.to_string()),
            _ => LineError::Connection(e.to_string()),
        }
    }
}

/// High-level classification of an error for retry purposes.
///
/// A `RetryPolicy` lists the kinds it is allowed to retry; everything else
/// (including errors that cannot be classified at all) is fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Client,
    Response,
    Timeout,
    Server,
    Connection,
}

/// Maps an error onto an [`ErrorKind`]. `None` means "unknown".
pub trait Classify {
    fn kind(&self) -> Option<ErrorKind>;
}

impl Classify for LineError {
    fn kind(&self) -> Option<ErrorKind> {
        Some(match self {
            LineError::Client(_) => ErrorKind::Client,
            LineError::Response(_) => ErrorKind::Response,
            LineError::Timeout(_) => ErrorKind::Timeout,
            LineError::Server(_) => ErrorKind::Server,
            LineError::Connection(_) => ErrorKind::Connection,
        })
    }
}

impl Classify for io::Error {
    fn kind(&self) -> Option<ErrorKind> {
        match io::Error::kind(self) {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => Some(ErrorKind::Timeout),
            io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => Some(ErrorKind::Connection),
            _ => None,
        }
    }
}
