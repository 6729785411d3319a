//! Per-connection line session.
//!
//! A `LineSession` pairs outgoing request lines with incoming response
//! lines in strict FIFO order, runs an idle timer while requests are
//! outstanding, and fails every queued command when the connection times
//! out or goes away. It is a plain state machine: the owner feeds it events
//! one at a time (see `connection` for the Tokio driver), so no locking is
//! involved.

mod command;
mod state;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LineError;

pub use command::{Command, CommandResult, Reply};
pub use state::LineSession;

/// Response line that resolves a command successfully (exact match).
pub const SUCCESS_SENTINEL: &str = "OK";

/// Longest accepted request line, in bytes.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 16384;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Invoked with the idle-timer generation when the idle timer fires. The
/// owner routes it back into the session as `on_idle_timeout(generation)`.
pub type IdleAlarm = Arc<dyn Fn(u64) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Close the connection after this long without traffic while
    /// requests are outstanding.
    pub idle_timeout: Duration,
    pub max_line_length: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No outstanding commands, no idle timer.
    Idle,
    /// At least one command queued; idle timer running.
    Awaiting,
    /// Terminal: timed out or disconnected.
    Closed,
}

/// Outbound half of the transport as seen by a session.
pub trait LineSink: Send {
    /// Queue one line (without delimiter) for writing.
    fn write_line(&mut self, line: &str) -> Result<(), LineError>;

    /// Close the underlying connection.
    fn close(&mut self);
}
