//! A single outstanding line request and its result slot.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::oneshot;

use crate::error::LineError;

pub type CommandResult = Result<bool, LineError>;

/// One request line waiting for its response.
///
/// `success` and `fail` consume the command, so a command resolves at most
/// once. If the caller already dropped its [`Reply`], resolving is a no-op.
#[derive(Debug)]
pub struct Command {
    payload: String,
    sequence: u64,
    slot: oneshot::Sender<CommandResult>,
}

impl Command {
    /// Create a command and the reply future its caller awaits.
    pub fn new(payload: impl Into<String>) -> (Command, Reply) {
        let (slot, rx) = oneshot::channel();
        let cmd = Command {
            payload: payload.into(),
            sequence: 0,
            slot,
        };
        (cmd, Reply { rx })
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Position in the session's send order; assigned when enqueued.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub(crate) fn assign_sequence(&mut self, sequence: u64) {
        self.sequence = sequence;
    }

    pub fn success(self, value: bool) {
        let _ = self.slot.send(Ok(value));
    }

    pub fn fail(self, error: LineError) {
        let _ = self.slot.send(Err(error));
    }
}

/// Eventual result of a [`Command`].
#[derive(Debug)]
pub struct Reply {
    rx: oneshot::Receiver<CommandResult>,
}

impl Future for Reply {
    type Output = CommandResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| Err(LineError::Connection("command dropped".to_string())))
        })
    }
}
