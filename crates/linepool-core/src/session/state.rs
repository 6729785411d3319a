use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use super::{Command, IdleAlarm, LineSink, Reply, SessionConfig, SessionState, SUCCESS_SENTINEL};
use crate::clock::{Clock, TimerHandle};
use crate::error::LineError;

#[derive(Debug, Clone, Copy)]
struct IdleTimer {
    handle: TimerHandle,
    generation: u64,
}

/// Ordered queue of in-flight commands for one connection.
///
/// Invariants: the queue is non-empty exactly when the idle timer is set,
/// and every response line resolves the front of the queue.
pub struct LineSession<S: LineSink> {
    queue: VecDeque<Command>,
    idle_timer: Option<IdleTimer>,
    timeout: Duration,
    max_line_length: usize,
    connected: bool,
    closed: bool,
    next_sequence: u64,
    generation: u64,
    clock: Arc<dyn Clock>,
    sink: S,
    alarm: IdleAlarm,
}

impl<S: LineSink> LineSession<S> {
    pub fn new(clock: Arc<dyn Clock>, config: SessionConfig, sink: S, alarm: IdleAlarm) -> Self {
        Self {
            queue: VecDeque::new(),
            idle_timer: None,
            timeout: config.idle_timeout,
            max_line_length: config.max_line_length,
            connected: true,
            closed: false,
            next_sequence: 1,
            generation: 0,
            clock,
            sink,
            alarm,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.closed {
            SessionState::Closed
        } else if self.queue.is_empty() {
            SessionState::Idle
        } else {
            SessionState::Awaiting
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Commands waiting for a response.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Send one request line; the reply resolves with the matching response.
    pub fn send(&mut self, payload: impl Into<String>) -> Reply {
        let (cmd, reply) = Command::new(payload);
        self.submit(cmd);
        reply
    }

    /// Enqueue an already-built command, writing its line.
    ///
    /// Rejected with `LineError::Client` (without touching the queue) when
    /// the session is disconnected or the payload is not a single line.
    pub fn submit(&mut self, mut cmd: Command) {
        if !self.connected || self.closed {
            cmd.fail(LineError::Client(
                "client has been disconnected and cannot send".to_string(),
            ));
            return;
        }
        if let Err(e) = self.check_payload(cmd.payload()) {
            cmd.fail(e);
            return;
        }
        if let Err(e) = self.sink.write_line(cmd.payload()) {
            cmd.fail(e);
            return;
        }

        cmd.assign_sequence(self.next_sequence);
        self.next_sequence += 1;
        tracing::trace!(sequence = cmd.sequence(), "line sent");

        let was_empty = self.queue.is_empty();
        self.queue.push_back(cmd);
        if was_empty {
            self.start_idle_timer();
        }
    }

    fn check_payload(&self, payload: &str) -> Result<(), LineError> {
        if payload.contains(['\n', '\r']) {
            return Err(LineError::Client(
                "payload must not contain a line terminator".to_string(),
            ));
        }
        if payload.len() > self.max_line_length {
            return Err(LineError::Client(format!(
                "payload is {} bytes, limit is {}",
                payload.len(),
                self.max_line_length
            )));
        }
        Ok(())
    }

    /// Handle one response line. Returns false when the line matched
    /// nothing and was dropped.
    pub fn on_line_received(&mut self, line: &str) -> bool {
        if self.closed {
            tracing::debug!("line received on closed session, dropping");
            return false;
        }
        let cmd = match self.queue.pop_front() {
            Some(cmd) => cmd,
            None => {
                tracing::warn!("unexpected response with no pending request, dropping: {:?}", line);
                return false;
            }
        };

        tracing::trace!(sequence = cmd.sequence(), "response received");
        if line == SUCCESS_SENTINEL {
            cmd.success(true);
        } else {
            cmd.fail(LineError::Response(line.to_string()));
        }

        if self.queue.is_empty() {
            self.stop_idle_timer();
        } else {
            self.reset_idle_timer();
        }
        true
    }

    /// Idle timer fired. Ignored unless `generation` is the live timer.
    pub fn on_idle_timeout(&mut self, generation: u64) {
        match self.idle_timer {
            Some(t) if t.generation == generation && !self.closed => {}
            _ => {
                tracing::trace!(generation, "stale idle timer, ignoring");
                return;
            }
        }
        self.idle_timer = None;
        tracing::warn!(
            pending = self.queue.len(),
            timeout_secs = self.timeout.as_secs_f64(),
            "connection idle timeout"
        );
        self.connected = false;
        self.closed = true;
        self.sink.close();
        self.fail_all(LineError::Timeout("connection timeout".to_string()));
    }

    /// The connection is gone; fail everything queued with `reason`.
    pub fn on_disconnect(&mut self, reason: LineError) {
        let was_closed = self.closed;
        self.connected = false;
        self.closed = true;
        self.stop_idle_timer();
        if !was_closed {
            self.sink.close();
        }
        if !self.queue.is_empty() {
            tracing::debug!(pending = self.queue.len(), "disconnected: {}", reason);
        }
        self.fail_all(reason);
    }

    /// Close from our side, e.g. when the pool discards the connection.
    pub fn close(&mut self) {
        self.on_disconnect(LineError::Connection("session closed".to_string()));
    }

    fn fail_all(&mut self, reason: LineError) {
        while let Some(cmd) = self.queue.pop_front() {
            cmd.fail(reason.clone());
        }
    }

    fn start_idle_timer(&mut self) {
        self.generation += 1;
        let generation = self.generation;
        let alarm = Arc::clone(&self.alarm);
        let handle = self
            .clock
            .schedule(self.timeout, Box::new(move || alarm(generation)));
        self.idle_timer = Some(IdleTimer { handle, generation });
    }

    fn stop_idle_timer(&mut self) {
        if let Some(t) = self.idle_timer.take() {
            self.clock.cancel(&t.handle);
        }
    }

    fn reset_idle_timer(&mut self) {
        self.stop_idle_timer();
        self.start_idle_timer();
    }
}

impl<S: LineSink> Drop for LineSession<S> {
    fn drop(&mut self) {
        self.stop_idle_timer();
        self.fail_all(LineError::Connection("session dropped".to_string()));
    }
}
