//! Tokio driver for one pooled connection.
//!
//! Each connection runs two tasks: an actor that owns the `LineSession` and
//! handles submits, received lines and idle alarms strictly one at a time,
//! and a writer that drains the session's outbound lines onto the socket.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::clock::Clock;
use crate::error::LineError;
use crate::session::{Command, LineSession, LineSink, Reply, SessionConfig};

/// Written after every request line.
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// One read from the response stream.
#[derive(Debug, PartialEq, Eq)]
enum Incoming {
    Line(String),
    /// Buffered bytes without a newline exceeded the line limit.
    TooLong(usize),
    Eof,
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

enum SessionEvent {
    Submit(Command),
    IdleTimeout(u64),
    WriteFailed(LineError),
    Close,
}

/// Session sink backed by the writer task's channel. Closing drops the
/// sender, which makes the writer shut the socket's write half down, and
/// marks the connection closed before any queued command is failed.
struct ChannelSink {
    tx: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<AtomicBool>,
}

impl LineSink for ChannelSink {
    fn write_line(&mut self, line: &str) -> Result<(), LineError> {
        match &self.tx {
            Some(tx) => tx
                .send(line.to_string())
                .map_err(|_| LineError::Connection("writer has stopped".to_string())),
            None => Err(LineError::Connection("connection closed".to_string())),
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::Release);
        self.tx = None;
    }
}

/// Handle to a live connection. Cheap to clone; all clones feed the same
/// session.
#[derive(Clone)]
pub struct LineConnection {
    id: u64,
    peer: SocketAddr,
    events: mpsc::UnboundedSender<SessionEvent>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for LineConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LineConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl LineConnection {
    /// Connect to `addr` and start the session tasks.
    pub async fn connect(
        addr: &str,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, LineError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Self::from_stream(stream, clock, config)
    }

    /// Wrap an established stream. Must be called inside a Tokio runtime.
    pub fn from_stream(
        stream: TcpStream,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Result<Self, LineError> {
        let peer = stream.peer_addr()?;
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        let (reader, writer) = stream.into_split();

        let max_line_length = config.max_line_length;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        let closed = Arc::new(AtomicBool::new(false));
        let alarm_events = events_tx.downgrade();
        let session = LineSession::new(
            clock,
            config,
            ChannelSink {
                tx: Some(outbound_tx),
                closed: Arc::clone(&closed),
            },
            Arc::new(move |generation| {
                if let Some(tx) = alarm_events.upgrade() {
                    let _ = tx.send(SessionEvent::IdleTimeout(generation));
                }
            }),
        );

        tokio::spawn(write_lines(writer, outbound_rx, events_tx.downgrade()));
        tokio::spawn(drive_session(
            id,
            peer,
            session,
            events_rx,
            BufReader::new(reader),
            max_line_length,
            Arc::clone(&closed),
        ));
        tracing::debug!(conn = id, %peer, "connection ready");

        Ok(Self {
            id,
            peer,
            events: events_tx,
            closed,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send one request line; resolves with the matching response.
    pub fn send(&self, payload: impl Into<String>) -> Reply {
        let (cmd, reply) = Command::new(payload);
        if let Err(mpsc::error::SendError(SessionEvent::Submit(cmd))) =
            self.events.send(SessionEvent::Submit(cmd))
        {
            cmd.fail(LineError::Client(
                "client has been disconnected and cannot send".to_string(),
            ));
        }
        reply
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.events.is_closed()
    }

    /// Close the connection, failing anything still queued.
    pub fn close(&self) {
        let _ = self.events.send(SessionEvent::Close);
    }
}

async fn drive_session(
    id: u64,
    peer: SocketAddr,
    mut session: LineSession<ChannelSink>,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    mut reader: BufReader<OwnedReadHalf>,
    max_line_length: usize,
    closed: Arc<AtomicBool>,
) {
    let mut partial = Vec::new();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Submit(cmd)) => session.submit(cmd),
                Some(SessionEvent::IdleTimeout(generation)) => session.on_idle_timeout(generation),
                Some(SessionEvent::WriteFailed(e)) => session.on_disconnect(e),
                Some(SessionEvent::Close) | None => session.close(),
            },
            incoming = read_line(&mut reader, &mut partial, max_line_length) => match incoming {
                Ok(Incoming::Line(line)) => {
                    session.on_line_received(&line);
                }
                Ok(Incoming::TooLong(len)) => {
                    tracing::warn!(conn = id, len, limit = max_line_length, "response line too long");
                    session.on_disconnect(LineError::Connection(format!(
                        "response line exceeds {} bytes",
                        max_line_length
                    )));
                }
                Ok(Incoming::Eof) => session.on_disconnect(LineError::Connection(
                    "connection closed by peer".to_string(),
                )),
                Err(e) => session.on_disconnect(e.into()),
            },
        }
        if session.is_closed() {
            break;
        }
    }

    closed.store(true, Ordering::Release);
    events.close();
    // Submits that raced the close are rejected by the closed session.
    while let Ok(event) = events.try_recv() {
        if let SessionEvent::Submit(cmd) = event {
            session.submit(cmd);
        }
    }
    tracing::debug!(conn = id, %peer, "connection closed");
}

/// Read the next `\n`-terminated line, stripping an optional `\r`.
///
/// Bytes are taken as-is and decoded lossily, so a non-UTF-8 response still
/// resolves its command. Cancel-safe: consumed bytes live in `partial`
/// until the line completes.
async fn read_line<R>(
    reader: &mut R,
    partial: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<Incoming>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if !partial.is_empty() {
                tracing::debug!(len = partial.len(), "dropping unterminated line at eof");
                partial.clear();
            }
            return Ok(Incoming::Eof);
        }
        match available.iter().position(|&b| b == b'\n') {
            Some(i) => {
                partial.extend_from_slice(&available[..i]);
                reader.consume(i + 1);
                if partial.last() == Some(&b'\r') {
                    partial.pop();
                }
                let len = partial.len();
                if len > max_len {
                    partial.clear();
                    return Ok(Incoming::TooLong(len));
                }
                let line = String::from_utf8_lossy(&partial[..]).into_owned();
                partial.clear();
                return Ok(Incoming::Line(line));
            }
            None => {
                let n = available.len();
                partial.extend_from_slice(available);
                reader.consume(n);
                // One byte of slack for a trailing '\r'.
                if partial.len() > max_len.saturating_add(1) {
                    let len = partial.len();
                    partial.clear();
                    return Ok(Incoming::TooLong(len));
                }
            }
        }
    }
}

async fn write_lines(
    mut writer: OwnedWriteHalf,
    mut outbound: mpsc::UnboundedReceiver<String>,
    events: mpsc::WeakUnboundedSender<SessionEvent>,
) {
    while let Some(line) = outbound.recv().await {
        let mut buf = line.into_bytes();
        buf.extend_from_slice(LINE_DELIMITER);
        if let Err(e) = writer.write_all(&buf).await {
            tracing::debug!("write failed: {}", e);
            if let Some(tx) = events.upgrade() {
                let _ = tx.send(SessionEvent::WriteFailed(e.into()));
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}
