//! Bounded pool of line connections to one address.
//!
//! Each lease gets a live connection (reusing an idle one when possible)
//! and returns it on drop. Connections that closed while leased are
//! discarded; the next lease dials a fresh one, which brings a fresh
//! `LineSession` with it.

use std::ops::Deref;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::clock::Clock;
use crate::connection::LineConnection;
use crate::error::LineError;
use crate::retry::{BackoffScheduler, RetryError, RetryPolicy};
use crate::session::SessionConfig;

pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on connections leased at once.
    pub max_connections: usize,
    pub session: SessionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            session: SessionConfig::default(),
        }
    }
}

struct PoolInner {
    addr: String,
    clock: Arc<dyn Clock>,
    session: SessionConfig,
    idle: Mutex<Vec<LineConnection>>,
    permits: Arc<Semaphore>,
}

impl PoolInner {
    fn idle(&self) -> std::sync::MutexGuard<'_, Vec<LineConnection>> {
        self.idle.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Pooled line client for a single server address.
#[derive(Clone)]
pub struct LinePool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for LinePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinePool")
            .field("addr", &self.inner.addr)
            .field("idle", &self.idle_count())
            .field("available", &self.available())
            .finish()
    }
}

impl LinePool {
    pub fn new(addr: impl Into<String>, clock: Arc<dyn Clock>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                addr: addr.into(),
                clock,
                session: config.session,
                idle: Mutex::new(Vec::new()),
                permits: Arc::new(Semaphore::new(config.max_connections.max(1))),
            }),
        }
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Connections parked and ready for reuse.
    pub fn idle_count(&self) -> usize {
        self.inner.idle().len()
    }

    /// Leases still available before `acquire` has to wait.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Lease a connection, waiting while `max_connections` are out.
    pub async fn acquire(&self) -> Result<PooledConnection, LineError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| LineError::Client("pool is shut down".to_string()))?;

        let reused = loop {
            let candidate = self.inner.idle().pop();
            match candidate {
                Some(conn) if conn.is_closed() => {
                    tracing::debug!(conn = conn.id(), "discarding closed idle connection");
                }
                other => break other,
            }
        };

        let conn = match reused {
            Some(conn) => conn,
            None => {
                tracing::debug!(addr = %self.inner.addr, "dialing new connection");
                LineConnection::connect(
                    &self.inner.addr,
                    Arc::clone(&self.inner.clock),
                    self.inner.session,
                )
                .await?
            }
        };

        Ok(PooledConnection {
            conn,
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Lease a connection, send one line, release it whatever the outcome.
    pub async fn send_line(&self, payload: impl Into<String>) -> Result<bool, LineError> {
        let conn = self.acquire().await?;
        conn.send(payload).await
    }

    /// `send_line` wrapped in the backoff scheduler; each attempt leases
    /// its own connection.
    pub async fn send_line_with_retry(
        &self,
        payload: &str,
        scheduler: &BackoffScheduler,
        policy: &RetryPolicy,
    ) -> Result<bool, RetryError<LineError>> {
        scheduler
            .run(policy, || self.send_line(payload.to_string()))
            .await
    }

    /// Close and forget every idle connection.
    pub fn close_idle(&self) {
        let drained: Vec<_> = self.inner.idle().drain(..).collect();
        for conn in drained {
            conn.close();
        }
    }
}

/// A leased connection; goes back to the pool when dropped.
pub struct PooledConnection {
    conn: LineConnection,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledConnection {
    type Target = LineConnection;

    fn deref(&self) -> &LineConnection {
        &self.conn
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.conn.is_closed() {
            tracing::debug!(conn = self.conn.id(), "dropping closed connection");
            return;
        }
        self.pool.idle().push(self.conn.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// Replies OK to every line on every connection.
    async fn ok_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let (r, mut w) = stream.into_split();
                    let mut lines = BufReader::new(r).lines();
                    while let Ok(Some(_)) = lines.next_line().await {
                        if w.write_all(b"OK\r\n").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        addr
    }

    fn pool(addr: String, max_connections: usize) -> LinePool {
        let config = PoolConfig {
            max_connections,
            ..PoolConfig::default()
        };
        LinePool::new(addr, Arc::new(TokioClock::new()), config)
    }

    #[tokio::test]
    async fn released_connection_is_reused() {
        let pool = pool(ok_server().await, 4);
        let first_id = {
            let conn = pool.acquire().await.unwrap();
            assert_eq!(conn.send("PING").await, Ok(true));
            conn.id()
        };
        assert_eq!(pool.idle_count(), 1);

        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), first_id);
        assert_eq!(pool.idle_count(), 0);
    }

    #[tokio::test]
    async fn closed_connection_is_not_returned() {
        let pool = pool(ok_server().await, 4);
        {
            let conn = pool.acquire().await.unwrap();
            conn.close();
            for _ in 0..50 {
                if conn.is_closed() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
        assert_eq!(pool.idle_count(), 0);
        assert_eq!(pool.send_line("PING").await, Ok(true));
    }

    #[tokio::test]
    async fn acquire_waits_when_all_leased() {
        let pool = pool(ok_server().await, 1);
        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(blocked.is_err(), "second lease should wait");

        drop(held);
        let conn = tokio::time::timeout(Duration::from_secs(1), pool.acquire())
            .await
            .expect("lease after release")
            .unwrap();
        assert_eq!(conn.send("PING").await, Ok(true));
    }
}
