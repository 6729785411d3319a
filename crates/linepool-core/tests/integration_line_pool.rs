//! Integration tests: pooled line client against a scripted TCP server,
//! with and without the backoff scheduler on top.

mod common;

use common::line_server::{self, Answer};
use linepool_core::clock::TokioClock;
use linepool_core::pool::{LinePool, PoolConfig};
use linepool_core::retry::{BackoffScheduler, RetryError, RetryPolicy};
use linepool_core::session::SessionConfig;
use linepool_core::{ErrorKind, LineError};
use std::sync::Arc;
use std::time::Duration;

fn pool_for(addr: &str, idle_timeout: Duration) -> LinePool {
    let config = PoolConfig {
        max_connections: 4,
        session: SessionConfig {
            idle_timeout,
            ..SessionConfig::default()
        },
    };
    LinePool::new(addr, Arc::new(TokioClock::new()), config)
}

fn fast_policy(max_attempts: u32, kinds: &[ErrorKind]) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .initial_delay(Duration::from_millis(10))
        .max_delay(Duration::from_millis(50))
        .factor(2.0)
        .jitter_fraction(0.0)
        .retry_on_all(kinds.iter().copied())
        .build()
        .unwrap()
}

fn scheduler() -> BackoffScheduler {
    BackoffScheduler::new(Arc::new(TokioClock::new()))
}

#[tokio::test]
async fn send_line_reports_ok_and_response_errors() {
    let (addr, observed) = line_server::start(|_, line| {
        if line.starts_with("SET ") {
            Answer::ok()
        } else {
            Answer::Line(format!("ERR unknown command {}", line))
        }
    });
    let pool = pool_for(&addr, Duration::from_secs(5));

    assert_eq!(pool.send_line("SET a 1").await, Ok(true));
    assert_eq!(
        pool.send_line("FLY").await,
        Err(LineError::Response("ERR unknown command FLY".into()))
    );
    assert_eq!(observed.lines(), vec!["SET a 1", "FLY"]);
    assert_eq!(observed.connections(), 1, "connection should be reused");
}

#[tokio::test]
async fn concurrent_sends_share_bounded_pool() {
    let (addr, observed) = line_server::start(|_, _| Answer::ok());
    let pool = pool_for(&addr, Duration::from_secs(5));

    let mut handles = Vec::new();
    for i in 0..16 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            pool.send_line(format!("SET k{} v", i)).await
        }));
    }
    for h in handles {
        assert_eq!(h.await.unwrap(), Ok(true));
    }
    assert_eq!(observed.lines().len(), 16);
    assert!(observed.connections() <= 4);
}

#[tokio::test]
async fn retry_recovers_from_dropped_connections() {
    // First two connections hang up on their first request.
    let (addr, observed) = line_server::start(|conn, _| {
        if conn < 2 {
            Answer::Hangup
        } else {
            Answer::ok()
        }
    });
    let pool = pool_for(&addr, Duration::from_secs(5));
    let policy = fast_policy(5, &[ErrorKind::Connection]);

    let result = pool
        .send_line_with_retry("SET a 1", &scheduler(), &policy)
        .await;
    assert_eq!(result, Ok(true));
    assert_eq!(observed.connections(), 3);
    assert_eq!(observed.lines().len(), 3);
}

#[tokio::test]
async fn response_errors_are_not_retried() {
    let (addr, observed) = line_server::start(|_, _| Answer::Line("ERR bad".into()));
    let pool = pool_for(&addr, Duration::from_secs(5));
    let policy = fast_policy(5, &[ErrorKind::Connection, ErrorKind::Timeout]);

    let result = pool
        .send_line_with_retry("SET a 1", &scheduler(), &policy)
        .await;
    assert_eq!(
        result,
        Err(RetryError::Operation(LineError::Response("ERR bad".into())))
    );
    assert_eq!(observed.lines().len(), 1);
}

#[tokio::test]
async fn idle_timeouts_are_retried_until_exhausted() {
    let (addr, observed) = line_server::start(|_, _| Answer::Silent);
    let pool = pool_for(&addr, Duration::from_millis(100));
    let policy = fast_policy(2, &[ErrorKind::Timeout]);

    let result = pool
        .send_line_with_retry("GET a", &scheduler(), &policy)
        .await;
    assert!(matches!(
        result,
        Err(RetryError::Operation(LineError::Timeout(_)))
    ));
    // The timed-out connection is closed, so the retry dials a new one.
    assert_eq!(observed.connections(), 2);
    assert_eq!(observed.lines(), vec!["GET a", "GET a"]);
}

#[tokio::test]
async fn refused_connection_surfaces_connection_error() {
    let addr = {
        let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        l.local_addr().unwrap().to_string()
    };
    let pool = pool_for(&addr, Duration::from_secs(1));
    assert!(matches!(
        pool.send_line("PING").await,
        Err(LineError::Connection(_))
    ));
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.available(), 4);
}

#[tokio::test]
async fn malformed_line_is_rejected_before_the_wire() {
    let (addr, observed) = line_server::start(|_, _| Answer::ok());
    let pool = pool_for(&addr, Duration::from_secs(5));

    assert!(matches!(
        pool.send_line("SET a\nSET b").await,
        Err(LineError::Client(_))
    ));
    assert_eq!(pool.send_line("SET a 1").await, Ok(true));
    assert_eq!(observed.lines(), vec!["SET a 1"]);
}
