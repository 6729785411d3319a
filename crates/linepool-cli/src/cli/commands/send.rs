//! `linepool send` – send lines through the pool, optionally with backoff.

use std::sync::Arc;

use anyhow::{bail, Result};
use linepool_core::clock::TokioClock;
use linepool_core::config::LinepoolConfig;
use linepool_core::pool::LinePool;
use linepool_core::retry::{BackoffScheduler, RetryError};

pub async fn run_send(
    cfg: &LinepoolConfig,
    lines: &[String],
    retry: bool,
    address: Option<&str>,
) -> Result<()> {
    let addr = address.unwrap_or(cfg.address.as_str());
    let clock = Arc::new(TokioClock::new());
    let pool = LinePool::new(addr, clock.clone(), cfg.pool_config());
    let retrying = if retry {
        Some((BackoffScheduler::new(clock), cfg.retry_policy()?))
    } else {
        None
    };

    let mut failed = 0usize;
    for line in lines {
        let outcome = match &retrying {
            Some((scheduler, policy)) => pool
                .send_line_with_retry(line, scheduler, policy)
                .await
                .map_err(|e| match e {
                    RetryError::Operation(e) => e.to_string(),
                    cancelled => cancelled.to_string(),
                }),
            None => pool.send_line(line.as_str()).await.map_err(|e| e.to_string()),
        };
        match outcome {
            Ok(_) => println!("OK"),
            Err(msg) => {
                failed += 1;
                println!("{}", msg);
            }
        }
    }
    pool.close_idle();

    if failed > 0 {
        bail!("{} of {} line(s) failed", failed, lines.len());
    }
    Ok(())
}
