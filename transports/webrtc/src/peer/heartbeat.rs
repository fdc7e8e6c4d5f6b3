//! Liveness probe for connections that report healthy but are not
//!
//! The heartbeat fails fast: the first ping that errors or exceeds its
//! timeout stops the probe and reports once. Recovery belongs to the owner.

use crate::{Error, Result};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, trace, warn};

/// Periodic ping with a single probe in flight
#[derive(Debug, Default)]
pub struct Heartbeat {
    task: Option<JoinHandle<()>>,
    failures: Arc<AtomicU32>,
}

impl Heartbeat {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start probing
    ///
    /// Every `interval`, `ping_fn` is invoked and raced against `timeout`.
    /// The next ping is not issued before the current one settles. On the
    /// first failure the probe stops and `on_failure` runs exactly once.
    /// Starting a running heartbeat does nothing.
    pub fn start<P, Fut, T, F>(
        &mut self,
        mut ping_fn: P,
        interval: Duration,
        timeout: Duration,
        on_failure: F,
    ) where
        P: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
        F: FnOnce(Error) + Send + 'static,
    {
        if self.is_running() {
            debug!("Heartbeat already running");
            return;
        }

        let failures = Arc::clone(&self.failures);
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let error = match tokio::time::timeout(timeout, ping_fn()).await {
                    Ok(Ok(_)) => {
                        trace!("Heartbeat ping ok");
                        continue;
                    }
                    Ok(Err(e)) => e,
                    Err(_) => Error::OperationTimeout(format!(
                        "heartbeat ping exceeded {}ms",
                        timeout.as_millis()
                    )),
                };

                failures.fetch_add(1, Ordering::SeqCst);
                warn!("Heartbeat failed: {}", error);
                on_failure(error);
                return;
            }
        }));
    }

    /// Stop probing; safe to call at any time
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Clear the failure counter without stopping
    pub fn reset(&self) {
        self.failures.store(0, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.stop();
    }
}
