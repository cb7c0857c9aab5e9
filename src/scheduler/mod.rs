//! Periodic and one-shot delayed tasks.
//!
//! All tasks of one [`Scheduler`] share a pool of `pool_size` execution
//! slots. With the default of one slot, two tasks never run at the same
//! time. Cancellation is cooperative: it is checked before every run, and a
//! run that is in progress is interrupted at its next await point.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::SchedulerSettings;
use crate::utils::{RelayError, Result};

pub const DEFAULT_POOL_SIZE: usize = 1;

#[derive(Debug)]
pub struct Scheduler {
    pool_size: usize,
    slots: Arc<Semaphore>,
    root: CancellationToken,
    next_id: AtomicU64,
}

/// Handle to one scheduled task.
#[derive(Debug)]
pub struct TaskHandle {
    id: u64,
    token: CancellationToken,
    join: JoinHandle<()>,
}

impl Scheduler {
    pub fn new(pool_size: usize) -> Result<Self> {
        if pool_size == 0 {
            return Err(RelayError::Config(
                "scheduler.pool_size must be a positive integer".to_string(),
            ));
        }
        Ok(Self {
            pool_size,
            slots: Arc::new(Semaphore::new(pool_size)),
            root: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn from_settings(settings: &SchedulerSettings) -> Result<Self> {
        Self::new(settings.pool_size)
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Run `task` after `initial_delay`, then every `period`. A zero
    /// `period` runs it once.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, initial_delay: Duration, period: Duration, task: F) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.root.child_token();
        let join = tokio::spawn(run_task(
            id,
            initial_delay,
            period,
            task,
            self.slots.clone(),
            token.clone(),
        ));
        debug!(task = id, ?initial_delay, ?period, "task scheduled");
        TaskHandle { id, token, join }
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once<F, Fut>(&self, delay: Duration, task: F) -> TaskHandle
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut task = Some(task);
        self.schedule(delay, Duration::ZERO, move || {
            let run = task.take();
            async move {
                if let Some(run) = run {
                    run().await;
                }
            }
        })
    }

    pub fn cancel(&self, handle: &TaskHandle) {
        handle.cancel();
    }

    /// Cancel every task scheduled so far. Later `schedule` calls produce
    /// tasks that never run.
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.root.is_cancelled()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl TaskHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop future runs and interrupt the current one. Never reschedules.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel and wait until the task has exited, aborting it if it takes
    /// longer than `grace`. Returns `false` if it had to be aborted.
    pub async fn cancel_and_wait(self, grace: Duration) -> bool {
        self.token.cancel();
        let abort = self.join.abort_handle();
        match time::timeout(grace, self.join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                if e.is_panic() {
                    warn!(task = self.id, error = %e, "scheduled task panicked");
                }
                true
            }
            Err(_) => {
                abort.abort();
                warn!(task = self.id, ?grace, "scheduled task did not stop in time, aborted");
                false
            }
        }
    }
}

async fn run_task<F, Fut>(
    id: u64,
    initial_delay: Duration,
    period: Duration,
    mut task: F,
    slots: Arc<Semaphore>,
    token: CancellationToken,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let one_shot = period.is_zero();
    let mut ticker = if one_shot {
        None
    } else {
        let mut ticker = time::interval_at(Instant::now() + initial_delay, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Some(ticker)
    };

    loop {
        let due = async {
            match ticker.as_mut() {
                Some(ticker) => {
                    ticker.tick().await;
                }
                None => time::sleep(initial_delay).await,
            }
        };
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = due => {}
        }

        let permit = tokio::select! {
            biased;
            _ = token.cancelled() => break,
            permit = slots.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(task = id, "run interrupted by cancellation");
                break;
            }
            _ = task() => {}
        }
        drop(permit);

        if one_shot {
            break;
        }
    }
    debug!(task = id, "task finished");
}

#[cfg(test)]
mod tests;
