use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Scheduler;
use crate::utils::RelayError;

fn counting(counter: &Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<()> + Send + 'static {
    let counter = counter.clone();
    move || {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(())
    }
}

#[test]
fn zero_pool_size_is_rejected() {
    assert!(matches!(Scheduler::new(0), Err(RelayError::Config(_))));
}

#[tokio::test(start_paused = true)]
async fn periodic_task_runs_after_delay_then_every_period() {
    let scheduler = Scheduler::new(1).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let _handle = scheduler.schedule(
        Duration::from_millis(100),
        Duration::from_millis(200),
        counting(&runs),
    );

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // runs at 100, 300, 500
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn zero_period_runs_once() {
    let scheduler = Scheduler::new(1).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let handle = scheduler.schedule(Duration::from_millis(30), Duration::ZERO, counting(&runs));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(handle.is_finished());
}

#[tokio::test(start_paused = true)]
async fn schedule_once_runs_closure_once() {
    let scheduler = Scheduler::new(1).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));
    let seen = runs.clone();

    let _handle = scheduler.schedule_once(Duration::from_secs(30), move || async move {
        seen.fetch_add(1, Ordering::SeqCst);
    });

    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_task_never_fires_again() {
    let scheduler = Scheduler::new(1).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let handle = scheduler.schedule(Duration::ZERO, Duration::from_millis(100), counting(&runs));
    tokio::time::sleep(Duration::from_millis(250)).await;
    let before = runs.load(Ordering::SeqCst);
    assert_eq!(before, 3);

    scheduler.cancel(&handle);
    assert!(handle.is_cancelled());
    assert!(handle.cancel_and_wait(Duration::from_secs(1)).await);

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), before);
}

#[tokio::test(start_paused = true)]
async fn cancel_interrupts_running_task() {
    let scheduler = Scheduler::new(1).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));
    let seen = finished.clone();

    let handle = scheduler.schedule(Duration::ZERO, Duration::from_secs(1), move || {
        let seen = seen.clone();
        async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            seen.fetch_add(1, Ordering::SeqCst);
        }
    });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.cancel_and_wait(Duration::from_secs(1)).await);
    assert_eq!(finished.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_cancels_all_tasks() {
    let scheduler = Scheduler::new(2).unwrap();
    let runs = Arc::new(AtomicUsize::new(0));

    let a = scheduler.schedule(Duration::from_millis(100), Duration::from_millis(100), counting(&runs));
    let b = scheduler.schedule(Duration::from_millis(100), Duration::ZERO, counting(&runs));
    scheduler.shutdown();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(a.is_cancelled() && b.is_cancelled());
    assert!(scheduler.is_shutdown());
}

async fn max_concurrency(pool_size: usize) -> usize {
    let scheduler = Scheduler::new(pool_size).unwrap();
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..2 {
        let active = active.clone();
        let peak = peak.clone();
        handles.push(scheduler.schedule(Duration::ZERO, Duration::from_millis(100), move || {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        }));
    }

    tokio::time::sleep(Duration::from_millis(500)).await;
    for handle in handles {
        handle.cancel_and_wait(Duration::from_secs(1)).await;
    }
    peak.load(Ordering::SeqCst)
}

#[tokio::test(start_paused = true)]
async fn single_slot_pool_runs_tasks_sequentially() {
    assert_eq!(max_concurrency(1).await, 1);
}

#[tokio::test(start_paused = true)]
async fn larger_pool_allows_overlap() {
    assert_eq!(max_concurrency(2).await, 2);
}
