//! Rate-limited task queue.
//!
//! Admits tasks in FIFO order, bounded by both a concurrency cap and a
//! start-count cap per rolling window. The window is measured from its own
//! start; when it has fully elapsed the start count resets. When the
//! window budget is exhausted, a single wake-up is scheduled at the window
//! boundary; there is no polling.
//!
//! [`RateLimitedQueue::submit`] resolves with the task's own output once
//! the task has been admitted and has finished, so failures propagate to
//! the submitter and never wedge the queue. [`RateLimitedQueue::idle`]
//! resolves when the queue is empty and nothing is in flight; concurrent
//! waiters are all woken together.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;

/// Configuration for the rate-limited queue.
#[derive(Debug, Clone, Copy)]
pub struct RateLimiterConfig {
    /// Maximum simultaneously running tasks (clamped to >= 1).
    pub concurrency: usize,
    /// Maximum task starts per window (clamped to >= 1).
    pub interval_cap: u32,
    /// Window length (clamped to >= 1 ms).
    pub interval: Duration,
}

impl RateLimiterConfig {
    /// Create a config, clamping all values to their minimums.
    pub fn new(concurrency: usize, interval_cap: u32, interval: Duration) -> Self {
        Self {
            concurrency: concurrency.max(1),
            interval_cap: interval_cap.max(1),
            interval: interval.max(Duration::from_millis(1)),
        }
    }
}

struct Inner {
    config: RateLimiterConfig,
    active: usize,
    interval_count: u32,
    interval_start: Instant,
    waiters: VecDeque<oneshot::Sender<SlotGuard>>,
    idle_waiters: Vec<oneshot::Sender<()>>,
    drain_scheduled: bool,
}

/// FIFO task admitter capped by concurrency and starts-per-window.
#[derive(Clone)]
pub struct RateLimitedQueue {
    inner: Arc<Mutex<Inner>>,
}

impl RateLimitedQueue {
    /// Create a queue with the given limits.
    pub fn new(config: RateLimiterConfig) -> Self {
        let config =
            RateLimiterConfig::new(config.concurrency, config.interval_cap, config.interval);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                config,
                active: 0,
                interval_count: 0,
                interval_start: Instant::now(),
                waiters: VecDeque::new(),
                idle_waiters: Vec::new(),
                drain_scheduled: false,
            })),
        }
    }

    /// Submit a task. Resolves with the task's output once the task has
    /// been admitted (FIFO, within the rate budget) and has run to
    /// completion.
    pub async fn submit<F: Future>(&self, task: F) -> F::Output {
        let (tx, rx) = oneshot::channel();
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            inner.waiters.push_back(tx);
        }
        Self::pump(&self.inner);

        // The slot travels through the channel as a guard, so a submitter
        // cancelled after admission still releases it when the unreceived
        // grant is dropped. If the queue side is gone, run anyway rather
        // than hang the submitter.
        let _slot = rx.await.ok();
        task.await
    }

    /// Wait until the queue is empty and no task is in flight.
    pub async fn idle(&self) {
        let rx = {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.waiters.is_empty() && inner.active == 0 {
                return;
            }
            let (tx, rx) = oneshot::channel();
            inner.idle_waiters.push(tx);
            rx
        };
        let _ = rx.await;
    }

    /// Admission attempt: start as many queued tasks as the budgets allow,
    /// scheduling a single window-boundary wake-up when the interval cap
    /// is the binding constraint.
    fn pump(inner: &Arc<Mutex<Inner>>) {
        loop {
            let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
            let now = Instant::now();
            if now.duration_since(guard.interval_start) >= guard.config.interval {
                guard.interval_start = now;
                guard.interval_count = 0;
            }

            if guard.active < guard.config.concurrency && !guard.waiters.is_empty() {
                if guard.interval_count < guard.config.interval_cap {
                    if let Some(tx) = guard.waiters.pop_front() {
                        guard.active += 1;
                        guard.interval_count += 1;
                        let slot = SlotGuard {
                            inner: Some(Arc::clone(inner)),
                        };
                        if let Err(mut unsent) = tx.send(slot) {
                            // Cancelled while queued; disarm the grant and
                            // give both counters back.
                            unsent.inner = None;
                            guard.active -= 1;
                            guard.interval_count -= 1;
                        }
                    }
                    drop(guard);
                    continue;
                }

                if !guard.drain_scheduled {
                    guard.drain_scheduled = true;
                    let wake_at = guard.interval_start + guard.config.interval;
                    let inner = Arc::clone(inner);
                    drop(guard);
                    tokio::spawn(async move {
                        tokio::time::sleep_until(wake_at).await;
                        inner
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .drain_scheduled = false;
                        Self::pump(&inner);
                    });
                    return;
                }
                return;
            }

            if guard.waiters.is_empty() && guard.active == 0 {
                for tx in guard.idle_waiters.drain(..) {
                    let _ = tx.send(());
                }
            }
            return;
        }
    }
}

/// A held concurrency slot. Dropping it (received or not) releases the
/// slot and re-runs admission.
struct SlotGuard {
    inner: Option<Arc<Mutex<Inner>>>,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let Some(inner) = self.inner.take() else {
            return;
        };
        {
            let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
            guard.active -= 1;
        }
        RateLimitedQueue::pump(&inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::sleep;

    #[tokio::test(start_paused = true)]
    async fn test_enforces_interval_cap() {
        let queue = RateLimitedQueue::new(RateLimiterConfig::new(
            1,
            2,
            Duration::from_millis(120),
        ));

        let start_times = Arc::new(Mutex::new(Vec::new()));
        let origin = Instant::now();

        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let start_times = Arc::clone(&start_times);
                tokio::spawn(async move {
                    queue
                        .submit(async move {
                            start_times
                                .lock()
                                .unwrap()
                                .push(origin.elapsed());
                            sleep(Duration::from_millis(5)).await;
                        })
                        .await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }
        queue.idle().await;

        let starts = start_times.lock().unwrap().clone();
        assert_eq!(starts.len(), 4);
        let gap_before_third = starts[2] - starts[0];
        assert!(
            gap_before_third >= Duration::from_millis(100),
            "expected third task delayed by interval cap, got {gap_before_third:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_enforces_concurrency_limit() {
        let queue = RateLimitedQueue::new(RateLimiterConfig::new(
            2,
            10,
            Duration::from_millis(100),
        ));

        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..6)
            .map(|_| {
                let queue = queue.clone();
                let active = Arc::clone(&active);
                let max_active = Arc::clone(&max_active);
                tokio::spawn(async move {
                    queue
                        .submit(async move {
                            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                            max_active.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(20)).await;
                            active.fetch_sub(1, Ordering::SeqCst);
                        })
                        .await;
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert!(
            max_active.load(Ordering::SeqCst) <= 2,
            "expected max active <= 2, got {}",
            max_active.load(Ordering::SeqCst)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_failure_propagates_without_wedging() {
        let queue = RateLimitedQueue::new(RateLimiterConfig::new(
            1,
            10,
            Duration::from_millis(100),
        ));

        let failed: Result<(), &str> = queue.submit(async { Err("task failed") }).await;
        assert_eq!(failed, Err("task failed"));

        let ok: Result<u32, &str> = queue.submit(async { Ok(7) }).await;
        assert_eq!(ok, Ok(7));
        queue.idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_waits_for_drain() {
        let queue = RateLimitedQueue::new(RateLimiterConfig::new(
            1,
            10,
            Duration::from_millis(50),
        ));

        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let queue = queue.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        sleep(Duration::from_millis(10)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .await;
            });
        }
        // Let the spawned submitters enqueue before waiting.
        tokio::task::yield_now().await;

        queue.idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);

        // Idle on an empty queue resolves immediately.
        queue.idle().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_with_second_wave() {
        let queue = RateLimitedQueue::new(RateLimiterConfig::new(
            2,
            10,
            Duration::from_millis(50),
        ));

        let done = Arc::new(AtomicUsize::new(0));

        let first = {
            let queue = queue.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        sleep(Duration::from_millis(30)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .await;
            })
        };
        tokio::task::yield_now().await;

        // A second wave submitted while an idle() call is already pending
        // must still be covered by a fresh idle() once it drains.
        let idle_early = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.idle().await })
        };

        let second = {
            let queue = queue.clone();
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                queue
                    .submit(async move {
                        sleep(Duration::from_millis(60)).await;
                        done.fetch_add(1, Ordering::SeqCst);
                    })
                    .await;
            })
        };
        tokio::task::yield_now().await;

        first.await.unwrap();
        second.await.unwrap();
        idle_early.await.unwrap();

        queue.idle().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_submitter_releases_granted_slot() {
        let queue = RateLimitedQueue::new(RateLimiterConfig::new(
            1,
            10,
            Duration::from_millis(100),
        ));

        // Occupy the single slot.
        let gate = Arc::new(tokio::sync::Notify::new());
        let holder = {
            let queue = queue.clone();
            let gate = Arc::clone(&gate);
            tokio::spawn(async move {
                queue.submit(async move { gate.notified().await }).await;
            })
        };
        tokio::task::yield_now().await;

        // Queue a second submitter and poll it exactly once, so it is
        // parked waiting for admission.
        let mut parked = Box::pin(queue.submit(async {}));
        assert!(futures::poll!(parked.as_mut()).is_pending());

        // Free the slot. The parked submitter is granted it but never
        // polled again; dropping it must hand the slot back.
        gate.notify_one();
        holder.await.unwrap();
        drop(parked);

        let unblocked = tokio::time::timeout(
            Duration::from_secs(1),
            queue.submit(async { 7 }),
        )
        .await
        .expect("queue wedged after dropped submitter");
        assert_eq!(unblocked, 7);
        queue.idle().await;
    }

    #[test]
    fn test_config_clamps_minimums() {
        let config = RateLimiterConfig::new(0, 0, Duration::ZERO);
        assert_eq!(config.concurrency, 1);
        assert_eq!(config.interval_cap, 1);
        assert_eq!(config.interval, Duration::from_millis(1));
    }
}
