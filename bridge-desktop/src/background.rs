//! Unique Work Scheduling on the Tokio runtime

use async_trait::async_trait;
use bridge_traits::{
    background::{
        EnqueueOutcome, ExistingWorkPolicy, PeriodicWorkJob, WorkInfo, WorkJob, WorkScheduler,
        WorkState,
    },
    error::{BridgeError, Result},
    time::{Clock, SystemClock},
};
use futures_util::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Tokio-based unique work scheduler for desktop.
///
/// Jobs run on spawned tasks and are never aborted: cancelling or replacing
/// work cancels the job's token and the job is expected to stop at its next
/// checkpoint. A replaced run may still be draining while its successor
/// starts; its outcome is no longer reported.
pub struct TokioWorkScheduler {
    inner: Arc<SchedulerInner>,
    generation: AtomicU64,
}

struct SchedulerInner {
    active: RwLock<HashMap<String, ActiveWork>>,
    channels: Mutex<HashMap<String, watch::Sender<Option<WorkInfo>>>>,
    clock: Arc<dyn Clock>,
}

struct ActiveWork {
    generation: u64,
    cancel: CancellationToken,
}

impl SchedulerInner {
    fn publish(&self, name: &str, state: WorkState, message: Option<String>) {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(None).0);

        let previous_runs = sender.borrow().as_ref().map_or(0, |info| info.run_count);
        let run_count = if state == WorkState::Running {
            previous_runs + 1
        } else {
            previous_runs
        };

        debug!(work = name, state = %state, run_count = run_count, "Work state changed");
        sender.send_replace(Some(WorkInfo {
            name: name.to_string(),
            state,
            run_count,
            message,
            updated_at: self.clock.now(),
        }));
    }

    fn subscribe(&self, name: &str) -> watch::Receiver<Option<WorkInfo>> {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels
            .entry(name.to_string())
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    fn latest(&self, name: &str) -> Option<WorkInfo> {
        let channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.get(name).and_then(|sender| sender.borrow().clone())
    }

    /// Publish only while `generation` is still the active run for `name`
    async fn publish_if_current(
        &self,
        name: &str,
        generation: u64,
        state: WorkState,
        message: Option<String>,
    ) -> bool {
        let active = self.active.read().await;
        if active.get(name).map(|work| work.generation) != Some(generation) {
            return false;
        }
        self.publish(name, state, message);
        true
    }

    /// Retire the run and publish its terminal state, unless it was replaced
    /// or cancelled in the meantime.
    async fn finish(&self, name: &str, generation: u64, state: WorkState, message: Option<String>) {
        let mut active = self.active.write().await;
        if active.get(name).map(|work| work.generation) == Some(generation) {
            active.remove(name);
            self.publish(name, state, message);
        }
    }

    fn outcome(result: Result<()>, cancel: &CancellationToken) -> (WorkState, Option<String>) {
        match result {
            _ if cancel.is_cancelled() => (WorkState::Cancelled, None),
            Ok(()) => (WorkState::Succeeded, None),
            Err(err) => (WorkState::Failed, Some(err.to_string())),
        }
    }
}

impl TokioWorkScheduler {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                active: RwLock::new(HashMap::new()),
                channels: Mutex::new(HashMap::new()),
                clock,
            }),
            generation: AtomicU64::new(0),
        }
    }

    /// Resolve the existing-work policy and register a new run.
    ///
    /// Returns `None` when the existing work is kept.
    async fn register(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
    ) -> Option<(EnqueueOutcome, u64, CancellationToken)> {
        let mut active = self.inner.active.write().await;

        let outcome = match (active.get(name), policy) {
            (Some(_), ExistingWorkPolicy::Keep) => {
                debug!(work = name, "Work already active; keeping existing");
                return None;
            }
            (Some(existing), ExistingWorkPolicy::Replace) => {
                debug!(work = name, "Replacing active work");
                existing.cancel.cancel();
                self.inner.publish(name, WorkState::Cancelled, None);
                EnqueueOutcome::Replaced
            }
            (None, _) => EnqueueOutcome::Enqueued,
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        active.insert(
            name.to_string(),
            ActiveWork {
                generation,
                cancel: cancel.clone(),
            },
        );
        self.inner.publish(name, WorkState::Enqueued, None);

        Some((outcome, generation, cancel))
    }
}

impl Default for TokioWorkScheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkScheduler for TokioWorkScheduler {
    async fn enqueue_unique_work(
        &self,
        name: &str,
        policy: ExistingWorkPolicy,
        job: WorkJob,
    ) -> Result<EnqueueOutcome> {
        let Some((outcome, generation, cancel)) = self.register(name, policy).await else {
            return Ok(EnqueueOutcome::KeptExisting);
        };

        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        tokio::spawn(async move {
            if !inner
                .publish_if_current(&name, generation, WorkState::Running, None)
                .await
            {
                return;
            }

            let result = job(cancel.clone()).await;
            if let Err(err) = &result {
                warn!(work = %name, error = %err, "Unique work failed");
            }

            let (state, message) = SchedulerInner::outcome(result, &cancel);
            inner.finish(&name, generation, state, message).await;
        });

        Ok(outcome)
    }

    async fn enqueue_unique_periodic_work(
        &self,
        name: &str,
        interval: Duration,
        policy: ExistingWorkPolicy,
        job: PeriodicWorkJob,
    ) -> Result<EnqueueOutcome> {
        if interval.is_zero() {
            return Err(BridgeError::OperationFailed(format!(
                "Periodic work '{}' needs a non-zero interval",
                name
            )));
        }

        let Some((outcome, generation, cancel)) = self.register(name, policy).await else {
            return Ok(EnqueueOutcome::KeptExisting);
        };

        debug!(
            work = name,
            interval_secs = interval.as_secs(),
            "Scheduling periodic work"
        );

        let inner = Arc::clone(&self.inner);
        let name = name.to_string();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                if !inner
                    .publish_if_current(&name, generation, WorkState::Running, None)
                    .await
                {
                    break;
                }

                let result = job(cancel.clone()).await;
                if cancel.is_cancelled() {
                    break;
                }

                let message = match result {
                    Ok(()) => None,
                    Err(err) => {
                        warn!(work = %name, error = %err, "Periodic work run failed");
                        Some(err.to_string())
                    }
                };
                // Periodic work goes back to Enqueued; the last failure is kept as message.
                inner
                    .publish_if_current(&name, generation, WorkState::Enqueued, message)
                    .await;
            }
        });

        Ok(outcome)
    }

    async fn cancel_unique_work(&self, name: &str) -> Result<bool> {
        let mut active = self.inner.active.write().await;
        match active.remove(name) {
            Some(work) => {
                debug!(work = name, "Cancelling unique work");
                work.cancel.cancel();
                self.inner.publish(name, WorkState::Cancelled, None);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn work_info(&self, name: &str) -> Result<Option<WorkInfo>> {
        Ok(self.inner.latest(name))
    }

    fn observe_work(&self, name: &str) -> BoxStream<'static, WorkInfo> {
        let rx = self.inner.subscribe(name);

        stream::unfold((rx, true), |(mut rx, first)| async move {
            if first {
                let current = rx.borrow_and_update().clone();
                if let Some(info) = current {
                    return Some((info, (rx, false)));
                }
            }
            loop {
                if rx.changed().await.is_err() {
                    return None;
                }
                let next = rx.borrow_and_update().clone();
                if let Some(info) = next {
                    return Some((info, (rx, false)));
                }
            }
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::background::WorkFuture;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::oneshot;
    use tokio::time::timeout;

    async fn wait_for_terminal(scheduler: &TokioWorkScheduler, name: &str) -> WorkInfo {
        let mut updates = scheduler.observe_work(name);
        timeout(Duration::from_secs(5), async {
            loop {
                let info = updates.next().await.expect("stream ended");
                if info.state.is_terminal() {
                    return info;
                }
            }
        })
        .await
        .expect("work did not finish")
    }

    #[tokio::test]
    async fn test_one_shot_work_succeeds() {
        let scheduler = TokioWorkScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let outcome = scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(move |_cancel| -> WorkFuture {
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Enqueued);
        let info = wait_for_terminal(&scheduler, "sync").await;
        assert_eq!(info.state, WorkState::Succeeded);
        assert_eq!(info.run_count, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_keep_policy_rejects_duplicate() {
        let scheduler = TokioWorkScheduler::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(move |_cancel| -> WorkFuture {
                    Box::pin(async move {
                        let _ = release_rx.await;
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        let second = scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(|_cancel| -> WorkFuture {
                    Box::pin(async {
                        Err(BridgeError::OperationFailed("must not run".to_string()))
                    })
                }),
            )
            .await
            .unwrap();
        assert_eq!(second, EnqueueOutcome::KeptExisting);

        release_tx.send(()).unwrap();
        assert_eq!(
            wait_for_terminal(&scheduler, "sync").await.state,
            WorkState::Succeeded
        );

        // Once finished, the name is free again.
        let third = scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(|_cancel| -> WorkFuture { Box::pin(async { Ok(()) }) }),
            )
            .await
            .unwrap();
        assert_eq!(third, EnqueueOutcome::Enqueued);
    }

    #[tokio::test]
    async fn test_cancel_is_cooperative() {
        let scheduler = TokioWorkScheduler::new();
        let (stopped_tx, stopped_rx) = oneshot::channel::<()>();

        scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(move |cancel| -> WorkFuture {
                    Box::pin(async move {
                        cancel.cancelled().await;
                        let _ = stopped_tx.send(());
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        assert!(scheduler.cancel_unique_work("sync").await.unwrap());
        timeout(Duration::from_secs(5), stopped_rx)
            .await
            .unwrap()
            .unwrap();

        let info = scheduler.work_info("sync").await.unwrap().unwrap();
        assert_eq!(info.state, WorkState::Cancelled);
        assert!(!scheduler.cancel_unique_work("sync").await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_work_keeps_message() {
        let scheduler = TokioWorkScheduler::new();

        scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(|_cancel| -> WorkFuture {
                    Box::pin(async {
                        Err(BridgeError::OperationFailed("server unreachable".to_string()))
                    })
                }),
            )
            .await
            .unwrap();

        let info = wait_for_terminal(&scheduler, "sync").await;
        assert_eq!(info.state, WorkState::Failed);
        assert!(info.message.unwrap().contains("server unreachable"));
    }

    #[tokio::test]
    async fn test_replace_cancels_previous_run() {
        let scheduler = TokioWorkScheduler::new();
        let (first_cancelled_tx, first_cancelled_rx) = oneshot::channel::<()>();

        scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Keep,
                Box::new(move |cancel| -> WorkFuture {
                    Box::pin(async move {
                        cancel.cancelled().await;
                        let _ = first_cancelled_tx.send(());
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        let outcome = scheduler
            .enqueue_unique_work(
                "sync",
                ExistingWorkPolicy::Replace,
                Box::new(|_cancel| -> WorkFuture { Box::pin(async { Ok(()) }) }),
            )
            .await
            .unwrap();

        assert_eq!(outcome, EnqueueOutcome::Replaced);
        timeout(Duration::from_secs(5), first_cancelled_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            wait_for_terminal(&scheduler, "sync").await.state,
            WorkState::Succeeded
        );
    }

    #[tokio::test]
    async fn test_periodic_work_repeats_until_cancelled() {
        let scheduler = TokioWorkScheduler::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        scheduler
            .enqueue_unique_periodic_work(
                "periodic",
                Duration::from_millis(20),
                ExistingWorkPolicy::Keep,
                Arc::new(move |_cancel| -> WorkFuture {
                    let counter = Arc::clone(&counter);
                    Box::pin(async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            )
            .await
            .unwrap();

        timeout(Duration::from_secs(5), async {
            while runs.load(Ordering::SeqCst) < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        assert!(scheduler.cancel_unique_work("periodic").await.unwrap());
        let info = scheduler.work_info("periodic").await.unwrap().unwrap();
        assert_eq!(info.state, WorkState::Cancelled);
        assert!(info.run_count >= 3);
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let scheduler = TokioWorkScheduler::new();
        let result = scheduler
            .enqueue_unique_periodic_work(
                "periodic",
                Duration::ZERO,
                ExistingWorkPolicy::Keep,
                Arc::new(|_cancel| -> WorkFuture { Box::pin(async { Ok(()) }) }),
            )
            .await;

        assert!(result.is_err());
    }
}
