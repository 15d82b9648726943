use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

use crate::error::AppError;
use crate::observability::metrics::Metrics;
use crate::store::CoordinationStore;

/// Bounded executor for work that runs after a request has been answered.
///
/// Tasks are spawned immediately but wait for a permit before running, so at
/// most `concurrency` of them touch the stores at once. A failing task is
/// logged and counted; nothing is reported back to the submitter.
#[derive(Clone)]
pub struct BackgroundTasks {
    permits: Arc<Semaphore>,
    metrics: Metrics,
}

impl BackgroundTasks {
    pub fn new(concurrency: usize, metrics: Metrics) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(concurrency)),
            metrics,
        }
    }

    pub fn submit<F>(&self, task: &'static str, work: F) -> JoinHandle<()>
    where
        F: Future<Output = Result<(), AppError>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                error!(task, "background executor closed; task dropped");
                return;
            };

            let outcome = match work.await {
                Ok(()) => {
                    debug!(task, "background task finished");
                    "success"
                }
                Err(err) => {
                    error!(task, error = %err, "background task failed");
                    "error"
                }
            };

            metrics
                .background_tasks_total
                .with_label_values(&[task, outcome])
                .inc();
        })
    }
}

/// Periodically reclaims expired coordination keys until the task is aborted.
pub fn spawn_coordination_sweep(
    store: Arc<dyn CoordinationStore>,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(err) = store.purge_expired().await {
                warn!(error = %err, "coordination sweep failed");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{spawn_coordination_sweep, BackgroundTasks};
    use crate::error::AppError;
    use crate::observability::metrics::Metrics;
    use crate::store::memory::MemoryCoordinationStore;
    use crate::store::CoordinationStore;

    #[tokio::test]
    async fn failures_are_contained() {
        let metrics = Metrics::new();
        let tasks = BackgroundTasks::new(2, metrics.clone());

        tasks
            .submit("always_fails", async {
                Err(AppError::Internal("boom".to_string()))
            })
            .await
            .unwrap();

        let failed = metrics
            .background_tasks_total
            .with_label_values(&["always_fails", "error"])
            .get();
        assert_eq!(failed, 1);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let tasks = BackgroundTasks::new(2, Metrics::new());
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                tasks.submit("bounded", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_reclaims_expired_keys() {
        let store = Arc::new(MemoryCoordinationStore::new());
        store.incr("order_status:o").await.unwrap();
        store
            .expire("order_status:o", Duration::from_secs(5))
            .await
            .unwrap();

        let sweep = spawn_coordination_sweep(store.clone(), Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;

        assert_eq!(store.key_count(), 0);
        sweep.abort();
    }
}
