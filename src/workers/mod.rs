pub mod backfill;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::BackfillConfig;
use backfill::{BackfillCycle, CycleOutcome};

const WORKER_NAME: &str = "embedding_backfill";

/// How often shutdown re-checks whether the in-flight cycle has returned.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Upper bound on how long shutdown waits for the in-flight cycle.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Drives the backfill cycle at a fixed interval until shutdown.
///
/// Ticks that arrive while a cycle is still running are skipped, so at most one
/// cycle executes at any time.
pub struct WorkerManager {
    cycle: Arc<BackfillCycle>,
    interval: Duration,
    shutdown_rx: broadcast::Receiver<()>,
}

impl WorkerManager {
    pub fn new(
        cycle: Arc<BackfillCycle>,
        config: &BackfillConfig,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            cycle,
            interval: Duration::from_secs(config.interval_secs),
            shutdown_rx,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start the scheduler and block until a shutdown message arrives and the
    /// in-flight cycle, if any, has returned.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut scheduler = JobScheduler::new().await?;

        let running = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(AtomicBool::new(false));

        let cycle = self.cycle.clone();
        let job_stop = stop.clone();
        add_job(
            &scheduler,
            self.interval,
            WORKER_NAME,
            running.clone(),
            move || {
                let cycle = cycle.clone();
                let stop = job_stop.clone();
                async move {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    if let CycleOutcome::SourceUnavailable = cycle.run_until(&stop).await {
                        tracing::warn!(worker = WORKER_NAME, "Store unavailable, retrying next tick");
                    }
                }
            },
        )
        .await?;

        scheduler.start().await?;
        tracing::info!(
            worker = WORKER_NAME,
            interval_secs = self.interval.as_secs(),
            "Worker manager started"
        );

        let _ = self.shutdown_rx.recv().await;

        stop.store(true, Ordering::SeqCst);
        tracing::info!(
            "Worker manager shutting down, waiting up to {}s for in-flight cycle",
            DRAIN_TIMEOUT.as_secs()
        );
        let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
            }
        })
        .await;
        if drained.is_err() {
            tracing::warn!(worker = WORKER_NAME, "In-flight cycle did not finish before drain timeout");
        }

        let _ = scheduler.shutdown().await;
        tracing::info!("Worker manager stopped");
        Ok(())
    }
}

/// Add a repeated job guarded by `running`: a tick that finds the previous run
/// unfinished is dropped.
///
/// Each run executes in its own task so the guard is released even if the run panics.
async fn add_job<Fut, F>(
    scheduler: &JobScheduler,
    every: Duration,
    name: &'static str,
    running: Arc<AtomicBool>,
    mut run: F,
) -> Result<(), tokio_cron_scheduler::JobSchedulerError>
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let job = Job::new_repeated_async(every, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            if let Err(e) = tokio::spawn(fut).await {
                tracing::error!(worker = name, error = %e, "Worker invocation panicked");
            }
            guard.store(false, Ordering::SeqCst);
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(worker = name, every_secs = every.as_secs(), "Registered worker");
    Ok(())
}
