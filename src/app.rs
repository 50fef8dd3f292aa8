use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::Config;
use crate::services::embedding_provider::OpenAiEmbeddingProvider;
use crate::store::{CandidateSelection, ClickHouseStore};
use crate::workers::backfill::BackfillCycle;
use crate::workers::WorkerManager;

/// Build the clients, run the scheduler, and return once `shutdown` resolves and
/// the in-flight cycle has drained.
///
/// Tracing must already be initialised.
pub async fn run<S>(config: Config, shutdown: S) -> ExitCode
where
    S: Future<Output = ()>,
{
    tracing::info!(
        table = %config.store.table,
        model = %config.provider.model,
        window_days = config.backfill.window_days,
        "Starting embedding-backfill"
    );

    let store = match ClickHouseStore::new(&config.store, CandidateSelection::from(&config.backfill)) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build store client");
            return ExitCode::FAILURE;
        }
    };
    let provider = match OpenAiEmbeddingProvider::new(&config.provider) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build embedding provider client");
            return ExitCode::FAILURE;
        }
    };

    // Unreachable store is not fatal: every cycle retries the connection.
    if let Err(e) = store.ping().await {
        tracing::warn!(error = %e, "Store not reachable at startup");
    }

    let cycle = Arc::new(BackfillCycle::new(store.clone(), provider, store));

    let (shutdown_tx, _) = broadcast::channel::<()>(8);
    let manager = WorkerManager::new(cycle, &config.backfill, shutdown_tx.subscribe());
    let mut worker = tokio::spawn(manager.start());

    tokio::select! {
        _ = shutdown => {
            let _ = shutdown_tx.send(());
            match worker.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Worker manager failed during shutdown"),
                Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            }
        }
        result = &mut worker => {
            match result {
                Ok(Ok(())) => tracing::warn!("Worker manager exited without shutdown signal"),
                Ok(Err(e)) => tracing::error!(error = %e, "Failed to start worker scheduler"),
                Err(e) => tracing::error!(error = %e, "Worker task panicked"),
            }
            return ExitCode::FAILURE;
        }
    }

    tracing::info!("Embedding backfill stopped");
    ExitCode::SUCCESS
}
