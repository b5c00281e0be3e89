//! CommitSyncer - background task that runs queued commit cycles in order.

use crate::registry::{CommitOutcome, TrackerRegistry};
use crate::TrackerError;
use roundtrack_model::DeferredCommitContext;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

pub struct CommitSyncer {
    registry: Arc<TrackerRegistry>,
    rx: mpsc::Receiver<DeferredCommitContext>,
}

impl CommitSyncer {
    /// Take ownership of the registry's deferred-commit queue.
    pub fn new(registry: Arc<TrackerRegistry>) -> Result<Self, TrackerError> {
        let rx = registry
            .take_deferred_receiver()
            .ok_or(TrackerError::SyncerAlreadyStarted)?;
        Ok(Self { registry, rx })
    }

    /// Run on the current tokio runtime until `shutdown_token` fires.
    pub fn spawn(self, shutdown_token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown_token))
    }

    /// Process cycles until shutdown or until the registry is dropped.
    pub async fn run(mut self, shutdown_token: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown_token.cancelled() => {
                    debug!("Commit syncer shutting down");
                    break;
                }
                next = self.rx.recv() => {
                    match next {
                        Some(dcc) => self.process(dcc).await,
                        None => break,
                    }
                }
            }
        }
    }

    async fn process(&self, dcc: DeferredCommitContext) {
        let registry = self.registry.clone();
        let retries = registry.config().prepare_retries;
        let handled = dcc.committed_round;

        // Commit cycles do blocking disk IO
        let result = tokio::task::spawn_blocking(move || commit_with_retries(&registry, dcc, retries)).await;
        match result {
            Ok(Ok(CommitOutcome::Committed { new_base })) => debug!(new_base = %new_base, "Cycle done"),
            Ok(Ok(CommitOutcome::Unordered)) => debug!("Cycle skipped as unordered"),
            // db_round is unchanged; the next committed_up_to reschedules from it
            Ok(Err(e)) => warn!(error = %e, "Commit cycle abandoned"),
            Err(e) => error!(error = %e, "Commit cycle panicked"),
        }
        self.registry.complete_cycle(handled);
    }
}

/// Run a cycle, halving the range after each prepare failure.
fn commit_with_retries(
    registry: &TrackerRegistry,
    mut dcc: DeferredCommitContext,
    retries: u32,
) -> Result<CommitOutcome, TrackerError> {
    let mut attempt = 0u32;
    loop {
        match registry.run_cycle(&mut dcc) {
            Err(TrackerError::Prepare { tracker, reason }) if attempt < retries && dcc.offset() > 1 => {
                attempt += 1;
                dcc.range.offset /= 2;
                debug!(tracker, %reason, attempt, offset = dcc.offset(), "Retrying with a narrower range");
            }
            other => return other,
        }
    }
}
