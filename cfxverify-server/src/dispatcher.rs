//! Hands verification work to a fixed pool of workers and supervises it.

use crate::{
    error::{Result, ServerError},
    job::{JobKey, JobStatus},
    ledger::JobLedger,
    pipeline::VerificationPayload,
};
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// The compile-and-match pipeline as the dispatcher sees it. The error
/// string becomes the job's terminal failure reason.
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(
        &self,
        key: &JobKey,
        payload: VerificationPayload,
    ) -> std::result::Result<(), String>;
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    /// Number of worker tasks executing verifications in parallel
    pub workers: usize,
    /// Bound of the submission queue; a full queue rejects submissions
    /// instead of buffering without limit
    pub queue_capacity: usize,
    /// Execution budget per job; jobs running longer are failed by
    /// supervision
    pub exec_budget: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self { workers: 4, queue_capacity: 64, exec_budget: Duration::from_secs(120) }
    }
}

struct WorkUnit {
    id: Uuid,
    key: JobKey,
    payload: VerificationPayload,
}

/// Decouples the submission path from the compile-and-match pipeline.
///
/// `dispatch` admits the job, enqueues the payload and returns the job id
/// without waiting for the work; it never blocks on compilation. Workers
/// pull from the shared queue, so each job runs on exactly one worker, and
/// report terminal states back into the ledger. A job that exceeds the
/// execution budget is failed by supervision; the pipeline future is
/// dropped, and a late report would be discarded by the ledger anyway.
pub struct WorkerDispatcher {
    ledger: Arc<JobLedger>,
    sender: mpsc::Sender<WorkUnit>,
}

impl WorkerDispatcher {
    /// Spawns the worker pool; must be called within a tokio runtime
    pub fn new(
        ledger: Arc<JobLedger>,
        verifier: Arc<dyn Verifier>,
        config: DispatcherConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        for worker in 0..config.workers.max(1) {
            tokio::spawn(run_worker(
                worker,
                Arc::clone(&receiver),
                Arc::clone(&ledger),
                Arc::clone(&verifier),
                config.exec_budget,
            ));
        }
        Self { ledger, sender }
    }

    /// Admits `key`, queues the payload for out-of-band execution and
    /// returns the job id.
    ///
    /// Admission rejections (`AlreadyVerified`, `JobAlreadyRunning`) are
    /// surfaced here, synchronously, before any worker is involved. A full
    /// queue withdraws the fresh admission and fails with
    /// [`ServerError::CapacityExceeded`]; a submission is never silently
    /// dropped.
    pub fn dispatch(&self, key: JobKey, payload: VerificationPayload) -> Result<Uuid> {
        let id = self.ledger.admit(&key)?;
        if self.sender.try_send(WorkUnit { id, key, payload }).is_err() {
            warn!(%id, "worker queue full, withdrawing admission");
            self.ledger.withdraw(id);
            return Err(ServerError::CapacityExceeded)
        }
        debug!(%id, "job queued");
        Ok(id)
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }
}

async fn run_worker(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<WorkUnit>>>,
    ledger: Arc<JobLedger>,
    verifier: Arc<dyn Verifier>,
    exec_budget: Duration,
) {
    loop {
        // hold the lock only while receiving so siblings can pull in parallel
        let unit = match receiver.lock().await.recv().await {
            Some(unit) => unit,
            None => break,
        };
        let WorkUnit { id, key, payload } = unit;
        ledger.mark_running(id);
        info!(worker, %id, chain_id = key.chain_id, address = %key.address, "verification started");

        let status = match tokio::time::timeout(exec_budget, verifier.verify(&key, payload)).await
        {
            Ok(Ok(())) => JobStatus::Succeeded,
            Ok(Err(reason)) => {
                warn!(worker, %id, %reason, "verification failed");
                JobStatus::Failed(reason)
            }
            Err(_) => {
                warn!(worker, %id, budget = ?exec_budget, "verification timed out");
                JobStatus::Failed(format!(
                    "verification exceeded the execution budget of {exec_budget:?}"
                ))
            }
        };
        ledger.mark_terminal(id, status);
    }
}
