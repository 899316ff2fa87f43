//! Admission control and lifecycle tracking for verification jobs.

use crate::{
    error::ServerError,
    job::{JobKey, JobStatus, VerificationJob},
};
use std::{
    collections::HashMap,
    sync::Mutex,
};
use tracing::{debug, warn};
use uuid::Uuid;

/// The only state shared between the coordinator and worker paths.
///
/// A single mutex guards both maps, which is what makes the admission check
/// and the subsequent pending-record write atomic: two concurrent
/// submissions for the same key cannot both be admitted. Lifecycle
/// transitions outside `pending -> running -> terminal` are programming
/// errors and panic, with one deliberate exception: a terminal report
/// against an already-terminal job is discarded, because supervision may
/// have timed the job out while the worker was still producing its result.
#[derive(Debug, Default)]
pub struct JobLedger {
    inner: Mutex<LedgerState>,
}

#[derive(Debug, Default)]
struct LedgerState {
    by_key: HashMap<JobKey, VerificationJob>,
    by_id: HashMap<Uuid, JobKey>,
}

impl JobLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admits a new job for `key` or rejects the submission.
    ///
    /// A key whose last job succeeded stays rejected until an external
    /// retention policy purges it; a key with a pending or running job is
    /// rejected for the duration; a key whose last job failed admits a
    /// fresh job with a new id.
    pub fn admit(&self, key: &JobKey) -> Result<Uuid, ServerError> {
        let mut state = self.lock();
        match state.by_key.get(key) {
            Some(job) if job.status == JobStatus::Succeeded => {
                Err(ServerError::AlreadyVerified {
                    chain_id: key.chain_id,
                    address: key.address.clone(),
                })
            }
            Some(job) if !job.status.is_terminal() => Err(ServerError::JobAlreadyRunning {
                chain_id: key.chain_id,
                address: key.address.clone(),
            }),
            _ => {
                let job = VerificationJob::admitted(key);
                let id = job.id;
                if let Some(replaced) = state.by_key.insert(key.clone(), job) {
                    // a failed predecessor; its id no longer resolves
                    state.by_id.remove(&replaced.id);
                }
                state.by_id.insert(id, key.clone());
                debug!(%id, chain_id = key.chain_id, address = %key.address, "job admitted");
                Ok(id)
            }
        }
    }

    /// Marks an admitted job as picked up by a worker
    pub fn mark_running(&self, id: Uuid) {
        let mut state = self.lock();
        let job = state.job_mut(id);
        assert_eq!(
            job.status,
            JobStatus::Pending,
            "job {id} must be pending to start running"
        );
        job.status = JobStatus::Running;
    }

    /// Records a worker's terminal report.
    ///
    /// Reports against an already-terminal job are discarded: the job may
    /// have been failed by timeout supervision while the worker was still
    /// running, and a terminal state is never overwritten.
    pub fn mark_terminal(&self, id: Uuid, status: JobStatus) {
        assert!(status.is_terminal(), "mark_terminal called with non-terminal status");
        let mut state = self.lock();
        let job = state.job_mut(id);
        match &job.status {
            JobStatus::Running => {
                debug!(%id, status = ?status, "job finished");
                job.status = status;
            }
            terminal if terminal.is_terminal() => {
                warn!(%id, late = ?status, "discarding terminal report for finished job");
            }
            pending => panic!("job {id} reported terminal from {pending:?} without running"),
        }
    }

    /// Removes a pending record that was never handed to a worker, making
    /// the key admittable again. Used when dispatch fails after admission.
    pub fn withdraw(&self, id: Uuid) {
        let mut state = self.lock();
        let key = state.by_id.remove(&id).unwrap_or_else(|| panic!("unknown job {id}"));
        let job = state.by_key.remove(&key).unwrap_or_else(|| panic!("unknown job {id}"));
        assert_eq!(job.status, JobStatus::Pending, "only pending jobs can be withdrawn");
    }

    /// Status query; terminal entries stay queryable until purged
    pub fn job(&self, id: Uuid) -> Option<VerificationJob> {
        let state = self.lock();
        let key = state.by_id.get(&id)?;
        state.by_key.get(key).cloned()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.inner.lock().expect("job ledger lock poisoned")
    }
}

impl LedgerState {
    fn job_mut(&mut self, id: Uuid) -> &mut VerificationJob {
        let key = self.by_id.get(&id).unwrap_or_else(|| panic!("unknown job {id}"));
        self.by_key.get_mut(key).unwrap_or_else(|| panic!("unknown job {id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn key() -> JobKey {
        JobKey::new(1, "0xaa")
    }

    #[test]
    fn admits_then_rejects_while_in_flight() {
        let ledger = JobLedger::new();
        let id = ledger.admit(&key()).unwrap();
        assert!(matches!(
            ledger.admit(&key()),
            Err(ServerError::JobAlreadyRunning { chain_id: 1, .. })
        ));
        ledger.mark_running(id);
        assert!(matches!(ledger.admit(&key()), Err(ServerError::JobAlreadyRunning { .. })));
    }

    #[test]
    fn succeeded_key_rejects_as_already_verified() {
        let ledger = JobLedger::new();
        let id = ledger.admit(&key()).unwrap();
        ledger.mark_running(id);
        ledger.mark_terminal(id, JobStatus::Succeeded);
        assert!(matches!(ledger.admit(&key()), Err(ServerError::AlreadyVerified { .. })));
    }

    #[test]
    fn failed_key_admits_a_fresh_job() {
        let ledger = JobLedger::new();
        let first = ledger.admit(&key()).unwrap();
        ledger.mark_running(first);
        ledger.mark_terminal(first, JobStatus::Failed("compiler error".to_string()));

        let second = ledger.admit(&key()).unwrap();
        assert_ne!(first, second);
        assert_eq!(ledger.job(second).unwrap().status, JobStatus::Pending);
    }

    #[test]
    fn concurrent_admissions_admit_exactly_one() {
        let ledger = Arc::new(JobLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ledger = Arc::clone(&ledger);
                std::thread::spawn(move || ledger.admit(&key()).is_ok())
            })
            .collect();
        let admitted =
            handles.into_iter().map(|h| h.join().unwrap()).filter(|&ok| ok).count();
        assert_eq!(admitted, 1);
    }

    #[test]
    fn terminal_state_is_immutable() {
        let ledger = JobLedger::new();
        let id = ledger.admit(&key()).unwrap();
        ledger.mark_running(id);
        ledger.mark_terminal(id, JobStatus::Failed("timed out".to_string()));
        // a late worker report must not overwrite the terminal state
        ledger.mark_terminal(id, JobStatus::Succeeded);
        assert_eq!(
            ledger.job(id).unwrap().status,
            JobStatus::Failed("timed out".to_string())
        );
    }

    #[test]
    #[should_panic(expected = "must be pending")]
    fn running_twice_is_a_programming_error() {
        let ledger = JobLedger::new();
        let id = ledger.admit(&key()).unwrap();
        ledger.mark_running(id);
        ledger.mark_running(id);
    }

    #[test]
    #[should_panic(expected = "without running")]
    fn terminal_from_pending_is_a_programming_error() {
        let ledger = JobLedger::new();
        let id = ledger.admit(&key()).unwrap();
        ledger.mark_terminal(id, JobStatus::Succeeded);
    }

    #[test]
    fn withdraw_makes_key_admittable_again() {
        let ledger = JobLedger::new();
        let id = ledger.admit(&key()).unwrap();
        ledger.withdraw(id);
        assert!(ledger.job(id).is_none());
        ledger.admit(&key()).unwrap();
    }
}
