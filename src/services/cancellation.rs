//! Cancellation registry for import jobs
//!
//! Jobs enter the registry when they are submitted and leave it when their
//! run ends (the `JobGuard` is dropped). Only the owner may cancel. A job
//! cancelled while still queued keeps its cancelled token, so the processor
//! sees it as soon as it picks the job up.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Global cancellation registry singleton
pub static CANCELLATION: Lazy<CancellationRegistry> = Lazy::new(CancellationRegistry::default);

struct JobEntry {
    token: CancellationToken,
    owner_id: Uuid,
    running: bool,
}

impl JobEntry {
    fn new(owner_id: Uuid, running: bool) -> Self {
        Self {
            token: CancellationToken::new(),
            owner_id,
            running,
        }
    }
}

/// Removes the job from the registry when dropped.
/// Hold it for the whole import.
pub struct JobGuard {
    job_id: Uuid,
    token: CancellationToken,
    registry: CancellationRegistry,
}

impl JobGuard {
    /// Token to hand to the batch coordinator
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.registry.remove(&self.job_id);
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum CancelError {
    /// Caller is not the owner of this job
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The running import stops before its next chunk
    Running,
    /// The job is skipped when the processor picks it up
    Queued,
    /// Unknown id, or the job already finished
    NotFound,
}

#[derive(Clone, Default)]
pub struct CancellationRegistry {
    jobs: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
}

impl CancellationRegistry {
    /// Track a job that has just been submitted
    pub fn enqueue(&self, job_id: Uuid, owner_id: Uuid) {
        self.jobs
            .lock()
            .entry(job_id)
            .or_insert_with(|| JobEntry::new(owner_id, false));
    }

    /// Forget a job whose submission failed
    pub fn discard(&self, job_id: &Uuid) {
        self.remove(job_id);
    }

    /// Register a job about to run. A token cancelled by the owner while the
    /// job was queued is kept; an entry left by another user is replaced.
    pub fn register(&self, job_id: Uuid, owner_id: Uuid) -> JobGuard {
        let mut jobs = self.jobs.lock();
        let entry = jobs.entry(job_id).or_insert_with(|| JobEntry::new(owner_id, true));
        if entry.owner_id != owner_id {
            *entry = JobEntry::new(owner_id, true);
        }
        entry.running = true;
        let token = entry.token.clone();
        drop(jobs);

        JobGuard {
            job_id,
            token,
            registry: self.clone(),
        }
    }

    /// Cancel a queued or running job owned by `caller_id`
    pub fn cancel(&self, job_id: &Uuid, caller_id: Uuid) -> Result<CancelOutcome, CancelError> {
        let jobs = self.jobs.lock();
        match jobs.get(job_id) {
            Some(entry) if entry.owner_id != caller_id => Err(CancelError::NotOwner),
            Some(entry) => {
                entry.token.cancel();
                Ok(if entry.running {
                    CancelOutcome::Running
                } else {
                    CancelOutcome::Queued
                })
            }
            None => Ok(CancelOutcome::NotFound),
        }
    }

    #[cfg(test)]
    fn is_cancelled(&self, job_id: &Uuid) -> bool {
        self.jobs
            .lock()
            .get(job_id)
            .map_or(false, |e| e.token.is_cancelled())
    }

    fn remove(&self, job_id: &Uuid) {
        self.jobs.lock().remove(job_id);
    }

    #[cfg(test)]
    pub(crate) fn contains(&self, job_id: &Uuid) -> bool {
        self.jobs.lock().contains_key(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_job_is_not_cancelled() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();

        let guard = reg.register(job_id, Uuid::new_v4());

        assert!(!reg.is_cancelled(&job_id));
        assert!(!guard.token().is_cancelled());
    }

    #[test]
    fn test_owner_cancel_reaches_guard_token() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        let guard = reg.register(job_id, owner_id);

        assert_eq!(reg.cancel(&job_id, owner_id), Ok(CancelOutcome::Running));
        assert!(guard.token().is_cancelled());
    }

    #[test]
    fn test_other_user_cannot_cancel() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        reg.enqueue(job_id, owner_id);

        assert_eq!(reg.cancel(&job_id, Uuid::new_v4()), Err(CancelError::NotOwner));
        let guard = reg.register(job_id, owner_id);
        assert!(!guard.token().is_cancelled());
    }

    #[test]
    fn test_unknown_job_is_not_found() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();

        assert_eq!(reg.cancel(&job_id, Uuid::new_v4()), Ok(CancelOutcome::NotFound));
        assert!(!reg.contains(&job_id));
    }

    #[test]
    fn test_queued_job_cancel_is_seen_at_pickup() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        reg.enqueue(job_id, owner_id);

        assert_eq!(reg.cancel(&job_id, owner_id), Ok(CancelOutcome::Queued));
        let guard = reg.register(job_id, owner_id);

        assert!(guard.token().is_cancelled());
    }

    #[test]
    fn test_finished_job_leaves_no_entry() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        let owner_id = Uuid::new_v4();
        reg.enqueue(job_id, owner_id);
        drop(reg.register(job_id, owner_id));

        assert_eq!(reg.cancel(&job_id, owner_id), Ok(CancelOutcome::NotFound));
        assert!(!reg.contains(&job_id));
    }

    #[test]
    fn test_discarded_submission_is_forgotten() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        reg.enqueue(job_id, Uuid::new_v4());

        reg.discard(&job_id);

        assert!(!reg.contains(&job_id));
    }

    #[test]
    fn test_guard_drop_unregisters() {
        let reg = CancellationRegistry::default();
        let job_id = Uuid::new_v4();
        {
            let _guard = reg.register(job_id, Uuid::new_v4());
            assert!(reg.contains(&job_id));
        }
        assert!(!reg.contains(&job_id));
    }
}
