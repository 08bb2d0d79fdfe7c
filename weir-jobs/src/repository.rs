//  REPOSITORY.rs
//    by Lut99
//
//  Created:
//    20 Feb 2025, 09:31:22
//  Last edited:
//    28 Jul 2025, 17:12:50
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the in-memory adapter of the job repository port.
//!
//!   Suitable for tests and single-node deployments without durability
//!   requirements; a database-backed adapter implements the same port for
//!   everything else. The state machine guard lives here, at the single
//!   writer: a snapshot that would leave a terminal status is refused,
//!   with the sole exception of the successful-to-failed verification
//!   downgrade.
//

use std::collections::HashMap;

use chrono::Utc;
use async_trait::async_trait;
use parking_lot::Mutex;
use specifications::jobs::{JobStatus, JobStatusInfo};

use crate::errors::RepositoryError;
use crate::job::{Job, JobEvent};
use crate::spec::{JobFilter, JobRepository};


/***** HELPER FUNCTIONS *****/
/// Checks whether the state machine permits going from `from` to `to`.
fn transition_allowed(from: JobStatus, to: JobStatus) -> bool {
    if !from.is_terminal() {
        return true;
    }
    // The verification downgrade is the only way out of a terminal status
    from == JobStatus::Successful && to == JobStatus::Failed
}





/***** HELPER STRUCTS *****/
/// The single-lock state of the repository.
#[derive(Debug, Default)]
struct Inner {
    /// The jobs themselves, by identifier.
    jobs: HashMap<String, Job>,
    /// The append-only snapshot history per job.
    history: HashMap<String, Vec<JobStatusInfo>>,
    /// The append-only event stream per job.
    events: HashMap<String, Vec<JobEvent>>,
}





/***** LIBRARY *****/
/// An in-memory implementation of the [`JobRepository`] port.
#[derive(Debug, Default)]
pub struct InMemoryJobRepository {
    /// All state behind one lock; critical sections are short and never await.
    inner: Mutex<Inner>,
}
impl InMemoryJobRepository {
    /// Constructor for an empty InMemoryJobRepository.
    #[inline]
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn create(&self, job: Job) -> Result<Job, RepositoryError> {
        let mut inner = self.inner.lock();
        if inner.jobs.contains_key(&job.id) {
            return Err(RepositoryError::AlreadyExists { id: job.id });
        }
        inner.history.entry(job.id.clone()).or_default();
        inner.events.entry(job.id.clone()).or_default();
        inner.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, id: &str) -> Result<Option<Job>, RepositoryError> { Ok(self.inner.lock().jobs.get(id).cloned()) }

    async fn update(&self, job: &Job) -> Result<Job, RepositoryError> {
        let mut inner = self.inner.lock();
        match inner.jobs.get_mut(&job.id) {
            Some(stored) => {
                *stored = job.clone();
                stored.touch();
                Ok(stored.clone())
            },
            None => Err(RepositoryError::NotFound { id: job.id.clone() }),
        }
    }

    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, RepositoryError> {
        let inner = self.inner.lock();
        Ok(inner
            .jobs
            .values()
            .filter(|job| filter.provider.as_deref().map(|p| job.provider == p).unwrap_or(true))
            .filter(|job| filter.process_id.as_deref().map(|p| job.process_id == p).unwrap_or(true))
            .filter(|job| filter.status.map(|s| job.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn mark_failed(&self, id: &str, reason: &str, diagnostic: Option<String>) -> Result<Option<Job>, RepositoryError> {
        let mut inner = self.inner.lock();
        let Inner { jobs, history, .. } = &mut *inner;
        let job: &mut Job = match jobs.get_mut(id) {
            Some(job) => job,
            None => return Ok(None),
        };
        if !transition_allowed(job.status, JobStatus::Failed) {
            return Err(RepositoryError::IllegalTransition { id: id.into(), from: job.status, to: JobStatus::Failed });
        }

        let mut info: JobStatusInfo = JobStatusInfo::new(&job.id, JobStatus::Failed);
        info.process_id = Some(job.process_id.clone());
        info.message = Some(reason.into());
        info.created = Some(job.created);
        info.finished = Some(Utc::now());
        info.updated = Some(Utc::now());
        info.progress = job.status_info.as_ref().and_then(|si| si.progress);

        job.apply_status_info(info.clone());
        if diagnostic.is_some() {
            job.diagnostic = diagnostic;
        }
        job.version += 1;
        history.entry(job.id.clone()).or_default().push(info);
        Ok(Some(job.clone()))
    }

    async fn append_status(&self, id: &str, info: JobStatusInfo) -> Result<Option<Job>, RepositoryError> {
        let mut inner = self.inner.lock();
        let Inner { jobs, history, .. } = &mut *inner;
        let job: &mut Job = match jobs.get_mut(id) {
            Some(job) => job,
            None => return Ok(None),
        };
        if !transition_allowed(job.status, info.status) {
            return Err(RepositoryError::IllegalTransition { id: id.into(), from: job.status, to: info.status });
        }

        job.apply_status_info(info.clone());
        job.version += 1;
        history.entry(job.id.clone()).or_default().push(info);
        Ok(Some(job.clone()))
    }

    async fn append_event(&self, id: &str, event: JobEvent) {
        // Events may arrive before create() under racy schedules; tolerate that
        self.inner.lock().events.entry(id.into()).or_default().push(event);
    }

    async fn history(&self, id: &str) -> Result<Vec<JobStatusInfo>, RepositoryError> {
        Ok(self.inner.lock().history.get(id).cloned().unwrap_or_default())
    }

    async fn events(&self, id: &str) -> Vec<JobEvent> { self.inner.lock().events.get(id).cloned().unwrap_or_default() }

    async fn find_cached(&self, hash: &str, user_id: Option<&str>) -> Result<Option<Job>, RepositoryError> {
        let inner = self.inner.lock();
        Ok(inner
            .jobs
            .values()
            .find(|job| job.status == JobStatus::Successful && job.hash.as_deref() == Some(hash) && job.user_id.as_deref() == user_id)
            .cloned())
    }
}



/// An in-memory implementation of the [`InputsStore`](crate::spec::InputsStore) port.
///
/// Oversized inputs land in a process-local map under a `mem://` reference. Like the job
/// repository above, this is the test/single-node adapter; durable deployments swap in an object
/// store behind the same port.
#[derive(Debug, Default)]
pub struct InMemoryInputsStore {
    /// The stored inputs, by job identifier.
    inputs: Mutex<HashMap<String, serde_json::Value>>,
}
impl InMemoryInputsStore {
    /// Constructor for an empty InMemoryInputsStore.
    #[inline]
    pub fn new() -> Self { Self::default() }
}
#[async_trait]
impl crate::spec::InputsStore for InMemoryInputsStore {
    async fn store(&self, job_id: &str, inputs: &serde_json::Value) -> Result<String, crate::errors::GatewayError> {
        self.inputs.lock().insert(job_id.into(), inputs.clone());
        Ok(format!("mem://inputs/{job_id}"))
    }
}





/***** TESTS *****/
