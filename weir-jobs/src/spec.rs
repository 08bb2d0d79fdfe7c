//  SPEC.rs
//    by Lut99
//
//  Created:
//    17 Feb 2025, 11:08:16
//  Last edited:
//    28 Jul 2025, 16:44:52
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the ports through which the orchestration core consumes its
//!   external collaborators: the HTTP client, the job store, the provider
//!   catalog, the inputs store, the result publication service and the
//!   lifecycle observers.
//!
//!   The core holds nothing but these interfaces; adapters are wired in
//!   at the composition root and swapped freely in tests.
//

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use weir_cfg::providers::{ProcessConfig, Provider};
use weir_cfg::watcher::ProvidersHandle;

use crate::errors::{GatewayError, RepositoryError};
use crate::job::{Job, JobEvent};
use specifications::jobs::{JobStatus, JobStatusInfo};


/***** AUXILLARY *****/
/// A structured view of an upstream POST response: status, headers, and the body if it was JSON.
#[derive(Clone, Debug)]
pub struct UpstreamResponse {
    /// The HTTP status code of the response.
    pub status:  u16,
    /// The response headers.
    pub headers: HashMap<String, String>,
    /// The response body, if it parsed as JSON.
    pub body:    Option<Value>,
}
impl UpstreamResponse {
    /// Returns the value of the header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| if key.eq_ignore_ascii_case(name) { Some(value.as_str()) } else { None })
    }
}



/// The filter of a job listing.
#[derive(Clone, Debug, Default)]
pub struct JobFilter {
    /// Only jobs of this provider.
    pub provider:   Option<String>,
    /// Only jobs of this qualified process identifier.
    pub process_id: Option<String>,
    /// Only jobs in this status.
    pub status:     Option<JobStatus>,
}





/***** LIBRARY *****/
/// The port through which all provider traffic flows.
///
/// Implementations map transport- and content-level failures onto the matching
/// [`GatewayError`](crate::errors::GatewayError) variants; the core never sees a raw client error.
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Performs a GET expecting a JSON body, raising on non-2xx statuses.
    ///
    /// # Arguments
    /// - `url`: The absolute URL to fetch.
    /// - `headers`: Additional request headers (provider authentication and the like).
    /// - `timeout`: Total budget for the call.
    ///
    /// # Errors
    /// Any upstream variant of [`GatewayError`], per the taxonomy.
    async fn get_json(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> Result<Value, GatewayError>;

    /// Performs a POST with a JSON body, returning the response without raising on non-2xx
    /// statuses (the caller classifies the response shape).
    ///
    /// # Arguments
    /// - `url`: The absolute URL to POST to.
    /// - `body`: The JSON body to send.
    /// - `headers`: Additional request headers.
    /// - `timeout`: Total budget for the call.
    ///
    /// # Errors
    /// Any upstream variant of [`GatewayError`] for transport-level failures. Non-2xx responses
    /// are returned, not raised.
    async fn post_json(&self, url: &str, body: &Value, headers: &[(String, String)], timeout: Duration) -> Result<UpstreamResponse, GatewayError>;
}



/// The port through which jobs are persisted and queried.
///
/// The repository is the single writer for job state; every mutation is atomic with respect to
/// concurrent callers, and `append_status` enforces the state machine (no transitions out of a
/// terminal status, except the explicit successful-to-failed verification downgrade).
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Persists a newly created job.
    ///
    /// # Errors
    /// [`RepositoryError::AlreadyExists`] if the identifier is taken.
    async fn create(&self, job: Job) -> Result<Job, RepositoryError>;

    /// Returns the job with the given identifier, or [`None`] if absent.
    async fn get(&self, id: &str) -> Result<Option<Job>, RepositoryError>;

    /// Persists modifications to an existing job and touches its `updated` timestamp.
    ///
    /// # Errors
    /// [`RepositoryError::NotFound`] for unknown identifiers.
    async fn update(&self, job: &Job) -> Result<Job, RepositoryError>;

    /// Lists jobs matching the given filter, in unspecified order. Pagination is the caller's
    /// responsibility.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, RepositoryError>;

    /// Atomically transitions the job to `failed` with the given reason, appending the failure
    /// snapshot. Used for forwarding errors.
    ///
    /// # Returns
    /// The updated job, or [`None`] if absent.
    async fn mark_failed(&self, id: &str, reason: &str, diagnostic: Option<String>) -> Result<Option<Job>, RepositoryError>;

    /// Atomically appends a status snapshot: updates the job's current snapshot and denormalized
    /// status, bumps its version, touches `updated` and extends the history stream.
    ///
    /// # Returns
    /// The updated job, or [`None`] if absent.
    ///
    /// # Errors
    /// [`RepositoryError::IllegalTransition`] when the snapshot would leave a terminal status
    /// (except `successful -> failed`).
    async fn append_status(&self, id: &str, info: JobStatusInfo) -> Result<Option<Job>, RepositoryError>;

    /// Records a diagnostic event on the job. Best-effort; never raises.
    async fn append_event(&self, id: &str, event: JobEvent);

    /// Returns the full status history of the job, oldest first.
    async fn history(&self, id: &str) -> Result<Vec<JobStatusInfo>, RepositoryError>;

    /// Returns the recorded events of the job, oldest first.
    async fn events(&self, id: &str) -> Vec<JobEvent>;

    /// Returns a prior successful job with the given idempotency hash submitted by the given user,
    /// if one exists. Used to answer deterministic executions without forwarding.
    async fn find_cached(&self, hash: &str, user_id: Option<&str>) -> Result<Option<Job>, RepositoryError>;
}



/// The port through which the provider catalog is consulted.
pub trait Providers: Send + Sync {
    /// Returns the provider with the given name, if declared.
    fn provider(&self, name: &str) -> Option<Provider>;

    /// Returns the names of all declared providers.
    fn names(&self) -> Vec<String>;

    /// Returns the configuration of the given process of the given provider, if both exist.
    fn process_config(&self, provider: &str, raw_id: &str) -> Option<ProcessConfig>;

    /// Returns whether the given process may be listed and executed through the gateway.
    fn is_available(&self, provider: &str, raw_id: &str) -> bool;
}

// The live providers file handle is the production adapter of the catalog port.
impl Providers for ProvidersHandle {
    #[inline]
    fn provider(&self, name: &str) -> Option<Provider> { ProvidersHandle::provider(self, name) }

    #[inline]
    fn names(&self) -> Vec<String> { ProvidersHandle::names(self) }

    #[inline]
    fn process_config(&self, provider: &str, raw_id: &str) -> Option<ProcessConfig> { ProvidersHandle::process_config(self, provider, raw_id) }

    #[inline]
    fn is_available(&self, provider: &str, raw_id: &str) -> bool { ProvidersHandle::is_available(self, provider, raw_id) }
}



/// The port through which oversized execution inputs are stored out of the job row.
#[async_trait]
pub trait InputsStore: Send + Sync {
    /// Stores the given inputs under the given job and returns a URL-shaped reference to them.
    async fn store(&self, job_id: &str, inputs: &Value) -> Result<String, GatewayError>;
}



/// The port through which the results of a job are ingested into the spatial result store.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Publishes the given feature collection as a layer named after the job.
    ///
    /// # Errors
    /// [`GatewayError::PublicationFailed`] when the store rejects the ingest.
    async fn publish(&self, job_id: &str, collection: &Value) -> Result<(), GatewayError>;
}



/// An observer of job lifecycle events.
///
/// Observers are stateless or internally synchronized; they may be invoked from any task. Their
/// failures are their own to log: observer invocations return no value and never abort the
/// transition that triggered them.
#[async_trait]
pub trait JobObserver: Send + Sync {
    /// Called after a job is created and its initial `accepted` snapshot stored.
    async fn on_job_created(&self, job: &Job, info: &JobStatusInfo) {
        let _ = (job, info);
    }

    /// Called after every persisted status transition.
    async fn on_status_changed(&self, job: &Job, old: Option<&JobStatusInfo>, new: &JobStatusInfo) {
        let _ = (job, old, new);
    }

    /// Called after a job reaches a terminal status.
    async fn on_job_completed(&self, job: &Job, info: &JobStatusInfo) {
        let _ = (job, info);
    }
}





/***** TEST FIXTURES *****/
