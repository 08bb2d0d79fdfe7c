//  JOB.rs
//    by Lut99
//
//  Created:
//    17 Feb 2025, 10:21:49
//  Last edited:
//    28 Jul 2025, 16:31:27
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the internal job model: the gateway-local identity of an
//!   execution, distinct from the user-facing `statusInfo` snapshots.
//!
//!   The gateway mints a local UUID for every execution. Providers may
//!   use counters, short hashes or opaque strings for their own job ids;
//!   those are captured into `remote_job_id` for polling and correlation
//!   but never leak through the public surface, which exclusively speaks
//!   local UUIDs.
//

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use specifications::jobs::{JobStatus, JobStatusInfo, Link};


/***** AUXILLARY *****/
/// Defines where the inputs of a job are kept.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InputsStorage {
    /// Small inputs are kept inline on the job row.
    Inline,
    /// Larger inputs live in the inputs store, referenced by `inputs_url`.
    Object,
    /// The inputs were never ours; `inputs_url` points at wherever the client said they are.
    ExternalUrl,
}



/// A single entry in a job's append-only event stream.
///
/// Events record status transitions and non-status side effects (polling failures, verification
/// outcomes, forwarding retries); they are diagnostics, not part of the public surface.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JobEvent {
    /// When the event occurred.
    pub timestamp: DateTime<Utc>,
    /// What kind of event this is.
    pub kind: JobEventKind,
    /// Free-form details of the event.
    pub payload: Value,
}
impl JobEvent {
    /// Constructor for a JobEvent stamped with the current time.
    #[inline]
    pub fn new(kind: JobEventKind, payload: Value) -> Self { Self { timestamp: Utc::now(), kind, payload } }
}

/// The kinds of events recorded on a job.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobEventKind {
    /// The job's status changed (one event per appended snapshot).
    StatusChanged,
    /// The forwarding POST was retried after a transient failure.
    ForwardRetried,
    /// A poll iteration failed (transport error or undecodable body).
    PollError,
    /// The poll loop gave up because the configured poll timeout expired.
    PollTimeout,
    /// The results of a successful job were confirmed reachable.
    VerificationSucceeded,
    /// The results of a successful job could not be fetched.
    VerificationFailed,
    /// The results were published into the spatial result store.
    PublicationSucceeded,
    /// The result publication port failed.
    PublicationFailed,
    /// A deterministic execution was answered from a previous job.
    CacheHit,
}





/***** LIBRARY *****/
/// The gateway-local identity of an execution and the single writer view of its lifecycle.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Job {
    /// Stable local identifier (UUIDv4 text). Primary key; the only job identifier clients ever see.
    pub id: String,
    /// The qualified (`provider:process`) identifier of the executed process.
    pub process_id: String,
    /// The provider prefix. Redundant with `process_id`, kept denormalized for indexing.
    pub provider: String,
    /// The provider-side job identifier, if the provider manages jobs. Never exposed.
    pub remote_job_id: Option<String>,
    /// Absolute URL to poll for the remote statusInfo. Set iff the job needs polling to terminate.
    pub remote_status_url: Option<String>,

    /// Denormalized status string mirroring `status_info.status`, for fast queries.
    pub status: JobStatus,
    /// The latest status snapshot.
    pub status_info: Option<JobStatusInfo>,

    /// The execution inputs, inline. Never embedded in any `statusInfo`.
    pub inputs: Option<Value>,
    /// Pointer to externally stored inputs, if they were too large to inline.
    pub inputs_url: Option<String>,
    /// Where the inputs of this job are kept.
    pub inputs_storage: InputsStorage,
    /// The size of the serialized inputs, in bytes.
    pub inputs_size: Option<u64>,
    /// SHA-256 (hex) of the serialized inputs.
    pub inputs_checksum: Option<String>,

    /// Results returned inline by the provider (synchronous execution), if any. Served by the
    /// results endpoint for jobs without a remote identity; never part of `status_info`.
    pub results_inline: Option<Value>,

    /// Local creation timestamp (UTC). Remote `started`/`finished` live in `status_info`.
    pub created: DateTime<Utc>,
    /// Local last-update timestamp (UTC).
    pub updated: DateTime<Utc>,

    /// Links of the job, always local.
    pub links: Vec<Link>,
    /// Internal failure reason, if `status` is failed. Not surfaced directly.
    pub diagnostic: Option<String>,
    /// Monotonically increasing change counter (optimistic concurrency / event sequence).
    pub version: u64,

    /// The opaque subject identifier of the submitting user, if authenticated.
    pub user_id: Option<String>,
    /// The idempotency key of this execution, for deterministic processes.
    pub hash: Option<String>,
}
impl Job {
    /// Constructor for a fresh, `accepted` Job without inputs.
    ///
    /// # Arguments
    /// - `id`: The local job identifier.
    /// - `process_id`: The qualified process identifier.
    /// - `provider`: The provider prefix.
    ///
    /// # Returns
    /// A new Job in `accepted` state with `created`/`updated` stamped now.
    pub fn new(id: impl Into<String>, process_id: impl Into<String>, provider: impl Into<String>) -> Self {
        let now: DateTime<Utc> = Utc::now();
        Self {
            id: id.into(),
            process_id: process_id.into(),
            provider: provider.into(),
            remote_job_id: None,
            remote_status_url: None,
            status: JobStatus::Accepted,
            status_info: None,
            inputs: None,
            inputs_url: None,
            inputs_storage: InputsStorage::Inline,
            inputs_size: None,
            inputs_checksum: None,
            results_inline: None,
            created: now,
            updated: now,
            links: vec![],
            diagnostic: None,
            version: 0,
            user_id: None,
            hash: None,
        }
    }

    /// Updates the `updated` timestamp.
    #[inline]
    pub fn touch(&mut self) { self.updated = Utc::now(); }

    /// Merges the latest statusInfo snapshot and keeps the denormalized status field in sync.
    pub fn apply_status_info(&mut self, info: JobStatusInfo) {
        self.status = info.status;
        self.status_info = Some(info);
        self.touch();
    }

    /// Returns whether this job has reached a terminal status.
    #[inline]
    pub fn is_terminal(&self) -> bool { self.status.is_terminal() }

    /// Returns when the provider started executing this job, if reported.
    #[inline]
    pub fn started_at(&self) -> Option<DateTime<Utc>> { self.status_info.as_ref().and_then(|si| si.started) }

    /// Returns when this job reached a terminal status, if it has.
    #[inline]
    pub fn finished_at(&self) -> Option<DateTime<Utc>> { self.status_info.as_ref().and_then(|si| si.finished) }
}





/***** TESTS *****/
