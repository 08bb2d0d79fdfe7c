//  MANAGER.rs
//    by Lut99
//
//  Created:
//    24 Feb 2025, 09:02:13
//  Last edited:
//    29 Jul 2025, 11:46:31
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the job manager, which owns the job state machine and
//!   composes the ports to run it: local job creation, forwarding to the
//!   provider, derivation of the initial snapshot, link and identifier
//!   normalization, result verification, the background poll loops and
//!   graceful shutdown.
//!
//!   Clients always observe the gateway-local identity first: the
//!   response of an execution is the initial `accepted` snapshot with a
//!   local `Location`, regardless of how far the provider already got.
//

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use log::{debug, info, warn};
use serde_json::{Value, json};
use specifications::jobs::{JobStatus, JobStatusInfo, Link};
use tokio::sync::Notify;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::derive::{Derivation, DerivationContext, REQUIRED_STATUS_FIELDS, StatusDeriver};
use crate::errors::GatewayError;
use crate::hash::{execution_hash, inputs_checksum};
use crate::ids::ProcessId;
use crate::job::{InputsStorage, Job, JobEvent, JobEventKind};
use crate::observers::{PollingSchedulerObserver, ResultsVerificationObserver, StatusHistoryObserver};
use crate::retry::RetryPolicy;
use crate::spec::{HttpClient, InputsStore, JobObserver, JobRepository, Providers};


/***** CONSTANTS *****/
/// How long shutdown waits for poll tasks before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The lower bound from which the poll sleep grows towards the configured interval.
const POLL_BACKOFF_FLOOR: Duration = Duration::from_millis(250);





/***** HELPER FUNCTIONS *****/
/// Decodes a poll response body into a statusInfo, if it is one.
fn decode_status_info(body: &Value) -> Option<JobStatusInfo> {
    let map = body.as_object()?;
    if !REQUIRED_STATUS_FIELDS.iter().all(|field| map.contains_key(*field)) {
        return None;
    }
    serde_json::from_value(body.clone()).ok()
}

/// Rewrites the links of a snapshot to local form.
///
/// Provider links never survive: anything not already pointing at this job's local URLs is
/// dropped. A `self` link is guaranteed, and a `results` link whenever the status is
/// terminal-success.
fn normalize_links(info: &mut JobStatusInfo, job_id: &str) {
    let local_prefix: String = format!("/jobs/{job_id}");
    let mut links: Vec<Link> = info.links.take().unwrap_or_default();
    links.retain(|link| link.href.starts_with(&local_prefix));
    if !links.iter().any(|link| link.rel == "self") {
        links.insert(0, Link::json(&local_prefix, "self"));
    }
    if info.status == JobStatus::Successful && !links.iter().any(|link| link.rel == "results") {
        links.push(Link::json(format!("{local_prefix}/results"), "results"));
    }
    info.links = Some(links);
}





/***** AUXILLARY *****/
/// Tuning knobs of the job manager.
#[derive(Clone, Debug)]
pub struct JobManagerConfig {
    /// The upper bound on the sleep between poll iterations.
    pub poll_interval: Duration,
    /// The overall budget of a poll loop; expiry fails the job. Unbounded when [`None`].
    pub poll_timeout: Option<Duration>,
    /// Inputs up to this many serialized bytes are stored inline on the job.
    pub inline_inputs_limit: usize,
    /// The budget of a single result verification probe.
    pub probe_timeout: Duration,
}
impl Default for JobManagerConfig {
    #[inline]
    fn default() -> Self {
        Self { poll_interval: Duration::from_secs(5), poll_timeout: None, inline_inputs_limit: 64 * 1024, probe_timeout: Duration::from_secs(10) }
    }
}



/// What an execution request answers with: the local identity plus the initial snapshot.
#[derive(Clone, Debug)]
pub struct ExecutionResponse {
    /// The HTTP status code (201).
    pub status: u16,
    /// The local `Location` of the new job (`/jobs/{id}`).
    pub location: String,
    /// The initial `accepted` snapshot. The derived state is served by the job endpoint.
    pub body: JobStatusInfo,
}





/***** LIBRARY *****/
/// Owns the job state machine and the background poll loops around it.
pub struct JobManager {
    /// The provider catalog.
    providers: Arc<dyn Providers>,
    /// The client all provider traffic flows through.
    http: Arc<dyn HttpClient>,
    /// The single writer for job state.
    repo: Arc<dyn JobRepository>,
    /// Where oversized inputs go.
    inputs_store: Arc<dyn InputsStore>,
    /// Derives initial snapshots from execution responses.
    deriver: StatusDeriver,
    /// The retry policy around provider calls.
    retry: RetryPolicy,
    /// The fan-out list. Read-only after construction.
    observers: Vec<Arc<dyn JobObserver>>,
    /// Tuning knobs.
    config: JobManagerConfig,

    /// The live poll tasks, by job identifier.
    poll_tasks: DashMap<String, JoinHandle<()>>,
    /// Set once shutdown begins; poll loops observe it cooperatively.
    stop: AtomicBool,
    /// Wakes sleeping poll loops on shutdown.
    stop_notify: Notify,
}
impl JobManager {
    /// Creates a JobManager and wires up its standard observers and poll dispatcher.
    ///
    /// # Arguments
    /// - `providers`: The provider catalog port.
    /// - `http`: The HTTP client port.
    /// - `repo`: The job repository port.
    /// - `inputs_store`: The inputs store port.
    /// - `retry`: The retry policy for provider calls.
    /// - `config`: Tuning knobs.
    /// - `extra_observers`: Additional observers beyond the standard three (history, polling,
    ///   verification), e.g. result publication.
    ///
    /// # Returns
    /// The manager, behind the [`Arc`] its background tasks share.
    pub fn start(
        providers: Arc<dyn Providers>,
        http: Arc<dyn HttpClient>,
        repo: Arc<dyn JobRepository>,
        inputs_store: Arc<dyn InputsStore>,
        retry: RetryPolicy,
        config: JobManagerConfig,
        extra_observers: Vec<Arc<dyn JobObserver>>,
    ) -> Arc<Self> {
        let (tx, rx): (UnboundedSender<String>, UnboundedReceiver<String>) = unbounded_channel();

        let mut observers: Vec<Arc<dyn JobObserver>> = vec![
            Arc::new(StatusHistoryObserver::new(repo.clone())),
            Arc::new(PollingSchedulerObserver::new(tx)),
            Arc::new(ResultsVerificationObserver::new(http.clone(), repo.clone())),
        ];
        observers.extend(extra_observers);

        let this: Arc<Self> = Arc::new(Self {
            providers,
            http: http.clone(),
            repo,
            inputs_store,
            deriver: StatusDeriver::new(http),
            retry,
            observers,
            config,
            poll_tasks: DashMap::new(),
            stop: AtomicBool::new(false),
            stop_notify: Notify::new(),
        });

        // The dispatcher turns scheduling requests from the observer into registered tasks
        tokio::spawn({
            let this: Arc<Self> = this.clone();
            async move { this.poll_dispatcher(rx).await }
        });

        this
    }

    /// Creates a local job for the given execution, forwards it to the owning provider, derives
    /// and persists the initial remote state, and schedules polling if needed.
    ///
    /// # Arguments
    /// - `process_id`: The qualified (`provider:process`) identifier of the process to execute.
    /// - `exec_body`: The execution request body, forwarded verbatim.
    /// - `headers`: The incoming request headers; only `Prefer` is forwarded.
    /// - `user_id`: The opaque subject identifier of the caller, if authenticated.
    ///
    /// # Returns
    /// A 201 response carrying the local `Location` and the initial `accepted` snapshot. Provider
    /// failures fail the *job*, not this request.
    ///
    /// # Errors
    /// Only pre-creation failures (unknown process, repository trouble) error here.
    pub async fn create_and_forward(
        &self,
        process_id: &str,
        exec_body: Value,
        headers: &[(String, String)],
        user_id: Option<String>,
    ) -> Result<ExecutionResponse, GatewayError> {
        // Resolve the provider behind the qualified identifier
        let (provider_name, raw_id): (String, String) = self.resolve_provider(process_id)?;
        let provider = self.providers.provider(&provider_name).ok_or_else(|| GatewayError::NotFound { what: "provider", id: provider_name.clone() })?;
        let process_config = self.providers.process_config(&provider_name, &raw_id);

        // Deterministic processes may be answered from a previous run
        let process_version: String = process_config.as_ref().and_then(|c| c.version.clone()).unwrap_or_default();
        let hash: String = execution_hash(&exec_body, &process_version, user_id.as_deref());
        if process_config.as_ref().map(|c| c.deterministic).unwrap_or(false) {
            if let Some(existing) = self.repo.find_cached(&hash, user_id.as_deref()).await? {
                info!("Deterministic execution of '{}' answered from job '{}'", process_id, existing.id);
                self.repo.append_event(&existing.id, JobEvent::new(JobEventKind::CacheHit, json!({"process": process_id}))).await;
                let body: JobStatusInfo = existing.status_info.clone().unwrap_or_else(|| JobStatusInfo::new(&existing.id, existing.status));
                return Ok(ExecutionResponse { status: 201, location: format!("/jobs/{}", existing.id), body });
            }
        }

        // Mint the local identity and stash the inputs
        let job_id: String = Uuid::new_v4().to_string();
        let mut job: Job = Job::new(&job_id, process_id, &provider_name);
        job.user_id = user_id;
        job.hash = Some(hash);
        let raw_inputs: String = exec_body.to_string();
        job.inputs_size = Some(raw_inputs.len() as u64);
        job.inputs_checksum = Some(inputs_checksum(&raw_inputs));
        if raw_inputs.len() <= self.config.inline_inputs_limit {
            job.inputs = Some(exec_body.clone());
            job.inputs_storage = InputsStorage::Inline;
        } else {
            job.inputs_url = Some(self.inputs_store.store(&job_id, &exec_body).await?);
            job.inputs_storage = InputsStorage::Object;
        }

        // The accepted snapshot is persisted and fanned out before anything goes over the wire
        let mut accepted: JobStatusInfo = JobStatusInfo::new(&job_id, JobStatus::Accepted);
        accepted.process_id = Some(process_id.into());
        accepted.created = Some(Utc::now());
        accepted.updated = accepted.created;
        accepted.progress = Some(0);
        job.apply_status_info(accepted.clone());
        self.repo.create(job.clone()).await.map_err(GatewayError::from)?;
        self.repo.append_status(&job_id, accepted.clone()).await.map_err(GatewayError::from)?;
        self.notify_created(&job, &accepted).await;

        // Forward the execution to the provider
        let exec_url: String = provider.endpoint(format!("processes/{raw_id}/execution"));
        let mut fwd_headers: Vec<(String, String)> = provider.authentication.headers();
        if let Some((_, prefer)) = headers.iter().find(|(name, _)| name.eq_ignore_ascii_case("prefer")) {
            fwd_headers.push(("Prefer".into(), prefer.clone()));
        }
        let attempts: AtomicU32 = AtomicU32::new(0);
        let result = self
            .retry
            .run(|| {
                attempts.fetch_add(1, Ordering::SeqCst);
                self.http.post_json(&exec_url, &exec_body, &fwd_headers, provider.timeout())
            })
            .await;
        if attempts.load(Ordering::SeqCst) > 1 {
            self.repo.append_event(&job_id, JobEvent::new(JobEventKind::ForwardRetried, json!({"attempts": attempts.load(Ordering::SeqCst)}))).await;
        }

        let response = match result {
            Ok(response) => response,
            Err(err) => {
                // The job records the failure; the execution request itself still succeeds
                warn!("Failed to forward job '{}' to '{}': {}", job_id, exec_url, err);
                if let Some(failed) = self.repo.mark_failed(&job_id, err.title(), Some(err.to_string())).await.map_err(GatewayError::from)? {
                    let final_info: JobStatusInfo = failed.status_info.clone().unwrap_or_else(|| JobStatusInfo::new(&job_id, JobStatus::Failed));
                    self.notify_changed(&failed, Some(&accepted), &final_info).await;
                    self.notify_completed(&failed, &final_info).await;
                }
                return Ok(ExecutionResponse { status: 201, location: format!("/jobs/{job_id}"), body: accepted });
            },
        };

        // Derive the initial remote state and normalize it onto the local identity
        let derivation: Derivation = self
            .deriver
            .derive(&DerivationContext { job: &job, process_id, provider: &provider, headers: &fwd_headers, response: &response, accepted: &accepted })
            .await;
        let Derivation { mut status_info, remote_status_url, mut remote_job_id, diagnostic } = derivation;
        if status_info.job_id != job_id {
            if remote_job_id.is_none() {
                remote_job_id = Some(status_info.job_id.clone());
            }
            status_info.job_id = job_id.clone();
        }
        status_info.process_id = Some(process_id.into());
        if status_info.created.is_none() {
            status_info.created = accepted.created;
        }
        if status_info.updated.is_none() {
            status_info.updated = Some(Utc::now());
        }
        normalize_links(&mut status_info, &job_id);

        // Synchronous providers hand us the results in the same breath; keep them servable
        if status_info.status == JobStatus::Successful && remote_job_id.is_none() {
            if let Some(body) = &response.body {
                if body.get("outputs").is_some() {
                    job.results_inline = Some(body.clone());
                }
            }
        }

        job.remote_status_url = remote_status_url;
        job.remote_job_id = remote_job_id.clone();
        if diagnostic.is_some() {
            job.diagnostic = diagnostic;
        }
        job.apply_status_info(status_info.clone());
        self.repo.update(&job).await.map_err(GatewayError::from)?;
        let mut current: Job = self
            .repo
            .append_status(&job_id, status_info.clone())
            .await
            .map_err(GatewayError::from)?
            .ok_or_else(|| GatewayError::Internal { reason: format!("job '{job_id}' vanished during creation") })?;
        self.notify_changed(&current, Some(&accepted), &status_info).await;

        // An immediate success is only believed once its results prove fetchable
        let mut current_info: JobStatusInfo = status_info;
        if current_info.status == JobStatus::Successful {
            if let Some(rid) = &remote_job_id {
                (current, current_info) = self.verify_remote_results(current, current_info, &provider, rid, &fwd_headers, &accepted).await?;
            }
        }

        if current_info.is_terminal() {
            self.notify_completed(&current, &current_info).await;
        }

        // Polling, if needed, was scheduled by the observer fan-out above
        Ok(ExecutionResponse { status: 201, location: format!("/jobs/{job_id}"), body: accepted })
    }

    /// Returns the job with the given local identifier.
    ///
    /// # Errors
    /// [`GatewayError::NotFound`] when absent.
    pub async fn get_job(&self, id: &str) -> Result<Job, GatewayError> {
        self.repo.get(id).await.map_err(GatewayError::from)?.ok_or_else(|| GatewayError::NotFound { what: "job", id: id.into() })
    }

    /// Returns the results of the given job: inline ones directly, remote ones proxied from the
    /// provider.
    ///
    /// # Errors
    /// [`GatewayError::NotFound`] with `what = "results"` when the job is not (yet) successful;
    /// upstream errors when the provider-side fetch fails.
    pub async fn get_results(&self, id: &str) -> Result<Value, GatewayError> {
        let job: Job = self.get_job(id).await?;
        if job.status != JobStatus::Successful {
            return Err(GatewayError::NotFound { what: "results", id: id.into() });
        }
        if let Some(results) = &job.results_inline {
            return Ok(results.clone());
        }

        let provider = self.providers.provider(&job.provider).ok_or_else(|| GatewayError::NotFound { what: "provider", id: job.provider.clone() })?;
        let rid: &str = job.remote_job_id.as_deref().ok_or_else(|| GatewayError::NotFound { what: "results", id: id.into() })?;
        let url: String = format!("{}?f=json", provider.endpoint(format!("jobs/{rid}/results")));
        let headers: Vec<(String, String)> = provider.authentication.headers();
        self.retry.run(|| self.http.get_json(&url, &headers, provider.timeout())).await
    }

    /// Cancels all live poll loops and awaits them with a bounded grace period.
    ///
    /// Idempotent: the second and further calls are no-ops.
    pub async fn shutdown(&self) {
        if self.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down job manager ({} live poll task(s))", self.poll_tasks.len());
        self.stop_notify.notify_waiters();

        let ids: Vec<String> = self.poll_tasks.iter().map(|entry| entry.key().clone()).collect();
        let mut joins: Vec<JoinHandle<()>> = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some((_, handle)) = self.poll_tasks.remove(&id) {
                joins.push(handle);
            }
        }
        let aborts: Vec<tokio::task::AbortHandle> = joins.iter().map(|handle| handle.abort_handle()).collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, futures_util::future::join_all(joins)).await.is_err() {
            warn!("Poll tasks did not finish within {:?}; aborting them", SHUTDOWN_GRACE);
            for abort in aborts {
                abort.abort();
            }
        }
    }


    // ---- internals ----

    /// Splits a qualified process identifier, falling back to a linear search across providers for
    /// unqualified ones.
    fn resolve_provider(&self, process_id: &str) -> Result<(String, String), GatewayError> {
        match process_id.parse::<ProcessId>() {
            Ok(id) => Ok((id.provider, id.raw)),
            Err(_) => {
                for name in self.providers.names() {
                    if self.providers.is_available(&name, process_id) {
                        return Ok((name, process_id.into()));
                    }
                }
                Err(GatewayError::NotFound { what: "process", id: process_id.into() })
            },
        }
    }

    /// Probes the remote results of a just-successful job; downgrades it to failed if they cannot
    /// be fetched.
    async fn verify_remote_results(
        &self,
        mut job: Job,
        info: JobStatusInfo,
        provider: &weir_cfg::providers::Provider,
        remote_job_id: &str,
        headers: &[(String, String)],
        accepted: &JobStatusInfo,
    ) -> Result<(Job, JobStatusInfo), GatewayError> {
        let results_url: String = format!("{}?f=json", provider.endpoint(format!("jobs/{remote_job_id}/results")));
        match self.retry.run(|| self.http.get_json(&results_url, headers, self.config.probe_timeout)).await {
            Ok(_) => {
                debug!("Results of job '{}' verified at '{}'", job.id, results_url);
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::VerificationSucceeded, json!({"url": results_url}))).await;
                Ok((job, info))
            },
            Err(err) => {
                warn!("Downgrading job '{}': result fetch failed at '{}': {}", job.id, results_url, err);

                let mut failed: JobStatusInfo = JobStatusInfo::new(&job.id, JobStatus::Failed);
                failed.process_id = info.process_id.clone();
                failed.message = Some(format!("Verification of remote results failed: result fetch failed ({err})"));
                failed.created = accepted.created;
                failed.started = info.started;
                failed.finished = Some(Utc::now());
                failed.updated = Some(Utc::now());
                failed.progress = info.progress;
                failed.links = Some(vec![Link::json(format!("/jobs/{}", job.id), "self")]);

                job.diagnostic = Some(format!("result_verification_failed: {results_url} reason={err}"));
                job.apply_status_info(failed.clone());
                self.repo.update(&job).await.map_err(GatewayError::from)?;
                let stored: Job = self
                    .repo
                    .append_status(&job.id, failed.clone())
                    .await
                    .map_err(GatewayError::from)?
                    .ok_or_else(|| GatewayError::Internal { reason: format!("job '{}' vanished during verification", job.id) })?;
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::VerificationFailed, json!({"url": results_url, "reason": err.to_string()}))).await;
                self.notify_changed(&stored, Some(&info), &failed).await;
                Ok((stored, failed))
            },
        }
    }

    /// Consumes poll scheduling requests from the observer.
    async fn poll_dispatcher(self: Arc<Self>, mut rx: UnboundedReceiver<String>) {
        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(job_id) => self.schedule_poll(job_id),
                    None => break,
                },
                _ = self.stop_notify.notified() => break,
            }
        }
        debug!("Poll dispatcher terminating");
    }

    /// Registers a poll loop for the given job, unless one is already live or shutdown began.
    fn schedule_poll(self: &Arc<Self>, job_id: String) {
        if self.stop.load(Ordering::SeqCst) {
            return;
        }
        if let Some(entry) = self.poll_tasks.get(&job_id) {
            if !entry.is_finished() {
                return;
            }
        }

        debug!("Scheduling poll loop for job '{}'", job_id);
        let handle: JoinHandle<()> = tokio::spawn({
            let this: Arc<Self> = self.clone();
            let job_id: String = job_id.clone();
            async move { this.poll(job_id).await }
        });
        self.poll_tasks.insert(job_id, handle);
    }

    /// The poll loop of one job: fetch the remote snapshot, normalize, persist, sleep, repeat
    /// until the job terminates, the poll timeout expires or shutdown begins.
    async fn poll(self: Arc<Self>, job_id: String) {
        debug!("Poll loop for job '{}' starting", job_id);
        let poll_started: Instant = Instant::now();
        let mut backoff: Duration = POLL_BACKOFF_FLOOR.min(self.config.poll_interval);
        loop {
            if self.stop.load(Ordering::SeqCst) {
                debug!("Poll loop for job '{}' exiting: shutdown", job_id);
                return;
            }

            // Re-read the job; someone else may have terminated it meanwhile
            let job: Job = match self.repo.get(&job_id).await {
                Ok(Some(job)) => job,
                Ok(None) => return,
                Err(err) => {
                    warn!("Poll loop for job '{}' cannot read the repository: {}", job_id, err);
                    return;
                },
            };
            if job.is_terminal() {
                return;
            }
            let url: String = match &job.remote_status_url {
                Some(url) => url.clone(),
                None => return,
            };

            if let Some(timeout) = self.config.poll_timeout {
                if poll_started.elapsed() >= timeout {
                    self.poll_timeout_expired(job, timeout).await;
                    return;
                }
            }

            let (headers, budget): (Vec<(String, String)>, Duration) = match self.providers.provider(&job.provider) {
                Some(provider) => (provider.authentication.headers(), provider.timeout()),
                None => (vec![], Duration::from_secs(60)),
            };
            match self.retry.run(|| self.http.get_json(&url, &headers, budget)).await {
                Ok(body) => match decode_status_info(&body) {
                    Some(info) => match self.process_status_update(job, info).await {
                        Ok(true) => return,
                        Ok(false) => {},
                        Err(err) => {
                            warn!("Failed to persist poll update for job '{}': {}", job_id, err);
                        },
                    },
                    None => {
                        debug!("Poll response for job '{}' is not a statusInfo", job_id);
                        self.repo.append_event(&job_id, JobEvent::new(JobEventKind::PollError, json!({"reason": "response is not a statusInfo"}))).await;
                    },
                },
                Err(err) => {
                    debug!("Polling error for job '{}': {}", job_id, err);
                    self.repo.append_event(&job_id, JobEvent::new(JobEventKind::PollError, json!({"reason": err.to_string()}))).await;
                },
            }

            // Grow the sleep towards the configured interval; shutdown cuts it short
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {},
                _ = self.stop_notify.notified() => return,
            }
            backoff = backoff.saturating_mul(2).min(self.config.poll_interval);
        }
    }

    /// Normalizes and persists one polled snapshot.
    ///
    /// # Returns
    /// Whether the job is now terminal (i.e., whether the poll loop should stop).
    async fn process_status_update(&self, mut job: Job, mut info: JobStatusInfo) -> Result<bool, GatewayError> {
        // The remote identity never leaks; remember it, then overwrite
        if info.job_id != job.id {
            if job.remote_job_id.is_none() {
                job.remote_job_id = Some(info.job_id.clone());
            }
            info.job_id = job.id.clone();
        }
        info.process_id = Some(job.process_id.clone());

        // Backfill what the provider left out
        if info.created.is_none() {
            info.created = Some(job.created);
        }
        if info.updated.is_none() {
            info.updated = Some(Utc::now());
        }
        if info.started.is_none() {
            info.started = job.started_at().or_else(|| Some(Utc::now()));
        }
        if info.status == JobStatus::Running {
            if info.progress.is_none() {
                info.progress = Some(0);
            }
            if info.message.is_none() {
                info.message = Some("Running".into());
            }
        }
        if let Some(progress) = info.progress {
            info.progress = Some(progress.min(100));
        }
        if info.is_terminal() {
            if info.finished.is_none() {
                info.finished = Some(Utc::now());
            }
            if info.status == JobStatus::Successful {
                info.progress = Some(100);
            }
        }
        normalize_links(&mut info, &job.id);

        let old: Option<JobStatusInfo> = job.status_info.clone();
        job.apply_status_info(info.clone());
        self.repo.update(&job).await.map_err(GatewayError::from)?;
        let stored: Job = match self.repo.append_status(&job.id, info.clone()).await.map_err(GatewayError::from)? {
            Some(stored) => stored,
            None => return Ok(true),
        };
        self.notify_changed(&stored, old.as_ref(), &info).await;
        if info.is_terminal() {
            self.notify_completed(&stored, &info).await;
            return Ok(true);
        }
        Ok(false)
    }

    /// Terminally fails a job whose poll budget ran out.
    async fn poll_timeout_expired(&self, mut job: Job, timeout: Duration) {
        info!("Job '{}' exceeded its poll timeout of {:?}; failing it", job.id, timeout);

        let mut info: JobStatusInfo = JobStatusInfo::new(&job.id, JobStatus::Failed);
        info.process_id = Some(job.process_id.clone());
        info.message = Some(format!("Timed out after {}s", timeout.as_secs_f64()));
        info.created = Some(job.created);
        info.started = job.started_at();
        info.finished = Some(Utc::now());
        info.updated = info.finished;
        info.progress = job.status_info.as_ref().and_then(|si| si.progress);
        normalize_links(&mut info, &job.id);

        let old: Option<JobStatusInfo> = job.status_info.clone();
        job.diagnostic = Some(format!("poll_timeout after {}s", timeout.as_secs_f64()));
        job.apply_status_info(info.clone());
        if let Err(err) = self.repo.update(&job).await {
            warn!("Failed to persist poll timeout of job '{}': {}", job.id, err);
            return;
        }
        match self.repo.append_status(&job.id, info.clone()).await {
            Ok(Some(stored)) => {
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::PollTimeout, json!({"timeout_s": timeout.as_secs_f64()}))).await;
                self.notify_changed(&stored, old.as_ref(), &info).await;
                self.notify_completed(&stored, &info).await;
            },
            Ok(None) => {},
            Err(err) => warn!("Failed to append poll timeout snapshot of job '{}': {}", job.id, err),
        }
    }

    /// Fans a creation out to the observers, sequentially.
    async fn notify_created(&self, job: &Job, info: &JobStatusInfo) {
        for observer in &self.observers {
            observer.on_job_created(job, info).await;
        }
    }

    /// Fans a status change out to the observers, sequentially.
    async fn notify_changed(&self, job: &Job, old: Option<&JobStatusInfo>, new: &JobStatusInfo) {
        for observer in &self.observers {
            observer.on_status_changed(job, old, new).await;
        }
    }

    /// Fans a completion out to the observers, sequentially.
    async fn notify_completed(&self, job: &Job, info: &JobStatusInfo) {
        for observer in &self.observers {
            observer.on_job_completed(job, info).await;
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use weir_cfg::providers::{ProcessConfig, ResultStorage};

    use super::*;
    use crate::repository::{InMemoryInputsStore, InMemoryJobRepository};
    use crate::spec::UpstreamResponse;
    use crate::spec::mock::{ScriptedHttpClient, StaticProviders};

    fn response(status: u16, headers: &[(&str, &str)], body: Option<Value>) -> UpstreamResponse {
        UpstreamResponse { status, headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(), body }
    }

    fn test_config() -> JobManagerConfig {
        JobManagerConfig {
            poll_interval: Duration::from_millis(10),
            poll_timeout: None,
            inline_inputs_limit: 64 * 1024,
            probe_timeout: Duration::from_millis(50),
        }
    }

    fn deterministic_config(id: &str) -> ProcessConfig {
        ProcessConfig {
            id: id.into(),
            description: None,
            version: Some("1.0".into()),
            result_storage: ResultStorage::Remote,
            exclude: false,
            result_path: None,
            graph_properties: None,
            anonymous_access: false,
            deterministic: true,
        }
    }

    fn manager_with(
        post: Result<UpstreamResponse, GatewayError>,
        gets: Vec<Result<Value, GatewayError>>,
        processes: Vec<ProcessConfig>,
        config: JobManagerConfig,
    ) -> (Arc<JobManager>, Arc<InMemoryJobRepository>, Arc<ScriptedHttpClient>) {
        let repo: Arc<InMemoryJobRepository> = Arc::new(InMemoryJobRepository::new());
        let client: Arc<ScriptedHttpClient> = Arc::new(ScriptedHttpClient::new(post, gets));
        let providers: Arc<StaticProviders> = Arc::new(StaticProviders::new(processes));
        let retry: RetryPolicy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(2));
        let manager: Arc<JobManager> = JobManager::start(providers, client.clone(), repo.clone(), Arc::new(InMemoryInputsStore::new()), retry, config, vec![]);
        (manager, repo, client)
    }

    fn job_id_of(response: &ExecutionResponse) -> String { response.location.rsplit('/').next().unwrap().to_string() }

    // Scenario: async provider answering with a bare Location header.
    #[tokio::test]
    async fn async_execution_with_location_only() {
        let post = Ok(response(201, &[("Location", "http://provider.test/jobs/R1")], None));
        let gets = vec![Ok(json!({"jobID": "R1", "status": "running", "type": "process"}))];
        let (manager, repo, client) = manager_with(post, gets, vec![], test_config());

        let resp = manager.create_and_forward("prov:echo", json!({"inputs": {"x": 1}}), &[], None).await.unwrap();
        assert_eq!(resp.status, 201);
        // The response is the local identity: an accepted snapshot plus a local Location
        assert_eq!(resp.body.status, JobStatus::Accepted);
        let job_id: String = job_id_of(&resp);
        assert_eq!(resp.location, format!("/jobs/{job_id}"));
        assert_eq!(resp.body.job_id, job_id);

        // The follow-up GET went to the provider's Location, and the derived state is running
        assert_eq!(client.get_urls()[0], "http://provider.test/jobs/R1");
        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.remote_job_id.as_deref(), Some("R1"));
        assert_eq!(job.remote_status_url.as_deref(), Some("http://provider.test/jobs/R1"));

        // Exactly one link, the local self
        let links = job.status_info.as_ref().unwrap().links.clone().unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel, "self");
        assert_eq!(links[0].href, format!("/jobs/{job_id}"));

        manager.shutdown().await;
    }

    // Scenario: synchronous provider answering with immediate results.
    #[tokio::test]
    async fn immediate_results_synthesize_success() {
        let post = Ok(response(200, &[], Some(json!({"outputs": {"raster": {"value": 42}}}))));
        let (manager, repo, client) = manager_with(post, vec![], vec![], test_config());

        let resp = manager.create_and_forward("prov:echo", json!({"inputs": {"x": 1}}), &[], None).await.unwrap();
        // Even for an already-terminal derivation, the response body is the accepted snapshot
        assert_eq!(resp.body.status, JobStatus::Accepted);

        let job_id: String = job_id_of(&resp);
        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Successful);
        let info = job.status_info.as_ref().unwrap();
        assert_eq!(info.progress, Some(100));
        let hrefs: Vec<&str> = info.links.as_ref().unwrap().iter().map(|l| l.href.as_str()).collect();
        assert!(hrefs.contains(&format!("/jobs/{job_id}").as_str()));
        assert!(hrefs.contains(&format!("/jobs/{job_id}/results").as_str()));

        // No remote identity, so no polling and no verification probes
        assert!(job.remote_status_url.is_none());
        assert!(client.get_urls().is_empty());

        // The inline outputs are servable
        let results: Value = manager.get_results(&job_id).await.unwrap();
        assert_eq!(results.pointer("/outputs/raster/value"), Some(&json!(42)));

        manager.shutdown().await;
    }

    // Scenario: the provider cannot be reached at all.
    #[tokio::test]
    async fn upstream_failure_fails_the_job_not_the_request() {
        let post = Err(GatewayError::UpstreamConnection { url: "http://provider.test".into(), detail: "connect refused".into() });
        let (manager, repo, _) = manager_with(post, vec![], vec![], test_config());

        let resp = manager.create_and_forward("prov:echo", json!({}), &[], None).await.unwrap();
        assert_eq!(resp.status, 201);
        assert_eq!(resp.body.status, JobStatus::Accepted);

        let job_id: String = job_id_of(&resp);
        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.diagnostic.is_some());

        // Exactly two snapshots: accepted, then failed
        let history = repo.history(&job_id).await.unwrap();
        assert_eq!(history.iter().map(|si| si.status).collect::<Vec<_>>(), vec![JobStatus::Accepted, JobStatus::Failed]);

        manager.shutdown().await;
    }

    // Scenario: the remote job runs forever and the poll budget expires.
    #[tokio::test]
    async fn poll_timeout_fails_the_job_and_stops_the_loop() {
        let post = Ok(response(200, &[], Some(json!({"jobID": "remote-1", "status": "running", "type": "process"}))));
        let config = JobManagerConfig { poll_timeout: Some(Duration::from_millis(50)), ..test_config() };
        let (manager, repo, _) = manager_with(post, vec![], vec![], config);

        let resp = manager.create_and_forward("prov:echo", json!({"inputs": {"y": 2}}), &[], None).await.unwrap();
        let job_id: String = job_id_of(&resp);

        tokio::time::sleep(Duration::from_millis(200)).await;
        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let info = job.status_info.as_ref().unwrap();
        assert!(info.message.as_deref().unwrap().contains("Timed out"));
        assert!(info.finished.is_some());

        // The loop is gone: no further snapshots appear
        let len_before: usize = repo.history(&job_id).await.unwrap().len();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(repo.history(&job_id).await.unwrap().len(), len_before);

        manager.shutdown().await;
    }

    // Boundary: a zero poll timeout fails on the first iteration, before any GET.
    #[tokio::test]
    async fn zero_poll_timeout_fails_without_polling() {
        let post = Ok(response(200, &[], Some(json!({"jobID": "remote-1", "status": "running", "type": "process"}))));
        let config = JobManagerConfig { poll_timeout: Some(Duration::ZERO), ..test_config() };
        let (manager, repo, client) = manager_with(post, vec![], vec![], config);

        let resp = manager.create_and_forward("prov:echo", json!({}), &[], None).await.unwrap();
        let job_id: String = job_id_of(&resp);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status_info.as_ref().unwrap().message.as_deref().unwrap().contains("Timed out"));
        assert!(client.get_urls().is_empty());

        manager.shutdown().await;
    }

    // Scenario: results of an immediately-successful remote job are unreachable.
    #[tokio::test]
    async fn verification_failure_downgrades_to_failed() {
        let post = Ok(response(200, &[], Some(json!({"jobID": "remote-verify-fail", "status": "successful", "type": "process"}))));
        let unreachable = || Err(GatewayError::UpstreamConnection { url: "http://provider.test/jobs/remote-verify-fail/results?f=json".into(), detail: "not ready".into() });
        let (manager, repo, client) = manager_with(post, vec![unreachable(), unreachable(), unreachable()], vec![], test_config());

        let resp = manager.create_and_forward("prov:echo", json!({"inputs": {}}), &[], None).await.unwrap();
        let job_id: String = job_id_of(&resp);

        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        let info = job.status_info.as_ref().unwrap();
        assert!(info.message.as_deref().unwrap().to_lowercase().contains("result fetch failed"));

        // The self link survives the downgrade; the results link does not
        let links = info.links.as_ref().unwrap();
        assert!(links.iter().any(|l| l.rel == "self" && l.href == format!("/jobs/{job_id}")));
        assert!(!links.iter().any(|l| l.rel == "results"));

        // The probe actually hit the results endpoint
        assert!(client.get_urls().iter().all(|u| u.contains("/results")));
        assert_eq!(client.get_urls().len(), 3);

        manager.shutdown().await;
    }

    // Scenario: remote links are dropped and replaced by local ones.
    #[tokio::test]
    async fn remote_links_are_normalized_to_local_ones() {
        let post = Ok(response(
            200,
            &[],
            Some(json!({
                "jobID": "R2",
                "status": "successful",
                "type": "process",
                "links": [
                    {"href": "http://provider.test/jobs/R2", "rel": "self", "type": "application/json"},
                    {"href": "http://provider.test/jobs/R2/results", "rel": "results", "type": "application/json"}
                ]
            })),
        ));
        // One successful probe for the verification step
        let (manager, repo, _) = manager_with(post, vec![Ok(json!({"ok": true}))], vec![], test_config());

        let resp = manager.create_and_forward("prov:echo", json!({}), &[], None).await.unwrap();
        let job_id: String = job_id_of(&resp);

        let job: Job = repo.get(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Successful);
        assert_eq!(job.status_info.as_ref().unwrap().job_id, job_id);
        let hrefs: Vec<&str> = job.status_info.as_ref().unwrap().links.as_ref().unwrap().iter().map(|l| l.href.as_str()).collect();
        assert_eq!(hrefs, vec![format!("/jobs/{job_id}"), format!("/jobs/{job_id}/results")]);

        // The provider host appears nowhere in the stored history either
        for snapshot in repo.history(&job_id).await.unwrap() {
            for link in snapshot.links.unwrap_or_default() {
                assert!(!link.href.contains("provider.test"), "provider host leaked: {}", link.href);
            }
        }

        manager.shutdown().await;
    }

    // Law: a deterministic execution is answered from the prior successful job.
    #[tokio::test]
    async fn deterministic_executions_are_idempotent() {
        let post = Ok(response(200, &[], Some(json!({"outputs": {"v": 7}}))));
        let (manager, repo, _) = manager_with(post, vec![], vec![deterministic_config("det")], test_config());

        let first = manager.create_and_forward("prov:det", json!({"inputs": {"x": 1}}), &[], Some("alice".into())).await.unwrap();
        let first_id: String = job_id_of(&first);
        assert_eq!(repo.get(&first_id).await.unwrap().unwrap().status, JobStatus::Successful);
        let history_len: usize = repo.history(&first_id).await.unwrap().len();

        // The scripted POST is consumed: a second forward would fail. It never happens.
        let second = manager.create_and_forward("prov:det", json!({"inputs": {"x": 1}}), &[], Some("alice".into())).await.unwrap();
        assert_eq!(job_id_of(&second), first_id);
        assert_eq!(second.body.status, JobStatus::Successful);
        assert_eq!(repo.history(&first_id).await.unwrap().len(), history_len);

        // A different user gets a fresh job (and with it, a fresh forward attempt)
        let third = manager.create_and_forward("prov:det", json!({"inputs": {"x": 1}}), &[], Some("bob".into())).await.unwrap();
        assert_ne!(job_id_of(&third), first_id);

        manager.shutdown().await;
    }

    // Results of a non-successful job are not ready.
    #[tokio::test]
    async fn results_require_a_successful_job() {
        let post = Ok(response(200, &[], Some(json!({"jobID": "R9", "status": "running", "type": "process"}))));
        let (manager, _, _) = manager_with(post, vec![], vec![], test_config());

        let resp = manager.create_and_forward("prov:echo", json!({}), &[], None).await.unwrap();
        let job_id: String = job_id_of(&resp);
        match manager.get_results(&job_id).await {
            Err(GatewayError::NotFound { what: "results", .. }) => {},
            other => panic!("expected result-not-ready, got {other:?}"),
        }

        manager.shutdown().await;
    }

    // Law: shutting down twice is a no-op the second time.
    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let post = Ok(response(200, &[], Some(json!({"jobID": "R1", "status": "running", "type": "process"}))));
        let (manager, _, _) = manager_with(post, vec![], vec![], test_config());
        manager.create_and_forward("prov:echo", json!({}), &[], None).await.unwrap();

        manager.shutdown().await;
        manager.shutdown().await;
    }

    // Oversized inputs go to the inputs store, by reference.
    #[tokio::test]
    async fn large_inputs_are_stored_out_of_line() {
        let post = Ok(response(200, &[], Some(json!({"outputs": {}}))));
        let config = JobManagerConfig { inline_inputs_limit: 64, ..test_config() };
        let (manager, repo, _) = manager_with(post, vec![], vec![], config);

        let big: String = "v".repeat(256);
        let resp = manager.create_and_forward("prov:echo", json!({"inputs": {"blob": big}}), &[], None).await.unwrap();
        let job: Job = repo.get(&job_id_of(&resp)).await.unwrap().unwrap();
        assert_eq!(job.inputs_storage, InputsStorage::Object);
        assert!(job.inputs.is_none());
        assert!(job.inputs_url.is_some());
        assert!(job.inputs_size.unwrap() > 64);
        assert!(job.inputs_checksum.is_some());

        manager.shutdown().await;
    }
}
