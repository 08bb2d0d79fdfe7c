//  OBSERVERS.rs
//    by Lut99
//
//  Created:
//    21 Feb 2025, 10:55:08
//  Last edited:
//    28 Jul 2025, 17:38:44
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the observers that hang off the job lifecycle: event
//!   recording, polling scheduling, result verification and result
//!   publication.
//!
//!   Every observer failure is logged and swallowed here; a transition
//!   never fails because a side effect did.
//

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde_json::{Value, json};
use specifications::jobs::{JobStatus, JobStatusInfo};
use weir_cfg::providers::ResultStorage;

use crate::job::{Job, JobEvent, JobEventKind};
use crate::spec::{HttpClient, JobObserver, JobRepository, Providers, ResultPublisher};


/***** HELPER FUNCTIONS *****/
/// Navigates a dotted object path (`result.some_obj.features`) into a JSON value.
pub fn lookup_path<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current: &Value = value;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}





/***** LIBRARY *****/
/// Records every lifecycle transition on the job's event stream.
pub struct StatusHistoryObserver {
    /// The repository holding the event streams.
    repo: Arc<dyn JobRepository>,
}
impl StatusHistoryObserver {
    /// Constructor for a StatusHistoryObserver.
    #[inline]
    pub fn new(repo: Arc<dyn JobRepository>) -> Self { Self { repo } }
}
#[async_trait]
impl JobObserver for StatusHistoryObserver {
    async fn on_job_created(&self, job: &Job, info: &JobStatusInfo) {
        self.repo.append_event(&job.id, JobEvent::new(JobEventKind::StatusChanged, json!({"from": null, "to": info.status}))).await;
        debug!("Recorded initial status of job '{}' ({})", job.id, info.status);
    }

    async fn on_status_changed(&self, job: &Job, old: Option<&JobStatusInfo>, new: &JobStatusInfo) {
        self.repo.append_event(&job.id, JobEvent::new(JobEventKind::StatusChanged, json!({"from": old.map(|si| si.status), "to": new.status}))).await;
        debug!("Recorded status change of job '{}' ({} -> {})", job.id, old.map(|si| si.status.as_str()).unwrap_or("none"), new.status);
    }
}



/// Decides when a job needs a background poll loop, and asks the manager to start one.
///
/// The loop itself lives in the manager (it needs the derivation and enrichment machinery); the
/// observer only makes the scheduling decision explicit.
pub struct PollingSchedulerObserver {
    /// The channel into the manager's poll dispatcher.
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}
impl PollingSchedulerObserver {
    /// Constructor for a PollingSchedulerObserver around the manager's scheduling channel.
    #[inline]
    pub fn new(tx: tokio::sync::mpsc::UnboundedSender<String>) -> Self { Self { tx } }
}
#[async_trait]
impl JobObserver for PollingSchedulerObserver {
    async fn on_status_changed(&self, job: &Job, _old: Option<&JobStatusInfo>, _new: &JobStatusInfo) {
        if job.remote_status_url.is_some() && !job.is_terminal() {
            debug!("Requesting poll loop for job '{}'", job.id);
            if self.tx.send(job.id.clone()).is_err() {
                warn!("Poll scheduler channel closed; job '{}' will not be polled", job.id);
            }
        }
    }
}



/// Confirms that the results of a terminally successful job are actually reachable.
///
/// Only remote results links are probed; local links are served by this gateway and need no
/// confirmation. Failures are logged and recorded as events, never written back to the job.
pub struct ResultsVerificationObserver {
    /// The client to probe with.
    http: Arc<dyn HttpClient>,
    /// The repository holding the event streams.
    repo: Arc<dyn JobRepository>,
    /// The budget of a single probe.
    timeout: Duration,
}
impl ResultsVerificationObserver {
    /// Constructor for a ResultsVerificationObserver with a 10s probe budget.
    #[inline]
    pub fn new(http: Arc<dyn HttpClient>, repo: Arc<dyn JobRepository>) -> Self { Self { http, repo, timeout: Duration::from_secs(10) } }
}
#[async_trait]
impl JobObserver for ResultsVerificationObserver {
    async fn on_job_completed(&self, job: &Job, info: &JobStatusInfo) {
        if info.status != JobStatus::Successful {
            return;
        }
        let results_url: &str = match info.link("results") {
            Some(link) => &link.href,
            None => {
                debug!("Job '{}' completed without a results link; nothing to verify", job.id);
                return;
            },
        };
        if results_url.starts_with("/jobs/") {
            debug!("Results of job '{}' are local; skipping verification", job.id);
            return;
        }

        match self.http.get_json(results_url, &[], self.timeout).await {
            Ok(_) => {
                debug!("Remote results of job '{}' are reachable", job.id);
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::VerificationSucceeded, json!({"url": results_url}))).await;
            },
            Err(err) => {
                warn!("Remote results of job '{}' are not reachable at '{}': {}", job.id, results_url, err);
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::VerificationFailed, json!({"url": results_url, "reason": err.to_string()}))).await;
            },
        }
    }
}



/// Publishes the results of terminally successful jobs into the spatial result store, for
/// processes configured with geoserver result storage.
pub struct ResultsPublicationObserver {
    /// The client to fetch remote results with.
    http: Arc<dyn HttpClient>,
    /// The provider catalog, for per-process configuration and credentials.
    providers: Arc<dyn Providers>,
    /// The publication port.
    publisher: Arc<dyn ResultPublisher>,
    /// The repository holding the event streams.
    repo: Arc<dyn JobRepository>,
}
impl ResultsPublicationObserver {
    /// Constructor for a ResultsPublicationObserver.
    #[inline]
    pub fn new(http: Arc<dyn HttpClient>, providers: Arc<dyn Providers>, publisher: Arc<dyn ResultPublisher>, repo: Arc<dyn JobRepository>) -> Self {
        Self { http, providers, publisher, repo }
    }

    /// Fetches the results document of the given job, inline or from the provider.
    async fn fetch_results(&self, job: &Job) -> Option<Value> {
        if let Some(results) = &job.results_inline {
            return Some(results.clone());
        }

        let provider = self.providers.provider(&job.provider)?;
        let remote_job_id: &str = job.remote_job_id.as_deref()?;
        let url: String = format!("{}?f=json", provider.endpoint(format!("jobs/{remote_job_id}/results")));
        match self.http.get_json(&url, &provider.authentication.headers(), provider.timeout()).await {
            Ok(results) => Some(results),
            Err(err) => {
                warn!("Failed to fetch results of job '{}' for publication: {}", job.id, err);
                None
            },
        }
    }
}
#[async_trait]
impl JobObserver for ResultsPublicationObserver {
    async fn on_job_completed(&self, job: &Job, info: &JobStatusInfo) {
        if info.status != JobStatus::Successful {
            return;
        }

        // Only processes that opted into geoserver storage are published
        let raw_id: &str = job.process_id.split_once(':').map(|(_, raw)| raw).unwrap_or(&job.process_id);
        let config = match self.providers.process_config(&job.provider, raw_id) {
            Some(config) => config,
            None => return,
        };
        if config.result_storage != ResultStorage::Geoserver {
            return;
        }

        let results: Value = match self.fetch_results(job).await {
            Some(results) => results,
            None => {
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::PublicationFailed, json!({"reason": "results unavailable"}))).await;
                return;
            },
        };

        // The configured result path points at the feature collection within the document
        let collection: &Value = match &config.result_path {
            Some(path) => match lookup_path(&results, path) {
                Some(collection) => collection,
                None => {
                    warn!("Result path '{}' not found in results of job '{}'", path, job.id);
                    self.repo.append_event(&job.id, JobEvent::new(JobEventKind::PublicationFailed, json!({"reason": format!("result path '{path}' not found")}))).await;
                    return;
                },
            },
            None => &results,
        };

        match self.publisher.publish(&job.id, collection).await {
            Ok(_) => {
                debug!("Published results of job '{}' as layer '{}'", job.id, job.id);
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::PublicationSucceeded, json!({"layer": job.id}))).await;
            },
            Err(err) => {
                // A terminal-success status is never changed by a publication failure
                warn!("Failed to publish results of job '{}': {}", job.id, err);
                self.repo.append_event(&job.id, JobEvent::new(JobEventKind::PublicationFailed, json!({"reason": err.to_string()}))).await;
            },
        }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use specifications::jobs::Link;
    use weir_cfg::providers::ProcessConfig;

    use super::*;
    use crate::errors::GatewayError;
    use crate::repository::InMemoryJobRepository;
    use crate::spec::mock::{ScriptedHttpClient, StaticProviders};

    /// A [`ResultPublisher`] that records what it was asked to publish.
    #[derive(Default)]
    struct RecordingPublisher {
        published: Mutex<Vec<(String, Value)>>,
        fail: bool,
    }
    #[async_trait]
    impl ResultPublisher for RecordingPublisher {
        async fn publish(&self, job_id: &str, collection: &Value) -> Result<(), GatewayError> {
            if self.fail {
                return Err(GatewayError::PublicationFailed { job: job_id.into(), reason: "store said no".into() });
            }
            self.published.lock().push((job_id.into(), collection.clone()));
            Ok(())
        }
    }

    fn successful_info(job_id: &str, links: Vec<Link>) -> JobStatusInfo {
        let mut info = JobStatusInfo::new(job_id, JobStatus::Successful);
        info.links = Some(links);
        info
    }

    #[test]
    fn lookup_path_navigates_dotted_keys() {
        let value = json!({"result": {"some_obj": {"features": [1, 2]}}});
        assert_eq!(lookup_path(&value, "result.some_obj.features"), Some(&json!([1, 2])));
        assert!(lookup_path(&value, "result.missing").is_none());
    }

    #[tokio::test]
    async fn history_observer_records_transition_events() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let observer = StatusHistoryObserver::new(repo.clone());

        let job = Job::new("j1", "prov:echo", "prov");
        let accepted = JobStatusInfo::new("j1", JobStatus::Accepted);
        let running = JobStatusInfo::new("j1", JobStatus::Running);
        observer.on_job_created(&job, &accepted).await;
        observer.on_status_changed(&job, Some(&accepted), &running).await;

        let events = repo.events("j1").await;
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.kind == JobEventKind::StatusChanged));
        assert_eq!(events[1].payload.get("from").and_then(|v| v.as_str()), Some("accepted"));
        assert_eq!(events[1].payload.get("to").and_then(|v| v.as_str()), Some("running"));
    }

    #[tokio::test]
    async fn scheduler_only_fires_for_pollable_jobs() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let observer = PollingSchedulerObserver::new(tx);

        // Terminal: no poll
        let mut job = Job::new("j1", "prov:echo", "prov");
        job.remote_status_url = Some("http://prov.test/jobs/R1".into());
        job.apply_status_info(JobStatusInfo::new("j1", JobStatus::Successful));
        observer.on_status_changed(&job, None, &job.status_info.clone().unwrap()).await;
        assert!(rx.try_recv().is_err());

        // No remote URL: no poll
        let mut job = Job::new("j2", "prov:echo", "prov");
        job.apply_status_info(JobStatusInfo::new("j2", JobStatus::Running));
        observer.on_status_changed(&job, None, &job.status_info.clone().unwrap()).await;
        assert!(rx.try_recv().is_err());

        // Running with a remote URL: poll
        let mut job = Job::new("j3", "prov:echo", "prov");
        job.remote_status_url = Some("http://prov.test/jobs/R3".into());
        job.apply_status_info(JobStatusInfo::new("j3", JobStatus::Running));
        observer.on_status_changed(&job, None, &job.status_info.clone().unwrap()).await;
        assert_eq!(rx.try_recv().unwrap(), "j3");
    }

    #[tokio::test]
    async fn verification_skips_local_links_and_probes_remote_ones() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let client = Arc::new(ScriptedHttpClient::new(Err(GatewayError::Internal { reason: "no post".into() }), vec![Ok(json!({"ok": true}))]));
        let observer = ResultsVerificationObserver::new(client.clone(), repo.clone());
        let job = Job::new("j1", "prov:echo", "prov");

        // Local links are not probed
        observer.on_job_completed(&job, &successful_info("j1", vec![Link::json("/jobs/j1/results", "results")])).await;
        assert!(client.get_urls().is_empty());

        // Remote links are, and the outcome lands on the event stream
        observer.on_job_completed(&job, &successful_info("j1", vec![Link::json("http://prov.test/jobs/R1/results", "results")])).await;
        assert_eq!(client.get_urls(), vec!["http://prov.test/jobs/R1/results".to_string()]);
        let events = repo.events("j1").await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, JobEventKind::VerificationSucceeded);
    }

    #[tokio::test]
    async fn publication_navigates_the_result_path() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let client = Arc::new(ScriptedHttpClient::new(Err(GatewayError::Internal { reason: "no post".into() }), vec![]));
        let providers = Arc::new(StaticProviders::new(vec![ProcessConfig {
            id: "echo".into(),
            description: None,
            version: None,
            result_storage: ResultStorage::Geoserver,
            exclude: false,
            result_path: Some("result.features".into()),
            graph_properties: None,
            anonymous_access: false,
            deterministic: false,
        }]));
        let publisher = Arc::new(RecordingPublisher::default());
        let observer = ResultsPublicationObserver::new(client, providers, publisher.clone(), repo.clone());

        let mut job = Job::new("j1", "prov:echo", "prov");
        job.results_inline = Some(json!({"result": {"features": {"type": "FeatureCollection", "features": []}}}));
        observer.on_job_completed(&job, &successful_info("j1", vec![])).await;

        let published = publisher.published.lock();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "j1");
        assert_eq!(published[0].1.get("type").and_then(|v| v.as_str()), Some("FeatureCollection"));
        drop(published);
        assert_eq!(repo.events("j1").await[0].kind, JobEventKind::PublicationSucceeded);
    }

    #[tokio::test]
    async fn publication_failure_never_touches_the_job() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let client = Arc::new(ScriptedHttpClient::new(Err(GatewayError::Internal { reason: "no post".into() }), vec![]));
        let providers = Arc::new(StaticProviders::new(vec![ProcessConfig {
            id: "echo".into(),
            description: None,
            version: None,
            result_storage: ResultStorage::Geoserver,
            exclude: false,
            result_path: None,
            graph_properties: None,
            anonymous_access: false,
            deterministic: false,
        }]));
        let publisher = Arc::new(RecordingPublisher { fail: true, ..Default::default() });
        let observer = ResultsPublicationObserver::new(client, providers, publisher, repo.clone());

        let mut job = Job::new("j1", "prov:echo", "prov");
        job.results_inline = Some(json!({"type": "FeatureCollection", "features": []}));
        repo.create(job.clone()).await.unwrap();
        repo.append_status("j1", JobStatusInfo::new("j1", JobStatus::Successful)).await.unwrap();

        observer.on_job_completed(&job, &successful_info("j1", vec![])).await;

        // The failure is an event, not a status change
        assert_eq!(repo.get("j1").await.unwrap().unwrap().status, JobStatus::Successful);
        let events = repo.events("j1").await;
        assert_eq!(events.last().unwrap().kind, JobEventKind::PublicationFailed);
    }
}
