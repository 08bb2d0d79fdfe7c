//  PROCESSES.rs
//    by Lut99
//
//  Created:
//    05 Mar 2025, 09:12:47
//  Last edited:
//    30 Jul 2025, 10:11:02
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the catalog side of the gateway: aggregation of the
//!   process lists of every configured provider, per-process description
//!   fetch with link rewriting, and the execution entrypoint that feeds
//!   the job manager.
//

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info};
use parking_lot::RwLock;
use serde_json::Value;
use specifications::jobs::Link;
use specifications::processes::{ProcessDescription, ProcessList, ProcessSummary};
use warp::Rejection;
use warp::http::{HeaderMap, Response, StatusCode};
use warp::hyper::Body;
use weir_cfg::providers::{ProcessConfig, Provider};
use weir_jobs::errors::GatewayError;
use weir_jobs::manager::{ExecutionResponse, JobManager};
use weir_jobs::spec::{HttpClient, Providers};

use crate::auth::AuthContext;
use crate::spec::{Context, error_response, json_response};
use crate::validation::validate_exec_body;


/***** CONSTANTS *****/
/// How long a fetched per-provider process list stays warm.
const CATALOG_CACHE_TTL: Duration = Duration::from_secs(5 * 60);





/***** HELPER FUNCTIONS *****/
/// Rewrites the links of a process description to local form.
///
/// External links are replaced by the gateway's own route for the process; relative ones are kept.
fn rewrite_links(qualified: &str, links: Vec<Link>) -> Vec<Link> {
    links
        .into_iter()
        .map(|mut link| {
            if link.href.starts_with("http://") || link.href.starts_with("https://") {
                link.href = format!("/processes/{qualified}");
            }
            link
        })
        .collect()
}

/// Decides whether the given caller may see and run the given process.
fn allowed(user: Option<&AuthContext>, provider: &str, raw_id: &str, config: &ProcessConfig) -> bool {
    if config.anonymous_access {
        return true;
    }
    match user {
        Some(user) => user.has_role(provider) || user.has_role(&format!("{provider}_{raw_id}")),
        None => false,
    }
}





/***** LIBRARY *****/
/// Aggregates the catalogs of all providers and resolves per-process descriptions.
pub struct ProcessManager {
    /// The provider catalog.
    providers: Arc<dyn Providers>,
    /// The client the catalog calls go through.
    http: Arc<dyn HttpClient>,
    /// The job orchestration core executions are delegated to.
    jobs: Arc<JobManager>,
    /// Per-provider cached process lists.
    cache: RwLock<HashMap<String, (Vec<ProcessSummary>, Instant)>>,
}
impl ProcessManager {
    /// Constructor for a ProcessManager.
    pub fn new(providers: Arc<dyn Providers>, http: Arc<dyn HttpClient>, jobs: Arc<JobManager>) -> Self {
        Self { providers, http, jobs, cache: RwLock::new(HashMap::new()) }
    }

    /// Aggregates the process catalogs of all providers into one list.
    ///
    /// Only configured, non-excluded processes the caller may see are listed, each under its
    /// qualified (`provider:process`) identifier. Providers that cannot be reached contribute
    /// nothing instead of failing the listing.
    pub async fn list_all(&self, user: Option<&AuthContext>) -> ProcessList {
        let names: Vec<String> = self.providers.names();
        let fetches = names.iter().filter_map(|name| self.providers.provider(name)).map(|provider| async move {
            let summaries: Vec<ProcessSummary> = self.provider_processes(&provider).await;
            (provider, summaries)
        });

        let mut processes: Vec<ProcessSummary> = vec![];
        for (provider, summaries) in futures_util::future::join_all(fetches).await {
            for mut summary in summaries {
                let config: &ProcessConfig = match provider.process(&summary.id) {
                    Some(config) => config,
                    None => {
                        debug!("Process '{}' of provider '{}' is not configured; skipping", summary.id, provider.name);
                        continue;
                    },
                };
                if config.exclude {
                    debug!("Excluding process '{}' of provider '{}' based on configuration", summary.id, provider.name);
                    continue;
                }
                if !allowed(user, &provider.name, &summary.id, config) {
                    continue;
                }
                summary.id = format!("{}:{}", provider.name, summary.id);
                processes.push(summary);
            }
        }
        ProcessList { processes }
    }

    /// Returns the (possibly cached) raw process list of one provider.
    async fn provider_processes(&self, provider: &Provider) -> Vec<ProcessSummary> {
        // Fresh cache entries short-circuit the fetch
        {
            let cache = self.cache.read();
            if let Some((summaries, fetched)) = cache.get(&provider.name) {
                if fetched.elapsed() < CATALOG_CACHE_TTL {
                    debug!("Serving processes of provider '{}' from cache", provider.name);
                    return summaries.clone();
                }
            }
        }

        let url: String = provider.endpoint("processes");
        let body: Value = match self.http.get_json(&url, &provider.authentication.headers(), provider.timeout()).await {
            Ok(body) => body,
            Err(err) => {
                error!("Cannot access provider '{}': {}", provider.name, err);
                return vec![];
            },
        };
        let summaries: Vec<ProcessSummary> = match body.get("processes").cloned().map(serde_json::from_value) {
            Some(Ok(summaries)) => summaries,
            Some(Err(err)) => {
                error!("Provider '{}' returned an unparseable process list: {}", provider.name, err);
                return vec![];
            },
            None => {
                error!("Provider '{}' returned no 'processes' array", provider.name);
                return vec![];
            },
        };

        self.cache.write().insert(provider.name.clone(), (summaries.clone(), Instant::now()));
        summaries
    }

    /// Returns the description of the given process, with its links rewritten to local form.
    ///
    /// # Errors
    /// [`GatewayError::InvalidUsage`] for unknown/excluded processes (per the surface contract),
    /// [`GatewayError::NotAuthorized`] when the caller lacks the required role, and upstream
    /// variants when the provider misbehaves.
    pub async fn get(&self, process_id: &str, user: Option<&AuthContext>) -> Result<ProcessDescription, GatewayError> {
        let id: weir_jobs::ids::ProcessId = process_id
            .parse()
            .map_err(|_| GatewayError::InvalidUsage { reason: format!("Process ID '{process_id}' is not known! Please check the /processes endpoint for a list of available processes.") })?;
        if !self.providers.is_available(&id.provider, &id.raw) {
            return Err(GatewayError::InvalidUsage {
                reason: format!("Process ID '{process_id}' is not known! Please check the /processes endpoint for a list of available processes."),
            });
        }
        let provider: Provider = self.providers.provider(&id.provider).ok_or_else(|| GatewayError::NotFound { what: "provider", id: id.provider.clone() })?;
        // A reload may have raced is_available(); treat a vanished config as unknown too
        let config: ProcessConfig = match self.providers.process_config(&id.provider, &id.raw) {
            Some(config) => config,
            None => {
                return Err(GatewayError::InvalidUsage {
                    reason: format!("Process ID '{process_id}' is not known! Please check the /processes endpoint for a list of available processes."),
                });
            },
        };
        if !allowed(user, &id.provider, &id.raw, &config) {
            return Err(GatewayError::NotAuthorized { reason: format!("Access to process '{process_id}' requires the '{}' or '{}_{}' role", id.provider, id.provider, id.raw) });
        }

        let url: String = provider.endpoint(format!("processes/{}", id.raw));
        let body: Value = self.http.get_json(&url, &provider.authentication.headers(), provider.timeout()).await?;
        let mut description: ProcessDescription =
            serde_json::from_value(body).map_err(|err| GatewayError::UpstreamContent { url, snippet: err.to_string() })?;

        description.id = process_id.into();
        if let Some(links) = description.links.take() {
            description.links = Some(rewrite_links(process_id, links));
        }
        Ok(description)
    }

    /// Validates and executes the given process, delegating job creation to the job manager.
    ///
    /// # Errors
    /// Everything [`Self::get()`] raises, plus [`GatewayError::InvalidUsage`] for bodies violating
    /// the declared input schemas.
    pub async fn execute(
        &self,
        process_id: &str,
        body: Value,
        headers: &[(String, String)],
        user: Option<&AuthContext>,
    ) -> Result<ExecutionResponse, GatewayError> {
        // Availability and authorization ride along with the description fetch
        let description: ProcessDescription = self.get(process_id, user).await?;
        validate_exec_body(description.inputs.as_ref(), &body)?;

        info!("Executing '{}' for {}", process_id, user.map(|u| u.sub.as_str()).unwrap_or("anonymous"));
        self.jobs.create_and_forward(process_id, body, headers, user.map(|u| u.sub.clone())).await
    }
}





/***** HANDLERS *****/
/// Handles `GET /processes`: the aggregate catalog.
pub async fn list(context: Arc<Context>, headers: HeaderMap) -> Result<Response<Body>, Rejection> {
    info!("Handling GET on '/processes' (i.e., aggregate catalog)...");
    let user: Option<AuthContext> = AuthContext::from_headers(&headers);
    let list: ProcessList = context.processes.list_all(user.as_ref()).await;
    Ok(json_response(StatusCode::OK, &list))
}

/// Handles `GET /processes/{provider:id}`: one process description.
pub async fn get(process_id: String, context: Arc<Context>, headers: HeaderMap) -> Result<Response<Body>, Rejection> {
    info!("Handling GET on '/processes/{process_id}' (i.e., process description)...");
    let user: Option<AuthContext> = AuthContext::from_headers(&headers);
    match context.processes.get(&process_id, user.as_ref()).await {
        Ok(description) => Ok(json_response(StatusCode::OK, &description)),
        Err(err) => Ok(error_response(&err, &format!("/processes/{process_id}"))),
    }
}

/// Handles `POST /processes/{provider:id}/execution`: create a job.
pub async fn execute(process_id: String, body: Value, context: Arc<Context>, headers: HeaderMap) -> Result<Response<Body>, Rejection> {
    info!("Handling POST on '/processes/{process_id}/execution' (i.e., create job)...");
    let user: Option<AuthContext> = AuthContext::from_headers(&headers);
    let forwarded: Vec<(String, String)> =
        headers.iter().filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string()))).collect();

    match context.processes.execute(&process_id, body, &forwarded, user.as_ref()).await {
        Ok(response) => {
            let raw: Vec<u8> = serde_json::to_vec(&response.body).unwrap_or_default();
            Ok(Response::builder()
                .status(StatusCode::CREATED)
                .header("Content-Type", "application/json")
                .header("Location", response.location)
                .body(Body::from(raw))
                .unwrap())
        },
        Err(err) => Ok(error_response(&err, &format!("/processes/{process_id}/execution"))),
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use serde_json::json;
    use weir_cfg::providers::ResultStorage;
    use weir_jobs::manager::JobManagerConfig;
    use weir_jobs::repository::{InMemoryInputsStore, InMemoryJobRepository};
    use weir_jobs::retry::RetryPolicy;
    use weir_jobs::spec::UpstreamResponse;

    use super::*;

    /// Answers catalog and description GETs with fixed documents, and POSTs with immediate
    /// results.
    struct FakeProviderApi;
    #[async_trait]
    impl HttpClient for FakeProviderApi {
        async fn get_json(&self, url: &str, _headers: &[(String, String)], _timeout: Duration) -> Result<Value, GatewayError> {
            if url.ends_with("/processes") {
                Ok(json!({"processes": [
                    {"id": "open-sim", "title": "Open simulation"},
                    {"id": "secret-sim", "title": "Restricted simulation"},
                    {"id": "old-sim", "title": "Excluded simulation"},
                    {"id": "rogue-sim", "title": "Not configured at all"}
                ]}))
            } else if url.contains("/processes/") {
                Ok(json!({
                    "id": url.rsplit('/').next().unwrap(),
                    "version": "2.0.0",
                    "inputs": {"distance": {"minOccurs": 1, "schema": {"type": "number", "minimum": 0}}},
                    "links": [
                        {"href": "http://provider.test/processes/open-sim", "rel": "self"},
                        {"href": "/relative/unchanged", "rel": "alternate"}
                    ]
                }))
            } else {
                Ok(json!({"ok": true}))
            }
        }

        async fn post_json(&self, _url: &str, _body: &Value, _headers: &[(String, String)], _timeout: Duration) -> Result<UpstreamResponse, GatewayError> {
            Ok(UpstreamResponse { status: 200, headers: HashMap::new(), body: Some(json!({"outputs": {"v": 1}})) })
        }
    }

    /// One provider with an open, a restricted and an excluded process.
    struct FakeProviders;
    impl FakeProviders {
        fn make() -> Provider {
            let config = |id: &str, anonymous: bool, exclude: bool| ProcessConfig {
                id: id.into(),
                description: None,
                version: None,
                result_storage: ResultStorage::Remote,
                exclude,
                result_path: None,
                graph_properties: None,
                anonymous_access: anonymous,
                deterministic: false,
            };
            Provider {
                name: "prov".into(),
                url: "http://provider.test".into(),
                timeout: 5,
                authentication: Default::default(),
                processes: vec![config("open-sim", true, false), config("secret-sim", false, false), config("old-sim", true, true)],
            }
        }
    }
    impl Providers for FakeProviders {
        fn provider(&self, name: &str) -> Option<Provider> { (name == "prov").then(Self::make) }

        fn names(&self) -> Vec<String> { vec!["prov".into()] }

        fn process_config(&self, provider: &str, raw_id: &str) -> Option<ProcessConfig> {
            (provider == "prov").then(|| Self::make().process(raw_id).cloned()).flatten()
        }

        fn is_available(&self, provider: &str, raw_id: &str) -> bool { self.process_config(provider, raw_id).map(|c| !c.exclude).unwrap_or(false) }
    }

    fn manager() -> ProcessManager {
        let providers: Arc<dyn Providers> = Arc::new(FakeProviders);
        let http: Arc<dyn HttpClient> = Arc::new(FakeProviderApi);
        let jobs: Arc<JobManager> = JobManager::start(
            providers.clone(),
            http.clone(),
            Arc::new(InMemoryJobRepository::new()),
            Arc::new(InMemoryInputsStore::new()),
            RetryPolicy::new(2, Duration::from_millis(1), Duration::from_millis(2)),
            JobManagerConfig::default(),
            vec![],
        );
        ProcessManager::new(providers, http, jobs)
    }

    fn user(roles: &[&str]) -> AuthContext { AuthContext { sub: "alice".into(), roles: roles.iter().map(|r| r.to_string()).collect() } }

    #[test]
    fn external_links_are_rewritten_to_the_local_route() {
        let links = vec![Link::json("http://provider.test/processes/open-sim", "self"), Link::json("/relative/unchanged", "alternate")];
        let rewritten = rewrite_links("prov:open-sim", links);
        assert_eq!(rewritten[0].href, "/processes/prov:open-sim");
        assert_eq!(rewritten[1].href, "/relative/unchanged");
    }

    #[tokio::test]
    async fn the_catalog_lists_only_what_the_caller_may_see() {
        let manager = manager();

        // Anonymous callers see only anonymous-access processes
        let list = manager.list_all(None).await;
        let ids: Vec<&str> = list.processes.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["prov:open-sim"]);

        // A role unlocks the restricted one; exclusion and non-configuration always win
        let caller = user(&["prov_secret-sim"]);
        let list = manager.list_all(Some(&caller)).await;
        let ids: Vec<&str> = list.processes.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["prov:open-sim", "prov:secret-sim"]);
    }

    #[tokio::test]
    async fn descriptions_come_back_qualified_and_localized() {
        let manager = manager();
        let description = manager.get("prov:open-sim", None).await.unwrap();
        assert_eq!(description.id, "prov:open-sim");
        let links = description.links.unwrap();
        assert_eq!(links[0].href, "/processes/prov:open-sim");
        assert_eq!(links[1].href, "/relative/unchanged");
    }

    #[tokio::test]
    async fn authorization_follows_the_role_convention() {
        let manager = manager();

        match manager.get("prov:secret-sim", None).await {
            Err(GatewayError::NotAuthorized { .. }) => {},
            other => panic!("expected NotAuthorized, got {other:?}"),
        }
        assert!(manager.get("prov:secret-sim", Some(&user(&["prov"]))).await.is_ok());
        assert!(manager.get("prov:secret-sim", Some(&user(&["prov_secret-sim"]))).await.is_ok());

        // Excluded and unknown processes are indistinguishable from unknown ones
        assert!(matches!(manager.get("prov:old-sim", None).await, Err(GatewayError::InvalidUsage { .. })));
        assert!(matches!(manager.get("prov:rogue-sim", None).await, Err(GatewayError::InvalidUsage { .. })));
    }

    #[tokio::test]
    async fn execution_validates_before_forwarding() {
        let manager = manager();

        // Missing required input: rejected at the gateway
        match manager.execute("prov:open-sim", json!({"inputs": {}}), &[], None).await {
            Err(GatewayError::InvalidUsage { reason }) => assert!(reason.contains("distance")),
            other => panic!("expected InvalidUsage, got {other:?}"),
        }

        // A valid body goes through and lands as a job
        let response = manager.execute("prov:open-sim", json!({"inputs": {"distance": 12}}), &[], None).await.unwrap();
        assert_eq!(response.status, 201);
        assert!(response.location.starts_with("/jobs/"));

        manager.jobs.shutdown().await;
    }
}
