//  DERIVE.rs
//    by Lut99
//
//  Created:
//    19 Feb 2025, 10:12:40
//  Last edited:
//    28 Jul 2025, 17:01:18
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the derivation of an initial status snapshot from the
//!   polymorphic responses providers give to an execution POST.
//!
//!   Providers answer in one of four shapes, classified once per
//!   response: a statusInfo document in the body, an immediate results
//!   body, a bare `Location` header, or something unusable. Each shape
//!   has its own derivation; the classification is total, so every
//!   response derives *some* snapshot (worst case a `failed` one with a
//!   diagnostic).
//

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;
use specifications::jobs::{JobStatus, JobStatusInfo};
use weir_cfg::providers::Provider;

use crate::job::Job;
use crate::spec::{HttpClient, UpstreamResponse};


/***** CONSTANTS *****/
/// The fields a body must carry to count as a statusInfo document.
pub const REQUIRED_STATUS_FIELDS: [&str; 3] = ["jobID", "status", "type"];





/***** HELPER FUNCTIONS *****/
/// Checks whether the given body carries all [`REQUIRED_STATUS_FIELDS`].
fn has_required_fields(body: &Value) -> bool {
    match body.as_object() {
        Some(map) => REQUIRED_STATUS_FIELDS.iter().all(|field| map.contains_key(*field)),
        None => false,
    }
}

/// Names the JSON type of the given (possibly absent) body, for diagnostics.
fn body_type_name(body: Option<&Value>) -> &'static str {
    match body {
        Some(Value::Object(_)) => "object",
        Some(Value::Array(_)) => "array",
        Some(Value::String(_)) => "string",
        Some(Value::Number(_)) => "number",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Null) => "null",
        None => "none",
    }
}





/***** AUXILLARY *****/
/// The four shapes an execution response can take, in match priority order.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseShape {
    /// The body is a statusInfo document (possibly alongside `outputs`).
    DirectStatusInfo,
    /// The body carries `outputs` but no statusInfo: the provider executed synchronously.
    ImmediateResults,
    /// No statusInfo in the body, but a `Location` header points at the remote job.
    LocationOnly,
    /// Nothing recognizable; derivation falls through to a failure snapshot.
    Fallback,
}
impl ResponseShape {
    /// Classifies the given provider response. Evaluated once per response; total.
    pub fn classify(response: &UpstreamResponse) -> Self {
        let body: Option<&Value> = response.body.as_ref();
        if let Some(body) = body {
            if has_required_fields(body) {
                return Self::DirectStatusInfo;
            }
            if body.get("outputs").is_some() {
                return Self::ImmediateResults;
            }
        }
        if response.header("Location").is_some() {
            return Self::LocationOnly;
        }
        Self::Fallback
    }
}



/// Everything a derivation needs to know about the response and the job it belongs to.
pub struct DerivationContext<'a> {
    /// The local job the response belongs to.
    pub job: &'a Job,
    /// The qualified process identifier of the execution.
    pub process_id: &'a str,
    /// The provider that answered.
    pub provider: &'a Provider,
    /// The request headers to use for the auxiliary GET, if one is needed.
    pub headers: &'a [(String, String)],
    /// The response to derive from.
    pub response: &'a UpstreamResponse,
    /// The initial `accepted` snapshot of the job (source of the `created` timestamp).
    pub accepted: &'a JobStatusInfo,
}

/// The outcome of a derivation: a snapshot plus the remote identity it uncovered.
#[derive(Clone, Debug)]
pub struct Derivation {
    /// The derived (or synthesized) status snapshot.
    pub status_info: JobStatusInfo,
    /// The URL to poll for further snapshots, if the job is not done yet.
    pub remote_status_url: Option<String>,
    /// The provider-side job identifier, if it differs from the local one.
    pub remote_job_id: Option<String>,
    /// Internal failure detail, when the derivation had to fall back to `failed`.
    pub diagnostic: Option<String>,
}



/// Resolves a `Location` header value against a provider base URL.
///
/// Absolute values are taken as-is; relative ones are joined onto the base (which is the
/// provider's URL, never the gateway's own).
pub fn resolve_location(base: &str, location: &str) -> String {
    if location.starts_with("http://") || location.starts_with("https://") {
        return location.into();
    }
    format!("{}/{}", base.trim_end_matches('/'), location.trim_start_matches('/'))
}





/***** LIBRARY *****/
/// Derives normalized status snapshots from provider execution responses.
pub struct StatusDeriver {
    /// The client used for the single auxiliary GET of the Location-followup shape.
    http: std::sync::Arc<dyn HttpClient>,
}
impl StatusDeriver {
    /// Constructor for a StatusDeriver.
    #[inline]
    pub fn new(http: std::sync::Arc<dyn HttpClient>) -> Self { Self { http } }

    /// Derives a snapshot from the given execution response.
    ///
    /// Never fails: unusable responses derive a `failed` snapshot carrying a diagnostic.
    pub async fn derive(&self, ctx: &DerivationContext<'_>) -> Derivation {
        let shape: ResponseShape = ResponseShape::classify(ctx.response);
        debug!("Deriving status for job '{}' from {:?}-shaped response", ctx.job.id, shape);
        match shape {
            ResponseShape::DirectStatusInfo => self.derive_direct(ctx),
            ResponseShape::ImmediateResults => self.derive_immediate(ctx),
            ResponseShape::LocationOnly => self.derive_location_followup(ctx).await,
            ResponseShape::Fallback => self.derive_fallback(ctx),
        }
    }

    /// The body is a statusInfo document; parse it and capture the remote identity.
    fn derive_direct(&self, ctx: &DerivationContext<'_>) -> Derivation {
        // The body exists whenever classify() picks this shape
        let body: &Value = match ctx.response.body.as_ref() {
            Some(body) => body,
            None => return self.derive_fallback(ctx),
        };
        let status_info: JobStatusInfo = match serde_json::from_value(body.clone()) {
            Ok(info) => info,
            Err(err) => {
                warn!("Failed to parse statusInfo of job '{}': {}", ctx.job.id, err);
                return self.failed_snapshot(ctx, "Failed to parse statusInfo from provider response", format!("statusinfo_parse_error: {err}"));
            },
        };

        let remote_job_id: Option<String> = if status_info.job_id != ctx.job.id { Some(status_info.job_id.clone()) } else { None };

        // A Location header wins over a synthesized URL
        let mut remote_status_url: Option<String> = ctx.response.header("Location").map(|loc| resolve_location(&ctx.provider.url, loc));
        if remote_status_url.is_none() {
            if let Some(rid) = &remote_job_id {
                remote_status_url = Some(format!("{}?f=json", ctx.provider.endpoint(format!("jobs/{rid}"))));
            }
        }

        Derivation { status_info, remote_status_url, remote_job_id, diagnostic: None }
    }

    /// The body carries outputs only; synthesize a terminal success.
    fn derive_immediate(&self, ctx: &DerivationContext<'_>) -> Derivation {
        debug!("Provider returned results body without statusInfo; synthesizing terminal success for job '{}'", ctx.job.id);

        let mut status_info: JobStatusInfo = JobStatusInfo::new(&ctx.job.id, JobStatus::Successful);
        status_info.process_id = Some(ctx.process_id.into());
        status_info.message = Some("Completed (immediate results)".into());
        status_info.created = ctx.accepted.created;
        status_info.started = ctx.accepted.created;
        status_info.finished = Some(Utc::now());
        status_info.updated = Some(Utc::now());
        status_info.progress = Some(100);

        // No polling needed for immediate results
        Derivation { status_info, remote_status_url: None, remote_job_id: None, diagnostic: None }
    }

    /// Only a Location header; follow it once and re-apply the direct semantics on the result.
    async fn derive_location_followup(&self, ctx: &DerivationContext<'_>) -> Derivation {
        // The header exists whenever classify() picks this shape
        let location: &str = match ctx.response.header("Location") {
            Some(location) => location,
            None => return self.derive_fallback(ctx),
        };
        let resolved: String = resolve_location(&ctx.provider.url, location);
        debug!("Following provider Location '{}' (resolved '{}') for job '{}'", location, resolved, ctx.job.id);

        let body: Value = match self.http.get_json(&resolved, ctx.headers, ctx.provider.timeout()).await {
            Ok(body) => body,
            Err(err) => {
                warn!("Failed to follow Location '{}' of job '{}': {}", resolved, ctx.job.id, err);
                return self.failed_snapshot(ctx, "Failed to fetch status from Location header", format!("location_followup_failed: {resolved} reason={err}"));
            },
        };

        if !has_required_fields(&body) {
            warn!("Location follow-up of job '{}' returned no statusInfo", ctx.job.id);
            return self.failed_snapshot(ctx, "Failed to fetch status from Location header", format!("location_followup_failed: {resolved} reason=no_statusinfo_at_location"));
        }
        let status_info: JobStatusInfo = match serde_json::from_value(body) {
            Ok(info) => info,
            Err(err) => {
                return self.failed_snapshot(ctx, "Failed to fetch status from Location header", format!("location_followup_failed: {resolved} reason={err}"));
            },
        };

        let remote_job_id: Option<String> = if status_info.job_id != ctx.job.id { Some(status_info.job_id.clone()) } else { None };
        Derivation { status_info, remote_status_url: Some(resolved), remote_job_id, diagnostic: None }
    }

    /// Nothing usable; derive a failure snapshot with a diagnostic.
    fn derive_fallback(&self, ctx: &DerivationContext<'_>) -> Derivation {
        debug!("Response for job '{}' carries no statusInfo; marking failed", ctx.job.id);
        self.failed_snapshot(
            ctx,
            "Provider response missing statusInfo",
            format!("provider_status={} body_type={}", ctx.response.status, body_type_name(ctx.response.body.as_ref())),
        )
    }

    /// Builds a `failed` snapshot with the given message and diagnostic.
    fn failed_snapshot(&self, ctx: &DerivationContext<'_>, message: &str, diagnostic: String) -> Derivation {
        let mut status_info: JobStatusInfo = JobStatusInfo::new(&ctx.job.id, JobStatus::Failed);
        status_info.process_id = Some(ctx.process_id.into());
        status_info.message = Some(message.into());
        status_info.created = ctx.accepted.created;
        status_info.finished = Some(Utc::now());
        status_info.updated = Some(Utc::now());
        Derivation { status_info, remote_status_url: None, remote_job_id: None, diagnostic: Some(diagnostic) }
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::errors::GatewayError;
    use crate::spec::mock::ScriptedHttpClient;

    fn response(status: u16, headers: &[(&str, &str)], body: Option<Value>) -> UpstreamResponse {
        UpstreamResponse { status, headers: headers.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<HashMap<_, _>>(), body }
    }

    fn provider() -> Provider {
        Provider { name: "prov".into(), url: "http://prov.test/api/".into(), timeout: 5, authentication: Default::default(), processes: vec![] }
    }

    fn deriver(gets: Vec<Result<Value, GatewayError>>) -> (StatusDeriver, Arc<ScriptedHttpClient>) {
        let client = Arc::new(ScriptedHttpClient::new(Err(GatewayError::Internal { reason: "no post expected".into() }), gets));
        (StatusDeriver::new(client.clone()), client)
    }

    fn context<'a>(job: &'a Job, provider: &'a Provider, response: &'a UpstreamResponse, accepted: &'a JobStatusInfo) -> DerivationContext<'a> {
        DerivationContext { job, process_id: "prov:echo", provider, headers: &[], response, accepted }
    }

    #[test]
    fn classification_covers_the_four_shapes() {
        // A full statusInfo is direct, with or without outputs alongside it
        let direct = response(200, &[], Some(json!({"jobID": "r", "status": "running", "type": "process"})));
        assert_eq!(ResponseShape::classify(&direct), ResponseShape::DirectStatusInfo);
        let both = response(200, &[], Some(json!({"jobID": "r", "status": "successful", "type": "process", "outputs": {"x": 1}})));
        assert_eq!(ResponseShape::classify(&both), ResponseShape::DirectStatusInfo);

        // Outputs without the required fields is immediate results
        let immediate = response(200, &[], Some(json!({"outputs": {"raster": {"value": 42}}})));
        assert_eq!(ResponseShape::classify(&immediate), ResponseShape::ImmediateResults);

        // Missing `type` disqualifies a body from being direct
        let incomplete = response(201, &[("Location", "/jobs/R1")], Some(json!({"jobID": "r", "status": "running"})));
        assert_eq!(ResponseShape::classify(&incomplete), ResponseShape::LocationOnly);

        // No body, no header: fallback
        let empty = response(204, &[], None);
        assert_eq!(ResponseShape::classify(&empty), ResponseShape::Fallback);
    }

    #[test]
    fn location_resolution_is_against_the_provider_base() {
        assert_eq!(resolve_location("http://prov.test/api/", "/jobs/R1"), "http://prov.test/api/jobs/R1");
        assert_eq!(resolve_location("http://prov.test/api", "jobs/R1"), "http://prov.test/api/jobs/R1");
        assert_eq!(resolve_location("http://prov.test/api/", "http://elsewhere.test/jobs/R1"), "http://elsewhere.test/jobs/R1");
    }

    #[tokio::test]
    async fn direct_captures_remote_identity_and_prefers_the_location_header() {
        let job = Job::new("local-1", "prov:echo", "prov");
        let accepted = JobStatusInfo::new("local-1", JobStatus::Accepted);
        let prov = provider();

        // Both a Location header and a differing jobID: the resolved header wins
        let resp = response(201, &[("Location", "/jobs/R1")], Some(json!({"jobID": "R1", "status": "running", "type": "process"})));
        let (deriver, _) = deriver(vec![]);
        let derivation = deriver.derive(&context(&job, &prov, &resp, &accepted)).await;
        assert_eq!(derivation.remote_job_id.as_deref(), Some("R1"));
        assert_eq!(derivation.remote_status_url.as_deref(), Some("http://prov.test/api/jobs/R1"));
        assert_eq!(derivation.status_info.status, JobStatus::Running);

        // Without the header, the URL is synthesized from the remote job id
        let resp = response(200, &[], Some(json!({"jobID": "R2", "status": "running", "type": "process"})));
        let derivation = deriver.derive(&context(&job, &prov, &resp, &accepted)).await;
        assert_eq!(derivation.remote_status_url.as_deref(), Some("http://prov.test/api/jobs/R2?f=json"));
    }

    #[tokio::test]
    async fn immediate_results_synthesize_terminal_success() {
        let job = Job::new("local-2", "prov:echo", "prov");
        let accepted = JobStatusInfo::new("local-2", JobStatus::Accepted);
        let prov = provider();

        let resp = response(200, &[], Some(json!({"outputs": {"raster": {"value": 42}}})));
        let (deriver, _) = deriver(vec![]);
        let derivation = deriver.derive(&context(&job, &prov, &resp, &accepted)).await;
        assert_eq!(derivation.status_info.status, JobStatus::Successful);
        assert_eq!(derivation.status_info.progress, Some(100));
        assert_eq!(derivation.status_info.message.as_deref(), Some("Completed (immediate results)"));
        assert!(derivation.status_info.finished.is_some());
        assert!(derivation.remote_status_url.is_none());
        assert!(derivation.remote_job_id.is_none());
    }

    #[tokio::test]
    async fn location_followup_fetches_the_snapshot_once() {
        let job = Job::new("local-3", "prov:echo", "prov");
        let accepted = JobStatusInfo::new("local-3", JobStatus::Accepted);
        let prov = provider();

        let resp = response(201, &[("Location", "http://prov.test/api/jobs/R3")], None);
        let (deriver, client) = deriver(vec![Ok(json!({"jobID": "R3", "status": "running", "type": "process"}))]);
        let derivation = deriver.derive(&context(&job, &prov, &resp, &accepted)).await;
        assert_eq!(client.get_urls(), vec!["http://prov.test/api/jobs/R3".to_string()]);
        assert_eq!(derivation.status_info.status, JobStatus::Running);
        assert_eq!(derivation.remote_status_url.as_deref(), Some("http://prov.test/api/jobs/R3"));
        assert_eq!(derivation.remote_job_id.as_deref(), Some("R3"));
    }

    #[tokio::test]
    async fn failed_followup_derives_a_failure_with_diagnostic() {
        let job = Job::new("local-4", "prov:echo", "prov");
        let accepted = JobStatusInfo::new("local-4", JobStatus::Accepted);
        let prov = provider();

        let resp = response(201, &[("Location", "/jobs/R4")], None);
        let (deriver, _) = deriver(vec![Err(GatewayError::UpstreamConnection { url: "http://prov.test/api/jobs/R4".into(), detail: "refused".into() })]);
        let derivation = deriver.derive(&context(&job, &prov, &resp, &accepted)).await;
        assert_eq!(derivation.status_info.status, JobStatus::Failed);
        let diagnostic = derivation.diagnostic.unwrap();
        assert!(diagnostic.starts_with("location_followup_failed: http://prov.test/api/jobs/R4"));
        assert!(diagnostic.contains("reason="));
    }

    #[tokio::test]
    async fn fallback_names_the_response_shape() {
        let job = Job::new("local-5", "prov:echo", "prov");
        let accepted = JobStatusInfo::new("local-5", JobStatus::Accepted);
        let prov = provider();

        let resp = response(500, &[], Some(json!("oops")));
        let (deriver, _) = deriver(vec![]);
        let derivation = deriver.derive(&context(&job, &prov, &resp, &accepted)).await;
        assert_eq!(derivation.status_info.status, JobStatus::Failed);
        assert_eq!(derivation.diagnostic.as_deref(), Some("provider_status=500 body_type=string"));
    }
}
