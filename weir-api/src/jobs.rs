//  JOBS.rs
//    by Lut99
//
//  Created:
//    05 Mar 2025, 13:40:29
//  Last edited:
//    30 Jul 2025, 10:26:13
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the job endpoints of the gateway: listing with filters
//!   and pagination, the latest snapshot of one job, and the results
//!   proxy.
//!
//!   Visibility is per subject: callers see their own jobs, anonymous
//!   callers see anonymous jobs. Whether a foreign job exists is not
//!   revealed either way (a plain 404).
//

use std::collections::HashMap;
use std::sync::Arc;

use log::info;
use specifications::jobs::{JobList, JobStatus, JobStatusInfo, Link};
use warp::Rejection;
use warp::http::{HeaderMap, Response, StatusCode};
use warp::hyper::Body;
use weir_jobs::errors::GatewayError;
use weir_jobs::job::Job;
use weir_jobs::spec::JobFilter;

use crate::auth::AuthContext;
use crate::spec::{Context, error_response, json_response};


/***** HELPER FUNCTIONS *****/
/// Builds the next/previous pagination links of a job listing.
fn page_links(prefix: &str, page: usize, limit: Option<usize>, total: usize) -> Vec<Link> {
    let limit: usize = match limit {
        Some(limit) if total > limit => limit,
        _ => return vec![],
    };

    let mut links: Vec<Link> = vec![];
    if total > page * limit {
        let mut link: Link = Link::json(format!("{}jobs?page={}&limit={}", prefix, page + 1, limit), "service");
        link.title = Some("Next page of jobs.".into());
        links.push(link);
    }
    if page > 1 {
        let mut link: Link = Link::json(format!("{}jobs?page={}&limit={}", prefix, page - 1, limit), "service");
        link.title = Some("Previous page of jobs.".into());
        links.push(link);
    }
    links
}

/// Returns the latest snapshot of a job, synthesizing a minimal one if none was recorded yet.
fn snapshot_of(job: &Job) -> JobStatusInfo {
    match &job.status_info {
        Some(info) => info.clone(),
        None => JobStatusInfo::new(&job.id, job.status),
    }
}

/// Decides whether the given caller may see the given job.
fn visible_to(job: &Job, user: Option<&AuthContext>) -> bool {
    match (&job.user_id, user) {
        (Some(owner), Some(user)) => owner == &user.sub,
        (Some(_), None) => false,
        // Anonymous jobs are visible to everyone
        (None, _) => true,
    }
}





/***** HANDLERS *****/
/// Handles `GET /jobs`: list the caller's jobs, filtered and paginated.
pub async fn list(query: HashMap<String, String>, context: Arc<Context>, headers: HeaderMap) -> Result<Response<Body>, Rejection> {
    info!("Handling GET on '/jobs' (i.e., job listing)...");
    let user: Option<AuthContext> = AuthContext::from_headers(&headers);

    // Note: the `processID` filter carries the qualified identifier; OGC fixes the name
    let mut filter: JobFilter = JobFilter::default();
    filter.process_id = query.get("processID").cloned();
    if let Some(raw) = query.get("status") {
        match raw.parse::<JobStatus>() {
            Ok(status) => filter.status = Some(status),
            Err(err) => return Ok(error_response(&GatewayError::InvalidUsage { reason: err.to_string() }, "/jobs")),
        }
    }

    let mut jobs: Vec<Job> = match context.repo.list(&filter).await {
        Ok(jobs) => jobs,
        Err(err) => return Ok(error_response(&GatewayError::from(err), "/jobs")),
    };
    jobs.retain(|job| visible_to(job, user.as_ref()));
    jobs.sort_by(|lhs, rhs| rhs.created.cmp(&lhs.created));

    let total_count: usize = jobs.len();
    let page: usize = query.get("page").and_then(|raw| raw.parse().ok()).filter(|&page| page >= 1).unwrap_or(1);
    let limit: Option<usize> = query.get("limit").and_then(|raw| raw.parse().ok());
    if let Some(limit) = limit {
        jobs = jobs.into_iter().skip((page - 1) * limit).take(limit).collect();
    }

    let list: JobList =
        JobList { jobs: jobs.iter().map(snapshot_of).collect(), links: page_links(&context.prefix, page, limit, total_count), total_count };
    Ok(json_response(StatusCode::OK, &list))
}

/// Handles `GET /jobs/{id}`: the latest snapshot of one job.
pub async fn get(job_id: String, context: Arc<Context>, headers: HeaderMap) -> Result<Response<Body>, Rejection> {
    info!("Handling GET on '/jobs/{job_id}' (i.e., job status)...");
    let user: Option<AuthContext> = AuthContext::from_headers(&headers);

    match context.manager.get_job(&job_id).await {
        Ok(job) if visible_to(&job, user.as_ref()) => Ok(json_response(StatusCode::OK, &snapshot_of(&job))),
        // A foreign job reads as absent, not as forbidden
        Ok(_) => Ok(error_response(&GatewayError::NotFound { what: "job", id: job_id.clone() }, &format!("/jobs/{job_id}"))),
        Err(err) => Ok(error_response(&err, &format!("/jobs/{job_id}"))),
    }
}

/// Handles `GET /jobs/{id}/results`: proxy the results of a successful job.
pub async fn results(job_id: String, context: Arc<Context>, headers: HeaderMap) -> Result<Response<Body>, Rejection> {
    info!("Handling GET on '/jobs/{job_id}/results' (i.e., job results)...");
    let user: Option<AuthContext> = AuthContext::from_headers(&headers);

    match context.manager.get_job(&job_id).await {
        Ok(job) if !visible_to(&job, user.as_ref()) => {
            return Ok(error_response(&GatewayError::NotFound { what: "job", id: job_id.clone() }, &format!("/jobs/{job_id}/results")));
        },
        Err(err) => return Ok(error_response(&err, &format!("/jobs/{job_id}/results"))),
        Ok(_) => {},
    }

    match context.manager.get_results(&job_id).await {
        Ok(results) => Ok(json_response(StatusCode::OK, &results)),
        Err(err) => Ok(error_response(&err, &format!("/jobs/{job_id}/results"))),
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_links_only_appear_when_there_are_more_jobs() {
        // Everything fits on one page
        assert!(page_links("/", 1, Some(10), 5).is_empty());
        assert!(page_links("/", 1, None, 500).is_empty());

        // More pages ahead
        let links = page_links("/", 1, Some(10), 25);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "/jobs?page=2&limit=10");

        // Middle page links both ways
        let links = page_links("/", 2, Some(10), 25);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].href, "/jobs?page=3&limit=10");
        assert_eq!(links[1].href, "/jobs?page=1&limit=10");

        // Last page only links back
        let links = page_links("/", 3, Some(10), 25);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].href, "/jobs?page=2&limit=10");
    }

    #[test]
    fn visibility_is_per_subject() {
        let anonymous_job = Job::new("j1", "prov:echo", "prov");
        let mut owned_job = Job::new("j2", "prov:echo", "prov");
        owned_job.user_id = Some("alice".into());

        let alice = AuthContext { sub: "alice".into(), roles: vec![] };
        let bob = AuthContext { sub: "bob".into(), roles: vec![] };

        assert!(visible_to(&anonymous_job, None));
        assert!(visible_to(&anonymous_job, Some(&alice)));
        assert!(visible_to(&owned_job, Some(&alice)));
        assert!(!visible_to(&owned_job, Some(&bob)));
        assert!(!visible_to(&owned_job, None));
    }
}
