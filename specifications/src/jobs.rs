//  JOBS.rs
//    by Lut99
//
//  Created:
//    11 Feb 2025, 10:02:41
//  Last edited:
//    24 Jul 2025, 11:31:06
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the job-related wire types of OGC API - Processes: the
//!   status code set, links and the `statusInfo` snapshot document that
//!   every job endpoint serves.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};


/***** ERRORS *****/
/// Errors that relate to parsing [`JobStatus`]es.
#[derive(Debug)]
pub enum JobStatusParseError {
    /// The given string was not a known status code.
    UnknownStatus { raw: String },
}
impl Display for JobStatusParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use JobStatusParseError::*;
        match self {
            UnknownStatus { raw } => write!(f, "Unknown job status '{raw}' (expected one of 'accepted', 'running', 'successful', 'failed' or 'dismissed')"),
        }
    }
}
impl Error for JobStatusParseError {}





/***** LIBRARY *****/
/// The set of job status codes on the wire.
///
/// Exactly these five strings appear in serialized form; they are the ones fixed by the standard.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// The job has been created locally (and possibly forwarded), but the provider has not reported progress yet.
    Accepted,
    /// The provider is executing the job.
    Running,
    /// The job has completed and its results can be fetched.
    Successful,
    /// The job has completed without usable results.
    Failed,
    /// The job was cancelled before it completed.
    Dismissed,
}
impl JobStatus {
    /// Returns whether this status is terminal, i.e., whether no further transitions are permitted from it.
    #[inline]
    pub fn is_terminal(&self) -> bool { matches!(self, Self::Successful | Self::Failed | Self::Dismissed) }

    /// Returns the wire representation of this status.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Running => "running",
            Self::Successful => "successful",
            Self::Failed => "failed",
            Self::Dismissed => "dismissed",
        }
    }
}
impl Display for JobStatus {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult { write!(f, "{}", self.as_str()) }
}
impl FromStr for JobStatus {
    type Err = JobStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accepted" => Ok(Self::Accepted),
            "running" => Ok(Self::Running),
            "successful" => Ok(Self::Successful),
            "failed" => Ok(Self::Failed),
            "dismissed" => Ok(Self::Dismissed),
            raw => Err(JobStatusParseError::UnknownStatus { raw: raw.into() }),
        }
    }
}



/// A single link in a `links` array.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Link {
    /// The target of the link.
    pub href: String,
    /// The relation of the link to the document it appears in (e.g., `self`, `results`).
    pub rel:   String,
    /// The media type of the target, if known.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty:    Option<String>,
    /// A human-readable title for the link.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}
impl Link {
    /// Constructor for a JSON link.
    ///
    /// # Arguments
    /// - `href`: Where the link points to.
    /// - `rel`: The link relation (e.g., `self`).
    ///
    /// # Returns
    /// A new Link with media type `application/json` and no title.
    #[inline]
    pub fn json(href: impl Into<String>, rel: impl Into<String>) -> Self {
        Self { href: href.into(), rel: rel.into(), ty: Some("application/json".into()), title: None }
    }
}



/// The OGC `statusInfo` document: a snapshot of a job's status at one moment.
///
/// Snapshots are immutable once persisted; a job's history is an append-only sequence of them.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct JobStatusInfo {
    /// The identifier of the job this snapshot belongs to. Always the gateway-local identifier when exposed.
    #[serde(rename = "jobID")]
    pub job_id: String,
    /// The status code of the job at the time of the snapshot.
    pub status: JobStatus,
    /// The type of the unit of work. Always `"process"`.
    #[serde(rename = "type", default = "default_type")]
    pub ty: String,
    /// The qualified identifier (`provider:process`) of the process being executed.
    #[serde(rename = "processID", skip_serializing_if = "Option::is_none")]
    pub process_id: Option<String>,
    /// A human-readable note about the current status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// When the job was created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// When the provider started executing the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    /// When the job reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished: Option<DateTime<Utc>>,
    /// When this snapshot was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
    /// Progress of the job, as a percentage in `0..=100`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    /// Links relating to the job. Always local (`/jobs/...`) when exposed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<Link>>,
}
impl JobStatusInfo {
    /// Constructor for a minimal JobStatusInfo.
    ///
    /// # Arguments
    /// - `job_id`: The identifier of the job the snapshot belongs to.
    /// - `status`: The status code at the time of the snapshot.
    ///
    /// # Returns
    /// A new JobStatusInfo with all optional fields unset.
    pub fn new(job_id: impl Into<String>, status: JobStatus) -> Self {
        Self {
            job_id: job_id.into(),
            status,
            ty: default_type(),
            process_id: None,
            message: None,
            created: None,
            started: None,
            finished: None,
            updated: None,
            progress: None,
            links: None,
        }
    }

    /// Returns whether the snapshot's status is terminal.
    #[inline]
    pub fn is_terminal(&self) -> bool { self.status.is_terminal() }

    /// Returns the first link with the given relation, if any.
    #[inline]
    pub fn link(&self, rel: &str) -> Option<&Link> { self.links.as_ref().and_then(|ls| ls.iter().find(|l| l.rel == rel)) }
}

/// Provides the constant `type` field value of a [`JobStatusInfo`].
#[inline]
fn default_type() -> String { "process".into() }



/// The response document of the job listing endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JobList {
    /// The snapshots of the matching jobs.
    pub jobs: Vec<JobStatusInfo>,
    /// Pagination links (next/previous page), if any.
    pub links: Vec<Link>,
    /// The total number of jobs matching the filter, ignoring pagination.
    pub total_count: usize,
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_serialize_to_the_wire_strings() {
        for (status, raw) in [
            (JobStatus::Accepted, "\"accepted\""),
            (JobStatus::Running, "\"running\""),
            (JobStatus::Successful, "\"successful\""),
            (JobStatus::Failed, "\"failed\""),
            (JobStatus::Dismissed, "\"dismissed\""),
        ] {
            assert_eq!(serde_json::to_string(&status).unwrap(), raw);
            assert_eq!(serde_json::from_str::<JobStatus>(raw).unwrap(), status);
        }
    }

    #[test]
    fn status_terminality() {
        assert!(!JobStatus::Accepted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Successful.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Dismissed.is_terminal());
    }

    #[test]
    fn status_info_roundtrips_through_the_public_shape() {
        let mut info = JobStatusInfo::new("6f2c9a04-4e1e-41a7-9e54-000000000000", JobStatus::Running);
        info.process_id = Some("prov:echo".into());
        info.message = Some("Running".into());
        info.created = Some(Utc::now());
        info.started = Some(Utc::now());
        info.updated = Some(Utc::now());
        info.progress = Some(42);
        info.links = Some(vec![Link::json("/jobs/6f2c9a04-4e1e-41a7-9e54-000000000000", "self")]);

        let raw = serde_json::to_string(&info).unwrap();
        let back: JobStatusInfo = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, info);

        // The field names on the wire are the OGC ones
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("jobID").is_some());
        assert!(value.get("processID").is_some());
        assert_eq!(value.get("type").and_then(|t| t.as_str()), Some("process"));
    }

    #[test]
    fn status_info_defaults_type_when_absent() {
        let back: JobStatusInfo = serde_json::from_str(r#"{"jobID": "a", "status": "accepted", "type": "process"}"#).unwrap();
        assert_eq!(back.ty, "process");
        assert_eq!(back.status, JobStatus::Accepted);
        assert!(back.links.is_none());
    }
}
