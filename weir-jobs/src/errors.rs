//  ERRORS.rs
//    by Lut99
//
//  Created:
//    17 Feb 2025, 09:14:26
//  Last edited:
//    28 Jul 2025, 16:22:40
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the domain error taxonomy of the gateway, together with its
//!   mapping onto HTTP status codes, OGC exception documents and the
//!   transient/permanent classification the retry policy filters on.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};

use specifications::exceptions::OgcException;
use specifications::jobs::JobStatus;


/***** LIBRARY *****/
/// The domain error taxonomy of the gateway.
#[derive(Clone, Debug)]
pub enum GatewayError {
    /// Client input violates a schema or contract.
    InvalidUsage { reason: String },
    /// A referenced job, process, provider or result is absent.
    NotFound { what: &'static str, id: String },
    /// The caller lacks the role required for a non-anonymous process or resource.
    NotAuthorized { reason: String },
    /// A provider call exceeded its budget.
    UpstreamTimeout { url: String },
    /// A provider returned a non-2xx status.
    UpstreamHttp { url: String, status: u16, detail: String },
    /// Transport-level failure towards a provider.
    UpstreamConnection { url: String, detail: String },
    /// A provider returned non-JSON where JSON was required.
    UpstreamContent { url: String, snippet: String },
    /// The result publication port failed.
    PublicationFailed { job: String, reason: String },
    /// Anything else.
    Internal { reason: String },
}
impl GatewayError {
    /// Returns the HTTP status code this error maps to at the gateway's own surface.
    pub fn http_status(&self) -> u16 {
        use GatewayError::*;
        match self {
            InvalidUsage { .. } => 400,
            NotFound { .. } => 404,
            NotAuthorized { .. } => 403,
            UpstreamTimeout { .. } => 504,
            UpstreamHttp { .. } => 502,
            UpstreamConnection { .. } => 502,
            UpstreamContent { .. } => 502,
            PublicationFailed { .. } => 500,
            Internal { .. } => 500,
        }
    }

    /// Returns whether this error is transient, i.e., whether retrying the failed operation may help.
    ///
    /// Timeouts, connection failures and upstream 502/503/504 are transient; everything else is permanent.
    pub fn is_transient(&self) -> bool {
        use GatewayError::*;
        match self {
            UpstreamTimeout { .. } => true,
            UpstreamConnection { .. } => true,
            UpstreamHttp { status, .. } => matches!(status, 502 | 503 | 504),
            _ => false,
        }
    }

    /// Renders this error as the OGC exception document served to clients.
    pub fn to_exception(&self) -> OgcException {
        use GatewayError::*;
        match self {
            InvalidUsage { reason } => OgcException::new("about:blank", "Invalid Usage", 400, reason.clone()),
            NotFound { what, id } => {
                let keyword: &str = match *what {
                    "process" => "no-such-process",
                    "results" => "result-not-ready",
                    _ => "no-such-job",
                };
                OgcException::new(OgcException::type_uri(keyword), format!("{} not found", capitalize(what)), 404, format!("The {what} '{id}' does not exist."))
            },
            NotAuthorized { reason } => OgcException::new("about:blank", "Not Authorized", 403, reason.clone()),
            UpstreamTimeout { url } => OgcException::new("about:blank", "Upstream Timeout", 504, format!("The request to the remote service at '{url}' timed out.")),
            UpstreamHttp { url, status, .. } => {
                OgcException::new("about:blank", "Upstream HTTP Error", 502, format!("The remote service at '{url}' returned an HTTP error: {status}"))
            },
            UpstreamConnection { url, .. } => {
                OgcException::new("about:blank", "Upstream Connection Error", 502, format!("There was a connection error with the remote service at '{url}'."))
            },
            UpstreamContent { url, snippet } => {
                OgcException::new("about:blank", "Invalid Response Content", 502, format!("The response from the remote service at '{url}' was not valid JSON: '{snippet}'"))
            },
            PublicationFailed { job, reason } => {
                OgcException::new("about:blank", "Publication Failed", 500, format!("The results of job '{job}' could not be published: {reason}"))
            },
            Internal { .. } => OgcException::new("about:blank", "Internal Server Error", 500, "An unexpected error occurred while processing your request."),
        }
    }

    /// Returns a short title for this error, used as the `message` of failure snapshots.
    pub fn title(&self) -> &'static str {
        use GatewayError::*;
        match self {
            InvalidUsage { .. } => "Invalid Usage",
            NotFound { .. } => "Not Found",
            NotAuthorized { .. } => "Not Authorized",
            UpstreamTimeout { .. } => "Upstream Timeout",
            UpstreamHttp { .. } => "Upstream HTTP Error",
            UpstreamConnection { .. } => "Upstream Connection Error",
            UpstreamContent { .. } => "Invalid Response Content",
            PublicationFailed { .. } => "Publication Failed",
            Internal { .. } => "Internal Server Error",
        }
    }
}
impl Display for GatewayError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use GatewayError::*;
        match self {
            InvalidUsage { reason } => write!(f, "Invalid usage: {reason}"),
            NotFound { what, id } => write!(f, "{} '{}' not found", capitalize(what), id),
            NotAuthorized { reason } => write!(f, "Not authorized: {reason}"),
            UpstreamTimeout { url } => write!(f, "Request to '{url}' timed out"),
            UpstreamHttp { url, status, detail } => write!(f, "Request to '{url}' failed with status {status}: {detail}"),
            UpstreamConnection { url, detail } => write!(f, "Connection to '{url}' failed: {detail}"),
            UpstreamContent { url, snippet } => write!(f, "Response from '{url}' was not valid JSON: '{snippet}'"),
            PublicationFailed { job, reason } => write!(f, "Failed to publish results of job '{job}': {reason}"),
            Internal { reason } => write!(f, "Internal error: {reason}"),
        }
    }
}
impl Error for GatewayError {}



/// Errors raised by the job repository port.
#[derive(Clone, Debug)]
pub enum RepositoryError {
    /// Attempted to create a job whose identifier is already taken.
    AlreadyExists { id: String },
    /// The referenced job does not exist.
    NotFound { id: String },
    /// Attempted a status transition the state machine forbids.
    IllegalTransition { id: String, from: JobStatus, to: JobStatus },
}
impl Display for RepositoryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use RepositoryError::*;
        match self {
            AlreadyExists { id } => write!(f, "A job with identifier '{id}' already exists"),
            NotFound { id } => write!(f, "No job with identifier '{id}' exists"),
            IllegalTransition { id, from, to } => write!(f, "Illegal status transition '{from}' -> '{to}' for job '{id}'"),
        }
    }
}
impl Error for RepositoryError {}

impl From<RepositoryError> for GatewayError {
    fn from(value: RepositoryError) -> Self {
        match value {
            RepositoryError::NotFound { id } => GatewayError::NotFound { what: "job", id },
            err => GatewayError::Internal { reason: err.to_string() },
        }
    }
}



/***** HELPER FUNCTIONS *****/
/// Upcases the first character of the given word.
fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_follows_the_taxonomy() {
        assert!(GatewayError::UpstreamTimeout { url: "http://p".into() }.is_transient());
        assert!(GatewayError::UpstreamConnection { url: "http://p".into(), detail: "refused".into() }.is_transient());
        for status in [502, 503, 504] {
            assert!(GatewayError::UpstreamHttp { url: "http://p".into(), status, detail: String::new() }.is_transient());
        }
        for status in [400, 401, 404, 500] {
            assert!(!GatewayError::UpstreamHttp { url: "http://p".into(), status, detail: String::new() }.is_transient());
        }
        assert!(!GatewayError::InvalidUsage { reason: "bad".into() }.is_transient());
        assert!(!GatewayError::NotFound { what: "job", id: "x".into() }.is_transient());
        assert!(!GatewayError::UpstreamContent { url: "http://p".into(), snippet: "<html>".into() }.is_transient());
    }

    #[test]
    fn http_status_mapping() {
        assert_eq!(GatewayError::InvalidUsage { reason: String::new() }.http_status(), 400);
        assert_eq!(GatewayError::NotFound { what: "job", id: String::new() }.http_status(), 404);
        assert_eq!(GatewayError::NotAuthorized { reason: String::new() }.http_status(), 403);
        assert_eq!(GatewayError::UpstreamTimeout { url: String::new() }.http_status(), 504);
        assert_eq!(GatewayError::UpstreamConnection { url: String::new(), detail: String::new() }.http_status(), 502);
    }

    #[test]
    fn not_found_exceptions_use_the_ogc_type_uris() {
        let exc = GatewayError::NotFound { what: "process", id: "prov:echo".into() }.to_exception();
        assert!(exc.ty.ends_with("no-such-process"));
        let exc = GatewayError::NotFound { what: "results", id: "j1".into() }.to_exception();
        assert!(exc.ty.ends_with("result-not-ready"));
        let exc = GatewayError::NotFound { what: "job", id: "j1".into() }.to_exception();
        assert!(exc.ty.ends_with("no-such-job"));
    }
}
