//  SPEC.rs
//    by Lut99
//
//  Created:
//    03 Mar 2025, 10:24:55
//  Last edited:
//    29 Jul 2025, 13:09:30
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the shared context of the warp handlers and the helpers for
//!   shaping their responses.
//

use std::sync::Arc;

use serde::Serialize;
use specifications::exceptions::OgcException;
use warp::http::{Response, StatusCode};
use warp::hyper::Body;
use weir_jobs::errors::GatewayError;
use weir_jobs::manager::JobManager;
use weir_jobs::spec::{HttpClient, JobRepository, Providers};

use crate::processes::ProcessManager;


/***** LIBRARY *****/
/// The things the warp handlers need to do their work.
pub struct Context {
    /// The job orchestration core.
    pub manager: Arc<JobManager>,
    /// The catalog side of the gateway.
    pub processes: Arc<ProcessManager>,
    /// The job store, for listings.
    pub repo: Arc<dyn JobRepository>,
    /// The provider catalog, for health probes.
    pub providers: Arc<dyn Providers>,
    /// The client for health probes.
    pub http: Arc<dyn HttpClient>,
    /// The URL prefix the API is mounted under (`/` when at the root).
    pub prefix: String,
}



/// Shapes a successful JSON response.
pub fn json_response(status: StatusCode, body: &impl Serialize) -> Response<Body> {
    match serde_json::to_vec(body) {
        Ok(raw) => Response::builder().status(status).header("Content-Type", "application/json").body(Body::from(raw)).unwrap(),
        Err(err) => {
            // Serialization of our own types failing is a bug, but clients still get a shaped error
            log::error!("Failed to serialize response body: {err}");
            let exc: OgcException = OgcException::new("about:blank", "Internal Server Error", 500, "Failed to serialize response".to_string());
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header("Content-Type", "application/json")
                .body(Body::from(serde_json::to_vec(&exc).unwrap_or_default()))
                .unwrap()
        },
    }
}

/// Shapes a [`GatewayError`] as the OGC exception response it maps to.
pub fn error_response(err: &GatewayError, instance: &str) -> Response<Body> {
    let exc: OgcException = err.to_exception().with_instance(instance);
    Response::builder()
        .status(StatusCode::from_u16(exc.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR))
        .header("Content-Type", "application/json")
        .body(Body::from(serde_json::to_vec(&exc).unwrap_or_default()))
        .unwrap()
}
