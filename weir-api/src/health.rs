//  HEALTH.rs
//    by Lut99
//
//  Created:
//    06 Mar 2025, 10:50:33
//  Last edited:
//    23 Jun 2025, 11:13:58
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the health endpoint: service liveness plus a bounded
//!   reachability probe of every configured provider.
//

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use log::info;
use serde::Serialize;
use warp::Rejection;
use warp::http::{Response, StatusCode};
use warp::hyper::Body;

use crate::spec::{Context, json_response};


/***** CONSTANTS *****/
/// The budget of a single provider probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);





/***** AUXILLARY *****/
/// The health report served by the endpoint.
#[derive(Debug, Serialize)]
struct HealthReport {
    /// `ok` when every provider answered, `degraded` otherwise.
    status: String,
    /// Reachability per provider (`up`/`down`).
    providers: BTreeMap<String, String>,
}





/***** LIBRARY *****/
/// Handles `GET /health`.
pub async fn handle(context: Arc<Context>) -> Result<Response<Body>, Rejection> {
    info!("Handling GET on '/health'...");

    let names: Vec<String> = context.providers.names();
    let probes = names.iter().filter_map(|name| context.providers.provider(name)).map(|provider| {
        let http = context.http.clone();
        async move {
            let reachable: bool = http.get_json(&provider.endpoint("processes"), &provider.authentication.headers(), PROBE_TIMEOUT).await.is_ok();
            (provider.name, reachable)
        }
    });

    let mut providers: BTreeMap<String, String> = BTreeMap::new();
    let mut all_up: bool = true;
    for (name, reachable) in futures_util::future::join_all(probes).await {
        all_up &= reachable;
        providers.insert(name, if reachable { "up".into() } else { "down".into() });
    }

    let report: HealthReport = HealthReport { status: if all_up { "ok".into() } else { "degraded".into() }, providers };
    Ok(json_response(StatusCode::OK, &report))
}
