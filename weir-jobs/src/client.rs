//  CLIENT.rs
//    by Lut99
//
//  Created:
//    20 Feb 2025, 14:19:46
//  Last edited:
//    22 Jul 2025, 11:30:27
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the reqwest-backed adapter of the HTTP client port.
//!
//!   All provider traffic of the gateway flows through one shared
//!   [`reqwest::Client`]; its connection pool supports the concurrent
//!   requests of the poll loops. Transport- and content-level failures
//!   are mapped onto the gateway's error taxonomy here, so the core never
//!   handles raw client errors.
//

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;

use crate::errors::GatewayError;
use crate::spec::{HttpClient, UpstreamResponse};


/***** HELPER FUNCTIONS *****/
/// Truncates a response body to a loggable snippet.
fn snippet(body: &str) -> String {
    if body.chars().count() <= 100 { body.into() } else { format!("{}...", body.chars().take(100).collect::<String>()) }
}

/// Maps a reqwest transport error onto the taxonomy.
fn map_send_error(url: &str, err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::UpstreamTimeout { url: url.into() }
    } else {
        GatewayError::UpstreamConnection { url: url.into(), detail: err.to_string() }
    }
}





/***** LIBRARY *****/
/// The reqwest-backed implementation of the [`HttpClient`] port.
#[derive(Clone, Debug, Default)]
pub struct ReqwestHttpClient {
    /// The shared client (and with it, the connection pool).
    client: Client,
}
impl ReqwestHttpClient {
    /// Constructor for a ReqwestHttpClient with a fresh connection pool.
    #[inline]
    pub fn new() -> Self { Self { client: Client::new() } }

    /// Applies the given extra headers to a request.
    fn apply_headers(mut request: RequestBuilder, headers: &[(String, String)]) -> RequestBuilder {
        for (name, value) in headers {
            request = request.header(name, value);
        }
        request
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get_json(&self, url: &str, headers: &[(String, String)], timeout: Duration) -> Result<Value, GatewayError> {
        debug!("GET {url}");
        let request: RequestBuilder = Self::apply_headers(self.client.get(url).header("Accept", "application/json").timeout(timeout), headers);
        let response: Response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(map_send_error(url, err)),
        };

        let status: u16 = response.status().as_u16();
        let body: String = match response.text().await {
            Ok(body) => body,
            Err(err) => return Err(map_send_error(url, err)),
        };
        if !(200..300).contains(&status) {
            return Err(GatewayError::UpstreamHttp { url: url.into(), status, detail: snippet(&body) });
        }
        match serde_json::from_str(&body) {
            Ok(value) => Ok(value),
            Err(_) => Err(GatewayError::UpstreamContent { url: url.into(), snippet: snippet(&body) }),
        }
    }

    async fn post_json(&self, url: &str, body: &Value, headers: &[(String, String)], timeout: Duration) -> Result<UpstreamResponse, GatewayError> {
        debug!("POST {url}");
        let request: RequestBuilder = Self::apply_headers(self.client.post(url).header("Accept", "application/json").json(body).timeout(timeout), headers);
        let response: Response = match request.send().await {
            Ok(response) => response,
            Err(err) => return Err(map_send_error(url, err)),
        };

        // Non-2xx responses are returned as-is; the derivation decides what they mean
        let status: u16 = response.status().as_u16();
        let resp_headers: HashMap<String, String> =
            response.headers().iter().filter_map(|(name, value)| value.to_str().ok().map(|v| (name.to_string(), v.to_string()))).collect();
        let raw: String = match response.text().await {
            Ok(raw) => raw,
            Err(err) => return Err(map_send_error(url, err)),
        };
        let body: Option<Value> = serde_json::from_str(&raw).ok();

        Ok(UpstreamResponse { status, headers: resp_headers, body })
    }
}





/***** TESTS *****/
