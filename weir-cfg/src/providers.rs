//  PROVIDERS.rs
//    by Lut99
//
//  Created:
//    12 Feb 2025, 14:05:33
//  Last edited:
//    25 Jul 2025, 09:12:48
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the providers file, which declares the upstream OGC API -
//!   Processes servers the gateway federates and the per-process
//!   configuration that governs how their executions are handled.
//

use std::fmt::{Debug, Formatter, Result as FResult};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

pub use crate::info::YamlError as Error;
use crate::info::YamlInfo;


/***** AUXILLARY *****/
/// Defines how a provider authenticates its calls.
///
/// The `Debug`-implementation redacts all secret material.
#[derive(Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    /// No authentication at all.
    None,
    /// HTTP Basic authentication.
    Basic { user: String, password: String },
    /// A static API key carried in a named header.
    ApiKey { key_name: String, key_value: String },
    /// A static bearer token.
    Bearer { token: String },
}
impl AuthConfig {
    /// Renders this config as the request headers implementing it.
    ///
    /// # Returns
    /// A list of `(name, value)` pairs to attach to every call to the owning provider.
    pub fn headers(&self) -> Vec<(String, String)> {
        match self {
            Self::None => vec![],
            Self::Basic { user, password } => {
                vec![("Authorization".into(), format!("Basic {}", BASE64.encode(format!("{user}:{password}"))))]
            },
            Self::ApiKey { key_name, key_value } => vec![(key_name.clone(), key_value.clone())],
            Self::Bearer { token } => vec![("Authorization".into(), format!("Bearer {token}"))],
        }
    }
}
impl Debug for AuthConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        match self {
            Self::None => write!(f, "None"),
            Self::Basic { user, .. } => write!(f, "Basic {{ user: {user:?}, password: \"<redacted>\" }}"),
            Self::ApiKey { key_name, .. } => write!(f, "ApiKey {{ key_name: {key_name:?}, key_value: \"<redacted>\" }}"),
            Self::Bearer { .. } => write!(f, "Bearer {{ token: \"<redacted>\" }}"),
        }
    }
}
impl Default for AuthConfig {
    #[inline]
    fn default() -> Self { Self::None }
}



/// Defines where the results of a process end up after a successful execution.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStorage {
    /// The results stay with the provider; the gateway only proxies them.
    Remote,
    /// The results are ingested into the spatial result store as a layer named after the job.
    Geoserver,
}
impl Default for ResultStorage {
    #[inline]
    fn default() -> Self { Self::Remote }
}



/// Defines the object paths used to render geoserver-stored results as a graph.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GraphProperties {
    /// Dotted object path to the feature collection within the results document.
    #[serde(rename = "root-path")]
    pub root_path: String,
    /// Dotted object path to the x-coordinate field.
    #[serde(rename = "x-path")]
    pub x_path: String,
    /// Dotted object path to the y-coordinate field.
    #[serde(rename = "y-path")]
    pub y_path: String,
}



/// Defines the gateway-side configuration of a single process of a provider.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessConfig {
    /// The identifier of the process, as the provider knows it (unqualified).
    pub id: String,
    /// An optional description overriding the provider's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The version of the process. Part of the idempotency key of deterministic processes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Where the results of this process end up.
    #[serde(default, rename = "result-storage")]
    pub result_storage: ResultStorage,
    /// If true, the process is hidden from the catalog and cannot be executed.
    #[serde(default)]
    pub exclude: bool,
    /// Dotted object path to the feature collection within the results document, for geoserver-stored results.
    #[serde(default, rename = "result-path", skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    /// Graph rendering configuration for geoserver-stored results.
    #[serde(default, rename = "graph-properties", skip_serializing_if = "Option::is_none")]
    pub graph_properties: Option<GraphProperties>,
    /// If true, the process can be seen and run without authentication.
    #[serde(default, rename = "anonymous-access")]
    pub anonymous_access: bool,
    /// If true, the process always produces the same result for the same input, and completed
    /// executions may be re-served from the job store instead of being forwarded again.
    #[serde(default)]
    pub deterministic: bool,
}



/// Defines a single upstream provider in the providers file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Provider {
    /// The name of the provider. Doubles as the catalog prefix of its processes.
    pub name: String,
    /// The URL of the provider's OGC API - Processes landing page.
    pub url: String,
    /// Timeout, in seconds, for calls to this provider.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// How to authenticate calls to this provider.
    #[serde(default)]
    pub authentication: AuthConfig,
    /// The processes of this provider the gateway exposes.
    #[serde(default)]
    pub processes: Vec<ProcessConfig>,
}
impl Provider {
    /// Resolves a path relative to this provider's URL.
    ///
    /// # Arguments
    /// - `path`: The path to append, without leading slash requirements either way.
    ///
    /// # Returns
    /// The absolute URL of the given path on this provider.
    #[inline]
    pub fn endpoint(&self, path: impl AsRef<str>) -> String { format!("{}/{}", self.url.trim_end_matches('/'), path.as_ref().trim_start_matches('/')) }

    /// Returns the configuration of the process with the given (unqualified) identifier, if it is configured.
    #[inline]
    pub fn process(&self, raw_id: &str) -> Option<&ProcessConfig> { self.processes.iter().find(|p| p.id == raw_id) }

    /// Returns the call timeout of this provider as a [`Duration`].
    #[inline]
    pub fn timeout(&self) -> Duration { Duration::from_secs(self.timeout) }
}

/// Provides the default provider call timeout, in seconds.
#[inline]
fn default_timeout() -> u64 { 60 }





/***** LIBRARY *****/
/// Defines the root of the providers file.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProvidersFile {
    /// The providers the gateway federates.
    pub providers: Vec<Provider>,
}
impl ProvidersFile {
    /// Returns the provider with the given name.
    #[inline]
    pub fn get(&self, name: impl AsRef<str>) -> Option<&Provider> {
        let name: &str = name.as_ref();
        self.providers.iter().find(|p| p.name == name)
    }

    /// Returns the names of all declared providers, in file order.
    #[inline]
    pub fn names(&self) -> Vec<String> { self.providers.iter().map(|p| p.name.clone()).collect() }

    /// Returns the configuration of the given process of the given provider, if both exist.
    #[inline]
    pub fn process_config(&self, provider: &str, raw_id: &str) -> Option<&ProcessConfig> { self.get(provider).and_then(|p| p.process(raw_id)) }

    /// Returns whether the given process may be listed and executed through the gateway.
    ///
    /// A process is available iff its provider is declared, the process is configured, and it is not excluded.
    #[inline]
    pub fn is_available(&self, provider: &str, raw_id: &str) -> bool { self.process_config(provider, raw_id).map(|c| !c.exclude).unwrap_or(false) }
}
impl<'de> YamlInfo<'de> for ProvidersFile {}





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use crate::info::Info as _;

    use super::*;

    const PROVIDERS_YAML: &str = r#"
providers:
  - name: infrared
    url: https://infrared.example.org/api/
    timeout: 30
    authentication:
      type: basic
      user: weir
      password: hunter2
    processes:
      - id: wind-comfort
        version: "2.1.0"
        result-storage: geoserver
        result-path: result.features
        deterministic: true
      - id: legacy-sim
        exclude: true
  - name: luft
    url: http://luft.example.org
    processes:
      - id: noise
        anonymous-access: true
"#;

    #[test]
    fn providers_file_parses_the_documented_shape() {
        let file = ProvidersFile::from_string(PROVIDERS_YAML).unwrap();
        assert_eq!(file.names(), vec!["infrared".to_string(), "luft".to_string()]);

        let infrared = file.get("infrared").unwrap();
        assert_eq!(infrared.timeout(), Duration::from_secs(30));
        let wind = infrared.process("wind-comfort").unwrap();
        assert_eq!(wind.result_storage, ResultStorage::Geoserver);
        assert_eq!(wind.result_path.as_deref(), Some("result.features"));
        assert!(wind.deterministic);
        assert!(!wind.anonymous_access);

        // Defaults kick in where the file is silent
        let luft = file.get("luft").unwrap();
        assert_eq!(luft.timeout(), Duration::from_secs(60));
        assert!(matches!(luft.authentication, AuthConfig::None));
        assert_eq!(luft.process("noise").unwrap().result_storage, ResultStorage::Remote);
    }

    #[test]
    fn availability_accounts_for_exclusion_and_unknowns() {
        let file = ProvidersFile::from_string(PROVIDERS_YAML).unwrap();
        assert!(file.is_available("infrared", "wind-comfort"));
        assert!(!file.is_available("infrared", "legacy-sim"));
        assert!(!file.is_available("infrared", "unconfigured"));
        assert!(!file.is_available("nonsense", "wind-comfort"));
    }

    #[test]
    fn endpoint_joins_with_exactly_one_slash() {
        let file = ProvidersFile::from_string(PROVIDERS_YAML).unwrap();
        assert_eq!(file.get("infrared").unwrap().endpoint("processes/wind-comfort/execution"), "https://infrared.example.org/api/processes/wind-comfort/execution");
        assert_eq!(file.get("luft").unwrap().endpoint("/processes"), "http://luft.example.org/processes");
    }

    #[test]
    fn auth_headers_render_the_configured_scheme() {
        let basic = AuthConfig::Basic { user: "weir".into(), password: "hunter2".into() };
        let headers = basic.headers();
        assert_eq!(headers.len(), 1);
        assert_eq!(headers[0].0, "Authorization");
        assert!(headers[0].1.starts_with("Basic "));

        let key = AuthConfig::ApiKey { key_name: "X-Api-Key".into(), key_value: "abc".into() };
        assert_eq!(key.headers(), vec![("X-Api-Key".to_string(), "abc".to_string())]);

        let bearer = AuthConfig::Bearer { token: "tok".into() };
        assert_eq!(bearer.headers(), vec![("Authorization".to_string(), "Bearer tok".to_string())]);

        assert!(AuthConfig::None.headers().is_empty());
    }

    #[test]
    fn debug_never_leaks_secrets() {
        let rendered = format!("{:?}", AuthConfig::Basic { user: "weir".into(), password: "hunter2".into() });
        assert!(!rendered.contains("hunter2"));
        let rendered = format!("{:?}", AuthConfig::Bearer { token: "tok-123".into() });
        assert!(!rendered.contains("tok-123"));
    }
}
