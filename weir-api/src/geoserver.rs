//  GEOSERVER.rs
//    by Lut99
//
//  Created:
//    06 Mar 2025, 14:22:17
//  Last edited:
//    30 Jul 2025, 11:02:51
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the GeoServer adapter of the result-publication port.
//!
//!   The adapter speaks the GeoServer REST API: it makes sure the
//!   configured workspace exists, uploads the feature collection as a
//!   GeoJSON datastore named after the job, and publishes the matching
//!   feature type so the results are addressable as a layer.
//

use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Client, Response, StatusCode};
use serde_json::Value;
use weir_jobs::errors::GatewayError;
use weir_jobs::spec::ResultPublisher;


/***** LIBRARY *****/
/// Publishes job results into a GeoServer instance through its REST API.
pub struct GeoserverPublisher {
    /// The REST root of the instance (e.g., `http://geoserver:8080/geoserver/rest`).
    rest_url: String,
    /// The admin user to authenticate as.
    user: String,
    /// The admin password.
    password: String,
    /// The workspace all layers land in.
    workspace: String,
    /// The client the REST calls go through.
    client: Client,
    /// The budget of a single REST call.
    timeout: Duration,
}
impl GeoserverPublisher {
    /// Constructor for a GeoserverPublisher.
    ///
    /// # Arguments
    /// - `url`: The base URL of the GeoServer instance (without `/rest`).
    /// - `user`: The admin user to authenticate as.
    /// - `password`: The matching password.
    /// - `workspace`: The workspace to publish layers into.
    pub fn new(url: impl AsRef<str>, user: impl Into<String>, password: impl Into<String>, workspace: impl Into<String>) -> Self {
        Self {
            rest_url: format!("{}/rest", url.as_ref().trim_end_matches('/')),
            user: user.into(),
            password: password.into(),
            workspace: workspace.into(),
            client: Client::new(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Makes sure the configured workspace exists, creating it when absent.
    async fn ensure_workspace(&self) -> Result<(), String> {
        let url: String = format!("{}/workspaces/{}.json?quietOnNotFound=true", self.rest_url, self.workspace);
        let response: Response = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| format!("Failed to query workspace '{}': {err}", self.workspace))?;

        match response.status() {
            StatusCode::OK => {
                debug!("Workspace '{}' already exists", self.workspace);
                Ok(())
            },
            StatusCode::NOT_FOUND => {
                info!("Workspace '{}' not found; creating...", self.workspace);
                let response: Response = self
                    .client
                    .post(format!("{}/workspaces", self.rest_url))
                    .basic_auth(&self.user, Some(&self.password))
                    .header("Content-Type", "text/xml")
                    .body(format!("<workspace><name>{}</name></workspace>", self.workspace))
                    .timeout(self.timeout)
                    .send()
                    .await
                    .map_err(|err| format!("Failed to create workspace '{}': {err}", self.workspace))?;
                if response.status().is_success() {
                    info!("Created workspace '{}'", self.workspace);
                    Ok(())
                } else {
                    Err(format!("Workspace creation returned {}", response.status()))
                }
            },
            status => Err(format!("Workspace query returned {status}")),
        }
    }

    /// Uploads the feature collection as a GeoJSON datastore named after the job.
    async fn upload_collection(&self, job_id: &str, collection: &Value) -> Result<(), String> {
        let url: String = format!("{}/workspaces/{}/datastores/{}/file.geojson?configure=all", self.rest_url, self.workspace, job_id);
        let response: Response = self
            .client
            .put(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Content-Type", "application/json")
            .json(collection)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| format!("Failed to upload collection: {err}"))?;
        if response.status().is_success() { Ok(()) } else { Err(format!("Collection upload returned {}", response.status())) }
    }

    /// Publishes the feature type so the uploaded data is addressable as a layer.
    async fn publish_layer(&self, job_id: &str) -> Result<(), String> {
        let url: String = format!("{}/workspaces/{}/datastores/{}/featuretypes", self.rest_url, self.workspace, job_id);
        let response: Response = self
            .client
            .post(&url)
            .basic_auth(&self.user, Some(&self.password))
            .header("Content-Type", "text/xml")
            .body(format!("<featureType><name>{job_id}</name></featureType>"))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|err| format!("Failed to publish layer: {err}"))?;
        match response.status() {
            // An existing feature type (configure=all already made one) is fine
            status if status.is_success() || status == StatusCode::CONFLICT => Ok(()),
            status => Err(format!("Layer publication returned {status}")),
        }
    }
}

#[async_trait]
impl ResultPublisher for GeoserverPublisher {
    async fn publish(&self, job_id: &str, collection: &Value) -> Result<(), GatewayError> {
        info!("Publishing results of job '{}' to workspace '{}'", job_id, self.workspace);

        let steps = async {
            self.ensure_workspace().await?;
            self.upload_collection(job_id, collection).await?;
            self.publish_layer(job_id).await
        };
        steps.await.map_err(|reason| GatewayError::PublicationFailed { job: job_id.into(), reason })?;

        info!("Published results of job '{}' as layer '{}:{}'", job_id, self.workspace, job_id);
        Ok(())
    }
}
