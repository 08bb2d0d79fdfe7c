//  EXCEPTIONS.rs
//    by Lut99
//
//  Created:
//    11 Feb 2025, 11:17:03
//  Last edited:
//    03 Jun 2025, 09:55:12
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the OGC exception document that every non-success response
//!   of the gateway carries.
//

use serde::{Deserialize, Serialize};


/***** LIBRARY *****/
/// The OGC exception document shape (RFC 7807-ish).
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct OgcException {
    /// A URI identifying the exception type.
    #[serde(rename = "type")]
    pub ty: String,
    /// A short, human-readable summary of the problem.
    pub title: String,
    /// The HTTP status code of the response this document travels in.
    pub status: u16,
    /// A human-readable explanation specific to this occurrence.
    pub detail: String,
    /// A URI identifying the specific occurrence (typically the request path).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
}
impl OgcException {
    /// Constructor for an OgcException.
    ///
    /// # Arguments
    /// - `ty`: The URI identifying the exception type. Use [`Self::type_uri()`] for the standard ones.
    /// - `title`: Short summary of the problem.
    /// - `status`: The HTTP status code of the carrying response.
    /// - `detail`: Explanation specific to this occurrence.
    ///
    /// # Returns
    /// A new OgcException without an instance URI.
    #[inline]
    pub fn new(ty: impl Into<String>, title: impl Into<String>, status: u16, detail: impl Into<String>) -> Self {
        Self { ty: ty.into(), title: title.into(), status, detail: detail.into(), instance: None }
    }

    /// Returns the standard OGC API - Processes exception type URI for the given conformance class keyword.
    ///
    /// # Arguments
    /// - `keyword`: The last path segment of the type URI, e.g., `no-such-process` or `result-not-ready`.
    #[inline]
    pub fn type_uri(keyword: &str) -> String { format!("http://www.opengis.net/def/exceptions/ogcapi-processes-1/1.0/{keyword}") }

    /// Sets the instance URI of this exception, chaining-style.
    #[inline]
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}





/***** TESTS *****/
