//  PROCESSES.rs
//    by Lut99
//
//  Created:
//    11 Feb 2025, 10:41:20
//  Last edited:
//    17 Jun 2025, 15:28:44
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the catalog-side wire types of OGC API - Processes: the
//!   process summaries served by the aggregate catalog and the full
//!   per-process description.
//!
//!   Providers attach all sorts of vendor extensions to these documents,
//!   so both types keep unrecognized fields in a flattened map instead of
//!   dropping them.
//

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::jobs::Link;


/***** LIBRARY *****/
/// A single entry in the aggregate process catalog.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessSummary {
    /// The identifier of the process. Qualified (`provider:process`) once it leaves the gateway.
    pub id: String,
    /// A human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// A human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The version of the process as published by its provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Any further fields the provider put in the summary.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}

/// The response document of the aggregate catalog endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessList {
    /// The aggregated process summaries, with qualified identifiers.
    pub processes: Vec<ProcessSummary>,
}



/// A full process description as served by a provider, with its inputs and outputs.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ProcessDescription {
    /// The identifier of the process. Qualified (`provider:process`) once it leaves the gateway.
    pub id: String,
    /// A human-readable title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// A human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// The version of the process as published by its provider.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// The declared inputs of the process, by name. The values embed JSON Schema fragments which
    /// the gateway validates execution requests against; they are kept as raw JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Map<String, Value>>,
    /// The declared outputs of the process, by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Map<String, Value>>,
    /// Links relating to the process. Rewritten to local form before the description leaves the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub links: Option<Vec<Link>>,
    /// Any further fields the provider put in the description.
    #[serde(flatten)]
    pub additional: Map<String, Value>,
}





/***** TESTS *****/
