//  IDS.rs
//    by Lut99
//
//  Created:
//    17 Feb 2025, 09:40:12
//  Last edited:
//    20 Jun 2025, 13:55:47
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the qualified process identifier (`provider:process`) under
//!   which every upstream process appears in the catalog, and the rules
//!   for splitting it back into its parts.
//

use std::error::Error;
use std::fmt::{Display, Formatter, Result as FResult};
use std::str::FromStr;


/***** ERRORS *****/
/// Errors that relate to parsing [`ProcessId`]s.
#[derive(Debug)]
pub enum ProcessIdParseError {
    /// The identifier did not contain the `provider:process` separator.
    MissingSeparator { raw: String },
    /// The provider part was empty.
    EmptyProvider { raw: String },
}
impl Display for ProcessIdParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult {
        use ProcessIdParseError::*;
        match self {
            MissingSeparator { raw } => write!(f, "Process ID '{raw}' does not match pattern 'provider:process'"),
            EmptyProvider { raw } => write!(f, "Process ID '{raw}' has an empty provider prefix"),
        }
    }
}
impl Error for ProcessIdParseError {}





/***** LIBRARY *****/
/// A qualified process identifier, i.e., a provider prefix plus the identifier the provider itself
/// knows the process by.
///
/// Only the qualified form ever leaves the gateway; the raw part is only used on the wire towards
/// the owning provider.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct ProcessId {
    /// The provider prefix.
    pub provider: String,
    /// The identifier of the process at the provider.
    pub raw: String,
}
impl ProcessId {
    /// Constructor for a ProcessId from its two parts.
    #[inline]
    pub fn new(provider: impl Into<String>, raw: impl Into<String>) -> Self { Self { provider: provider.into(), raw: raw.into() } }
}
impl Display for ProcessId {
    #[inline]
    fn fmt(&self, f: &mut Formatter<'_>) -> FResult { write!(f, "{}:{}", self.provider, self.raw) }
}
impl FromStr for ProcessId {
    type Err = ProcessIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some(("", _)) => Err(ProcessIdParseError::EmptyProvider { raw: s.into() }),
            Some((provider, raw)) => Ok(Self { provider: provider.into(), raw: raw.into() }),
            None => Err(ProcessIdParseError::MissingSeparator { raw: s.into() }),
        }
    }
}





/***** TESTS *****/
