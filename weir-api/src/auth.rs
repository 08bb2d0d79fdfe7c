//  AUTH.rs
//    by Lut99
//
//  Created:
//    03 Mar 2025, 11:02:39
//  Last edited:
//    10 Jun 2025, 09:21:14
//  Auto updated?
//    Yes
//
//  Description:
//!   Defines the caller identity as the gateway consumes it.
//!
//!   Verifying identities is not this service's job: an authenticating
//!   proxy in front of it validates tokens and forwards the resulting
//!   subject and role set in trusted headers. Absent headers mean an
//!   anonymous caller.
//

use warp::http::HeaderMap;


/***** CONSTANTS *****/
/// The header carrying the verified, opaque subject identifier.
pub const SUBJECT_HEADER: &str = "x-subject";

/// The header carrying the verified roles, comma-separated.
pub const ROLES_HEADER: &str = "x-roles";





/***** LIBRARY *****/
/// The verified identity of a caller.
#[derive(Clone, Debug)]
pub struct AuthContext {
    /// The opaque subject identifier.
    pub sub: String,
    /// The roles the subject holds.
    pub roles: Vec<String>,
}
impl AuthContext {
    /// Returns whether the subject holds the given role.
    #[inline]
    pub fn has_role(&self, role: &str) -> bool { self.roles.iter().any(|r| r == role) }

    /// Extracts the caller identity from the forwarded headers, if present.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let sub: String = headers.get(SUBJECT_HEADER)?.to_str().ok()?.trim().to_string();
        if sub.is_empty() {
            return None;
        }
        let roles: Vec<String> = headers
            .get(ROLES_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(|raw| raw.split(',').map(|role| role.trim().to_string()).filter(|role| !role.is_empty()).collect())
            .unwrap_or_default();
        Some(Self { sub, roles })
    }
}





/***** TESTS *****/
