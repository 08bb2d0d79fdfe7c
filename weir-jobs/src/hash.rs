//  HASH.rs
//    by Lut99
//
//  Created:
//    18 Feb 2025, 11:02:54
//  Last edited:
//    21 Jul 2025, 15:13:30
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the idempotency key of deterministic processes and the
//!   checksum kept for job inputs.
//!
//!   The key is the SHA-512 of the canonical JSON rendering of the inputs
//!   concatenated with the process version and the submitting user,
//!   base64-encoded. Canonical JSON sorts object keys lexicographically
//!   and carries no insignificant whitespace, so the same logical inputs
//!   always produce the same key regardless of how the client formatted
//!   them.
//

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;
use sha2::{Digest as _, Sha256, Sha512};


/***** LIBRARY *****/
/// Renders the given JSON value in canonical form: object keys sorted lexicographically, no
/// insignificant whitespace, numbers as serde_json prints them.
pub fn canonical_json(value: &Value) -> String {
    let mut buffer: String = String::new();
    write_canonical(value, &mut buffer);
    buffer
}

/// Recursive worker for [`canonical_json()`].
fn write_canonical(value: &Value, buffer: &mut String) {
    match value {
        Value::Object(map) => {
            // BTreeMap-style ordering without re-building the map
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            buffer.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    buffer.push(',');
                }
                buffer.push_str(&Value::String((*key).clone()).to_string());
                buffer.push(':');
                write_canonical(&map[key.as_str()], buffer);
            }
            buffer.push('}');
        },
        Value::Array(values) => {
            buffer.push('[');
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    buffer.push(',');
                }
                write_canonical(value, buffer);
            }
            buffer.push(']');
        },
        // Scalars already have exactly one compact rendering
        value => buffer.push_str(&value.to_string()),
    }
}



/// Computes the idempotency key of an execution of a deterministic process.
///
/// # Arguments
/// - `inputs`: The execution request body as submitted by the client.
/// - `process_version`: The version of the process, per the provider configuration.
/// - `user_id`: The opaque subject identifier of the caller, if authenticated.
///
/// # Returns
/// The base64 rendering of the SHA-512 over `canonical_json(inputs) || process_version || user_id`.
pub fn execution_hash(inputs: &Value, process_version: &str, user_id: Option<&str>) -> String {
    let mut hasher = Sha512::new();
    hasher.update(canonical_json(inputs).as_bytes());
    hasher.update(process_version.as_bytes());
    hasher.update(user_id.unwrap_or("").as_bytes());
    BASE64.encode(hasher.finalize())
}

/// Computes the checksum kept alongside stored job inputs (SHA-256, hex).
pub fn inputs_checksum(raw: &str) -> String { hex::encode(Sha256::digest(raw.as_bytes())) }





/***** TESTS *****/
#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_json_sorts_keys_recursively() {
        let value = json!({"b": 1, "a": {"z": [1, 2], "m": null}, "c": "x"});
        assert_eq!(canonical_json(&value), r#"{"a":{"m":null,"z":[1,2]},"b":1,"c":"x"}"#);
    }

    #[test]
    fn key_order_does_not_influence_the_hash() {
        let one = serde_json::from_str::<Value>(r#"{"x": 1, "y": {"a": true, "b": false}}"#).unwrap();
        let two = serde_json::from_str::<Value>(r#"{"y": {"b": false, "a": true}, "x": 1}"#).unwrap();
        assert_eq!(execution_hash(&one, "1.0", Some("alice")), execution_hash(&two, "1.0", Some("alice")));
    }

    #[test]
    fn hash_depends_on_every_component() {
        let inputs = json!({"x": 1});
        let base = execution_hash(&inputs, "1.0", Some("alice"));
        assert_ne!(base, execution_hash(&json!({"x": 2}), "1.0", Some("alice")));
        assert_ne!(base, execution_hash(&inputs, "1.1", Some("alice")));
        assert_ne!(base, execution_hash(&inputs, "1.0", Some("bob")));
        assert_ne!(base, execution_hash(&inputs, "1.0", None));
    }

    #[test]
    fn checksum_is_hex_sha256() {
        // Well-known SHA-256 of the empty string
        assert_eq!(inputs_checksum(""), "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855");
    }
}
