//  VALIDATION.rs
//    by Lut99
//
//  Created:
//    04 Mar 2025, 14:30:11
//  Last edited:
//    29 Jul 2025, 13:22:40
//  Auto updated?
//    Yes
//
//  Description:
//!   Implements the validation of execution request bodies against the
//!   input schemas embedded in a process description.
//!
//!   Providers embed JSON Schema fragments per input; the gateway checks
//!   the common constraints (presence, bounds, types, lengths, patterns,
//!   enums, array shape) before forwarding, so obviously broken requests
//!   never reach the provider.
//

use regex::Regex;
use serde_json::{Map, Value};
use weir_jobs::errors::GatewayError;


/***** HELPER FUNCTIONS *****/
/// Shapes a constraint violation as the invalid-usage error the surface reports.
fn violation(input: &str, reason: impl AsRef<str>) -> GatewayError {
    GatewayError::InvalidUsage { reason: format!("Invalid parameter '{}': {}", input, reason.as_ref()) }
}

/// Decides whether the given input declaration marks the input required.
fn is_required(meta: &Value, schema: &Value) -> bool {
    if let Some(required) = meta.get("required").and_then(Value::as_bool) {
        return required;
    }
    if let Some(required) = schema.get("required").and_then(Value::as_bool) {
        return required;
    }
    if let Some(min_occurs) = meta.get("minOccurs").and_then(Value::as_i64) {
        return min_occurs > 0;
    }
    false
}

/// Checks one value against one schema fragment.
fn check_value(input: &str, schema: &Value, value: &Value) -> Result<(), GatewayError> {
    // Numeric bounds
    if let Some(minimum) = schema.get("minimum").and_then(Value::as_f64) {
        let number: f64 = value.as_f64().ok_or_else(|| violation(input, "expected a number (schema has 'minimum')"))?;
        if number < minimum {
            return Err(violation(input, format!("{number} is below the minimum of {minimum}")));
        }
    }
    if let Some(maximum) = schema.get("maximum").and_then(Value::as_f64) {
        let number: f64 = value.as_f64().ok_or_else(|| violation(input, "expected a number (schema has 'maximum')"))?;
        if number > maximum {
            return Err(violation(input, format!("{number} exceeds the maximum of {maximum}")));
        }
    }

    // Type-specific checks
    match schema.get("type").and_then(Value::as_str) {
        Some("number") => {
            if !value.is_number() {
                return Err(violation(input, "expected a number"));
            }
        },
        Some("integer") => {
            if !value.is_i64() && !value.is_u64() {
                return Err(violation(input, "expected an integer"));
            }
        },
        Some("boolean") => {
            if !value.is_boolean() {
                return Err(violation(input, "expected a boolean"));
            }
        },
        Some("string") => {
            let raw: &str = value.as_str().ok_or_else(|| violation(input, "expected a string"))?;
            if let Some(max_length) = schema.get("maxLength").and_then(Value::as_u64) {
                if raw.chars().count() as u64 > max_length {
                    return Err(violation(input, format!("longer than maxLength {max_length}")));
                }
            }
            if let Some(min_length) = schema.get("minLength").and_then(Value::as_u64) {
                if (raw.chars().count() as u64) < min_length {
                    return Err(violation(input, format!("shorter than minLength {min_length}")));
                }
            }
        },
        Some("array") => {
            let items: &Vec<Value> = match value.as_array() {
                Some(items) => items,
                None => return Err(violation(input, "expected an array")),
            };
            if let Some(min_items) = schema.get("minItems").and_then(Value::as_u64) {
                if (items.len() as u64) < min_items {
                    return Err(violation(input, format!("fewer than minItems {min_items} elements")));
                }
            }
            if let Some(max_items) = schema.get("maxItems").and_then(Value::as_u64) {
                if items.len() as u64 > max_items {
                    return Err(violation(input, format!("more than maxItems {max_items} elements")));
                }
            }
            if schema.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false) {
                for (i, item) in items.iter().enumerate() {
                    if items[..i].contains(item) {
                        return Err(violation(input, "elements are not unique"));
                    }
                }
            }
            if let Some(item_schema) = schema.get("items") {
                for item in items {
                    check_value(input, item_schema, item)?;
                }
            }
        },
        _ => {},
    }

    // Pattern applies to string values regardless of a declared type
    if let Some(pattern) = schema.get("pattern").and_then(Value::as_str) {
        if let Some(raw) = value.as_str() {
            let regex: Regex = Regex::new(pattern).map_err(|_| violation(input, format!("schema pattern '{pattern}' is not a valid regex")))?;
            if !regex.is_match(raw) {
                return Err(violation(input, format!("does not match pattern '{pattern}'")));
            }
        }
    }

    // Enumerated values
    if let Some(options) = schema.get("enum").and_then(Value::as_array) {
        if !options.contains(value) {
            return Err(violation(input, "not one of the enumerated values"));
        }
    }

    Ok(())
}





/***** LIBRARY *****/
/// Validates an execution request body against the declared inputs of a process.
///
/// # Arguments
/// - `inputs`: The `inputs` map of the process description (name to declaration), if any.
/// - `body`: The execution request body as submitted (`{"inputs": {...}, ...}`).
///
/// # Errors
/// [`GatewayError::InvalidUsage`] naming the first offending input.
pub fn validate_exec_body(inputs: Option<&Map<String, Value>>, body: &Value) -> Result<(), GatewayError> {
    let declared: &Map<String, Value> = match inputs {
        Some(declared) => declared,
        None => return Ok(()),
    };
    let given: Option<&Map<String, Value>> = body.get("inputs").and_then(Value::as_object);

    for (name, meta) in declared {
        let schema: &Value = match meta.get("schema") {
            Some(schema) => schema,
            None => continue,
        };

        let value: Option<&Value> = given.and_then(|map| map.get(name));
        match value {
            Some(value) => check_value(name, schema, value)?,
            None => {
                if is_required(meta, schema) {
                    return Err(GatewayError::InvalidUsage { reason: format!("Parameter '{name}' is required") });
                }
                log::debug!("Execution started without optional parameter '{name}'");
            },
        }
    }

    Ok(())
}





/***** TESTS *****/
