//! JSON-schema checks for tool arguments and structured outputs.
//!
//! Validation is delegated to `jsonschema`. In strict mode every object
//! schema that declares `properties` is closed first, recursively through
//! nested properties, array items, combinators and `definitions`/`$defs`, so
//! an undeclared field is rejected at any depth. Lenient mode validates the
//! schema as written.

use schemars::JsonSchema;
use serde_json::Value;

/// How unknown fields are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strictness {
    /// Reject any field the schema does not declare.
    #[default]
    Strict,
    /// Permit undeclared fields.
    Lenient,
}

/// JSON schema of `T` as a plain value.
pub fn schema_for<T: JsonSchema>() -> Value {
    let root = schemars::schema_for!(T);
    serde_json::to_value(root).unwrap_or_else(|_| serde_json::json!({"type": "object"}))
}

/// Checks `value` against `schema`. A null schema accepts anything.
pub fn validate(schema: &Value, value: &Value, strictness: Strictness) -> Result<(), String> {
    if schema.is_null() {
        return Ok(());
    }
    let effective = match strictness {
        Strictness::Strict => close_objects(schema),
        Strictness::Lenient => schema.clone(),
    };
    let validator =
        jsonschema::validator_for(&effective).map_err(|e| format!("invalid schema: {}", e))?;
    if validator.is_valid(value) {
        return Ok(());
    }
    let errors: Vec<String> = validator.iter_errors(value).map(|e| e.to_string()).collect();
    Err(errors.join("; "))
}

/// Copy of `schema` with `additionalProperties: false` on every object
/// schema that declares `properties` and leaves `additionalProperties` unset.
///
/// Schemas composed with `allOf` (flattened structs) stay open, since closing
/// each part would reject the fields contributed by the others.
pub fn close_objects(schema: &Value) -> Value {
    let mut closed = schema.clone();
    close_in_place(&mut closed);
    closed
}

const SUBSCHEMA_MAPS: [&str; 4] = ["properties", "patternProperties", "definitions", "$defs"];
const SUBSCHEMA_LISTS: [&str; 4] = ["allOf", "anyOf", "oneOf", "prefixItems"];
const SUBSCHEMA_SINGLES: [&str; 6] = ["items", "additionalProperties", "not", "if", "then", "else"];

fn close_in_place(node: &mut Value) {
    let Value::Object(map) = node else {
        return;
    };
    if map.contains_key("properties")
        && !map.contains_key("additionalProperties")
        && !map.contains_key("allOf")
    {
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    for key in SUBSCHEMA_MAPS {
        if let Some(Value::Object(children)) = map.get_mut(key) {
            children.values_mut().for_each(close_in_place);
        }
    }
    for key in SUBSCHEMA_LISTS {
        if let Some(Value::Array(children)) = map.get_mut(key) {
            children.iter_mut().for_each(close_in_place);
        }
    }
    for key in SUBSCHEMA_SINGLES {
        match map.get_mut(key) {
            Some(Value::Array(children)) => children.iter_mut().for_each(close_in_place),
            Some(child) => close_in_place(child),
            None => {}
        }
    }
}
