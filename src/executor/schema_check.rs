//! JSON Schema validation for function input/output, with a narrow
//! best-effort string coercion pass ahead of validation: triggers coming
//! from chat or form-style channels hand everything over as strings, and
//! the schema is the only place that knows a field is really a number or
//! a boolean.

use jsonschema::validator_for;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaCheckError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("value does not match schema: {0}")]
    Mismatch(String),
}

/// Coerce top-level string fields to the type their schema property
/// declares (`number`, `integer`, `boolean`), then validate the result
/// against `schema`. Returns the (possibly coerced) value on success.
pub fn coerce_to_schema(value: &Value, schema: &Value) -> Result<Value, SchemaCheckError> {
    let mut coerced = value.clone();
    coerce_object_properties(&mut coerced, schema);

    let validator = validator_for(schema).map_err(|e| SchemaCheckError::InvalidSchema(e.to_string()))?;
    if let Err(first) = validator.validate(&coerced) {
        return Err(SchemaCheckError::Mismatch(first.to_string()));
    }
    Ok(coerced)
}

fn coerce_object_properties(value: &mut Value, schema: &Value) {
    let (Some(object), Some(properties)) = (value.as_object_mut(), schema.get("properties").and_then(Value::as_object))
    else {
        return;
    };
    for (key, prop_schema) in properties {
        let Some(slot) = object.get_mut(key) else { continue };
        coerce_scalar(slot, prop_schema);
    }
}

fn coerce_scalar(slot: &mut Value, prop_schema: &Value) {
    let Some(s) = slot.as_str() else { return };
    let declared = prop_schema.get("type").and_then(Value::as_str);
    match declared {
        Some("integer") => {
            if let Ok(n) = s.parse::<i64>() {
                *slot = Value::from(n);
            }
        }
        Some("number") => {
            if let Ok(n) = s.parse::<f64>() {
                *slot = Value::from(n);
            }
        }
        Some("boolean") => match s {
            "true" => *slot = Value::Bool(true),
            "false" => *slot = Value::Bool(false),
            _ => {}
        },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer"},
                "ratio": {"type": "number"},
                "enabled": {"type": "boolean"},
                "label": {"type": "string"}
            },
            "required": ["count"]
        })
    }

    #[test]
    fn coerces_string_fields_to_declared_types() {
        let input = json!({"count": "3", "ratio": "1.5", "enabled": "true", "label": "x"});
        let out = coerce_to_schema(&input, &schema()).unwrap();
        assert_eq!(out["count"], json!(3));
        assert_eq!(out["ratio"], json!(1.5));
        assert_eq!(out["enabled"], json!(true));
        assert_eq!(out["label"], json!("x"));
    }

    #[test]
    fn leaves_already_typed_values_alone() {
        let input = json!({"count": 3, "ratio": 1.5, "enabled": true});
        let out = coerce_to_schema(&input, &schema()).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn missing_required_field_fails_validation() {
        let input = json!({"ratio": 1.0});
        assert!(coerce_to_schema(&input, &schema()).is_err());
    }

    #[test]
    fn unparseable_string_is_left_as_is_and_fails_validation() {
        let input = json!({"count": "not-a-number"});
        assert!(coerce_to_schema(&input, &schema()).is_err());
    }

    #[test]
    fn invalid_schema_itself_is_reported() {
        let input = json!({});
        let bad_schema = json!({"type": "nonsense-type"});
        assert!(coerce_to_schema(&input, &bad_schema).is_err());
    }
}
