//! Minimal typed parameter schemas for actions.
//!
//! Strategy documents carry loose parameter mappings; an action that
//! declares a schema gets them validated before invocation. Unknown fields
//! are rejected unless the schema opts into non-strict mode.

use serde_json::Value;

use super::ActionError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Float => value.is_number(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Array => value.is_array(),
            ParamKind::Object => value.is_object(),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Boolean => "boolean",
            ParamKind::Array => "array",
            ParamKind::Object => "object",
        }
    }
}

#[derive(Clone, Debug)]
pub struct ParamField {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

#[derive(Clone, Debug)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
    strict: bool,
}

impl Default for ParamSchema {
    fn default() -> Self {
        Self::new()
    }
}

impl ParamSchema {
    /// An empty, strict schema. Use [`field`](Self::field) to declare
    /// parameters and [`lenient`](Self::lenient) to tolerate unknown ones.
    #[must_use]
    pub fn new() -> Self {
        Self {
            fields: Vec::new(),
            strict: true,
        }
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, kind: ParamKind, required: bool) -> Self {
        self.fields.push(ParamField {
            name: name.into(),
            kind,
            required,
        });
        self
    }

    /// Accept fields the schema does not declare.
    #[must_use]
    pub fn lenient(mut self) -> Self {
        self.strict = false;
        self
    }

    /// Validate `params` against this schema. Failures are permanent step
    /// failures, never retried.
    pub fn validate(&self, action_type: &str, params: &Value) -> Result<(), ActionError> {
        let invalid = |message: String| ActionError::InvalidParams {
            action_type: action_type.to_string(),
            message,
        };

        let Some(map) = params.as_object() else {
            return Err(invalid(format!(
                "params must be an object, got {}",
                json_type_name(params)
            )));
        };

        for field in &self.fields {
            match map.get(&field.name) {
                Some(value) if value.is_null() && field.required => {
                    return Err(invalid(format!("field `{}` must not be null", field.name)));
                }
                Some(value) if !value.is_null() && !field.kind.matches(value) => {
                    return Err(invalid(format!(
                        "field `{}` must be a {}, got {}",
                        field.name,
                        field.kind.name(),
                        json_type_name(value)
                    )));
                }
                None if field.required => {
                    return Err(invalid(format!("missing required field `{}`", field.name)));
                }
                _ => {}
            }
        }

        if self.strict {
            for key in map.keys() {
                if !self.fields.iter().any(|f| &f.name == key) {
                    return Err(invalid(format!("unknown field `{key}`")));
                }
            }
        }
        Ok(())
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ParamSchema {
        ParamSchema::new()
            .field("source_type", ParamKind::String, true)
            .field("batch_size", ParamKind::Integer, false)
    }

    #[test]
    fn accepts_valid_params() {
        schema()
            .validate("EXECUTE_MAPPING_PATH", &json!({"source_type": "UNIPROTKB_AC"}))
            .unwrap();
        schema()
            .validate(
                "EXECUTE_MAPPING_PATH",
                &json!({"source_type": "UNIPROTKB_AC", "batch_size": 100}),
            )
            .unwrap();
    }

    #[test]
    fn rejects_missing_required_and_wrong_types() {
        assert!(schema()
            .validate("EXECUTE_MAPPING_PATH", &json!({}))
            .is_err());
        assert!(schema()
            .validate(
                "EXECUTE_MAPPING_PATH",
                &json!({"source_type": 3, "batch_size": 100})
            )
            .is_err());
    }

    #[test]
    fn strict_mode_rejects_unknown_fields() {
        let err = schema()
            .validate(
                "EXECUTE_MAPPING_PATH",
                &json!({"source_type": "X", "typo_field": 1}),
            )
            .unwrap_err();
        assert!(matches!(err, ActionError::InvalidParams { .. }));

        schema()
            .lenient()
            .validate(
                "EXECUTE_MAPPING_PATH",
                &json!({"source_type": "X", "typo_field": 1}),
            )
            .unwrap();
    }
}
