use jsonschema::{Draft, JSONSchema};
use once_cell::sync::Lazy;
use schemars::schema_for;
use serde_json::Value as JsonValue;

use crate::error::{DeployError, Result};

const MAX_REPORTED_ERRORS: usize = 10;

/// Schema generated directly from the Rust spec structs, so the validator
/// stays in lockstep with [`crate::spec::DeploymentSpec`].
static SPEC_SCHEMA_GENERATED: Lazy<JsonValue> = Lazy::new(|| {
    let schema = schema_for!(crate::spec::DeploymentSpec);
    serde_json::to_value(&schema).expect("schemars schema must serialize to JSON")
});

/// Generated schema with unknown keys rejected on every struct.
///
/// Typos such as `retrypolicy` would otherwise fall back to defaults silently.
static SPEC_SCHEMA_STRICT: Lazy<JSONSchema> = Lazy::new(|| {
    let mut schema_json = SPEC_SCHEMA_GENERATED.clone();

    if let Some(obj) = schema_json.as_object_mut() {
        obj.insert("additionalProperties".to_string(), JsonValue::Bool(false));

        if let Some(JsonValue::Object(defs)) = obj.get_mut("definitions") {
            for def in defs.values_mut() {
                if let Some(def_obj) = def.as_object_mut() {
                    if def_obj.contains_key("properties") {
                        def_obj.insert("additionalProperties".to_string(), JsonValue::Bool(false));
                    }
                }
            }
        }
    }

    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema_json)
        .expect("failed to compile strict deployment spec JSON schema")
});

/// Validate the structural shape of a parsed spec document.
///
/// Checks types and unknown keys only; required fields are enforced by
/// [`crate::normalize::normalize`] so they can be reported per unit.
pub fn validate_spec_value(value: &JsonValue) -> Result<()> {
    let compiled = &*SPEC_SCHEMA_STRICT;

    // `validate()` borrows `value`; collect messages before returning.
    let result = match compiled.validate(value) {
        Ok(()) => Ok(()),
        Err(err_iter) => {
            let mut msgs: Vec<String> = Vec::new();
            for (i, e) in err_iter.enumerate() {
                if i >= MAX_REPORTED_ERRORS {
                    msgs.push("... (more schema errors omitted)".to_string());
                    break;
                }
                let instance_path = e.instance_path.to_string();
                let path = if instance_path.is_empty() {
                    "/".to_string()
                } else {
                    instance_path
                };
                msgs.push(format!("at {path}: {e}"));
            }

            Err(DeployError::Schema(format!(
                "spec schema validation failed:\n{}",
                msgs.join("\n")
            )))
        }
    };

    result
}

/// The generated schema, for `--print-schema` style tooling and tests.
pub fn generated_schema_json() -> &'static JsonValue {
    &SPEC_SCHEMA_GENERATED
}
