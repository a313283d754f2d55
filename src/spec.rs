use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use crate::error::{DeployError, Result};
use crate::schema;

/// Top-level deployment spec document, as written by the user.
///
/// Every field is optional at this layer so that missing required fields
/// surface as readable [`DeployError::Schema`] errors from
/// [`crate::normalize::normalize`] rather than opaque serde messages.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentSpec {
    #[serde(default)]
    pub schema_version: Option<String>,

    /// Default account/subscription for every unit.
    #[serde(default)]
    pub subscription_id: Option<String>,

    #[serde(default)]
    pub deployments: Option<Vec<UnitSpec>>,
}

/// One declared deployment unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UnitSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub resource_group: Option<ResourceGroupSpec>,

    #[serde(default)]
    pub template: Option<TemplateSpec>,

    #[serde(default)]
    pub parameters: Option<ParametersSpec>,

    /// `Incremental` (default) or `Complete`.
    #[serde(default)]
    pub mode: Option<String>,

    #[serde(default)]
    pub pre_checks: Option<PreChecksSpec>,

    #[serde(default)]
    pub retry_policy: Option<RetryPolicySpec>,

    /// Per-unit override of the top-level `subscriptionId`.
    #[serde(default)]
    pub subscription_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceGroupSpec {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub location: Option<String>,

    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSpec {
    #[serde(default)]
    pub file: Option<String>,

    /// `<algorithm>:<hex-digest>`, e.g. `sha256:ab12...`.
    #[serde(default)]
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParametersSpec {
    #[serde(default)]
    pub file: Option<String>,

    #[serde(default)]
    pub checksum: Option<String>,

    /// Inline values that win over same-named keys from `file`.
    #[serde(default)]
    pub overrides: Option<BTreeMap<String, JsonValue>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PreChecksSpec {
    #[serde(default)]
    pub require_login: Option<bool>,

    #[serde(default)]
    pub validate_template_file: Option<bool>,

    #[serde(default)]
    pub validate_parameter_file: Option<bool>,

    #[serde(default)]
    pub validate_resource_group_name: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicySpec {
    #[serde(default)]
    pub max_attempts: Option<u32>,

    #[serde(default)]
    pub delay_seconds: Option<u64>,

    #[serde(default)]
    pub backoff_factor: Option<u32>,
}

impl DeploymentSpec {
    /// Load a deployment spec from a JSON file.
    ///
    /// The document is checked against the generated JSON Schema before it is
    /// deserialized; required-field checks happen later during normalization.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => DeployError::FileNotFound(path.to_path_buf()),
            _ => DeployError::Io(err),
        })?;

        let value: JsonValue = serde_json::from_str(&text).map_err(|err| DeployError::Format {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;

        Self::from_value(value)
    }

    /// Build a spec from an already-parsed JSON value.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let is_empty = match &value {
            JsonValue::Null => true,
            JsonValue::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Err(DeployError::Schema("spec is empty".to_string()));
        }

        schema::validate_spec_value(&value)?;

        serde_json::from_value(value).map_err(|err| DeployError::Schema(err.to_string()))
    }
}
