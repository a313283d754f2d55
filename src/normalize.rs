use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{DeployError, Result};
use crate::spec::{DeploymentSpec, PreChecksSpec, RetryPolicySpec, UnitSpec};

pub const DEFAULT_SCHEMA_VERSION: &str = "1.0";
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_DELAY_SECONDS: u64 = 5;
pub const DEFAULT_BACKOFF_FACTOR: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeploymentMode {
    #[default]
    Incremental,
    Complete,
}

impl DeploymentMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "incremental" => Some(DeploymentMode::Incremental),
            "complete" => Some(DeploymentMode::Complete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentMode::Incremental => "Incremental",
            DeploymentMode::Complete => "Complete",
        }
    }
}

impl fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreChecks {
    pub require_login: bool,
    pub validate_template_file: bool,
    pub validate_parameter_file: bool,
    pub validate_resource_group_name: bool,
}

impl Default for PreChecks {
    fn default() -> Self {
        Self {
            require_login: true,
            validate_template_file: true,
            validate_parameter_file: true,
            validate_resource_group_name: true,
        }
    }
}

impl PreChecks {
    fn from_spec(spec: Option<&PreChecksSpec>) -> Self {
        let d = Self::default();
        let Some(s) = spec else {
            return d;
        };
        Self {
            require_login: s.require_login.unwrap_or(d.require_login),
            validate_template_file: s
                .validate_template_file
                .unwrap_or(d.validate_template_file),
            validate_parameter_file: s
                .validate_parameter_file
                .unwrap_or(d.validate_parameter_file),
            validate_resource_group_name: s
                .validate_resource_group_name
                .unwrap_or(d.validate_resource_group_name),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_seconds: u64,
    pub backoff_factor: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay_seconds: DEFAULT_DELAY_SECONDS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    fn from_spec(unit: &str, spec: Option<&RetryPolicySpec>) -> Result<Self> {
        let d = Self::default();
        let Some(s) = spec else {
            return Ok(d);
        };
        let policy = Self {
            max_attempts: s.max_attempts.unwrap_or(d.max_attempts),
            delay_seconds: s.delay_seconds.unwrap_or(d.delay_seconds),
            backoff_factor: s.backoff_factor.unwrap_or(d.backoff_factor),
        };
        if policy.max_attempts < 1 {
            return Err(DeployError::Schema(format!(
                "deployment '{unit}' retryPolicy.maxAttempts must be >= 1"
            )));
        }
        if policy.backoff_factor < 1 {
            return Err(DeployError::Schema(format!(
                "deployment '{unit}' retryPolicy.backoffFactor must be >= 1"
            )));
        }
        Ok(policy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroup {
    pub name: String,
    pub location: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    pub file: PathBuf,
    pub checksum: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Parameters {
    pub file: Option<PathBuf>,
    pub checksum: Option<String>,
    pub overrides: BTreeMap<String, JsonValue>,
}

/// A fully-defaulted, immutable deployment unit.
#[derive(Debug, Clone, PartialEq)]
pub struct DeploymentUnit {
    pub name: String,
    pub resource_group: ResourceGroup,
    pub template: Template,
    pub parameters: Parameters,
    pub mode: DeploymentMode,
    pub pre_checks: PreChecks,
    pub retry_policy: RetryPolicy,
    /// Effective account: the unit override, else the spec-level id.
    pub subscription_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSpec {
    pub schema_version: String,
    pub subscription_id: Option<String>,
    pub units: Vec<DeploymentUnit>,
}

/// Validate a parsed spec and build its fully-defaulted form.
///
/// `base_dir` anchors relative template and parameter file paths (normally
/// the directory holding the spec file). The parsed document is not modified.
pub fn normalize(spec: &DeploymentSpec, base_dir: &Path) -> Result<NormalizedSpec> {
    let raw_units = spec
        .deployments
        .as_ref()
        .ok_or_else(|| DeployError::Schema("spec is missing 'deployments'".to_string()))?;
    if raw_units.is_empty() {
        return Err(DeployError::Schema(
            "spec 'deployments' must contain at least one unit".to_string(),
        ));
    }

    let spec_subscription = non_empty(spec.subscription_id.as_deref());

    let units = raw_units
        .iter()
        .enumerate()
        .map(|(idx, raw)| normalize_unit(idx, raw, spec_subscription, base_dir))
        .collect::<Result<Vec<_>>>()?;

    Ok(NormalizedSpec {
        schema_version: non_empty(spec.schema_version.as_deref())
            .unwrap_or(DEFAULT_SCHEMA_VERSION)
            .to_string(),
        subscription_id: spec_subscription.map(str::to_string),
        units,
    })
}

fn normalize_unit(
    idx: usize,
    raw: &UnitSpec,
    spec_subscription: Option<&str>,
    base_dir: &Path,
) -> Result<DeploymentUnit> {
    let name = non_empty(raw.name.as_deref())
        .ok_or_else(|| missing(&format!("deployments[{idx}]"), "name"))?
        .to_string();
    let label = format!("deployment '{name}'");

    let rg = raw
        .resource_group
        .as_ref()
        .ok_or_else(|| missing(&label, "resourceGroup"))?;
    let rg_name = non_empty(rg.name.as_deref()).ok_or_else(|| missing(&label, "resourceGroup.name"))?;
    let rg_location = non_empty(rg.location.as_deref())
        .ok_or_else(|| missing(&label, "resourceGroup.location"))?;

    let template = raw
        .template
        .as_ref()
        .ok_or_else(|| missing(&label, "template"))?;
    let template_file =
        non_empty(template.file.as_deref()).ok_or_else(|| missing(&label, "template.file"))?;

    let mode = match raw.mode.as_deref() {
        None => DeploymentMode::default(),
        Some(m) => DeploymentMode::parse(m).ok_or_else(|| {
            DeployError::Schema(format!(
                "{label} has unknown mode '{m}' (supported: Incremental, Complete)"
            ))
        })?,
    };

    let parameters = match raw.parameters.as_ref() {
        None => Parameters::default(),
        Some(p) => Parameters {
            file: non_empty(p.file.as_deref()).map(|f| resolve_path(base_dir, f)),
            checksum: non_empty(p.checksum.as_deref()).map(str::to_string),
            overrides: p.overrides.clone().unwrap_or_default(),
        },
    };

    Ok(DeploymentUnit {
        resource_group: ResourceGroup {
            name: rg_name.to_string(),
            location: rg_location.to_string(),
            tags: rg.tags.clone(),
        },
        template: Template {
            file: resolve_path(base_dir, template_file),
            checksum: non_empty(template.checksum.as_deref()).map(str::to_string),
        },
        parameters,
        mode,
        pre_checks: PreChecks::from_spec(raw.pre_checks.as_ref()),
        retry_policy: RetryPolicy::from_spec(&name, raw.retry_policy.as_ref())?,
        subscription_id: non_empty(raw.subscription_id.as_deref())
            .or(spec_subscription)
            .map(str::to_string),
        name,
    })
}

fn missing(label: &str, field: &str) -> DeployError {
    DeployError::Schema(format!("{label} is missing required field '{field}'"))
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_path(base_dir: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(raw);
    if p.is_absolute() {
        p
    } else {
        base_dir.join(p)
    }
}
