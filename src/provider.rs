use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use crate::normalize::DeploymentMode;
use crate::parameters::ParameterMap;

/// The cloud provisioning API the orchestrator drives.
///
/// Implementations are shared across worker threads, so every method takes
/// `&self`. Failures are opaque to the orchestrator: `apply_template` errors
/// are retried, everything else is fatal for the unit.
pub trait ProvisioningApi: Send + Sync {
    fn is_authenticated(&self) -> Result<bool>;

    fn authenticate(&self) -> Result<()>;

    /// Look up a resource group; `Ok(None)` when it does not exist.
    fn resource_group(&self, name: &str) -> Result<Option<ResourceGroupInfo>>;

    fn create_resource_group(
        &self,
        name: &str,
        location: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<ResourceGroupInfo>;

    fn apply_template(&self, request: &ApplyRequest<'_>) -> Result<DeploymentRecord>;

    /// Status of a named deployment; `Ok(None)` when no record exists.
    fn deployment_status(
        &self,
        resource_group: &str,
        deployment: &str,
    ) -> Result<Option<DeploymentStatus>>;

    fn switch_account(&self, account_id: &str) -> Result<()>;

    fn capture_context(&self) -> Result<ContextSnapshot>;

    fn restore_context(&self, snapshot: &ContextSnapshot) -> Result<()>;

    /// Drop any context held for the calling thread once its unit is done.
    fn release_context(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceGroupInfo {
    pub name: String,
    pub location: String,
    pub tags: BTreeMap<String, String>,
}

/// How parameters reach the provider for one apply call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParameterSource<'a> {
    Inline(&'a ParameterMap),
    File(&'a Path),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ApplyRequest<'a> {
    pub deployment_name: &'a str,
    pub resource_group: &'a str,
    pub template_file: &'a Path,
    pub mode: DeploymentMode,
    pub parameters: ParameterSource<'a>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub name: String,
    pub status: DeploymentStatus,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeploymentStatus {
    Succeeded,
    Failed,
    Canceled,
    Running,
    Other(String),
}

impl DeploymentStatus {
    /// Parse a provider state string (`provisioningState`), case-insensitively.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "succeeded" => DeploymentStatus::Succeeded,
            "failed" => DeploymentStatus::Failed,
            "canceled" | "cancelled" => DeploymentStatus::Canceled,
            "running" | "accepted" | "deploying" => DeploymentStatus::Running,
            _ => DeploymentStatus::Other(raw.trim().to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentStatus::Succeeded)
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeploymentStatus::Succeeded => f.write_str("Succeeded"),
            DeploymentStatus::Failed => f.write_str("Failed"),
            DeploymentStatus::Canceled => f.write_str("Canceled"),
            DeploymentStatus::Running => f.write_str("Running"),
            DeploymentStatus::Other(s) => f.write_str(s),
        }
    }
}

/// Read-only copy of the ambient account context, handed to every worker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    pub account_id: Option<String>,
}

impl ContextSnapshot {
    pub fn new(account_id: Option<String>) -> Self {
        Self { account_id }
    }
}
