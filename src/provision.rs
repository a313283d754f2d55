use tracing::info;

use crate::error::{DeployError, Result};
use crate::normalize::DeploymentUnit;
use crate::provider::ProvisioningApi;

pub const MAX_RESOURCE_GROUP_NAME_LEN: usize = 90;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionOutcome {
    Existing,
    Created,
    /// Absent, and creation was skipped because of dry-run.
    WouldCreate,
}

/// Check a resource group name: 1..=90 characters drawn from alphanumerics,
/// `_`, `.`, `-`, `(` and `)`.
pub fn validate_resource_group_name(name: &str) -> Result<()> {
    let invalid = |reason: String| DeployError::InvalidName {
        name: name.to_string(),
        reason,
    };

    let len = name.chars().count();
    if len == 0 || len > MAX_RESOURCE_GROUP_NAME_LEN {
        return Err(invalid(format!(
            "length must be between 1 and {MAX_RESOURCE_GROUP_NAME_LEN} characters (got {len})"
        )));
    }

    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '-' | '(' | ')')))
    {
        return Err(invalid(format!("character '{bad}' is not allowed")));
    }

    Ok(())
}

/// Make sure the unit's resource group exists before deploying into it.
///
/// Existing groups are left alone; tag drift is reconciled by the template.
pub fn ensure_resource_group(
    api: &dyn ProvisioningApi,
    unit: &DeploymentUnit,
    dry_run: bool,
) -> Result<ProvisionOutcome> {
    let rg = &unit.resource_group;
    if unit.pre_checks.validate_resource_group_name {
        validate_resource_group_name(&rg.name)?;
    }

    if api
        .resource_group(&rg.name)
        .map_err(DeployError::provisioning)?
        .is_some()
    {
        info!(unit = %unit.name, resource_group = %rg.name, "resource group exists");
        return Ok(ProvisionOutcome::Existing);
    }

    if dry_run {
        info!(
            unit = %unit.name,
            resource_group = %rg.name,
            location = %rg.location,
            "dry-run: would create resource group"
        );
        return Ok(ProvisionOutcome::WouldCreate);
    }

    api.create_resource_group(&rg.name, &rg.location, &rg.tags)
        .map_err(DeployError::provisioning)?;
    info!(
        unit = %unit.name,
        resource_group = %rg.name,
        location = %rg.location,
        "created resource group"
    );
    Ok(ProvisionOutcome::Created)
}
