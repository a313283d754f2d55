use tracing::info;

use crate::error::{DeployError, Result};
use crate::normalize::DeploymentUnit;
use crate::provider::{DeploymentStatus, ProvisioningApi};

/// Confirm the provider reports the unit's deployment as succeeded.
///
/// Never called for dry runs.
pub fn verify_deployment(
    api: &dyn ProvisioningApi,
    unit: &DeploymentUnit,
) -> Result<DeploymentStatus> {
    let failed = |reason: String| DeployError::VerificationFailed {
        unit: unit.name.clone(),
        reason,
    };

    let status = api
        .deployment_status(&unit.resource_group.name, &unit.name)
        .map_err(|err| failed(format!("status query failed: {err:#}")))?
        .ok_or_else(|| {
            failed(format!(
                "no deployment record found in resource group '{}'",
                unit.resource_group.name
            ))
        })?;

    if !status.is_success() {
        return Err(failed(format!("deployment status is {status}")));
    }

    info!(unit = %unit.name, status = %status, "deployment verified");
    Ok(status)
}
