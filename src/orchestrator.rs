use tracing::{error, info};

use crate::error::{DeployError, Result};
use crate::normalize::DeploymentUnit;
use crate::provider::{ContextSnapshot, DeploymentRecord, DeploymentStatus, ProvisioningApi};
use crate::provision::{self, ProvisionOutcome};
use crate::retry::{self, RetryingExecutor, Sleeper};
use crate::verify;

/// Status reported for a dry-run unit whose resource group does not exist.
pub const NOT_PREVIEWED: &str = "NotPreviewed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitSuccess {
    pub provisioned: ProvisionOutcome,
    pub record: DeploymentRecord,
    pub attempts: u32,
    pub verified: bool,
}

/// Runs the fixed pipeline for one unit: local checks, account switch,
/// resource group, template apply with retries, then verification (skipped
/// for dry runs).
pub struct UnitOrchestrator<'a> {
    api: &'a dyn ProvisioningApi,
    sleeper: &'a dyn Sleeper,
    dry_run: bool,
}

impl<'a> UnitOrchestrator<'a> {
    pub fn new(api: &'a dyn ProvisioningApi, sleeper: &'a dyn Sleeper, dry_run: bool) -> Self {
        Self {
            api,
            sleeper,
            dry_run,
        }
    }

    /// `active` is the account context currently in effect for the calling
    /// worker; it is updated when the unit switches accounts.
    ///
    /// Errors are logged with the unit name and returned unchanged.
    pub fn run(&self, unit: &DeploymentUnit, active: &mut ContextSnapshot) -> Result<UnitSuccess> {
        info!(
            unit = %unit.name,
            resource_group = %unit.resource_group.name,
            dry_run = self.dry_run,
            "deployment started"
        );

        self.run_stages(unit, active).inspect_err(|err| {
            error!(unit = %unit.name, error = %err, "deployment failed");
        })
    }

    fn run_stages(
        &self,
        unit: &DeploymentUnit,
        active: &mut ContextSnapshot,
    ) -> Result<UnitSuccess> {
        let merged = retry::prepare(unit)?;

        if let Some(account) = unit.subscription_id.as_deref() {
            if active.account_id.as_deref() != Some(account) {
                info!(unit = %unit.name, account, "switching account context");
                self.api
                    .switch_account(account)
                    .map_err(DeployError::provisioning)?;
                active.account_id = Some(account.to_string());
            }
        }

        let provisioned = provision::ensure_resource_group(self.api, unit, self.dry_run)?;

        // A what-if against a group that does not exist yet is rejected by
        // the provider; nothing more can be previewed.
        if provisioned == ProvisionOutcome::WouldCreate {
            info!(
                unit = %unit.name,
                resource_group = %unit.resource_group.name,
                "dry-run: resource group absent; template preview skipped"
            );
            return Ok(UnitSuccess {
                provisioned,
                record: DeploymentRecord {
                    name: unit.name.clone(),
                    status: DeploymentStatus::Other(NOT_PREVIEWED.to_string()),
                },
                attempts: 0,
                verified: false,
            });
        }

        let outcome =
            RetryingExecutor::new(self.api, self.sleeper).execute(unit, &merged, self.dry_run)?;

        let verified = if self.dry_run {
            false
        } else {
            verify::verify_deployment(self.api, unit)?;
            true
        };

        info!(unit = %unit.name, attempts = outcome.attempts, "deployment finished");
        Ok(UnitSuccess {
            provisioned,
            record: outcome.record,
            attempts: outcome.attempts,
            verified,
        })
    }
}
