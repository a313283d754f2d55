use std::time::Duration;

use tracing::{info, warn};

use crate::checksum;
use crate::error::{DeployError, Result};
use crate::normalize::DeploymentUnit;
use crate::parameters::{self, ParameterMap};
use crate::provider::{ApplyRequest, DeploymentRecord, ParameterSource, ProvisioningApi};

/// Blocking wait between failed attempts.
///
/// Runs on the worker thread executing the unit, so a backoff never stalls
/// other units of a parallel batch.
pub trait Sleeper: Send + Sync {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSleeper;

impl Sleeper for ThreadSleeper {
    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub record: DeploymentRecord,
    pub attempts: u32,
}

/// Applies a unit's template with bounded retries and geometric backoff.
pub struct RetryingExecutor<'a> {
    api: &'a dyn ProvisioningApi,
    sleeper: &'a dyn Sleeper,
}

impl<'a> RetryingExecutor<'a> {
    pub fn new(api: &'a dyn ProvisioningApi, sleeper: &'a dyn Sleeper) -> Self {
        Self { api, sleeper }
    }

    /// Attempt the apply with the parameters produced by [`prepare`].
    ///
    /// Apply failures sleep `delay`, then `delay * backoffFactor`, and so on;
    /// the last failure becomes [`DeployError::DeploymentExhausted`].
    pub fn execute(
        &self,
        unit: &DeploymentUnit,
        merged: &ParameterMap,
        dry_run: bool,
    ) -> Result<ExecutionOutcome> {
        let parameters = if !merged.is_empty() {
            ParameterSource::Inline(merged)
        } else if let Some(file) = unit.parameters.file.as_deref() {
            ParameterSource::File(file)
        } else {
            ParameterSource::None
        };

        let request = ApplyRequest {
            deployment_name: &unit.name,
            resource_group: &unit.resource_group.name,
            template_file: &unit.template.file,
            mode: unit.mode,
            parameters,
            dry_run,
        };

        let policy = unit.retry_policy;
        let mut delay = Duration::from_secs(policy.delay_seconds);
        let mut attempt: u32 = 1;

        loop {
            info!(
                unit = %unit.name,
                attempt,
                max_attempts = policy.max_attempts,
                dry_run,
                "applying template"
            );

            match self.api.apply_template(&request) {
                Ok(record) => {
                    info!(unit = %unit.name, attempt, status = %record.status, "template applied");
                    return Ok(ExecutionOutcome {
                        record,
                        attempts: attempt,
                    });
                }
                Err(err) => {
                    let err = DeployError::provisioning(err);
                    if attempt >= policy.max_attempts {
                        return Err(DeployError::DeploymentExhausted {
                            unit: unit.name.clone(),
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }

                    warn!(
                        unit = %unit.name,
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "apply failed; retrying"
                    );
                    self.sleeper.sleep(delay);
                    delay = delay.saturating_mul(policy.backoff_factor);
                    attempt += 1;
                }
            }
        }
    }
}

/// Local checks and parameter resolution for one unit.
///
/// Touches only the filesystem, so every file, format and integrity error
/// surfaces before any provisioning call is made.
pub fn prepare(unit: &DeploymentUnit) -> Result<ParameterMap> {
    run_pre_checks(unit)?;
    parameters::resolve(&unit.parameters)
}

fn run_pre_checks(unit: &DeploymentUnit) -> Result<()> {
    if unit.pre_checks.validate_template_file && !unit.template.file.is_file() {
        return Err(DeployError::FileNotFound(unit.template.file.clone()));
    }

    checksum::verify_file(&unit.template.file, unit.template.checksum.as_deref())?;

    if unit.pre_checks.validate_parameter_file {
        if let Some(file) = unit.parameters.file.as_deref() {
            if !file.is_file() {
                return Err(DeployError::FileNotFound(file.to_path_buf()));
            }
        }
    }

    Ok(())
}
