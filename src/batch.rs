use std::time::Instant;

use tracing::{info, warn};

use crate::bounded_executor::WorkerPool;
use crate::error::{DeployError, Result};
use crate::normalize::{DeploymentUnit, NormalizedSpec};
use crate::orchestrator::UnitOrchestrator;
use crate::provider::{ContextSnapshot, ProvisioningApi};
use crate::report::{BatchReport, UnitOutcome};
use crate::retry::Sleeper;

/// What a sequential batch does after the first failed unit.
///
/// Parallel batches always behave like `CollectAll`: units already handed to
/// the pool are never cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    FailFast,
    CollectAll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    pub parallelism: usize,
    pub dry_run: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallelism: 1,
            dry_run: false,
            failure_policy: FailurePolicy::FailFast,
        }
    }
}

pub struct BatchRunner<'a> {
    api: &'a dyn ProvisioningApi,
    sleeper: &'a dyn Sleeper,
    options: BatchOptions,
}

impl<'a> BatchRunner<'a> {
    pub fn new(
        api: &'a dyn ProvisioningApi,
        sleeper: &'a dyn Sleeper,
        options: BatchOptions,
    ) -> Self {
        Self {
            api,
            sleeper,
            options,
        }
    }

    /// Deploy every unit of `spec`.
    ///
    /// Sequential (`parallelism == 1`) runs in declared order and, under
    /// [`FailurePolicy::FailFast`], returns the first unit's error unchanged.
    /// Parallel runs wait for every unit and then raise
    /// [`DeployError::BatchFailed`] naming all failed units.
    pub fn run(&self, spec: &NormalizedSpec) -> Result<BatchReport> {
        let pool = WorkerPool::new(self.options.parallelism)?;

        self.ensure_authenticated(&spec.units)?;
        let snapshot = self
            .api
            .capture_context()
            .map_err(DeployError::provisioning)?;

        info!(
            units = spec.units.len(),
            parallelism = pool.size(),
            dry_run = self.options.dry_run,
            "batch started"
        );

        if pool.size() == 1 {
            self.run_sequential(spec, &snapshot)
        } else {
            self.run_parallel(spec, &snapshot, pool)
        }
    }

    fn run_sequential(
        &self,
        spec: &NormalizedSpec,
        snapshot: &ContextSnapshot,
    ) -> Result<BatchReport> {
        let orchestrator = UnitOrchestrator::new(self.api, self.sleeper, self.options.dry_run);
        let mut report = BatchReport::new(self.options.dry_run);
        let mut active = snapshot.clone();

        for (idx, unit) in spec.units.iter().enumerate() {
            let started = Instant::now();
            match orchestrator.run(unit, &mut active) {
                Ok(success) => report.outcomes.push(UnitOutcome {
                    unit: unit.name.clone(),
                    elapsed: started.elapsed(),
                    result: Ok(success),
                }),
                Err(err) => {
                    report.outcomes.push(UnitOutcome {
                        unit: unit.name.clone(),
                        elapsed: started.elapsed(),
                        result: Err(err.to_string()),
                    });
                    if self.options.failure_policy == FailurePolicy::FailFast {
                        report.skipped = spec.units[idx + 1..]
                            .iter()
                            .map(|u| u.name.clone())
                            .collect();
                        self.restore(snapshot, &active);
                        report.log();
                        return Err(err);
                    }
                }
            }
        }

        self.restore(snapshot, &active);
        self.finish(report)
    }

    fn run_parallel(
        &self,
        spec: &NormalizedSpec,
        snapshot: &ContextSnapshot,
        pool: WorkerPool,
    ) -> Result<BatchReport> {
        let jobs: Vec<_> = spec
            .units
            .iter()
            .map(|unit| move || self.run_isolated(unit, snapshot))
            .collect();

        let outcomes = pool.run(jobs)?;

        if let Err(err) = self.api.restore_context(snapshot) {
            warn!(error = %format!("{err:#}"), "failed to restore account context");
        }

        let mut report = BatchReport::new(self.options.dry_run);
        report.outcomes = outcomes;
        self.finish(report)
    }

    /// One unit on a pool worker, starting from its own copy of the snapshot.
    fn run_isolated(&self, unit: &DeploymentUnit, snapshot: &ContextSnapshot) -> UnitOutcome {
        let started = Instant::now();
        let orchestrator = UnitOrchestrator::new(self.api, self.sleeper, self.options.dry_run);
        let mut active = snapshot.clone();

        let result = self
            .api
            .restore_context(snapshot)
            .map_err(|err| {
                let err = DeployError::provisioning(err);
                warn!(unit = %unit.name, error = %err, "failed to apply account context");
                err
            })
            .and_then(|()| orchestrator.run(unit, &mut active));

        if let Err(err) = self.api.release_context() {
            warn!(unit = %unit.name, error = %format!("{err:#}"), "failed to release account context");
        }

        UnitOutcome {
            unit: unit.name.clone(),
            elapsed: started.elapsed(),
            result: result.map_err(|err| err.to_string()),
        }
    }

    fn ensure_authenticated(&self, units: &[DeploymentUnit]) -> Result<()> {
        if !units.iter().any(|u| u.pre_checks.require_login) {
            return Ok(());
        }
        if self
            .api
            .is_authenticated()
            .map_err(DeployError::provisioning)?
        {
            return Ok(());
        }
        info!("not authenticated; logging in");
        self.api.authenticate().map_err(DeployError::provisioning)
    }

    fn restore(&self, snapshot: &ContextSnapshot, active: &ContextSnapshot) {
        if snapshot == active {
            return;
        }
        if let Err(err) = self.api.restore_context(snapshot) {
            warn!(error = %format!("{err:#}"), "failed to restore account context");
        }
    }

    fn finish(&self, report: BatchReport) -> Result<BatchReport> {
        report.log();
        let failed = report.failed_units();
        if !failed.is_empty() {
            return Err(DeployError::BatchFailed { units: failed });
        }
        Ok(report)
    }
}
