use std::time::Duration;

use tracing::{error, info, warn};

use crate::orchestrator::UnitSuccess;

#[derive(Debug, Clone)]
pub struct UnitOutcome {
    pub unit: String,
    pub elapsed: Duration,
    /// The unit's success details, or the rendered error.
    pub result: Result<UnitSuccess, String>,
}

impl UnitOutcome {
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }

    pub fn summarize(&self) -> String {
        let elapsed = format_elapsed(self.elapsed);
        match &self.result {
            Ok(s) => format!(
                "unit={} status={} attempts={} provisioned={:?} verified={} elapsed={elapsed}",
                self.unit, s.record.status, s.attempts, s.provisioned, s.verified
            ),
            Err(msg) => format!("unit={} status=FAILED elapsed={elapsed} error={msg}", self.unit),
        }
    }
}

/// Per-unit results of one batch run, in declared unit order.
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub dry_run: bool,
    pub outcomes: Vec<UnitOutcome>,
    /// Units never started because an earlier unit failed (fail-fast).
    pub skipped: Vec<String>,
}

impl BatchReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            ..Self::default()
        }
    }

    pub fn failed_units(&self) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|o| !o.succeeded())
            .map(|o| o.unit.clone())
            .collect()
    }

    pub fn succeeded_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded()).count()
    }

    /// Emit the run summary: successes first, then skipped units, then
    /// failures, so the last lines name what went wrong.
    pub fn log(&self) {
        info!(
            dry_run = self.dry_run,
            succeeded = self.succeeded_count(),
            failed = self.outcomes.len() - self.succeeded_count(),
            skipped = self.skipped.len(),
            "batch summary"
        );
        for o in self.outcomes.iter().filter(|o| o.succeeded()) {
            info!("{}", o.summarize());
        }
        for unit in &self.skipped {
            warn!("unit={unit} status=SKIPPED");
        }
        for o in self.outcomes.iter().filter(|o| !o.succeeded()) {
            error!("{}", o.summarize());
        }
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}
