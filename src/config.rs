use std::path::{Path, PathBuf};

use crate::batch::{BatchOptions, FailurePolicy};
use crate::bounded_executor::{MAX_WORKERS, MIN_WORKERS};
use crate::error::{DeployError, Result};

/// Validated options for one CLI invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub spec_path: PathBuf,
    pub log_file: Option<PathBuf>,
    pub parallelism: usize,
    pub dry_run: bool,
    /// Sequential mode only: keep deploying after a unit fails.
    pub keep_going: bool,
    pub debug: bool,
}

impl RunOptions {
    pub fn new(spec_path: impl Into<PathBuf>) -> Self {
        Self {
            spec_path: spec_path.into(),
            log_file: None,
            parallelism: 1,
            dry_run: false,
            keep_going: false,
            debug: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.spec_path.as_os_str().is_empty() {
            return Err(DeployError::Config("spec path must not be empty".to_string()));
        }
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&self.parallelism) {
            return Err(DeployError::Config(format!(
                "--parallelism must be between {MIN_WORKERS} and {MAX_WORKERS} (got {})",
                self.parallelism
            )));
        }
        Ok(())
    }

    /// Directory that relative template and parameter paths resolve against.
    pub fn spec_base_dir(&self) -> PathBuf {
        self.spec_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .to_path_buf()
    }

    pub fn batch_options(&self) -> BatchOptions {
        let failure_policy = if self.keep_going || self.parallelism > 1 {
            FailurePolicy::CollectAll
        } else {
            FailurePolicy::FailFast
        };
        BatchOptions {
            parallelism: self.parallelism,
            dry_run: self.dry_run,
            failure_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sequential_fail_fast() {
        let opts = RunOptions::new("spec.json");
        opts.validate().unwrap();
        let batch = opts.batch_options();
        assert_eq!(batch.parallelism, 1);
        assert_eq!(batch.failure_policy, FailurePolicy::FailFast);
        assert_eq!(opts.spec_base_dir(), PathBuf::from("."));
    }

    #[test]
    fn parallelism_is_bounded() {
        for parallelism in [0, 65] {
            let opts = RunOptions {
                parallelism,
                ..RunOptions::new("spec.json")
            };
            let err = opts.validate().unwrap_err();
            assert!(err.to_string().contains("--parallelism"), "{err}");
        }
    }

    #[test]
    fn keep_going_and_parallel_collect_all() {
        let opts = RunOptions {
            keep_going: true,
            ..RunOptions::new("deploy/spec.json")
        };
        assert_eq!(opts.batch_options().failure_policy, FailurePolicy::CollectAll);
        assert_eq!(opts.spec_base_dir(), PathBuf::from("deploy"));

        let opts = RunOptions {
            parallelism: 4,
            ..RunOptions::new("spec.json")
        };
        assert_eq!(opts.batch_options().failure_policy, FailurePolicy::CollectAll);
    }

    #[test]
    fn empty_spec_path_is_rejected() {
        assert!(RunOptions::new("").validate().is_err());
    }
}
