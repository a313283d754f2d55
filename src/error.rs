use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading, validating and executing a deployment spec.
///
/// Only [`DeployError::Provisioning`] is retried (by the executor in
/// [`crate::retry`]); every other variant is fatal for the unit that raised it.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("spec schema error: {0}")]
    Schema(String),

    #[error("file not found: '{}'", .0.display())]
    FileNotFound(PathBuf),

    #[error("malformed file '{}': {reason}", path.display())]
    Format { path: PathBuf, reason: String },

    #[error("unsupported checksum algorithm '{0}' (supported: sha256)")]
    UnsupportedAlgorithm(String),

    #[error("checksum mismatch for '{}': expected {expected}, actual {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid resource group name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("provisioning call failed: {0}")]
    Provisioning(String),

    #[error("deployment '{unit}' failed after {attempts} attempt(s): {last_error}")]
    DeploymentExhausted {
        unit: String,
        attempts: u32,
        last_error: String,
    },

    #[error("post-deployment verification failed for '{unit}': {reason}")]
    VerificationFailed { unit: String, reason: String },

    #[error("batch failed; failed deployment unit(s): {}", .units.join(", "))]
    BatchFailed { units: Vec<String> },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("worker pool failure: {0}")]
    Pool(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeployError {
    /// Wrap an error returned by the provisioning API, keeping its cause chain.
    pub fn provisioning(err: anyhow::Error) -> Self {
        DeployError::Provisioning(format!("{err:#}"))
    }
}

pub type Result<T> = std::result::Result<T, DeployError>;
