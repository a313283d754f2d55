//! `stratus` deployment orchestration library.
//!
//! Loads a JSON deployment spec (`spec`, `schema`), normalizes it into
//! immutable units (`normalize`), and deploys each unit through a fixed
//! pipeline (`orchestrator`): resource group (`provision`), template apply
//! with retry/backoff (`retry`), and status verification (`verify`). The
//! `batch` runner fans units out sequentially or over a bounded worker pool
//! (`bounded_executor`). Cloud calls go through the `provider` trait; `az`
//! implements it with the Azure CLI.
//!
//! Invariants:
//! - parameter overrides always win over parameter file values
//! - file, integrity and naming errors abort a unit before any mutating call
//! - only template apply failures are retried
//! - every log line is redacted before it reaches a sink

pub mod az;
pub mod batch;
pub mod bounded_executor;
pub mod checksum;
pub mod config;
pub mod error;
pub mod logging;
pub mod normalize;
pub mod orchestrator;
pub mod parameters;
pub mod plan;
pub mod provider;
pub mod provision;
pub mod redact;
pub mod report;
pub mod retry;
pub mod schema;
pub mod spec;
pub mod verify;

pub use error::{DeployError, Result};
