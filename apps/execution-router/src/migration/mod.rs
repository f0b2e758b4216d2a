//! Phased canary-rollout orchestration for adapter migrations.
//!
//! Drives adoption of a new execution implementation through testnet
//! validation, a production canary and stepped traffic increases, gated on
//! adapter health and rolling back automatically on sustained
//! unhealthiness.

mod orchestrator;
mod state;

pub use orchestrator::{MigrationOrchestrator, MigrationSettings};
pub use state::{
    HEALTH_CHECK_LIMIT, MigrationCheck, MigrationPhase, MigrationState, MigrationStateStore,
};

use thiserror::Error;

use crate::error::AdapterError;

/// Errors from migration orchestration.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A validation gate failed; forward progress is halted.
    #[error("migration validation failed: {0}")]
    Validation(String),

    /// Operation called in the wrong phase.
    #[error("operation requires phase {expected}, but migration is {actual}")]
    WrongPhase {
        /// Phase the operation requires.
        expected: MigrationPhase,
        /// Phase the migration is actually in.
        actual: MigrationPhase,
    },

    /// Migration state could not be persisted or loaded.
    #[error("migration state persistence failed: {0}")]
    Persistence(String),

    /// An adapter call failed during orchestration.
    #[error("adapter error during migration: {0}")]
    Adapter(#[from] AdapterError),
}
