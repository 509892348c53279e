//! Per-component error taxonomy, matching the shape of
//! `gator-core::token::guard::GuardError`: one enum per component, each
//! variant a matchable failure mode rather than a free-text message.

use thiserror::Error;

use crate::model::Commit;

/// Errors from [`crate::queue`].
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("task definition invalid for PR #{pr}: {source}")]
    InvalidDefinition {
        pr: u64,
        #[source]
        source: crate::task_def::TaskDefError,
    },
    #[error("transient platform error during scan: {0}")]
    Transient(#[from] anyhow::Error),
}

/// Errors from [`crate::claim`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("task {context} on {commit} was already taken")]
    AlreadyTaken { commit: Commit, context: String },
}

/// Errors from [`crate::budget`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BudgetError {
    #[error("insufficient resources: requested ({cpu} cpu, {memory} mem), available ({avail_cpu} cpu, {avail_memory} mem)")]
    InsufficientResources {
        cpu: u32,
        memory: u64,
        avail_cpu: u32,
        avail_memory: u64,
    },
}

/// Errors from [`crate::executor`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("lease on {context} at {commit} was superseded before publishing")]
    Superseded { commit: Commit, context: String },
    #[error("job timed out after {0}s")]
    TimedOut(u64),
}
