//! Core domain types and scheduling algorithms for the distributed CI task
//! runner: the Queue, Claim Protocol, Resource Budget, and Executor, plus
//! the `Platform` trait that is the seam to the hosted code-review
//! platform.

pub mod budget;
pub mod claim;
pub mod error;
pub mod executor;
pub mod lease;
pub mod model;
pub mod platform;
pub mod queue;
pub mod reboot;
pub mod registry;
pub mod scheduler;
pub mod task_def;
pub mod workdir;
