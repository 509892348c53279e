//! Job class registry: resolves a task-definition's `job.class` string to
//! a constructor at startup.
//!
//! Mirrors `gator-core::harness::registry::HarnessRegistry` -- an unknown
//! class is a fatal configuration error discovered at definition-load
//! time, not at run time (spec.md §9 "dynamic dispatch on task class").

use std::collections::HashMap;

use crate::executor::Job;
use crate::task_def::JobSpec;

/// Builds a [`Job`] from a [`JobSpec`]'s opaque `args`. Implementors
/// resolve a job class's specific argument shape (e.g. a shell command's
/// `program`/`args` keys).
pub trait JobClass: Send + Sync {
    /// The class name this builder answers to (matches `job.class`).
    fn name(&self) -> &str;

    /// Build a runnable [`Job`] from the spec's `args`/`timeout`.
    fn build(&self, spec: &JobSpec) -> anyhow::Result<Job>;
}

/// A collection of registered [`JobClass`] builders, keyed by name.
#[derive(Default)]
pub struct JobRegistry {
    classes: HashMap<String, Box<dyn JobClass>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job class. Replaces and returns any previous builder
    /// registered under the same name.
    pub fn register(&mut self, class: impl JobClass + 'static) -> Option<Box<dyn JobClass>> {
        let name = class.name().to_string();
        self.classes.insert(name, Box::new(class))
    }

    pub fn get(&self, name: &str) -> Option<&dyn JobClass> {
        self.classes.get(name).map(|b| b.as_ref())
    }

    pub fn list(&self) -> Vec<&str> {
        self.classes.keys().map(|s| s.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Build a job from a spec, erroring with the unresolved class name if
    /// no builder is registered for it.
    pub fn build(&self, spec: &JobSpec) -> anyhow::Result<Job> {
        let class = self
            .get(&spec.class)
            .ok_or_else(|| anyhow::anyhow!("unknown job class: {}", spec.class))?;
        class.build(spec)
    }
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("classes", &self.classes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// The `shell` job class: runs `args.program` with `args.args`, the
/// default job class every task-definition file can rely on existing.
pub struct ShellJobClass;

impl JobClass for ShellJobClass {
    fn name(&self) -> &str {
        "shell"
    }

    fn build(&self, spec: &JobSpec) -> anyhow::Result<Job> {
        let program = spec
            .args
            .get("program")
            .and_then(|v| v.as_str())
            .unwrap_or("true")
            .to_string();
        let args = spec
            .args
            .get("args")
            .and_then(|v| v.as_sequence())
            .map(|seq| {
                seq.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let timeout = std::time::Duration::from_secs(spec.timeout.unwrap_or(0));
        Ok(Job {
            program,
            args,
            timeout,
        })
    }
}
