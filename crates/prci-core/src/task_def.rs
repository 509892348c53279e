//! Task-definition file parsing: the YAML document at `tasks_file` that
//! enumerates a PR's tasks.

use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;
use thiserror::Error;

/// The CPU/memory (and optional name) resource request of a task.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Topology {
    pub cpu: u32,
    pub memory: u64,
    #[serde(default)]
    pub name: Option<String>,
}

/// The job a task runs: a class name the runner resolves via its job
/// registry, plus opaque arguments and an optional topology/timeout.
#[derive(Debug, Clone, Deserialize)]
pub struct JobSpec {
    pub class: String,
    #[serde(default)]
    pub args: BTreeMap<String, serde_yaml::Value>,
    #[serde(default)]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub topology: Option<Topology>,
}

/// A single named task entry from the task-definition document.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskEntry {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub requires: BTreeSet<String>,
    pub job: JobSpec,
}

#[derive(Debug, Deserialize)]
struct RawDocument {
    jobs: BTreeMap<String, TaskEntry>,
}

/// A parsed task-definition document: the full `jobs` mapping for one PR's
/// head (or base) commit.
#[derive(Debug, Clone, Default)]
pub struct TaskDefinition {
    pub jobs: BTreeMap<String, TaskEntry>,
}

/// Errors loading or parsing a task-definition document. Per spec.md §4.1,
/// these are always local to a single PR: the caller skips the PR and
/// continues the scan rather than propagating.
#[derive(Debug, Error)]
pub enum TaskDefError {
    #[error("task definition file not found")]
    NotFound,
    #[error("task definition is not valid YAML: {0}")]
    Malformed(#[from] serde_yaml::Error),
    #[error("task references unknown job class {0:?}")]
    UnknownJobClass(String),
}

impl TaskDefinition {
    /// Parse a task-definition document from its raw YAML bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, TaskDefError> {
        let raw: RawDocument = serde_yaml::from_slice(bytes)?;
        Ok(TaskDefinition { jobs: raw.jobs })
    }

    /// The set of task names this definition declares.
    pub fn task_names(&self) -> BTreeSet<String> {
        self.jobs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"
jobs:
  a:
    priority: 1
    job:
      class: shell
  b:
    priority: 2
    requires: [a]
    job:
      class: shell
      timeout: 3600
      topology:
        cpu: 4
        memory: 8589934592
  c:
    requires: [a]
    job:
      class: shell
"#;

    #[test]
    fn parses_jobs_mapping() {
        let def = TaskDefinition::parse(DOC.as_bytes()).unwrap();
        assert_eq!(def.task_names(), ["a", "b", "c"].into_iter().map(String::from).collect());
    }

    #[test]
    fn parses_requires_and_topology() {
        let def = TaskDefinition::parse(DOC.as_bytes()).unwrap();
        let b = &def.jobs["b"];
        assert_eq!(b.priority, 2);
        assert!(b.requires.contains("a"));
        let topo = b.job.topology.as_ref().unwrap();
        assert_eq!(topo.cpu, 4);
        assert_eq!(topo.memory, 8_589_934_592);
    }

    #[test]
    fn defaults_requires_to_empty_and_priority_to_zero() {
        let def = TaskDefinition::parse(DOC.as_bytes()).unwrap();
        // "a" declares no `requires`; "c" declares no `priority`.
        let a = &def.jobs["a"];
        assert!(a.requires.is_empty());
        assert!(a.job.topology.is_none());
        let c = &def.jobs["c"];
        assert_eq!(c.priority, 0);
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let err = TaskDefinition::parse(b"not: [valid: yaml: at all").unwrap_err();
        assert!(matches!(err, TaskDefError::Malformed(_)));
    }

    #[test]
    fn missing_jobs_key_is_an_error() {
        let err = TaskDefinition::parse(b"not_jobs: {}").unwrap_err();
        assert!(matches!(err, TaskDefError::Malformed(_)));
    }
}
