//! Core domain types: pull requests, commits, statuses, and labels.
//!
//! Every enum here round-trips through `Display`/`FromStr` because each one
//! also has to round-trip through the platform's wire representation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An opaque commit identifier (a SHA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Commit(pub String);

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Commit {
    fn from(s: String) -> Self {
        Commit(s)
    }
}

impl From<&str> for Commit {
    fn from(s: &str) -> Self {
        Commit(s.to_string())
    }
}

/// A pull request's mergeability as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mergeability {
    Mergeable,
    Conflicting,
    Unknown,
}

/// A label with system-defined semantics. Unrecognized labels parse as
/// `Other` rather than erroring, since the platform's label set is not
/// closed.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Label {
    Ack,
    ReRun,
    NeedsRebase,
    Postponed,
    Prioritize,
    Blacklisted,
    Other(String),
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Label::Ack => "ack",
            Label::ReRun => "re-run",
            Label::NeedsRebase => "needs rebase",
            Label::Postponed => "postponed",
            Label::Prioritize => "prioritize",
            Label::Blacklisted => "blacklisted",
            Label::Other(s) => s,
        };
        write!(f, "{s}")
    }
}

impl FromStr for Label {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ack" => Label::Ack,
            "re-run" => Label::ReRun,
            "needs rebase" => Label::NeedsRebase,
            "postponed" => Label::Postponed,
            "prioritize" => Label::Prioritize,
            "blacklisted" => Label::Blacklisted,
            other => Label::Other(other.to_string()),
        })
    }
}

/// A pull request (change-proposal).
#[derive(Debug, Clone)]
pub struct PullRequest {
    pub number: u64,
    pub author: String,
    pub base_branch: String,
    pub mergeable: Mergeability,
    pub labels: Vec<Label>,
    pub head: Commit,
}

impl PullRequest {
    pub fn has_label(&self, label: &Label) -> bool {
        self.labels.contains(label)
    }
}

/// Error returned when a string does not parse as a [`TaskState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskStateParseError(pub String);

impl fmt::Display for TaskStateParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task state: {:?}", self.0)
    }
}

impl std::error::Error for TaskStateParseError {}

/// The four states a commit status can carry, matching the platform's
/// status enum exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    Pending,
    Success,
    Failure,
    Error,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Pending => "pending",
            TaskState::Success => "success",
            TaskState::Failure => "failure",
            TaskState::Error => "error",
        };
        write!(f, "{s}")
    }
}

impl FromStr for TaskState {
    type Err = TaskStateParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskState::Pending),
            "success" => Ok(TaskState::Success),
            "failure" => Ok(TaskState::Failure),
            "error" => Ok(TaskState::Error),
            other => Err(TaskStateParseError(other.to_string())),
        }
    }
}

/// A commit status: the unit the claim protocol operates on.
///
/// `context` is the task name; `description` encodes ownership via
/// [`crate::lease`]'s format, or the literals `unassigned` / `pending for
/// rerun`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub context: String,
    pub state: TaskState,
    pub description: String,
    pub target_url: Option<String>,
}

impl Status {
    pub const UNASSIGNED: &'static str = "unassigned";
    pub const PENDING_FOR_RERUN: &'static str = "pending for rerun";

    pub fn unassigned(context: impl Into<String>) -> Self {
        Status {
            context: context.into(),
            state: TaskState::Pending,
            description: Self::UNASSIGNED.to_string(),
            target_url: None,
        }
    }

    pub fn is_unassigned(&self) -> bool {
        self.state == TaskState::Pending && self.description == Self::UNASSIGNED
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            TaskState::Success | TaskState::Failure | TaskState::Error
        )
    }
}
