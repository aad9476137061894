//! Core status and classification types shared across the engine.
//!
//! Everything here persists as short strings (job status columns, event rows,
//! cache rows), so each enum carries an `as_str`/`parse` pair alongside its
//! serde derive. `JobStatus` additionally owns the legal state machine for
//! job transitions; the persistence layer rejects anything it does not allow.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a job or of a single step within it.
///
/// Legal transitions:
///
/// ```text
/// Pending     -> Validating | Running | Cancelled | Failed
/// Validating  -> Running | Failed | Cancelled
/// Running     -> Paused | Completed | Failed | Cancelled
/// Paused      -> Running | Cancelled | Failed
/// Completed / Failed / Cancelled are terminal.
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Validating,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Validating => "validating",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Parse a persisted status string. Unknown strings yield `None` so the
    /// caller can surface a corruption error instead of guessing.
    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => JobStatus::Pending,
            "validating" => JobStatus::Validating,
            "running" => JobStatus::Running,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => return None,
        })
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Self-transitions are allowed for non-terminal states so that progress
    /// updates (`Running -> Running` with a new step index) are ordinary
    /// status writes.
    #[must_use]
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self.is_terminal() {
            return false;
        }
        if *self == next {
            return true;
        }
        match (self, next) {
            (Pending, Validating | Running | Cancelled | Failed) => true,
            (Validating, Running | Failed | Cancelled) => true,
            (Running, Paused | Completed | Failed | Cancelled) => true,
            (Paused, Running | Cancelled | Failed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a checkpoint was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Automatic,
    BeforeStep,
    AfterStep,
    Manual,
    PreError,
    PausePoint,
}

impl CheckpointKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::Automatic => "automatic",
            CheckpointKind::BeforeStep => "before_step",
            CheckpointKind::AfterStep => "after_step",
            CheckpointKind::Manual => "manual",
            CheckpointKind::PreError => "pre_error",
            CheckpointKind::PausePoint => "pause_point",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "automatic" => CheckpointKind::Automatic,
            "before_step" => CheckpointKind::BeforeStep,
            "after_step" => CheckpointKind::AfterStep,
            "manual" => CheckpointKind::Manual,
            "pre_error" => CheckpointKind::PreError,
            "pause_point" => CheckpointKind::PausePoint,
            _ => return None,
        })
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome classification for one mapping-path attempt or one per-identifier
/// result produced by the path runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PathStatus {
    Pending,
    Success,
    Failure,
    Partial,
    NoMappingFound,
    NoPathFound,
    TimedOut,
    Error,
    Skipped,
    ExecutionError,
}

impl PathStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PathStatus::Pending => "pending",
            PathStatus::Success => "success",
            PathStatus::Failure => "failure",
            PathStatus::Partial => "partial",
            PathStatus::NoMappingFound => "no_mapping_found",
            PathStatus::NoPathFound => "no_path_found",
            PathStatus::TimedOut => "timed_out",
            PathStatus::Error => "error",
            PathStatus::Skipped => "skipped",
            PathStatus::ExecutionError => "execution_error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "pending" => PathStatus::Pending,
            "success" => PathStatus::Success,
            "failure" => PathStatus::Failure,
            "partial" => PathStatus::Partial,
            "no_mapping_found" => PathStatus::NoMappingFound,
            "no_path_found" => PathStatus::NoPathFound,
            "timed_out" => PathStatus::TimedOut,
            "error" => PathStatus::Error,
            "skipped" => PathStatus::Skipped,
            "execution_error" => PathStatus::ExecutionError,
            _ => return None,
        })
    }
}

impl fmt::Display for PathStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction a mapping path was executed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingDirection {
    Forward,
    Reverse,
}

impl MappingDirection {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingDirection::Forward => "forward",
            MappingDirection::Reverse => "reverse",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "forward" => MappingDirection::Forward,
            "reverse" => MappingDirection::Reverse,
            _ => return None,
        })
    }

    #[must_use]
    pub fn from_reverse_flag(is_reverse: bool) -> Self {
        if is_reverse {
            MappingDirection::Reverse
        } else {
            MappingDirection::Forward
        }
    }
}

impl fmt::Display for MappingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of resource that produced a cached mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MappingSource {
    Api,
    Spoke,
    Rag,
    Llm,
    Ramp,
}

impl MappingSource {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MappingSource::Api => "api",
            MappingSource::Spoke => "spoke",
            MappingSource::Rag => "rag",
            MappingSource::Llm => "llm",
            MappingSource::Ramp => "ramp",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "api" => MappingSource::Api,
            "spoke" => MappingSource::Spoke,
            "rag" => MappingSource::Rag,
            "llm" => MappingSource::Llm,
            "ramp" => MappingSource::Ramp,
            _ => return None,
        })
    }
}

impl fmt::Display for MappingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity attached to execution log lines and job events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            _ => return None,
        })
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
