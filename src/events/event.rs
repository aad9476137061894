use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::LogLevel;

/// The fixed vocabulary of observable job events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    JobCreated,
    StatusChange,
    StepStarted,
    StepCompleted,
    StepFailed,
    CheckpointCreated,
    Progress,
    Log,
    Error,
    Complete,
}

impl EventKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::JobCreated => "job_created",
            EventKind::StatusChange => "status_change",
            EventKind::StepStarted => "step_started",
            EventKind::StepCompleted => "step_completed",
            EventKind::StepFailed => "step_failed",
            EventKind::CheckpointCreated => "checkpoint_created",
            EventKind::Progress => "progress",
            EventKind::Log => "log",
            EventKind::Error => "error",
            EventKind::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "job_created" => EventKind::JobCreated,
            "status_change" => EventKind::StatusChange,
            "step_started" => EventKind::StepStarted,
            "step_completed" => EventKind::StepCompleted,
            "step_failed" => EventKind::StepFailed,
            "checkpoint_created" => EventKind::CheckpointCreated,
            "progress" => EventKind::Progress,
            "log" => EventKind::Log,
            "error" => EventKind::Error,
            "complete" => EventKind::Complete,
            _ => return None,
        })
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observable event emitted by the engine on behalf of a job.
///
/// Events flow through the in-process hub to live subscribers and are also
/// persisted for late subscribers and audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: Uuid,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub severity: LogLevel,
    #[serde(default)]
    pub step_index: Option<u32>,
    #[serde(default)]
    pub step_name: Option<String>,
    pub data: Value,
    #[serde(default)]
    pub message: Option<String>,
}

impl JobEvent {
    #[must_use]
    pub fn new(job_id: Uuid, kind: EventKind, data: Value) -> Self {
        Self {
            job_id,
            kind,
            timestamp: Utc::now(),
            severity: LogLevel::Info,
            step_index: None,
            step_name: None,
            data,
            message: None,
        }
    }

    #[must_use]
    pub fn with_step(mut self, index: u32, name: impl Into<String>) -> Self {
        self.step_index = Some(index);
        self.step_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_severity(mut self, severity: LogLevel) -> Self {
        self.severity = severity;
        self
    }

    /// Normalized JSON shape used by the JSON-lines sink and transports.
    #[must_use]
    pub fn to_json_value(&self) -> Value {
        serde_json::json!({
            "job_id": self.job_id.to_string(),
            "type": self.kind.as_str(),
            "timestamp": self.timestamp.to_rfc3339(),
            "severity": self.severity.as_str(),
            "step_index": self.step_index,
            "step_name": self.step_name,
            "data": self.data,
            "message": self.message,
        })
    }
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.step_name, &self.message) {
            (Some(step), Some(msg)) => {
                write!(f, "[{} {}@{}] {}", self.job_id, self.kind, step, msg)
            }
            (Some(step), None) => write!(f, "[{} {}@{}]", self.job_id, self.kind, step),
            (None, Some(msg)) => write!(f, "[{} {}] {}", self.job_id, self.kind, msg),
            (None, None) => write!(f, "[{} {}]", self.job_id, self.kind),
        }
    }
}
