use serde::{Deserialize, Serialize};

use crate::agent_engine::loop_control::LoopGuard;

/// Phases a step moves through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Start,
    Observing,
    Deciding,
    Acting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StuckReason {
    LoopStall,
    StepCeiling,
    Deadline,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Finished { summary: String },
    Failed { reason: String },
    Stuck { reason: StuckReason },
    Aborted { error: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Finished { .. })
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Finished { summary } => write!(f, "finished: {summary}"),
            Self::Failed { reason } => write!(f, "failed: {reason}"),
            Self::Stuck { reason } => write!(f, "stuck: {reason:?}"),
            Self::Aborted { error } => write!(f, "aborted: {error}"),
        }
    }
}

/// One persisted step. Pushed once, never edited.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepRecord {
    pub step: u32,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// File name of the annotated screenshot, relative to the run directory.
    pub screenshot_ref: String,
    pub url: String,
    pub thought: String,
    pub action: String,
    pub params: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
}

/// Everything a run accumulates, owned by the orchestrator and passed into
/// each step.
#[derive(Debug)]
pub struct RunState {
    pub run_id: String,
    pub task: String,
    pub step: u32,
    pub phase: Phase,
    /// Index-free action descriptions fed back to the oracle.
    pub history: Vec<String>,
    pub records: Vec<StepRecord>,
    pub guard: LoopGuard,
}

impl RunState {
    pub fn new(task: impl Into<String>, stall_threshold: u32) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            task: task.into(),
            step: 0,
            phase: Phase::Start,
            history: Vec::new(),
            records: Vec::new(),
            guard: LoopGuard::new(stall_threshold),
        }
    }

    pub fn push_record(&mut self, record: StepRecord) {
        self.records.push(record);
    }
}

/// What a finished run hands back to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub outcome: RunOutcome,
    pub steps: u32,
    pub manifest_path: Option<std::path::PathBuf>,
}
