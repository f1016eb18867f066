// Automation data model - definitions, steps, executions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sponsorhub_shared::LastRunStatus;
use uuid::Uuid;

use super::registry::ActionKind;
use super::triggers::TriggerKind;

/// A persisted automation: one trigger plus an ordered chain of action steps.
///
/// Wire names for `name`/`description`/`enabled` keep compatibility with the
/// Italian field names the club portal sends (`nome`, `descrizione`,
/// `abilitata`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationDefinition {
    pub id: Uuid,
    pub club_id: Uuid,
    #[serde(rename = "nome")]
    pub name: String,
    #[serde(rename = "descrizione")]
    pub description: Option<String>,
    pub trigger_type: Option<TriggerKind>,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(rename = "abilitata")]
    pub enabled: bool,
    #[serde(default)]
    pub executions_count: i64,
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_status: LastRunStatus,
    /// When a schedule trigger last fired. Owned by the dispatcher: a manual
    /// test run bumps `last_run` but never this, so testing an automation
    /// cannot shift its schedule.
    #[serde(default)]
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AutomationDefinition {
    pub fn new(club_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            club_id,
            name: name.into(),
            description: None,
            trigger_type: None,
            trigger_config: serde_json::Value::Object(serde_json::Map::new()),
            steps: Vec::new(),
            enabled: false,
            executions_count: 0,
            last_run: None,
            last_status: LastRunStatus::None,
            last_triggered_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }
}

/// One configured unit of work within an automation's chain.
///
/// Step ids are stable: removing a step renumbers nothing, reordering only
/// changes sequence position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub config: serde_json::Value,
    /// Minutes to wait after the previous step completes (0 = immediate).
    /// The first step's delay is measured from trigger-fire time.
    #[serde(default)]
    pub delay_minutes: i64,
}

impl Step {
    pub fn new(kind: ActionKind, config: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            config,
            delay_minutes: 0,
        }
    }

    pub fn with_delay(mut self, minutes: i64) -> Self {
        self.delay_minutes = minutes;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Partial,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Partial => "partial",
        }
    }

    pub fn as_run_status(&self) -> LastRunStatus {
        match self {
            Self::Running => LastRunStatus::None,
            Self::Completed => LastRunStatus::Completed,
            Self::Failed => LastRunStatus::Failed,
            Self::Partial => LastRunStatus::Partial,
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "partial" => Ok(Self::Partial),
            other => Err(format!("unknown execution status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Triggered,
    Test,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Triggered => "triggered",
            Self::Test => "test",
        }
    }
}

/// Outcome of one step within an execution. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: Uuid,
    pub status: StepStatus,
    pub output_summary: Option<String>,
    pub error_message: Option<String>,
    pub executed_at: DateTime<Utc>,
}

impl StepResult {
    pub fn success(step_id: Uuid, summary: impl Into<String>) -> Self {
        Self {
            step_id,
            status: StepStatus::Success,
            output_summary: Some(summary.into()),
            error_message: None,
            executed_at: Utc::now(),
        }
    }

    pub fn failed(step_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            step_id,
            status: StepStatus::Failed,
            output_summary: None,
            error_message: Some(error.into()),
            executed_at: Utc::now(),
        }
    }

    pub fn skipped(step_id: Uuid) -> Self {
        Self {
            step_id,
            status: StepStatus::Skipped,
            output_summary: None,
            error_message: None,
            executed_at: Utc::now(),
        }
    }
}

/// One concrete run of an automation. Immutable once `status` leaves
/// `running`, except for the append-only `step_results`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: Uuid,
    pub automation_id: Uuid,
    pub club_id: Uuid,
    pub mode: RunMode,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub step_results: Vec<StepResult>,
}

impl Execution {
    pub fn start(automation_id: Uuid, club_id: Uuid, mode: RunMode) -> Self {
        Self {
            id: Uuid::new_v4(),
            automation_id,
            club_id,
            mode,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            step_results: Vec::new(),
        }
    }
}

/// Durable "resume execution X at step Y after T" entry. Delays between
/// steps are persisted as continuations rather than held in-process, so a
/// restart does not lose an in-flight multi-day automation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Continuation {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub automation_id: Uuid,
    pub club_id: Uuid,
    pub resume_step: usize,
    /// Id of the step at `resume_step` when the run was parked. A mismatch
    /// at resume time means the chain was edited underneath the run.
    pub resume_step_id: Uuid,
    pub resume_at: DateTime<Utc>,
    pub context: serde_json::Value,
    pub mode: RunMode,
}
