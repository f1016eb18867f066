// Automation persistence - repository trait plus the Postgres implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sponsorhub_shared::LastRunStatus;
use uuid::Uuid;

use super::model::{
    AutomationDefinition, Continuation, Execution, ExecutionStatus, RunMode, Step, StepResult,
};
use super::triggers::TriggerKind;

#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored row {id} is malformed: {reason}")]
    Corrupt { id: Uuid, reason: String },
}

/// Persistence seam of the engine. The Postgres implementation backs the
/// running service; tests substitute an in-memory one.
#[async_trait]
pub trait AutomationRepo: Send + Sync {
    async fn list_definitions(&self, club_id: Uuid) -> Result<Vec<AutomationDefinition>, RepoError>;
    async fn list_enabled(&self) -> Result<Vec<AutomationDefinition>, RepoError>;
    async fn get_definition(
        &self,
        club_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AutomationDefinition>, RepoError>;
    async fn insert_definition(&self, definition: &AutomationDefinition) -> Result<(), RepoError>;
    async fn update_definition(&self, definition: &AutomationDefinition)
        -> Result<bool, RepoError>;
    async fn delete_definition(&self, club_id: Uuid, id: Uuid) -> Result<bool, RepoError>;
    async fn set_enabled(
        &self,
        club_id: Uuid,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<AutomationDefinition>, RepoError>;

    /// Record a finished run on the definition's counters. Single atomic
    /// statement so concurrent runs never lose an increment.
    async fn bump_stats(
        &self,
        id: Uuid,
        last_run: DateTime<Utc>,
        status: LastRunStatus,
    ) -> Result<(), RepoError>;

    /// Record that a schedule trigger fired at `at`. Schedule due-ness reads
    /// this instead of `last_run`, which test runs also bump.
    async fn mark_triggered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepoError>;

    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepoError>;
    async fn append_step_result(
        &self,
        execution_id: Uuid,
        result: &StepResult,
    ) -> Result<(), RepoError>;
    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), RepoError>;
    async fn get_execution(
        &self,
        club_id: Uuid,
        execution_id: Uuid,
    ) -> Result<Option<Execution>, RepoError>;
    async fn list_executions(
        &self,
        club_id: Uuid,
        automation_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Execution>, i64), RepoError>;

    async fn schedule_continuation(&self, continuation: &Continuation) -> Result<(), RepoError>;
    /// Drop pending resumes for one automation (used when it is disabled,
    /// deleted, or its step chain is edited).
    async fn cancel_continuations(&self, automation_id: Uuid) -> Result<u64, RepoError>;
    /// Atomically claim every continuation due at `now`. Claimed rows are
    /// removed, so two pollers never resume the same execution.
    async fn claim_due_continuations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Continuation>, RepoError>;

    /// Claim the right to dispatch `(automation, key)`. Returns false when
    /// another dispatcher already claimed it.
    async fn claim_dispatch(&self, automation_id: Uuid, key: &str) -> Result<bool, RepoError>;

    /// Delete finished executions older than `before`. Returns rows removed.
    async fn cleanup_executions(&self, before: DateTime<Utc>) -> Result<u64, RepoError>;
}

// ---------------------------------------------------------------------------
// Postgres implementation

#[derive(Debug, sqlx::FromRow)]
struct DefinitionRow {
    id: Uuid,
    club_id: Uuid,
    name: String,
    description: Option<String>,
    trigger_type: Option<String>,
    trigger_config: serde_json::Value,
    steps: serde_json::Value,
    enabled: bool,
    executions_count: i64,
    last_run: Option<DateTime<Utc>>,
    last_status: String,
    last_triggered_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl TryFrom<DefinitionRow> for AutomationDefinition {
    type Error = RepoError;

    fn try_from(row: DefinitionRow) -> Result<Self, RepoError> {
        let corrupt = |reason: String| RepoError::Corrupt { id: row.id, reason };

        let trigger_type = row
            .trigger_type
            .as_deref()
            .map(|s| s.parse::<TriggerKind>())
            .transpose()
            .map_err(corrupt)?;
        let last_status = row
            .last_status
            .parse::<LastRunStatus>()
            .map_err(|e| RepoError::Corrupt {
                id: row.id,
                reason: e,
            })?;
        let steps: Vec<Step> = serde_json::from_value(row.steps).map_err(|e| RepoError::Corrupt {
            id: row.id,
            reason: format!("steps column: {e}"),
        })?;

        Ok(AutomationDefinition {
            id: row.id,
            club_id: row.club_id,
            name: row.name,
            description: row.description,
            trigger_type,
            trigger_config: row.trigger_config,
            steps,
            enabled: row.enabled,
            executions_count: row.executions_count,
            last_run: row.last_run,
            last_status,
            last_triggered_at: row.last_triggered_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ExecutionRow {
    id: Uuid,
    automation_id: Uuid,
    club_id: Uuid,
    mode: String,
    status: String,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    step_results: serde_json::Value,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = RepoError;

    fn try_from(row: ExecutionRow) -> Result<Self, RepoError> {
        let status = row.status.parse::<ExecutionStatus>().map_err(|e| RepoError::Corrupt {
            id: row.id,
            reason: e,
        })?;
        let mode = match row.mode.as_str() {
            "triggered" => RunMode::Triggered,
            "test" => RunMode::Test,
            other => {
                return Err(RepoError::Corrupt {
                    id: row.id,
                    reason: format!("unknown run mode '{other}'"),
                })
            }
        };
        let step_results: Vec<StepResult> =
            serde_json::from_value(row.step_results).map_err(|e| RepoError::Corrupt {
                id: row.id,
                reason: format!("step_results column: {e}"),
            })?;

        Ok(Execution {
            id: row.id,
            automation_id: row.automation_id,
            club_id: row.club_id,
            mode,
            status,
            started_at: row.started_at,
            finished_at: row.finished_at,
            step_results,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ContinuationRow {
    id: Uuid,
    execution_id: Uuid,
    automation_id: Uuid,
    club_id: Uuid,
    resume_step: i32,
    resume_step_id: Uuid,
    resume_at: DateTime<Utc>,
    context: serde_json::Value,
    mode: String,
}

impl TryFrom<ContinuationRow> for Continuation {
    type Error = RepoError;

    fn try_from(row: ContinuationRow) -> Result<Self, RepoError> {
        let mode = match row.mode.as_str() {
            "triggered" => RunMode::Triggered,
            "test" => RunMode::Test,
            other => {
                return Err(RepoError::Corrupt {
                    id: row.id,
                    reason: format!("unknown run mode '{other}'"),
                })
            }
        };
        Ok(Continuation {
            id: row.id,
            execution_id: row.execution_id,
            automation_id: row.automation_id,
            club_id: row.club_id,
            resume_step: row.resume_step as usize,
            resume_step_id: row.resume_step_id,
            resume_at: row.resume_at,
            context: row.context,
            mode,
        })
    }
}

const DEFINITION_COLUMNS: &str = "id, club_id, name, description, trigger_type, trigger_config, \
     steps, enabled, executions_count, last_run, last_status, last_triggered_at, created_at, \
     updated_at";

pub struct PgAutomationRepo {
    pool: PgPool,
}

impl PgAutomationRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AutomationRepo for PgAutomationRepo {
    async fn list_definitions(&self, club_id: Uuid) -> Result<Vec<AutomationDefinition>, RepoError> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM automations WHERE club_id = $1 ORDER BY created_at DESC"
        ))
        .bind(club_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn list_enabled(&self) -> Result<Vec<AutomationDefinition>, RepoError> {
        let rows: Vec<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM automations WHERE enabled = TRUE AND trigger_type IS NOT NULL"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get_definition(
        &self,
        club_id: Uuid,
        id: Uuid,
    ) -> Result<Option<AutomationDefinition>, RepoError> {
        let row: Option<DefinitionRow> = sqlx::query_as(&format!(
            "SELECT {DEFINITION_COLUMNS} FROM automations WHERE club_id = $1 AND id = $2"
        ))
        .bind(club_id)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn insert_definition(&self, definition: &AutomationDefinition) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO automations \
             (id, club_id, name, description, trigger_type, trigger_config, steps, enabled, \
              executions_count, last_run, last_status, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(definition.id)
        .bind(definition.club_id)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.trigger_type.map(|t| t.as_str()))
        .bind(&definition.trigger_config)
        .bind(serde_json::to_value(&definition.steps).unwrap_or_default())
        .bind(definition.enabled)
        .bind(definition.executions_count)
        .bind(definition.last_run)
        .bind(definition.last_status.as_str())
        .bind(definition.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_definition(
        &self,
        definition: &AutomationDefinition,
    ) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "UPDATE automations SET name = $3, description = $4, trigger_type = $5, \
             trigger_config = $6, steps = $7, enabled = $8, updated_at = NOW() \
             WHERE club_id = $1 AND id = $2",
        )
        .bind(definition.club_id)
        .bind(definition.id)
        .bind(&definition.name)
        .bind(&definition.description)
        .bind(definition.trigger_type.map(|t| t.as_str()))
        .bind(&definition.trigger_config)
        .bind(serde_json::to_value(&definition.steps).unwrap_or_default())
        .bind(definition.enabled)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_definition(&self, club_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM automations WHERE club_id = $1 AND id = $2")
            .bind(club_id)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_enabled(
        &self,
        club_id: Uuid,
        id: Uuid,
        enabled: bool,
    ) -> Result<Option<AutomationDefinition>, RepoError> {
        let row: Option<DefinitionRow> = sqlx::query_as(&format!(
            "UPDATE automations SET enabled = $3, updated_at = NOW() \
             WHERE club_id = $1 AND id = $2 RETURNING {DEFINITION_COLUMNS}"
        ))
        .bind(club_id)
        .bind(id)
        .bind(enabled)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn bump_stats(
        &self,
        id: Uuid,
        last_run: DateTime<Utc>,
        status: LastRunStatus,
    ) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE automations SET executions_count = executions_count + 1, \
             last_run = $2, last_status = $3 WHERE id = $1",
        )
        .bind(id)
        .bind(last_run)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_triggered(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), RepoError> {
        sqlx::query("UPDATE automations SET last_triggered_at = $2 WHERE id = $1")
            .bind(id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_execution(&self, execution: &Execution) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO automation_executions \
             (id, automation_id, club_id, mode, status, started_at, step_results) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(execution.id)
        .bind(execution.automation_id)
        .bind(execution.club_id)
        .bind(execution.mode.as_str())
        .bind(execution.status.as_str())
        .bind(execution.started_at)
        .bind(serde_json::to_value(&execution.step_results).unwrap_or_default())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_step_result(
        &self,
        execution_id: Uuid,
        result: &StepResult,
    ) -> Result<(), RepoError> {
        let entry = serde_json::to_value(result).unwrap_or_default();
        sqlx::query(
            "UPDATE automation_executions \
             SET step_results = step_results || jsonb_build_array($2::jsonb) WHERE id = $1",
        )
        .bind(execution_id)
        .bind(entry)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: Uuid,
        status: ExecutionStatus,
        finished_at: DateTime<Utc>,
    ) -> Result<(), RepoError> {
        sqlx::query(
            "UPDATE automation_executions SET status = $2, finished_at = $3 WHERE id = $1",
        )
        .bind(execution_id)
        .bind(status.as_str())
        .bind(finished_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_execution(
        &self,
        club_id: Uuid,
        execution_id: Uuid,
    ) -> Result<Option<Execution>, RepoError> {
        let row: Option<ExecutionRow> = sqlx::query_as(
            "SELECT id, automation_id, club_id, mode, status, started_at, finished_at, step_results \
             FROM automation_executions WHERE club_id = $1 AND id = $2",
        )
        .bind(club_id)
        .bind(execution_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list_executions(
        &self,
        club_id: Uuid,
        automation_id: Uuid,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Execution>, i64), RepoError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM automation_executions WHERE club_id = $1 AND automation_id = $2",
        )
        .bind(club_id)
        .bind(automation_id)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<ExecutionRow> = sqlx::query_as(
            "SELECT id, automation_id, club_id, mode, status, started_at, finished_at, step_results \
             FROM automation_executions WHERE club_id = $1 AND automation_id = $2 \
             ORDER BY started_at DESC OFFSET $3 LIMIT $4",
        )
        .bind(club_id)
        .bind(automation_id)
        .bind(offset)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let executions = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((executions, total))
    }

    async fn schedule_continuation(&self, continuation: &Continuation) -> Result<(), RepoError> {
        sqlx::query(
            "INSERT INTO automation_continuations \
             (id, execution_id, automation_id, club_id, resume_step, resume_step_id, resume_at, \
              context, mode) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(continuation.id)
        .bind(continuation.execution_id)
        .bind(continuation.automation_id)
        .bind(continuation.club_id)
        .bind(continuation.resume_step as i32)
        .bind(continuation.resume_step_id)
        .bind(continuation.resume_at)
        .bind(&continuation.context)
        .bind(continuation.mode.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn cancel_continuations(&self, automation_id: Uuid) -> Result<u64, RepoError> {
        let result =
            sqlx::query("DELETE FROM automation_continuations WHERE automation_id = $1")
                .bind(automation_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }

    async fn claim_due_continuations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Continuation>, RepoError> {
        let rows: Vec<ContinuationRow> = sqlx::query_as(
            "DELETE FROM automation_continuations WHERE resume_at <= $1 \
             RETURNING id, execution_id, automation_id, club_id, resume_step, resume_step_id, \
             resume_at, context, mode",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn claim_dispatch(&self, automation_id: Uuid, key: &str) -> Result<bool, RepoError> {
        let result = sqlx::query(
            "INSERT INTO automation_dispatches (automation_id, dispatch_key, created_at) \
             VALUES ($1, $2, NOW()) ON CONFLICT (automation_id, dispatch_key) DO NOTHING",
        )
        .bind(automation_id)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn cleanup_executions(&self, before: DateTime<Utc>) -> Result<u64, RepoError> {
        let executions = sqlx::query(
            "DELETE FROM automation_executions WHERE finished_at IS NOT NULL AND finished_at < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;
        // Dispatch claims only guard recent duplicate deliveries, so they age
        // out on the same schedule.
        sqlx::query("DELETE FROM automation_dispatches WHERE created_at < $1")
            .bind(before)
            .execute(&self.pool)
            .await?;
        Ok(executions.rows_affected())
    }
}
