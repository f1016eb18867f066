// Workflow executor - walks a definition's step chain and records the run

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::actions::{ActionRunner, Collaborators};
use super::model::{
    AutomationDefinition, Continuation, Execution, ExecutionStatus, RunMode, StepResult,
    StepStatus,
};
use super::registry::ActionKind;
use super::store::{AutomationRepo, RepoError};
use super::variables::{self, RuntimeContext};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("automation not found")]
    DefinitionNotFound,
    #[error("automation is disabled")]
    DefinitionDisabled,
    #[error("run context is missing required data: {0}")]
    InvalidContext(String),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

pub struct WorkflowExecutor {
    repo: Arc<dyn AutomationRepo>,
    runner: ActionRunner,
}

impl WorkflowExecutor {
    pub fn new(repo: Arc<dyn AutomationRepo>, collaborators: Arc<dyn Collaborators>) -> Self {
        Self {
            repo,
            runner: ActionRunner::new(collaborators),
        }
    }

    pub fn collaborators(&self) -> &Arc<dyn Collaborators> {
        self.runner.collaborators()
    }

    /// Start a run of `definition` from its first step.
    ///
    /// In `triggered` mode a step with a nonzero effective delay parks the
    /// run as a continuation and returns it still `running`; `test` mode
    /// runs the whole chain synchronously with delays elided.
    pub async fn run(
        &self,
        definition: &AutomationDefinition,
        context: RuntimeContext,
        mode: RunMode,
    ) -> Result<Execution, EngineError> {
        if mode == RunMode::Triggered && !definition.enabled {
            return Err(EngineError::DefinitionDisabled);
        }
        if let Some(kind) = definition.trigger_type {
            if let Some(category) = kind.required_category() {
                if !context.has_category(category) {
                    return Err(EngineError::InvalidContext(format!(
                        "missing '{category}' category"
                    )));
                }
            }
        }

        let execution = Execution::start(definition.id, definition.club_id, mode);
        self.repo.insert_execution(&execution).await?;
        info!(
            automation_id = %definition.id,
            execution_id = %execution.id,
            mode = mode.as_str(),
            "automation run started"
        );

        self.advance(execution, definition, context, 0, None).await
    }

    /// Resume a parked run. The continuation has already been claimed (and
    /// removed) by the repo, so a lost definition just ends the run.
    pub async fn resume(&self, continuation: Continuation) -> Result<(), EngineError> {
        let definition = match self
            .repo
            .get_definition(continuation.club_id, continuation.automation_id)
            .await?
        {
            Some(d) => d,
            None => {
                warn!(
                    execution_id = %continuation.execution_id,
                    "continuation for deleted automation dropped"
                );
                return Ok(());
            }
        };
        if !definition.enabled && continuation.mode == RunMode::Triggered {
            self.repo
                .finish_execution(
                    continuation.execution_id,
                    ExecutionStatus::Failed,
                    Utc::now(),
                )
                .await?;
            return Ok(());
        }
        // Editing the step chain cancels pending continuations, but one can
        // slip through between the edit and the cancel. The stored step id
        // catches a resume position that no longer points at the same step.
        let chain_intact = definition
            .steps
            .get(continuation.resume_step)
            .is_some_and(|s| s.id == continuation.resume_step_id);
        if !chain_intact {
            warn!(
                execution_id = %continuation.execution_id,
                step = continuation.resume_step,
                "steps changed while the run was parked, resume dropped"
            );
            self.repo
                .finish_execution(
                    continuation.execution_id,
                    ExecutionStatus::Failed,
                    Utc::now(),
                )
                .await?;
            return Ok(());
        }

        let execution = match self
            .repo
            .get_execution(continuation.club_id, continuation.execution_id)
            .await?
        {
            Some(e) => e,
            None => return Err(EngineError::DefinitionNotFound),
        };
        let context = RuntimeContext::from_value(continuation.context)
            .ok_or_else(|| EngineError::InvalidContext("stored context not an object".into()))?;

        self.advance(
            execution,
            &definition,
            context,
            continuation.resume_step,
            Some(continuation.resume_step),
        )
        .await?;
        Ok(())
    }

    /// Claim and resume every continuation due at `now`. Returns how many
    /// were resumed; individual failures are logged, not propagated.
    pub async fn resume_due(&self, now: chrono::DateTime<chrono::Utc>) -> Result<usize, RepoError> {
        let due = self.repo.claim_due_continuations(now).await?;
        let count = due.len();
        for continuation in due {
            let execution_id = continuation.execution_id;
            if let Err(e) = self.resume(continuation).await {
                warn!(execution_id = %execution_id, error = %e, "continuation resume failed");
            }
        }
        Ok(count)
    }

    /// Walk steps from `start_index`. `skip_delay_for` marks the step whose
    /// delay was already served by the continuation that got us here.
    async fn advance(
        &self,
        mut execution: Execution,
        definition: &AutomationDefinition,
        context: RuntimeContext,
        start_index: usize,
        skip_delay_for: Option<usize>,
    ) -> Result<Execution, EngineError> {
        let mut any_failed = execution
            .step_results
            .iter()
            .any(|r| r.status == StepStatus::Failed);
        // Minutes queued by a preceding delay step, applied to the next one.
        let mut carried_delay: i64 = 0;

        let mut index = start_index;
        while index < definition.steps.len() {
            let step = &definition.steps[index];

            let wait = if skip_delay_for == Some(index) {
                0
            } else {
                step.delay_minutes.max(0) + carried_delay
            };
            carried_delay = 0;

            if wait > 0 && execution.mode == RunMode::Triggered {
                let continuation = Continuation {
                    id: Uuid::new_v4(),
                    execution_id: execution.id,
                    automation_id: definition.id,
                    club_id: definition.club_id,
                    resume_step: index,
                    resume_step_id: step.id,
                    resume_at: Utc::now() + chrono::Duration::minutes(wait),
                    context: context.as_value(),
                    mode: execution.mode,
                };
                self.repo.schedule_continuation(&continuation).await?;
                info!(
                    execution_id = %execution.id,
                    step = index,
                    minutes = wait,
                    "run parked until delay elapses"
                );
                return Ok(execution);
            }

            let result = match step.kind {
                ActionKind::Delay => {
                    let minutes = step
                        .config
                        .get("minutes")
                        .and_then(|v| v.as_i64())
                        .unwrap_or(0)
                        .max(0);
                    carried_delay = minutes;
                    StepResult::success(step.id, format!("Attesa di {minutes} minuti"))
                }
                ActionKind::Condition => {
                    // Condition configs carry variables too: the compared
                    // `value` is often a token like {{lead.status}}.
                    let resolved = variables::resolve_config(&step.config, &context);
                    let passed = ActionRunner::evaluate_condition(&resolved, &context);
                    let result = StepResult::success(
                        step.id,
                        if passed {
                            "Condizione soddisfatta"
                        } else {
                            "Condizione non soddisfatta: catena interrotta"
                        },
                    );
                    if !passed {
                        self.repo.append_step_result(execution.id, &result).await?;
                        execution.step_results.push(result);
                        self.skip_remaining(&mut execution, definition, index + 1)
                            .await?;
                        return self
                            .finish(
                                execution,
                                definition,
                                if any_failed {
                                    ExecutionStatus::Partial
                                } else {
                                    ExecutionStatus::Completed
                                },
                            )
                            .await;
                    }
                    result
                }
                kind => {
                    let resolved = variables::resolve_config(&step.config, &context);
                    match self
                        .runner
                        .run_step(definition.club_id, kind, &resolved, &context)
                        .await
                    {
                        Ok(summary) => StepResult::success(step.id, summary),
                        Err(error) => {
                            warn!(
                                execution_id = %execution.id,
                                step = index,
                                kind = kind.as_str(),
                                error = %error,
                                "automation step failed"
                            );
                            StepResult::failed(step.id, error)
                        }
                    }
                }
            };

            let failed = result.status == StepStatus::Failed;
            self.repo.append_step_result(execution.id, &result).await?;
            execution.step_results.push(result);

            if failed {
                if step.kind.is_fatal() {
                    self.skip_remaining(&mut execution, definition, index + 1)
                        .await?;
                    return self.finish(execution, definition, ExecutionStatus::Failed).await;
                }
                any_failed = true;
            }

            index += 1;
        }

        let status = if any_failed {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Completed
        };
        self.finish(execution, definition, status).await
    }

    async fn skip_remaining(
        &self,
        execution: &mut Execution,
        definition: &AutomationDefinition,
        from: usize,
    ) -> Result<(), RepoError> {
        for step in &definition.steps[from.min(definition.steps.len())..] {
            let result = StepResult::skipped(step.id);
            self.repo.append_step_result(execution.id, &result).await?;
            execution.step_results.push(result);
        }
        Ok(())
    }

    async fn finish(
        &self,
        mut execution: Execution,
        definition: &AutomationDefinition,
        status: ExecutionStatus,
    ) -> Result<Execution, EngineError> {
        let finished_at = Utc::now();
        execution.status = status;
        execution.finished_at = Some(finished_at);
        self.repo
            .finish_execution(execution.id, status, finished_at)
            .await?;
        self.repo
            .bump_stats(definition.id, finished_at, status.as_run_status())
            .await?;
        info!(
            execution_id = %execution.id,
            status = status.as_str(),
            "automation run finished"
        );
        Ok(execution)
    }
}
