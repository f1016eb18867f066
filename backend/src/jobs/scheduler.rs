// Job Scheduler - drives time-based triggers, delayed resumes and retention

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio_cron_scheduler::{Job, JobScheduler as TokioScheduler, JobSchedulerError};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::automations::store::AutomationRepo;
use crate::automations::triggers::TriggerKind;
use crate::automations::{TriggerDispatcher, WorkflowExecutor};

#[derive(Error, Debug)]
pub enum JobError {
    #[error("Scheduler error: {0}")]
    SchedulerError(#[from] JobSchedulerError),
    #[error("Job execution error: {0}")]
    ExecutionError(String),
}

pub type JobResult<T> = Result<T, JobError>;

/// Registered cron jobs, keyed by automation id. The stored expression lets
/// the sync pass detect edits and re-register.
type CronJobMap = Arc<RwLock<HashMap<Uuid, (String, Uuid)>>>;

pub struct AutomationScheduler {
    scheduler: TokioScheduler,
    repo: Arc<dyn AutomationRepo>,
    dispatcher: Arc<TriggerDispatcher>,
    executor: Arc<WorkflowExecutor>,
    retention_days: i64,
    cron_jobs: CronJobMap,
}

impl AutomationScheduler {
    pub async fn new(
        repo: Arc<dyn AutomationRepo>,
        dispatcher: Arc<TriggerDispatcher>,
        executor: Arc<WorkflowExecutor>,
        retention_days: i64,
    ) -> JobResult<Self> {
        let scheduler = TokioScheduler::new().await?;

        Ok(Self {
            scheduler,
            repo,
            dispatcher,
            executor,
            retention_days,
            cron_jobs: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    pub async fn start(&self) -> JobResult<()> {
        info!("Starting background job scheduler");

        self.schedule_minute_tick().await?;
        self.schedule_retention().await?;

        // Register cron jobs for definitions that already exist; later edits
        // are picked up by the sync inside the minute tick.
        sync_cron_jobs(
            &self.scheduler,
            &self.repo,
            &self.dispatcher,
            &self.cron_jobs,
        )
        .await;

        self.scheduler.start().await?;

        info!("Background job scheduler started successfully");
        Ok(())
    }

    pub async fn shutdown(&mut self) -> JobResult<()> {
        info!("Shutting down background job scheduler");
        self.scheduler.shutdown().await?;
        Ok(())
    }

    /// Once a minute: fire due interval/date triggers, resume parked runs,
    /// and resync per-definition cron jobs.
    async fn schedule_minute_tick(&self) -> JobResult<()> {
        let scheduler = self.scheduler.clone();
        let repo = Arc::clone(&self.repo);
        let dispatcher = Arc::clone(&self.dispatcher);
        let executor = Arc::clone(&self.executor);
        let cron_jobs = Arc::clone(&self.cron_jobs);

        let job = Job::new_async("0 * * * * *", move |_uuid, _lock| {
            let scheduler = scheduler.clone();
            let repo = Arc::clone(&repo);
            let dispatcher = Arc::clone(&dispatcher);
            let executor = Arc::clone(&executor);
            let cron_jobs = Arc::clone(&cron_jobs);

            Box::pin(async move {
                let now = Utc::now();

                match dispatcher.on_schedule_tick(now).await {
                    Ok(n) if n > 0 => info!("Schedule tick dispatched {} automation runs", n),
                    Ok(_) => {}
                    Err(e) => error!("Schedule tick failed: {}", e),
                }

                match executor.resume_due(now).await {
                    Ok(n) if n > 0 => info!("Resumed {} delayed automation runs", n),
                    Ok(_) => {}
                    Err(e) => error!("Continuation resume failed: {}", e),
                }

                sync_cron_jobs(&scheduler, &repo, &dispatcher, &cron_jobs).await;
            })
        })?;

        self.scheduler.add(job).await?;
        info!("Scheduled automation minute tick");
        Ok(())
    }

    /// Daily at 03:00: purge finished executions past the retention window.
    async fn schedule_retention(&self) -> JobResult<()> {
        let repo = Arc::clone(&self.repo);
        let retention_days = self.retention_days;

        let job = Job::new_async("0 0 3 * * *", move |_uuid, _lock| {
            let repo = Arc::clone(&repo);

            Box::pin(async move {
                let before = Utc::now() - chrono::Duration::days(retention_days);
                match repo.cleanup_executions(before).await {
                    Ok(removed) if removed > 0 => {
                        info!("Retention job removed {} old executions", removed)
                    }
                    Ok(_) => {}
                    Err(e) => error!("Retention job failed: {}", e),
                }
            })
        })?;

        self.scheduler.add(job).await?;
        info!(
            "Scheduled execution retention job ({} days)",
            retention_days
        );
        Ok(())
    }
}

/// A five-field cron expression becomes six-field by prepending seconds.
fn normalize_cron(expression: &str) -> String {
    let trimmed = expression.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// Reconcile registered cron jobs with the enabled cron-triggered
/// definitions: register new ones, re-register edited expressions, drop jobs
/// whose definition was disabled or deleted.
async fn sync_cron_jobs(
    scheduler: &TokioScheduler,
    repo: &Arc<dyn AutomationRepo>,
    dispatcher: &Arc<TriggerDispatcher>,
    cron_jobs: &CronJobMap,
) {
    let definitions = match repo.list_enabled().await {
        Ok(defs) => defs,
        Err(e) => {
            error!("Cron sync could not list definitions: {}", e);
            return;
        }
    };

    let mut wanted: HashMap<Uuid, String> = HashMap::new();
    for definition in &definitions {
        if definition.trigger_type != Some(TriggerKind::Cron) {
            continue;
        }
        if let Some(expression) = definition
            .trigger_config
            .get("expression")
            .and_then(|v| v.as_str())
        {
            wanted.insert(definition.id, normalize_cron(expression));
        }
    }

    let mut registered = cron_jobs.write().await;

    let stale: Vec<Uuid> = registered
        .iter()
        .filter(|(id, (expr, _))| wanted.get(id) != Some(expr))
        .map(|(id, _)| *id)
        .collect();
    for automation_id in stale {
        if let Some((_, job_id)) = registered.remove(&automation_id) {
            if let Err(e) = scheduler.remove(&job_id).await {
                warn!(
                    "Could not remove cron job for automation {}: {}",
                    automation_id, e
                );
            }
        }
    }

    for (automation_id, expression) in wanted {
        if registered.contains_key(&automation_id) {
            continue;
        }

        let dispatcher = Arc::clone(dispatcher);
        let job = Job::new_async(expression.as_str(), move |_uuid, _lock| {
            let dispatcher = Arc::clone(&dispatcher);
            Box::pin(async move {
                if let Err(e) = dispatcher.fire_cron(automation_id, Utc::now()).await {
                    error!("Cron trigger for automation {} failed: {}", automation_id, e);
                }
            })
        });

        match job {
            Ok(job) => {
                let job_id = job.guid();
                match scheduler.add(job).await {
                    Ok(_) => {
                        info!(
                            "Registered cron job for automation {} ({})",
                            automation_id, expression
                        );
                        registered.insert(automation_id, (expression, job_id));
                    }
                    Err(e) => warn!(
                        "Could not register cron job for automation {}: {}",
                        automation_id, e
                    ),
                }
            }
            Err(e) => warn!(
                "Invalid cron expression '{}' for automation {}: {}",
                expression, automation_id, e
            ),
        }
    }
}
