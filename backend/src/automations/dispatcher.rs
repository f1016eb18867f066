// Trigger dispatcher - routes domain events and schedule ticks to runs

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::executor::WorkflowExecutor;
use super::model::{AutomationDefinition, RunMode};
use super::store::{AutomationRepo, RepoError};
use super::triggers::{DomainEvent, TriggerKind};
use super::variables::RuntimeContext;

pub struct TriggerDispatcher {
    repo: Arc<dyn AutomationRepo>,
    executor: Arc<WorkflowExecutor>,
}

impl TriggerDispatcher {
    pub fn new(repo: Arc<dyn AutomationRepo>, executor: Arc<WorkflowExecutor>) -> Self {
        Self { repo, executor }
    }

    /// Route one entity event to every enabled automation it matches.
    ///
    /// Fire-and-forget: each matched run goes to its own task, and nothing
    /// here propagates back to the code that emitted the event. Returns how
    /// many runs were dispatched (matched, claimed and spawned).
    pub async fn on_event(&self, event: &DomainEvent) -> Result<usize, RepoError> {
        let definitions = self.repo.list_enabled().await?;
        let mut dispatched = 0;

        for definition in definitions {
            if definition.club_id != event.club_id
                || definition.trigger_type != Some(event.kind)
                || !matches_filters(&definition.trigger_config, &event.payload)
            {
                continue;
            }

            let key = format!("event:{}", event.event_id);
            if !self.repo.claim_dispatch(definition.id, &key).await? {
                debug!(
                    automation_id = %definition.id,
                    event_id = %event.event_id,
                    "event already dispatched"
                );
                continue;
            }

            let Some(context) = RuntimeContext::from_payload(&event.payload) else {
                warn!(
                    automation_id = %definition.id,
                    event_id = %event.event_id,
                    "event payload is not an object, dropped"
                );
                continue;
            };
            let context = context.with_builtins(event.club_id);

            self.spawn_run(definition, context);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Evaluate `interval` and `specific_date` triggers against the clock.
    /// Called once a minute by the scheduler.
    pub async fn on_schedule_tick(&self, now: DateTime<Utc>) -> Result<usize, RepoError> {
        let definitions = self.repo.list_enabled().await?;
        let mut dispatched = 0;

        for definition in definitions {
            let due = match definition.trigger_type {
                Some(TriggerKind::Interval) => interval_due(&definition, now),
                Some(TriggerKind::SpecificDate) => specific_date_due(&definition, now),
                _ => false,
            };
            if !due {
                continue;
            }

            let key = format!("tick:{}", now.format("%Y-%m-%dT%H:%M"));
            if !self.repo.claim_dispatch(definition.id, &key).await? {
                continue;
            }
            self.repo.mark_triggered(definition.id, now).await?;

            let context = RuntimeContext::new().with_builtins(definition.club_id);
            self.spawn_run(definition, context);
            dispatched += 1;
        }

        Ok(dispatched)
    }

    /// Entry point for registered cron jobs. `scheduled_for` is the tick the
    /// job fired at, which keys the duplicate-delivery claim.
    pub async fn fire_cron(
        &self,
        automation_id: Uuid,
        scheduled_for: DateTime<Utc>,
    ) -> Result<bool, RepoError> {
        let definitions = self.repo.list_enabled().await?;
        let Some(definition) = definitions.into_iter().find(|d| d.id == automation_id) else {
            // Disabled or deleted since the job was registered.
            return Ok(false);
        };

        let key = format!("cron:{}", scheduled_for.format("%Y-%m-%dT%H:%M"));
        if !self.repo.claim_dispatch(definition.id, &key).await? {
            return Ok(false);
        }

        let context = RuntimeContext::new().with_builtins(definition.club_id);
        self.spawn_run(definition, context);
        Ok(true)
    }

    fn spawn_run(&self, definition: AutomationDefinition, context: RuntimeContext) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            if let Err(e) = executor.run(&definition, context, RunMode::Triggered).await {
                error!(
                    automation_id = %definition.id,
                    error = %e,
                    "triggered automation run failed to start"
                );
            }
        });
    }
}

/// A definition's trigger_config keys act as equality filters on the event
/// payload's scalar fields. A key the payload does not carry constrains
/// nothing; empty-string values mean "any".
fn matches_filters(trigger_config: &serde_json::Value, payload: &serde_json::Value) -> bool {
    let Some(filters) = trigger_config.as_object() else {
        return true;
    };
    for (key, wanted) in filters {
        let wanted_str = match wanted {
            serde_json::Value::String(s) if !s.trim().is_empty() => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => continue,
        };
        match payload.get(key) {
            Some(serde_json::Value::String(actual)) if *actual != wanted_str => return false,
            Some(serde_json::Value::Number(actual)) if actual.to_string() != wanted_str => {
                return false
            }
            _ => {}
        }
    }
    true
}

fn interval_due(definition: &AutomationDefinition, now: DateTime<Utc>) -> bool {
    let minutes = match definition.trigger_config.get("interval_minutes") {
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(serde_json::Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    };
    let Some(minutes) = minutes.filter(|m| *m > 0) else {
        return false;
    };
    // Cadence is measured from the last scheduled firing, not from
    // `last_run`: a manual test run must not stretch the interval.
    match definition.last_triggered_at {
        None => true,
        Some(last) => now - last >= chrono::Duration::minutes(minutes),
    }
}

fn specific_date_due(definition: &AutomationDefinition, now: DateTime<Utc>) -> bool {
    let Some(run_at) = definition
        .trigger_config
        .get("run_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    else {
        return false;
    };
    // One-shot: once the dispatcher has fired it, the date has been served.
    // Test runs leave `last_triggered_at` untouched.
    now >= run_at.with_timezone(&Utc) && definition.last_triggered_at.is_none()
}
