// Automation endpoints - CRUD, registry metadata, test runs, history

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sponsorhub_shared::LastRunStatus;
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::ClubUser;
use crate::automations::registry::{self, ActionKind};
use crate::automations::triggers::{self, TriggerKind};
use crate::automations::{
    validate, variables, AutomationDefinition, Execution, RunMode, RuntimeContext, Step,
};
use crate::error::{ApiResult, AppError};
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::AppState;

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_automations).post(create_automation))
        .route("/triggers", get(trigger_catalog))
        .route("/actions", get(action_catalog))
        .route("/variables", get(variable_catalog))
        .route(
            "/:id",
            get(get_automation)
                .put(update_automation)
                .delete(delete_automation),
        )
        .route("/:id/toggle", post(toggle_automation))
        .route("/:id/test", post(test_automation))
        .route("/:id/executions", get(list_executions))
}

/// Create/update request body. Step ids are optional on the way in: absent
/// ones are minted, present ones are preserved across edits.
#[derive(Debug, Deserialize)]
pub struct AutomationPayload {
    pub nome: String,
    #[serde(default)]
    pub descrizione: Option<String>,
    #[serde(default)]
    pub trigger_type: Option<TriggerKind>,
    #[serde(default)]
    pub trigger_config: serde_json::Value,
    #[serde(default)]
    pub steps: Vec<StepPayload>,
    #[serde(default)]
    pub abilitata: bool,
}

#[derive(Debug, Deserialize)]
pub struct StepPayload {
    pub id: Option<Uuid>,
    #[serde(rename = "type")]
    pub kind: ActionKind,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub delay_minutes: i64,
}

impl StepPayload {
    fn into_step(self) -> Step {
        Step {
            id: self.id.unwrap_or_else(Uuid::new_v4),
            kind: self.kind,
            config: self.config,
            delay_minutes: self.delay_minutes,
        }
    }
}

/// Compact list-view projection
#[derive(Debug, Serialize)]
pub struct AutomationSummary {
    pub id: Uuid,
    pub nome: String,
    pub descrizione: Option<String>,
    pub trigger_type: Option<TriggerKind>,
    pub abilitata: bool,
    pub steps_count: usize,
    pub executions_count: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: LastRunStatus,
}

impl From<&AutomationDefinition> for AutomationSummary {
    fn from(def: &AutomationDefinition) -> Self {
        Self {
            id: def.id,
            nome: def.name.clone(),
            descrizione: def.description.clone(),
            trigger_type: def.trigger_type,
            abilitata: def.enabled,
            steps_count: def.steps.len(),
            executions_count: def.executions_count,
            last_run: def.last_run,
            last_status: def.last_status,
        }
    }
}

async fn list_automations(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
) -> ApiResult<Json<Vec<AutomationSummary>>> {
    let definitions = state.repo.list_definitions(user.club_id).await?;
    Ok(Json(definitions.iter().map(Into::into).collect()))
}

async fn create_automation(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Json(payload): Json<AutomationPayload>,
) -> ApiResult<(StatusCode, Json<AutomationDefinition>)> {
    let mut definition = AutomationDefinition::new(user.club_id, payload.nome);
    definition.description = payload.descrizione;
    definition.trigger_type = payload.trigger_type;
    definition.trigger_config = payload.trigger_config;
    definition.steps = payload.steps.into_iter().map(StepPayload::into_step).collect();
    definition.enabled = payload.abilitata;

    validate::validate(&definition)?;
    state.repo.insert_definition(&definition).await?;

    Ok((StatusCode::CREATED, Json(definition)))
}

async fn get_automation(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationDefinition>> {
    let definition = state
        .repo
        .get_definition(user.club_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;
    Ok(Json(definition))
}

async fn update_automation(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AutomationPayload>,
) -> ApiResult<Json<AutomationDefinition>> {
    let mut definition = state
        .repo
        .get_definition(user.club_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;

    let new_steps: Vec<Step> = payload.steps.into_iter().map(StepPayload::into_step).collect();
    let steps_changed = new_steps != definition.steps;

    definition.name = payload.nome;
    definition.description = payload.descrizione;
    definition.trigger_type = payload.trigger_type;
    definition.trigger_config = payload.trigger_config;
    definition.steps = new_steps;
    definition.enabled = payload.abilitata;

    validate::validate(&definition)?;
    state.repo.update_definition(&definition).await?;
    // Disabling drops parked resumes; so does reshaping the chain, since a
    // stored resume position no longer means the same step.
    if !definition.enabled || steps_changed {
        state.repo.cancel_continuations(id).await?;
    }

    Ok(Json(definition))
}

async fn delete_automation(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    if !state.repo.delete_definition(user.club_id, id).await? {
        return Err(AppError::NotFound("Automation".to_string()));
    }
    state.repo.cancel_continuations(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn toggle_automation(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<AutomationDefinition>> {
    let current = state
        .repo
        .get_definition(user.club_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;

    if !current.enabled {
        // Enabling re-runs the same checks as saving an enabled definition.
        let mut as_enabled = current.clone();
        as_enabled.enabled = true;
        validate::validate(&as_enabled)?;
    }

    let updated = state
        .repo
        .set_enabled(user.club_id, id, !current.enabled)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;

    // Disabling also drops parked resumes; a continuation that slips past
    // this is still caught at resume time.
    if !updated.enabled {
        state.repo.cancel_continuations(id).await?;
    }

    Ok(Json(updated))
}

async fn test_automation(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    let definition = state
        .repo
        .get_definition(user.club_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;

    let context = match state
        .executor
        .collaborators()
        .representative_context(user.club_id)
        .await
    {
        Some(ctx) => ctx,
        None => RuntimeContext::sample(user.club_id),
    };

    let execution = state
        .executor
        .run(&definition, context, RunMode::Test)
        .await?;

    Ok(Json(json!({ "execution": execution })))
}

async fn list_executions(
    State(state): State<Arc<AppState>>,
    user: ClubUser,
    Path(id): Path<Uuid>,
    Query(params): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<Execution>>> {
    // 404 over an empty page for an id the club does not own.
    state
        .repo
        .get_definition(user.club_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Automation".to_string()))?;

    let (executions, total) = state
        .repo
        .list_executions(user.club_id, id, params.offset(), params.limit())
        .await?;

    Ok(Json(PaginatedResponse::new(executions, &params, total)))
}

async fn trigger_catalog() -> Json<Vec<triggers::TriggerDescriptor>> {
    Json(triggers::list_triggers())
}

async fn action_catalog() -> Json<Vec<registry::ActionDescriptor>> {
    Json(registry::list_actions())
}

async fn variable_catalog() -> Json<Vec<variables::VariableGroup>> {
    Json(variables::list_variables())
}
