// Executor behavior: ordering, delays, conditions, failure policy

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::automations::{EngineError, ExecutionStatus, RunMode, StepStatus};
use crate::tests::fixtures;
use crate::tests::helpers::{engine, CollabCall, InMemoryRepo, RecordingCollaborators};
use sponsorhub_shared::LastRunStatus;

#[tokio::test]
async fn runs_steps_in_order_with_resolved_variables() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Acme SRL", "new");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.step_results.len(), 2);
    assert!(execution
        .step_results
        .iter()
        .all(|r| r.status == StepStatus::Success));

    let calls = collab.calls();
    assert_eq!(calls.len(), 2);
    match &calls[0] {
        CollabCall::Notification { title, .. } => {
            assert_eq!(title, "Nuovo lead: Acme SRL");
        }
        other => panic!("expected notification first, got {other:?}"),
    }
    match &calls[1] {
        CollabCall::Email { to, subject } => {
            assert_eq!(to, "contatti@example.it");
            assert_eq!(subject, "Benvenuto Acme SRL");
        }
        other => panic!("expected email second, got {other:?}"),
    }
}

#[tokio::test]
async fn unresolved_variables_pass_through_verbatim() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo, collab.clone());

    // Context has a lead without azienda, so that token stays literal.
    let payload = serde_json::json!({ "lead": { "nome": "Acme", "email": "a@b.it" } });
    let context = crate::automations::RuntimeContext::from_payload(&payload)
        .unwrap()
        .with_builtins(club_id);

    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);

    match &collab.calls()[0] {
        CollabCall::Notification { message, .. } => {
            assert_eq!(message, "Da {{lead.azienda}}");
        }
        other => panic!("expected notification, got {other:?}"),
    }
}

#[tokio::test]
async fn delayed_step_parks_and_resumes() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_follow_up(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Beta SRL", "new");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    // First step ran, second is parked for tomorrow.
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.step_results.len(), 1);
    assert_eq!(collab.calls().len(), 1);

    let continuations = repo.continuations.lock().unwrap().clone();
    assert_eq!(continuations.len(), 1);
    assert_eq!(continuations[0].resume_step, 1);
    let minutes_out = (continuations[0].resume_at - Utc::now()).num_minutes();
    assert!((1438..=1440).contains(&minutes_out));

    // Nothing due yet.
    assert_eq!(executor.resume_due(Utc::now()).await.unwrap(), 0);
    assert_eq!(collab.calls().len(), 1);

    // A day later the run picks up where it stopped.
    let later = Utc::now() + chrono::Duration::minutes(1441);
    assert_eq!(executor.resume_due(later).await.unwrap(), 1);

    let finished = repo.execution_for(definition.id).unwrap();
    assert_eq!(finished.status, ExecutionStatus::Completed);
    assert_eq!(finished.step_results.len(), 2);
    assert_eq!(collab.calls().len(), 2);
    assert!(repo.continuations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_mode_elides_delays() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_follow_up(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Gamma SRL", "new");
    let execution = executor
        .run(&definition, context, RunMode::Test)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.step_results.len(), 2);
    assert_eq!(collab.calls().len(), 2);
    assert!(repo.continuations.lock().unwrap().is_empty());
}

#[tokio::test]
async fn false_condition_stops_chain_cleanly() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::qualified_lead_task(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo, collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "new");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.step_results[0].status, StepStatus::Success);
    assert_eq!(execution.step_results[1].status, StepStatus::Skipped);
    assert_eq!(execution.step_results[2].status, StepStatus::Skipped);
    assert!(collab.calls().is_empty());
}

#[tokio::test]
async fn true_condition_lets_chain_continue() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::qualified_lead_task(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo, collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "qualified");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(collab.calls().len(), 2);
    assert!(matches!(&collab.calls()[0], CollabCall::Task { title, .. } if title == "Chiama Acme"));
}

#[tokio::test]
async fn condition_value_tokens_are_resolved() {
    use crate::automations::registry::ActionKind;
    use crate::automations::Step;

    let club_id = Uuid::new_v4();
    let mut definition = fixtures::qualified_lead_task(club_id);
    // Compare the lead's status against the event's destination status.
    definition.steps[0] = Step::new(
        ActionKind::Condition,
        serde_json::json!({
            "field": "lead.status",
            "operator": "equals",
            "value": "{{event.status_to}}",
        }),
    );
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo, collab.clone());

    let payload = serde_json::json!({
        "lead": {
            "id": Uuid::new_v4().to_string(),
            "nome": "Acme",
            "status": "qualified",
        },
        "status_from": "contacted",
        "status_to": "qualified",
    });
    let context = crate::automations::RuntimeContext::from_payload(&payload)
        .unwrap()
        .with_builtins(club_id);

    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert_eq!(execution.step_results[0].status, StepStatus::Success);
    assert_eq!(execution.step_results[1].status, StepStatus::Success);
    assert_eq!(collab.calls().len(), 2);
}

#[tokio::test]
async fn non_fatal_failure_continues_and_marks_partial() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    // Notification fails, email still goes out.
    let collab = RecordingCollaborators::failing_on(&["create_notification"]);
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "new");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Partial);
    assert_eq!(execution.step_results[0].status, StepStatus::Failed);
    assert!(execution.step_results[0].error_message.is_some());
    assert_eq!(execution.step_results[1].status, StepStatus::Success);
    assert_eq!(collab.calls().len(), 1);

    let stored = repo.definitions.lock().unwrap().get(&definition.id).cloned().unwrap();
    assert_eq!(stored.last_status, LastRunStatus::Partial);
}

#[tokio::test]
async fn fatal_failure_aborts_and_skips_rest() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::qualified_lead_task(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = RecordingCollaborators::failing_on(&["create_task"]);
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "qualified");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Failed);
    assert_eq!(execution.step_results[1].status, StepStatus::Failed);
    assert_eq!(execution.step_results[2].status, StepStatus::Skipped);
    // The notification after the task never ran.
    assert!(collab.calls().is_empty());

    let stored = repo.definitions.lock().unwrap().get(&definition.id).cloned().unwrap();
    assert_eq!(stored.last_status, LastRunStatus::Failed);
    assert_eq!(stored.executions_count, 1);
}

#[tokio::test]
async fn disabled_definition_rejects_triggered_but_allows_test() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.enabled = false;
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo, collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "new");
    let err = executor
        .run(&definition, context.clone(), RunMode::Triggered)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DefinitionDisabled));

    let execution = executor
        .run(&definition, context, RunMode::Test)
        .await
        .unwrap();
    assert_eq!(execution.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn missing_required_category_is_invalid_context() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo, collab);

    let context = crate::automations::RuntimeContext::new().with_builtins(club_id);
    let err = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidContext(_)));
}

#[tokio::test]
async fn delay_action_pushes_wait_into_next_step() {
    use crate::automations::registry::ActionKind;
    use crate::automations::Step;

    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.steps = vec![
        Step::new(ActionKind::Delay, serde_json::json!({ "minutes": 30 })),
        Step::new(
            ActionKind::SendNotification,
            serde_json::json!({ "titolo": "Dopo la pausa" }),
        ),
    ];
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "new");
    let execution = executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    // The delay step records success immediately; the notification is parked.
    assert_eq!(execution.status, ExecutionStatus::Running);
    assert_eq!(execution.step_results.len(), 1);
    assert_eq!(execution.step_results[0].status, StepStatus::Success);
    assert!(collab.calls().is_empty());

    let continuations = repo.continuations.lock().unwrap().clone();
    assert_eq!(continuations.len(), 1);
    assert_eq!(continuations[0].resume_step, 1);
    let minutes_out = (continuations[0].resume_at - Utc::now()).num_minutes();
    assert!((28..=30).contains(&minutes_out));
}

#[tokio::test]
async fn zero_step_run_completes_immediately() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.steps.clear();
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab);

    let context = fixtures::lead_context(club_id, "Acme", "new");
    let execution = executor
        .run(&definition, context, RunMode::Test)
        .await
        .unwrap();

    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.step_results.is_empty());
    let stored = repo.definitions.lock().unwrap().get(&definition.id).cloned().unwrap();
    assert_eq!(stored.executions_count, 1);
}

#[tokio::test]
async fn completed_run_bumps_aggregates() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab);

    let context = fixtures::lead_context(club_id, "Acme", "new");
    executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    let stored = repo.definitions.lock().unwrap().get(&definition.id).cloned().unwrap();
    assert_eq!(stored.executions_count, 1);
    assert_eq!(stored.last_status, LastRunStatus::Completed);
    assert!(stored.last_run.is_some());
}

#[tokio::test]
async fn resume_for_disabled_definition_fails_the_run() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_follow_up(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "new");
    executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();

    repo.definitions
        .lock()
        .unwrap()
        .get_mut(&definition.id)
        .unwrap()
        .enabled = false;

    let later = Utc::now() + chrono::Duration::minutes(1441);
    executor.resume_due(later).await.unwrap();

    let stored = repo.execution_for(definition.id).unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    // The parked email never went out.
    assert_eq!(collab.calls().len(), 1);
}

#[tokio::test]
async fn resume_after_step_chain_edit_fails_the_run() {
    use crate::automations::registry::ActionKind;
    use crate::automations::Step;

    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_follow_up(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let executor = engine(repo.clone(), collab.clone());

    let context = fixtures::lead_context(club_id, "Acme", "new");
    executor
        .run(&definition, context, RunMode::Triggered)
        .await
        .unwrap();
    assert_eq!(repo.continuations.lock().unwrap().len(), 1);

    // The chain is rewritten while the run is parked, so the stored resume
    // position no longer points at the step it was saved for.
    repo.definitions
        .lock()
        .unwrap()
        .get_mut(&definition.id)
        .unwrap()
        .steps = vec![Step::new(
        ActionKind::SendNotification,
        serde_json::json!({ "titolo": "Catena nuova" }),
    )];

    let later = Utc::now() + chrono::Duration::minutes(1441);
    assert_eq!(executor.resume_due(later).await.unwrap(), 1);

    let stored = repo.execution_for(definition.id).unwrap();
    assert_eq!(stored.status, ExecutionStatus::Failed);
    // Only the pre-park notification ever ran.
    assert_eq!(collab.calls().len(), 1);
}
