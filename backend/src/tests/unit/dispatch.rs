// Dispatcher behavior: matching, idempotency, schedule ticks

use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::automations::triggers::TriggerKind;
use crate::automations::{DomainEvent, ExecutionStatus, RunMode, RuntimeContext};
use crate::tests::fixtures;
use crate::tests::helpers::{
    dispatcher, engine, wait_until, InMemoryRepo, RecordingCollaborators,
};

#[tokio::test]
async fn event_dispatches_matching_definition() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab.clone());

    let event = fixtures::lead_created_event(club_id, "Acme SRL");
    assert_eq!(dispatcher.on_event(&event).await.unwrap(), 1);

    wait_until(|| {
        repo.execution_for(definition.id)
            .is_some_and(|e| e.status == ExecutionStatus::Completed)
    })
    .await;
    assert_eq!(collab.calls().len(), 2);
}

#[tokio::test]
async fn same_event_never_dispatches_twice() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab);

    let event = fixtures::lead_created_event(club_id, "Acme SRL");
    assert_eq!(dispatcher.on_event(&event).await.unwrap(), 1);
    assert_eq!(dispatcher.on_event(&event).await.unwrap(), 0);

    wait_until(|| repo.execution_for(definition.id).is_some()).await;
    assert_eq!(repo.executions.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn event_for_other_club_or_kind_is_ignored() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo, collab);

    let other_club = fixtures::lead_created_event(Uuid::new_v4(), "Acme");
    assert_eq!(dispatcher.on_event(&other_club).await.unwrap(), 0);

    let wrong_kind = DomainEvent::new(
        TriggerKind::SponsorCreated,
        club_id,
        serde_json::json!({ "sponsor": { "nome": "Demo" } }),
    );
    assert_eq!(dispatcher.on_event(&wrong_kind).await.unwrap(), 0);
}

#[tokio::test]
async fn disabled_definition_is_never_dispatched() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.enabled = false;
    let repo = InMemoryRepo::with_definitions(vec![definition]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo, collab);

    let event = fixtures::lead_created_event(club_id, "Acme");
    assert_eq!(dispatcher.on_event(&event).await.unwrap(), 0);
}

#[tokio::test]
async fn trigger_config_filters_narrow_matches() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::qualified_lead_task(club_id);
    definition.trigger_config = serde_json::json!({ "status_to": "qualified" });
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab);

    let lead = serde_json::json!({ "id": Uuid::new_v4().to_string(), "nome": "Acme", "status": "contacted" });
    let wrong = DomainEvent::lead_status_changed(club_id, lead, "new", "contacted");
    assert_eq!(dispatcher.on_event(&wrong).await.unwrap(), 0);

    let lead = serde_json::json!({ "id": Uuid::new_v4().to_string(), "nome": "Acme", "status": "qualified" });
    let right = DomainEvent::lead_status_changed(club_id, lead, "contacted", "qualified");
    assert_eq!(dispatcher.on_event(&right).await.unwrap(), 1);

    wait_until(|| repo.execution_for(definition.id).is_some()).await;
}

#[tokio::test]
async fn interval_trigger_fires_on_tick_once() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.trigger_type = Some(TriggerKind::Interval);
    definition.trigger_config = serde_json::json!({ "interval_minutes": 60 });
    // No lead category in a tick context, so use steps that need none.
    definition.steps = vec![crate::automations::Step::new(
        crate::automations::ActionKind::SendNotification,
        serde_json::json!({ "titolo": "Report orario" }),
    )];
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab.clone());

    let now = Utc::now();
    assert_eq!(dispatcher.on_schedule_tick(now).await.unwrap(), 1);
    // The same tick re-delivered dispatches nothing.
    assert_eq!(dispatcher.on_schedule_tick(now).await.unwrap(), 0);

    wait_until(|| {
        repo.execution_for(definition.id)
            .is_some_and(|e| e.status == ExecutionStatus::Completed)
    })
    .await;
    assert_eq!(collab.calls().len(), 1);
}

#[tokio::test]
async fn specific_date_trigger_is_one_shot() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.trigger_type = Some(TriggerKind::SpecificDate);
    let run_at = Utc::now() - chrono::Duration::minutes(5);
    definition.trigger_config = serde_json::json!({ "run_at": run_at.to_rfc3339() });
    definition.steps = vec![crate::automations::Step::new(
        crate::automations::ActionKind::SendNotification,
        serde_json::json!({ "titolo": "Promemoria" }),
    )];
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab);

    assert_eq!(dispatcher.on_schedule_tick(Utc::now()).await.unwrap(), 1);

    wait_until(|| repo.execution_for(definition.id).is_some()).await;

    // The firing is recorded at dispatch time, so later ticks skip it.
    let next_tick = Utc::now() + chrono::Duration::minutes(1);
    assert_eq!(dispatcher.on_schedule_tick(next_tick).await.unwrap(), 0);
}

#[tokio::test]
async fn manual_test_run_does_not_consume_schedule() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.trigger_type = Some(TriggerKind::SpecificDate);
    let run_at = Utc::now() - chrono::Duration::minutes(5);
    definition.trigger_config = serde_json::json!({ "run_at": run_at.to_rfc3339() });
    definition.steps = vec![crate::automations::Step::new(
        crate::automations::ActionKind::SendNotification,
        serde_json::json!({ "titolo": "Promemoria" }),
    )];
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());

    // Pressing "Test" bumps the run aggregates first.
    let executor = engine(repo.clone(), collab.clone());
    let test_run = executor
        .run(&definition, RuntimeContext::sample(club_id), RunMode::Test)
        .await
        .unwrap();
    assert_eq!(test_run.status, ExecutionStatus::Completed);
    assert!(repo
        .definitions
        .lock()
        .unwrap()
        .get(&definition.id)
        .unwrap()
        .last_run
        .is_some());

    // The scheduled firing still happens.
    let dispatcher = dispatcher(repo.clone(), collab.clone());
    assert_eq!(dispatcher.on_schedule_tick(Utc::now()).await.unwrap(), 1);
    wait_until(|| collab.calls().len() == 2).await;
}

#[tokio::test]
async fn cron_fire_claims_per_scheduled_minute() {
    let club_id = Uuid::new_v4();
    let mut definition = fixtures::lead_welcome(club_id);
    definition.trigger_type = Some(TriggerKind::Cron);
    definition.trigger_config = serde_json::json!({ "expression": "0 9 * * 1" });
    definition.steps = vec![crate::automations::Step::new(
        crate::automations::ActionKind::SendNotification,
        serde_json::json!({ "titolo": "Buongiorno" }),
    )];
    let repo = InMemoryRepo::with_definitions(vec![definition.clone()]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab);

    let scheduled_for = Utc::now();
    assert!(dispatcher.fire_cron(definition.id, scheduled_for).await.unwrap());
    assert!(!dispatcher.fire_cron(definition.id, scheduled_for).await.unwrap());

    // Unknown or disabled ids are a no-op.
    assert!(!dispatcher.fire_cron(Uuid::new_v4(), scheduled_for).await.unwrap());

    wait_until(|| repo.execution_for(definition.id).is_some()).await;
}

#[tokio::test]
async fn malformed_payload_is_dropped() {
    let club_id = Uuid::new_v4();
    let definition = fixtures::lead_welcome(club_id);
    let repo = InMemoryRepo::with_definitions(vec![definition]);
    let collab = Arc::new(RecordingCollaborators::default());
    let dispatcher = dispatcher(repo.clone(), collab);

    let event = DomainEvent::new(
        TriggerKind::LeadCreated,
        club_id,
        serde_json::Value::String("not an object".to_string()),
    );
    assert_eq!(dispatcher.on_event(&event).await.unwrap(), 0);
    assert!(repo.executions.lock().unwrap().is_empty());
}
