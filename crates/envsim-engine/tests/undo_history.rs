//! Integration test: undo and redo of executed events across modalities.

use chrono::TimeDelta;
use serde_json::{json, Value};

use envsim_core::{Environment, SimError};
use envsim_engine::{EngineConfig, SimulationEngine, SimulatorEvent};
use envsim_modalities::{EmailState, LocationState};
use envsim_test_utils::{init_tracing, t0};

fn environment() -> Environment {
    Environment::new(t0())
        .with_modality(EmailState::new(t0()))
        .unwrap()
        .with_modality(LocationState::new(t0()))
        .unwrap()
}

fn engine_with(max_history: usize) -> SimulationEngine {
    init_tracing();
    let config = EngineConfig {
        max_history,
        ..EngineConfig::default()
    };
    let engine = SimulationEngine::new(environment(), config).unwrap();
    engine.start(false, None).unwrap();
    engine
}

fn event(modality: &str, minutes: i64, data: Value) -> SimulatorEvent {
    SimulatorEvent::new(modality, t0() + TimeDelta::minutes(minutes), data)
}

fn receive(id: &str) -> Value {
    json!({
        "operation": "receive",
        "email_id": id,
        "from": "boss@example.com",
        "subject": "status?",
    })
}

fn states(engine: &SimulationEngine) -> (EmailState, LocationState) {
    engine.inspect(|env| {
        (
            env.state::<EmailState>().unwrap().clone(),
            env.state::<LocationState>().unwrap().clone(),
        )
    })
}

/// Queue a short mixed-modality scenario and run it.
fn run_scenario(engine: &SimulationEngine) {
    engine
        .add_events(vec![
            event("email", 1, receive("e1")),
            event(
                "location",
                2,
                json!({"operation": "update", "latitude": 40.7, "longitude": -74.0}),
            ),
            event("email", 3, json!({"operation": "mark_read", "email_ids": ["e1"]})),
            event("email", 4, json!({"operation": "delete", "email_id": "e1"})),
        ])
        .unwrap();
    engine.advance_time(TimeDelta::minutes(5)).unwrap();
}

#[test]
fn undo_walks_back_to_the_initial_state() {
    let engine = engine_with(100);
    let initial = states(&engine);
    run_scenario(&engine);
    assert!(states(&engine).0.emails.is_empty());

    let last = engine.undo().unwrap();
    assert_eq!(last.modality, "email");
    assert_eq!(last.undo_depth, 3);
    assert_eq!(last.redo_depth, 1);
    assert!(states(&engine).0.emails["e1"].read);

    for _ in 0..3 {
        engine.undo().unwrap();
    }
    assert_eq!(states(&engine), initial);
    assert!(matches!(engine.undo(), Err(SimError::InvalidOperation { .. })));
    assert_eq!(engine.metrics().undo_count, 4);
}

#[test]
fn redo_reapplies_what_undo_reverted() {
    let engine = engine_with(100);
    run_scenario(&engine);
    let after = states(&engine);

    for _ in 0..4 {
        engine.undo().unwrap();
    }
    for _ in 0..4 {
        engine.redo().unwrap();
    }
    assert_eq!(states(&engine), after);
    assert!(matches!(engine.redo(), Err(SimError::InvalidOperation { .. })));
    assert!(engine.validate().is_empty());
}

#[test]
fn new_execution_clears_redo() {
    let engine = engine_with(100);
    run_scenario(&engine);
    engine.undo().unwrap();

    engine.add_event(event("email", 6, receive("e2"))).unwrap();
    engine.advance_time(TimeDelta::minutes(1)).unwrap();
    assert!(matches!(engine.redo(), Err(SimError::InvalidOperation { .. })));
}

#[test]
fn history_capacity_evicts_oldest() {
    let engine = engine_with(2);
    run_scenario(&engine);

    engine.undo().unwrap();
    engine.undo().unwrap();
    assert!(matches!(engine.undo(), Err(SimError::InvalidOperation { .. })));

    // The receive and the location update fell out of history.
    let (email, location) = states(&engine);
    assert!(email.emails.contains_key("e1"));
    assert!(!email.emails["e1"].read);
    assert!(location.current.is_some());
}

#[test]
fn failed_events_are_not_recorded() {
    let engine = engine_with(100);
    engine
        .add_events(vec![
            event("email", 1, receive("dup")),
            event("email", 2, receive("dup")),
        ])
        .unwrap();
    let result = engine.advance_time(TimeDelta::minutes(3)).unwrap();
    assert_eq!(result.executed.len(), 2);
    assert_eq!(engine.metrics().events_failed, 1);

    engine.undo().unwrap();
    assert!(matches!(engine.undo(), Err(SimError::InvalidOperation { .. })));
}

#[test]
fn undone_event_keeps_executed_status() {
    let engine = engine_with(100);
    let id = engine.add_event(event("email", 1, receive("e1"))).unwrap();
    engine.advance_time(TimeDelta::minutes(1)).unwrap();

    let outcome = engine.undo().unwrap();
    assert_eq!(outcome.event_id, id);
    assert_eq!(outcome.version, 0);
    assert_eq!(
        engine.get_event(id).unwrap().status(),
        envsim_core::EventStatus::Executed
    );
}

#[test]
fn restoring_a_snapshot_clears_history() {
    let engine = engine_with(100);
    let snapshot = engine.get_snapshot().unwrap();
    run_scenario(&engine);

    engine.stop().unwrap();
    engine.restore_snapshot(&snapshot.environment).unwrap();
    assert!(states(&engine).0.emails.is_empty());
    assert!(matches!(engine.undo(), Err(SimError::InvalidOperation { .. })));
}
