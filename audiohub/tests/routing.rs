//! Routing mode and equalizer changes, retries, rollback, and fatal escalation

mod common;

use std::time::Duration;

use audiohub::{CoordinatorError, ErrorKind, PluginState, RoutingMode, SourceId};
use common::{Harness, SNAPCLIENT, SNAPSERVER};
use plugin_api::testing::{ConnectBehavior, ServiceAction, ServiceCall};
use tempfile::TempDir;

fn call(action: ServiceAction, unit: &str) -> ServiceCall {
    ServiceCall {
        action,
        unit: unit.to_string(),
    }
}

#[tokio::test]
async fn test_mode_change_without_source_only_persists() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;

    h.hub
        .set_routing_mode(RoutingMode::Synchronized)
        .await
        .unwrap();

    assert!(h.services.calls().is_empty());
    assert_eq!(h.hub.get_state().routing_mode, RoutingMode::Synchronized);
    assert_eq!(h.persisted()["routing"]["mode"], "synchronized");
    assert_eq!(
        h.event_names(),
        vec!["routing.multiroom_enabling", "routing.multiroom_ready"]
    );
}

#[tokio::test]
async fn test_unchanged_value_is_noop() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;

    h.hub.set_routing_mode(RoutingMode::Direct).await.unwrap();
    h.hub.set_equalizer(false).await.unwrap();

    assert!(h.event_names().is_empty());
}

#[tokio::test]
async fn test_enable_multiroom_rebinds_active_source() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub.request_source("radio").await.unwrap();
    h.event_names();

    h.hub
        .set_routing_mode(RoutingMode::Synchronized)
        .await
        .unwrap();

    assert_eq!(
        h.services.calls(),
        vec![
            call(ServiceAction::Start, SNAPSERVER),
            call(ServiceAction::Start, SNAPCLIENT),
        ]
    );
    let radio = h.plugin(SourceId::Radio);
    assert_eq!(radio.stop_count(), 1);
    assert_eq!(radio.last_binding().unwrap().as_str(), "radio_multiroom");

    let state = h.hub.get_state();
    assert_eq!(state.routing_mode, RoutingMode::Synchronized);
    assert_eq!(state.plugin_state, PluginState::Connected);
    assert_eq!(
        h.event_names(),
        vec!["routing.multiroom_enabling", "routing.multiroom_ready"]
    );
}

#[tokio::test]
async fn test_relay_start_retries_then_succeeds() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub.request_source("radio").await.unwrap();
    h.event_names();
    h.services.fail_next(ServiceAction::Start, SNAPSERVER, 2);

    h.hub
        .set_routing_mode(RoutingMode::Synchronized)
        .await
        .unwrap();

    assert_eq!(h.services.call_count(ServiceAction::Start, SNAPSERVER), 3);
    assert_eq!(h.hub.get_state().routing_mode, RoutingMode::Synchronized);
    assert_eq!(h.persisted()["routing"]["mode"], "synchronized");

    let names = h.event_names();
    assert_eq!(names.last().map(String::as_str), Some("routing.multiroom_ready"));
}

#[tokio::test]
async fn test_exhausted_retries_roll_back() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub.request_source("radio").await.unwrap();
    h.event_names();
    let before_disk = h.persisted();
    h.services.fail_always(ServiceAction::Start, SNAPCLIENT);

    let err = h
        .hub
        .set_routing_mode(RoutingMode::Synchronized)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalServiceError);
    assert!(matches!(err, CoordinatorError::Service { attempts: 3, .. }));

    let state = h.hub.get_state();
    assert_eq!(state.routing_mode, RoutingMode::Direct);
    assert_eq!(state.active_source, Some(SourceId::Radio));
    assert_eq!(state.plugin_state, PluginState::Connected);
    assert_eq!(h.persisted(), before_disk);

    // snapserver came up, so it is stopped again; radio is back on its old sink.
    assert_eq!(h.services.call_count(ServiceAction::Stop, SNAPSERVER), 1);
    assert!(!h.services.is_running(SNAPSERVER));
    assert_eq!(
        h.plugin(SourceId::Radio).last_binding().unwrap().as_str(),
        "radio_direct"
    );
    assert_eq!(
        h.event_names(),
        vec!["routing.multiroom_enabling", "routing.multiroom_error"]
    );
}

#[tokio::test]
async fn test_disable_multiroom_stops_units_in_reverse() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub
        .set_routing_mode(RoutingMode::Synchronized)
        .await
        .unwrap();
    h.hub.request_source("spotify").await.unwrap();
    h.event_names();

    h.hub.set_routing_mode(RoutingMode::Direct).await.unwrap();

    let stops: Vec<ServiceCall> = h
        .services
        .calls()
        .into_iter()
        .filter(|c| c.action == ServiceAction::Stop)
        .collect();
    assert_eq!(
        stops,
        vec![
            call(ServiceAction::Stop, SNAPCLIENT),
            call(ServiceAction::Stop, SNAPSERVER),
        ]
    );
    assert_eq!(
        h.plugin(SourceId::Spotify).last_binding().unwrap().as_str(),
        "spotify_direct"
    );
    assert_eq!(
        h.event_names(),
        vec!["routing.multiroom_disabling", "routing.multiroom_ready"]
    );
}

#[tokio::test]
async fn test_equalizer_rebinds_without_service_calls() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub.request_source("radio").await.unwrap();
    h.event_names();

    h.hub.set_equalizer(true).await.unwrap();

    assert!(h.services.calls().is_empty());
    assert_eq!(
        h.plugin(SourceId::Radio).last_binding().unwrap().as_str(),
        "radio_direct_eq"
    );
    assert!(h.hub.get_state().equalizer_enabled);
    assert_eq!(h.persisted()["routing"]["equalizer_enabled"], true);
    assert_eq!(
        h.event_names(),
        vec!["routing.equalizer_enabling", "routing.equalizer_ready"]
    );
}

#[tokio::test]
async fn test_equalizer_failure_restores_original_binding() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub.request_source("radio").await.unwrap();
    h.event_names();
    h.plugin(SourceId::Radio)
        .queue_behavior(ConnectBehavior::FailStart);

    let err = h.hub.set_equalizer(true).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ExternalServiceError);
    let radio = h.plugin(SourceId::Radio);
    let bindings: Vec<String> = radio
        .bindings()
        .iter()
        .map(|b| b.as_str().to_string())
        .collect();
    assert_eq!(bindings, vec!["radio_direct", "radio_direct_eq", "radio_direct"]);

    let state = h.hub.get_state();
    assert!(!state.equalizer_enabled);
    assert_eq!(state.plugin_state, PluginState::Connected);
    assert_eq!(h.persisted()["routing"]["equalizer_enabled"], false);

    let error = h
        .events
        .drain()
        .into_iter()
        .last()
        .expect("an error event");
    assert_eq!(error.name(), "routing.equalizer_error");
    assert_eq!(error.data["error_kind"], "ExternalServiceError");
}

#[tokio::test]
async fn test_routing_persistence_failure_rolls_back() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.break_persistence();

    let err = h.hub.set_equalizer(true).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PersistenceError);
    assert!(!h.hub.get_state().equalizer_enabled);
    assert!(!h.hub.get_state().halted);
    assert_eq!(
        h.event_names(),
        vec!["routing.equalizer_enabling", "routing.equalizer_error"]
    );
}

#[tokio::test]
async fn test_routing_rejected_during_transition() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.plugin(SourceId::Radio)
        .set_behavior(ConnectBehavior::After(Duration::from_millis(150)));

    let hub = h.hub.clone();
    let radio = tokio::spawn(async move { hub.request_source("radio").await });
    assert_eq!(h.next_event().await.name(), "system.transition_start");

    let err = h.hub.set_equalizer(true).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConcurrencyError);

    radio.await.unwrap().unwrap();
    assert!(!h.hub.get_state().equalizer_enabled);
    assert_eq!(h.event_names(), vec!["system.transition_complete"]);
}

#[tokio::test]
async fn test_failed_restoration_halts_until_reset() {
    let dir = TempDir::new().unwrap();
    let mut h = Harness::start(dir.path()).await;
    h.hub.request_source("radio").await.unwrap();
    h.event_names();
    h.services.fail_always(ServiceAction::Start, SNAPCLIENT);
    h.services.fail_always(ServiceAction::Stop, SNAPSERVER);

    let err = h
        .hub
        .set_routing_mode(RoutingMode::Synchronized)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::RollbackFailure);
    let state = h.hub.get_state();
    assert!(state.halted);
    assert_eq!(state.plugin_state, PluginState::Error);
    assert_eq!(
        state.last_error.map(|e| e.kind),
        Some(ErrorKind::RollbackFailure)
    );
    assert_eq!(
        h.event_names(),
        vec!["routing.multiroom_enabling", "system.fatal"]
    );

    for err in [
        h.hub.request_source("bluetooth").await.unwrap_err(),
        h.hub.set_equalizer(true).await.unwrap_err(),
        h.hub.set_routing_mode(RoutingMode::Direct).await.unwrap_err(),
    ] {
        assert!(matches!(err, CoordinatorError::Halted));
        assert_eq!(err.kind(), ErrorKind::RollbackFailure);
    }
    assert!(h.event_names().is_empty());

    h.services.clear_failures();
    h.hub.reset().await.unwrap();

    let state = h.hub.get_state();
    assert!(!state.halted);
    assert!(state.last_error.is_none());
    assert_eq!(state.active_source, Some(SourceId::Radio));
    assert_eq!(state.plugin_state, PluginState::Inactive);
    assert_eq!(state.routing_mode, RoutingMode::Direct);
    assert_eq!(h.event_names(), vec!["system.reset"]);

    h.hub.request_source("radio").await.unwrap();
    assert_eq!(h.hub.get_state().plugin_state, PluginState::Connected);
}
