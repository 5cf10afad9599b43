//! Actuator path tests
//!
//! Inbound command → action channel → actuator → pin and status publishes,
//! on paused time so the settle delay can be measured.


use device_agent::hardware::PinLevel;
use device_agent::protocol::{
    rpc_request_topic, ActionKind, ActuatorStatus, QoS, TelemetryPayload, ATTRIBUTES_TOPIC,
    TELEMETRY_TOPIC,
};
use device_agent::telemetry::{ActuationReport, Actuator};
use device_agent::testing::MockPinDriver;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{eventually, test_config, Harness};
use tokio::sync::watch;
use tokio::time::Instant;

const ON_REQUEST: &[u8] = br#"{"method":"setState","params":"ON"}"#;

fn status(topic: &str, status: ActuatorStatus) -> TelemetryPayload {
    TelemetryPayload::status(topic, status, QoS::AtLeastOnce)
}

fn actuator(harness: &Harness, pins: &Arc<MockPinDriver>, mirror: bool) -> Actuator {
    let mut section = test_config().actuator.unwrap();
    section.mirror_telemetry = mirror;
    Actuator::new(
        &section,
        pins.clone(),
        Arc::clone(&harness.context.actions),
        Arc::clone(&harness.context.session),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_on_command_toggles_pin_and_reports_twice() {
    let harness = Harness::new(&test_config());
    harness.bring_up().await;
    let pins = Arc::new(MockPinDriver::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(actuator(&harness, &pins, false).run(shutdown_rx));

    let injected = Instant::now();
    assert!(harness.messaging.inject_message(&rpc_request_topic(1), ON_REQUEST));
    eventually(Duration::from_millis(100), || pins.get_changes().len() == 1).await;

    assert_eq!(pins.get_changes(), vec![(2, PinLevel::High)]);
    assert_eq!(
        harness.published(),
        vec![status(ATTRIBUTES_TOPIC, ActuatorStatus::On)]
    );

    // Still high just before the settle delay runs out
    tokio::time::sleep_until(injected + Duration::from_millis(1_990)).await;
    assert_eq!(pins.get_changes().len(), 1);

    eventually(Duration::from_secs(3), || pins.get_changes().len() == 2).await;
    assert!(injected.elapsed() >= Duration::from_millis(2000));
    assert_eq!(
        pins.get_changes(),
        vec![(2, PinLevel::High), (2, PinLevel::Low)]
    );
    assert_eq!(
        harness.published(),
        vec![
            status(ATTRIBUTES_TOPIC, ActuatorStatus::On),
            status(ATTRIBUTES_TOPIC, ActuatorStatus::Off),
        ]
    );

    shutdown_tx.send_replace(true);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_commands_before_actuator_runs_coalesce() {
    let harness = Harness::new(&test_config());
    harness.bring_up().await;
    let pins = Arc::new(MockPinDriver::new());

    for request_id in 1..=3 {
        harness
            .messaging
            .inject_message(&rpc_request_topic(request_id), ON_REQUEST);
    }
    eventually(Duration::from_millis(100), || {
        harness.context.actions.writes() == 3
    })
    .await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let task = tokio::spawn(actuator(&harness, &pins, false).run(shutdown_rx));
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(pins.get_changes().len(), 2);
    assert_eq!(harness.published().len(), 2);

    shutdown_tx.send_replace(true);
    task.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_mirrored_status_goes_to_both_topics() {
    let harness = Harness::new(&test_config());
    harness.bring_up().await;
    let pins = Arc::new(MockPinDriver::new());

    let report = actuator(&harness, &pins, true)
        .execute(ActionKind::TurnOn)
        .await;

    assert_eq!(
        report,
        ActuationReport {
            published: 4,
            dropped: 0
        }
    );
    assert_eq!(
        harness.published(),
        vec![
            status(ATTRIBUTES_TOPIC, ActuatorStatus::On),
            status(TELEMETRY_TOPIC, ActuatorStatus::On),
            status(ATTRIBUTES_TOPIC, ActuatorStatus::Off),
            status(TELEMETRY_TOPIC, ActuatorStatus::Off),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_link_loss_during_settle_drops_off_report() {
    let harness = Harness::new(&test_config());
    harness.bring_up().await;
    let pins = Arc::new(MockPinDriver::new());
    let actuator = actuator(&harness, &pins, false);

    let execution = tokio::spawn(async move { actuator.execute(ActionKind::TurnOn).await });
    tokio::time::sleep(Duration::from_millis(500)).await;
    harness.drop_link("beacon timeout");

    let report = execution.await.unwrap();
    assert_eq!(
        report,
        ActuationReport {
            published: 1,
            dropped: 1
        }
    );
    // The pin still returns to idle
    assert_eq!(
        pins.get_changes(),
        vec![(2, PinLevel::High), (2, PinLevel::Low)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_action_runs_even_when_session_down() {
    let harness = Harness::new(&test_config());
    let pins = Arc::new(MockPinDriver::new());

    let report = actuator(&harness, &pins, false)
        .execute(ActionKind::TurnOn)
        .await;

    assert_eq!(
        report,
        ActuationReport {
            published: 0,
            dropped: 2
        }
    );
    assert_eq!(pins.get_changes().len(), 2);
    assert!(harness.messaging.sessions().is_empty());
}
