use std::time::Duration;

use rocpp_core::format::frame::Call;
use rocpp_server::v16::{EngineEvent, RequestStatus};
use serde_json::json;

use crate::harness::engine::EngineHarness;

pub async fn run() {
    let harness = EngineHarness::new();
    let context = harness.connect("CP-A").await;
    harness.connect("CP-B").await;
    assert_eq!(harness.engine.connection_count(), 2);

    let handle_a = harness
        .engine
        .send_text(
            "CP-A",
            Call::new("125", "Reset", json!({"type": "Hard"})).unwrap(),
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    let handle_b = harness
        .engine
        .send_text(
            "CP-B",
            Call::new("126", "Reset", json!({"type": "Hard"})).unwrap(),
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    for _ in 0..2 {
        harness.transport.next_frame().await;
        harness.next_event().await;
    }

    harness.transport.disconnect("CP-A");
    assert_eq!(harness.engine.on_connection_closed("CP-A", context.event_tracking_id), 1);
    assert!(context.cancellation.is_cancelled());
    assert!(harness.engine.connection("CP-A").is_none());

    // resolved right away, not after the ten second timeout
    let failure = tokio::time::timeout(Duration::from_millis(100), handle_a)
        .await
        .expect("connection loss did not fail the request")
        .unwrap_err();
    assert!(failure.code.is_connection_lost());

    let entry = harness.engine.store().get("125").unwrap();
    assert_eq!(entry.status(), RequestStatus::Failed);
    assert!(entry.error().unwrap().code.is_connection_lost());
    assert!(harness.engine.store().get("126").unwrap().is_pending());

    match harness.next_event().await {
        EngineEvent::TextErrorReceived { connection, request_id, .. } => {
            assert_eq!(connection, "CP-A");
            assert_eq!(request_id, "125");
        }
        other => panic!("unexpected {:?}", other),
    }

    // closing again finds nothing left to fail
    assert_eq!(harness.engine.on_connection_closed("CP-A", context.event_tracking_id), 0);

    harness
        .engine
        .on_text_frame_received("CP-B", r#"[3,"126",{"status":"Accepted"}]"#)
        .unwrap();
    assert_eq!(handle_b.await, Ok(json!({"status": "Accepted"})));

    harness.stop().await;
}

pub async fn run_reconnect() {
    let harness = EngineHarness::new();
    harness.connect("CP-A").await;
    let first = harness.engine.connection("CP-A").unwrap();

    let handle = harness
        .engine
        .send_text(
            "CP-A",
            Call::new("r-1", "TriggerMessage", json!({"requestedMessage": "Heartbeat"})).unwrap(),
            None,
        )
        .await
        .unwrap();
    harness.transport.next_frame().await;
    harness.next_event().await;

    let second = harness.engine.on_new_connection("CP-A", "ws-test-2");
    assert!(first.cancellation.is_cancelled());
    assert!(!second.cancellation.is_cancelled());
    assert_ne!(first.event_tracking_id, second.event_tracking_id);

    let failure = handle.await.unwrap_err();
    assert!(failure.code.is_connection_lost());

    let mut saw_error = false;
    let mut saw_connection = false;
    for _ in 0..2 {
        match harness.next_event().await {
            EngineEvent::TextErrorReceived { request_id, .. } => {
                assert_eq!(request_id, "r-1");
                saw_error = true;
            }
            EngineEvent::NewConnection {
                channel,
                event_tracking_id,
                ..
            } => {
                assert_eq!(channel, "ws-test-2");
                assert_eq!(event_tracking_id, second.event_tracking_id);
                saw_connection = true;
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert!(saw_error && saw_connection);

    harness.stop().await;
}

pub async fn run_stale_close() {
    let harness = EngineHarness::new();
    let old = harness.connect("CP-A").await;

    // the station comes back before its old socket is reported closed
    let current = harness.engine.on_new_connection("CP-A", "ws-test-2");
    harness.next_event().await;

    let handle = harness
        .engine
        .send_text(
            "CP-A",
            Call::new("new-1", "GetConfiguration", json!({})).unwrap(),
            Some(Duration::from_secs(10)),
        )
        .await
        .unwrap();
    harness.transport.next_frame().await;
    harness.next_event().await;

    assert_eq!(harness.engine.on_connection_closed("CP-A", old.event_tracking_id), 0);
    assert!(!current.cancellation.is_cancelled());
    assert_eq!(
        harness.engine.connection("CP-A").unwrap().event_tracking_id,
        current.event_tracking_id
    );
    assert!(harness.engine.store().get("new-1").unwrap().is_pending());
    assert!(harness.no_more_events());

    harness
        .engine
        .on_text_frame_received("CP-A", r#"[3,"new-1",{"configurationKey":[]}]"#)
        .unwrap();
    assert_eq!(handle.await, Ok(json!({"configurationKey": []})));

    assert_eq!(
        harness.engine.on_connection_closed("CP-A", current.event_tracking_id),
        0
    );
    assert!(current.cancellation.is_cancelled());
    assert!(harness.engine.connection("CP-A").is_none());

    harness.stop().await;
}
