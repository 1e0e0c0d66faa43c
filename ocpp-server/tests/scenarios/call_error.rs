use rocpp_core::{format::frame::Call, v16::protocol_error::ProtocolError};
use rocpp_server::v16::{EngineEvent, ErrorCode, RequestStatus};
use serde_json::json;

use crate::harness::engine::EngineHarness;

pub async fn run() {
    let harness = EngineHarness::new();
    harness.connect("CP-A").await;

    let call = Call::new("err-1", "UnlockConnector", json!({"connectorId": 9})).unwrap();
    let handle = harness.engine.send_text("CP-A", call, None).await.unwrap();
    harness.transport.next_frame().await;
    harness.next_event().await;

    harness
        .engine
        .on_text_frame_received(
            "CP-A",
            r#"[4,"err-1","PropertyConstraintViolation","connector 9 does not exist",{"max":2}]"#,
        )
        .unwrap();

    let failure = handle.await.unwrap_err();
    assert_eq!(
        failure.code,
        ErrorCode::Protocol(ProtocolError::PropertyConstraintViolation)
    );
    assert_eq!(failure.description, "connector 9 does not exist");
    assert_eq!(failure.details, json!({"max": 2}));

    let entry = harness.engine.store().get("err-1").unwrap();
    assert_eq!(entry.status(), RequestStatus::Failed);
    assert!(entry.has_errors());
    assert_eq!(entry.error(), Some(&failure));

    match harness.next_event().await {
        EngineEvent::TextErrorReceived { request_id, error, .. } => {
            assert_eq!(request_id, "err-1");
            assert_eq!(error, failure);
        }
        other => panic!("unexpected {:?}", other),
    }

    harness.stop().await;
}
