use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use rocpp_core::format::frame::Call;
use rocpp_server::v16::EngineEvent;
use serde_json::json;

use crate::harness::engine::EngineHarness;

pub async fn run() {
    let harness = EngineHarness::new();
    let seen = Arc::new(AtomicUsize::new(0));

    harness
        .engine
        .subscribe(|_: &EngineEvent| -> anyhow::Result<()> { panic!("audit sink crashed") });
    harness
        .engine
        .subscribe(|event: &EngineEvent| -> anyhow::Result<()> {
            anyhow::bail!("metrics backend unreachable for {}", event.connection())
        });
    let counter = seen.clone();
    harness
        .engine
        .subscribe(move |_: &EngineEvent| -> anyhow::Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

    harness.connect("CP-A").await;
    let handle = harness
        .engine
        .send_text(
            "CP-A",
            Call::new("h-1", "DataTransfer", json!({"vendorId": "acme"})).unwrap(),
            None,
        )
        .await
        .unwrap();
    harness.transport.next_frame().await;
    harness.next_event().await;

    harness
        .engine
        .on_text_frame_received("CP-A", r#"[3,"h-1",{"status":"Accepted"}]"#)
        .unwrap();
    assert_eq!(handle.await, Ok(json!({"status": "Accepted"})));
    harness.next_event().await;

    // new connection, request sent, response received
    assert_eq!(seen.load(Ordering::SeqCst), 3);

    harness.stop().await;
}
