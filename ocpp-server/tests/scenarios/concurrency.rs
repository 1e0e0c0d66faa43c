use std::time::Duration;

use futures::future::join_all;
use rocpp_core::format::frame::Call;
use rocpp_server::v16::EngineEvent;
use serde_json::json;

use crate::harness::engine::EngineHarness;

const STATIONS: usize = 4;
const REQUESTS_PER_STATION: usize = 25;

pub async fn run() {
    let harness = EngineHarness::new();
    for s in 0..STATIONS {
        harness.connect(&format!("CP-{s}")).await;
    }

    let mut tasks = Vec::new();
    for s in 0..STATIONS {
        for r in 0..REQUESTS_PER_STATION {
            let engine = harness.engine.clone();
            tasks.push(tokio::spawn(async move {
                let station = format!("CP-{s}");
                let id = format!("{s}-{r}");
                let call = Call::new(id.clone(), "ChangeConfiguration", json!({"n": r})).unwrap();
                let handle = engine
                    .send_text(&station, call, Some(Duration::from_millis(200)))
                    .await
                    .unwrap();

                // odd requests are left to the sweeper
                let answered = if r % 2 == 0 {
                    let frame = format!(r#"[3,"{id}",{{"n":{r}}}]"#);
                    Some(engine.on_text_frame_received(&station, &frame).is_ok())
                } else {
                    None
                };
                let reply = tokio::time::timeout(Duration::from_secs(2), handle)
                    .await
                    .expect("request never resolved");
                (r, answered, reply)
            }));
        }
    }

    for result in join_all(tasks).await {
        let (r, answered, reply) = result.unwrap();
        match answered {
            Some(true) => assert_eq!(reply, Ok(json!({"n": r}))),
            Some(false) | None => assert!(reply.unwrap_err().code.is_timeout()),
        }
    }

    let total = STATIONS * REQUESTS_PER_STATION;
    let (mut sent, mut resolved) = (0, 0);
    while sent < total || resolved < total {
        match harness.next_event().await {
            EngineEvent::TextRequestSent { .. } => sent += 1,
            EngineEvent::TextResponseReceived { .. } | EngineEvent::TextErrorReceived { .. } => {
                resolved += 1
            }
            other => panic!("unexpected {:?}", other),
        }
    }
    assert_eq!(sent, total);
    assert_eq!(resolved, total);
    assert_eq!(harness.engine.store().pending_count(), 0);

    harness.stop().await;
}
