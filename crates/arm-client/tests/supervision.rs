//! Session-level scenarios against in-process fakes.
//!
//! The firmware link is replaced by driving [`RpcChannel`] directly: the
//! receiver returned by `open()` stands in for the socket writer and
//! `on_message` for the socket reader.
//!
//! Run live-peer tests with: cargo test -p arm-client -- --ignored

use arm_client::broker::{CAMERA_COMMAND_TOPIC, CAMERA_RECORD_TOPIC};
use arm_client::heartbeat::HeartbeatPoller;
use arm_client::rpc::{PROBE_ID, QUERY_ID};
use arm_client::stream::DEFAULT_BOUNDARY;
use arm_client::{
    Broker, ClientError, LinkState, MachineTelemetry, MultipartDecoder, RpcChannel, Session,
    Settings, SharedHistory, SideChannel,
};
use arm_core::{FrameRecord, HomedState, ReadinessState};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;

fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(text) = rx.try_recv() {
        out.push(serde_json::from_str(&text).unwrap());
    }
    out
}

fn status_response(homed_axes: &str, position: f64) -> String {
    json!({
        "id": QUERY_ID,
        "result": {
            "status": {
                "toolhead": {
                    "homed_axes": homed_axes,
                    "axis_minimum": [-90.0, -45.0, -45.0, -180.0, -90.0, -180.0, 0.0],
                    "axis_maximum": [90.0, 45.0, 45.0, 180.0, 90.0, 180.0, 0.0],
                    "position": [position, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]
                }
            }
        }
    })
    .to_string()
}

#[tokio::test(start_paused = true)]
async fn heartbeat_drives_telemetry_over_fake_transport() {
    let channel = RpcChannel::new();
    let telemetry = MachineTelemetry::new();
    let mut wire = channel.open();
    let mut handle =
        HeartbeatPoller::new(channel.clone(), telemetry.clone(), Duration::from_secs(2)).spawn();

    // First tick: only the probe, the machine is not ready yet.
    tokio::time::sleep(Duration::from_millis(2100)).await;
    let sent = drain(&mut wire);
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0]["id"], PROBE_ID);
    assert_eq!(sent[0]["jsonrpc"], "2.0");

    // An unanswered tick is not an error; reply late.
    channel.on_message(&json!({"id": PROBE_ID, "result": {"klippy_state": "ready"}}).to_string());
    assert_eq!(telemetry.readiness(), ReadinessState::Ready);

    // Next tick carries the detailed query as well.
    tokio::time::sleep(Duration::from_secs(2)).await;
    let ids: Vec<Value> = drain(&mut wire).into_iter().map(|v| v["id"].clone()).collect();
    assert_eq!(ids, [json!(PROBE_ID), json!(QUERY_ID)]);

    channel.on_message(&status_response("xyz", 12.5));
    assert_eq!(telemetry.homed(), HomedState::Unhomed);
    assert_eq!(telemetry.positions(), [12.5, 0.0, 0.0, 0.0, 0.0, 0.0]);
    let first = telemetry.limits().joint(0).unwrap();
    assert_eq!((first.min, first.max), (-90.0, 90.0));

    // Limits are captured once; positions and homing keep updating.
    let mut later = serde_json::from_str::<Value>(&status_response("xyzabc", 30.0)).unwrap();
    later["result"]["status"]["toolhead"]["axis_minimum"] = json!(vec![-1.0; 6]);
    channel.on_message(&later.to_string());
    assert_eq!(telemetry.homed(), HomedState::Homed);
    assert_eq!(telemetry.positions()[0], 30.0);
    assert_eq!(telemetry.limits().joint(0).unwrap().min, -90.0);

    // Link loss abandons the handlers; the poller keeps quiet until reopened.
    channel.close();
    assert_eq!(channel.pending(), 0);
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(wire.try_recv().is_err());

    assert!(handle.stop());
}

#[tokio::test]
async fn pending_calls_fail_on_link_loss() {
    let channel = RpcChannel::new();
    let _wire = channel.open();
    let reply = channel.call("printer.info", None).unwrap();
    channel.close();
    assert!(reply.await.is_err());
    assert!(matches!(
        channel.send("server.info", None),
        Err(ClientError::NotConnected(_))
    ));
}

fn camera_part(body: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "\r\n--{DEFAULT_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(body);
    out
}

#[test]
fn multipart_frames_survive_arbitrary_chunking() {
    let frames: Vec<Vec<u8>> = (0..5_u8)
        .map(|i| {
            let mut jpeg = vec![0xff, 0xd8];
            jpeg.extend(std::iter::repeat(i).take(100 + usize::from(i) * 37));
            jpeg.extend([0xff, 0xd9]);
            jpeg
        })
        .collect();
    let stream: Vec<u8> = frames.iter().flat_map(|f| camera_part(f)).collect();

    for chunk_size in [1, 3, 17, 64, 1000] {
        let content_type = format!("multipart/x-mixed-replace;boundary={DEFAULT_BOUNDARY}");
        let mut decoder = MultipartDecoder::from_content_type(Some(&content_type));
        let decoded: Vec<Vec<u8>> = stream
            .chunks(chunk_size)
            .flat_map(|chunk| decoder.push(chunk))
            .map(|b| b.to_vec())
            .collect();
        assert_eq!(decoded, frames, "chunk size {chunk_size}");
    }
}

#[tokio::test]
async fn history_evicts_oldest_and_notifies() {
    let history = SharedHistory::new(8);
    let mut updates = history.subscribe();
    for i in 0..10 {
        history.push(FrameRecord {
            timestamp: f64::from(i),
            image: format!("frame-{i}"),
        });
    }
    assert!(updates.has_changed().unwrap());
    let seen = updates.borrow_and_update().clone();
    assert_eq!(seen.len(), 8);
    assert_eq!(seen.first().unwrap().image, "frame-2");
    assert_eq!(seen.last().unwrap().image, "frame-9");
}

#[derive(Default)]
struct RecordingBroker {
    published: Mutex<Vec<(String, String)>>,
}

#[async_trait]
impl Broker for RecordingBroker {
    async fn publish(&self, topic: &str, payload: &str) -> arm_client::Result<()> {
        self.published
            .lock()
            .push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn subscribe(&self, _topic: &str) -> arm_client::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn recording_never_on_while_camera_off() {
    let broker = Arc::new(RecordingBroker::default());
    let side = SideChannel::new(broker.clone());
    for enable in [true, false] {
        for record in [true, false] {
            side.toggle_camera(enable, record).await.unwrap();
        }
    }

    let published = broker.published.lock().clone();
    // Every toggle publishes the command then the record state.
    for pair in published.chunks(2) {
        assert_eq!(pair[0].0, CAMERA_COMMAND_TOPIC);
        assert_eq!(pair[1].0, CAMERA_RECORD_TOPIC);
        if pair[0].1 == "off" {
            assert_eq!(pair[1].1, "off");
        }
    }
    assert_eq!(published.len(), 8);
}

#[tokio::test]
#[ignore = "requires a running Moonraker at RUST_ARM_ENDPOINTS__MOONRAKER"]
async fn live_firmware_reports_ready() {
    let settings = Settings::load(None).unwrap();
    let mut session = Session::new(settings).unwrap();
    session.start_link();

    let mut link = session.link_state();
    tokio::time::timeout(Duration::from_secs(10), link.wait_for(LinkState::is_connected))
        .await
        .unwrap()
        .unwrap();

    let mut telemetry = session.telemetry().subscribe();
    tokio::time::timeout(
        Duration::from_secs(10),
        telemetry.wait_for(|s| s.readiness.is_ready()),
    )
    .await
    .unwrap()
    .unwrap();

    session.shutdown().await;
}
