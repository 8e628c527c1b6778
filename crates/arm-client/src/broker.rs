//! MQTT side-channel for binary device toggles.
//!
//! The broker session is independent of the firmware link. Messages are
//! last-value-wins per topic; nothing orders one topic against another.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Camera power on/off.
pub const CAMERA_COMMAND_TOPIC: &str = "/camera/command";
/// Camera recording on/off.
pub const CAMERA_RECORD_TOPIC: &str = "/camera/record";
/// Manipulator set-point as a stringified number.
pub const MANIPULATOR_COMMAND_TOPIC: &str = "/manipulator/command";

const EVENT_QUEUE_CAPACITY: usize = 32;
const RECONNECT_PAUSE: Duration = Duration::from_secs(1);

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

/// One inbound publish.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    /// Topic name.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
}

/// Publish/subscribe session.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish `payload` on `topic`.
    async fn publish(&self, topic: &str, payload: &str) -> Result<()>;

    /// Subscribe to `topic`. Broker-side refusals are reported in the log.
    async fn subscribe(&self, topic: &str) -> Result<()>;

    /// Inbound publishes on subscribed topics, if the session delivers any.
    fn inbound(&self) -> Option<broadcast::Receiver<BrokerMessage>> {
        None
    }
}

/// `rumqttc`-backed broker session.
#[derive(Debug)]
pub struct MqttBroker {
    client: AsyncClient,
    messages: broadcast::Sender<BrokerMessage>,
    event_loop: JoinHandle<()>,
}

impl MqttBroker {
    /// Start a session. Connection happens in the background and is retried
    /// until [`MqttBroker::disconnect`].
    pub fn connect(host: &str, port: u16, client_id: &str) -> Self {
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(Duration::from_secs(5));
        let (client, mut event_loop) = AsyncClient::new(options, EVENT_QUEUE_CAPACITY);
        let (messages, _) = broadcast::channel(EVENT_QUEUE_CAPACITY);

        let tx = messages.clone();
        let host = host.to_string();
        let event_loop = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!(%host, port, "Connected to MQTT broker");
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        debug!(topic = %publish.topic, payload = ?publish.payload, "MQTT message");
                        let _ = tx.send(BrokerMessage {
                            topic: publish.topic,
                            payload: publish.payload,
                        });
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        if ack
                            .return_codes
                            .iter()
                            .any(|code| matches!(code, SubscribeReasonCode::Failure))
                        {
                            error!(pkid = ack.pkid, "Broker refused subscription");
                        }
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker sent disconnect");
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(error = %err, "MQTT connection error, retrying");
                        tokio::time::sleep(RECONNECT_PAUSE).await;
                    }
                }
            }
        });

        Self {
            client,
            messages,
            event_loop,
        }
    }

    /// Send DISCONNECT and stop the event loop.
    pub async fn disconnect(&self) {
        if let Err(err) = self.client.disconnect().await {
            debug!(error = %err, "MQTT disconnect not queued");
        }
        self.event_loop.abort();
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.event_loop.abort();
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload.as_bytes().to_vec())
            .await?;
        debug!(topic, payload, "Published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<()> {
        self.client.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    fn inbound(&self) -> Option<broadcast::Receiver<BrokerMessage>> {
        Some(self.messages.subscribe())
    }
}

/// Device toggles expressed over a [`Broker`].
#[derive(Clone)]
pub struct SideChannel {
    broker: Arc<dyn Broker>,
}

impl std::fmt::Debug for SideChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SideChannel")
    }
}

impl SideChannel {
    /// Wrap a broker session.
    pub fn new(broker: Arc<dyn Broker>) -> Self {
        Self { broker }
    }

    /// Switch the camera and its recording. Recording is forced off when the
    /// camera is being disabled.
    pub async fn toggle_camera(&self, enable: bool, record: bool) -> Result<()> {
        let record = enable && record;
        self.broker
            .publish(CAMERA_COMMAND_TOPIC, on_off(enable))
            .await?;
        self.broker
            .publish(CAMERA_RECORD_TOPIC, on_off(record))
            .await?;
        info!(enable, record, "Camera toggled");
        Ok(())
    }

    /// Send a manipulator set-point.
    pub async fn set_manipulator(&self, value: f64) -> Result<()> {
        self.broker
            .publish(MANIPULATOR_COMMAND_TOPIC, &value.to_string())
            .await
    }

    /// Subscribe to the camera command topic to observe other controllers.
    pub async fn watch_camera(&self) -> Result<()> {
        self.broker.subscribe(CAMERA_COMMAND_TOPIC).await
    }

    /// Subscribe to the camera topic and log what other controllers publish
    /// until `stop` fires or the broker session ends.
    pub async fn observe(self, mut stop: oneshot::Receiver<()>) {
        let inbound = self.broker.inbound();
        if let Err(err) = self.watch_camera().await {
            error!(error = %err, topic = CAMERA_COMMAND_TOPIC, "Subscription failed");
        }
        let Some(mut inbound) = inbound else {
            return;
        };
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                message = inbound.recv() => match message {
                    Ok(message) => info!(
                        topic = %message.topic,
                        payload = %String::from_utf8_lossy(&message.payload),
                        "Broker message observed"
                    ),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Broker messages dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
        debug!("Broker observer stopped");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    pub(crate) struct RecordingBroker {
        pub(crate) published: Mutex<Vec<(String, String)>>,
        pub(crate) subscribed: Mutex<Vec<String>>,
        pub(crate) inbound: broadcast::Sender<BrokerMessage>,
    }

    impl Default for RecordingBroker {
        fn default() -> Self {
            Self {
                published: Mutex::default(),
                subscribed: Mutex::default(),
                inbound: broadcast::channel(8).0,
            }
        }
    }

    #[async_trait]
    impl Broker for RecordingBroker {
        async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
            self.published
                .lock()
                .push((topic.to_string(), payload.to_string()));
            Ok(())
        }

        async fn subscribe(&self, topic: &str) -> Result<()> {
            self.subscribed.lock().push(topic.to_string());
            Ok(())
        }

        fn inbound(&self) -> Option<broadcast::Receiver<BrokerMessage>> {
            Some(self.inbound.subscribe())
        }
    }

    pub(crate) fn payloads(broker: &RecordingBroker, topic: &str) -> Vec<String> {
        broker
            .published
            .lock()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, p)| p.clone())
            .collect()
    }

    #[tokio::test]
    async fn record_never_on_without_enable() {
        let broker = Arc::new(RecordingBroker::default());
        let side = SideChannel::new(broker.clone());
        for (enable, record) in [(false, true), (false, false), (true, false), (true, true)] {
            side.toggle_camera(enable, record).await.unwrap();
        }
        assert_eq!(payloads(&broker, CAMERA_COMMAND_TOPIC), ["off", "off", "on", "on"]);
        assert_eq!(payloads(&broker, CAMERA_RECORD_TOPIC), ["off", "off", "off", "on"]);
    }

    #[tokio::test]
    async fn manipulator_payload_is_a_number() {
        let broker = Arc::new(RecordingBroker::default());
        let side = SideChannel::new(broker.clone());
        side.set_manipulator(42.5).await.unwrap();
        side.set_manipulator(0.0).await.unwrap();
        assert_eq!(payloads(&broker, MANIPULATOR_COMMAND_TOPIC), ["42.5", "0"]);
    }

    #[tokio::test]
    #[traced_test]
    async fn observer_subscribes_and_logs_inbound() {
        let broker = Arc::new(RecordingBroker::default());
        let side = SideChannel::new(broker.clone());
        let (stop_tx, stop_rx) = oneshot::channel();

        // Same task as the test so the observer's logs are captured.
        let driver = async move {
            tokio::time::timeout(Duration::from_secs(5), async {
                while broker.subscribed.lock().is_empty() {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
            assert_eq!(*broker.subscribed.lock(), [CAMERA_COMMAND_TOPIC]);

            broker
                .inbound
                .send(BrokerMessage {
                    topic: CAMERA_COMMAND_TOPIC.to_string(),
                    payload: Bytes::from_static(b"off"),
                })
                .unwrap();
            tokio::time::timeout(Duration::from_secs(5), async {
                while !logs_contain("Broker message observed") {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
            stop_tx.send(()).unwrap();
        };
        tokio::join!(side.observe(stop_rx), driver);
    }
}
