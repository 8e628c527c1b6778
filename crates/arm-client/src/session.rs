//! The supervision session.
//!
//! A [`Session`] owns the firmware link and every collaborator client. The
//! link is served by a supervisor task that connects, installs the
//! per-connection handlers and heartbeat, pumps frames until the socket goes
//! away, then backs off and reconnects. Telemetry and joint limits outlive
//! individual connections; correlations do not.

use crate::broker::{Broker, MqttBroker, SideChannel};
use crate::config::{ResolvedEndpoints, Settings};
use crate::error::{ClientError, Result};
use crate::feed::{seed_history, ChangeFeedHandle, SharedHistory};
use crate::heartbeat::{HeartbeatPoller, PollerHandle};
use crate::planner::{PlanExecutor, PlannerClient};
use crate::reconnect::{Backoff, LinkState};
use crate::recorder::PathRecorder;
use crate::rpc::{
    run_transport, Handler, PumpExit, RpcChannel, CAMERA_PIN_ID, EMERGENCY_STOP_ID, GCODE_ID,
};
use crate::services::{MaskClient, PolicyClient};
use crate::stream::FrameStreamHandle;
use crate::task::CancellableTask;
use crate::telemetry::MachineTelemetry;
use arm_core::gcode::{self, Preset};
use arm_core::joints::AXIS_NAMES;
use arm_core::limits::HTTP_TIMEOUT;
use arm_core::{ArmError, LiveFrame, PathSegment};
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tracing::{debug, error, info, warn};
use url::Url;

const GCODE_METHOD: &str = "printer.gcode.script";
const EMERGENCY_STOP_METHOD: &str = "printer.emergency_stop";

/// Live connection to the arm and its collaborators.
#[derive(Debug)]
pub struct Session {
    settings: Settings,
    endpoints: ResolvedEndpoints,
    http: reqwest::Client,
    stream_http: reqwest::Client,
    channel: RpcChannel,
    telemetry: MachineTelemetry,
    link: Arc<watch::Sender<LinkState>>,
    supervisor: Option<CancellableTask<()>>,
    side: Option<SideChannel>,
    broker_watch: Option<CancellableTask<()>>,
    frames: Option<FrameStreamHandle>,
    feed: Option<ChangeFeedHandle>,
    history: SharedHistory,
    planner: PlanExecutor,
    mask: MaskClient,
    policy: PolicyClient,
}

impl Session {
    /// Validate `settings` and build the clients. Nothing connects until
    /// [`Session::connect`].
    pub fn new(settings: Settings) -> Result<Self> {
        settings.validate()?;
        let endpoints = settings.endpoints.resolve()?;

        let http = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        // The camera stream never completes, so it only bounds the connect.
        let stream_http = reqwest::Client::builder()
            .connect_timeout(HTTP_TIMEOUT)
            .build()?;

        let telemetry = MachineTelemetry::new();
        let planner = PlanExecutor::new(
            PlannerClient::new(http.clone(), &endpoints.planner)?,
            telemetry.limits(),
        );
        let mask = MaskClient::new(http.clone(), &endpoints.mask)?;
        let policy = PolicyClient::new(http.clone(), &endpoints.policy)?;
        let (link, _) = watch::channel(LinkState::Disconnected);

        Ok(Self {
            history: SharedHistory::new(settings.frames.history_capacity),
            settings,
            endpoints,
            http,
            stream_http,
            channel: RpcChannel::new(),
            telemetry,
            link: Arc::new(link),
            supervisor: None,
            side: None,
            broker_watch: None,
            frames: None,
            feed: None,
            planner,
            mask,
            policy,
        })
    }

    /// Effective settings.
    #[must_use]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Normalized endpoints.
    #[must_use]
    pub fn endpoints(&self) -> &ResolvedEndpoints {
        &self.endpoints
    }

    /// The firmware RPC channel.
    #[must_use]
    pub fn channel(&self) -> &RpcChannel {
        &self.channel
    }

    /// Machine state fed by the heartbeat.
    #[must_use]
    pub fn telemetry(&self) -> &MachineTelemetry {
        &self.telemetry
    }

    /// Firmware link state.
    #[must_use]
    pub fn link_state(&self) -> watch::Receiver<LinkState> {
        self.link.subscribe()
    }

    /// Connect the broker and start the firmware link supervisor.
    pub fn connect(&mut self) {
        if self.side.is_none() {
            let endpoints = &self.settings.endpoints;
            let broker = MqttBroker::connect(
                &endpoints.mqtt_host,
                endpoints.mqtt_port,
                &endpoints.mqtt_client_id,
            );
            self.attach_broker(Arc::new(broker));
        }
        self.start_link();
    }

    /// Use `broker` for the side channel instead of the configured MQTT
    /// broker. Subscribes to the camera topic in the background, so this
    /// must run inside a Tokio runtime.
    pub fn attach_broker(&mut self, broker: Arc<dyn Broker>) {
        let side = SideChannel::new(broker);
        let observer = side.clone();
        self.broker_watch = Some(CancellableTask::spawn(move |stop| observer.observe(stop)));
        self.side = Some(side);
    }

    /// Start the firmware link supervisor if it is not running.
    pub fn start_link(&mut self) {
        if self.supervisor.as_ref().is_some_and(|task| !task.is_finished()) {
            debug!("Firmware link already running");
            return;
        }
        let link = LinkSupervisor {
            url: self.endpoints.moonraker.clone(),
            channel: self.channel.clone(),
            telemetry: self.telemetry.clone(),
            interval: self.settings.heartbeat_interval(),
            backoff: self.settings.backoff(),
            state: Arc::clone(&self.link),
        };
        self.supervisor = Some(CancellableTask::spawn(move |cancel| link.run(cancel)));
    }

    /// Stop every background task and drop the link.
    pub async fn shutdown(&mut self) {
        if let Some(mut frames) = self.frames.take() {
            frames.abort();
            frames.join().await;
        }
        if let Some(mut feed) = self.feed.take() {
            feed.stop();
            feed.join().await;
        }
        if let Some(mut supervisor) = self.supervisor.take() {
            supervisor.shutdown().await;
        }
        if let Some(mut observer) = self.broker_watch.take() {
            observer.shutdown().await;
        }
        self.side = None;
        info!("Session shut down");
    }

    /// Run a G-code script. Refused unless the machine reports ready.
    pub fn run_gcode(&self, script: &str) -> Result<()> {
        if !self.telemetry.readiness().is_ready() {
            return Err(ClientError::NotConnected("machine is not ready".into()));
        }
        self.channel
            .send_with_id(GCODE_ID, GCODE_METHOD, Some(json!({ "script": script })))
    }

    /// Halt the machine. Only needs the link, not readiness.
    pub fn emergency_stop(&self) -> Result<()> {
        warn!("Emergency stop requested");
        self.channel
            .send_with_id(EMERGENCY_STOP_ID, EMERGENCY_STOP_METHOD, None)
    }

    /// Move one axis to `value`. Refused until the arm is homed and for
    /// targets outside the axis's known limit.
    pub fn jog_axis(&self, axis: char, value: f64) -> Result<()> {
        let joint = AXIS_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(&axis))
            .ok_or_else(|| ArmError::InvalidInput(format!("unknown axis '{axis}'")))?;
        if !value.is_finite() {
            return Err(ArmError::InvalidInput(format!("axis {axis} target {value}")).into());
        }
        if !self.telemetry.homed().is_homed() {
            return Err(ArmError::NotHomed { axis }.into());
        }
        if let Some(limit) = self.telemetry.limits().joint(joint) {
            if !limit.contains(value) {
                return Err(ArmError::LimitViolation {
                    step: 0,
                    joint,
                    value,
                    min: limit.min,
                    max: limit.max,
                }
                .into());
            }
        }
        self.run_gcode(&gcode::jog(axis, value))
    }

    /// Move to a named posture.
    pub fn move_to_preset(&self, preset: Preset) -> Result<()> {
        info!(preset = preset.name(), "Moving to preset");
        self.run_gcode(&gcode::preset(preset))
    }

    /// Run the homing sequence.
    pub fn home(&self) -> Result<()> {
        self.run_gcode(gcode::HOME)
    }

    /// Release the motors.
    pub fn power_down(&self) -> Result<()> {
        self.run_gcode(gcode::POWER_DOWN)
    }

    /// Set the gripper servo angle in degrees.
    pub fn set_gripper(&self, angle: f64) -> Result<()> {
        self.run_gcode(&gcode::gripper(angle))
    }

    /// Replay one recorded segment: the joint move, then the gripper.
    pub fn run_segment(&self, segment: &PathSegment) -> Result<()> {
        for script in gcode::segment(segment) {
            self.run_gcode(&script)?;
        }
        Ok(())
    }

    /// Switch the camera and its recording over the broker, and the camera
    /// power pin over the firmware link.
    pub async fn toggle_camera(&self, enable: bool, record: bool) -> Result<()> {
        self.side_channel()?.toggle_camera(enable, record).await?;
        if let Err(err) = self.channel.send_with_id(
            CAMERA_PIN_ID,
            GCODE_METHOD,
            Some(json!({ "script": gcode::camera_pin(enable) })),
        ) {
            warn!(error = %err, enable, "Camera pin not switched");
        }
        Ok(())
    }

    /// Send a manipulator set-point over the broker.
    pub async fn set_manipulator(&self, value: f64) -> Result<()> {
        self.side_channel()?.set_manipulator(value).await
    }

    fn side_channel(&self) -> Result<&SideChannel> {
        self.side
            .as_ref()
            .ok_or_else(|| ClientError::NotConnected("broker session not started".into()))
    }

    /// Start reading the camera stream, replacing any running reader.
    pub fn start_frame_stream(&mut self) -> watch::Receiver<Option<LiveFrame>> {
        let handle =
            FrameStreamHandle::spawn(self.stream_http.clone(), self.endpoints.camera.clone());
        let latest = handle.subscribe();
        if let Some(mut previous) = self.frames.replace(handle) {
            previous.abort();
        }
        latest
    }

    /// Most recent camera frame.
    #[must_use]
    pub fn latest_frame(&self) -> Option<LiveFrame> {
        self.frames.as_ref().and_then(FrameStreamHandle::latest)
    }

    /// Abort the camera stream. Returns `true` if a reader was running.
    pub fn stop_frame_stream(&mut self) -> bool {
        self.frames.take().is_some_and(|mut handle| handle.abort())
    }

    /// Start consuming the capture change feed into the history.
    pub fn start_change_feed(&mut self) {
        let handle =
            ChangeFeedHandle::spawn(self.endpoints.change_feed.clone(), self.history.clone());
        if let Some(mut previous) = self.feed.replace(handle) {
            previous.stop();
        }
    }

    /// Load the newest stored captures into the history.
    pub async fn seed_history(&self) -> Result<usize> {
        let collection = self.endpoints.store_path("camera")?;
        seed_history(&self.http, &collection, &self.history).await
    }

    /// Bounded capture history.
    #[must_use]
    pub fn history(&self) -> &SharedHistory {
        &self.history
    }

    /// Plan request, validation and execution.
    #[must_use]
    pub fn planner(&self) -> &PlanExecutor {
        &self.planner
    }

    /// Segmentation mask service.
    #[must_use]
    pub fn mask(&self) -> &MaskClient {
        &self.mask
    }

    /// Policy prediction service.
    #[must_use]
    pub fn policy(&self) -> &PolicyClient {
        &self.policy
    }

    /// New path recorder posting to the store.
    pub fn recorder(&self) -> Result<PathRecorder> {
        Ok(PathRecorder::new(
            self.http.clone(),
            self.endpoints.store_path("paths")?,
        ))
    }
}

/// Everything the link task needs, moved into it on start.
struct LinkSupervisor {
    url: Url,
    channel: RpcChannel,
    telemetry: MachineTelemetry,
    interval: Duration,
    backoff: Backoff,
    state: Arc<watch::Sender<LinkState>>,
}

impl LinkSupervisor {
    async fn run(self, mut cancel: oneshot::Receiver<()>) {
        let mut attempt: u32 = 0;
        self.state.send_replace(LinkState::Connecting);
        loop {
            let mut poller: Option<PollerHandle> = None;
            let exit = run_transport(&self.url, &self.channel, &mut cancel, || {
                attempt = 0;
                self.state.send_replace(LinkState::Connected { since: Utc::now() });
                install_command_handlers(&self.channel);
                poller = Some(
                    HeartbeatPoller::new(self.channel.clone(), self.telemetry.clone(), self.interval)
                        .spawn(),
                );
            })
            .await;
            if let Some(poller) = poller.take() {
                poller.shutdown().await;
            }
            self.telemetry.link_lost();

            let reason = match exit {
                PumpExit::Cancelled => break,
                PumpExit::Closed => {
                    warn!("Firmware link closed");
                    "connection closed".to_string()
                }
                PumpExit::Failed(err) => {
                    error!(error = %err, "Firmware link failed");
                    err.to_string()
                }
            };

            attempt = attempt.saturating_add(1);
            if !self.backoff.allows(attempt) {
                warn!(attempt, "Giving up on the firmware link");
                break;
            }
            let delay = self.backoff.delay(attempt);
            info!(attempt, ?delay, "Reconnecting to firmware");
            self.state.send_replace(LinkState::Reconnecting {
                attempt,
                last_error: reason,
            });
            tokio::select! {
                biased;
                _ = &mut cancel => break,
                () = tokio::time::sleep(delay) => {}
            }
        }
        self.state.send_replace(LinkState::Disconnected);
        debug!("Firmware link stopped");
    }
}

/// Log firmware replies to fixed commands. Errors are the only interesting
/// part; successful replies carry `"ok"`.
fn install_command_handlers(channel: &RpcChannel) {
    for (id, label) in [
        (GCODE_ID, "G-code"),
        (CAMERA_PIN_ID, "Camera pin"),
        (EMERGENCY_STOP_ID, "Emergency stop"),
    ] {
        channel.install_reserved(
            id,
            Handler::persistent(move |payload: &Value| match payload.get("error") {
                Some(err) => error!(command = label, error = %err, "Firmware rejected command"),
                None => debug!(command = label, "Command acknowledged"),
            }),
        );
    }
}
