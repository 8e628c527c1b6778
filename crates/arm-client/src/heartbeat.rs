//! Periodic liveness probe and status query.
//!
//! Each tick sends `server.info`; when the machine is ready it also sends the
//! detailed `printer.objects.query`. Responses are handled asynchronously by
//! handlers installed on the reserved ids. A missing response is not an error:
//! the next tick simply probes again.

use crate::rpc::{Handler, RpcChannel, PROBE_ID, QUERY_ID};
use crate::task::CancellableTask;
use crate::telemetry::MachineTelemetry;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Parameters of the detailed status query.
#[must_use]
pub fn query_params() -> Value {
    json!({
        "objects": {
            "gcode_move": null,
            "toolhead": ["homed_axes", "axis_minimum", "axis_maximum", "position"]
        }
    })
}

/// Heartbeat bound to one channel.
#[derive(Debug, Clone)]
pub struct HeartbeatPoller {
    channel: RpcChannel,
    telemetry: MachineTelemetry,
    interval: Duration,
}

impl HeartbeatPoller {
    /// Create a poller; nothing runs until [`HeartbeatPoller::spawn`].
    #[must_use]
    pub fn new(channel: RpcChannel, telemetry: MachineTelemetry, interval: Duration) -> Self {
        Self {
            channel,
            telemetry,
            interval,
        }
    }

    /// Route probe and query responses into the telemetry.
    pub fn install_handlers(&self) {
        let telemetry = self.telemetry.clone();
        self.channel.install_reserved(
            PROBE_ID,
            Handler::persistent(move |payload| telemetry.apply_probe(payload)),
        );
        let telemetry = self.telemetry.clone();
        self.channel.install_reserved(
            QUERY_ID,
            Handler::persistent(move |payload| telemetry.apply_status(payload)),
        );
    }

    /// Send one round of requests.
    pub fn tick(&self) {
        if !self.channel.is_open() {
            trace!("Channel closed, skipping heartbeat");
            return;
        }
        if let Err(err) = self.channel.send_with_id(PROBE_ID, "server.info", None) {
            debug!(error = %err, "Probe not sent");
            return;
        }
        if self.telemetry.readiness().is_ready() {
            if let Err(err) =
                self.channel
                    .send_with_id(QUERY_ID, "printer.objects.query", Some(query_params()))
            {
                debug!(error = %err, "Status query not sent");
            }
        }
    }

    /// Install handlers and start ticking. The first tick fires after one
    /// interval.
    pub fn spawn(self) -> PollerHandle {
        self.install_handlers();
        PollerHandle {
            task: CancellableTask::spawn(move |stop| self.run(stop)),
        }
    }

    async fn run(self, mut stop: oneshot::Receiver<()>) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = &mut stop => break,
                _ = ticker.tick() => self.tick(),
            }
        }
        debug!("Heartbeat stopped");
    }
}

/// Owner of a running heartbeat. Dropping it stops the heartbeat.
#[derive(Debug)]
pub struct PollerHandle {
    task: CancellableTask<()>,
}

impl PollerHandle {
    /// Stop ticking. Returns `true` only on the call that stopped it.
    pub fn stop(&mut self) -> bool {
        self.task.cancel()
    }

    /// Whether the heartbeat has been stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.task.shutdown().await;
    }
}
