//! Session, transports and service clients for the arm supervision client.
//!
//! This crate does all of the I/O. The [`Session`] ties together the
//! correlated JSON-RPC link to the firmware, the heartbeat that keeps
//! machine telemetry current, the MQTT side channel, the multipart camera
//! stream, the capture change feed and the HTTP collaborators (planner,
//! mask, policy, path store). It is UI-agnostic and can be driven by a CLI,
//! a test harness or a frontend.

pub mod broker;
pub mod config;
pub mod connection;
pub mod error;
pub mod feed;
pub mod heartbeat;
pub mod planner;
pub mod reconnect;
pub mod recorder;
pub mod rpc;
pub mod services;
pub mod session;
pub mod stream;
pub mod task;
pub mod telemetry;

pub use broker::{Broker, MqttBroker, SideChannel};
pub use config::Settings;
pub use error::{ClientError, Result};
pub use feed::SharedHistory;
pub use heartbeat::{HeartbeatPoller, PollerHandle};
pub use planner::{PlanExecutor, PlannerClient};
pub use reconnect::{Backoff, LinkState};
pub use recorder::PathRecorder;
pub use rpc::{Handler, RpcChannel};
pub use services::{MaskClient, PolicyClient};
pub use session::Session;
pub use stream::{FrameStreamHandle, MultipartDecoder};
pub use telemetry::MachineTelemetry;
