//! Layered configuration for the supervision client.
//!
//! ## Schema
//!
//! - **`log_level`**: logging verbosity ("error", "warn", "info", "debug", "trace").
//! - **`endpoints`**: where each peer lives.
//!   - `moonraker`: firmware JSON-RPC WebSocket.
//!   - `mqtt_host`, `mqtt_port`, `mqtt_client_id`: broker session.
//!   - `camera`: multipart camera stream.
//!   - `store`: frame/path store (REST); the change feed is `change_feed`.
//!   - `planner`, `mask`, `policy`: HTTP collaborators.
//! - **`heartbeat`**: poll interval and reconnect backoff.
//! - **`frames`**: history capacity.
//! - **`overlay`**: maximum mask opacity.
//!
//! ## Layers
//!
//! 1. Library defaults (`Settings` implements [`Provider`])
//! 2. Optional TOML file
//! 3. Environment variables prefixed with `RUST_ARM_`, nested fields
//!    separated by double underscores
//!    (`RUST_ARM_ENDPOINTS__MOONRAKER=ws://arm:7125/websocket`).

use crate::connection::{
    join_path, normalize_url, AddressError, DEFAULT_MASK_PORT, DEFAULT_MOONRAKER_PORT,
    DEFAULT_PLANNER_PORT, DEFAULT_POLICY_PORT, DEFAULT_STORE_PORT,
};
use crate::error::{ClientError, Result};
use crate::reconnect::Backoff;
use arm_core::limits::{FRAME_HISTORY_CAPACITY, HEARTBEAT_INTERVAL, MASK_MAX_OPACITY, MAX_FRAME_HISTORY_CAPACITY};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::{Figment, Provider};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;
use url::Url;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RUST_ARM_";

const VALID_LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Logging verbosity level. Default: "info".
    pub log_level: String,
    /// Peer addresses.
    pub endpoints: EndpointSettings,
    /// Poll and reconnect timing.
    pub heartbeat: HeartbeatSettings,
    /// Frame history sizing.
    pub frames: FrameSettings,
    /// Mask overlay rendering.
    pub overlay: OverlaySettings,
}

/// Peer addresses. Bare `host:port` values are accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndpointSettings {
    /// Moonraker JSON-RPC WebSocket.
    pub moonraker: String,
    /// MQTT broker host.
    pub mqtt_host: String,
    /// MQTT broker port.
    pub mqtt_port: u16,
    /// MQTT client identifier.
    pub mqtt_client_id: String,
    /// Multipart camera stream.
    pub camera: String,
    /// Frame and path store REST base.
    pub store: String,
    /// Change feed WebSocket for captured frames.
    pub change_feed: String,
    /// Motion planner base URL.
    pub planner: String,
    /// Segmentation mask service base URL.
    pub mask: String,
    /// Policy prediction service base URL.
    pub policy: String,
}

/// Poll and reconnect timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatSettings {
    /// Interval between probes in milliseconds.
    pub interval_ms: u64,
    /// First reconnect delay in milliseconds.
    pub reconnect_initial_ms: u64,
    /// Reconnect delay ceiling in milliseconds.
    pub reconnect_max_ms: u64,
    /// Consecutive failed connects before the link gives up; 0 retries
    /// forever.
    pub reconnect_attempts: u32,
}

/// Frame history sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameSettings {
    /// Records kept in the history.
    pub history_capacity: usize,
}

/// Mask overlay rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlaySettings {
    /// Opacity at full mask intensity, in `(0, 1]`.
    pub max_opacity: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            endpoints: EndpointSettings::default(),
            heartbeat: HeartbeatSettings::default(),
            frames: FrameSettings {
                history_capacity: FRAME_HISTORY_CAPACITY,
            },
            overlay: OverlaySettings {
                max_opacity: MASK_MAX_OPACITY,
            },
        }
    }
}

impl Default for EndpointSettings {
    fn default() -> Self {
        Self {
            moonraker: "ws://127.0.0.1:7125/websocket".to_string(),
            mqtt_host: "127.0.0.1".to_string(),
            mqtt_port: crate::connection::DEFAULT_MQTT_PORT,
            mqtt_client_id: "rust-arm".to_string(),
            camera: "http://127.0.0.1:80".to_string(),
            store: "http://127.0.0.1:8080".to_string(),
            change_feed: "ws://127.0.0.1:8080/camera/_streams/all".to_string(),
            planner: "http://127.0.0.1:8003".to_string(),
            mask: "http://127.0.0.1:8001".to_string(),
            policy: "http://127.0.0.1:8000".to_string(),
        }
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        let defaults = Backoff::default();
        Self {
            interval_ms: duration_ms(HEARTBEAT_INTERVAL),
            reconnect_initial_ms: duration_ms(defaults.initial),
            reconnect_max_ms: duration_ms(defaults.ceiling),
            reconnect_attempts: 0,
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl Provider for Settings {
    fn metadata(&self) -> figment::Metadata {
        figment::Metadata::named("Library Defaults")
    }

    fn data(
        &self,
    ) -> std::result::Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error>
    {
        Serialized::defaults(self).data()
    }
}

impl Settings {
    /// Layered figment: defaults, then the TOML file if given and present,
    /// then `RUST_ARM_` environment variables.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Settings::default());
        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                warn!(path = %path.display(), "Config file not found, using defaults");
            }
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let settings: Settings = Self::figment(config_path).extract()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic checks that parsing cannot express.
    pub fn validate(&self) -> Result<()> {
        let level = self.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ClientError::InvalidConfig(format!(
                "log_level '{}' must be one of {:?}",
                self.log_level, VALID_LOG_LEVELS
            )));
        }
        if self.heartbeat.interval_ms == 0 {
            return Err(ClientError::InvalidConfig(
                "heartbeat.interval_ms must be greater than zero".into(),
            ));
        }
        if self.heartbeat.reconnect_initial_ms > self.heartbeat.reconnect_max_ms {
            return Err(ClientError::InvalidConfig(
                "heartbeat.reconnect_initial_ms exceeds reconnect_max_ms".into(),
            ));
        }
        if !(1..=MAX_FRAME_HISTORY_CAPACITY).contains(&self.frames.history_capacity) {
            return Err(ClientError::InvalidConfig(format!(
                "frames.history_capacity must be within 1..={MAX_FRAME_HISTORY_CAPACITY}"
            )));
        }
        if !(self.overlay.max_opacity > 0.0 && self.overlay.max_opacity <= 1.0) {
            return Err(ClientError::InvalidConfig(
                "overlay.max_opacity must be within (0, 1]".into(),
            ));
        }
        if self.endpoints.mqtt_host.trim().is_empty() {
            return Err(ClientError::InvalidConfig("endpoints.mqtt_host is empty".into()));
        }
        self.endpoints.resolve()?;
        Ok(())
    }

    /// Heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    /// Reconnect backoff derived from the heartbeat section.
    #[must_use]
    pub fn backoff(&self) -> Backoff {
        Backoff {
            initial: Duration::from_millis(self.heartbeat.reconnect_initial_ms),
            ceiling: Duration::from_millis(self.heartbeat.reconnect_max_ms),
            give_up_after: (self.heartbeat.reconnect_attempts > 0)
                .then_some(self.heartbeat.reconnect_attempts),
            ..Backoff::default()
        }
    }
}

/// Endpoints after normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedEndpoints {
    /// Moonraker WebSocket.
    pub moonraker: Url,
    /// Camera stream.
    pub camera: Url,
    /// Store REST base.
    pub store: Url,
    /// Frame change feed.
    pub change_feed: Url,
    /// Planner base.
    pub planner: Url,
    /// Mask service base.
    pub mask: Url,
    /// Policy service base.
    pub policy: Url,
}

impl EndpointSettings {
    /// Normalize every URL endpoint.
    pub fn resolve(&self) -> Result<ResolvedEndpoints> {
        let field = |name: &str, value: &str, scheme: &str, port: u16| {
            normalize_url(value, scheme, port).map_err(|e: AddressError| {
                ClientError::InvalidConfig(format!("endpoints.{name}: {e}"))
            })
        };
        Ok(ResolvedEndpoints {
            moonraker: field("moonraker", &self.moonraker, "ws", DEFAULT_MOONRAKER_PORT)?,
            camera: field("camera", &self.camera, "http", 80)?,
            store: field("store", &self.store, "http", DEFAULT_STORE_PORT)?,
            change_feed: field("change_feed", &self.change_feed, "ws", DEFAULT_STORE_PORT)?,
            planner: field("planner", &self.planner, "http", DEFAULT_PLANNER_PORT)?,
            mask: field("mask", &self.mask, "http", DEFAULT_MASK_PORT)?,
            policy: field("policy", &self.policy, "http", DEFAULT_POLICY_PORT)?,
        })
    }
}

impl ResolvedEndpoints {
    /// `path` relative to the store base.
    pub fn store_path(&self, path: &str) -> Result<Url> {
        join_path(&self.store, path).map_err(|e| ClientError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let settings = Settings::default();
        settings.validate().unwrap();
        assert_eq!(settings.heartbeat_interval(), HEARTBEAT_INTERVAL);
        assert_eq!(settings.frames.history_capacity, FRAME_HISTORY_CAPACITY);
        assert_eq!(settings.backoff().give_up_after, None);
    }

    #[test]
    fn toml_file_overrides_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[endpoints]
moonraker = "192.168.178.34:7125/websocket"

[heartbeat]
interval_ms = 500
"#
        )
        .unwrap();

        let settings = Settings::load(Some(file.path())).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.heartbeat.interval_ms, 500);
        let resolved = settings.endpoints.resolve().unwrap();
        assert_eq!(resolved.moonraker.as_str(), "ws://192.168.178.34:7125/websocket");
        assert_eq!(settings.endpoints.mqtt_port, 1883);
    }

    #[test]
    fn env_overrides_file() {
        Jail::expect_with(|jail| {
            jail.create_file("arm.toml", "log_level = \"warn\"")?;
            jail.set_env("RUST_ARM_LOG_LEVEL", "trace");
            jail.set_env("RUST_ARM_FRAMES__HISTORY_CAPACITY", "16");
            let settings: Settings = Settings::figment(Some(Path::new("arm.toml"))).extract()?;
            assert_eq!(settings.log_level, "trace");
            assert_eq!(settings.frames.history_capacity, 16);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let settings = Settings::load(Some(Path::new("/nonexistent/arm.toml"))).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn invalid_values_rejected() {
        let mut settings = Settings::default();
        settings.log_level = "loud".into();
        assert!(matches!(settings.validate(), Err(ClientError::InvalidConfig(_))));

        let mut settings = Settings::default();
        settings.heartbeat.interval_ms = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.frames.history_capacity = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.overlay.max_opacity = 1.5;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.endpoints.planner = "ftp://planner".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn store_paths_join() {
        let resolved = Settings::default().endpoints.resolve().unwrap();
        assert_eq!(
            resolved.store_path("paths").unwrap().as_str(),
            "http://127.0.0.1:8080/paths"
        );
    }
}
