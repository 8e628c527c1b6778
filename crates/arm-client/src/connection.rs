//! Endpoint URL normalization.
//!
//! Endpoints are configured by hand and are often typed as bare `host:port`.
//! [`normalize_url`] accepts the common shapes:
//! - Bare host:port (e.g., `192.168.178.34:7125` → `ws://192.168.178.34:7125/`)
//! - Missing port (e.g., `http://localhost` → `http://localhost:8080/`)
//! - IPv6 addresses (e.g., `[::1]:8003` → `http://[::1]:8003/`)
//!
//! # Example
//!
//! ```
//! use arm_client::connection::normalize_url;
//!
//! let url = normalize_url("192.168.178.34:7125/websocket", "ws", 7125)?;
//! assert_eq!(url.as_str(), "ws://192.168.178.34:7125/websocket");
//! # Ok::<(), arm_client::connection::AddressError>(())
//! ```

use thiserror::Error;
use url::Url;

/// Default Moonraker port.
pub const DEFAULT_MOONRAKER_PORT: u16 = 7125;

/// Default MQTT port.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default frame-store port.
pub const DEFAULT_STORE_PORT: u16 = 8080;

/// Default planner port.
pub const DEFAULT_PLANNER_PORT: u16 = 8003;

/// Default policy service port.
pub const DEFAULT_POLICY_PORT: u16 = 8000;

/// Default mask service port.
pub const DEFAULT_MASK_PORT: u16 = 8001;

const SUPPORTED_SCHEMES: [&str; 4] = ["http", "https", "ws", "wss"];

/// Why an endpoint string was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// Blank input.
    #[error("endpoint is blank")]
    Blank,
    /// `url` refused it.
    #[error("malformed endpoint: {0}")]
    Malformed(String),
    /// Parsed, but there is no host to talk to.
    #[error("endpoint has no host")]
    NoHost,
    /// The URL kind cannot carry a port.
    #[error("endpoint cannot take port {0}")]
    PortRefused(u16),
    /// Not HTTP or WebSocket.
    #[error("scheme '{0}' is not one of http, https, ws, wss")]
    Scheme(String),
}

/// Turn a hand-typed endpoint into a full URL.
///
/// Missing scheme and port fall back to `scheme` and `port`. A port equal to
/// the scheme's well-known port is elided by [`Url`] itself.
pub fn normalize_url(input: &str, scheme: &str, port: u16) -> Result<Url, AddressError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AddressError::Blank);
    }

    let parsed = if input.contains("://") {
        Url::parse(input)
    } else {
        Url::parse(&format!("{scheme}://{input}"))
    };
    let mut url = parsed.map_err(|e| AddressError::Malformed(e.to_string()))?;

    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(AddressError::Scheme(url.scheme().to_string()));
    }
    if url.host().is_none() {
        return Err(AddressError::NoHost);
    }
    if url.port().is_none() && url.set_port(Some(port)).is_err() {
        return Err(AddressError::PortRefused(port));
    }
    Ok(url)
}

/// Join a path onto a base URL, keeping the base's own path prefix.
///
/// `join_path("http://h:8080/api", "camera")` yields `http://h:8080/api/camera`.
pub fn join_path(base: &Url, path: &str) -> Result<Url, AddressError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let with_slash = format!("{}/", base.path());
        base.set_path(&with_slash);
    }
    base.join(path.trim_start_matches('/'))
        .map_err(|e| AddressError::Malformed(e.to_string()))
}
