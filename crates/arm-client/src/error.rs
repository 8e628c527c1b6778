//! Client error types.

use arm_core::ArmError;
use thiserror::Error;

/// Result type alias using ClientError.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors raised by transports and service clients.
#[derive(Error, Debug)]
pub enum ClientError {
    /// HTTP request failed (connect, status, body decode).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// MQTT client error (request queue closed).
    #[error("MQTT client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// Registration attempted on an id reserved for fixed methods.
    #[error("Request id {0} is reserved")]
    ReservedId(u64),

    /// The channel has no open connection.
    #[error("Not connected: {0}")]
    NotConnected(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be loaded.
    #[error("Configuration load error: {0}")]
    Figment(#[from] Box<figment::Error>),

    /// Domain fault from the core crate.
    #[error(transparent)]
    Domain(#[from] ArmError),
}

impl From<figment::Error> for ClientError {
    fn from(err: figment::Error) -> Self {
        ClientError::Figment(Box::new(err))
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Domain(ArmError::Json(err))
    }
}

impl ClientError {
    /// Whether the fault is a lost or unreachable peer rather than bad data
    /// or a refused request.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        match self {
            ClientError::Http(err) => err.is_connect() || err.is_timeout() || err.is_request(),
            ClientError::WebSocket(_) | ClientError::Mqtt(_) | ClientError::NotConnected(_) => true,
            _ => false,
        }
    }

    /// Whether the request was refused to keep the arm safe.
    #[must_use]
    pub fn is_safety(&self) -> bool {
        matches!(self, ClientError::Domain(err) if err.is_safety())
    }
}
