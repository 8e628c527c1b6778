//! Firmware link state and the backoff between connection attempts.
//!
//! ```text
//! Disconnected ─start_link()─> Connecting ─socket open─> Connected
//!       ▲                          │                         │
//!       │                     connect failed            socket lost
//!       │                          ▼                         │
//!       └── shutdown / give up ─ Reconnecting <──────────────┘
//! ```
//!
//! A successful connect resets the attempt counter. Correlations never
//! survive a reconnect; telemetry and joint limits do.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Where the firmware link currently is.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkState {
    /// Supervisor not running.
    Disconnected,
    /// First connect in flight.
    Connecting,
    /// WebSocket open and heartbeat running.
    Connected {
        /// When the socket opened.
        since: DateTime<Utc>,
    },
    /// Sleeping before attempt `attempt`.
    Reconnecting {
        /// 1-based count of consecutive failures.
        attempt: u32,
        /// Why the previous connection ended.
        last_error: String,
    },
}

impl LinkState {
    /// Socket open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Connect in flight or scheduled.
    #[must_use]
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting { .. })
    }

    /// One-word label for status lines.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Disconnected => "offline",
            Self::Connecting => "connecting",
            Self::Connected { .. } => "online",
            Self::Reconnecting { .. } => "retrying",
        }
    }
}

/// Exponential backoff between firmware connection attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay after the first failure.
    pub initial: Duration,
    /// Upper bound on any delay, before jitter.
    pub ceiling: Duration,
    /// Growth per consecutive failure.
    pub factor: f64,
    /// Consecutive failures tolerated before the supervisor stops; `None`
    /// retries forever.
    pub give_up_after: Option<u32>,
    /// Extra random delay as a fraction of the base delay.
    pub jitter: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            ceiling: Duration::from_secs(30),
            factor: 2.0,
            give_up_after: None,
            jitter: 0.25,
        }
    }
}

impl Backoff {
    /// Base delay after `failures` consecutive failures (1-based), without
    /// jitter.
    #[must_use]
    pub fn base_delay(&self, failures: u32) -> Duration {
        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.ceiling.as_secs_f64()))
    }

    /// Delay to sleep after `failures` consecutive failures.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let base = self.base_delay(failures);
        if self.jitter <= 0.0 {
            return base;
        }
        base.mul_f64(1.0 + self.jitter * unit_noise())
    }

    /// Whether another attempt follows `failures` consecutive failures.
    #[must_use]
    pub fn allows(&self, failures: u32) -> bool {
        self.give_up_after.map_or(true, |limit| failures < limit)
    }
}

/// Cheap value in `[0, 1)` from the wall clock; only used to spread retries.
fn unit_noise() -> f64 {
    f64::from(Utc::now().timestamp_subsec_nanos() % 1024) / 1024.0
}
