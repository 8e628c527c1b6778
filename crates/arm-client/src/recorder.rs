//! Recording named paths as lists of step timestamps.
//!
//! A path is the sequence of moments the operator marked while moving the
//! arm; the store later pairs them with recorded joint states.

use crate::error::Result;
use arm_core::ArmError;
use chrono::Utc;
use serde::Serialize;
use tracing::info;
use url::Url;

#[derive(Debug, Serialize)]
struct SavedPath<'a> {
    name: &'a str,
    steps: &'a [f64],
}

/// Collects step timestamps and saves them to the store.
#[derive(Debug, Clone)]
pub struct PathRecorder {
    http: reqwest::Client,
    url: Url,
    steps: Vec<f64>,
}

impl PathRecorder {
    /// Recorder posting to the `paths` collection at `url`.
    #[must_use]
    pub fn new(http: reqwest::Client, url: Url) -> Self {
        Self {
            http,
            url,
            steps: Vec::new(),
        }
    }

    /// Mark the current moment, in seconds since the Unix epoch.
    pub fn add_step(&mut self) -> f64 {
        #[allow(clippy::cast_precision_loss)]
        let now = Utc::now().timestamp_millis() as f64 / 1000.0;
        self.add_step_at(now);
        now
    }

    /// Mark an explicit timestamp.
    pub fn add_step_at(&mut self, timestamp: f64) {
        self.steps.push(timestamp);
    }

    /// Forget every step.
    pub fn clear(&mut self) {
        self.steps.clear();
    }

    /// Steps in marking order.
    #[must_use]
    pub fn steps(&self) -> &[f64] {
        &self.steps
    }

    /// `POST {name, steps}`. An empty name is rejected before any request.
    pub async fn save(&self, name: &str) -> Result<()> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ArmError::InvalidInput("path name must not be empty".into()).into());
        }
        self.http
            .post(self.url.clone())
            .json(&SavedPath {
                name,
                steps: &self.steps,
            })
            .send()
            .await?
            .error_for_status()?;
        info!(name, steps = self.steps.len(), "Path saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ClientError;

    fn recorder() -> PathRecorder {
        // Port 9 (discard) is never contacted by these tests.
        PathRecorder::new(reqwest::Client::new(), Url::parse("http://127.0.0.1:9/paths").unwrap())
    }

    #[tokio::test]
    async fn empty_name_rejected_before_network() {
        let mut rec = recorder();
        rec.add_step_at(1.0);
        for name in ["", "   "] {
            let err = rec.save(name).await.unwrap_err();
            assert!(matches!(err, ClientError::Domain(ArmError::InvalidInput(_))));
        }
    }

    #[test]
    fn steps_accumulate_and_clear() {
        let mut rec = recorder();
        let first = rec.add_step();
        rec.add_step_at(first + 1.0);
        assert_eq!(rec.steps().len(), 2);
        assert!(rec.steps()[1] > rec.steps()[0]);
        rec.clear();
        assert!(rec.steps().is_empty());
    }

    #[test]
    fn body_shape() {
        let body = serde_json::to_value(SavedPath {
            name: "pick",
            steps: &[1.5, 2.5],
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"name": "pick", "steps": [1.5, 2.5]}));
    }
}
