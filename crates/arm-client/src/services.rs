//! Segmentation and policy collaborators.

use crate::connection::join_path;
use crate::error::{ClientError, Result};
use arm_vision::composite::try_composite;
use arm_vision::RgbaFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

/// Encoding declared for images sent to the mask service.
pub const DEFAULT_IMAGE_ENCODING: &str = "jpeg";

#[derive(Debug, Serialize)]
struct MaskRequest<'a> {
    points: &'a [[f64; 2]],
    image: &'a str,
    encoding: &'a str,
}

#[derive(Debug, Deserialize)]
struct MaskResponse {
    image: String,
}

/// Client for `POST /mask`.
#[derive(Debug, Clone)]
pub struct MaskClient {
    http: reqwest::Client,
    url: Url,
}

impl MaskClient {
    /// Client for the mask service at `base`.
    pub fn new(http: reqwest::Client, base: &Url) -> Result<Self> {
        let url = join_path(base, "mask").map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        Ok(Self { http, url })
    }

    /// Request a compressed mask for `image_b64` seeded with pixel `points`.
    pub async fn request_mask(&self, points: &[[f64; 2]], image_b64: &str) -> Result<String> {
        let response: MaskResponse = self
            .http
            .post(self.url.clone())
            .json(&MaskRequest {
                points,
                image: image_b64,
                encoding: DEFAULT_IMAGE_ENCODING,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(len = response.image.len(), "Mask received");
        Ok(response.image)
    }

    /// Request a mask and blend it onto `frame`.
    ///
    /// A mask that cannot be decoded or does not fit the frame leaves the
    /// frame unchanged.
    pub async fn overlay(
        &self,
        frame: &RgbaFrame,
        image_b64: &str,
        points: &[[f64; 2]],
        max_opacity: f64,
    ) -> Result<RgbaFrame> {
        let mask = self.request_mask(points, image_b64).await?;
        Ok(match try_composite(frame, &mask, max_opacity) {
            Ok(out) => out,
            Err(err) => {
                warn!(error = %err, "Skipping mask overlay");
                frame.clone()
            }
        })
    }
}

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    image: &'a str,
    state: &'a [f64],
    reset: bool,
}

/// Client for `POST /predict`.
#[derive(Debug, Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    url: Url,
}

impl PolicyClient {
    /// Client for the policy service at `base`.
    pub fn new(http: reqwest::Client, base: &Url) -> Result<Self> {
        let url =
            join_path(base, "predict").map_err(|e| ClientError::InvalidConfig(e.to_string()))?;
        Ok(Self { http, url })
    }

    /// Predict the next arm state from the live frame and the current state
    /// (six joints followed by the gripper). `reset` clears the policy's
    /// temporal context.
    pub async fn predict(&self, image_b64: &str, state: &[f64], reset: bool) -> Result<Vec<f64>> {
        let prediction: Vec<f64> = self
            .http
            .post(self.url.clone())
            .json(&PredictRequest {
                image: image_b64,
                state,
                reset,
            })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!(?prediction, "Prediction received");
        Ok(prediction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_bodies() {
        let body = serde_json::to_value(MaskRequest {
            points: &[[10.0, 20.0]],
            image: "abc",
            encoding: DEFAULT_IMAGE_ENCODING,
        })
        .unwrap();
        assert_eq!(body, json!({"points": [[10.0, 20.0]], "image": "abc", "encoding": "jpeg"}));

        let body = serde_json::to_value(PredictRequest {
            image: "abc",
            state: &[0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 0.1],
            reset: true,
        })
        .unwrap();
        assert_eq!(body["state"].as_array().map(Vec::len), Some(7));
        assert_eq!(body["reset"], true);
    }

    #[test]
    fn urls() {
        let base = Url::parse("http://127.0.0.1:8000").unwrap();
        assert_eq!(
            PolicyClient::new(reqwest::Client::new(), &base).unwrap().url.as_str(),
            "http://127.0.0.1:8000/predict"
        );
        assert_eq!(
            MaskClient::new(reqwest::Client::new(), &base).unwrap().url.as_str(),
            "http://127.0.0.1:8000/mask"
        );
    }
}
