use std::path::Path;
use std::time::Duration;

use reqwest::Client;

use super::types::{DetectedTarget, parse_targets};
use super::Detector;
use crate::error::DetectionError;

/// Posts the captured PNG to a detection service and reads back the targets.
pub struct HttpDetector {
    client: Client,
    url: String,
}

impl HttpDetector {
    pub fn new(url: String, timeout: Duration) -> Result<Self, DetectionError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url })
    }
}

impl Detector for HttpDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedTarget>, DetectionError> {
        let image = tokio::fs::read(image_path).await?;

        let response = self
            .client
            .post(&self.url)
            .header("content-type", "image/png")
            .body(image)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(DetectionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.text().await?;
        parse_targets(&body)
    }
}
