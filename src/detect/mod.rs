pub mod command;
pub mod http;
pub mod types;

use std::path::Path;
use std::time::Duration;

pub use command::CommandDetector;
pub use http::HttpDetector;
pub use types::{DetectedTarget, parse_targets};

use crate::config::{DetectorConfig, DetectorKind};
use crate::error::DetectionError;

/// Turns a cropped challenge image into the ordered list of targets to tap.
#[allow(async_fn_in_trait)]
pub trait Detector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedTarget>, DetectionError>;
}

/// The detector selected in `[detector]`.
pub enum ConfiguredDetector {
    Command(CommandDetector),
    Http(HttpDetector),
}

impl ConfiguredDetector {
    pub fn from_config(config: &DetectorConfig) -> Result<Self, DetectionError> {
        let timeout = Duration::from_millis(config.timeout_ms);
        match config.kind {
            DetectorKind::Command => Ok(Self::Command(CommandDetector::new(
                config.program.clone(),
                config.args.clone(),
                timeout,
            ))),
            DetectorKind::Http => {
                if config.url.is_empty() {
                    return Err(DetectionError::Malformed(
                        "detector.url is required for the http detector".into(),
                    ));
                }
                Ok(Self::Http(HttpDetector::new(config.url.clone(), timeout)?))
            }
        }
    }
}

impl Detector for ConfiguredDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedTarget>, DetectionError> {
        match self {
            Self::Command(d) => d.detect(image_path).await,
            Self::Http(d) => d.detect(image_path).await,
        }
    }
}
