use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::types::{DetectedTarget, parse_targets};
use super::Detector;
use crate::error::DetectionError;

/// Runs an external model wrapper as `program [args..] <image>`.
///
/// The program prints the JSON target array on stdout; any non-zero exit is a
/// detection failure carrying its stderr.
pub struct CommandDetector {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(program: impl Into<String>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }
}

impl Detector for CommandDetector {
    async fn detect(&self, image_path: &Path) -> Result<Vec<DetectedTarget>, DetectionError> {
        debug!(program = %self.program, image = %image_path.display(), "Running detector");
        let run = Command::new(&self.program)
            .args(&self.args)
            .arg(image_path)
            .kill_on_drop(true)
            .output();
        let output = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| DetectionError::Timeout(self.timeout))??;

        if !output.status.success() {
            return Err(DetectionError::Process {
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        parse_targets(&String::from_utf8_lossy(&output.stdout))
    }
}
