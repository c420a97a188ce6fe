use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Device is still locked after {attempts} unlock attempts")]
    UnlockExhausted { attempts: u32 },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Detection error: {0}")]
    Detection(#[from] DetectionError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Failures reported by a UI automation backend.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device disconnected: {0}")]
    Disconnected(String),

    #[error("action `{action}` failed: {message}")]
    Action { action: &'static str, message: String },

    #[error("screen capture failed: {0}")]
    Capture(String),

    #[error("image error: {0}")]
    Image(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    pub fn action(action: &'static str, message: impl Into<String>) -> Self {
        DeviceError::Action {
            action,
            message: message.into(),
        }
    }
}

/// Failures raised by a detection collaborator.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detector process failed (status {status}): {stderr}")]
    Process { status: i32, stderr: String },

    #[error("detector API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("detector timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("malformed detector output: {0}")]
    Malformed(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = SignError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_exhausted_display() {
        let err = SignError::UnlockExhausted { attempts: 3 };
        assert_eq!(
            err.to_string(),
            "Device is still locked after 3 unlock attempts"
        );
    }

    #[test]
    fn device_error_converts_into_sign_error() {
        let err: SignError = DeviceError::action("tap", "out of bounds").into();
        assert_eq!(
            err.to_string(),
            "Device error: action `tap` failed: out of bounds"
        );
    }

    #[test]
    fn detection_process_display() {
        let err = DetectionError::Process {
            status: 2,
            stderr: "model not found".into(),
        };
        assert_eq!(
            err.to_string(),
            "detector process failed (status 2): model not found"
        );
    }

    #[test]
    fn errors_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SignError>();
        assert_send_sync::<DeviceError>();
        assert_send_sync::<DetectionError>();
    }
}
