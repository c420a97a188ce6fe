//! Run configuration loaded from `dailysign.toml`.
//!
//! [`SignConfig`] holds every tunable of a run. Values missing from the file
//! fall back to defaults matching the stock community app. The environment
//! variable `DAILYSIGN_UNLOCK_PIN` takes precedence over the configured PIN.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Result, bail};
use serde::Deserialize;

use crate::device::Point;
use crate::state_machine::UnlockMethod;

pub const DEFAULT_CONFIG_FILE: &str = "dailysign.toml";
pub const PIN_ENV_VAR: &str = "DAILYSIGN_UNLOCK_PIN";

#[derive(Debug, Clone, Deserialize)]
pub struct SignConfig {
    /// Package id of the target application.
    #[serde(default = "default_app_id")]
    pub app_id: String,

    /// Where the cropped challenge image is written for the detector.
    #[serde(default = "default_capture_path")]
    pub capture_path: PathBuf,

    /// Append-only growth record file.
    #[serde(default = "default_record_path")]
    pub record_path: PathBuf,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_short_timeout_ms")]
    pub short_timeout_ms: u64,

    /// Attempt budget for the challenge solver.
    #[serde(default = "default_retry_times")]
    pub retry_times: u32,

    /// Hard budget for the whole run, enforced by the watchdog.
    #[serde(default = "default_total_runtime_secs")]
    pub total_runtime_secs: u64,

    #[serde(default)]
    pub unlock: UnlockConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub tasks: TaskFlags,

    #[serde(default)]
    pub catalog: Catalog,
}

fn default_app_id() -> String {
    "com.xiaomi.vipaccount".to_string()
}

fn default_capture_path() -> PathBuf {
    PathBuf::from("dailysign/captcha.png")
}

fn default_record_path() -> PathBuf {
    PathBuf::from("dailysign/level.jsonl")
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_short_timeout_ms() -> u64 {
    2000
}

fn default_retry_times() -> u32 {
    3
}

fn default_total_runtime_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnlockKind {
    Swipe,
    Pattern,
    Pin,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnlockConfig {
    #[serde(default = "default_unlock_kind")]
    pub method: UnlockKind,

    #[serde(default)]
    pub pin: String,

    /// Pattern as `[[x, y], ...]` screen points.
    #[serde(default)]
    pub pattern: Vec<[i32; 2]>,

    /// Whole unlock attempts before the run is abandoned.
    #[serde(default = "default_unlock_attempts")]
    pub attempts: u32,

    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    /// Swipe-up gestures per attempt while looking for the lock surface.
    #[serde(default = "default_swipe_attempts")]
    pub swipe_attempts: u32,
}

fn default_unlock_kind() -> UnlockKind {
    UnlockKind::Swipe
}

fn default_unlock_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    3000
}

fn default_swipe_attempts() -> u32 {
    5
}

impl Default for UnlockConfig {
    fn default() -> Self {
        Self {
            method: default_unlock_kind(),
            pin: String::new(),
            pattern: Vec::new(),
            attempts: default_unlock_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            swipe_attempts: default_swipe_attempts(),
        }
    }
}

impl UnlockConfig {
    /// Derives the validated unlock method.
    pub fn method(&self) -> Result<UnlockMethod> {
        match self.method {
            UnlockKind::Swipe => Ok(UnlockMethod::SwipeOnly),
            UnlockKind::Pattern => {
                if self.pattern.len() < 2 {
                    bail!("unlock.pattern needs at least two points");
                }
                let points = self.pattern.iter().map(|&[x, y]| Point::new(x, y)).collect();
                Ok(UnlockMethod::Pattern(points))
            }
            UnlockKind::Pin => {
                if self.pin.is_empty() {
                    bail!("unlock.pin is empty (set it or export {PIN_ENV_VAR})");
                }
                if !self.pin.chars().all(|c| c.is_ascii_digit()) {
                    bail!("unlock.pin must contain digits only");
                }
                Ok(UnlockMethod::Pin(self.pin.chars().collect()))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    Command,
    Http,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_detector_kind")]
    pub kind: DetectorKind,

    /// Program run as `program [args..] <image>` for the command detector.
    #[serde(default = "default_detector_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Endpoint receiving the PNG for the HTTP detector.
    #[serde(default)]
    pub url: String,

    #[serde(default = "default_detector_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_detector_kind() -> DetectorKind {
    DetectorKind::Command
}

fn default_detector_program() -> String {
    "dailysign-detect".to_string()
}

fn default_detector_timeout_ms() -> u64 {
    30_000
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: default_detector_kind(),
            program: default_detector_program(),
            args: Vec::new(),
            url: String::new(),
            timeout_ms: default_detector_timeout_ms(),
        }
    }
}

/// Optional tasks, run in a fixed order around the sign-in.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TaskFlags {
    pub browse_posts: bool,
    pub mini_app_sign: bool,
    pub carrot: bool,
    pub watch_video: bool,
    pub watch_video_minutes: u64,
    pub dual_flagship: bool,
    pub thanksgiving: bool,
    pub record_level: bool,
}

impl Default for TaskFlags {
    fn default() -> Self {
        Self {
            browse_posts: true,
            mini_app_sign: false,
            carrot: true,
            watch_video: false,
            watch_video_minutes: 5,
            dual_flagship: false,
            thanksgiving: false,
            record_level: true,
        }
    }
}

/// Element texts and ids the core flow keys on.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub lock_surface_markers: Vec<String>,
    pub force_stop_texts: Vec<String>,
    pub confirm_texts: Vec<String>,
    pub landing_id: String,
    pub landing_text: String,
    pub permission_texts: Vec<String>,
    pub ad_close_descs: Vec<String>,
    pub ad_close_ids: Vec<String>,
    pub sign_entry_desc: String,
    pub sign_page_markers: Vec<String>,
    pub sign_button: String,
    pub signed_marker: String,
    pub challenge_instruction: String,
    /// Levels above the instruction label whose bounds start the challenge region.
    pub challenge_instruction_ancestor: u32,
    pub challenge_submit: String,
    pub challenge_refresh: String,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for Catalog {
    fn default() -> Self {
        Self {
            lock_surface_markers: strings(&[
                "紧急呼叫",
                "Emergency call",
                "图案",
                "数字",
                "混合",
                "Pattern",
                "PIN",
                "Password",
            ]),
            force_stop_texts: strings(&["结束运行", "强行停止", "FORCE STOP", "Force stop"]),
            confirm_texts: strings(&["确定", "OK"]),
            landing_id: "com.xiaomi.vipaccount:id/vp_main_page".to_string(),
            landing_text: "我的".to_string(),
            permission_texts: strings(&["允许", "允许使用", "Allow"]),
            ad_close_descs: strings(&["关闭", "跳过", "Skip"]),
            ad_close_ids: strings(&["close", "skip", "cancel"]),
            sign_entry_desc: "签到".to_string(),
            sign_page_markers: strings(&["社区勋章", "社区成长等级"]),
            sign_button: "立即签到".to_string(),
            signed_marker: "已签到".to_string(),
            challenge_instruction: "请在下图依次".to_string(),
            challenge_instruction_ancestor: 2,
            challenge_submit: "提交答案".to_string(),
            challenge_refresh: "刷新验证".to_string(),
        }
    }
}

impl Default for SignConfig {
    fn default() -> Self {
        Self {
            app_id: default_app_id(),
            capture_path: default_capture_path(),
            record_path: default_record_path(),
            default_timeout_ms: default_timeout_ms(),
            short_timeout_ms: default_short_timeout_ms(),
            retry_times: default_retry_times(),
            total_runtime_secs: default_total_runtime_secs(),
            unlock: UnlockConfig::default(),
            detector: DetectorConfig::default(),
            tasks: TaskFlags::default(),
            catalog: Catalog::default(),
        }
    }
}

impl SignConfig {
    /// Loads the configuration from `path`, using defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<SignConfig>(&contents)?
        } else {
            Self::default()
        };

        // The environment wins over the file for the PIN.
        if let Ok(pin) = std::env::var(PIN_ENV_VAR)
            && !pin.is_empty()
        {
            config.unlock.pin = pin;
        }

        Ok(config)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn short_timeout(&self) -> Duration {
        Duration::from_millis(self.short_timeout_ms)
    }

    pub fn max_runtime(&self) -> Duration {
        Duration::from_secs(self.total_runtime_secs)
    }
}
