use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::state::UnlockState;
use crate::config::SignConfig;
use crate::device::{Device, DeviceResult, Point, Selector};
use crate::error::SignError;
use crate::retry::{Backoff, RetryPolicy, RetryWaiter};

/// How the lock screen is dismissed. Derived once from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnlockMethod {
    SwipeOnly,
    Pattern(Vec<Point>),
    Pin(Vec<char>),
}

impl std::fmt::Display for UnlockMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnlockMethod::SwipeOnly => write!(f, "swipe"),
            UnlockMethod::Pattern(points) => write!(f, "pattern ({} points)", points.len()),
            UnlockMethod::Pin(digits) => write!(f, "pin ({} digits)", digits.len()),
        }
    }
}

const SWIPE_JITTER_PX: i32 = 150;
const SWIPE_DURATION: Duration = Duration::from_millis(200);
const SWIPE_SETTLE: Duration = Duration::from_millis(500);
const SURFACE_SETTLE: Duration = Duration::from_millis(1000);
const PATTERN_DURATION: Duration = Duration::from_millis(800);
const KEY_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct UnlockSettings {
    /// Whole attempts before unlocking is declared failed.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub swipe_attempts: u32,
    pub short_timeout: Duration,
    /// Time the system gets to react to a submitted credential.
    pub submit_settle: Duration,
    pub surface_markers: Vec<String>,
}

impl UnlockSettings {
    pub fn from_config(config: &SignConfig) -> Self {
        Self {
            max_attempts: config.unlock.attempts.max(1),
            backoff: Backoff {
                base_delay_ms: config.unlock.backoff_base_ms,
            },
            swipe_attempts: config.unlock.swipe_attempts,
            short_timeout: config.short_timeout(),
            submit_settle: Duration::from_millis(2000),
            surface_markers: config.catalog.lock_surface_markers.clone(),
        }
    }
}

/// One traversal of the unlock state machine, from `Locked` to a terminal state.
pub struct UnlockAttempt<'a, D: Device> {
    device: &'a D,
    method: &'a UnlockMethod,
    settings: &'a UnlockSettings,
    state: UnlockState,
    history: Vec<UnlockState>,
}

impl<'a, D: Device> UnlockAttempt<'a, D> {
    pub fn new(device: &'a D, method: &'a UnlockMethod, settings: &'a UnlockSettings) -> Self {
        Self {
            device,
            method,
            settings,
            state: UnlockState::Locked,
            history: Vec::new(),
        }
    }

    pub fn state(&self) -> UnlockState {
        self.state
    }

    /// States visited so far, excluding the current one.
    pub fn history(&self) -> &[UnlockState] {
        &self.history
    }

    /// Applies one transition. A device error ends the attempt in `Failed`.
    pub async fn step(&mut self) -> UnlockState {
        if self.state.is_terminal() {
            return self.state;
        }
        let next = match self.transition().await {
            Ok(next) => next,
            Err(e) => {
                warn!(state = %self.state, error = %e, "Unlock step failed");
                UnlockState::Failed
            }
        };
        debug!(from = %self.state, to = %next, "Unlock transition");
        self.history.push(self.state);
        self.state = next;
        next
    }

    /// Steps until `Unlocked` or `Failed`.
    pub async fn run(mut self) -> (UnlockState, Vec<UnlockState>) {
        while !self.state.is_terminal() {
            self.step().await;
        }
        let mut path = self.history;
        path.push(self.state);
        (self.state, path)
    }

    async fn transition(&self) -> DeviceResult<UnlockState> {
        match self.state {
            UnlockState::Locked => self.on_locked().await,
            UnlockState::ScreenOff => self.on_screen_off().await,
            UnlockState::ScreenOnLocked => self.on_screen_on_locked().await,
            UnlockState::UnlockSurfaceVisible => self.on_surface_visible().await,
            UnlockState::CredentialSubmitted => self.on_credential_submitted().await,
            terminal => Ok(terminal),
        }
    }

    async fn on_locked(&self) -> DeviceResult<UnlockState> {
        if !self.device.is_locked().await? {
            return Ok(UnlockState::Unlocked);
        }
        if self.device.is_screen_on().await? {
            Ok(UnlockState::ScreenOnLocked)
        } else {
            Ok(UnlockState::ScreenOff)
        }
    }

    async fn on_screen_off(&self) -> DeviceResult<UnlockState> {
        info!("Screen is off, waking device");
        self.device.wake_up().await?;
        let policy = RetryPolicy::new("screen on after wake", 4, 500);
        let awake =
            RetryWaiter::wait_for(&policy, async || self.device.is_screen_on().await).await?;
        Ok(if awake {
            UnlockState::ScreenOnLocked
        } else {
            UnlockState::Failed
        })
    }

    async fn on_screen_on_locked(&self) -> DeviceResult<UnlockState> {
        if *self.method == UnlockMethod::SwipeOnly {
            self.swipe_up().await?;
            sleep(SWIPE_SETTLE).await;
            return Ok(UnlockState::CredentialSubmitted);
        }

        let markers = Selector::text_any(&self.settings.surface_markers);
        let policy = RetryPolicy::new("unlock surface after swipe", self.settings.swipe_attempts, 1000);
        let visible = RetryWaiter::wait_for(&policy, async || {
            self.swipe_up().await?;
            sleep(SWIPE_SETTLE).await;
            self.device.exists(&markers).await
        })
        .await?;
        Ok(if visible {
            UnlockState::UnlockSurfaceVisible
        } else {
            UnlockState::Failed
        })
    }

    async fn on_surface_visible(&self) -> DeviceResult<UnlockState> {
        sleep(SURFACE_SETTLE).await;
        match self.method {
            UnlockMethod::Pattern(points) => {
                debug!(points = points.len(), "Drawing unlock pattern");
                self.device.gesture(PATTERN_DURATION, points).await?;
            }
            UnlockMethod::Pin(digits) => {
                for digit in digits {
                    let key = Selector::desc(digit.to_string());
                    let Some(button) = self.device.find(&key, self.settings.short_timeout).await?
                    else {
                        warn!("PIN key not found, aborting attempt");
                        return Ok(UnlockState::Failed);
                    };
                    if !self.device.click_element(&button).await? {
                        warn!("PIN key did not accept the tap, aborting attempt");
                        return Ok(UnlockState::Failed);
                    }
                    sleep(KEY_INTERVAL).await;
                }
            }
            UnlockMethod::SwipeOnly => {}
        }
        Ok(UnlockState::CredentialSubmitted)
    }

    async fn on_credential_submitted(&self) -> DeviceResult<UnlockState> {
        sleep(self.settings.submit_settle).await;
        if self.device.is_locked().await? {
            Ok(UnlockState::Failed)
        } else {
            Ok(UnlockState::Unlocked)
        }
    }

    async fn swipe_up(&self) -> DeviceResult<()> {
        let jitter = rand::thread_rng().gen_range(-SWIPE_JITTER_PX..=SWIPE_JITTER_PX);
        let screen = self.device.screen_size();
        let from = screen.fraction(0.5, 0.7);
        let to = screen.fraction(0.5, 0.3);
        self.device
            .swipe(
                Point::new(from.x, from.y + jitter),
                Point::new(to.x, to.y + jitter),
                SWIPE_DURATION,
            )
            .await
    }
}

/// Repeats unlock attempts, escalating between them, until the device is unlocked.
pub struct Unlocker<'a, D: Device> {
    device: &'a D,
    method: &'a UnlockMethod,
    settings: &'a UnlockSettings,
}

impl<'a, D: Device> Unlocker<'a, D> {
    pub fn new(device: &'a D, method: &'a UnlockMethod, settings: &'a UnlockSettings) -> Self {
        Self {
            device,
            method,
            settings,
        }
    }

    /// Returns the number of attempts used (0 if the device was already unlocked).
    ///
    /// Exhausting every attempt is the one fatal in-workflow condition.
    pub async fn ensure_unlocked(&self) -> Result<u32, SignError> {
        match self.device.is_locked().await {
            Ok(false) => {
                info!("Device is not locked");
                return Ok(0);
            }
            Ok(true) => info!(method = %self.method, "Device is locked"),
            Err(e) => warn!(error = %e, "Could not read lock state, assuming locked"),
        }

        let max = self.settings.max_attempts;
        for attempt in 1..=max {
            info!(attempt, max, "Unlock attempt");
            let (state, path) = UnlockAttempt::new(self.device, self.method, self.settings)
                .run()
                .await;
            if state == UnlockState::Unlocked {
                info!(attempt, "Device unlocked");
                return Ok(attempt);
            }
            let path: Vec<String> = path.iter().map(ToString::to_string).collect();
            warn!(attempt, path = %path.join(" → "), "Unlock attempt failed");

            if attempt < max {
                if let Err(e) = self.device.press_power().await {
                    warn!(error = %e, "Power key nudge failed");
                }
                sleep(self.settings.backoff.delay_for_attempt(attempt)).await;
            }
        }

        error!(attempts = max, "Device is still locked, giving up");
        Err(SignError::UnlockExhausted { attempts: max })
    }
}
