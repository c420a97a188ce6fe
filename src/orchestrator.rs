use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::challenge::{ChallengeReport, ChallengeSettings, ChallengeSolver};
use crate::config::SignConfig;
use crate::detect::Detector;
use crate::device::{Device, DeviceResult, Selector};
use crate::error::{DeviceError, Result, SignError};
use crate::lifecycle::AppLifecycle;
use crate::retry::{RetryPolicy, RetryWaiter};
use crate::state_machine::{UnlockMethod, UnlockSettings, Unlocker};
use crate::tasks::{PostTask, TaskOutcome, TaskRunner};
use crate::watchdog::{Expiry, ProcessExit, RunClock, Terminator, Watchdog};

const SIGN_BUTTON_SETTLE: Duration = Duration::from_millis(1000);

/// Audit record of one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub elapsed_secs: f64,
    /// Unlock attempts used; 0 if the device was already unlocked.
    pub unlock_attempts: u32,
    pub entry_reached: bool,
    pub signed_in: bool,
    pub challenge: Option<ChallengeReport>,
    pub tasks: Vec<TaskOutcome>,
}

impl RunReport {
    fn new(started_at: DateTime<Local>) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at,
            finished_at: None,
            elapsed_secs: 0.0,
            unlock_attempts: 0,
            entry_reached: false,
            signed_in: false,
            challenge: None,
            tasks: Vec::new(),
        }
    }

    pub fn failed_tasks(&self) -> impl Iterator<Item = &TaskOutcome> {
        self.tasks.iter().filter(|t| !t.succeeded)
    }
}

/// Drives one run from unlock to teardown.
pub struct WorkflowOrchestrator<'a, D: Device, R: Detector> {
    device: &'a D,
    detector: &'a R,
    config: &'a SignConfig,
    method: UnlockMethod,
}

impl<'a, D: Device, R: Detector> WorkflowOrchestrator<'a, D, R> {
    /// Validates the unlock configuration up front.
    pub fn new(device: &'a D, detector: &'a R, config: &'a SignConfig) -> Result<Self> {
        let method = config
            .unlock
            .method()
            .map_err(|e| SignError::Config(e.to_string()))?;
        Ok(Self {
            device,
            detector,
            config,
            method,
        })
    }

    /// Runs under a watchdog that exits the process once the budget is spent.
    pub async fn run(&self) -> Result<RunReport> {
        let clock = RunClock::start(self.config.max_runtime());
        self.run_with(clock, ProcessExit::default()).await
    }

    /// Runs the workflow; teardown happens on every path out.
    ///
    /// Only an unlock failure is returned as an error. Hosts that can restore
    /// the volume synchronously pass [`ProcessExit::with_volume_restore`] here.
    pub async fn run_with<T: Terminator>(&self, clock: RunClock, terminator: T) -> Result<RunReport> {
        let watchdog = Watchdog::start(clock, terminator)?;
        let mut report = RunReport::new(clock.started_wall());
        info!(
            run_id = %report.run_id,
            max_runtime_secs = clock.max_runtime().as_secs(),
            "Run started"
        );

        let saved_volume = self.mute().await;
        if let Some(volume) = saved_volume {
            watchdog.note_muted(volume);
        }
        let result = self.drive(&mut report).await;
        self.teardown(saved_volume).await;

        report.finished_at = Some(Local::now());
        report.elapsed_secs = clock.elapsed().as_secs_f64();
        info!(
            run_id = %report.run_id,
            elapsed_secs = report.elapsed_secs,
            "Run finished"
        );
        watchdog.stop();

        match result {
            Ok(()) => Ok(report),
            Err(e) => {
                error!(run_id = %report.run_id, error = %e, "Run aborted");
                Err(e)
            }
        }
    }

    async fn drive(&self, report: &mut RunReport) -> Result<()> {
        let settings = UnlockSettings::from_config(self.config);
        report.unlock_attempts = Unlocker::new(self.device, &self.method, &settings)
            .ensure_unlocked()
            .await?;

        let lifecycle = AppLifecycle::new(self.device, self.config);
        let runner = TaskRunner::new(self.device, self.config);
        let flags = &self.config.tasks;

        lifecycle.restart(true).await;
        lifecycle.dismiss_ad().await;
        if flags.browse_posts {
            report.tasks.push(runner.run_isolated(PostTask::BrowsePosts).await);
        }

        report.entry_reached = self.navigate(&lifecycle).await;
        if !report.entry_reached {
            warn!("Sign page unreachable, skipping sign-in and post-tasks");
            return Ok(());
        }

        let (signed_in, challenge) = match self.sign_in().await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "Sign-in failed");
                (false, None)
            }
        };
        report.signed_in = signed_in;
        report.challenge = challenge;

        for task in PostTask::after_sign_in(flags) {
            report.tasks.push(runner.run_isolated(task).await);
        }
        if flags.record_level && lifecycle.on_sign_page().await {
            report.tasks.push(runner.run_isolated(PostTask::RecordLevel).await);
        }

        info!(
            signed_in = report.signed_in,
            failed_tasks = report.failed_tasks().count(),
            "All configured tasks done"
        );
        Ok(())
    }

    /// Opens the sign page, relaunching the app between tries.
    async fn navigate(&self, lifecycle: &AppLifecycle<'a, D>) -> bool {
        let entry = Selector::desc(self.config.catalog.sign_entry_desc.as_str());
        let policy = RetryPolicy::new("sign page", 2, 3000);

        let reached = RetryWaiter::wait_for(&policy, async || {
            match self.device.find(&entry, self.config.default_timeout()).await? {
                Some(button) => {
                    self.device.click_element(&button).await?;
                }
                None => {
                    info!("Sign-in entry not found, restarting app");
                    lifecycle.restart(false).await;
                }
            }
            Ok::<_, DeviceError>(lifecycle.on_sign_page().await)
        })
        .await;

        match reached {
            Ok(reached) => reached,
            Err(e) => {
                warn!(error = %e, "Navigation to the sign page failed");
                false
            }
        }
    }

    /// The gated sign-in: already signed, or "sign now" plus the challenge.
    async fn sign_in(&self) -> DeviceResult<(bool, Option<ChallengeReport>)> {
        let catalog = &self.config.catalog;
        let signed = Selector::text_contains(catalog.signed_marker.as_str());
        if self
            .device
            .find(&signed, self.config.short_timeout())
            .await?
            .is_some()
        {
            info!("Already signed in today");
            return Ok((true, None));
        }

        let sign_now = Selector::text(catalog.sign_button.as_str());
        let Some(button) = self
            .device
            .find(&sign_now, self.config.default_timeout())
            .await?
        else {
            warn!(button = %sign_now, "Sign-in button not found");
            return Ok((false, None));
        };
        if !self.device.click_element(&button).await? {
            warn!("Sign-in button did not accept the click");
            return Ok((false, None));
        }
        sleep(SIGN_BUTTON_SETTLE).await;

        let settings = ChallengeSettings::from_config(self.config);
        let report = ChallengeSolver::new(self.device, self.detector, &settings)
            .solve()
            .await;
        Ok((report.solved, Some(report)))
    }

    /// Mutes music playback, returning the level to restore.
    async fn mute(&self) -> Option<u32> {
        let volume = match self.device.music_volume().await {
            Ok(volume) => volume,
            Err(e) => {
                warn!(error = %e, "Could not read volume, leaving it unchanged");
                return None;
            }
        };
        match self.device.set_music_volume(0).await {
            Ok(()) => {
                info!(previous = volume, "Device muted");
                Some(volume)
            }
            Err(e) => {
                warn!(error = %e, "Could not mute device");
                None
            }
        }
    }

    async fn teardown(&self, saved_volume: Option<u32>) {
        AppLifecycle::new(self.device, self.config).force_stop().await;
        if let Err(e) = self.device.home().await {
            warn!(error = %e, "Could not return home");
        }
        if let Some(volume) = saved_volume {
            match self.device.set_music_volume(volume).await {
                Ok(()) => info!(volume, "Volume restored"),
                Err(e) => warn!(error = %e, "Could not restore volume"),
            }
        }
    }
}
