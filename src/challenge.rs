//! Icon-order challenge: capture → detect → map → click → verify.
//!
//! Each attempt crops the challenge region out of a fresh screenshot, asks the
//! detector which icons to tap, taps them in the returned order and submits.
//! Capture failures, empty detections and rejected answers all trigger a
//! refresh and consume one attempt from the same budget.

use std::path::PathBuf;
use std::time::Duration;

use rand::Rng;
use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SignConfig;
use crate::detect::{DetectedTarget, Detector};
use crate::device::{Device, DeviceResult, Point, Region, ScreenImage, Selector};
use crate::error::DeviceError;
use crate::retry::{RetryPolicy, RetryWaiter};
use crate::state_machine::ChallengeState;

const CAPTURE_SETTLE: Duration = Duration::from_millis(2000);
const OVERLAY_SETTLE: Duration = Duration::from_millis(100);
const REFRESH_SETTLE: Duration = Duration::from_millis(1500);
const TAP_DELAY_MS: std::ops::RangeInclusive<u64> = 500..=800;

#[derive(Debug, Clone)]
pub struct ChallengeSettings {
    pub max_attempts: u32,
    pub capture_path: PathBuf,
    pub anchor_timeout: Duration,
    pub short_timeout: Duration,
    pub instruction: String,
    pub instruction_ancestor: u32,
    pub submit: String,
    pub refresh: String,
    pub success: String,
}

impl ChallengeSettings {
    pub fn from_config(config: &SignConfig) -> Self {
        let catalog = &config.catalog;
        Self {
            max_attempts: config.retry_times.max(1),
            capture_path: config.capture_path.clone(),
            anchor_timeout: config.default_timeout(),
            short_timeout: config.short_timeout(),
            instruction: catalog.challenge_instruction.clone(),
            instruction_ancestor: catalog.challenge_instruction_ancestor,
            submit: catalog.challenge_submit.clone(),
            refresh: catalog.challenge_refresh.clone(),
            success: catalog.signed_marker.clone(),
        }
    }
}

/// What happened across all attempts of one solve.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChallengeReport {
    pub solved: bool,
    pub attempts: u32,
    pub captures: u32,
    pub refreshes: u32,
}

/// Absolute screen point of a target detected inside `region`.
///
/// Detector offsets are always relative to the crop; this is the one place
/// the two coordinate spaces meet.
pub fn target_point(region: &Region, target: &DetectedTarget) -> Point {
    let origin = region.origin();
    Point::new(
        origin.x + target.offset_x.round() as i32,
        origin.y + target.offset_y.round() as i32,
    )
}

pub struct ChallengeSolver<'a, D: Device, R: Detector> {
    device: &'a D,
    detector: &'a R,
    settings: &'a ChallengeSettings,
}

impl<'a, D: Device, R: Detector> ChallengeSolver<'a, D, R> {
    pub fn new(device: &'a D, detector: &'a R, settings: &'a ChallengeSettings) -> Self {
        Self {
            device,
            detector,
            settings,
        }
    }

    /// Runs attempts until one is verified or the budget is spent.
    pub async fn solve(&self) -> ChallengeReport {
        let mut report = ChallengeReport::default();
        let max = self.settings.max_attempts;

        for attempt in 1..=max {
            report.attempts = attempt;
            info!(attempt, max, "Challenge attempt");

            let mut path = vec![ChallengeState::Idle];
            let outcome = match self.attempt(&mut report, &mut path).await {
                Ok(state) => state,
                Err(e) => {
                    warn!(attempt, error = %e, "Challenge attempt aborted by device error");
                    ChallengeState::Retry
                }
            };
            path.push(outcome);
            let rendered: Vec<String> = path.iter().map(ToString::to_string).collect();
            debug!(attempt, path = %rendered.join(" → "), "Challenge attempt finished");

            if outcome == ChallengeState::Verified {
                info!(attempt, "Challenge solved");
                report.solved = true;
                return report;
            }
            self.refresh().await;
            report.refreshes += 1;
        }

        warn!(attempts = max, "Challenge not solved within budget");
        report
    }

    async fn attempt(
        &self,
        report: &mut ChallengeReport,
        path: &mut Vec<ChallengeState>,
    ) -> DeviceResult<ChallengeState> {
        let captured = match self.capture().await {
            Ok(captured) => captured,
            Err(e) => {
                warn!(error = %e, "Challenge capture failed");
                None
            }
        };
        let Some((region, image)) = captured else {
            return Ok(ChallengeState::Retry);
        };
        report.captures += 1;
        path.push(ChallengeState::Captured);

        let targets = self.detect().await;
        // The detector has read the file; the pixels are no longer needed.
        drop(image);
        path.push(ChallengeState::Detected);

        if targets.is_empty() {
            info!("Detector found no targets");
            return Ok(ChallengeState::Retry);
        }

        self.click_targets(&region, &targets).await?;
        path.push(ChallengeState::Submitted);

        if self.verify().await? {
            Ok(ChallengeState::Verified)
        } else {
            info!("Answer was not accepted");
            Ok(ChallengeState::Retry)
        }
    }

    /// Crops the challenge region and writes it to the capture path.
    ///
    /// `Ok(None)` means the anchors were missing or spanned an invalid region.
    async fn capture(&self) -> DeviceResult<Option<(Region, D::Image)>> {
        sleep(CAPTURE_SETTLE).await;

        let instruction = Selector::text_contains(self.settings.instruction.as_str());
        let Some(label) = self.device.find(&instruction, self.settings.anchor_timeout).await? else {
            warn!(anchor = %instruction, "Leading anchor not found");
            return Ok(None);
        };
        let leading = if self.settings.instruction_ancestor == 0 {
            Some(label)
        } else {
            self.device
                .ancestor(&label, self.settings.instruction_ancestor)
                .await?
        };
        let Some(leading) = leading else {
            warn!("Leading anchor has no container");
            return Ok(None);
        };
        let submit = Selector::text(self.settings.submit.as_str());
        let Some(trailing) = self.device.find(&submit, self.settings.anchor_timeout).await? else {
            warn!(anchor = %submit, "Trailing anchor not found");
            return Ok(None);
        };

        let screen = self.device.screen_size();
        let Some(region) = Region::from_anchors(&leading.bounds, &trailing.bounds, screen) else {
            warn!(
                leading = ?leading.bounds,
                trailing = ?trailing.bounds,
                "Anchors span an invalid region"
            );
            return Ok(None);
        };

        self.device.set_overlay_visible(false).await?;
        sleep(OVERLAY_SETTLE).await;
        let shot = self.device.capture_screen().await;
        if let Err(e) = self.device.set_overlay_visible(true).await {
            warn!(error = %e, "Could not restore overlay");
        }
        let cropped = shot?.crop(&region)?;

        if let Some(dir) = self.settings.capture_path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        cropped.save_png(&self.settings.capture_path)?;
        info!(%region, path = %self.settings.capture_path.display(), "Challenge region captured");
        Ok(Some((region, cropped)))
    }

    async fn detect(&self) -> Vec<DetectedTarget> {
        match self.detector.detect(&self.settings.capture_path).await {
            Ok(targets) => {
                debug!(count = targets.len(), "Detector answered");
                targets
            }
            Err(e) => {
                warn!(error = %e, "Detector failed");
                Vec::new()
            }
        }
    }

    /// Taps every target in list order, then submits once.
    async fn click_targets(&self, region: &Region, targets: &[DetectedTarget]) -> DeviceResult<()> {
        for (index, target) in targets.iter().enumerate() {
            let point = target_point(region, target);
            info!(
                index = index + 1,
                label = %target.label,
                confidence = target.confidence,
                %point,
                "Tapping target"
            );
            if !self.device.tap(point).await? {
                warn!(%point, "Tap may not have landed");
            }
            let delay = rand::thread_rng().gen_range(TAP_DELAY_MS);
            sleep(Duration::from_millis(delay)).await;
        }

        let submit = Selector::text(self.settings.submit.as_str());
        match self.device.find(&submit, self.settings.short_timeout).await? {
            Some(button) => {
                self.device.click_element(&button).await?;
            }
            None => warn!("Submit control disappeared before submitting"),
        }
        Ok(())
    }

    async fn verify(&self) -> DeviceResult<bool> {
        let success = Selector::text_contains(self.settings.success.as_str());
        let policy = RetryPolicy::new("challenge accepted", 2, 1000);
        RetryWaiter::wait_for(&policy, async || {
            let found = self.device.find(&success, self.settings.short_timeout).await?;
            Ok::<_, DeviceError>(found.is_some())
        })
        .await
    }

    async fn refresh(&self) {
        let refresh = Selector::text_contains(self.settings.refresh.as_str());
        match self.device.find(&refresh, self.settings.short_timeout).await {
            Ok(Some(button)) => {
                if let Err(e) = self.device.click_element(&button).await {
                    warn!(error = %e, "Refresh tap failed");
                }
            }
            Ok(None) => warn!("Refresh control not found"),
            Err(e) => warn!(error = %e, "Refresh lookup failed"),
        }
        sleep(REFRESH_SETTLE).await;
    }
}
