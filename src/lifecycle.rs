//! Relaunch and force-stop recovery for the target app.
//!
//! Everything here is best-effort: a step that cannot find its target logs and
//! moves on, and outcomes come back as `bool`.

use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::SignConfig;
use crate::device::{Device, DeviceResult, Selector};
use crate::error::DeviceError;
use crate::retry::{RetryPolicy, RetryWaiter};

const SETTINGS_SETTLE: Duration = Duration::from_millis(1500);
const BACK_SETTLE: Duration = Duration::from_millis(500);
const RELAUNCH_DELAY: Duration = Duration::from_millis(1000);
const PERMISSION_TIMEOUT: Duration = Duration::from_millis(1000);
const AD_ID_TIMEOUT: Duration = Duration::from_millis(1000);

pub struct AppLifecycle<'a, D: Device> {
    device: &'a D,
    config: &'a SignConfig,
}

impl<'a, D: Device> AppLifecycle<'a, D> {
    pub fn new(device: &'a D, config: &'a SignConfig) -> Self {
        Self { device, config }
    }

    /// Stops the app through its settings page, then navigates back.
    ///
    /// Returns `true` only if the force-stop control was invoked.
    pub async fn force_stop(&self) -> bool {
        let app_id = self.config.app_id.as_str();
        info!(app = app_id, "Force-stopping app");

        let stopped = match self.try_force_stop(app_id).await {
            Ok(stopped) => stopped,
            Err(e) => {
                warn!(app = app_id, error = %e, "Force-stop failed");
                false
            }
        };

        sleep(BACK_SETTLE).await;
        if let Err(e) = self.device.back().await {
            warn!(error = %e, "Back after force-stop failed");
        }
        sleep(BACK_SETTLE).await;
        stopped
    }

    async fn try_force_stop(&self, app_id: &str) -> DeviceResult<bool> {
        self.device.open_app_settings(app_id).await?;
        sleep(SETTINGS_SETTLE).await;

        let catalog = &self.config.catalog;
        let stop = Selector::text_any(&catalog.force_stop_texts);
        let Some(button) = self.device.find(&stop, self.config.default_timeout()).await? else {
            info!("Force-stop control not found, app may not be running");
            return Ok(false);
        };
        if !button.enabled {
            info!("Force-stop control is disabled, app is not running");
            return Ok(false);
        }
        if !self.device.click_element(&button).await? {
            warn!("Force-stop control did not accept the click");
            return Ok(false);
        }

        let confirm = Selector::text_any(&catalog.confirm_texts);
        match self.device.find(&confirm, self.config.short_timeout()).await? {
            Some(ok) => {
                self.device.click_element(&ok).await?;
                info!(app = app_id, "App stopped");
            }
            None => info!("No confirmation dialog, app was not running"),
        }
        Ok(true)
    }

    /// Force-stops and relaunches the app, returning whether it landed.
    ///
    /// On any run but the first, also opens the sign-in entry.
    pub async fn restart(&self, first_run: bool) -> bool {
        self.force_stop().await;
        sleep(RELAUNCH_DELAY).await;

        let app_id = self.config.app_id.as_str();
        info!(app = app_id, first_run, "Launching app");
        let landed = match self.device.launch_app(app_id).await {
            Ok(true) => self.wait_for_landing().await,
            Ok(false) => {
                warn!(app = app_id, "App did not launch");
                false
            }
            Err(e) => {
                warn!(app = app_id, error = %e, "App launch failed");
                false
            }
        };

        self.dismiss_permission_prompt().await;
        if !first_run {
            self.open_sign_entry().await;
        }
        landed
    }

    async fn wait_for_landing(&self) -> bool {
        let catalog = &self.config.catalog;
        let by_id = Selector::id(catalog.landing_id.as_str());
        let by_text = Selector::text(catalog.landing_text.as_str());
        let policy = RetryPolicy::new("app landing surface", 2, self.config.short_timeout_ms);

        let landed = RetryWaiter::wait_for(&policy, async || {
            let found = self.device.exists(&by_id).await? || self.device.exists(&by_text).await?;
            Ok::<_, DeviceError>(found)
        })
        .await;
        match landed {
            Ok(landed) => landed,
            Err(e) => {
                warn!(error = %e, "Could not check landing surface");
                false
            }
        }
    }

    async fn dismiss_permission_prompt(&self) {
        let allow = Selector::text_any(&self.config.catalog.permission_texts);
        match self.device.find(&allow, PERMISSION_TIMEOUT).await {
            Ok(Some(button)) => match self.device.click_element(&button).await {
                Ok(_) => info!("Permission prompt accepted"),
                Err(e) => warn!(error = %e, "Permission prompt click failed"),
            },
            Ok(None) => debug!("No permission prompt"),
            Err(e) => warn!(error = %e, "Permission prompt lookup failed"),
        }
    }

    /// Taps the sign-in entry on the app's main surface.
    pub async fn open_sign_entry(&self) -> bool {
        let entry = Selector::desc(self.config.catalog.sign_entry_desc.as_str());
        let found = match self.device.find(&entry, self.config.short_timeout()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "Sign-in entry lookup failed");
                return false;
            }
        };
        let Some(button) = found else {
            info!(entry = %entry, "Sign-in entry not found");
            return false;
        };
        match self.device.click_element(&button).await {
            Ok(clicked) => clicked,
            Err(e) => {
                warn!(error = %e, "Sign-in entry click failed");
                false
            }
        }
    }

    /// Closes a launch ad if one is showing.
    pub async fn dismiss_ad(&self) -> bool {
        let catalog = &self.config.catalog;
        let by_desc = Selector::desc_any(&catalog.ad_close_descs);
        let by_id = Selector::id_any(&catalog.ad_close_ids);

        let close = match self.device.find(&by_desc, self.config.short_timeout()).await {
            Ok(Some(el)) => Some(el),
            Ok(None) => self.device.find(&by_id, AD_ID_TIMEOUT).await.ok().flatten(),
            Err(e) => {
                warn!(error = %e, "Ad lookup failed");
                None
            }
        };
        let Some(close) = close else {
            debug!("No launch ad");
            return false;
        };
        match self.device.click_element(&close).await {
            Ok(true) => {
                info!("Launch ad dismissed");
                sleep(BACK_SETTLE).await;
                true
            }
            Ok(false) => false,
            Err(e) => {
                warn!(error = %e, "Ad close click failed");
                false
            }
        }
    }

    /// Whether every sign-page marker is on screen.
    pub async fn on_sign_page(&self) -> bool {
        sleep(self.config.short_timeout()).await;
        for marker in &self.config.catalog.sign_page_markers {
            match self.device.exists(&Selector::text_contains(marker.as_str())).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(marker = %marker, "Not on the sign page");
                    return false;
                }
                Err(e) => {
                    warn!(error = %e, "Sign page check failed");
                    return false;
                }
            }
        }
        debug!("On the sign page");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Element;
    use crate::testing::{Event, MockDevice, desc_el, text_el};

    const APP: &str = "com.xiaomi.vipaccount";

    fn running_app() -> MockDevice {
        MockDevice::new().with_elements(vec![text_el("强行停止"), text_el("确定")])
    }

    #[tokio::test(start_paused = true)]
    async fn force_stop_confirms_and_goes_back() {
        let device = running_app();
        let config = SignConfig::default();

        assert!(AppLifecycle::new(&device, &config).force_stop().await);
        assert_eq!(
            device.events(),
            vec![
                Event::OpenSettings(APP.into()),
                Event::Click("强行停止".into()),
                Event::Click("确定".into()),
                Event::Back,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disabled_force_stop_is_not_clicked() {
        let disabled = Element {
            enabled: false,
            ..text_el("强行停止")
        };
        let device = MockDevice::new().with_elements(vec![disabled]);
        let config = SignConfig::default();

        assert!(!AppLifecycle::new(&device, &config).force_stop().await);
        assert!(device.clicked_labels().is_empty());
        assert_eq!(device.count(|e| *e == Event::Back), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn force_stop_error_still_goes_back() {
        let device = running_app().failing_on("FORCE STOP");
        let config = SignConfig::default();

        assert!(!AppLifecycle::new(&device, &config).force_stop().await);
        assert_eq!(device.count(|e| *e == Event::Back), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_opens_sign_entry_unless_first_run() {
        let config = SignConfig::default();
        let elements = || vec![text_el("我的"), text_el("允许"), desc_el("签到")];

        let device = MockDevice::new().with_elements(elements());
        assert!(AppLifecycle::new(&device, &config).restart(false).await);
        assert!(device.events().contains(&Event::Launch(APP.into())));
        assert_eq!(device.clicked_labels(), vec!["允许", "签到"]);

        let device = MockDevice::new().with_elements(elements());
        assert!(AppLifecycle::new(&device, &config).restart(true).await);
        assert_eq!(device.clicked_labels(), vec!["允许"]);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_reports_missing_landing_surface() {
        let device = MockDevice::new();
        let config = SignConfig::default();
        assert!(!AppLifecycle::new(&device, &config).restart(true).await);
    }

    #[tokio::test(start_paused = true)]
    async fn ad_closed_by_id_fallback() {
        let close = Element {
            id: "com.xiaomi.vipaccount:id/iv_close".into(),
            enabled: true,
            clickable: true,
            ..Default::default()
        };
        let device = MockDevice::new().with_elements(vec![close]);
        let config = SignConfig::default();

        assert!(AppLifecycle::new(&device, &config).dismiss_ad().await);
        assert_eq!(device.count(|e| matches!(e, Event::Click(_))), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn no_ad_is_not_an_error() {
        let device = MockDevice::new();
        let config = SignConfig::default();
        assert!(!AppLifecycle::new(&device, &config).dismiss_ad().await);
    }

    #[tokio::test(start_paused = true)]
    async fn sign_page_needs_every_marker() {
        let config = SignConfig::default();

        let device = MockDevice::new().with_elements(vec![text_el("社区勋章")]);
        assert!(!AppLifecycle::new(&device, &config).on_sign_page().await);

        let device =
            MockDevice::new().with_elements(vec![text_el("社区勋章"), text_el("社区成长等级 Lv.5")]);
        assert!(AppLifecycle::new(&device, &config).on_sign_page().await);
    }
}
