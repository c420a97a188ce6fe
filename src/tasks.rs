//! Optional post-tasks run around the daily sign-in.
//!
//! Each task runs inside its own failure boundary: whatever happens, it ends
//! as a [`TaskOutcome`] and the next task still runs.

use std::time::Duration;

use chrono::{Local, NaiveDate};
use rand::Rng;
use regex::Regex;
use serde::Serialize;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use crate::config::{SignConfig, TaskFlags};
use crate::device::{Device, DeviceResult, Element, Point, Selector};
use crate::error::DeviceError;
use crate::lifecycle::AppLifecycle;
use crate::retry::{RetryPolicy, RetryWaiter};
use crate::storage::{LevelLog, LevelRecord, parse_points, parse_total};

const BUTTON: &str = "android.widget.Button";
const TEXT_VIEW: &str = "android.widget.TextView";

// Times such as "09:41" or dates such as "10-19" mark a post in the feed.
const POST_STAMP: &str = r"(?:[01]\d|2[0-3]):[0-5]\d|(?:0[1-9]|1[0-2])-(?:0[1-9]|[12]\d|3[01])";
const FEED_MARKER_DESC: &str = "编辑导航栏顺序";

const MINI_APP_BUTTON: &str = "去微信";
const MINI_APP_MARKERS: [&str; 2] = ["编辑资料", "每日签到"];
const MINI_APP_SIGN: &str = "去签到";
const MINI_APP_FALLBACK: (f64, f64) = (886.0 / 1080.0, 1184.0 / 2400.0);

const CARROT_BUTTON: &str = "去看看";
const VIDEO_BUTTON: &str = "去浏览";
const FLAGSHIP_BUTTON: &str = "去参加";
const FLAGSHIP_REGISTER: &str = "立即报名";
const FLAGSHIP_CONFIRM: (f64, f64) = (0.74, 0.94);
const THANKSGIVING_BUTTON: &str = "去参与";

const REWARD_UNLOCKABLE: &str = "可解锁";
const REWARD_BOOST: &str = "去提升";
const REWARD_DIALOGS: [&str; 2] = ["炫耀一下", "等待解锁"];
const REWARD_EXHAUSTED: &str = "可获得1次解锁机会";

const LEVEL_ENTRY: &str = "社区成长等级";
const LEVEL_TOTAL_LABEL: &str = "成长值";

const EVENT_TIMEOUT: Duration = Duration::from_millis(3000);
const DIALOG_TIMEOUT: Duration = Duration::from_millis(1000);
const STEP_SETTLE: Duration = Duration::from_millis(1000);
const PAGE_SETTLE: Duration = Duration::from_millis(2000);

/// How a post-task body ended, before it becomes a [`TaskOutcome`].
enum Finish {
    Done,
    /// Failed where it stood; a back is still owed.
    Incomplete,
    /// Failed, but already back on the sign page.
    Returned(String),
}

/// Result of one post-task. Never aborts the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskOutcome {
    pub name: String,
    pub succeeded: bool,
    pub detail: Option<String>,
}

impl TaskOutcome {
    pub fn succeeded(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeeded: true,
            detail: None,
        }
    }

    pub fn failed(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            succeeded: false,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostTask {
    BrowsePosts,
    MiniAppSign,
    Carrot,
    WatchVideo { minutes: u64 },
    DualFlagship,
    Thanksgiving,
    RecordLevel,
}

impl PostTask {
    pub fn name(&self) -> &'static str {
        match self {
            PostTask::BrowsePosts => "browse_posts",
            PostTask::MiniAppSign => "mini_app_sign",
            PostTask::Carrot => "carrot",
            PostTask::WatchVideo { .. } => "watch_video",
            PostTask::DualFlagship => "dual_flagship",
            PostTask::Thanksgiving => "thanksgiving",
            PostTask::RecordLevel => "record_level",
        }
    }

    /// Enabled tasks that run after the sign-in, in run order.
    ///
    /// Browsing runs before navigation and level recording depends on the
    /// current page, so the orchestrator schedules those two itself.
    pub fn after_sign_in(flags: &TaskFlags) -> Vec<PostTask> {
        let candidates = [
            (flags.mini_app_sign, PostTask::MiniAppSign),
            (flags.carrot, PostTask::Carrot),
            (
                flags.watch_video,
                PostTask::WatchVideo {
                    minutes: flags.watch_video_minutes,
                },
            ),
            (flags.dual_flagship, PostTask::DualFlagship),
            (flags.thanksgiving, PostTask::Thanksgiving),
        ];
        candidates
            .into_iter()
            .filter_map(|(enabled, task)| enabled.then_some(task))
            .collect()
    }
}

pub struct TaskRunner<'a, D: Device> {
    device: &'a D,
    config: &'a SignConfig,
    lifecycle: AppLifecycle<'a, D>,
    today: NaiveDate,
}

impl<'a, D: Device> TaskRunner<'a, D> {
    pub fn new(device: &'a D, config: &'a SignConfig) -> Self {
        Self {
            device,
            config,
            lifecycle: AppLifecycle::new(device, config),
            today: Local::now().date_naive(),
        }
    }

    /// Overrides the date used to pick today's growth rows.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Runs `task`, converting every failure into an outcome.
    ///
    /// A failed task is followed by one back, unless it already made its own
    /// way back to the sign page.
    pub async fn run_isolated(&self, task: PostTask) -> TaskOutcome {
        let name = task.name();
        info!(task = name, "Starting post-task");

        let (outcome, needs_back) = match self.run(task).await {
            Ok(Finish::Done) => {
                info!(task = name, "Post-task finished");
                (TaskOutcome::succeeded(name), false)
            }
            Ok(Finish::Incomplete) => {
                warn!(task = name, "Post-task did not complete");
                (TaskOutcome::failed(name, "did not complete"), true)
            }
            Ok(Finish::Returned(detail)) => {
                warn!(task = name, detail = %detail, "Post-task failed after returning to the app");
                (TaskOutcome::failed(name, detail), false)
            }
            Err(e) => {
                warn!(task = name, error = %e, "Post-task failed");
                (TaskOutcome::failed(name, e.to_string()), true)
            }
        };

        if needs_back && let Err(e) = self.device.back().await {
            warn!(task = name, error = %e, "Back after failed post-task failed");
        }
        outcome
    }

    async fn run(&self, task: PostTask) -> DeviceResult<Finish> {
        let done = match task {
            PostTask::BrowsePosts => self.browse_posts().await?,
            PostTask::MiniAppSign => return self.mini_app_sign().await,
            PostTask::Carrot => self.carrot().await?,
            PostTask::WatchVideo { minutes } => self.watch_video(minutes).await?,
            PostTask::DualFlagship => self.dual_flagship().await?,
            PostTask::Thanksgiving => self.thanksgiving().await?,
            PostTask::RecordLevel => self.record_level().await?,
        };
        Ok(if done { Finish::Done } else { Finish::Incomplete })
    }

    async fn find(&self, selector: &Selector, timeout: Duration) -> DeviceResult<Option<Element>> {
        let found = self.device.find(selector, timeout).await?;
        if found.is_none() {
            debug!(selector = %selector, "Element not found");
        }
        Ok(found)
    }

    /// Finds and clicks; `false` if the element is absent.
    async fn click_found(&self, selector: &Selector, timeout: Duration) -> DeviceResult<bool> {
        match self.find(selector, timeout).await? {
            Some(element) => self.device.click_element(&element).await,
            None => {
                info!(selector = %selector, "Entry not found");
                Ok(false)
            }
        }
    }

    async fn scroll(&self, from_y: f64, to_y: f64, duration: Duration) -> DeviceResult<()> {
        let screen = self.device.screen_size();
        self.device
            .swipe(screen.fraction(0.5, from_y), screen.fraction(0.5, to_y), duration)
            .await
    }

    async fn browse_posts(&self) -> DeviceResult<bool> {
        let stamp = Regex::new(POST_STAMP)
            .map_err(|e| DeviceError::action("browse_posts", e.to_string()))?;
        let post = Selector::All(vec![
            Selector::Class(TEXT_VIEW.into()),
            Selector::TextMatches(stamp),
            Selector::Clickable,
        ]);
        let feed = Selector::All(vec![
            Selector::Class("ImageView".into()),
            Selector::desc(FEED_MARKER_DESC),
        ]);

        let policy = RetryPolicy::new("post detail opened", 3, 1000);
        let opened = RetryWaiter::wait_for(&policy, async || {
            let item = self.find(&post, self.config.default_timeout()).await?;
            let on_feed = self.device.exists(&feed).await?;
            match item {
                Some(item) if on_feed => self.device.click_element(&item).await,
                _ => {
                    info!("Post feed not found, restarting app");
                    self.lifecycle.restart(true).await;
                    Ok(false)
                }
            }
        })
        .await?;
        if !opened {
            return Ok(false);
        }

        info!("Reading post");
        sleep(random_ms(6000, 7000)).await;
        self.scroll(0.8, 0.2, random_ms(400, 600)).await?;
        sleep(random_ms(6000, 7000)).await;
        self.device.back().await?;
        Ok(true)
    }

    async fn mini_app_sign(&self) -> DeviceResult<Finish> {
        let entry = Selector::class_text(BUTTON, MINI_APP_BUTTON);
        if !self.click_found(&entry, self.config.default_timeout()).await? {
            return Ok(Finish::Incomplete);
        }
        let signed = self.sign_in_mini_app().await;
        self.return_to_app().await;
        Ok(match signed {
            Ok(true) => Finish::Done,
            Ok(false) => Finish::Returned("mini program not signed".to_string()),
            Err(e) => Finish::Returned(e.to_string()),
        })
    }

    async fn sign_in_mini_app(&self) -> DeviceResult<bool> {
        let loaded_policy = RetryPolicy::new("mini program loaded", 1, self.config.short_timeout_ms);
        let loaded = RetryWaiter::wait_for(&loaded_policy, async || {
            for marker in MINI_APP_MARKERS {
                if !self.device.exists(&Selector::text_contains(marker)).await? {
                    info!(marker, "Mini program marker missing");
                    return Ok(false);
                }
            }
            Ok::<_, DeviceError>(true)
        })
        .await?;

        if !loaded {
            warn!("Mini program layout unavailable, tapping fixed position");
            let (fx, fy) = MINI_APP_FALLBACK;
            self.device.tap(self.device.screen_size().fraction(fx, fy)).await?;
            sleep(STEP_SETTLE).await;
            return Ok(false);
        }

        sleep(STEP_SETTLE).await;
        let done = Selector::text(self.config.catalog.signed_marker.as_str());
        let sign = Selector::text(MINI_APP_SIGN);
        let policy = RetryPolicy::new("mini program signed", 3, 2000);
        RetryWaiter::wait_for(&policy, async || {
            if self.device.exists(&done).await? {
                return Ok(true);
            }
            if self.click_found(&sign, self.config.short_timeout()).await? {
                sleep(Duration::from_millis(1500)).await;
            }
            self.device.exists(&done).await
        })
        .await
    }

    async fn return_to_app(&self) {
        info!("Returning to the community app");
        if let Err(e) = self.device.back().await {
            warn!(error = %e, "Back from mini program failed");
        }
        sleep(STEP_SETTLE).await;

        let policy = RetryPolicy::new("back in community app", 3, 1000);
        let returned = RetryWaiter::wait_for(&policy, async || {
            self.device.launch_app(&self.config.app_id).await?;
            Ok::<_, DeviceError>(self.lifecycle.on_sign_page().await)
        })
        .await;
        match returned {
            Ok(true) => {}
            Ok(false) => warn!("Sign page not reached after mini program"),
            Err(e) => warn!(error = %e, "Relaunch after mini program failed"),
        }
    }

    async fn carrot(&self) -> DeviceResult<bool> {
        self.scroll(0.8, 0.4, Duration::from_millis(500)).await?;
        sleep(STEP_SETTLE).await;
        if !self
            .click_found(&Selector::text(CARROT_BUTTON), self.config.default_timeout())
            .await?
        {
            return Ok(false);
        }
        sleep(STEP_SETTLE).await;
        self.device.back().await?;
        Ok(true)
    }

    async fn watch_video(&self, minutes: u64) -> DeviceResult<bool> {
        let entry = Selector::class_text(BUTTON, VIDEO_BUTTON);
        if !self.click_found(&entry, self.config.default_timeout()).await? {
            return Ok(false);
        }

        let target = video_budget(minutes);
        let started = Instant::now();
        let mut logged_minute = None;
        let screen = self.device.screen_size();
        loop {
            let elapsed = started.elapsed();
            if elapsed >= target {
                info!(minutes, "Finished watching");
                break;
            }
            let minute = elapsed.as_secs() / 60;
            if logged_minute != Some(minute) {
                info!(minute, "Watching videos");
                logged_minute = Some(minute);
            }

            sleep(random_ms(10_000, 15_000)).await;
            let (x, start_y, end_y) = {
                let mut rng = rand::thread_rng();
                (
                    screen.width as i32 / 2 + rng.gen_range(-50..=50),
                    (screen.height as f64 * 0.8) as i32 + rng.gen_range(-50..=50),
                    (screen.height as f64 * 0.3) as i32 + rng.gen_range(-50..=50),
                )
            };
            self.device
                .swipe(
                    Point::new(x, start_y),
                    Point::new(x, end_y),
                    random_ms(400, 600),
                )
                .await?;
        }

        self.device.back().await?;
        Ok(true)
    }

    async fn dual_flagship(&self) -> DeviceResult<bool> {
        let entry = Selector::class_text(BUTTON, FLAGSHIP_BUTTON);
        if !self.click_found(&entry, self.config.default_timeout()).await? {
            return Ok(false);
        }

        let register = Selector::class_text(BUTTON, FLAGSHIP_REGISTER);
        if let Some(button) = self.find(&register, self.config.short_timeout()).await? {
            info!("First visit, registering for the event");
            // The agreement checkbox sits next to the register button.
            let agreed = match self.device.sibling(&button, 1).await? {
                Some(checkbox) => self.device.click_element(&checkbox).await?,
                None => false,
            };
            if agreed {
                self.device.click_element(&button).await?;
                sleep(PAGE_SETTLE).await;
                let (fx, fy) = FLAGSHIP_CONFIRM;
                self.device.tap(self.device.screen_size().fraction(fx, fy)).await?;
                sleep(STEP_SETTLE).await;
            } else {
                warn!("Agreement checkbox not found, skipping registration");
            }
        }

        let claimed = self.claim_rewards().await?;
        info!(claimed, "Dual flagship event done");
        sleep(STEP_SETTLE).await;
        self.device.back().await?;
        Ok(true)
    }

    async fn thanksgiving(&self) -> DeviceResult<bool> {
        let entry = Selector::class_text(BUTTON, THANKSGIVING_BUTTON);
        if !self.click_found(&entry, EVENT_TIMEOUT).await? {
            return Ok(false);
        }
        sleep(STEP_SETTLE).await;
        let claimed = self.claim_rewards().await?;
        info!(claimed, "Thanksgiving event done");
        sleep(STEP_SETTLE).await;
        self.device.back().await?;
        Ok(true)
    }

    /// Spends the event's unlock chances on its unlockable rewards.
    ///
    /// Returns how many rewards were claimed.
    async fn claim_rewards(&self) -> DeviceResult<u32> {
        let unlockables = self
            .device
            .find_all(&Selector::class_text(TEXT_VIEW, REWARD_UNLOCKABLE))
            .await?;
        let mut chances = self.unlock_chances().await?;
        if unlockables.is_empty() || chances == 0 {
            info!(rewards = unlockables.len(), chances, "No unlock chances today");
            return Ok(0);
        }

        let dialogs: Vec<Selector> = REWARD_DIALOGS
            .iter()
            .map(|text| Selector::text(*text))
            .collect();
        let exhausted = Selector::class_text(TEXT_VIEW, REWARD_EXHAUSTED);
        let mut claimed = 0;
        for reward in &unlockables {
            if chances == 0 {
                info!("Out of unlock chances");
                break;
            }
            self.device.click_element(reward).await?;
            claimed += 1;
            chances -= 1;
            info!(claimed, "Reward unlocked");
            sleep(STEP_SETTLE).await;

            for dialog in &dialogs {
                if self.find(dialog, DIALOG_TIMEOUT).await?.is_some() {
                    self.device.back().await?;
                    break;
                }
            }
            sleep(STEP_SETTLE).await;
            if self.device.exists(&exhausted).await? {
                info!("Out of unlock chances");
                break;
            }
        }
        Ok(claimed)
    }

    /// Unlock chances shown just before the boost button.
    async fn unlock_chances(&self) -> DeviceResult<u32> {
        let boost = Selector::class_text(BUTTON, REWARD_BOOST);
        let Some(button) = self.find(&boost, EVENT_TIMEOUT).await? else {
            return Ok(0);
        };
        let counter = self.device.sibling(&button, -1).await?;
        Ok(counter
            .and_then(|el| el.text.trim().parse().ok())
            .unwrap_or(0))
    }

    async fn record_level(&self) -> DeviceResult<bool> {
        if !self
            .click_found(&Selector::text(LEVEL_ENTRY), self.config.default_timeout())
            .await?
        {
            return Ok(false);
        }
        sleep(PAGE_SETTLE).await;

        let today = self.today.format("%Y/%m/%d").to_string();
        let rows = self
            .device
            .find_all(&Selector::All(vec![
                Selector::Class(TEXT_VIEW.into()),
                Selector::text_contains(today.as_str()),
            ]))
            .await?;

        let mut gained = 0;
        for row in &rows {
            let task = self.device.sibling(row, -1).await?.map(|el| el.text);
            let points = self.device.sibling(row, 1).await?.and_then(|el| parse_points(&el.text));
            if let Some(points) = points {
                info!(task = task.as_deref().unwrap_or("?"), points, "Growth entry");
                gained += points;
            }
        }
        if rows.is_empty() {
            info!(date = %today, "No growth entries today");
        }
        info!(gained, "Growth gained today");

        let total_label = Selector::All(vec![
            Selector::Class(TEXT_VIEW.into()),
            Selector::text_contains(LEVEL_TOTAL_LABEL),
            Selector::text_contains("/"),
        ]);
        let total = self
            .find(&total_label, self.config.short_timeout())
            .await?
            .and_then(|el| parse_total(&el.text));

        // Failures leave the back to run_isolated.
        let Some(total) = total else {
            warn!("Current growth total not found");
            return Ok(false);
        };
        info!(total, "Current growth total");
        let record = LevelRecord {
            date: self.today,
            gained,
            total,
        };
        let log = LevelLog::new(&self.config.record_path);
        if let Err(e) = log.append(&record).await {
            warn!(error = %e, "Could not write level record");
            return Ok(false);
        }
        info!(path = %log.path().display(), "Level recorded");

        self.device.back().await?;
        Ok(true)
    }
}

fn video_budget(minutes: u64) -> Duration {
    Duration::from_secs(minutes.saturating_mul(60))
}

fn random_ms(low: u64, high: u64) -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(low..=high))
}
