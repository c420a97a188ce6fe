//! Global run-time supervisor.
//!
//! The [`Watchdog`] runs on a dedicated OS thread that wakes every
//! [`CHECK_INTERVAL`], reads the immutable [`RunClock`], and hands control to a
//! [`Terminator`] once the run has outlived its budget. The workflow only talks
//! to it through a channel, so a blocked device call on the caller's runtime
//! cannot hold it back.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use tracing::{debug, error, info, warn};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Start time and runtime budget of one run. Never changes after [`RunClock::start`].
#[derive(Debug, Clone, Copy)]
pub struct RunClock {
    started_at: Instant,
    started_wall: DateTime<Local>,
    max_runtime: Duration,
}

impl RunClock {
    pub fn start(max_runtime: Duration) -> Self {
        Self {
            started_at: Instant::now(),
            started_wall: Local::now(),
            max_runtime,
        }
    }

    pub fn started_wall(&self) -> DateTime<Local> {
        self.started_wall
    }

    pub fn max_runtime(&self) -> Duration {
        self.max_runtime
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// True iff `now - started_at > max_runtime`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started_at) > self.max_runtime
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }
}

/// State handed to a [`Terminator`] when the budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    pub elapsed: Duration,
    /// Volume in effect before the run muted the device, if it did.
    pub muted_volume: Option<u32>,
}

/// What the watchdog does when the budget runs out.
pub trait Terminator: Send + Sync + 'static {
    fn terminate(&self, expiry: Expiry);
}

impl<T: Terminator> Terminator for Arc<T> {
    fn terminate(&self, expiry: Expiry) {
        (**self).terminate(expiry);
    }
}

type RestoreVolume = Box<dyn Fn(u32) + Send + Sync>;

/// Ends the process with status 1. Nothing in the workflow can veto it.
///
/// Async teardown cannot run from the watchdog thread. A host that can set the
/// volume synchronously registers that with [`ProcessExit::with_volume_restore`].
#[derive(Default)]
pub struct ProcessExit {
    restore_volume: Option<RestoreVolume>,
}

impl ProcessExit {
    pub fn with_volume_restore(restore: impl Fn(u32) + Send + Sync + 'static) -> Self {
        Self {
            restore_volume: Some(Box::new(restore)),
        }
    }

    fn last_words(&self, expiry: Expiry) {
        error!(
            elapsed_secs = expiry.elapsed.as_secs_f64(),
            "Run exceeded its time budget, terminating"
        );
        match (expiry.muted_volume, &self.restore_volume) {
            (Some(volume), Some(restore)) => {
                restore(volume);
                info!(volume, "Volume restored before exit");
            }
            (Some(volume), None) => {
                warn!(volume, "Exiting with the device still muted");
            }
            (None, _) => {}
        }
    }
}

impl fmt::Debug for ProcessExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessExit")
            .field("restore_volume", &self.restore_volume.is_some())
            .finish()
    }
}

impl Terminator for ProcessExit {
    fn terminate(&self, expiry: Expiry) {
        self.last_words(expiry);
        std::process::exit(1);
    }
}

enum Signal {
    Muted(u32),
    Shutdown,
}

/// Handle to the supervisor thread. Dropping it disarms the watchdog.
pub struct Watchdog {
    tx: Sender<Signal>,
    handle: Option<JoinHandle<()>>,
    fired: Arc<AtomicBool>,
}

impl Watchdog {
    pub fn start<T: Terminator>(clock: RunClock, terminator: T) -> std::io::Result<Self> {
        Self::with_interval(clock, CHECK_INTERVAL, terminator)
    }

    pub fn with_interval<T: Terminator>(
        clock: RunClock,
        every: Duration,
        terminator: T,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = fired.clone();

        let handle = thread::Builder::new()
            .name("watchdog".into())
            .spawn(move || supervise(clock, every, rx, &flag, terminator))?;

        debug!(
            max_runtime_secs = clock.max_runtime().as_secs(),
            interval_ms = every.as_millis() as u64,
            "Watchdog armed"
        );
        Ok(Self {
            tx,
            handle: Some(handle),
            fired,
        })
    }

    /// Tells the supervisor which volume to restore if it has to end the run.
    pub fn note_muted(&self, volume: u32) {
        let _ = self.tx.send(Signal::Muted(volume));
    }

    /// Disarms the watchdog once the run has finished on its own.
    pub fn stop(self) {
        drop(self);
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        let _ = self.tx.send(Signal::Shutdown);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.join()
        {
            warn!("Watchdog thread panicked: {:?}", e);
        }
    }
}

fn supervise<T: Terminator>(
    clock: RunClock,
    every: Duration,
    rx: Receiver<Signal>,
    fired: &AtomicBool,
    terminator: T,
) {
    let mut muted_volume = None;
    let mut next_tick = Instant::now() + every;
    loop {
        match rx.recv_timeout(next_tick.saturating_duration_since(Instant::now())) {
            Ok(Signal::Muted(volume)) => {
                muted_volume = Some(volume);
                continue;
            }
            Ok(Signal::Shutdown) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }
        next_tick += every;

        let elapsed = clock.elapsed();
        if clock.is_expired() {
            fired.store(true, Ordering::SeqCst);
            terminator.terminate(Expiry {
                elapsed,
                muted_volume,
            });
            return;
        }
        debug!(elapsed_secs = elapsed.as_secs(), "Watchdog tick");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        fired: Mutex<Option<Expiry>>,
    }

    impl Recorder {
        fn expiry(&self) -> Option<Expiry> {
            *self.fired.lock().unwrap()
        }
    }

    impl Terminator for Recorder {
        fn terminate(&self, expiry: Expiry) {
            *self.fired.lock().unwrap() = Some(expiry);
        }
    }

    #[test]
    fn expiry_is_strictly_after_budget() {
        let max = Duration::from_millis(60_000);
        let clock = RunClock::start(max);
        let start = clock.started_at;

        assert!(!clock.is_expired_at(start + max - Duration::from_millis(1)));
        assert!(!clock.is_expired_at(start + max));
        assert!(clock.is_expired_at(start + max + Duration::from_millis(1)));
    }

    #[test]
    fn fires_within_one_interval_after_budget() {
        let max = Duration::from_millis(300);
        let every = Duration::from_millis(100);
        let recorder = Arc::new(Recorder::default());
        let watchdog =
            Watchdog::with_interval(RunClock::start(max), every, recorder.clone()).unwrap();

        thread::sleep(Duration::from_millis(150));
        assert_eq!(recorder.expiry(), None);
        assert!(!watchdog.has_fired());

        thread::sleep(Duration::from_millis(600));
        let expiry = recorder.expiry().expect("watchdog should have fired");
        assert!(expiry.elapsed > max);
        assert_eq!(expiry.muted_volume, None);
        assert!(watchdog.has_fired());
    }

    #[test]
    fn stopped_watchdog_never_fires() {
        let recorder = Arc::new(Recorder::default());
        let watchdog = Watchdog::with_interval(
            RunClock::start(Duration::from_millis(20)),
            Duration::from_millis(10),
            recorder.clone(),
        )
        .unwrap();
        watchdog.stop();

        thread::sleep(Duration::from_millis(100));
        assert_eq!(recorder.expiry(), None);
    }

    #[tokio::test]
    async fn fires_while_the_runtime_thread_is_blocked() {
        let recorder = Arc::new(Recorder::default());
        let _watchdog = Watchdog::with_interval(
            RunClock::start(Duration::from_millis(50)),
            Duration::from_millis(20),
            recorder.clone(),
        )
        .unwrap();

        // A device call that blocks the only runtime thread.
        std::thread::sleep(Duration::from_millis(500));
        assert!(recorder.expiry().is_some());
    }

    #[test]
    fn reports_the_volume_to_restore() {
        let recorder = Arc::new(Recorder::default());
        let watchdog = Watchdog::with_interval(
            RunClock::start(Duration::from_millis(50)),
            Duration::from_millis(20),
            recorder.clone(),
        )
        .unwrap();
        watchdog.note_muted(9);

        thread::sleep(Duration::from_millis(400));
        assert_eq!(recorder.expiry().map(|e| e.muted_volume), Some(Some(9)));
    }

    #[test]
    fn process_exit_runs_the_volume_restore_hook() {
        let restored = Arc::new(Mutex::new(None));
        let sink = restored.clone();
        let exit = ProcessExit::with_volume_restore(move |v| *sink.lock().unwrap() = Some(v));

        exit.last_words(Expiry {
            elapsed: Duration::from_secs(601),
            muted_volume: Some(6),
        });
        assert_eq!(*restored.lock().unwrap(), Some(6));
    }
}
