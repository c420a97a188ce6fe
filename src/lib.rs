pub mod challenge;
pub mod cli;
pub mod config;
pub mod detect;
pub mod device;
pub mod error;
pub mod lifecycle;
pub mod orchestrator;
pub mod retry;
pub mod state_machine;
pub mod storage;
pub mod tasks;
pub mod ui;
pub mod watchdog;

#[cfg(test)]
pub(crate) mod testing;

pub use challenge::{ChallengeReport, ChallengeSolver};
pub use config::SignConfig;
pub use detect::{ConfiguredDetector, DetectedTarget, Detector};
pub use device::{Device, Element, Point, Region, ScreenImage, Selector};
pub use error::{DetectionError, DeviceError, Result, SignError};
pub use orchestrator::{RunReport, WorkflowOrchestrator};
pub use retry::{RetryPolicy, RetryWaiter};
pub use tasks::{PostTask, TaskOutcome};
pub use watchdog::{Expiry, ProcessExit, RunClock, Terminator, Watchdog};
