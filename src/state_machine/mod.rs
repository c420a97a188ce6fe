mod state;
mod unlock;

pub use state::{ChallengeState, UnlockState};
pub use unlock::{UnlockAttempt, UnlockMethod, UnlockSettings, Unlocker};
