use std::fmt;

use serde::{Deserialize, Serialize};

/// Phases of one unlock attempt.
///
/// An attempt flows: LOCKED → SCREEN_OFF? → SCREEN_ON_LOCKED →
/// UNLOCK_SURFACE_VISIBLE? → CREDENTIAL_SUBMITTED → UNLOCKED | FAILED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnlockState {
    Locked,
    ScreenOff,
    ScreenOnLocked,
    UnlockSurfaceVisible,
    CredentialSubmitted,
    Unlocked,
    Failed,
}

impl UnlockState {
    pub fn is_terminal(self) -> bool {
        matches!(self, UnlockState::Unlocked | UnlockState::Failed)
    }
}

impl fmt::Display for UnlockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnlockState::Locked => write!(f, "LOCKED"),
            UnlockState::ScreenOff => write!(f, "SCREEN_OFF"),
            UnlockState::ScreenOnLocked => write!(f, "SCREEN_ON_LOCKED"),
            UnlockState::UnlockSurfaceVisible => write!(f, "UNLOCK_SURFACE_VISIBLE"),
            UnlockState::CredentialSubmitted => write!(f, "CREDENTIAL_SUBMITTED"),
            UnlockState::Unlocked => write!(f, "UNLOCKED"),
            UnlockState::Failed => write!(f, "FAILED"),
        }
    }
}

/// Phases of one challenge-solve attempt.
///
/// IDLE → CAPTURED → DETECTED → SUBMITTED → VERIFIED | RETRY
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeState {
    Idle,
    Captured,
    Detected,
    Submitted,
    Verified,
    Retry,
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeState::Idle => write!(f, "IDLE"),
            ChallengeState::Captured => write!(f, "CAPTURED"),
            ChallengeState::Detected => write!(f, "DETECTED"),
            ChallengeState::Submitted => write!(f, "SUBMITTED"),
            ChallengeState::Verified => write!(f, "VERIFIED"),
            ChallengeState::Retry => write!(f, "RETRY"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlock_state_display() {
        assert_eq!(UnlockState::Locked.to_string(), "LOCKED");
        assert_eq!(UnlockState::ScreenOnLocked.to_string(), "SCREEN_ON_LOCKED");
        assert_eq!(
            UnlockState::UnlockSurfaceVisible.to_string(),
            "UNLOCK_SURFACE_VISIBLE"
        );
        assert_eq!(UnlockState::Unlocked.to_string(), "UNLOCKED");
    }

    #[test]
    fn only_unlocked_and_failed_are_terminal() {
        assert!(UnlockState::Unlocked.is_terminal());
        assert!(UnlockState::Failed.is_terminal());
        assert!(!UnlockState::CredentialSubmitted.is_terminal());
        assert!(!UnlockState::ScreenOff.is_terminal());
    }

    #[test]
    fn challenge_state_display() {
        assert_eq!(ChallengeState::Idle.to_string(), "IDLE");
        assert_eq!(ChallengeState::Verified.to_string(), "VERIFIED");
        assert_eq!(ChallengeState::Retry.to_string(), "RETRY");
    }
}
