//! Coarse display state shown in the tray.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The four-valued status presented to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    /// Paused by the user or because the machine runs on battery.
    PausedByUser,
    /// Detector paused for another reason, typically recent input.
    StandbyInputActive,
    /// Detecting, and motion was seen within the grace window.
    ActivePersonPresent,
    /// Detecting, no recent motion.
    ActivePersonAbsent,
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            DisplayState::PausedByUser => "paused",
            DisplayState::StandbyInputActive => "standby (input active)",
            DisplayState::ActivePersonPresent => "active (person present)",
            DisplayState::ActivePersonAbsent => "active (person absent)",
        };
        f.write_str(label)
    }
}

/// Everything the projection reads.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionInput {
    pub forced_pause: bool,
    pub detector_paused: bool,
    pub since_motion: Duration,
    pub presence_grace: Duration,
}

pub fn project(input: &ProjectionInput) -> DisplayState {
    if input.forced_pause {
        DisplayState::PausedByUser
    } else if input.detector_paused {
        DisplayState::StandbyInputActive
    } else if input.since_motion < input.presence_grace {
        DisplayState::ActivePersonPresent
    } else {
        DisplayState::ActivePersonAbsent
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(forced_pause: bool, detector_paused: bool, since_motion_ms: u64) -> ProjectionInput {
        ProjectionInput {
            forced_pause,
            detector_paused,
            since_motion: Duration::from_millis(since_motion_ms),
            presence_grace: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_forced_pause_wins() {
        assert_eq!(project(&input(true, true, 0)), DisplayState::PausedByUser);
        assert_eq!(project(&input(true, false, 10_000)), DisplayState::PausedByUser);
    }

    #[test]
    fn test_temporary_pause_is_standby() {
        assert_eq!(project(&input(false, true, 0)), DisplayState::StandbyInputActive);
    }

    #[test]
    fn test_grace_window_boundary() {
        assert_eq!(project(&input(false, false, 1_999)), DisplayState::ActivePersonPresent);
        assert_eq!(project(&input(false, false, 2_000)), DisplayState::ActivePersonAbsent);
    }

    #[test]
    fn test_serializes_snake_case() {
        let json = serde_json::to_string(&DisplayState::StandbyInputActive).unwrap();
        assert_eq!(json, "\"standby_input_active\"");
    }
}
