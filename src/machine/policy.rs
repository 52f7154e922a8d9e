//! Pause policy: manual pause, battery and session lock folded into a
//! single detector pause decision.
//!
//! The precedence is kept as an explicit table so it can be audited and
//! tested on its own:
//!
//! | change              | on battery | detector paused   | reset clock | cancel countdown  |
//! |---------------------|------------|-------------------|-------------|-------------------|
//! | `SessionLock(true)` | no         | `false`           | no          | no                |
//! | `SessionLock(_)`    | any        | manual or battery | yes         | manual or battery |
//! | `ManualPause(_)`    | any        | manual or battery | no          | manual or battery |
//! | `Battery(_)`        | any        | manual or battery | no          | manual or battery |
//!
//! Rows are matched top to bottom. Locking on mains power keeps the
//! detector running even when the user paused it manually, so presence can
//! still wake the display at the lock screen; the manual flag itself is
//! retained and reapplied on unlock.

use tokio::time::Instant;
use tracing::info;

use super::{Effect, LockMachine};

/// Independent external-state flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseFlags {
    pub manually_paused: bool,
    pub on_battery: bool,
    pub session_locked: bool,
}

impl PauseFlags {
    /// Manual pause or battery power: the system is not looking for absence.
    pub fn forced_pause(&self) -> bool {
        self.manually_paused || self.on_battery
    }

    pub fn apply(&mut self, change: PolicyChange) {
        match change {
            PolicyChange::ManualPause(value) => self.manually_paused = value,
            PolicyChange::Battery(value) => self.on_battery = value,
            PolicyChange::SessionLock(value) => self.session_locked = value,
        }
    }
}

/// A single setter call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChange {
    ManualPause(bool),
    Battery(bool),
    SessionLock(bool),
}

/// Outcome of a policy change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PauseDecision {
    pub detector_paused: bool,
    pub reset_inactivity_clock: bool,
    pub cancel_countdown: bool,
}

/// Evaluate the table above. `flags` must already include `change`.
pub fn resolve(flags: PauseFlags, change: PolicyChange) -> PauseDecision {
    let forced = flags.forced_pause();
    match change {
        PolicyChange::SessionLock(true) if !flags.on_battery => PauseDecision {
            detector_paused: false,
            reset_inactivity_clock: false,
            cancel_countdown: false,
        },
        PolicyChange::SessionLock(_) => PauseDecision {
            detector_paused: forced,
            reset_inactivity_clock: true,
            cancel_countdown: forced,
        },
        PolicyChange::ManualPause(_) | PolicyChange::Battery(_) => PauseDecision {
            detector_paused: forced,
            reset_inactivity_clock: false,
            cancel_countdown: forced,
        },
    }
}

impl LockMachine {
    pub fn set_manual_pause(&mut self, paused: bool, now: Instant) -> Vec<Effect> {
        self.apply_policy(PolicyChange::ManualPause(paused), now)
    }

    pub fn set_battery_state(&mut self, on_battery: bool, now: Instant) -> Vec<Effect> {
        self.apply_policy(PolicyChange::Battery(on_battery), now)
    }

    pub fn set_session_lock_state(&mut self, locked: bool, now: Instant) -> Vec<Effect> {
        self.apply_policy(PolicyChange::SessionLock(locked), now)
    }

    fn apply_policy(&mut self, change: PolicyChange, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.flags.apply(change);
        let decision = resolve(self.flags, change);

        info!(
            ?change,
            forced_pause = self.flags.forced_pause(),
            detector_paused = decision.detector_paused,
            "Pause policy updated"
        );

        if decision.reset_inactivity_clock {
            self.last_motion_at = now;
        }
        // Any policy change supersedes a pending temporary input pause.
        effects.push(Effect::CancelAutoResume);
        self.push_detector_pause(decision.detector_paused, &mut effects);
        if decision.cancel_countdown {
            self.cancel_countdown("forced pause", &mut effects);
        }

        self.project(now, &mut effects);
        effects
    }
}
