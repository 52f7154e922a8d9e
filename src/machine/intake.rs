//! Presence and input signals.

use tokio::time::Instant;
use tracing::debug;

use super::{Effect, LockEvent, LockMachine};

impl LockMachine {
    /// The detector sees a person.
    pub fn presence_confirmed(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.motion_present = true;
        self.last_motion_at = now;
        self.cancel_countdown("presence confirmed", &mut effects);
        self.project(now, &mut effects);

        if self.flags.session_locked {
            debug!("Presence while session is locked, waking screen");
            effects.push(Effect::Emit(LockEvent::WakeScreen));
        }
        effects
    }

    /// The detector no longer sees a person. The inactivity clock keeps
    /// running from the last motion; only the tick starts a countdown.
    pub fn presence_lost(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.motion_present = false;
        self.project(now, &mut effects);
        effects
    }

    /// A chair is in view but no person. Treated as absence.
    pub fn presence_uncertain(&mut self, now: Instant) -> Vec<Effect> {
        self.presence_lost(now)
    }

    /// Keyboard or pointer input occurred.
    ///
    /// Input implies someone is at the keyboard, so the detector is paused
    /// until `no_input_active_delay` passes without further input. Each
    /// call restarts that timer.
    pub fn input_activity(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if !self.flags.forced_pause() {
            effects.push(Effect::RestartAutoResume(self.timings.no_input_active_delay));
            self.push_detector_pause(true, &mut effects);
        }

        self.last_motion_at = now;
        self.cancel_countdown("input activity", &mut effects);
        self.project(now, &mut effects);
        effects
    }

    /// The auto-resume timer fired with no further input.
    pub fn auto_resume_elapsed(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.flags.forced_pause() || !self.detector_paused {
            return effects;
        }

        debug!("Input quiet period elapsed, resuming detection");
        self.last_motion_at = now;
        self.push_detector_pause(false, &mut effects);
        self.project(now, &mut effects);
        effects
    }

    /// The user dismissed the countdown from the popup.
    pub fn cancel_from_user(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.cancel_countdown("cancelled by user", &mut effects);
        self.last_motion_at = now;
        self.project(now, &mut effects);
        effects
    }

    pub fn set_force_camera_feed(&mut self, enabled: bool) -> Vec<Effect> {
        vec![Effect::ForceCameraFeed(enabled)]
    }
}
