//! Periodic inactivity evaluation and the warning countdown.
//!
//! ```text
//!            absent >= no_person_detected_delay
//!   Idle ─────────────────────────────────────────► Warning
//!    ▲                                                 │
//!    │  paused / locked / motion   (CancelLockPopup)   │
//!    ├─────────────────────────────────────────────────┤
//!    │  elapsed >= popup_timeout   (CancelLockPopup,   │
//!    │                              LockWorkstation)   │
//!    └─────────────────────────────────────────────────┘
//! ```

use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{Effect, LockEvent, LockMachine};

/// Evaluation tick rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickRate {
    /// No countdown visible.
    Idle,
    /// Countdown visible; ticks faster for a smooth display.
    Countdown,
}

impl TickRate {
    pub const fn period(self) -> Duration {
        match self {
            TickRate::Idle => Duration::from_millis(1000),
            TickRate::Countdown => Duration::from_millis(200),
        }
    }
}

/// A visible countdown.
#[derive(Debug, Clone, Copy)]
pub(super) struct Countdown {
    pub(super) started_at: Instant,
    /// Seconds value last shown to listeners.
    pub(super) last_announced: u64,
}

impl LockMachine {
    pub fn tick_rate(&self) -> TickRate {
        if self.countdown.is_some() {
            TickRate::Countdown
        } else {
            TickRate::Idle
        }
    }

    /// Evaluate the inactivity state once.
    pub fn tick(&mut self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        match self.countdown {
            Some(countdown) => self.tick_warning(countdown, now, &mut effects),
            None => self.tick_idle(now, &mut effects),
        }
        self.project(now, &mut effects);
        effects
    }

    fn tick_idle(&mut self, now: Instant, effects: &mut Vec<Effect>) {
        if self.detector_paused || self.flags.session_locked {
            return;
        }

        let absent_for = now.saturating_duration_since(self.last_motion_at);
        if absent_for < self.timings.no_person_detected_delay {
            return;
        }

        let seconds = self.timings.popup_timeout.as_secs();
        self.countdown = Some(Countdown {
            started_at: now,
            last_announced: seconds,
        });
        debug!(?absent_for, seconds, "Inactivity detected, showing lock popup");
        effects.push(Effect::SetTickRate(TickRate::Countdown));
        effects.push(Effect::Emit(LockEvent::ShowLockPopup(seconds)));
    }

    fn tick_warning(&mut self, countdown: Countdown, now: Instant, effects: &mut Vec<Effect>) {
        if self.detector_paused || self.flags.session_locked || self.motion_present {
            self.cancel_countdown("state changed", effects);
            return;
        }

        let elapsed = now.saturating_duration_since(countdown.started_at);
        if elapsed >= self.timings.popup_timeout {
            self.cancel_countdown("countdown expired", effects);
            // Conditions may have moved since the countdown started.
            if !self.flags.session_locked && !self.detector_paused && !self.motion_present {
                info!("Locking workstation after {:?} countdown", elapsed);
                effects.push(Effect::Emit(LockEvent::LockWorkstation));
                // The lock closes this inactivity episode.
                self.last_motion_at = now;
            }
            return;
        }

        // Rounded up, so the popup reads 5 for its first whole second.
        let remaining = self.timings.popup_timeout.saturating_sub(elapsed);
        let seconds_left = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        if seconds_left < countdown.last_announced {
            self.countdown = Some(Countdown {
                last_announced: seconds_left,
                ..countdown
            });
            effects.push(Effect::Emit(LockEvent::UpdatePopupTimer(seconds_left)));
        }
    }
}
