//! Lock decision state machine.
//!
//! [`LockMachine`] owns every piece of inactivity state and is only ever
//! touched from the service task, so it needs no interior locking. Each
//! operation takes the current instant explicitly and returns the ordered
//! [`Effect`]s it produced; the caller is responsible for carrying them out
//! (publishing events, pausing the detector, re-arming timers).

mod countdown;
mod intake;
mod policy;
mod projection;

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub use countdown::TickRate;
pub use projection::DisplayState;

use countdown::Countdown;
use policy::PauseFlags;
use projection::{project, ProjectionInput};

/// Events published to UI and OS-action listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockEvent {
    /// Coarse status for the tray icon.
    IconStateChanged(DisplayState),
    /// Warning countdown started with the given number of seconds.
    ShowLockPopup(u64),
    /// Seconds left on the visible countdown.
    UpdatePopupTimer(u64),
    /// Countdown dismissed.
    CancelLockPopup,
    /// Lock the workstation now.
    LockWorkstation,
    /// Wake the display (presence seen while the session is locked).
    WakeScreen,
}

/// Side effects requested by a machine operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Publish an event to all listeners.
    Emit(LockEvent),
    /// Push a new pause value to the detector.
    PauseDetector(bool),
    /// Pass the camera-feed flag through to the detector.
    ForceCameraFeed(bool),
    /// (Re)start the one-shot auto-resume timer.
    RestartAutoResume(Duration),
    /// Disarm the auto-resume timer.
    CancelAutoResume,
    /// Switch the evaluation tick rate.
    SetTickRate(TickRate),
}

/// Runtime-adjustable delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Quiet time after the last input before a temporary pause is lifted.
    pub no_input_active_delay: Duration,
    /// Continuous absence before the warning countdown starts.
    pub no_person_detected_delay: Duration,
    /// How long the countdown runs before the lock.
    pub popup_timeout: Duration,
    /// Window after the last motion during which the person counts as present.
    pub presence_grace: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            no_input_active_delay: Duration::from_secs(5),
            no_person_detected_delay: Duration::from_secs(5),
            popup_timeout: Duration::from_secs(5),
            presence_grace: Duration::from_secs(2),
        }
    }
}

/// The inactivity state record and its transitions.
#[derive(Debug)]
pub struct LockMachine {
    timings: Timings,
    last_motion_at: Instant,
    motion_present: bool,
    countdown: Option<Countdown>,
    flags: PauseFlags,
    /// Last pause value pushed to the detector.
    detector_paused: bool,
}

impl LockMachine {
    pub fn new(timings: Timings, now: Instant) -> Self {
        Self {
            timings,
            last_motion_at: now,
            motion_present: false,
            countdown: None,
            flags: PauseFlags::default(),
            detector_paused: false,
        }
    }

    pub fn set_no_input_active_delay(&mut self, seconds: u64) {
        self.timings.no_input_active_delay = Duration::from_secs(seconds);
    }

    pub fn set_no_person_detected_delay(&mut self, seconds: u64) {
        self.timings.no_person_detected_delay = Duration::from_secs(seconds);
    }

    pub fn set_popup_timeout(&mut self, seconds: u64) {
        self.timings.popup_timeout = Duration::from_secs(seconds);
    }

    /// Current display state.
    pub fn display_state(&self, now: Instant) -> DisplayState {
        project(&ProjectionInput {
            forced_pause: self.flags.forced_pause(),
            detector_paused: self.detector_paused,
            since_motion: now.saturating_duration_since(self.last_motion_at),
            presence_grace: self.timings.presence_grace,
        })
    }

    /// Re-emit the display state without mutating anything.
    pub fn refresh(&self, now: Instant) -> Vec<Effect> {
        let mut effects = Vec::new();
        self.project(now, &mut effects);
        effects
    }

    fn project(&self, now: Instant, effects: &mut Vec<Effect>) {
        effects.push(Effect::Emit(LockEvent::IconStateChanged(
            self.display_state(now),
        )));
    }

    fn push_detector_pause(&mut self, paused: bool, effects: &mut Vec<Effect>) {
        if self.detector_paused != paused {
            self.detector_paused = paused;
            effects.push(Effect::PauseDetector(paused));
        }
    }

    /// Dismiss a visible countdown. Returns whether one was visible.
    fn cancel_countdown(&mut self, reason: &str, effects: &mut Vec<Effect>) -> bool {
        if self.countdown.take().is_none() {
            return false;
        }
        debug!(reason, "Lock countdown cancelled");
        effects.push(Effect::Emit(LockEvent::CancelLockPopup));
        effects.push(Effect::SetTickRate(TickRate::Idle));
        true
    }
}

#[cfg(test)]
impl LockMachine {
    pub(crate) fn timings(&self) -> Timings {
        self.timings
    }

    pub(crate) fn detector_paused(&self) -> bool {
        self.detector_paused
    }

    pub(crate) fn motion_present(&self) -> bool {
        self.motion_present
    }

    pub(crate) fn last_motion_at(&self) -> Instant {
        self.last_motion_at
    }

    /// Whether the warning countdown is visible.
    pub(crate) fn is_counting_down(&self) -> bool {
        self.countdown.is_some()
    }
}

/// Events contained in an effect list, in order.
#[cfg(test)]
pub(crate) fn emitted(effects: &[Effect]) -> Vec<LockEvent> {
    effects
        .iter()
        .filter_map(|effect| match effect {
            Effect::Emit(event) => Some(*event),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_machine_is_idle_and_unpaused() {
        let now = Instant::now();
        let machine = LockMachine::new(Timings::default(), now);

        assert!(!machine.is_counting_down());
        assert!(!machine.detector_paused());
        assert!(!machine.motion_present());
        assert_eq!(machine.display_state(now), DisplayState::ActivePersonPresent);
    }

    #[test]
    fn test_config_setters_apply_immediately() {
        let now = Instant::now();
        let mut machine = LockMachine::new(Timings::default(), now);

        machine.set_no_input_active_delay(12);
        machine.set_no_person_detected_delay(30);
        machine.set_popup_timeout(9);

        let timings = machine.timings();
        assert_eq!(timings.no_input_active_delay, Duration::from_secs(12));
        assert_eq!(timings.no_person_detected_delay, Duration::from_secs(30));
        assert_eq!(timings.popup_timeout, Duration::from_secs(9));
    }

    #[test]
    fn test_refresh_only_projects() {
        let now = Instant::now();
        let machine = LockMachine::new(Timings::default(), now);

        let effects = machine.refresh(now + Duration::from_secs(3));
        assert_eq!(
            effects,
            vec![Effect::Emit(LockEvent::IconStateChanged(
                DisplayState::ActivePersonAbsent
            ))]
        );
    }
}
