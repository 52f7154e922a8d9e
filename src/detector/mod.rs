//! Presence detector collaborator.
//!
//! Camera capture and inference live outside this crate; the lock service
//! only sees the detector's three presence events and drives its pause
//! and camera-feed controls.

mod process;

use thiserror::Error;
use tracing::info;

use crate::config::DetectorConfig;
use crate::service::SignalSink;

pub use process::ProcessDetector;

/// Events reported by a detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DetectorEvent {
    /// A person is in view.
    PresenceConfirmed,
    /// Nobody is in view.
    PresenceLost,
    /// A chair is in view but no person.
    PresenceUncertain,
    /// The detector hit a problem; presence state is unchanged.
    Error(String),
}

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detector command is empty")]
    EmptyCommand,

    #[error("failed to spawn detector `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("detector process has no {0} pipe")]
    MissingPipe(&'static str),

    #[error("failed to stop detector: {0}")]
    Stop(#[source] std::io::Error),
}

/// Control surface of a presence detector.
///
/// Implementations must not block: the lock service calls these from its
/// evaluation task.
pub trait PresenceDetector: Send {
    /// Begin producing events into `sink`.
    fn start(&mut self, sink: SignalSink) -> Result<(), DetectorError>;

    fn set_paused(&mut self, paused: bool);

    fn set_force_camera_feed(&mut self, enabled: bool);

    /// Release the detector. Called once on teardown.
    fn stop(&mut self) -> Result<(), DetectorError>;
}

/// Detector used when no detection program is configured. Locking then
/// follows input inactivity alone.
#[derive(Debug, Default)]
pub struct NoDetector;

impl PresenceDetector for NoDetector {
    fn start(&mut self, _sink: SignalSink) -> Result<(), DetectorError> {
        info!("No presence detector configured, using input activity only");
        Ok(())
    }

    fn set_paused(&mut self, _paused: bool) {}

    fn set_force_camera_feed(&mut self, _enabled: bool) {}

    fn stop(&mut self) -> Result<(), DetectorError> {
        Ok(())
    }
}

/// Build the detector described by the configuration.
pub fn from_config(config: &DetectorConfig) -> Box<dyn PresenceDetector> {
    if config.command.is_empty() {
        Box::new(NoDetector)
    } else {
        Box::new(ProcessDetector::new(
            config.command.clone(),
            config.force_camera_feed,
        ))
    }
}

#[cfg(test)]
pub mod mock {
    //! Recording detector for service tests.

    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub struct Recorded {
        pub started: bool,
        pub stopped: bool,
        pub pauses: Vec<bool>,
        pub force_feed: Vec<bool>,
        /// Pause pushes received after `stop`.
        pub pauses_after_stop: usize,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockDetector {
        recorded: Arc<Mutex<Recorded>>,
        sink: Arc<Mutex<Option<SignalSink>>>,
        /// Make `stop` fail.
        pub fail_stop: bool,
    }

    impl MockDetector {
        pub fn new() -> Self {
            Self::default()
        }

        /// Inject an event as if the detector produced it.
        pub fn emit(&self, event: DetectorEvent) -> bool {
            match self.sink.lock().unwrap().as_ref() {
                Some(sink) => sink.detector(event),
                None => false,
            }
        }

        pub fn pauses(&self) -> Vec<bool> {
            self.recorded.lock().unwrap().pauses.clone()
        }

        pub fn force_feed(&self) -> Vec<bool> {
            self.recorded.lock().unwrap().force_feed.clone()
        }

        pub fn started(&self) -> bool {
            self.recorded.lock().unwrap().started
        }

        pub fn stopped(&self) -> bool {
            self.recorded.lock().unwrap().stopped
        }

        pub fn pauses_after_stop(&self) -> usize {
            self.recorded.lock().unwrap().pauses_after_stop
        }
    }

    impl PresenceDetector for MockDetector {
        fn start(&mut self, sink: SignalSink) -> Result<(), DetectorError> {
            *self.sink.lock().unwrap() = Some(sink);
            self.recorded.lock().unwrap().started = true;
            Ok(())
        }

        fn set_paused(&mut self, paused: bool) {
            let mut recorded = self.recorded.lock().unwrap();
            if recorded.stopped {
                recorded.pauses_after_stop += 1;
            }
            recorded.pauses.push(paused);
        }

        fn set_force_camera_feed(&mut self, enabled: bool) {
            self.recorded.lock().unwrap().force_feed.push(enabled);
        }

        fn stop(&mut self) -> Result<(), DetectorError> {
            self.recorded.lock().unwrap().stopped = true;
            if self.fail_stop {
                return Err(DetectorError::Stop(std::io::Error::other("mock failure")));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_without_command_is_input_only() {
        let config = DetectorConfig::default();
        let mut detector = from_config(&config);
        assert!(detector.stop().is_ok());
    }

    #[test]
    fn test_error_messages() {
        assert_eq!(
            DetectorError::EmptyCommand.to_string(),
            "detector command is empty"
        );
        assert_eq!(
            DetectorError::MissingPipe("stdout").to_string(),
            "detector process has no stdout pipe"
        );
    }
}
