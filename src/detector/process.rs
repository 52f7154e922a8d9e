//! Detector running as an external program.
//!
//! The program reports presence as JSON lines on stdout, e.g.
//! `{"event":"presence_confirmed"}`, and receives control lines on stdin,
//! e.g. `{"command":"pause","value":true}`.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{DetectorError, DetectorEvent, PresenceDetector};
use crate::service::SignalSink;

/// Lines read from the detector.
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum DetectorMessage {
    PresenceConfirmed,
    PresenceLost,
    PresenceUncertain,
    Error { message: String },
}

impl From<DetectorMessage> for DetectorEvent {
    fn from(message: DetectorMessage) -> Self {
        match message {
            DetectorMessage::PresenceConfirmed => DetectorEvent::PresenceConfirmed,
            DetectorMessage::PresenceLost => DetectorEvent::PresenceLost,
            DetectorMessage::PresenceUncertain => DetectorEvent::PresenceUncertain,
            DetectorMessage::Error { message } => DetectorEvent::Error(message),
        }
    }
}

/// Lines written to the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "command", content = "value", rename_all = "snake_case")]
enum DetectorCommand {
    Pause(bool),
    ForceCameraFeed(bool),
}

/// Parse one line of detector output. Anything unrecognised becomes an
/// error event so it is logged without touching presence state.
pub fn parse_line(line: &str) -> DetectorEvent {
    match serde_json::from_str::<DetectorMessage>(line.trim()) {
        Ok(message) => message.into(),
        Err(e) => DetectorEvent::Error(format!("unrecognised detector output {:?}: {}", line, e)),
    }
}

/// Detector backed by a child process.
pub struct ProcessDetector {
    command: Vec<String>,
    force_camera_feed: bool,
    child: Option<Child>,
    control: Option<mpsc::UnboundedSender<DetectorCommand>>,
}

impl ProcessDetector {
    pub fn new(command: Vec<String>, force_camera_feed: bool) -> Self {
        Self {
            command,
            force_camera_feed,
            child: None,
            control: None,
        }
    }

    fn send(&self, command: DetectorCommand) {
        match &self.control {
            Some(control) => {
                if control.send(command).is_err() {
                    debug!(?command, "Detector input closed, dropping command");
                }
            }
            None => debug!(?command, "Detector not running, dropping command"),
        }
    }
}

impl PresenceDetector for ProcessDetector {
    fn start(&mut self, sink: SignalSink) -> Result<(), DetectorError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or(DetectorError::EmptyCommand)?;

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DetectorError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child
            .stdout
            .take()
            .ok_or(DetectorError::MissingPipe("stdout"))?;
        let stdin = child
            .stdin
            .take()
            .ok_or(DetectorError::MissingPipe("stdin"))?;

        info!(program = %program, pid = ?child.id(), "Detector process started");

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        tokio::spawn(read_events(stdout, sink));
        tokio::spawn(write_commands(stdin, control_rx));

        self.child = Some(child);
        self.control = Some(control_tx);
        if self.force_camera_feed {
            self.send(DetectorCommand::ForceCameraFeed(true));
        }
        Ok(())
    }

    fn set_paused(&mut self, paused: bool) {
        self.send(DetectorCommand::Pause(paused));
    }

    fn set_force_camera_feed(&mut self, enabled: bool) {
        self.force_camera_feed = enabled;
        self.send(DetectorCommand::ForceCameraFeed(enabled));
    }

    fn stop(&mut self) -> Result<(), DetectorError> {
        // Closing the control channel ends the writer task.
        self.control = None;

        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(%status, "Detector process already exited");
                Ok(())
            }
            _ => {
                child.start_kill().map_err(DetectorError::Stop)?;
                info!("Detector process stopped");
                Ok(())
            }
        }
    }
}

async fn read_events(stdout: ChildStdout, sink: SignalSink) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if line.trim().is_empty() {
                    continue;
                }
                if !sink.detector(parse_line(&line)) && sink.is_closed() {
                    break;
                }
            }
            Ok(None) => {
                stream_ended(&sink, "detector process closed its output".to_string());
                break;
            }
            Err(e) => {
                stream_ended(&sink, format!("failed to read detector output: {}", e));
                break;
            }
        }
    }
    debug!("Detector reader exiting");
}

/// A dead detector reports nobody, so the absence countdown can still run.
fn stream_ended(sink: &SignalSink, message: String) {
    sink.detector(DetectorEvent::Error(message));
    sink.detector(DetectorEvent::PresenceLost);
}

async fn write_commands(mut stdin: ChildStdin, mut commands: mpsc::UnboundedReceiver<DetectorCommand>) {
    while let Some(command) = commands.recv().await {
        let mut line = match serde_json::to_string(&command) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode detector command: {}", e);
                continue;
            }
        };
        line.push('\n');

        if let Err(e) = stdin.write_all(line.as_bytes()).await {
            warn!("Failed to write to detector: {}", e);
            break;
        }
        if let Err(e) = stdin.flush().await {
            warn!("Failed to flush detector input: {}", e);
            break;
        }
    }
    debug!("Detector writer exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_presence_events() {
        assert_eq!(
            parse_line(r#"{"event":"presence_confirmed"}"#),
            DetectorEvent::PresenceConfirmed
        );
        assert_eq!(
            parse_line(r#" {"event":"presence_lost"} "#),
            DetectorEvent::PresenceLost
        );
        assert_eq!(
            parse_line(r#"{"event":"presence_uncertain"}"#),
            DetectorEvent::PresenceUncertain
        );
        assert_eq!(
            parse_line(r#"{"event":"error","message":"camera busy"}"#),
            DetectorEvent::Error("camera busy".to_string())
        );
    }

    #[test]
    fn test_garbage_becomes_error_event() {
        match parse_line("person=yes") {
            DetectorEvent::Error(message) => assert!(message.contains("person=yes")),
            other => panic!("expected error event, got {:?}", other),
        }
    }

    #[test]
    fn test_command_encoding() {
        assert_eq!(
            serde_json::to_string(&DetectorCommand::Pause(true)).unwrap(),
            r#"{"command":"pause","value":true}"#
        );
        assert_eq!(
            serde_json::to_string(&DetectorCommand::ForceCameraFeed(false)).unwrap(),
            r#"{"command":"force_camera_feed","value":false}"#
        );
    }

    #[test]
    fn test_empty_command_fails_to_start() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = crate::service::tests::sink_for(tx);
        let mut detector = ProcessDetector::new(Vec::new(), false);
        assert!(matches!(
            detector.start(sink),
            Err(DetectorError::EmptyCommand)
        ));
        assert!(detector.stop().is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_child_process_events_reach_sink() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = crate::service::tests::sink_for(tx);
        let script = r#"echo '{"event":"presence_confirmed"}'; echo '{"event":"presence_lost"}'; read line"#;
        let mut detector = ProcessDetector::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            false,
        );
        detector.start(sink).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(crate::service::Signal::Detector(DetectorEvent::PresenceConfirmed))
        );
        assert_eq!(
            rx.recv().await,
            Some(crate::service::Signal::Detector(DetectorEvent::PresenceLost))
        );
        detector.set_paused(true);
        detector.stop().unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_process_reads_as_absence() {
        let (tx, mut rx) = mpsc::channel(8);
        let sink = crate::service::tests::sink_for(tx);
        let script = r#"echo '{"event":"presence_confirmed"}'"#;
        let mut detector = ProcessDetector::new(
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            false,
        );
        detector.start(sink).unwrap();

        assert_eq!(
            rx.recv().await,
            Some(crate::service::Signal::Detector(DetectorEvent::PresenceConfirmed))
        );
        assert!(matches!(
            rx.recv().await,
            Some(crate::service::Signal::Detector(DetectorEvent::Error(_)))
        ));
        assert_eq!(
            rx.recv().await,
            Some(crate::service::Signal::Detector(DetectorEvent::PresenceLost))
        );
        detector.stop().unwrap();
    }
}
