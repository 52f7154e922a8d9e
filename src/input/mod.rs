//! User input activity monitoring.
//!
//! A polling thread reads the system-wide idle time and reports
//! [`Signal::InputActivity`] whenever input arrived since the previous poll.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::service::{Signal, SignalSink, SignalSource};

#[cfg(target_os = "linux")]
pub use linux::IdleClock;
#[cfg(target_os = "macos")]
pub use macos::IdleClock;
#[cfg(target_os = "windows")]
pub use windows::IdleClock;

/// Reads time since the last keyboard or mouse input.
pub trait IdleProbe: Send {
    fn idle_time(&mut self) -> Option<Duration>;
}

/// Input monitor feeding the lock service.
pub struct InputMonitor {
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    probe: Option<Box<dyn IdleProbe>>,
    handle: Option<JoinHandle<()>>,
}

impl InputMonitor {
    /// Monitor backed by the platform idle clock.
    #[cfg(any(target_os = "linux", target_os = "macos", target_os = "windows"))]
    pub fn system(poll_interval: Duration) -> Result<Self> {
        let clock = IdleClock::connect()?;
        Ok(Self::with_probe(poll_interval, Box::new(clock)))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    pub fn system(_poll_interval: Duration) -> Result<Self> {
        anyhow::bail!("Input monitoring is not supported on this platform")
    }

    pub fn with_probe(poll_interval: Duration, probe: Box<dyn IdleProbe>) -> Self {
        Self {
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            probe: Some(probe),
            handle: None,
        }
    }
}

impl SignalSource for InputMonitor {
    fn name(&self) -> &'static str {
        "input-monitor"
    }

    fn start(&mut self, sink: SignalSink) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let probe = self
            .probe
            .take()
            .ok_or_else(|| anyhow::anyhow!("Input monitor cannot be restarted"))?;

        info!("Starting input monitor, polling every {:?}", self.poll_interval);

        let running = self.running.clone();
        let poll_interval = self.poll_interval;
        let handle = thread::Builder::new()
            .name("input-monitor".to_string())
            .spawn(move || run_input_monitor(probe, poll_interval, running, sink))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("Input monitor thread panicked"))?;
        }
        info!("Input monitor stopped");
        Ok(())
    }
}

impl Drop for InputMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Poll the idle clock until stopped or the service goes away.
fn run_input_monitor(
    mut probe: Box<dyn IdleProbe>,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    sink: SignalSink,
) {
    let mut failing = false;

    while running.load(Ordering::SeqCst) && !sink.is_closed() {
        thread::sleep(poll_interval);

        match probe.idle_time() {
            Some(idle_time) => {
                failing = false;
                if idle_time < poll_interval {
                    sink.push(Signal::InputActivity);
                }
            }
            None if !failing => {
                warn!("Failed to query system idle time");
                failing = true;
            }
            None => {}
        }
    }

    debug!("Input monitor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::sink_for;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct ScriptedProbe(VecDeque<Option<Duration>>);

    impl IdleProbe for ScriptedProbe {
        fn idle_time(&mut self) -> Option<Duration> {
            self.0
                .pop_front()
                .unwrap_or(Some(Duration::from_secs(3600)))
        }
    }

    #[test]
    fn test_reports_only_recent_input() {
        let script = VecDeque::from(vec![
            Some(Duration::from_secs(30)),
            Some(Duration::from_millis(1)),
            None,
            Some(Duration::from_millis(2)),
        ]);
        let (tx, mut rx) = mpsc::channel(16);
        let mut monitor =
            InputMonitor::with_probe(Duration::from_millis(10), Box::new(ScriptedProbe(script)));

        monitor.start(sink_for(tx)).unwrap();
        thread::sleep(Duration::from_millis(150));
        monitor.stop().unwrap();

        let mut received = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            received.push(signal);
        }
        assert_eq!(received, vec![Signal::InputActivity, Signal::InputActivity]);
    }

    #[test]
    fn test_cannot_restart_after_stop() {
        let (tx, _rx) = mpsc::channel(16);
        let mut monitor = InputMonitor::with_probe(
            Duration::from_millis(10),
            Box::new(ScriptedProbe(VecDeque::new())),
        );
        monitor.start(sink_for(tx.clone())).unwrap();
        monitor.stop().unwrap();
        assert!(monitor.start(sink_for(tx)).is_err());
    }
}
