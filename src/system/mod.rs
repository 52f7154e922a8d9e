//! Host integration: workstation lock, screen wake, power and session state.

#[cfg(target_os = "linux")]
mod linux;
#[cfg(target_os = "macos")]
mod macos;
#[cfg(target_os = "windows")]
mod windows;

#[cfg(target_os = "linux")]
use linux as imp;
#[cfg(target_os = "macos")]
use macos as imp;
#[cfg(target_os = "windows")]
use windows as imp;

#[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
mod imp {
    pub fn lock_workstation() -> anyhow::Result<()> {
        anyhow::bail!("Locking is not supported on this platform")
    }

    pub fn wake_screen() -> anyhow::Result<()> {
        Ok(())
    }

    pub fn on_battery() -> Option<bool> {
        None
    }

    pub fn session_locked() -> Option<bool> {
        None
    }
}

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

use crate::service::{Signal, SignalSink, SignalSource};

/// Lock the interactive session.
pub fn lock_workstation() -> Result<()> {
    imp::lock_workstation()
}

/// Turn the display back on after presence returns to a locked session.
pub fn wake_screen() -> Result<()> {
    imp::wake_screen()
}

/// Whether the machine runs on battery. `None` when unknown.
pub fn on_battery() -> Option<bool> {
    imp::on_battery()
}

/// Whether the session is locked. `None` when the platform cannot tell.
pub fn session_locked() -> Option<bool> {
    imp::session_locked()
}

/// Source of power and session readings.
pub trait SystemProbe: Send {
    fn on_battery(&mut self) -> Option<bool>;

    fn session_locked(&mut self) -> Option<bool>;
}

/// Probe reading the real host.
pub struct HostProbe;

impl SystemProbe for HostProbe {
    fn on_battery(&mut self) -> Option<bool> {
        on_battery()
    }

    fn session_locked(&mut self) -> Option<bool> {
        session_locked()
    }
}

/// Polls power and session state and reports changes.
pub struct SystemMonitor {
    poll_interval: Duration,
    battery_pause: bool,
    running: Arc<AtomicBool>,
    probe: Option<Box<dyn SystemProbe>>,
    handle: Option<JoinHandle<()>>,
}

impl SystemMonitor {
    pub fn new(poll_interval: Duration, battery_pause: bool) -> Self {
        Self::with_probe(poll_interval, battery_pause, Box::new(HostProbe))
    }

    pub fn with_probe(
        poll_interval: Duration,
        battery_pause: bool,
        probe: Box<dyn SystemProbe>,
    ) -> Self {
        Self {
            poll_interval,
            battery_pause,
            running: Arc::new(AtomicBool::new(false)),
            probe: Some(probe),
            handle: None,
        }
    }
}

impl SignalSource for SystemMonitor {
    fn name(&self) -> &'static str {
        "system-monitor"
    }

    fn start(&mut self, sink: SignalSink) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let probe = self
            .probe
            .take()
            .ok_or_else(|| anyhow::anyhow!("System monitor cannot be restarted"))?;

        info!(
            "Starting system monitor, polling every {:?} (battery pause: {})",
            self.poll_interval, self.battery_pause
        );

        let running = self.running.clone();
        let poll_interval = self.poll_interval;
        let battery_pause = self.battery_pause;
        let handle = thread::Builder::new()
            .name("system-monitor".to_string())
            .spawn(move || run_system_monitor(probe, poll_interval, battery_pause, running, sink))?;
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("System monitor thread panicked"))?;
        }
        info!("System monitor stopped");
        Ok(())
    }
}

impl Drop for SystemMonitor {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Sleep in short slices so stop does not wait out a long poll interval.
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let slice = Duration::from_millis(100).min(total);
    let mut slept = Duration::ZERO;
    while slept < total && running.load(Ordering::SeqCst) {
        thread::sleep(slice);
        slept += slice;
    }
}

fn run_system_monitor(
    mut probe: Box<dyn SystemProbe>,
    poll_interval: Duration,
    battery_pause: bool,
    running: Arc<AtomicBool>,
    sink: SignalSink,
) {
    let mut last_battery: Option<bool> = None;
    let mut last_locked: Option<bool> = None;

    while running.load(Ordering::SeqCst) && !sink.is_closed() {
        if battery_pause {
            if let Some(on_battery) = probe.on_battery() {
                if last_battery != Some(on_battery) {
                    debug!("Power source changed, on battery: {}", on_battery);
                    sink.push(Signal::BatteryState(on_battery));
                    last_battery = Some(on_battery);
                }
            }
        }

        if let Some(locked) = probe.session_locked() {
            if last_locked != Some(locked) {
                debug!("Session lock changed, locked: {}", locked);
                sink.push(Signal::SessionLock(locked));
                last_locked = Some(locked);
            }
        }

        sleep_while_running(&running, poll_interval);
    }

    debug!("System monitor thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::tests::sink_for;
    use std::collections::VecDeque;
    use tokio::sync::mpsc;

    struct ScriptedProbe {
        battery: VecDeque<Option<bool>>,
        locked: VecDeque<Option<bool>>,
    }

    impl SystemProbe for ScriptedProbe {
        fn on_battery(&mut self) -> Option<bool> {
            self.battery.pop_front().unwrap_or(Some(true))
        }

        fn session_locked(&mut self) -> Option<bool> {
            self.locked.pop_front().unwrap_or(None)
        }
    }

    fn drain(rx: &mut mpsc::Receiver<Signal>) -> Vec<Signal> {
        let mut received = Vec::new();
        while let Ok(signal) = rx.try_recv() {
            received.push(signal);
        }
        received
    }

    #[test]
    fn test_reports_changes_only() {
        let probe = ScriptedProbe {
            battery: VecDeque::from(vec![Some(false), Some(false), None, Some(true)]),
            locked: VecDeque::from(vec![Some(false), Some(true), Some(true), Some(false)]),
        };
        let (tx, mut rx) = mpsc::channel(16);
        let mut monitor = SystemMonitor::with_probe(Duration::from_millis(10), true, Box::new(probe));

        monitor.start(sink_for(tx)).unwrap();
        thread::sleep(Duration::from_millis(150));
        monitor.stop().unwrap();

        assert_eq!(
            drain(&mut rx),
            vec![
                Signal::BatteryState(false),
                Signal::SessionLock(false),
                Signal::SessionLock(true),
                Signal::BatteryState(true),
                Signal::SessionLock(false),
            ]
        );
    }

    #[test]
    fn test_battery_ignored_when_disabled() {
        let probe = ScriptedProbe {
            battery: VecDeque::from(vec![Some(true)]),
            locked: VecDeque::new(),
        };
        let (tx, mut rx) = mpsc::channel(16);
        let mut monitor =
            SystemMonitor::with_probe(Duration::from_millis(10), false, Box::new(probe));

        monitor.start(sink_for(tx)).unwrap();
        thread::sleep(Duration::from_millis(50));
        monitor.stop().unwrap();

        assert!(drain(&mut rx).is_empty());
    }
}
