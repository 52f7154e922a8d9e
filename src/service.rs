//! Serialized driver for the lock state machine.
//!
//! One tokio task owns the [`LockMachine`], the detector and every signal
//! source. Presence events, input activity, policy setters and timer
//! firings all reach it through a single bounded queue or its own timers,
//! so each mutation runs to completion before the next starts. Outputs are
//! published on a broadcast channel; a slow listener never stalls the core.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, warn};

use crate::detector::{DetectorEvent, PresenceDetector};
use crate::machine::{Effect, LockEvent, LockMachine, TickRate, Timings};

/// Capacity of the inbound signal queue.
pub const SIGNAL_QUEUE_CAPACITY: usize = 256;

/// Capacity of the outbound event channel per listener.
const EVENT_CAPACITY: usize = 64;

/// Inputs accepted by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Detector(DetectorEvent),
    InputActivity,
    ManualPause(bool),
    BatteryState(bool),
    SessionLock(bool),
    CancelFromUser,
    ForceCameraFeed(bool),
    NoInputActiveDelay(u64),
    NoPersonDetectedDelay(u64),
    PopupTimeout(u64),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("lock service has stopped")]
    Stopped,
}

/// Non-blocking hand-off into the service queue, given to collaborators
/// that produce signals on their own threads or callbacks.
#[derive(Debug, Clone)]
pub struct SignalSink {
    tx: mpsc::Sender<Signal>,
    origin: &'static str,
}

impl SignalSink {
    /// Queue a signal without waiting. Returns false if it was dropped.
    pub fn push(&self, signal: Signal) -> bool {
        match self.tx.try_send(signal) {
            Ok(()) => true,
            Err(TrySendError::Full(signal)) => {
                warn!(origin = self.origin, ?signal, "Signal queue full, dropping signal");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn detector(&self, event: DetectorEvent) -> bool {
        self.push(Signal::Detector(event))
    }

    /// Whether the service has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A collaborator that feeds signals into the service and must be released
/// on teardown.
pub trait SignalSource: Send {
    fn name(&self) -> &'static str;

    fn start(&mut self, sink: SignalSink) -> anyhow::Result<()>;

    fn stop(&mut self) -> anyhow::Result<()>;
}

/// Cloneable handle to a running service.
#[derive(Debug, Clone)]
pub struct LockHandle {
    signals: mpsc::Sender<Signal>,
    events: broadcast::Sender<LockEvent>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl LockHandle {
    /// Subscribe to lock events. Each subscriber sees every event in
    /// emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<LockEvent> {
        self.events.subscribe()
    }

    /// A non-blocking sink for a signal-producing collaborator.
    pub fn sink(&self, origin: &'static str) -> SignalSink {
        SignalSink {
            tx: self.signals.clone(),
            origin,
        }
    }

    pub async fn send(&self, signal: Signal) -> Result<(), ServiceError> {
        if self.is_stopped() {
            return Err(ServiceError::Stopped);
        }
        self.signals
            .send(signal)
            .await
            .map_err(|_| ServiceError::Stopped)
    }

    pub async fn set_manual_pause(&self, paused: bool) -> Result<(), ServiceError> {
        self.send(Signal::ManualPause(paused)).await
    }

    pub async fn cancel_lock_from_user_input(&self) -> Result<(), ServiceError> {
        self.send(Signal::CancelFromUser).await
    }

    pub async fn set_force_camera_feed(&self, enabled: bool) -> Result<(), ServiceError> {
        self.send(Signal::ForceCameraFeed(enabled)).await
    }

    pub async fn set_no_input_active_delay(&self, seconds: u64) -> Result<(), ServiceError> {
        self.send(Signal::NoInputActiveDelay(seconds)).await
    }

    pub async fn set_no_person_detected_delay(&self, seconds: u64) -> Result<(), ServiceError> {
        self.send(Signal::NoPersonDetectedDelay(seconds)).await
    }

    pub async fn set_popup_timeout(&self, seconds: u64) -> Result<(), ServiceError> {
        self.send(Signal::PopupTimeout(seconds)).await
    }

    /// Request teardown. Idempotent and callable from any thread.
    pub fn stop(&self) {
        if !self.shutdown.send_replace(true) {
            info!("Lock service stop requested");
        }
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// A running lock service.
pub struct LockService {
    handle: LockHandle,
    task: JoinHandle<()>,
}

impl LockService {
    /// Start the service task. Must be called from within a tokio runtime.
    pub fn spawn(
        timings: Timings,
        detector: Box<dyn PresenceDetector>,
        sources: Vec<Box<dyn SignalSource>>,
    ) -> Self {
        let (signal_tx, signal_rx) = mpsc::channel(SIGNAL_QUEUE_CAPACITY);
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = LockHandle {
            signals: signal_tx,
            events: event_tx.clone(),
            shutdown: Arc::new(shutdown_tx),
        };

        let driver = Driver {
            machine: LockMachine::new(timings, Instant::now()),
            detector,
            sources,
            signals: signal_rx,
            events: event_tx,
            shutdown: shutdown_rx,
        };

        info!(?timings, "Starting lock service");
        let task = tokio::spawn(driver.run(handle.sink("detector"), handle.clone()));

        Self { handle, task }
    }

    pub fn handle(&self) -> LockHandle {
        self.handle.clone()
    }

    /// Stop the service and wait for teardown to finish.
    pub async fn shutdown(self) {
        self.handle.stop();
        if let Err(e) = self.task.await {
            warn!("Lock service task failed: {}", e);
        }
    }
}

/// The service's two timers.
struct Timers {
    rate: TickRate,
    ticker: Interval,
    auto_resume: Pin<Box<Sleep>>,
    auto_resume_armed: bool,
}

impl Timers {
    fn new(rate: TickRate) -> Self {
        let mut ticker = time::interval(rate.period());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            rate,
            ticker,
            auto_resume: Box::pin(time::sleep(Duration::ZERO)),
            auto_resume_armed: false,
        }
    }

    /// Switch the tick rate; the next tick is one new period from now.
    fn set_rate(&mut self, rate: TickRate) {
        if rate == self.rate {
            return;
        }
        let period = rate.period();
        self.rate = rate;
        self.ticker = time::interval_at(Instant::now() + period, period);
        self.ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    }

    fn restart_auto_resume(&mut self, delay: Duration) {
        self.auto_resume.as_mut().reset(Instant::now() + delay);
        self.auto_resume_armed = true;
    }
}

struct Driver {
    machine: LockMachine,
    detector: Box<dyn PresenceDetector>,
    sources: Vec<Box<dyn SignalSource>>,
    signals: mpsc::Receiver<Signal>,
    events: broadcast::Sender<LockEvent>,
    shutdown: watch::Receiver<bool>,
}

impl Driver {
    async fn run(mut self, detector_sink: SignalSink, handle: LockHandle) {
        if let Err(e) = self.detector.start(detector_sink) {
            warn!("Detector failed to start, continuing without presence events: {}", e);
        }
        for source in &mut self.sources {
            let name = source.name();
            if let Err(e) = source.start(handle.sink(name)) {
                warn!(source = name, "Signal source failed to start: {:#}", e);
            }
        }
        // Holding a handle here would keep the shutdown channel open forever.
        drop(handle);

        let mut timers = Timers::new(self.machine.tick_rate());
        let initial = self.machine.refresh(Instant::now());
        self.execute(initial, &mut timers);

        loop {
            let effects = tokio::select! {
                biased;
                _ = self.shutdown.changed() => break,
                Some(signal) = self.signals.recv() => self.apply(signal, Instant::now()),
                _ = timers.ticker.tick() => self.machine.tick(Instant::now()),
                () = timers.auto_resume.as_mut(), if timers.auto_resume_armed => {
                    timers.auto_resume_armed = false;
                    self.machine.auto_resume_elapsed(Instant::now())
                }
            };

            if *self.shutdown.borrow() {
                break;
            }
            self.execute(effects, &mut timers);
        }

        self.teardown().await;
    }

    fn apply(&mut self, signal: Signal, now: Instant) -> Vec<Effect> {
        let machine = &mut self.machine;
        match signal {
            Signal::Detector(DetectorEvent::PresenceConfirmed) => machine.presence_confirmed(now),
            Signal::Detector(DetectorEvent::PresenceLost) => machine.presence_lost(now),
            Signal::Detector(DetectorEvent::PresenceUncertain) => machine.presence_uncertain(now),
            Signal::Detector(DetectorEvent::Error(message)) => {
                // Keep operating on the last known presence value.
                warn!("Detector error: {}", message);
                Vec::new()
            }
            Signal::InputActivity => machine.input_activity(now),
            Signal::ManualPause(paused) => machine.set_manual_pause(paused, now),
            Signal::BatteryState(on_battery) => machine.set_battery_state(on_battery, now),
            Signal::SessionLock(locked) => machine.set_session_lock_state(locked, now),
            Signal::CancelFromUser => machine.cancel_from_user(now),
            Signal::ForceCameraFeed(enabled) => machine.set_force_camera_feed(enabled),
            Signal::NoInputActiveDelay(seconds) => {
                machine.set_no_input_active_delay(seconds);
                Vec::new()
            }
            Signal::NoPersonDetectedDelay(seconds) => {
                machine.set_no_person_detected_delay(seconds);
                Vec::new()
            }
            Signal::PopupTimeout(seconds) => {
                machine.set_popup_timeout(seconds);
                Vec::new()
            }
        }
    }

    fn execute(&mut self, effects: Vec<Effect>, timers: &mut Timers) {
        for effect in effects {
            match effect {
                Effect::Emit(event) => {
                    // No subscribers is not an error.
                    let _ = self.events.send(event);
                }
                Effect::PauseDetector(paused) => {
                    debug!(paused, "Updating detector pause");
                    self.detector.set_paused(paused);
                }
                Effect::ForceCameraFeed(enabled) => self.detector.set_force_camera_feed(enabled),
                Effect::RestartAutoResume(delay) => timers.restart_auto_resume(delay),
                Effect::CancelAutoResume => timers.auto_resume_armed = false,
                Effect::SetTickRate(rate) => timers.set_rate(rate),
            }
        }
    }

    /// Release every collaborator, continuing past individual failures.
    /// Sources join their polling threads, so they stop on the blocking pool.
    async fn teardown(&mut self) {
        info!("Tearing down lock service");
        if let Err(e) = self.detector.stop() {
            warn!("Failed to stop detector: {}", e);
        }

        let mut sources = std::mem::take(&mut self.sources);
        let stopped = tokio::task::spawn_blocking(move || {
            for source in &mut sources {
                if let Err(e) = source.stop() {
                    warn!(source = source.name(), "Failed to stop signal source: {:#}", e);
                }
            }
        })
        .await;
        if let Err(e) = stopped {
            warn!("Signal source teardown panicked: {}", e);
        }
        info!("Lock service stopped");
    }
}
