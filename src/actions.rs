//! Carries lock events out to the host and the journal.

use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, error, info, warn};

use crate::logging::EventJournal;
use crate::machine::LockEvent;

/// Host operations triggered by lock events.
pub trait Workstation: Send + Sync + 'static {
    fn lock(&self) -> anyhow::Result<()>;

    fn wake(&self) -> anyhow::Result<()>;
}

/// The real machine this process runs on.
pub struct SystemWorkstation;

impl Workstation for SystemWorkstation {
    fn lock(&self) -> anyhow::Result<()> {
        crate::system::lock_workstation()
    }

    fn wake(&self) -> anyhow::Result<()> {
        crate::system::wake_screen()
    }
}

/// Listens to the lock service and acts on its events.
pub struct ActionDispatcher {
    workstation: Arc<dyn Workstation>,
    journal: EventJournal,
}

impl ActionDispatcher {
    pub fn new(workstation: Arc<dyn Workstation>, journal: EventJournal) -> Self {
        Self {
            workstation,
            journal,
        }
    }

    /// Handle events until the service closes the channel, then write the
    /// session end.
    pub async fn run(mut self, mut events: broadcast::Receiver<LockEvent>) -> EventJournal {
        loop {
            match events.recv().await {
                Ok(event) => self.handle(event).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Action dispatcher lagged, skipped {} events", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }

        if let Err(e) = self.journal.log_session_end() {
            warn!("Failed to log session end: {}", e);
        }
        self.journal
    }

    async fn handle(&mut self, event: LockEvent) {
        match event {
            LockEvent::IconStateChanged(state) => debug!("Display state: {}", state),
            LockEvent::ShowLockPopup(seconds) => {
                info!("Nobody in front of the screen, locking in {}s", seconds)
            }
            LockEvent::UpdatePopupTimer(seconds) => debug!("Locking in {}s", seconds),
            LockEvent::CancelLockPopup => info!("Lock cancelled"),
            LockEvent::LockWorkstation => {
                info!("Locking workstation");
                let workstation = self.workstation.clone();
                self.run_blocking("lock", move || workstation.lock()).await;
            }
            LockEvent::WakeScreen => {
                info!("Presence while locked, waking screen");
                let workstation = self.workstation.clone();
                self.run_blocking("wake", move || workstation.wake()).await;
            }
        }

        if let Err(e) = self.journal.record(&event) {
            warn!("Failed to record event: {}", e);
        }
    }

    async fn run_blocking<F>(&self, action: &'static str, f: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        match tokio::task::spawn_blocking(f).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(action, "Workstation action failed: {:#}", e),
            Err(e) => error!(action, "Workstation action panicked: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::DisplayState;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWorkstation {
        calls: Mutex<Vec<&'static str>>,
        fail_lock: bool,
    }

    impl Workstation for RecordingWorkstation {
        fn lock(&self) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("lock");
            if self.fail_lock {
                anyhow::bail!("no session");
            }
            Ok(())
        }

        fn wake(&self) -> anyhow::Result<()> {
            self.calls.lock().unwrap().push("wake");
            Ok(())
        }
    }

    async fn dispatch(
        workstation: Arc<RecordingWorkstation>,
        events: Vec<LockEvent>,
    ) -> (EventJournal, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let journal = EventJournal::new(dir.path().to_path_buf()).unwrap();
        let (tx, rx) = broadcast::channel(16);
        let task = tokio::spawn(ActionDispatcher::new(workstation, journal).run(rx));
        for event in events {
            tx.send(event).unwrap();
        }
        drop(tx);
        (task.await.unwrap(), dir)
    }

    #[tokio::test]
    async fn test_lock_and_wake_reach_workstation() {
        let workstation = Arc::new(RecordingWorkstation::default());
        let (journal, _dir) = dispatch(
            workstation.clone(),
            vec![
                LockEvent::IconStateChanged(DisplayState::ActivePersonAbsent),
                LockEvent::ShowLockPopup(5),
                LockEvent::UpdatePopupTimer(4),
                LockEvent::CancelLockPopup,
                LockEvent::LockWorkstation,
                LockEvent::WakeScreen,
            ],
        )
        .await;

        assert_eq!(*workstation.calls.lock().unwrap(), vec!["lock", "wake"]);
        assert_eq!(journal.locks_issued(), 1);
    }

    #[tokio::test]
    async fn test_failed_lock_keeps_dispatching() {
        let workstation = Arc::new(RecordingWorkstation {
            fail_lock: true,
            ..Default::default()
        });
        let (journal, _dir) = dispatch(
            workstation.clone(),
            vec![LockEvent::LockWorkstation, LockEvent::WakeScreen],
        )
        .await;

        assert_eq!(*workstation.calls.lock().unwrap(), vec!["lock", "wake"]);
        assert_eq!(journal.locks_issued(), 1);
    }

    #[tokio::test]
    async fn test_session_end_written_on_close() {
        let workstation = Arc::new(RecordingWorkstation::default());
        let (_journal, dir) = dispatch(workstation, Vec::new()).await;

        let mut content = String::new();
        for file in std::fs::read_dir(dir.path()).unwrap() {
            content.push_str(&std::fs::read_to_string(file.unwrap().path()).unwrap());
        }
        assert!(content.contains("\"event\":\"session_end\""));
    }
}
