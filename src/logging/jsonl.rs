//! JSONL journal of lock service events.

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{debug, info};

use crate::machine::{DisplayState, LockEvent};

/// One journal line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JournalEntry {
    SessionStart {
        timestamp: DateTime<Utc>,
        version: String,
    },
    SessionEnd {
        timestamp: DateTime<Utc>,
        locks_issued: u64,
    },
    PopupShown {
        timestamp: DateTime<Utc>,
        countdown_seconds: u64,
    },
    PopupCancelled {
        timestamp: DateTime<Utc>,
        shown_for_ms: u64,
    },
    WorkstationLocked {
        timestamp: DateTime<Utc>,
    },
    ScreenWoken {
        timestamp: DateTime<Utc>,
    },
    DisplayStateChanged {
        timestamp: DateTime<Utc>,
        state: DisplayState,
    },
}

/// Append-only journal, one file per local day.
pub struct EventJournal {
    logs_dir: PathBuf,
    current_file: Option<BufWriter<File>>,
    current_date: Option<String>,
    popup_shown_at: Option<DateTime<Utc>>,
    last_state: Option<DisplayState>,
    locks_issued: u64,
}

impl EventJournal {
    /// Create a journal writing into `logs_dir`.
    pub fn new(logs_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&logs_dir)
            .with_context(|| format!("Failed to create logs directory: {:?}", logs_dir))?;

        Ok(Self {
            logs_dir,
            current_file: None,
            current_date: None,
            popup_shown_at: None,
            last_state: None,
            locks_issued: 0,
        })
    }

    /// Get or create the journal file for today.
    fn get_writer(&mut self) -> Result<&mut BufWriter<File>> {
        let today = Local::now().format("%Y-%m-%d").to_string();

        if self.current_date.as_ref() != Some(&today) {
            let log_path = self.logs_dir.join(format!("{}.jsonl", today));

            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_path)
                .with_context(|| format!("Failed to open journal file: {:?}", log_path))?;

            self.current_file = Some(BufWriter::new(file));
            self.current_date = Some(today);

            debug!("Opened journal file: {:?}", log_path);
        }

        self.current_file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("No journal file available"))
    }

    fn write_line(&mut self, entry: &JournalEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;
        let writer = self.get_writer()?;
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }

    /// Record a lock service event. Countdown ticks are not journaled, and
    /// display states only when they change.
    pub fn record(&mut self, event: &LockEvent) -> Result<()> {
        let timestamp = Utc::now();
        let entry = match *event {
            LockEvent::IconStateChanged(state) => {
                if self.last_state == Some(state) {
                    return Ok(());
                }
                self.last_state = Some(state);
                JournalEntry::DisplayStateChanged { timestamp, state }
            }
            LockEvent::ShowLockPopup(countdown_seconds) => {
                self.popup_shown_at = Some(timestamp);
                JournalEntry::PopupShown {
                    timestamp,
                    countdown_seconds,
                }
            }
            LockEvent::UpdatePopupTimer(_) => return Ok(()),
            LockEvent::CancelLockPopup => {
                let shown_for_ms = self
                    .popup_shown_at
                    .take()
                    .map(|start| (timestamp - start).num_milliseconds().max(0) as u64)
                    .unwrap_or(0);
                JournalEntry::PopupCancelled {
                    timestamp,
                    shown_for_ms,
                }
            }
            LockEvent::LockWorkstation => {
                self.locks_issued += 1;
                JournalEntry::WorkstationLocked { timestamp }
            }
            LockEvent::WakeScreen => JournalEntry::ScreenWoken { timestamp },
        };
        self.write_line(&entry)
    }

    /// Log session start event.
    pub fn log_session_start(&mut self, version: &str) -> Result<()> {
        let entry = JournalEntry::SessionStart {
            timestamp: Utc::now(),
            version: version.to_string(),
        };
        info!("Session started");
        self.write_line(&entry)
    }

    /// Log session end event.
    pub fn log_session_end(&mut self) -> Result<()> {
        let entry = JournalEntry::SessionEnd {
            timestamp: Utc::now(),
            locks_issued: self.locks_issued,
        };
        info!("Session ended, {} locks issued", self.locks_issued);
        self.write_line(&entry)
    }

    pub fn locks_issued(&self) -> u64 {
        self.locks_issued
    }
}

impl Drop for EventJournal {
    fn drop(&mut self) {
        if let Some(ref mut writer) = self.current_file {
            let _ = writer.flush();
        }
    }
}
