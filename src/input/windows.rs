//! Idle time for Windows using GetLastInputInfo.

use anyhow::Result;
use std::time::Duration;
use windows::Win32::System::SystemInformation::GetTickCount;
use windows::Win32::UI::Input::KeyboardAndMouse::{GetLastInputInfo, LASTINPUTINFO};

use super::IdleProbe;

pub struct IdleClock;

impl IdleClock {
    pub fn connect() -> Result<Self> {
        let mut clock = IdleClock;
        clock
            .idle_time()
            .ok_or_else(|| anyhow::anyhow!("GetLastInputInfo failed"))?;
        Ok(clock)
    }
}

impl IdleProbe for IdleClock {
    fn idle_time(&mut self) -> Option<Duration> {
        unsafe {
            let mut last_input = LASTINPUTINFO {
                cbSize: std::mem::size_of::<LASTINPUTINFO>() as u32,
                dwTime: 0,
            };

            if GetLastInputInfo(&mut last_input).as_bool() {
                let current_tick = GetTickCount();
                let idle_ms = current_tick.wrapping_sub(last_input.dwTime);
                Some(Duration::from_millis(idle_ms as u64))
            } else {
                None
            }
        }
    }
}
