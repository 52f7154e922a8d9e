//! Windows host integration via Win32.

use anyhow::{Context, Result};
use windows::core::PWSTR;
use windows::Win32::System::Power::{GetSystemPowerStatus, SYSTEM_POWER_STATUS};
use windows::Win32::System::RemoteDesktop::{
    WTSFreeMemory, WTSQuerySessionInformationW, WTSSessionInfoEx, WTSINFOEXW,
    WTS_CURRENT_SERVER_HANDLE, WTS_CURRENT_SESSION,
};
use windows::Win32::System::Shutdown::LockWorkStation;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    keybd_event, KEYBD_EVENT_FLAGS, KEYEVENTF_KEYUP, VK_CONTROL,
};

/// `WTSINFOEX_LEVEL1_W::SessionFlags` values.
const WTS_SESSIONSTATE_LOCK: i32 = 0;
const WTS_SESSIONSTATE_UNLOCK: i32 = 1;

pub fn lock_workstation() -> Result<()> {
    unsafe { LockWorkStation() }.context("LockWorkStation failed")
}

pub fn wake_screen() -> Result<()> {
    // A synthetic Ctrl press turns the monitor back on without typing anything.
    unsafe {
        keybd_event(VK_CONTROL.0 as u8, 0, KEYBD_EVENT_FLAGS(0), 0);
        keybd_event(VK_CONTROL.0 as u8, 0, KEYEVENTF_KEYUP, 0);
    }
    Ok(())
}

pub fn on_battery() -> Option<bool> {
    let mut status = SYSTEM_POWER_STATUS::default();
    unsafe { GetSystemPowerStatus(&mut status) }.ok()?;
    parse_ac_line_status(status.ACLineStatus)
}

pub fn session_locked() -> Option<bool> {
    unsafe {
        let mut buffer = PWSTR::null();
        let mut bytes = 0u32;
        WTSQuerySessionInformationW(
            WTS_CURRENT_SERVER_HANDLE,
            WTS_CURRENT_SESSION,
            WTSSessionInfoEx,
            &mut buffer,
            &mut bytes,
        )
        .ok()?;
        if buffer.is_null() {
            return None;
        }

        let info = &*(buffer.0 as *const WTSINFOEXW);
        let flags = (info.Level == 1).then(|| info.Data.WTSInfoExLevel1.SessionFlags);
        WTSFreeMemory(buffer.0 as *mut _);

        flags.and_then(parse_session_flags)
    }
}

fn parse_ac_line_status(status: u8) -> Option<bool> {
    match status {
        0 => Some(true),
        1 => Some(false),
        _ => None,
    }
}

fn parse_session_flags(flags: i32) -> Option<bool> {
    match flags {
        WTS_SESSIONSTATE_LOCK => Some(true),
        WTS_SESSIONSTATE_UNLOCK => Some(false),
        _ => None,
    }
}
