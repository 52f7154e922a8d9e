//! macOS host integration via pmset and caffeinate.

use anyhow::{Context, Result};
use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::dictionary::{CFDictionary, CFDictionaryRef};
use core_foundation::string::CFString;
use std::process::Command;

#[link(name = "CoreGraphics", kind = "framework")]
extern "C" {
    fn CGSessionCopyCurrentDictionary() -> CFDictionaryRef;
}

pub fn lock_workstation() -> Result<()> {
    // Sleeping the display locks the session when a password is required on wake.
    let status = Command::new("pmset")
        .arg("displaysleepnow")
        .status()
        .context("Failed to run pmset")?;
    if !status.success() {
        anyhow::bail!("pmset displaysleepnow exited with {}", status);
    }
    Ok(())
}

pub fn wake_screen() -> Result<()> {
    let status = Command::new("caffeinate")
        .args(["-u", "-t", "1"])
        .status()
        .context("Failed to run caffeinate")?;
    if !status.success() {
        anyhow::bail!("caffeinate exited with {}", status);
    }
    Ok(())
}

pub fn on_battery() -> Option<bool> {
    let output = Command::new("pmset").args(["-g", "batt"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_power_source(&String::from_utf8_lossy(&output.stdout))
}

pub fn session_locked() -> Option<bool> {
    let session = unsafe {
        let raw = CGSessionCopyCurrentDictionary();
        if raw.is_null() {
            return None;
        }
        CFDictionary::<CFString, CFType>::wrap_under_create_rule(raw)
    };
    Some(screen_is_locked(&session))
}

/// The key is only present in the session dictionary while locked.
fn screen_is_locked(session: &CFDictionary<CFString, CFType>) -> bool {
    let key = CFString::from_static_string("CGSSessionScreenIsLocked");
    session
        .find(&key)
        .and_then(|value| value.downcast::<CFBoolean>())
        .map(bool::from)
        .unwrap_or(false)
}

fn parse_power_source(output: &str) -> Option<bool> {
    let first = output.lines().next()?;
    if first.contains("'Battery Power'") {
        Some(true)
    } else if first.contains("'AC Power'") {
        Some(false)
    } else {
        None
    }
}
