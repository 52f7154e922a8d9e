//! Linux host integration via logind, sysfs and X11.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, ScreenSaver};
use x11rb::rust_connection::RustConnection;

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

pub fn lock_workstation() -> Result<()> {
    match run("loginctl", &["lock-session"]) {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!("loginctl lock-session failed, trying xdg-screensaver: {:#}", e);
            run("xdg-screensaver", &["lock"])
        }
    }
}

pub fn wake_screen() -> Result<()> {
    let (conn, _) = RustConnection::connect(None)
        .context("Failed to connect to X11 display. Is DISPLAY set?")?;
    conn.force_screen_saver(ScreenSaver::RESET)
        .context("Failed to reset screen saver")?;
    conn.flush().context("Failed to flush X11 connection")?;
    Ok(())
}

pub fn on_battery() -> Option<bool> {
    mains_online(Path::new(POWER_SUPPLY_ROOT)).map(|online| !online)
}

pub fn session_locked() -> Option<bool> {
    let session = std::env::var("XDG_SESSION_ID").ok()?;
    let output = Command::new("loginctl")
        .args(["show-session", &session, "-p", "LockedHint", "--value"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    parse_locked_hint(&String::from_utf8_lossy(&output.stdout))
}

fn run(program: &str, args: &[&str]) -> Result<()> {
    let status = Command::new(program)
        .args(args)
        .status()
        .with_context(|| format!("Failed to run {}", program))?;
    if !status.success() {
        anyhow::bail!("{} exited with {}", program, status);
    }
    debug!("{} {:?} succeeded", program, args);
    Ok(())
}

/// Whether any mains supply under `root` is online. `None` if the machine
/// reports no mains supply at all.
fn mains_online(root: &Path) -> Option<bool> {
    let entries = std::fs::read_dir(root).ok()?;
    let mut found = None;

    for entry in entries.flatten() {
        let dir = entry.path();
        let kind = std::fs::read_to_string(dir.join("type")).unwrap_or_default();
        if kind.trim() != "Mains" {
            continue;
        }
        let online = std::fs::read_to_string(dir.join("online"))
            .map(|v| v.trim() == "1")
            .unwrap_or(false);
        if online {
            return Some(true);
        }
        found = Some(false);
    }

    found
}

fn parse_locked_hint(output: &str) -> Option<bool> {
    match output.trim() {
        "yes" => Some(true),
        "no" => Some(false),
        _ => None,
    }
}
