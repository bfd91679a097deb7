use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use global_placeholders::global;
use macros_rs::crashln;
use std::ffi::CString;
use std::fs;

use srvman::helpers;
use srvman::process::unix;

pub fn exists() -> bool {
    fs::metadata(global!("srvman.daemon.pid")).is_ok()
}

pub fn read() -> Result<i32> {
    let path = global!("srvman.daemon.pid");
    let contents = fs::read_to_string(&path).with_context(|| format!("Failed to read {path}"))?;

    contents
        .trim()
        .parse::<i32>()
        .with_context(|| format!("Invalid pid in {path}"))
}

pub fn write(pid: u32) {
    let path = global!("srvman.daemon.pid");
    if let Err(err) = fs::write(&path, pid.to_string()) {
        crashln!("{} Failed to write {path}: {err}", *helpers::FAIL);
    }
}

pub fn remove() {
    fs::remove_file(global!("srvman.daemon.pid")).ok();
}

pub fn running(pid: i32) -> bool {
    unix::alive(pid)
}

/// Moment the pid file was written, which is the daemon start time.
pub fn uptime() -> Result<DateTime<Utc>> {
    let path = global!("srvman.daemon.pid");
    let metadata = fs::metadata(&path).with_context(|| format!("Failed to stat {path}"))?;
    let modified = metadata.modified().with_context(|| format!("No mtime for {path}"))?;

    Ok(DateTime::from(modified))
}

/// Sets the kernel-visible process title, 15 byte limit on Linux.
pub fn name(title: &str) {
    if let Ok(title) = CString::new(title) {
        unsafe {
            libc::prctl(libc::PR_SET_NAME, title.as_ptr(), 0, 0, 0);
        }
    }
}
