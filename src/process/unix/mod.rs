use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::{fs, thread};

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Liveness probe via signal 0.
///
/// kill(pid, 0) returns 0 when the process exists; on failure EPERM still
/// means it exists (owned by another user), anything else (ESRCH) means
/// gone. PID <= 0 is never alive: 0 and negatives address process groups,
/// not single processes. Zombies pass the kill probe but are finished as
/// far as supervision goes, so they count as dead.
pub fn alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }

    let result = unsafe { libc::kill(pid, 0) };

    if result != 0 {
        let err = std::io::Error::last_os_error();
        return err.raw_os_error().unwrap_or(0) == libc::EPERM;
    }

    !zombie(pid)
}

#[cfg(target_os = "linux")]
fn zombie(pid: i32) -> bool {
    let Ok(stat) = fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };

    // state is the first field after the parenthesized comm, which may
    // itself contain spaces
    match stat.rsplit_once(')') {
        Some((_, rest)) => rest.trim_start().starts_with('Z'),
        None => false,
    }
}

#[cfg(not(target_os = "linux"))]
fn zombie(_pid: i32) -> bool {
    false
}

/// Point-in-time resource snapshot for one process.
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Percent of one core
    pub cpu: f32,
    /// Resident set, bytes
    pub memory: u64,
    pub started_at: Option<DateTime<Utc>>,
}

/// Two samples spaced by the sysinfo minimum interval; cpu_usage needs a
/// delta to mean anything. None when the process is gone.
pub fn metrics(pid: i32) -> Option<Metrics> {
    let target = Pid::from_u32(pid as u32);
    let refresh = ProcessRefreshKind::new().with_cpu().with_memory();

    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);
    thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, refresh);

    let process = system.process(target)?;

    Some(Metrics {
        cpu: process.cpu_usage(),
        memory: process.memory(),
        started_at: DateTime::from_timestamp(process.start_time() as i64, 0),
    })
}

/// Process start time without the cpu sampling delay.
pub fn started_at(pid: i32) -> Option<DateTime<Utc>> {
    let target = Pid::from_u32(pid as u32);

    let mut system = System::new();
    system.refresh_processes_specifics(ProcessesToUpdate::Some(&[target]), true, ProcessRefreshKind::new());

    let process = system.process(target)?;
    DateTime::from_timestamp(process.start_time() as i64, 0)
}

/// Detach the child into its own session so it survives supervisor
/// restarts and never shares the daemon's controlling terminal.
pub fn detach(command: &mut Command) {
    unsafe {
        command.pre_exec(|| {
            libc::setsid();
            Ok(())
        });
    }
}

/// TCP ports the process is listening on. Prefers the procfs socket-inode
/// walk; shells out to lsof only when procfs is unavailable or unreadable
/// for this pid.
pub fn listening_ports(pid: i32) -> Vec<u16> {
    match native_ports(pid) {
        Some(ports) => ports,
        None => lsof_ports(pid),
    }
}

fn native_ports(pid: i32) -> Option<Vec<u16>> {
    let entries = fs::read_dir(format!("/proc/{pid}/fd")).ok()?;

    let mut inodes = HashSet::new();
    for entry in entries.flatten() {
        if let Ok(target) = fs::read_link(entry.path()) {
            let target = target.to_string_lossy();
            if let Some(inode) = target.strip_prefix("socket:[").and_then(|rest| rest.strip_suffix(']')) {
                inodes.insert(inode.to_string());
            }
        }
    }

    let mut ports = BTreeSet::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(contents) = fs::read_to_string(table) else {
            continue;
        };

        for line in contents.lines().skip(1) {
            let fields: Vec<&str> = line.split_whitespace().collect();
            // state 0A = LISTEN, inode in field 9
            if fields.len() < 10 || fields[3] != "0A" || !inodes.contains(fields[9]) {
                continue;
            }

            if let Some((_, port_hex)) = fields[1].rsplit_once(':') {
                if let Ok(port) = u16::from_str_radix(port_hex, 16) {
                    ports.insert(port);
                }
            }
        }
    }

    Some(ports.into_iter().collect())
}

fn lsof_ports(pid: i32) -> Vec<u16> {
    let output = match Command::new("lsof").args(["-i", "-P", "-n", "-a", "-p", &pid.to_string()]).output() {
        Ok(output) => output,
        Err(_) => return Vec::new(),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut ports = BTreeSet::new();

    for line in stdout.lines() {
        if !line.ends_with("(LISTEN)") {
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 2 {
            continue;
        }

        // NAME column, "*:8080" or "127.0.0.1:8080"
        if let Some((_, port)) = fields[fields.len() - 2].rsplit_once(':') {
            if let Ok(port) = port.parse::<u16>() {
                ports.insert(port);
            }
        }
    }

    ports.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // Unlikely to exist in any test environment
    const DEAD_PID: i32 = i32::MAX - 1000;

    #[test]
    fn test_alive_for_current_process() {
        assert!(alive(std::process::id() as i32));
    }

    #[test]
    fn test_alive_rejects_group_pids() {
        assert!(!alive(0));
        assert!(!alive(-1));
    }

    #[test]
    fn test_alive_for_missing_process() {
        assert!(!alive(DEAD_PID));
    }

    #[test]
    fn test_metrics_for_current_process() {
        let metrics = metrics(std::process::id() as i32).unwrap();
        assert!(metrics.memory > 0);
        assert!(metrics.cpu >= 0.0);
        assert!(metrics.started_at.is_some());
    }

    #[test]
    fn test_metrics_for_missing_process() {
        assert!(metrics(DEAD_PID).is_none());
    }

    #[test]
    fn test_listening_ports_no_panic() {
        // test binary usually listens on nothing; the call just must not fail
        let ports = listening_ports(std::process::id() as i32);
        assert!(ports.iter().all(|port| *port > 0));
    }
}
