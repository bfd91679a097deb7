pub mod logsink;
pub mod paths;
pub mod pid;
pub mod unix;

use crate::{config, helpers};
use crate::store::projects::{self, ProjectStatus};
use crate::store::scripts::{self, RunStatus, Script, ScriptKind};

use std::{
    fs, io,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{Arc, Mutex},
    thread,
    time::Duration,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use dashmap::DashMap;
use once_cell::sync::Lazy;

use nix::{
    sys::signal::{kill, Signal},
    unistd::Pid,
};

use chrono::{DateTime, Utc};
use global_placeholders::global;
use log::{info, warn};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;

// Stop sequence: SIGTERM, then poll liveness before escalating to SIGKILL
pub const STOP_POLL_INTERVAL_MS: u64 = 300;
pub const STOP_POLL_ATTEMPTS: u32 = 10;

// Serializes check-and-spawn, stop and status per id so two concurrent
// starts can never observe "not running" at the same time
static ID_LOCKS: Lazy<DashMap<String, Arc<Mutex<()>>>> = Lazy::new(DashMap::new);

fn id_lock(id: &str) -> Arc<Mutex<()>> { ID_LOCKS.entry(id.to_string()).or_default().clone() }

#[derive(Debug, Error)]
pub enum Error {
    #[error("'{id}' not found ({path})")]
    NotFound { id: String, path: String },
    #[error("'{id}' is already running (pid {pid})")]
    AlreadyRunning { id: String, pid: i32 },
    #[error("'{id}' is not running")]
    NotRunning { id: String },
    #[error("'{id}' has unsupported type '{kind}'")]
    UnsupportedType { id: String, kind: String },
    #[error("permission denied for '{id}': {detail}")]
    PermissionDenied { id: String, detail: String },
    #[error("io failure for '{id}': {detail}")]
    IOFailure { id: String, detail: String },
}

fn store_error(id: &str, err: anyhow::Error) -> Error {
    Error::IOFailure { id: id.into(), detail: err.to_string() }
}

/// Result of a successful detached launch.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Started {
    pub pid: i32,
    pub log: String,
}

/// Live view of one supervised id, composed from the pid file and OS probes.
/// Probe failures degrade the optional fields to `None` instead of erroring.
#[derive(Clone, Debug, Default, Serialize, ToSchema)]
pub struct Status {
    pub id: String,
    pub running: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_human: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<f32>,
    pub ports: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
}

/// Captured output of a synchronously executed command.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of a pid directory sweep at daemon boot.
#[derive(Clone, Copy, Debug, Default)]
pub struct Sweep {
    pub swept: usize,
    pub purged: usize,
}

struct Dirs {
    pids: PathBuf,
    logs: PathBuf,
}

impl Dirs {
    fn global() -> Self { Dirs { pids: global!("srvman.pids").into(), logs: global!("srvman.logs").into() } }
}

fn log_path_in(logs: &Path, id: &str) -> PathBuf { logs.join(format!("{id}.log")) }

/// Path of the append-only log file backing `id`.
pub fn log_path(id: &str) -> PathBuf { log_path_in(&Dirs::global().logs, id) }

/// Last `lines` lines of the log for `id`. Missing or unreadable log reads as empty.
pub fn read_log(id: &str, lines: usize) -> Vec<String> { logsink::read_tail(&log_path(id), lines).unwrap_or_default() }

/// Truncates the log for `id` in place so running writers keep their handle.
pub fn flush_log(id: &str) -> io::Result<()> { logsink::flush(&log_path(id)) }

/// Starts the script `id` detached, guarded by the per-id lock.
pub fn start(id: &str) -> Result<Started, Error> {
    let lock = id_lock(id);
    let _guard = lock.lock().unwrap();

    let script = scripts::get(id)
        .map_err(|err| store_error(id, err))?
        .ok_or_else(|| Error::NotFound { id: id.into(), path: "no such script".into() })?;

    start_script(&Dirs::global(), &script)
}

// Caller holds the id lock.
fn start_script(dirs: &Dirs, script: &Script) -> Result<Started, Error> {
    let id = &script.id;
    if let Some(pid) = live_pid_in(&dirs.pids, id) {
        return Err(Error::AlreadyRunning { id: id.clone(), pid });
    }

    let path = paths::locate(&script.path)
        .ok_or_else(|| Error::NotFound { id: id.clone(), path: script.path.clone() })?;
    let argv = command_for(script, &path)?;

    let started = spawn_detached(dirs, id, &argv, None, &path.display().to_string(), {
        let id = id.clone();
        move |code| {
            let status = if code == Some(0) { RunStatus::Success } else { RunStatus::Error };
            if let Err(err) = scripts::record_run_finished(&id, status) {
                warn!("failed to record run result for '{id}': {err}");
            }
        }
    })?;

    if let Err(err) = scripts::record_run_started(id, Utc::now()) {
        warn!("failed to record run start for '{id}': {err}");
    }

    info!("started script '{id}' (pid {})", started.pid);
    Ok(started)
}

/// Stops the script `id` with the SIGTERM, poll, SIGKILL sequence.
pub fn stop(id: &str) -> Result<(), Error> {
    let lock = id_lock(id);
    let _guard = lock.lock().unwrap();
    stop_in(&Dirs::global().pids, id)?;
    info!("stopped script '{id}'");
    Ok(())
}

/// True when `id` has a pid file pointing at a live process.
/// Stale pid files found along the way are purged.
pub fn alive(id: &str) -> bool { live_pid_in(&Dirs::global().pids, id).is_some() }

/// Composed status for the script `id`, store fields included.
pub fn status(id: &str) -> Result<Status, Error> {
    let lock = id_lock(id);
    let _guard = lock.lock().unwrap();

    let script = scripts::get(id)
        .map_err(|err| store_error(id, err))?
        .ok_or_else(|| Error::NotFound { id: id.into(), path: "no such script".into() })?;

    let mut status = probe_in(&Dirs::global().pids, id);
    status.last_run_time = script.last_run_time;
    status.last_run_status = script.last_run_status;
    Ok(status)
}

/// OS-level probe of one pid file id without touching the stores.
pub fn probe(id: &str) -> Status { probe_in(&Dirs::global().pids, id) }

/// Sweeps every pid file once, purging entries whose process is gone.
/// Survivors from a previous daemon run keep their pid files and stay adopted.
pub fn reconcile() -> Sweep { reconcile_in(&Dirs::global().pids) }

/// Starts every script flagged autostart, continuing past individual failures.
/// Returns the number actually started.
pub fn autostart_scripts() -> usize {
    let list = match scripts::autostart_list() {
        Ok(list) => list,
        Err(err) => {
            warn!("autostart skipped, script store unreadable: {err}");
            return 0;
        }
    };

    let mut started = 0;
    for script in list {
        match start(&script.id) {
            Ok(res) => {
                started += 1;
                info!("autostarted script '{}' (pid {})", script.id, res.pid);
            }
            Err(Error::AlreadyRunning { .. }) => {}
            Err(err) => warn!("autostart of script '{}' failed: {err}", script.id),
        }
    }
    started
}

/// Starts every project flagged autostart in ascending `start_order`.
pub fn autostart_projects() -> usize {
    let list = match projects::autostart_list() {
        Ok(list) => list,
        Err(err) => {
            warn!("autostart skipped, project store unreadable: {err}");
            return 0;
        }
    };

    let mut started = 0;
    for project in list {
        match start_project(&project.id) {
            Ok(res) => {
                started += 1;
                info!("autostarted project '{}' (pid {})", project.id, res.pid);
            }
            Err(Error::AlreadyRunning { .. }) => {}
            Err(err) => warn!("autostart of project '{}' failed: {err}", project.id),
        }
    }
    started
}

// Projects share the supervisor through a reserved pid file namespace.
fn project_pid_id(id: &str) -> String { format!("project-{id}") }

/// Launches a project's start command detached, cwd set to the project path.
pub fn start_project(id: &str) -> Result<Started, Error> {
    let pid_id = project_pid_id(id);
    let lock = id_lock(&pid_id);
    let _guard = lock.lock().unwrap();

    let project = projects::get(id)
        .map_err(|err| store_error(id, err))?
        .ok_or_else(|| Error::NotFound { id: id.into(), path: "no such project".into() })?;

    let dirs = Dirs::global();
    if let Some(pid) = live_pid_in(&dirs.pids, &pid_id) {
        return Err(Error::AlreadyRunning { id: id.into(), pid });
    }

    let cwd = PathBuf::from(&project.path);
    if !cwd.is_dir() {
        return Err(Error::NotFound { id: id.into(), path: project.path.clone() });
    }

    let argv = shell_argv(&project.scripts.start);
    let started = spawn_detached(&dirs, &pid_id, &argv, Some(&cwd), &project.path, {
        let id = id.to_string();
        move |_| {
            if let Err(err) = projects::patch_status(&id, ProjectStatus::Stopped) {
                warn!("failed to record stop of project '{id}': {err}");
            }
        }
    })?;

    if let Err(err) = projects::patch_status(id, ProjectStatus::Running) {
        warn!("failed to record start of project '{id}': {err}");
    }

    info!("started project '{id}' (pid {})", started.pid);
    Ok(started)
}

/// Stops a project: runs its stop command first when one is defined, then
/// falls back to the signal sequence on whatever is still alive.
pub fn stop_project(id: &str) -> Result<(), Error> {
    let pid_id = project_pid_id(id);
    let lock = id_lock(&pid_id);
    let _guard = lock.lock().unwrap();

    let project = projects::get(id)
        .map_err(|err| store_error(id, err))?
        .ok_or_else(|| Error::NotFound { id: id.into(), path: "no such project".into() })?;

    let dirs = Dirs::global();
    if live_pid_in(&dirs.pids, &pid_id).is_none() {
        return Err(Error::NotRunning { id: id.into() });
    }

    if let Some(stop_cmd) = &project.scripts.stop {
        if let Err(err) = run_sync(&shell_argv(stop_cmd), Some(Path::new(&project.path))) {
            warn!("stop command of project '{id}' failed to run: {err}");
        }
        for _ in 0..STOP_POLL_ATTEMPTS {
            if live_pid_in(&dirs.pids, &pid_id).is_none() {
                break;
            }
            thread::sleep(Duration::from_millis(STOP_POLL_INTERVAL_MS));
        }
    }

    match stop_in(&dirs.pids, &pid_id) {
        // the stop command may have already brought the process down
        Ok(()) | Err(Error::NotRunning { .. }) => {}
        Err(err) => return Err(err),
    }

    if let Err(err) = projects::patch_status(id, ProjectStatus::Stopped) {
        warn!("failed to record stop of project '{id}': {err}");
    }

    info!("stopped project '{id}'");
    Ok(())
}

/// Runs a project's build command to completion and returns its output.
pub fn build_project(id: &str) -> Result<CommandOutput, Error> {
    let project = projects::get(id)
        .map_err(|err| store_error(id, err))?
        .ok_or_else(|| Error::NotFound { id: id.into(), path: "no such project".into() })?;

    let build = project
        .scripts
        .build
        .as_ref()
        .ok_or_else(|| Error::NotFound { id: id.into(), path: "no build command defined".into() })?;

    run_sync(&shell_argv(build), Some(Path::new(&project.path)))
        .map_err(|err| Error::IOFailure { id: id.into(), detail: err.to_string() })
}

/// Live probe of a project's process, reported under the project id.
pub fn project_probe(id: &str) -> Status {
    let mut status = probe_in(&Dirs::global().pids, &project_pid_id(id));
    status.id = id.into();
    status
}

/// Wraps a command line in the configured shell, `bash -c <cmd>` by default.
pub fn shell_argv(command: &str) -> Vec<String> {
    let config = config::read();
    let mut argv = vec![config.runner.shell];
    argv.extend(config.runner.args);
    argv.push(command.to_string());
    argv
}

/// Runs `argv` to completion, capturing stdout and stderr.
pub fn run_sync(argv: &[String], cwd: Option<&Path>) -> io::Result<CommandOutput> {
    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]).stdin(Stdio::null());
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }

    let output = command.output()?;
    Ok(CommandOutput {
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

fn live_pid_in(pids: &Path, id: &str) -> Option<i32> {
    let pid = pid::read_from(pids, id)?;
    if unix::alive(pid) {
        Some(pid)
    } else {
        // leftover from a crash or reboot, heal it now
        pid::remove_from(pids, id);
        None
    }
}

fn command_for(script: &Script, path: &Path) -> Result<Vec<String>, Error> {
    let config = config::read();
    let path_str = path.display().to_string();

    match script.kind {
        ScriptKind::Shell => {
            ensure_executable(&script.id, path)?;
            Ok(vec![path_str])
        }
        ScriptKind::Python => Ok(vec![config.interpreters.python, path_str]),
        ScriptKind::Node => Ok(vec![config.interpreters.node, path_str]),
        ScriptKind::Unknown => Err(Error::UnsupportedType { id: script.id.clone(), kind: "unknown".into() }),
    }
}

// Shell scripts are invoked directly, so the exec bit has to be on.
fn ensure_executable(id: &str, path: &Path) -> Result<(), Error> {
    let metadata = fs::metadata(path)
        .map_err(|err| Error::IOFailure { id: id.into(), detail: format!("{}: {err}", path.display()) })?;

    let mut perms = metadata.permissions();
    if perms.mode() & 0o111 == 0 {
        perms.set_mode(perms.mode() | 0o755);
        fs::set_permissions(path, perms).map_err(|err| match err.kind() {
            io::ErrorKind::PermissionDenied => {
                Error::PermissionDenied { id: id.into(), detail: format!("cannot mark {} executable", path.display()) }
            }
            _ => Error::IOFailure { id: id.into(), detail: format!("{}: {err}", path.display()) },
        })?;
    }
    Ok(())
}

// Detached spawn: start banner first, stdout/stderr into the log, setsid,
// pid persisted, then a reaper thread that writes the exit banner and clears
// the pid file unless a newer run already replaced it.
fn spawn_detached(
    dirs: &Dirs, pid_id: &str, argv: &[String], cwd: Option<&Path>, display_path: &str,
    on_exit: impl FnOnce(Option<i32>) + Send + 'static,
) -> Result<Started, Error> {
    let log_path = log_path_in(&dirs.logs, pid_id);
    let mut log = logsink::open(&log_path)
        .map_err(|err| Error::IOFailure { id: pid_id.into(), detail: format!("log open: {err}") })?;
    logsink::write_start(&mut log, display_path, &argv.join(" "))
        .map_err(|err| Error::IOFailure { id: pid_id.into(), detail: format!("log write: {err}") })?;
    let stdout = log
        .try_clone()
        .map_err(|err| Error::IOFailure { id: pid_id.into(), detail: format!("log clone: {err}") })?;

    let mut command = Command::new(&argv[0]);
    command.args(&argv[1..]).stdin(Stdio::null()).stdout(Stdio::from(stdout)).stderr(Stdio::from(log));
    if let Some(cwd) = cwd {
        command.current_dir(cwd);
    }
    unix::detach(&mut command);

    let mut child = command.spawn().map_err(|err| match err.kind() {
        io::ErrorKind::NotFound => Error::NotFound { id: pid_id.into(), path: argv[0].clone() },
        io::ErrorKind::PermissionDenied => Error::PermissionDenied { id: pid_id.into(), detail: err.to_string() },
        _ => Error::IOFailure { id: pid_id.into(), detail: err.to_string() },
    })?;

    let pid = child.id() as i32;
    if let Err(err) = pid::write_to(&dirs.pids, pid_id, pid) {
        // an untracked child would leak, take it back down
        child.kill().ok();
        child.wait().ok();
        return Err(Error::IOFailure { id: pid_id.into(), detail: format!("pid file: {err}") });
    }

    let pids_dir = dirs.pids.clone();
    let reaper_id = pid_id.to_string();
    let exit_log = log_path.clone();
    thread::spawn(move || {
        let code = child.wait().ok().and_then(|status| status.code());
        logsink::write_exit(&exit_log, code).ok();
        if pid::read_from(&pids_dir, &reaper_id) == Some(pid) {
            pid::remove_from(&pids_dir, &reaper_id);
        }
        on_exit(code);
    });

    Ok(Started { pid, log: log_path.display().to_string() })
}

fn stop_in(pids: &Path, id: &str) -> Result<(), Error> {
    let pid = live_pid_in(pids, id).ok_or_else(|| Error::NotRunning { id: id.into() })?;

    terminate(id, pid, Signal::SIGTERM)?;
    for _ in 0..STOP_POLL_ATTEMPTS {
        if !unix::alive(pid) {
            break;
        }
        thread::sleep(Duration::from_millis(STOP_POLL_INTERVAL_MS));
    }
    if unix::alive(pid) {
        terminate(id, pid, Signal::SIGKILL)?;
    }

    pid::remove_from(pids, id);
    Ok(())
}

fn terminate(id: &str, pid: i32, signal: Signal) -> Result<(), Error> {
    match kill(Pid::from_raw(pid), signal) {
        Ok(()) => Ok(()),
        // already gone is exactly what we wanted
        Err(nix::errno::Errno::ESRCH) => Ok(()),
        Err(nix::errno::Errno::EPERM) => {
            Err(Error::PermissionDenied { id: id.into(), detail: format!("{signal} to pid {pid} refused") })
        }
        Err(err) => Err(Error::IOFailure { id: id.into(), detail: err.to_string() }),
    }
}

fn probe_in(pids: &Path, id: &str) -> Status {
    let mut status = Status { id: id.into(), ..Status::default() };
    let Some(pid) = live_pid_in(pids, id) else { return status };

    status.running = true;
    status.pid = Some(pid);

    if let Some(metrics) = unix::metrics(pid) {
        status.memory_mb = Some((metrics.memory as f64 / 1024.0 / 1024.0 * 10.0).round() / 10.0);
        status.cpu = Some((metrics.cpu * 10.0).round() / 10.0);
        if let Some(started) = metrics.started_at {
            status.started_at = Some(started);
            status.uptime = Some(Utc::now().signed_duration_since(started).num_seconds().max(0));
            status.uptime_human = Some(helpers::format_duration(started));
        }
    }
    status.ports = unix::listening_ports(pid);
    status
}

fn reconcile_in(pids: &Path) -> Sweep {
    let ids = pid::list_in(pids);
    let mut sweep = Sweep { swept: ids.len(), purged: 0 };
    for id in ids {
        if live_pid_in(pids, &id).is_none() {
            sweep.purged += 1;
        }
    }
    sweep
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::scripts::ScriptUpdate;
    use std::{env, fs};

    const DEAD_PID: i32 = i32::MAX - 1000;

    struct Scratch(PathBuf);

    impl Scratch {
        fn new() -> Self {
            let dir = env::temp_dir().join(format!("srvman-proc-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            Scratch(dir)
        }

        fn dirs(&self) -> Dirs {
            Dirs { pids: self.0.join("pids"), logs: self.0.join("logs") }
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.0).ok();
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["/bin/sh".into(), "-c".into(), script.into()]
    }

    fn wait_until(mut done: impl FnMut() -> bool) -> bool {
        for _ in 0..50 {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(100));
        }
        false
    }

    #[test]
    fn test_never_started_is_not_running() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();
        assert_eq!(live_pid_in(&dirs.pids, "ghost"), None);

        let status = probe_in(&dirs.pids, "ghost");
        assert!(!status.running);
        assert_eq!(status.pid, None);
        assert!(status.ports.is_empty());
    }

    #[test]
    fn test_stale_pid_file_is_purged_on_read() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();
        pid::write_to(&dirs.pids, "stale", DEAD_PID).unwrap();

        assert_eq!(live_pid_in(&dirs.pids, "stale"), None);
        assert!(!pid::path_in(&dirs.pids, "stale").exists());
    }

    #[test]
    fn test_spawn_then_stop_lifecycle() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();

        let started = spawn_detached(&dirs, "job", &sh("sleep 5"), None, "sleep 5", |_| {}).unwrap();
        assert!(started.pid > 0);
        assert_eq!(live_pid_in(&dirs.pids, "job"), Some(started.pid));
        assert!(pid::path_in(&dirs.pids, "job").exists());

        let status = probe_in(&dirs.pids, "job");
        assert!(status.running);
        assert_eq!(status.pid, Some(started.pid));

        stop_in(&dirs.pids, "job").unwrap();
        assert_eq!(live_pid_in(&dirs.pids, "job"), None);
        assert!(!pid::path_in(&dirs.pids, "job").exists());
        assert!(!unix::alive(started.pid));
    }

    #[test]
    fn test_stop_when_not_running_errors() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();
        assert!(matches!(stop_in(&dirs.pids, "void"), Err(Error::NotRunning { .. })));
    }

    #[test]
    fn test_spawn_missing_binary_leaves_no_pid_file() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();

        let argv: Vec<String> = vec!["/definitely/not/a/binary".into()];
        let result = spawn_detached(&dirs, "gone", &argv, None, "missing", |_| {});
        assert!(matches!(result, Err(Error::NotFound { .. })));
        assert!(!pid::path_in(&dirs.pids, "gone").exists());
    }

    #[test]
    fn test_exit_banner_and_pid_cleanup_after_exit() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();

        spawn_detached(&dirs, "brief", &sh("exit 3"), None, "exit 3", |_| {}).unwrap();
        assert!(wait_until(|| !pid::path_in(&dirs.pids, "brief").exists()));

        let tail = logsink::read_tail(&log_path_in(&dirs.logs, "brief"), 10).unwrap();
        assert!(tail.iter().any(|line| line.contains("code=3")));
    }

    #[test]
    fn test_exit_callback_receives_code() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();
        let (tx, rx) = std::sync::mpsc::channel();

        spawn_detached(&dirs, "cb", &sh("exit 0"), None, "exit 0", move |code| {
            tx.send(code).unwrap();
        })
        .unwrap();

        let code = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(code, Some(0));
    }

    #[test]
    fn test_killed_out_of_band_is_observed_gone() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();

        let started = spawn_detached(&dirs, "doomed", &sh("sleep 30"), None, "sleep 30", |_| {}).unwrap();
        kill(Pid::from_raw(started.pid), Signal::SIGKILL).unwrap();

        assert!(wait_until(|| live_pid_in(&dirs.pids, "doomed").is_none()));
        assert!(!pid::path_in(&dirs.pids, "doomed").exists());
    }

    #[test]
    fn test_reconcile_counts_and_purges() {
        let scratch = Scratch::new();
        let dirs = scratch.dirs();

        let started = spawn_detached(&dirs, "keeper", &sh("sleep 5"), None, "sleep 5", |_| {}).unwrap();
        pid::write_to(&dirs.pids, "corpse", DEAD_PID).unwrap();

        let sweep = reconcile_in(&dirs.pids);
        assert_eq!(sweep.swept, 2);
        assert_eq!(sweep.purged, 1);
        assert!(pid::path_in(&dirs.pids, "keeper").exists());
        assert!(!pid::path_in(&dirs.pids, "corpse").exists());

        stop_in(&dirs.pids, "keeper").unwrap();
        assert!(!unix::alive(started.pid));
    }

    // End-to-end tests below exercise the public API, so they route every
    // path through the placeholder table pointed at a scratch home.

    fn init_test_home() {
        crate::testenv::init();
    }

    fn write_script(name: &str, body: &str) -> String {
        let path = crate::testenv::base().join(name);
        fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    fn register(id: &str, kind: ScriptKind, path: String) {
        scripts::create(Script {
            id: id.into(),
            name: id.into(),
            description: None,
            kind,
            path,
            original_path: None,
            autostart: false,
            last_run_time: None,
            last_run_status: None,
        })
        .unwrap();
    }

    #[test]
    fn test_start_unknown_id_is_not_found() {
        init_test_home();
        assert!(matches!(start("no-such-script"), Err(Error::NotFound { .. })));
        assert!(matches!(status("no-such-script"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_unsupported_kind_is_rejected() {
        init_test_home();
        let path = write_script("odd.cfg", "not runnable\n");
        register("odd", ScriptKind::Unknown, path);

        assert!(matches!(start("odd"), Err(Error::UnsupportedType { .. })));
    }

    #[test]
    fn test_script_round_trip_with_status_and_log() {
        init_test_home();
        let path = write_script("loop.sh", "#!/bin/sh\necho booting\nsleep 5\n");
        register("loop", ScriptKind::Shell, path);

        let started = start("loop").unwrap();
        assert!(matches!(start("loop"), Err(Error::AlreadyRunning { .. })));

        let status = status("loop").unwrap();
        assert!(status.running);
        assert_eq!(status.pid, Some(started.pid));
        assert!(status.last_run_time.is_some());

        let tail = read_log("loop", 10);
        assert!(tail.iter().any(|line| line.contains("===== started")));
        assert!(tail.iter().any(|line| line.contains("command:")));

        stop("loop").unwrap();
        let status = super::status("loop").unwrap();
        assert!(!status.running);
        assert!(!unix::alive(started.pid));
    }

    #[test]
    fn test_exit_status_recorded_in_store() {
        init_test_home();
        let path = write_script("fail.sh", "#!/bin/sh\nexit 7\n");
        register("fail", ScriptKind::Shell, path);

        start("fail").unwrap();
        assert!(wait_until(|| {
            scripts::get("fail").unwrap().unwrap().last_run_status == Some(RunStatus::Error)
        }));
    }

    #[test]
    fn test_shell_script_gains_exec_bit() {
        init_test_home();
        let path = write_script("plain.sh", "#!/bin/sh\nexit 0\n");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        register("plain", ScriptKind::Shell, path.clone());

        start("plain").unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);
        assert!(wait_until(|| !alive("plain")));
    }

    #[test]
    fn test_concurrent_start_spawns_exactly_once() {
        init_test_home();
        let path = write_script("race.sh", "#!/bin/sh\nsleep 5\n");
        register("race", ScriptKind::Shell, path);

        let threads: Vec<_> = (0..2).map(|_| thread::spawn(|| start("race"))).collect();
        let results: Vec<_> = threads.into_iter().map(|t| t.join().unwrap()).collect();

        let ok = results.iter().filter(|r| r.is_ok()).count();
        let already = results
            .iter()
            .filter(|r| matches!(r, Err(Error::AlreadyRunning { .. })))
            .count();
        assert_eq!(ok, 1);
        assert_eq!(already, 1);

        stop("race").unwrap();
    }

    #[test]
    fn test_path_edit_takes_effect_next_start() {
        init_test_home();
        let first = write_script("swap-a.sh", "#!/bin/sh\nexit 0\n");
        let second = write_script("swap-b.sh", "#!/bin/sh\nexit 0\n");
        register("swap", ScriptKind::Shell, first);

        let changes = ScriptUpdate { path: Some(second.clone()), ..ScriptUpdate::default() };
        scripts::update("swap", changes, Some(second.clone())).unwrap();

        start("swap").unwrap();
        assert!(wait_until(|| !alive("swap")));
        let tail = read_log("swap", 20);
        assert!(tail.iter().any(|line| line.contains("swap-b.sh")));
    }

    #[test]
    fn test_project_lifecycle() {
        init_test_home();
        let base = crate::testenv::base().join("proj");
        fs::create_dir_all(&base).unwrap();

        projects::create(crate::store::projects::Project {
            id: "web".into(),
            name: "web".into(),
            description: None,
            path: base.display().to_string(),
            autostart: false,
            start_order: 1,
            status: ProjectStatus::Unknown,
            last_start_time: None,
            last_stop_time: None,
            scripts: crate::store::projects::ProjectScripts {
                start: "sleep 5".into(),
                stop: None,
                build: Some("echo built".into()),
            },
        })
        .unwrap();

        let started = start_project("web").unwrap();
        assert!(project_probe("web").running);
        assert_eq!(projects::get("web").unwrap().unwrap().status, ProjectStatus::Running);

        let out = build_project("web").unwrap();
        assert_eq!(out.code, Some(0));
        assert!(out.stdout.contains("built"));

        stop_project("web").unwrap();
        assert!(!project_probe("web").running);
        assert!(!unix::alive(started.pid));
        assert_eq!(projects::get("web").unwrap().unwrap().status, ProjectStatus::Stopped);
        assert!(matches!(stop_project("web"), Err(Error::NotRunning { .. })));
    }

    #[test]
    fn test_flush_log_truncates_in_place() {
        init_test_home();
        let path = write_script("noisy.sh", "#!/bin/sh\necho hello\n");
        register("noisy", ScriptKind::Shell, path);

        start("noisy").unwrap();
        assert!(wait_until(|| !alive("noisy")));
        assert!(!read_log("noisy", 10).is_empty());

        flush_log("noisy").unwrap();
        assert!(read_log("noisy", 10).is_empty());
    }
}
