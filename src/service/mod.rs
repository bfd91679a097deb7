use crate::config;
use crate::store::projects;
use crate::store::scripts::{self, ScriptKind};

use std::collections::HashMap;
use std::path::Path;
use std::process::Command;
use std::sync::Mutex;
use std::{fs, io};

use global_placeholders::global;
use macros_rs::ternary;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

const UNIT_DIR: &str = "/etc/systemd/system";

static MAIN_PID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Main PID: (\d+)").unwrap());
static TASKS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Tasks: (\d+)").unwrap());
static MEMORY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)Memory: (.+)$").unwrap());
static LOADED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)Loaded:(.+)$").unwrap());
static ACTIVE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)Active:(.+)$").unwrap());

static VISIBILITY_LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

#[derive(Debug, Error)]
pub enum Error {
    #[error("service '{id}' not found")]
    NotFound { id: String },
    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    Running,
    Stopped,
}

/// One row of `systemctl list-units --type=service`.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Unit {
    pub id: String,
    pub name: String,
    pub description: String,
    pub load_state: String,
    pub active_state: String,
    pub sub_state: String,
    pub status: UnitStatus,
    pub enabled: bool,
    pub hidden: bool,
}

/// Parsed `systemctl status` for a single unit.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct UnitDetail {
    pub id: String,
    pub name: String,
    pub status: UnitStatus,
    pub enabled: bool,
    pub load_state: String,
    pub active_state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    pub full_status: String,
}

/// Fields for a generated unit file.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct UnitSpec {
    pub name: String,
    pub description: Option<String>,
    pub exec_start: String,
    pub exec_stop: Option<String>,
    pub working_directory: Option<String>,
    pub environment: Option<String>,
    pub restart: Option<String>,
    pub user: Option<String>,
}

fn unit_name(id: &str) -> String {
    ternary!(id.ends_with(".service"), id.to_string(), format!("{id}.service"))
}

fn systemctl(args: &[&str]) -> Result<String, Error> {
    let output = Command::new("systemctl").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::Command {
            command: format!("systemctl {}", args.join(" ")),
            stderr: ternary!(stderr.is_empty(), format!("exit code {:?}", output.status.code()), stderr),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// is-enabled exits non-zero for disabled units, the answer is on stdout either way
fn is_enabled(name: &str) -> bool {
    Command::new("systemctl")
        .args(["is-enabled", name])
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "enabled")
        .unwrap_or(false)
}

/// All service units, enabled-state resolved in a single `list-unit-files`
/// pass instead of one `is-enabled` call per unit.
pub fn list(show_hidden: bool, sort: &str, order: &str) -> Result<Vec<Unit>, Error> {
    let stdout = systemctl(&["list-units", "--type=service", "--all", "--no-legend", "--plain"])?;
    let enabled = systemctl(&["list-unit-files", "--type=service", "--no-legend", "--plain"])
        .map(|out| parse_enabled(&out))
        .unwrap_or_default();
    let hidden = hidden_ids();

    let mut units: Vec<Unit> = stdout
        .lines()
        .filter_map(|line| parse_unit_line(line, &enabled, &hidden))
        .collect();
    if !show_hidden {
        units.retain(|unit| !unit.hidden);
    }
    sort_units(&mut units, sort, order);
    Ok(units)
}

pub fn detail(id: &str) -> Result<UnitDetail, Error> {
    let name = unit_name(id);
    let output = Command::new("systemctl").args(["status", &name, "--no-pager"]).output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();

    // status exits 3 for inactive units with the report still on stdout,
    // only an empty report means the query itself failed
    if stdout.trim().is_empty() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.code() == Some(4) {
            return Err(Error::NotFound { id: id.into() });
        }
        return Err(Error::Command { command: format!("systemctl status {name}"), stderr });
    }

    Ok(parse_status(id, &name, &stdout, is_enabled(&name)))
}

pub fn start(id: &str) -> Result<(), Error> {
    systemctl(&["start", &unit_name(id)]).map(|_| ())
}

pub fn stop(id: &str) -> Result<(), Error> {
    systemctl(&["stop", &unit_name(id)]).map(|_| ())
}

pub fn restart(id: &str) -> Result<(), Error> {
    systemctl(&["restart", &unit_name(id)]).map(|_| ())
}

pub fn reload(id: &str) -> Result<(), Error> {
    systemctl(&["reload", &unit_name(id)]).map(|_| ())
}

pub fn enable(id: &str) -> Result<(), Error> {
    systemctl(&["enable", &unit_name(id)]).map(|_| ())
}

pub fn disable(id: &str) -> Result<(), Error> {
    systemctl(&["disable", &unit_name(id)]).map(|_| ())
}

/// Last `lines` journal lines for the unit.
pub fn logs(id: &str, lines: usize) -> Result<String, Error> {
    let name = unit_name(id);
    let output = Command::new("journalctl")
        .args(["-u", &name, "-n", &lines.to_string(), "--no-pager"])
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        return Err(Error::Command { command: format!("journalctl -u {name}"), stderr });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

pub fn unit_content(id: &str) -> Result<String, Error> {
    let path = Path::new(UNIT_DIR).join(unit_name(id));
    match fs::read_to_string(&path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::NotFound { id: id.into() }),
        Err(err) => Err(err.into()),
    }
}

/// Overwrites the unit file and reloads the systemd configuration.
pub fn write_unit_content(id: &str, content: &str) -> Result<(), Error> {
    if content.trim().is_empty() {
        return Err(Error::Invalid("unit content cannot be empty".into()));
    }
    install_unit(&unit_name(id), content)
}

/// Renders and installs a unit file from the given fields. Returns the unit name.
pub fn create(spec: UnitSpec) -> Result<String, Error> {
    if spec.name.trim().is_empty() || spec.exec_start.trim().is_empty() {
        return Err(Error::Invalid("service name and exec_start are required".into()));
    }
    let name = unit_name(&spec.name);
    install_unit(&name, &render_unit(&spec))?;
    Ok(name)
}

/// Stops and disables the unit, removes its file and reloads systemd.
pub fn remove(id: &str) -> Result<(), Error> {
    let name = unit_name(id);
    let path = Path::new(UNIT_DIR).join(&name);
    if !path.exists() {
        return Err(Error::NotFound { id: id.into() });
    }

    // both are no-ops when already stopped or disabled
    systemctl(&["stop", &name]).ok();
    systemctl(&["disable", &name]).ok();

    fs::remove_file(path)?;
    systemctl(&["daemon-reload"]).map(|_| ())
}

/// Promotes a stored script to a systemd unit.
pub fn from_script(script_id: &str) -> Result<String, Error> {
    let script = scripts::get(script_id)?.ok_or_else(|| Error::NotFound { id: script_id.into() })?;

    let path = Path::new(&script.path);
    if !path.is_absolute() {
        return Err(Error::Invalid(format!("script path '{}' must be absolute", script.path)));
    }

    let interpreters = config::read().interpreters;
    let exec_start = match script.kind {
        ScriptKind::Shell => format!("/bin/bash {}", script.path),
        ScriptKind::Python => format!("{} {}", interpreters.python, script.path),
        ScriptKind::Node => format!("{} {}", interpreters.node, script.path),
        ScriptKind::Unknown => {
            return Err(Error::Invalid(format!("script '{script_id}' has no runnable type")));
        }
    };

    create(UnitSpec {
        name: script.id.clone(),
        description: script.description.clone().or_else(|| Some(script.name.clone())),
        exec_start,
        working_directory: path.parent().map(|dir| dir.display().to_string()),
        ..UnitSpec::default()
    })
}

/// Promotes a stored project to a systemd unit wrapping its start command.
pub fn from_project(project_id: &str) -> Result<String, Error> {
    let project = projects::get(project_id)?.ok_or_else(|| Error::NotFound { id: project_id.into() })?;

    create(UnitSpec {
        name: project.id.clone(),
        description: project.description.clone().or_else(|| Some(project.name.clone())),
        exec_start: format!("/bin/bash -c '{}'", project.scripts.start),
        exec_stop: project.scripts.stop.as_ref().map(|stop| format!("/bin/bash -c '{stop}'")),
        working_directory: Some(project.path.clone()),
        ..UnitSpec::default()
    })
}

fn install_unit(name: &str, content: &str) -> Result<(), Error> {
    fs::write(Path::new(UNIT_DIR).join(name), content)?;
    systemctl(&["daemon-reload"]).map(|_| ())
}

fn render_unit(spec: &UnitSpec) -> String {
    let description = spec.description.clone().unwrap_or_else(|| spec.name.clone());

    let mut service = vec!["Type=simple".to_string(), format!("ExecStart={}", spec.exec_start)];
    if let Some(stop) = &spec.exec_stop {
        service.push(format!("ExecStop={stop}"));
    }
    if let Some(dir) = &spec.working_directory {
        service.push(format!("WorkingDirectory={dir}"));
    }
    if let Some(user) = &spec.user {
        service.push(format!("User={user}"));
    }
    if let Some(env) = &spec.environment {
        service.push(format!("Environment={env}"));
    }
    service.push(format!("Restart={}", spec.restart.as_deref().unwrap_or("on-failure")));

    format!(
        "[Unit]\nDescription={description}\nAfter=network.target\n\n[Service]\n{}\n\n[Install]\nWantedBy=multi-user.target\n",
        service.join("\n")
    )
}

fn parse_unit_line(line: &str, enabled: &HashMap<String, bool>, hidden: &[String]) -> Option<Unit> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 4 {
        return None;
    }

    let name = fields[0];
    let id = name.strip_suffix(".service")?;

    Some(Unit {
        id: id.to_string(),
        name: name.to_string(),
        description: fields.get(4..).map(|rest| rest.join(" ")).unwrap_or_default(),
        load_state: fields[1].to_string(),
        active_state: fields[2].to_string(),
        sub_state: fields[3].to_string(),
        status: ternary!(fields[2] == "active", UnitStatus::Running, UnitStatus::Stopped),
        enabled: enabled.get(name).copied().unwrap_or(false),
        hidden: hidden.iter().any(|entry| entry == id),
    })
}

fn parse_enabled(stdout: &str) -> HashMap<String, bool> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            let state = fields.next()?;
            Some((name.to_string(), state == "enabled"))
        })
        .collect()
}

fn parse_status(id: &str, name: &str, stdout: &str, enabled: bool) -> UnitDetail {
    let capture = |re: &Regex| re.captures(stdout).map(|c| c[1].trim().to_string());

    let active_state = capture(&ACTIVE_RE).unwrap_or_else(|| "unknown".into());
    // "inactive" contains "active", so prefix-match the state word
    let status = ternary!(active_state.starts_with("active"), UnitStatus::Running, UnitStatus::Stopped);

    UnitDetail {
        id: id.to_string(),
        name: name.to_string(),
        status,
        enabled,
        load_state: capture(&LOADED_RE).unwrap_or_else(|| "unknown".into()),
        active_state,
        pid: capture(&MAIN_PID_RE).and_then(|pid| pid.parse().ok()),
        tasks: capture(&TASKS_RE).and_then(|tasks| tasks.parse().ok()),
        memory: capture(&MEMORY_RE),
        full_status: stdout.to_string(),
    }
}

fn sort_units(units: &mut [Unit], sort: &str, order: &str) {
    units.sort_by(|a, b| {
        let ordering = match sort {
            "status" => {
                let rank = |unit: &Unit| ternary!(unit.status == UnitStatus::Running, 0, 1);
                rank(a).cmp(&rank(b))
            }
            "enabled" => {
                let rank = |unit: &Unit| ternary!(unit.enabled, 0, 1);
                rank(a).cmp(&rank(b))
            }
            "description" => a.description.to_lowercase().cmp(&b.description.to_lowercase()),
            _ => a.name.to_lowercase().cmp(&b.name.to_lowercase()),
        };
        ternary!(order == "desc", ordering.reverse(), ordering)
    });
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct VisibilityFile {
    hidden: Vec<String>,
}

/// Unit ids the dashboard hides by default.
pub fn hidden_ids() -> Vec<String> {
    hidden_ids_in(&global!("srvman.store.services"))
}

fn hidden_ids_in(path: &str) -> Vec<String> {
    crate::store::load::<VisibilityFile>(path).map(|file| file.hidden).unwrap_or_default()
}

pub fn set_hidden(id: &str, hidden: bool) -> Result<(), Error> {
    set_hidden_in(&global!("srvman.store.services"), id, hidden)
}

fn set_hidden_in(path: &str, id: &str, hidden: bool) -> Result<(), Error> {
    let _guard = VISIBILITY_LOCK.lock().unwrap();
    let mut file: VisibilityFile = crate::store::load(path)?;

    if hidden && !file.hidden.iter().any(|entry| entry == id) {
        file.hidden.push(id.to_string());
    } else if !hidden {
        file.hidden.retain(|entry| entry != id);
    }

    crate::store::save(path, &file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    const LIST_SAMPLE: &str = "\
cron.service loaded active running Regular background program processing daemon
nginx.service loaded active running A high performance web server
getty@tty1.service loaded inactive dead Getty on tty1
snapd.mounts-pre.target loaded active active Mounting snaps
dead-unit.service not-found inactive dead dead-unit.service
";

    const UNIT_FILES_SAMPLE: &str = "\
cron.service enabled enabled
nginx.service disabled enabled
getty@.service static -
";

    const STATUS_RUNNING: &str = "\
* nginx.service - A high performance web server
     Loaded: loaded (/lib/systemd/system/nginx.service; enabled; preset: enabled)
     Active: active (running) since Mon 2026-08-17 09:14:02 UTC; 3 days ago
   Main PID: 1234 (nginx)
      Tasks: 5 (limit: 4567)
     Memory: 24.5M
        CPU: 1min 2.345s
";

    const STATUS_STOPPED: &str = "\
* cups.service - CUPS Scheduler
     Loaded: loaded (/lib/systemd/system/cups.service; disabled; preset: enabled)
     Active: inactive (dead)
";

    fn units_from(sample: &str) -> Vec<Unit> {
        let enabled = parse_enabled(UNIT_FILES_SAMPLE);
        sample
            .lines()
            .filter_map(|line| parse_unit_line(line, &enabled, &["nginx".to_string()]))
            .collect()
    }

    #[test]
    fn test_parse_unit_lines_keeps_only_services() {
        let units = units_from(LIST_SAMPLE);
        let ids: Vec<&str> = units.iter().map(|unit| unit.id.as_str()).collect();
        assert_eq!(ids, ["cron", "nginx", "getty@tty1", "dead-unit"]);

        let cron = &units[0];
        assert_eq!(cron.status, UnitStatus::Running);
        assert!(cron.enabled);
        assert!(!cron.hidden);
        assert_eq!(cron.description, "Regular background program processing daemon");

        let getty = &units[2];
        assert_eq!(getty.status, UnitStatus::Stopped);
        assert_eq!(getty.sub_state, "dead");

        let dead = &units[3];
        assert_eq!(dead.load_state, "not-found");
    }

    #[test]
    fn test_hidden_and_enabled_attribution() {
        let units = units_from(LIST_SAMPLE);
        let nginx = units.iter().find(|unit| unit.id == "nginx").unwrap();
        assert!(nginx.hidden);
        assert!(!nginx.enabled);
    }

    #[test]
    fn test_parse_status_running() {
        let detail = parse_status("nginx", "nginx.service", STATUS_RUNNING, true);
        assert_eq!(detail.status, UnitStatus::Running);
        assert_eq!(detail.pid, Some(1234));
        assert_eq!(detail.tasks, Some(5));
        assert_eq!(detail.memory.as_deref(), Some("24.5M"));
        assert!(detail.active_state.starts_with("active (running)"));
        assert!(detail.enabled);
    }

    #[test]
    fn test_parse_status_inactive_is_stopped() {
        let detail = parse_status("cups", "cups.service", STATUS_STOPPED, false);
        assert_eq!(detail.status, UnitStatus::Stopped);
        assert_eq!(detail.pid, None);
        assert_eq!(detail.tasks, None);
        assert_eq!(detail.memory, None);
    }

    #[test]
    fn test_sort_units() {
        let mut units = units_from(LIST_SAMPLE);

        sort_units(&mut units, "status", "asc");
        assert_eq!(units.first().unwrap().status, UnitStatus::Running);
        assert_eq!(units.last().unwrap().status, UnitStatus::Stopped);

        sort_units(&mut units, "name", "desc");
        assert_eq!(units.first().unwrap().id, "nginx");

        sort_units(&mut units, "enabled", "asc");
        assert!(units.first().unwrap().enabled);
    }

    #[test]
    fn test_unit_name_suffix() {
        assert_eq!(unit_name("nginx"), "nginx.service");
        assert_eq!(unit_name("nginx.service"), "nginx.service");
    }

    #[test]
    fn test_render_unit_full() {
        let spec = UnitSpec {
            name: "web".into(),
            description: Some("Web app".into()),
            exec_start: "/bin/bash -c 'npm start'".into(),
            exec_stop: Some("/bin/bash -c 'npm stop'".into()),
            working_directory: Some("/srv/web".into()),
            environment: Some("PORT=3000".into()),
            restart: Some("always".into()),
            user: Some("deploy".into()),
        };

        let unit = render_unit(&spec);
        assert!(unit.starts_with("[Unit]\nDescription=Web app\nAfter=network.target\n"));
        assert!(unit.contains("ExecStart=/bin/bash -c 'npm start'\n"));
        assert!(unit.contains("ExecStop=/bin/bash -c 'npm stop'\n"));
        assert!(unit.contains("WorkingDirectory=/srv/web\n"));
        assert!(unit.contains("User=deploy\n"));
        assert!(unit.contains("Environment=PORT=3000\n"));
        assert!(unit.contains("Restart=always\n"));
        assert!(unit.ends_with("[Install]\nWantedBy=multi-user.target\n"));
    }

    #[test]
    fn test_render_unit_defaults() {
        let spec = UnitSpec { name: "job".into(), exec_start: "/usr/bin/job".into(), ..UnitSpec::default() };

        let unit = render_unit(&spec);
        assert!(unit.contains("Description=job\n"));
        assert!(unit.contains("Restart=on-failure\n"));
        assert!(!unit.contains("User="));
        assert!(!unit.contains("WorkingDirectory="));
        assert!(!unit.contains("ExecStop="));
    }

    #[test]
    fn test_visibility_round_trip() {
        let scratch = Scratch::new();
        let path = scratch.file("services.json");

        assert!(hidden_ids_in(&path).is_empty());

        set_hidden_in(&path, "nginx", true).unwrap();
        set_hidden_in(&path, "nginx", true).unwrap();
        set_hidden_in(&path, "cron", true).unwrap();
        assert_eq!(hidden_ids_in(&path), ["nginx", "cron"]);

        set_hidden_in(&path, "nginx", false).unwrap();
        assert_eq!(hidden_ids_in(&path), ["cron"]);
    }

    #[test]
    fn test_create_requires_name_and_exec() {
        let spec = UnitSpec { name: "".into(), exec_start: "/usr/bin/app".into(), ..UnitSpec::default() };
        assert!(matches!(create(spec), Err(Error::Invalid(_))));

        let spec = UnitSpec { name: "app".into(), exec_start: " ".into(), ..UnitSpec::default() };
        assert!(matches!(create(spec), Err(Error::Invalid(_))));
    }
}
