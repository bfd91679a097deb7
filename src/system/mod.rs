use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;
use utoipa::ToSchema;

use crate::config;
use crate::process::{self, paths, CommandOutput};

/// Levels of directory expansion when no explicit depth is requested.
pub const TREE_DEPTH_DEFAULT: usize = 3;
const TREE_DEPTH_MAX: usize = 5;
const PROCESS_LIST_DEFAULT: usize = 15;

/// Command prefixes `execute` will run. A request must match one of these
/// token-for-token before anything is spawned.
const COMMAND_ALLOWLIST: &[&[&str]] = &[
    &["df"],
    &["free"],
    &["top"],
    &["ps"],
    &["ls"],
    &["cat"],
    &["grep"],
    &["find"],
    &["systemctl", "status"],
    &["uptime"],
    &["who"],
    &["w"],
    &["last"],
];

#[derive(Debug, Error)]
pub enum Error {
    #[error("path '{0}' not found")]
    NotFound(String),
    #[error("command '{0}' is not in the allowlist")]
    NotAllowed(String),
    #[error("{0}")]
    Invalid(String),
    #[error("system probe failed: {0}")]
    Probe(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct SystemInfo {
    #[schema(example = "web-01")]
    pub hostname: String,
    #[schema(example = "Linux")]
    pub os_type: String,
    pub os_version: String,
    pub arch: String,
    pub cpu_count: usize,
    /// Bytes.
    pub total_memory: u64,
    pub available_memory: u64,
    pub used_memory: u64,
    pub memory_percent: f64,
    /// 1, 5 and 15 minute load averages.
    pub load_average: [f64; 3],
    /// Seconds since boot.
    pub uptime: u64,
    pub process_count: usize,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct DiskUsage {
    pub name: String,
    pub mount_point: String,
    pub file_system: String,
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f64,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct MemoryUsage {
    pub total: u64,
    pub available: u64,
    pub used: u64,
    pub used_percent: f64,
    pub swap_total: u64,
    pub swap_used: u64,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CpuUsage {
    pub global: f32,
    pub per_core: Vec<f32>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ProcessInfo {
    pub pid: i32,
    pub name: String,
    pub cpu: f32,
    /// Resident set size in bytes.
    pub memory: u64,
    pub command: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum LeafKind {
    Script,
    Config,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct TreeNode {
    pub name: String,
    pub path: String,
    pub is_dir: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<LeafKind>,
    /// Directory with nothing worth showing underneath it.
    pub empty: bool,
    /// Directory cut off by the depth limit; children were not walked.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub children: Vec<TreeNode>,
}

#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Executable {
    pub name: String,
    pub path: String,
    pub is_script: bool,
}

pub fn info() -> Result<SystemInfo, Error> {
    let hostname = hostname::get()
        .unwrap_or_else(|_| std::ffi::OsString::from("unknown"))
        .to_string_lossy()
        .to_string();

    let os = os_info::get();
    let mem = sys_info::mem_info().map_err(|err| Error::Probe(err.to_string()))?;

    // sys_info reports kilobytes
    let total_memory = mem.total * 1024;
    let available_memory = mem.avail * 1024;
    let used_memory = total_memory.saturating_sub(available_memory);
    let memory_percent = if total_memory > 0 {
        round1_f64((used_memory as f64 / total_memory as f64) * 100.0)
    } else {
        0.0
    };

    let load_average = sys_info::loadavg()
        .map(|load| [load.one, load.five, load.fifteen])
        .unwrap_or_default();

    let uptime = sys_info::boottime()
        .map(|boot| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
            now.saturating_sub(boot.tv_sec as u64)
        })
        .unwrap_or(0);

    let process_count = {
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::All, true);
        system.processes().len()
    };

    Ok(SystemInfo {
        hostname,
        os_type: os.os_type().to_string(),
        os_version: os.version().to_string(),
        arch: os.architecture().unwrap_or("unknown").to_string(),
        cpu_count: num_cpus::get(),
        total_memory,
        available_memory,
        used_memory,
        memory_percent,
        load_average,
        uptime,
        process_count,
    })
}

pub fn disks() -> Vec<DiskUsage> {
    sysinfo::Disks::new_with_refreshed_list()
        .iter()
        .filter(|disk| {
            let fs = disk.file_system().to_string_lossy();
            fs != "tmpfs" && fs != "devtmpfs"
        })
        .map(|disk| {
            let total = disk.total_space();
            let available = disk.available_space();
            let used = total.saturating_sub(available);
            DiskUsage {
                name: disk.name().to_string_lossy().to_string(),
                mount_point: disk.mount_point().display().to_string(),
                file_system: disk.file_system().to_string_lossy().to_string(),
                total,
                available,
                used,
                used_percent: if total > 0 { round1_f64((used as f64 / total as f64) * 100.0) } else { 0.0 },
            }
        })
        .collect()
}

pub fn memory() -> Result<MemoryUsage, Error> {
    let mem = sys_info::mem_info().map_err(|err| Error::Probe(err.to_string()))?;

    let total = mem.total * 1024;
    let available = mem.avail * 1024;
    let used = total.saturating_sub(available);
    let swap_total = mem.swap_total * 1024;
    let swap_used = mem.swap_total.saturating_sub(mem.swap_free) * 1024;

    Ok(MemoryUsage {
        total,
        available,
        used,
        used_percent: if total > 0 { round1_f64((used as f64 / total as f64) * 100.0) } else { 0.0 },
        swap_total,
        swap_used,
    })
}

/// Two samples separated by the minimum refresh interval; a single sample
/// always reads as zero.
pub fn cpu() -> CpuUsage {
    let mut system = System::new();
    system.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_cpu_usage();

    CpuUsage {
        global: round1(system.global_cpu_usage()),
        per_core: system.cpus().iter().map(|core| round1(core.cpu_usage())).collect(),
    }
}

/// The heaviest consumers by CPU, at most `limit` of them.
pub fn processes(limit: Option<usize>) -> Vec<ProcessInfo> {
    let limit = limit.unwrap_or(PROCESS_LIST_DEFAULT);

    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut list: Vec<ProcessInfo> = system
        .processes()
        .values()
        .map(|process| ProcessInfo {
            pid: process.pid().as_u32() as i32,
            name: process.name().to_string_lossy().to_string(),
            cpu: round1(process.cpu_usage()),
            memory: process.memory(),
            command: process
                .cmd()
                .iter()
                .map(|part| part.to_string_lossy())
                .collect::<Vec<_>>()
                .join(" "),
        })
        .collect();

    list.sort_by(|a, b| b.cpu.partial_cmp(&a.cpu).unwrap_or(Ordering::Equal));
    list.truncate(limit);
    list
}

/// Directory trees under every configured search root, `depth` levels deep.
pub fn tree(depth: Option<usize>) -> Vec<TreeNode> {
    let depth = depth.unwrap_or(TREE_DEPTH_DEFAULT).clamp(1, TREE_DEPTH_MAX);
    config::search_paths()
        .iter()
        .filter(|root| root.is_dir())
        .filter_map(|root| build_tree(root, depth))
        .collect()
}

fn build_tree(path: &Path, depth_left: usize) -> Option<TreeNode> {
    let metadata = fs::metadata(path).ok()?;
    let name = node_name(path);
    let display = path.display().to_string();

    if !metadata.is_dir() {
        return Some(TreeNode {
            name,
            path: display,
            is_dir: false,
            kind: leaf_kind(path),
            empty: false,
            truncated: false,
            children: Vec::new(),
        });
    }

    if depth_left == 0 {
        return Some(TreeNode {
            name,
            path: display,
            is_dir: true,
            kind: None,
            empty: false,
            truncated: true,
            children: Vec::new(),
        });
    }

    let mut dirs = Vec::new();
    let mut files = Vec::new();
    for entry in fs::read_dir(path).ok()?.flatten() {
        let child = entry.path();
        let Some(child_name) = child.file_name().and_then(OsStr::to_str) else { continue };
        if child_name.starts_with('.') || paths::SKIPPED_DIRS.contains(&child_name) {
            continue;
        }
        let Ok(kind) = entry.file_type() else { continue };
        if kind.is_dir() {
            dirs.push(child);
        } else if leaf_kind(&child).is_some() {
            files.push(child);
        }
    }
    dirs.sort();
    files.sort();

    let mut children = Vec::new();
    for dir in &dirs {
        if let Some(node) = build_tree(dir, depth_left - 1) {
            children.push(node);
        }
    }
    for file in &files {
        children.push(TreeNode {
            name: node_name(file),
            path: file.display().to_string(),
            is_dir: false,
            kind: leaf_kind(file),
            empty: false,
            truncated: false,
            children: Vec::new(),
        });
    }

    Some(TreeNode {
        name,
        path: display,
        is_dir: true,
        kind: None,
        empty: children.is_empty(),
        truncated: false,
        children,
    })
}

fn node_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn leaf_kind(path: &Path) -> Option<LeafKind> {
    match path.extension().and_then(OsStr::to_str) {
        Some("sh") => Some(LeafKind::Script),
        Some("json" | "yaml" | "yml") => Some(LeafKind::Config),
        _ => None,
    }
}

pub fn read_file(path: &str) -> Result<String, Error> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Err(Error::NotFound(path.to_string())),
        Err(err) => Err(err.into()),
    }
}

/// Shell and Python files come out runnable without a separate chmod.
pub fn write_file(path: &str, content: &str) -> Result<(), Error> {
    if path.trim().is_empty() {
        return Err(Error::Invalid("file path must not be empty".into()));
    }

    fs::write(path, content)?;

    if path.ends_with(".sh") || path.ends_with(".py") {
        let mut permissions = fs::metadata(path)?.permissions();
        permissions.set_mode(permissions.mode() | 0o755);
        fs::set_permissions(path, permissions)?;
    }

    Ok(())
}

/// Non-hidden regular files that carry the owner execute bit or a script
/// extension.
pub fn executables(directory: &str) -> Result<Vec<Executable>, Error> {
    let dir = Path::new(directory);
    if !dir.is_dir() {
        return Err(Error::NotFound(directory.to_string()));
    }

    let mut found = Vec::new();
    for entry in fs::read_dir(dir)?.flatten() {
        let path = entry.path();
        let Some(name) = path.file_name().and_then(OsStr::to_str).map(String::from) else { continue };
        if name.starts_with('.') {
            continue;
        }
        let Ok(metadata) = entry.metadata() else { continue };
        if metadata.is_dir() {
            continue;
        }

        let is_script = [".sh", ".py", ".js"].iter().any(|ext| name.ends_with(ext));
        let is_executable = metadata.permissions().mode() & 0o100 != 0;
        if is_executable || is_script {
            found.push(Executable { name, path: path.display().to_string(), is_script });
        }
    }

    found.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(found)
}

/// Runs an allowlisted diagnostic command. The command is split into tokens
/// and spawned directly, so shell metacharacters carry no meaning here.
pub fn execute(command: &str) -> Result<CommandOutput, Error> {
    let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
    if argv.is_empty() {
        return Err(Error::Invalid("command must not be empty".into()));
    }
    if !allowed(&argv) {
        return Err(Error::NotAllowed(argv.join(" ")));
    }

    Ok(process::run_sync(&argv, None)?)
}

fn allowed(argv: &[String]) -> bool {
    COMMAND_ALLOWLIST.iter().any(|prefix| {
        prefix.len() <= argv.len()
            && prefix.iter().zip(argv.iter()).all(|(want, got)| *want == got.as_str())
    })
}

fn round1(value: f32) -> f32 {
    (value * 10.0).round() / 10.0
}

fn round1_f64(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::fs;
    use std::path::PathBuf;

    struct Scratch {
        root: PathBuf,
    }

    impl Scratch {
        fn new() -> Self {
            let root = std::env::temp_dir().join(format!("srvman-system-{}", uuid::Uuid::new_v4()));
            fs::create_dir_all(&root).unwrap();
            Self { root }
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    fn touch(path: &Path, mode: u32) {
        fs::write(path, "#!/bin/sh\n").unwrap();
        let mut permissions = fs::metadata(path).unwrap().permissions();
        permissions.set_mode(mode);
        fs::set_permissions(path, permissions).unwrap();
    }

    #[test]
    fn allowlist_accepts_exact_and_prefixed_commands() {
        for command in ["df", "df -h", "ls /tmp", "systemctl status nginx", "uptime"] {
            let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
            assert!(allowed(&argv), "expected '{command}' to pass");
        }
    }

    #[test]
    fn allowlist_rejects_everything_else() {
        for command in ["rm -rf /", "systemctl stop nginx", "echo hi", "ls; reboot", "dd if=/dev/zero"] {
            let argv: Vec<String> = command.split_whitespace().map(String::from).collect();
            assert!(!allowed(&argv), "expected '{command}' to be rejected");
        }
    }

    #[test]
    fn execute_runs_without_a_shell() {
        let output = execute("uptime").unwrap();
        assert_eq!(output.code, Some(0));
        assert!(!output.stdout.is_empty());

        // metacharacters reach the command as plain arguments
        let output = execute("ls . && reboot").unwrap();
        assert_ne!(output.code, Some(0));

        assert!(matches!(execute("reboot"), Err(Error::NotAllowed(_))));
        assert!(matches!(execute("   "), Err(Error::Invalid(_))));
    }

    #[test]
    fn tree_marks_leaves_and_skips_noise() {
        let scratch = Scratch::new();
        let root = &scratch.root;

        fs::create_dir_all(root.join("sub")).unwrap();
        fs::create_dir_all(root.join("empty")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("node_modules")).unwrap();
        fs::write(root.join("deploy.sh"), "#!/bin/sh\n").unwrap();
        fs::write(root.join("app.yaml"), "a: 1\n").unwrap();
        fs::write(root.join("notes.txt"), "ignored\n").unwrap();
        fs::write(root.join("sub/run.sh"), "#!/bin/sh\n").unwrap();

        let node = build_tree(root, 3).unwrap();
        assert!(node.is_dir);
        assert!(!node.empty);

        let names: Vec<&str> = node.children.iter().map(|child| child.name.as_str()).collect();
        assert_eq!(names, vec!["empty", "sub", "app.yaml", "deploy.sh"]);

        let empty = &node.children[0];
        assert!(empty.empty && empty.children.is_empty());

        let sub = &node.children[1];
        assert_eq!(sub.children.len(), 1);
        assert_eq!(sub.children[0].kind, Some(LeafKind::Script));

        assert_eq!(node.children[2].kind, Some(LeafKind::Config));
        assert_eq!(node.children[3].kind, Some(LeafKind::Script));
    }

    #[test]
    fn tree_depth_limit_truncates_directories() {
        let scratch = Scratch::new();
        let root = &scratch.root;
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("a/b/c/deep.sh"), "#!/bin/sh\n").unwrap();

        let node = build_tree(root, 1).unwrap();
        let a = &node.children[0];
        assert!(a.truncated);
        assert!(a.children.is_empty());

        let node = build_tree(root, 4).unwrap();
        let c = &node.children[0].children[0].children[0];
        assert!(!c.truncated);
        assert_eq!(c.children[0].name, "deep.sh");
    }

    #[test]
    fn executables_catch_exec_bits_and_script_extensions() {
        let scratch = Scratch::new();
        let root = &scratch.root;

        touch(&root.join("tool"), 0o755);
        touch(&root.join("plain"), 0o644);
        touch(&root.join("helper.py"), 0o644);
        touch(&root.join(".hidden.sh"), 0o755);
        fs::create_dir_all(root.join("subdir")).unwrap();

        let found = executables(&root.display().to_string()).unwrap();
        let names: Vec<&str> = found.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["helper.py", "tool"]);
        assert!(found[0].is_script);
        assert!(!found[1].is_script);

        assert!(matches!(executables("/no/such/dir"), Err(Error::NotFound(_))));
    }

    #[test]
    fn write_file_marks_scripts_runnable() {
        let scratch = Scratch::new();
        let script = scratch.root.join("job.py");
        let path = script.display().to_string();

        write_file(&path, "print('ok')\n").unwrap();
        let mode = fs::metadata(&script).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0);

        let plain = scratch.root.join("data.json").display().to_string();
        write_file(&plain, "{}\n").unwrap();
        assert_eq!(read_file(&plain).unwrap(), "{}\n");

        assert!(matches!(read_file("/no/such/file.txt"), Err(Error::NotFound(_))));
    }

    #[test]
    fn probes_return_plausible_numbers() {
        let info = info().unwrap();
        assert!(!info.hostname.is_empty());
        assert!(info.cpu_count > 0);
        assert!(info.total_memory > 0);
        assert!(info.memory_percent >= 0.0 && info.memory_percent <= 100.0);

        let memory = memory().unwrap();
        assert!(memory.total > 0);
        assert!(memory.used <= memory.total);

        let top = processes(Some(5));
        assert!(top.len() <= 5);
        for pair in top.windows(2) {
            assert!(pair[0].cpu >= pair[1].cpu);
        }
    }
}
