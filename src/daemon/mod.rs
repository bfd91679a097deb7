#[macro_use]
mod log;
mod api;
pub mod pid;

use chrono::Utc;
use colored::Colorize;
use fork::{daemon, Fork};
use global_placeholders::global;
use macros_rs::{crashln, string, ternary};
use serde::Serialize;
use serde_json::json;
use std::panic;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{process, thread::sleep, time::Duration};

use srvman::helpers::{self, ColoredString};
use srvman::{config, scheduler, store};

use api::{DAEMON_CPU_PERCENTAGE, DAEMON_MEM_USAGE, DAEMON_START_TIME};

use sysinfo::{Pid as SysPid, ProcessRefreshKind, ProcessesToUpdate, System};

use tabled::{
    settings::{
        object::Columns,
        style::{BorderColor, Style},
        themes::Colorization,
        Color, Rotate,
    },
    Table, Tabled,
};

static ENABLE_API: AtomicBool = AtomicBool::new(false);
static ENABLE_WEBUI: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_termination_signal(_: libc::c_int) {
    let _ = std::fs::remove_file(global!("srvman.daemon.lock"));
    pid::remove();
    log!("[daemon] killed", "pid" => process::id());
    unsafe { libc::_exit(0) }
}

extern "C" fn handle_sigpipe(_: libc::c_int) {
    // Writing to a closed stdout after daemonizing must not take the daemon down
}

/// One refresh per monitor tick; cpu_usage is the delta since the previous
/// tick, so the same System instance has to survive across calls.
fn observe_self(system: &mut System) {
    let target = SysPid::from_u32(process::id());
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[target]),
        true,
        ProcessRefreshKind::new().with_cpu().with_memory(),
    );

    if let Some(me) = system.process(target) {
        DAEMON_CPU_PERCENTAGE.observe(me.cpu_usage() as f64);
        DAEMON_MEM_USAGE.observe(me.memory() as f64);
    }
}

fn init() {
    let result = panic::catch_unwind(|| {
        let rt = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(err) => {
                log!("[daemon] failed to create tokio runtime", "error" => err);
                panic!("failed to create tokio runtime: {err}");
            }
        };
        let _guard = rt.enter();

        pid::name("srvman daemon");

        let config = config::read().daemon;
        let api_enabled = ENABLE_API.load(Ordering::Acquire);
        let ui_enabled = ENABLE_WEBUI.load(Ordering::Acquire);

        unsafe {
            libc::signal(libc::SIGTERM, handle_termination_signal as *const () as usize);
            libc::signal(libc::SIGPIPE, handle_sigpipe as *const () as usize);
        };

        DAEMON_START_TIME.set(Utc::now().timestamp_millis() as f64);

        pid::write(process::id());
        log!("[daemon] new fork", "pid" => process::id());

        // The lock now belongs to the forked child
        if let Err(err) = std::fs::write(global!("srvman.daemon.lock"), process::id().to_string()) {
            log!("[daemon] failed to update lock file", "error" => err);
        }

        if api_enabled {
            log!(
                "[daemon] starting api server",
                "address" => config::read().fmt_address(),
                "webui" => ui_enabled
            );

            let api_handle = tokio::spawn(async move { api::start(ui_enabled).await });

            // Rocket needs a moment to bind; probe the port instead of guessing
            let addr = config::read().local_address();
            let max_retries = 10;
            let mut retry_count = 0;
            let mut is_listening = false;

            while retry_count < max_retries {
                let wait_ms = 300 + (retry_count * 200);
                sleep(Duration::from_millis(wait_ms));

                if std::net::TcpStream::connect(&addr).is_ok() {
                    is_listening = true;
                    break;
                }

                if api_handle.is_finished() {
                    log!("[daemon] api server task has terminated", "retry" => retry_count);
                    break;
                }

                retry_count += 1;
            }

            if is_listening {
                log!("[daemon] api server started", "address" => addr, "webui" => ui_enabled, "retries" => retry_count);
            } else {
                log!("[daemon] api server may have failed to start", "address" => addr, "retries" => retry_count);
            }
        }

        let sweep = srvman::process::reconcile();
        log!("[daemon] reconciled pid files", "swept" => sweep.swept, "purged" => sweep.purged);

        let runner = config::read().runner;
        if runner.autostart {
            let scripts = srvman::process::autostart_scripts();
            let projects = srvman::process::autostart_projects();
            log!("[daemon] autostart complete", "scripts" => scripts, "projects" => projects);
        }
        if runner.scheduler {
            let tasks = scheduler::init_all();
            log!("[daemon] scheduler ready", "tasks" => tasks);
        }

        let mut system = System::new();
        loop {
            if api_enabled {
                observe_self(&mut system);
            }

            sleep(Duration::from_millis(config.interval));
        }
    });

    if let Err(err) = result {
        ::log::error!("[daemon] init panicked: {err:?}");
        eprintln!("[daemon] fatal: initialization failed: {err:?}");

        let _ = std::fs::remove_file(global!("srvman.daemon.lock"));
        pid::remove();
        process::exit(1);
    }
}

pub fn start(verbose: bool) {
    if verbose {
        println!(
            "{} Spawning srvman daemon (base={})",
            *helpers::SUCCESS,
            global!("srvman.base")
        );
    }

    if pid::exists() {
        match pid::read() {
            Ok(pid) => {
                if pid::running(pid) {
                    crashln!("{} The daemon is already running", *helpers::FAIL);
                } else {
                    log!("[daemon] removing stale pid file", "pid" => pid);
                    pid::remove();
                }
            }
            Err(err) => {
                log!("[daemon] removing corrupted pid file", "error" => err);
                pid::remove();
            }
        }
    }

    // A lock file naming a live pid means another start is in flight
    let lock_path = global!("srvman.daemon.lock");
    if std::path::Path::new(&lock_path).exists() {
        if let Ok(contents) = std::fs::read_to_string(&lock_path) {
            if let Ok(lock_pid) = contents.trim().parse::<i32>() {
                if pid::running(lock_pid) {
                    log!("[daemon] found lock file with running process, killing it", "pid" => lock_pid);
                    let _ = nix::sys::signal::kill(
                        nix::unistd::Pid::from_raw(lock_pid),
                        nix::sys::signal::Signal::SIGKILL,
                    );
                    sleep(Duration::from_millis(500));
                } else {
                    log!("[daemon] removing stale lock file", "pid" => lock_pid);
                }
            }
        }
        let _ = std::fs::remove_file(&lock_path);
    }

    if let Err(err) = std::fs::write(&lock_path, process::id().to_string()) {
        log!("[daemon] failed to create lock file", "error" => err);
    }

    if verbose {
        println!("{} Daemonizing srvman", *helpers::SUCCESS);
    }

    // noclose keeps stderr open so Rocket startup errors stay visible
    match daemon(false, true) {
        Ok(Fork::Parent(_)) => {
            // Wait for the child to write its pid file so an immediate
            // `server health` does not report stopped
            let max_wait_ms = 2000;
            let poll_interval_ms = 50;
            let mut elapsed_ms = 0;

            while elapsed_ms < max_wait_ms {
                if pid::exists() {
                    if let Ok(daemon_pid) = pid::read() {
                        if pid::running(daemon_pid) {
                            log!("[daemon] verified daemon running", "pid" => daemon_pid);
                            return;
                        }
                    }
                }
                sleep(Duration::from_millis(poll_interval_ms));
                elapsed_ms += poll_interval_ms;
            }

            log!("[daemon] pid file not created within timeout", "max_wait_ms" => max_wait_ms);
            eprintln!(
                "{} Warning: daemon pid file not detected within {}ms",
                *helpers::WARN,
                max_wait_ms
            );
        }
        Ok(Fork::Child) => init(),
        Err(err) => crashln!("{} Daemon creation failed with code {err}", *helpers::FAIL),
    }
}

pub fn stop(verbose: bool) {
    if pid::exists() {
        if verbose {
            println!("{} Stopping srvman daemon", *helpers::SUCCESS);
        }

        match pid::read() {
            Ok(pid) => {
                if let Err(err) = nix::sys::signal::kill(
                    nix::unistd::Pid::from_raw(pid),
                    nix::sys::signal::Signal::SIGTERM,
                ) {
                    log!("[daemon] failed to stop", "error" => err);
                }
                pid::remove();
                log!("[daemon] stopped", "pid" => pid);
                if verbose {
                    println!("{} srvman daemon stopped", *helpers::SUCCESS);
                }
            }
            Err(err) => {
                log!("[daemon] removing corrupted pid file", "error" => err);
                pid::remove();
                if verbose {
                    println!("{} Removed corrupted pid file", *helpers::SUCCESS);
                }
            }
        }
    } else if verbose {
        crashln!("{} The daemon is not running", *helpers::FAIL)
    }
}

pub fn restart(api: &bool, webui: &bool, verbose: bool) {
    if pid::exists() {
        stop(verbose);
    }

    let config = config::read().daemon;

    if config.web.ui || *webui {
        ENABLE_API.store(true, Ordering::Release);
        ENABLE_WEBUI.store(true, Ordering::Release);
    } else if config.web.api || *api {
        ENABLE_API.store(true, Ordering::Release);
    } else {
        ENABLE_API.store(*api, Ordering::Release);
    }

    start(verbose);
}

pub fn health(format: &String) {
    let mut pid_value: Option<i32> = None;
    let mut cpu_percent: Option<f32> = None;
    let mut uptime: Option<chrono::DateTime<Utc>> = None;
    let mut memory_usage: Option<u64> = None;
    let mut daemon_running = false;

    #[derive(Clone, Debug, Tabled)]
    struct Info {
        #[tabled(rename = "pid file")]
        pid_file: String,
        #[tabled(rename = "base path")]
        path: String,
        #[tabled(rename = "cpu percent")]
        cpu_percent: String,
        #[tabled(rename = "memory usage")]
        memory_usage: String,
        #[tabled(rename = "daemon type")]
        external: String,
        #[tabled(rename = "scripts running")]
        running_count: usize,
        uptime: String,
        pid: String,
        status: ColoredString,
    }

    impl Serialize for Info {
        fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let trimmed_json = json!({
             "pid_file": &self.pid_file.trim(),
             "path": &self.path.trim(),
             "cpu": &self.cpu_percent.trim(),
             "mem": &self.memory_usage.trim(),
             "running_count": &self.running_count.to_string(),
             "uptime": &self.uptime.trim(),
             "pid": &self.pid.trim(),
             "status": &self.status.0.trim(),
            });

            trimmed_json.serialize(serializer)
        }
    }

    if pid::exists() {
        match pid::read() {
            Ok(process_id) => {
                if pid::running(process_id) {
                    daemon_running = true;
                    pid_value = Some(process_id);
                    uptime = pid::uptime().ok();

                    if let Some(metrics) = srvman::process::unix::metrics(process_id) {
                        cpu_percent = Some(metrics.cpu);
                        memory_usage = Some(metrics.memory);
                    }
                } else {
                    pid::remove();
                }
            }
            Err(err) => {
                log!("[daemon] health check found corrupted pid file, removing", "error" => err);
                pid::remove();
            }
        }
    }

    let cpu_percent = match cpu_percent {
        Some(percent) => format!("{:.2}%", percent),
        None => string!("0.00%"),
    };

    let memory_usage = match memory_usage {
        Some(bytes) => helpers::format_memory(bytes),
        None => string!("0b"),
    };

    let uptime = match uptime {
        Some(uptime) => helpers::format_duration(uptime),
        None => string!("none"),
    };

    let pid = match pid_value {
        Some(pid) => string!(pid),
        None => string!("n/a"),
    };

    let running_count = store::scripts::list()
        .map(|scripts| {
            scripts
                .iter()
                .filter(|script| srvman::process::alive(&script.id))
                .count()
        })
        .unwrap_or(0);

    let data = vec![Info {
        pid,
        cpu_percent,
        memory_usage,
        uptime,
        running_count,
        path: global!("srvman.base"),
        external: global!("srvman.daemon.kind"),
        pid_file: format!("{}  ", global!("srvman.daemon.pid")),
        status: ColoredString(ternary!(
            daemon_running,
            "online".green().bold(),
            "stopped".red().bold()
        )),
    }];

    let table = Table::new(data.clone())
        .with(Rotate::Left)
        .with(Style::modern().remove_horizontals())
        .with(Colorization::exact([Color::FG_CYAN], Columns::first()))
        .with(BorderColor::filled(Color::FG_BRIGHT_BLACK))
        .to_string();

    if let Ok(json) = serde_json::to_string(&data[0]) {
        match format.as_str() {
            "raw" => println!("{:?}", data[0]),
            "json" => println!("{json}"),
            "default" => {
                println!(
                    "{}\n{table}\n",
                    "srvman daemon information".on_bright_white().black()
                );
                println!(
                    " {}",
                    "Use `srvman server restart` to restart the daemon".white()
                );
                println!(" {}", "Use `srvman server stop` to stop it".white());
            }
            _ => {}
        };
    };
}

pub fn setup() {
    use std::env;
    use std::fs;
    use std::path::Path;

    println!("{} Setting up srvman systemd service...", *helpers::SUCCESS);

    let home_dir = match home::home_dir() {
        Some(dir) => dir,
        None => crashln!("{} Unable to determine home directory", *helpers::FAIL),
    };

    let binary = match env::current_exe() {
        Ok(path) => path,
        Err(err) => crashln!("{} Unable to determine srvman binary path: {}", *helpers::FAIL, err),
    };

    let binary_str = binary.to_string_lossy();

    // User services land in ~/.config/systemd/user, system-wide needs root
    let is_root = unsafe { libc::geteuid() == 0 };

    let (service_dir_path, install_target) = if is_root {
        (Path::new("/etc/systemd/system").to_path_buf(), "multi-user.target")
    } else {
        (home_dir.join(".config/systemd/user"), "default.target")
    };

    let service_dir = service_dir_path.as_path();

    if !service_dir.exists() {
        if let Err(err) = fs::create_dir_all(service_dir) {
            crashln!("{} Failed to create service directory {:?}: {}", *helpers::FAIL, service_dir, err);
        }
    }

    let service_file_path = service_dir.join("srvman.service");
    let base_dir = global!("srvman.base");
    let pid_file = global!("srvman.daemon.pid");

    let service_content = format!(
        r#"# srvman daemon systemd service file

[Unit]
Description=srvman script and service manager daemon
After=network.target

[Service]
Type=forking
WorkingDirectory={}
PIDFile={}
ExecStart={} server start
ExecStop={} server stop
Restart=on-failure
RestartSec=5s

[Install]
WantedBy={}
"#,
        base_dir, pid_file, binary_str, binary_str, install_target
    );

    if let Err(err) = fs::write(&service_file_path, service_content) {
        crashln!("{} Failed to write service file to {:?}: {}", *helpers::FAIL, service_file_path, err);
    }

    println!(
        "{} Service file created at: {}",
        *helpers::SUCCESS,
        service_file_path.display()
    );

    if is_root {
        println!("\n{} To enable and start the srvman daemon:", *helpers::SUCCESS);
        println!("  sudo systemctl daemon-reload");
        println!("  sudo systemctl enable srvman.service");
        println!("  sudo systemctl start srvman.service");
    } else {
        println!("\n{} To enable and start the srvman daemon:", *helpers::SUCCESS);
        println!("  systemctl --user daemon-reload");
        println!("  systemctl --user enable srvman.service");
        println!("  systemctl --user start srvman.service");
        println!("\n{} To start the daemon at boot:", *helpers::SUCCESS);
        println!("  loginctl enable-linger $USER");
    }
}
