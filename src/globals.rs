use global_placeholders::init;
use macros_rs::crashln;
use srvman::helpers;
use std::{env, fs, path::PathBuf};

fn base_dir() -> PathBuf {
    match env::var("SRVMAN_HOME") {
        Ok(path) => PathBuf::from(path),
        Err(_) => match home::home_dir() {
            Some(path) => path.join(".srvman"),
            None => crashln!("{} Failed to find home directory", *helpers::FAIL),
        },
    }
}

pub fn init() {
    dotenvy::dotenv().ok();

    let base = base_dir();
    let pids = base.join("pids");
    let logs = base.join("logs");

    for dir in [&base, &pids, &logs] {
        if let Err(err) = fs::create_dir_all(dir) {
            crashln!("{} Failed to create {:?}: {err}", *helpers::FAIL, dir);
        }
    }

    let base = base.display();

    init!("srvman.base", format!("{base}"));
    init!("srvman.config", format!("{base}/config.toml"));

    init!("srvman.daemon.kind", "default");
    init!("srvman.daemon.pid", format!("{base}/daemon.pid"));
    init!("srvman.daemon.lock", format!("{base}/daemon.lock"));
    init!("srvman.daemon.log", format!("{base}/srvman.log"));

    init!("srvman.pids", format!("{base}/pids"));
    init!("srvman.logs", format!("{base}/logs"));

    init!("srvman.store.scripts", format!("{base}/scripts.json"));
    init!("srvman.store.projects", format!("{base}/projects.json"));
    init!("srvman.store.tasks", format!("{base}/tasks.json"));
    init!("srvman.store.users", format!("{base}/users.json"));
    init!("srvman.store.services", format!("{base}/services.json"));
}
