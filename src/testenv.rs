use global_placeholders::{global, init};
use std::path::PathBuf;
use std::sync::Once;
use std::{env, fs};

static HOME: Once = Once::new();

/// Token accepted by [`crate::auth::verify`] in every test.
pub(crate) const API_TOKEN: &str = "test-api-token";

/// Points the placeholder table at a scratch home shared by the whole test
/// binary. Every test touching globals calls this first; the first caller
/// wins and later calls are no-ops.
pub(crate) fn init() {
    HOME.call_once(|| {
        let base = env::temp_dir().join(format!("srvman-home-{}", uuid::Uuid::new_v4()));
        let base_str = base.display().to_string();
        for sub in ["pids", "logs"] {
            fs::create_dir_all(base.join(sub)).unwrap();
        }

        init!("srvman.base", base_str.clone());
        init!("srvman.config", format!("{base_str}/config.toml"));
        init!("srvman.daemon.kind", "default");
        init!("srvman.daemon.pid", format!("{base_str}/daemon.pid"));
        init!("srvman.daemon.lock", format!("{base_str}/daemon.lock"));
        init!("srvman.daemon.log", format!("{base_str}/srvman.log"));
        init!("srvman.pids", format!("{base_str}/pids"));
        init!("srvman.logs", format!("{base_str}/logs"));
        init!("srvman.store.scripts", format!("{base_str}/scripts.json"));
        init!("srvman.store.projects", format!("{base_str}/projects.json"));
        init!("srvman.store.tasks", format!("{base_str}/tasks.json"));
        init!("srvman.store.users", format!("{base_str}/users.json"));
        init!("srvman.store.services", format!("{base_str}/services.json"));

        let mut config = crate::config::structs::Config::default();
        config.daemon.web.token = Some(API_TOKEN.into());
        config.save();
    });
}

/// Scratch home directory backing the placeholder table.
pub(crate) fn base() -> PathBuf {
    init();
    PathBuf::from(global!("srvman.base"))
}
