use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: Daemon,
    #[serde(default)]
    pub runner: Runner,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub interpreters: Interpreters,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Daemon {
    /// Monitor loop sample interval (ms)
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub web: Web,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Web {
    #[serde(default = "default_true")]
    pub api: bool,
    #[serde(default)]
    pub ui: bool,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Static API token accepted alongside login sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Directory of prebuilt dashboard assets served at `/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_dir: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Runner {
    #[serde(default = "default_shell")]
    pub shell: String,
    #[serde(default = "default_shell_args")]
    pub args: Vec<String>,
    #[serde(default = "default_log_lines")]
    pub log_lines: usize,
    #[serde(default = "default_true")]
    pub autostart: bool,
    #[serde(default = "default_true")]
    pub scheduler: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Paths {
    /// Script search roots, tried in order. Empty means base dir, cwd, home.
    #[serde(default)]
    pub search: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Interpreters {
    #[serde(default = "default_python")]
    pub python: String,
    #[serde(default = "default_node")]
    pub node: String,
}

fn default_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

fn default_address() -> String {
    String::from("0.0.0.0")
}

fn default_port() -> u16 {
    5000
}

fn default_shell() -> String {
    String::from("bash")
}

fn default_shell_args() -> Vec<String> {
    vec![String::from("-c")]
}

fn default_log_lines() -> usize {
    100
}

fn default_python() -> String {
    String::from("python3")
}

fn default_node() -> String {
    String::from("node")
}

impl Default for Daemon {
    fn default() -> Self {
        Daemon { interval: default_interval(), web: Web::default() }
    }
}

impl Default for Web {
    fn default() -> Self {
        Web {
            api: true,
            ui: false,
            address: default_address(),
            port: default_port(),
            token: None,
            static_dir: None,
        }
    }
}

impl Default for Runner {
    fn default() -> Self {
        Runner {
            shell: default_shell(),
            args: default_shell_args(),
            log_lines: default_log_lines(),
            autostart: true,
            scheduler: true,
        }
    }
}

impl Default for Interpreters {
    fn default() -> Self {
        Interpreters { python: default_python(), node: default_node() }
    }
}

impl Config {
    pub fn fmt_address(&self) -> String {
        format!("{}:{}", self.daemon.web.address, self.daemon.web.port)
    }

    /// Address the CLI can reach the daemon on, 0.0.0.0 mapped to loopback.
    pub fn local_address(&self) -> String {
        let host = match self.daemon.web.address.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1",
            other => other,
        };
        format!("{}:{}", host, self.daemon.web.port)
    }
}
