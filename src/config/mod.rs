pub mod structs;

pub use structs::Config;

use crate::helpers;
use global_placeholders::global;
use macros_rs::crashln;
use std::{env, fs, path::Path, path::PathBuf};

pub fn read() -> Config {
    let path = global!("srvman.config");

    if !Path::new(&path).exists() {
        let config = Config::default();
        config.save();
        return config;
    }

    match fs::read_to_string(&path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => config,
            Err(err) => crashln!("{} Failed to parse {path}: {err}", *helpers::FAIL),
        },
        Err(err) => crashln!("{} Failed to read {path}: {err}", *helpers::FAIL),
    }
}

impl Config {
    pub fn save(&self) {
        let path = global!("srvman.config");

        let contents = match toml::to_string_pretty(self) {
            Ok(contents) => contents,
            Err(err) => crashln!("{} Failed to serialize config: {err}", *helpers::FAIL),
        };

        if let Err(err) = fs::write(&path, contents) {
            crashln!("{} Failed to write {path}: {err}", *helpers::FAIL);
        }
    }
}

fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        return home::home_dir().unwrap_or_else(|| PathBuf::from(raw));
    }

    match raw.strip_prefix("~/") {
        Some(rest) => match home::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(raw),
        },
        None => PathBuf::from(raw),
    }
}

/// Script search roots in priority order. An empty `paths.search` falls back
/// to the srvman base dir, the working directory and the home directory.
pub fn search_paths() -> Vec<PathBuf> {
    let config = read();
    let mut bases: Vec<PathBuf> = config.paths.search.iter().map(|entry| expand_tilde(entry)).collect();

    if bases.is_empty() {
        bases.push(PathBuf::from(global!("srvman.base")));
        if let Ok(cwd) = env::current_dir() {
            bases.push(cwd);
        }
        if let Some(home) = home::home_dir() {
            bases.push(home);
        }
    }

    bases
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_round_trip() {
        let config = Config::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&serialized).unwrap();

        assert_eq!(parsed.daemon.web.port, 5000);
        assert_eq!(parsed.daemon.web.address, "0.0.0.0");
        assert!(parsed.daemon.web.api);
        assert_eq!(parsed.runner.shell, "bash");
        assert_eq!(parsed.runner.args, vec!["-c"]);
        assert_eq!(parsed.interpreters.python, "python3");
        assert_eq!(parsed.interpreters.node, "node");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let parsed: Config = toml::from_str("[daemon.web]\nport = 8080\n").unwrap();

        assert_eq!(parsed.daemon.web.port, 8080);
        assert_eq!(parsed.daemon.web.address, "0.0.0.0");
        assert_eq!(parsed.runner.log_lines, 100);
        assert!(parsed.runner.autostart);
    }

    #[test]
    fn test_expand_tilde() {
        let home = home::home_dir().unwrap();
        assert_eq!(expand_tilde("~"), home);
        assert_eq!(expand_tilde("~/scripts"), home.join("scripts"));
        assert_eq!(expand_tilde("/opt/scripts"), PathBuf::from("/opt/scripts"));
    }

    #[test]
    fn test_local_address_maps_wildcard() {
        let config = Config::default();
        assert_eq!(config.local_address(), "127.0.0.1:5000");
    }
}
