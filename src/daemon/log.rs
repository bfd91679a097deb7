use chrono::Local;
use global_placeholders::global;
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

const STAMP: &str = "%Y-%m-%d %H:%M:%S%.3f";

pub struct Logger {
    file: File,
}

/// Renders `key=value` pairs, sorted so repeated events line up in the file.
pub fn format_args(args: &BTreeMap<String, String>) -> String {
    args.iter().map(|(key, value)| format!("{key}={value}")).collect::<Vec<String>>().join(", ")
}

impl Logger {
    pub fn new() -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(global!("srvman.daemon.log"))?;
        Ok(Logger { file })
    }

    // the daemon has its own module named log, ::log is the crate
    pub fn write(&mut self, message: &str, args: BTreeMap<String, String>) {
        let msg = format!("{message} ({})", format_args(&args));

        ::log::info!("{msg}");
        // log writes never take the daemon down
        let _ = writeln!(&mut self.file, "[{}] {msg}", Local::now().format(STAMP));
    }
}

#[macro_export]
macro_rules! log {
    ($msg:expr, $($key:expr => $value:expr),* $(,)?) => {{
        let mut args = std::collections::BTreeMap::new();
        $(args.insert($key.to_string(), format!("{}", $value));)*
        match crate::daemon::log::Logger::new() {
            Ok(mut logger) => logger.write($msg, args),
            Err(_) => ::log::info!("{} ({})", $msg, crate::daemon::log::format_args(&args)),
        }
    }}
}
