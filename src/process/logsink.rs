use chrono::Local;
use std::{
    fs::{File, OpenOptions},
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

const BANNER_TIME: &str = "%Y-%m-%d %H:%M:%S";

/// Append handle, parent directories created on demand.
pub fn open(path: &Path) -> io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    OpenOptions::new().create(true).append(true).open(path)
}

/// Run demarcation written before the child owns the descriptor. The
/// resolved path and invocation command follow the banner, one line each.
pub fn write_start(file: &mut File, path: &str, command: &str) -> io::Result<()> {
    let stamp = Local::now().format(BANNER_TIME);
    writeln!(file, "===== started {stamp} =====")?;
    writeln!(file, "path: {path}")?;
    writeln!(file, "command: {command}")
}

/// Exit banner appended by the exit observer. Signal deaths carry no exit
/// code and are recorded as -1.
pub fn write_exit(path: &Path, code: Option<i32>) -> io::Result<()> {
    let mut file = open(path)?;
    let stamp = Local::now().format(BANNER_TIME);
    writeln!(file, "===== exited {stamp}, code={} =====", code.unwrap_or(-1))
}

/// Last `lines` lines of the log. Missing file reads as empty.
pub fn read_tail(path: &Path, lines: usize) -> io::Result<Vec<String>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    let all: Vec<String> = BufReader::new(file).lines().flatten().collect();

    let skip = all.len().saturating_sub(lines);
    Ok(all.into_iter().skip(skip).collect())
}

/// Truncates the log in place.
pub fn flush(path: &Path) -> io::Result<()> {
    if !path.exists() {
        return Ok(());
    }

    OpenOptions::new().write(true).truncate(true).open(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    #[test]
    fn test_banners_demarcate_runs() {
        let scratch = Scratch::new();
        let log = scratch.0.join("logs/backup.log");

        let mut handle = open(&log).unwrap();
        write_start(&mut handle, "/srv/backup.sh", "/srv/backup.sh").unwrap();
        writeln!(handle, "doing work").unwrap();
        drop(handle);
        write_exit(&log, Some(0)).unwrap();

        let lines = read_tail(&log, 100).unwrap();
        assert!(lines[0].starts_with("===== started "));
        assert_eq!(lines[1], "path: /srv/backup.sh");
        assert_eq!(lines[2], "command: /srv/backup.sh");
        assert_eq!(lines[3], "doing work");
        assert!(lines[4].starts_with("===== exited "));
        assert!(lines[4].ends_with("code=0 ====="));
    }

    #[test]
    fn test_signal_exit_recorded_as_minus_one() {
        let scratch = Scratch::new();
        let log = scratch.0.join("killed.log");

        write_exit(&log, None).unwrap();
        let lines = read_tail(&log, 10).unwrap();
        assert!(lines[0].contains("code=-1"));
    }

    #[test]
    fn test_read_tail_limits_lines() {
        let scratch = Scratch::new();
        let log = scratch.0.join("big.log");

        let mut handle = open(&log).unwrap();
        for n in 0..50 {
            writeln!(handle, "line {n}").unwrap();
        }
        drop(handle);

        let lines = read_tail(&log, 10).unwrap();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "line 40");
        assert_eq!(lines[9], "line 49");
    }

    #[test]
    fn test_read_tail_missing_file() {
        let scratch = Scratch::new();
        let lines = read_tail(&scratch.0.join("nope.log"), 10).unwrap();
        assert!(lines.is_empty());
    }

    #[test]
    fn test_flush_truncates() {
        let scratch = Scratch::new();
        let log = scratch.0.join("full.log");

        let mut handle = open(&log).unwrap();
        writeln!(handle, "content").unwrap();
        drop(handle);

        flush(&log).unwrap();
        assert_eq!(read_tail(&log, 10).unwrap().len(), 0);

        // appends still work after a flush
        let mut handle = open(&log).unwrap();
        writeln!(handle, "fresh").unwrap();
        drop(handle);
        assert_eq!(read_tail(&log, 10).unwrap(), vec!["fresh"]);
    }

    #[test]
    fn test_flush_missing_file_ok() {
        let scratch = Scratch::new();
        assert!(flush(&scratch.0.join("ghost.log")).is_ok());
    }
}
