use global_placeholders::global;
use std::{fs, io, path::Path, path::PathBuf};

/// One `<id>.pid` file per managed process, decimal text. The store itself
/// never probes liveness; only the supervisor's liveness check removes a
/// file whose process is gone.
pub fn read(id: &str) -> Option<i32> {
    read_from(Path::new(&global!("srvman.pids")), id)
}

pub(crate) fn path_in(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{id}.pid"))
}

pub(crate) fn write_to(dir: &Path, id: &str, pid: i32) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    fs::write(path_in(dir, id), pid.to_string())
}

/// Unparseable or non-positive content counts as absent and the file is
/// dropped on the spot.
pub(crate) fn read_from(dir: &Path, id: &str) -> Option<i32> {
    let path = path_in(dir, id);
    let contents = fs::read_to_string(&path).ok()?;

    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Some(pid),
        _ => {
            fs::remove_file(&path).ok();
            None
        }
    }
}

pub(crate) fn remove_from(dir: &Path, id: &str) {
    fs::remove_file(path_in(dir, id)).ok();
}

pub(crate) fn list_in(dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };

    let mut ids: Vec<String> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().to_string_lossy().into_owned();
            name.strip_suffix(".pid").map(str::to_string)
        })
        .collect();

    ids.sort();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    #[test]
    fn test_write_read_remove() {
        let scratch = Scratch::new();

        write_to(&scratch.0, "backup", 4242).unwrap();
        assert_eq!(read_from(&scratch.0, "backup"), Some(4242));

        remove_from(&scratch.0, "backup");
        assert_eq!(read_from(&scratch.0, "backup"), None);
    }

    #[test]
    fn test_missing_is_none() {
        let scratch = Scratch::new();
        assert_eq!(read_from(&scratch.0, "ghost"), None);
    }

    #[test]
    fn test_garbage_content_removed() {
        let scratch = Scratch::new();
        let path = path_in(&scratch.0, "bad");
        fs::write(&path, "not-a-pid\n").unwrap();

        assert_eq!(read_from(&scratch.0, "bad"), None);
        assert!(!path.exists());
    }

    #[test]
    fn test_non_positive_removed() {
        let scratch = Scratch::new();
        fs::write(path_in(&scratch.0, "zero"), "0").unwrap();
        fs::write(path_in(&scratch.0, "neg"), "-5").unwrap();

        assert_eq!(read_from(&scratch.0, "zero"), None);
        assert_eq!(read_from(&scratch.0, "neg"), None);
    }

    #[test]
    fn test_list_ids() {
        let scratch = Scratch::new();
        write_to(&scratch.0, "b", 2).unwrap();
        write_to(&scratch.0, "a", 1).unwrap();
        fs::write(scratch.0.join("stray.txt"), "x").unwrap();

        assert_eq!(list_in(&scratch.0), vec!["a", "b"]);
    }

    #[test]
    fn test_whitespace_tolerated() {
        let scratch = Scratch::new();
        fs::write(path_in(&scratch.0, "padded"), " 123\n").unwrap();
        assert_eq!(read_from(&scratch.0, "padded"), Some(123));
    }
}
