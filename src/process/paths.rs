use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config;

const MAX_SEARCH_DEPTH: usize = 5;
pub(crate) const SKIPPED_DIRS: &[&str] = &["node_modules", "target", "venv", "__pycache__", "dist"];

/// Best-effort resolution against the configured search roots. Always
/// returns a path; the synthesized fallback may not exist, callers re-check.
pub fn resolve(raw: &str) -> PathBuf {
    resolve_in(&config::search_paths(), raw)
}

/// Like `resolve`, but distinguishes found from not found.
pub fn locate(raw: &str) -> Option<PathBuf> {
    locate_in(&config::search_paths(), raw)
}

pub fn resolve_in(bases: &[PathBuf], raw: &str) -> PathBuf {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.to_path_buf();
    }

    match locate_in(bases, raw) {
        Some(found) => found,
        None => {
            let primary = bases.first().cloned().unwrap_or_else(|| PathBuf::from("."));
            primary.join(normalized(raw))
        }
    }
}

pub fn locate_in(bases: &[PathBuf], raw: &str) -> Option<PathBuf> {
    let path = Path::new(raw);
    if path.is_absolute() {
        return path.exists().then(|| path.to_path_buf());
    }

    for base in bases {
        for candidate in candidates(base, raw) {
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }

    // Nothing matched the literal spelling, fall back to a bounded
    // search for the bare file name under each root.
    let name = Path::new(raw).file_name()?;
    for base in bases {
        if let Some(found) = search_by_name(base, name, 0) {
            return Some(found);
        }
    }

    None
}

fn normalized(raw: &str) -> &str {
    let mut rest = raw;
    loop {
        if let Some(stripped) = rest.strip_prefix("./") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix("../") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_prefix('/') {
            rest = stripped;
        } else {
            break;
        }
    }
    rest
}

fn candidates(base: &Path, raw: &str) -> Vec<PathBuf> {
    let mut list = vec![base.join(raw)];

    let stripped = normalized(raw);
    if stripped != raw {
        list.push(base.join(stripped));
    }

    // "../foo/bar.sh" is often a script recorded relative to a sibling
    // checkout; retry it with the first segment dropped.
    if raw.starts_with("../") {
        if let Some((_, rest)) = raw.split_once('/') {
            if !rest.is_empty() {
                list.push(base.join(rest));
            }
        }
    }

    list
}

fn search_by_name(dir: &Path, name: &OsStr, depth: usize) -> Option<PathBuf> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }

    let entries = fs::read_dir(dir).ok()?;
    let mut subdirs = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        let file_name = entry.file_name();

        if path.is_file() && file_name == name {
            return Some(path);
        }

        if path.is_dir() {
            let lossy = file_name.to_string_lossy();
            if lossy.starts_with('.') || SKIPPED_DIRS.contains(&lossy.as_ref()) {
                continue;
            }
            subdirs.push(path);
        }
    }

    for sub in subdirs {
        if let Some(found) = search_by_name(&sub, name, depth + 1) {
            return Some(found);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_absolute_passthrough() {
        let scratch = Scratch::new();
        let file = scratch.0.join("run.sh");
        touch(&file);

        let raw = file.to_string_lossy().into_owned();
        assert_eq!(resolve_in(&[], &raw), file);
        assert_eq!(locate_in(&[], &raw), Some(file));
    }

    #[test]
    fn test_absolute_missing_locate_none() {
        let raw = "/definitely/not/here.sh";
        assert_eq!(locate_in(&[], raw), None);
        // resolve still hands the absolute path back untouched
        assert_eq!(resolve_in(&[], raw), PathBuf::from(raw));
    }

    #[test]
    fn test_plain_relative_under_base() {
        let scratch = Scratch::new();
        touch(&scratch.0.join("jobs/run.sh"));

        let found = locate_in(&[scratch.0.clone()], "jobs/run.sh").unwrap();
        assert_eq!(found, scratch.0.join("jobs/run.sh"));
    }

    #[test]
    fn test_leading_dot_slash_stripped() {
        let scratch = Scratch::new();
        touch(&scratch.0.join("run.sh"));

        let found = locate_in(&[scratch.0.clone()], "./run.sh").unwrap();
        assert!(found.ends_with("run.sh"));
    }

    #[test]
    fn test_parent_prefix_stripped() {
        let scratch = Scratch::new();
        touch(&scratch.0.join("jobs/run.sh"));

        // "../jobs/run.sh" resolves once the first segment is dropped
        let found = locate_in(&[scratch.0.clone()], "../jobs/run.sh").unwrap();
        assert_eq!(found, scratch.0.join("jobs/run.sh"));
    }

    #[test]
    fn test_basename_search_fallback() {
        let scratch = Scratch::new();
        touch(&scratch.0.join("deep/nested/dir/run.sh"));

        let found = locate_in(&[scratch.0.clone()], "elsewhere/run.sh").unwrap();
        assert_eq!(found, scratch.0.join("deep/nested/dir/run.sh"));
    }

    #[test]
    fn test_basename_search_skips_hidden_and_deps() {
        let scratch = Scratch::new();
        touch(&scratch.0.join(".hidden/run.sh"));
        touch(&scratch.0.join("node_modules/pkg/run.sh"));

        assert_eq!(locate_in(&[scratch.0.clone()], "run.sh"), None);
    }

    #[test]
    fn test_unresolved_synthesizes_under_primary_base() {
        let scratch = Scratch::new();
        let bases = vec![scratch.0.clone()];

        assert_eq!(locate_in(&bases, "ghost.sh"), None);
        assert_eq!(resolve_in(&bases, "./ghost.sh"), scratch.0.join("ghost.sh"));
    }

    #[test]
    fn test_base_priority_order() {
        let first = Scratch::new();
        let second = Scratch::new();
        touch(&first.0.join("run.sh"));
        touch(&second.0.join("run.sh"));

        let bases = vec![first.0.clone(), second.0.clone()];
        assert_eq!(locate_in(&bases, "run.sh"), Some(first.0.join("run.sh")));
    }
}
