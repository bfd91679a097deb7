use anyhow::{Context, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::{fs, path::Path};

pub mod projects;
pub mod scripts;
pub mod tasks;
pub mod users;

/// Missing store files deserialize to their empty default.
pub(crate) fn load<T: DeserializeOwned + Default>(path: &str) -> Result<T> {
    if !Path::new(path).exists() {
        return Ok(T::default());
    }

    let contents = fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {path}"))
}

pub(crate) fn save<T: Serialize>(path: &str, value: &T) -> Result<()> {
    let contents = serde_json::to_string_pretty(value).context("Failed to serialize store")?;
    fs::write(path, contents).with_context(|| format!("Failed to write {path}"))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::{env, fs, path::PathBuf};
    use uuid::Uuid;

    /// Scratch dir removed on drop. Store tests point path-taking internals here.
    pub struct Scratch(pub PathBuf);

    impl Scratch {
        pub fn new() -> Self {
            let dir = env::temp_dir().join(format!("srvman-test-{}", Uuid::new_v4()));
            fs::create_dir_all(&dir).unwrap();
            Scratch(dir)
        }

        pub fn file(&self, name: &str) -> String {
            self.0.join(name).to_string_lossy().into_owned()
        }
    }

    impl Drop for Scratch {
        fn drop(&mut self) {
            fs::remove_dir_all(&self.0).ok();
        }
    }
}
