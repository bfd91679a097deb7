use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use global_placeholders::global;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use utoipa::ToSchema;

use crate::helpers;

static LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Shell,
    Python,
    Node,
    /// Anything else found in a hand-edited store; never runnable
    #[serde(other)]
    Unknown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Script {
    #[schema(example = "backup-daily")]
    pub id: String,
    #[schema(example = "Daily backup")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: ScriptKind,
    /// Resolved absolute path
    #[schema(example = "/home/user/scripts/backup.sh")]
    pub path: String,
    /// Path exactly as supplied at creation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    #[serde(default)]
    pub autostart: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_status: Option<RunStatus>,
}

/// Fields a `PUT /scripts/<id>` may change. The id is immutable.
#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct ScriptUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ScriptKind>,
    pub path: Option<String>,
    pub autostart: Option<bool>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ScriptsFile {
    scripts: Vec<Script>,
}

fn store_path() -> String {
    global!("srvman.store.scripts")
}

fn load_from(path: &str) -> Result<Vec<Script>> {
    Ok(super::load::<ScriptsFile>(path)?.scripts)
}

fn apply<R>(path: &str, mutate: impl FnOnce(&mut Vec<Script>) -> Result<R>) -> Result<R> {
    let _guard = LOCK.lock().unwrap();
    let mut file: ScriptsFile = super::load(path)?;
    let out = mutate(&mut file.scripts)?;
    super::save(path, &file)?;
    Ok(out)
}

pub fn list() -> Result<Vec<Script>> {
    load_from(&store_path())
}

pub fn get(id: &str) -> Result<Option<Script>> {
    Ok(list()?.into_iter().find(|script| script.id == id))
}

pub fn create(script: Script) -> Result<Script> {
    create_in(&store_path(), script)
}

fn create_in(path: &str, script: Script) -> Result<Script> {
    if !helpers::valid_id(&script.id) {
        return Err(anyhow!("Invalid script id '{}'", script.id));
    }

    apply(path, |scripts| {
        if scripts.iter().any(|existing| existing.id == script.id) {
            return Err(anyhow!("Script '{}' already exists", script.id));
        }
        scripts.push(script.clone());
        Ok(script)
    })
}

/// `resolved_path` is the resolver's answer for `changes.path` when the
/// caller changes it; the raw input is kept as `original_path`.
pub fn update(id: &str, changes: ScriptUpdate, resolved_path: Option<String>) -> Result<Script> {
    update_in(&store_path(), id, changes, resolved_path)
}

fn update_in(path: &str, id: &str, changes: ScriptUpdate, resolved_path: Option<String>) -> Result<Script> {
    apply(path, |scripts| {
        let script = scripts
            .iter_mut()
            .find(|script| script.id == id)
            .ok_or_else(|| anyhow!("Script '{id}' not found"))?;

        if let Some(name) = changes.name {
            script.name = name;
        }
        if let Some(description) = changes.description {
            script.description = Some(description);
        }
        if let Some(kind) = changes.kind {
            script.kind = kind;
        }
        if let Some(raw) = changes.path {
            let resolved = resolved_path.unwrap_or_else(|| raw.clone());
            script.original_path = Some(raw);
            script.path = resolved;
        }
        if let Some(autostart) = changes.autostart {
            script.autostart = autostart;
        }

        Ok(script.clone())
    })
}

pub fn delete(id: &str) -> Result<()> {
    delete_in(&store_path(), id)
}

fn delete_in(path: &str, id: &str) -> Result<()> {
    apply(path, |scripts| {
        let before = scripts.len();
        scripts.retain(|script| script.id != id);
        if scripts.len() == before {
            return Err(anyhow!("Script '{id}' not found"));
        }
        Ok(())
    })
}

/// Stamped by the supervisor as a run begins.
pub fn record_run_started(id: &str, when: DateTime<Utc>) -> Result<()> {
    apply(&store_path(), |scripts| {
        if let Some(script) = scripts.iter_mut().find(|script| script.id == id) {
            script.last_run_time = Some(when);
        }
        Ok(())
    })
}

/// Stamped by the exit observer once the child is gone.
pub fn record_run_finished(id: &str, status: RunStatus) -> Result<()> {
    apply(&store_path(), |scripts| {
        if let Some(script) = scripts.iter_mut().find(|script| script.id == id) {
            script.last_run_status = Some(status);
        }
        Ok(())
    })
}

pub fn autostart_list() -> Result<Vec<Script>> {
    Ok(list()?.into_iter().filter(|script| script.autostart).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    fn sample(id: &str) -> Script {
        Script {
            id: id.into(),
            name: id.into(),
            description: None,
            kind: ScriptKind::Shell,
            path: format!("/tmp/{id}.sh"),
            original_path: Some(format!("{id}.sh")),
            autostart: false,
            last_run_time: None,
            last_run_status: None,
        }
    }

    #[test]
    fn test_missing_file_is_empty() {
        let scratch = Scratch::new();
        let scripts = load_from(&scratch.file("scripts.json")).unwrap();
        assert!(scripts.is_empty());
    }

    #[test]
    fn test_create_then_load() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");

        create_in(&path, sample("backup")).unwrap();
        let scripts = load_from(&path).unwrap();

        assert_eq!(scripts.len(), 1);
        assert_eq!(scripts[0].id, "backup");
        assert_eq!(scripts[0].kind, ScriptKind::Shell);
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");

        create_in(&path, sample("backup")).unwrap();
        assert!(create_in(&path, sample("backup")).is_err());
        assert_eq!(load_from(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_id_rejected() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");

        assert!(create_in(&path, sample("../escape")).is_err());
        assert!(load_from(&path).unwrap().is_empty());
    }

    #[test]
    fn test_update_keeps_id() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");
        create_in(&path, sample("backup")).unwrap();

        let changes = ScriptUpdate { name: Some("Nightly".into()), autostart: Some(true), ..Default::default() };
        let updated = update_in(&path, "backup", changes, None).unwrap();

        assert_eq!(updated.id, "backup");
        assert_eq!(updated.name, "Nightly");
        assert!(updated.autostart);
    }

    #[test]
    fn test_update_path_keeps_raw_as_original() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");
        create_in(&path, sample("backup")).unwrap();

        let changes = ScriptUpdate { path: Some("other.sh".into()), ..Default::default() };
        let updated = update_in(&path, "backup", changes, Some("/srv/other.sh".into())).unwrap();

        assert_eq!(updated.original_path.as_deref(), Some("other.sh"));
        assert_eq!(updated.path, "/srv/other.sh");
    }

    #[test]
    fn test_update_unknown_id() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");
        assert!(update_in(&path, "ghost", ScriptUpdate::default(), None).is_err());
    }

    #[test]
    fn test_delete() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");
        create_in(&path, sample("backup")).unwrap();

        delete_in(&path, "backup").unwrap();
        assert!(load_from(&path).unwrap().is_empty());
        assert!(delete_in(&path, "backup").is_err());
    }

    #[test]
    fn test_store_shape_is_wrapped_array() {
        let scratch = Scratch::new();
        let path = scratch.file("scripts.json");
        create_in(&path, sample("backup")).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get("scripts").unwrap().is_array());
    }
}
