use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use global_placeholders::global;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use utoipa::ToSchema;

use crate::helpers;

static LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Task {
    #[schema(example = "nightly-backup")]
    pub id: String,
    pub name: String,
    /// Cron expression, 5 fields (minute first) or 6 with seconds
    #[schema(example = "0 3 * * *")]
    pub schedule: String,
    #[schema(example = "tar czf /backups/home.tgz /home")]
    pub command: String,
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_run: Option<DateTime<Utc>>,
    /// Tail of the captured output from the most recent firing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_output: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct TaskUpdate {
    pub name: Option<String>,
    pub schedule: Option<String>,
    pub command: Option<String>,
    pub active: Option<bool>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct TasksFile {
    tasks: Vec<Task>,
}

fn store_path() -> String {
    global!("srvman.store.tasks")
}

fn load_from(path: &str) -> Result<Vec<Task>> {
    Ok(super::load::<TasksFile>(path)?.tasks)
}

fn apply<R>(path: &str, mutate: impl FnOnce(&mut Vec<Task>) -> Result<R>) -> Result<R> {
    let _guard = LOCK.lock().unwrap();
    let mut file: TasksFile = super::load(path)?;
    let out = mutate(&mut file.tasks)?;
    super::save(path, &file)?;
    Ok(out)
}

pub fn list() -> Result<Vec<Task>> {
    load_from(&store_path())
}

pub fn get(id: &str) -> Result<Option<Task>> {
    Ok(list()?.into_iter().find(|task| task.id == id))
}

pub fn create(task: Task) -> Result<Task> {
    create_in(&store_path(), task)
}

fn create_in(path: &str, task: Task) -> Result<Task> {
    if !helpers::valid_id(&task.id) {
        return Err(anyhow!("Invalid task id '{}'", task.id));
    }

    apply(path, |tasks| {
        if tasks.iter().any(|existing| existing.id == task.id) {
            return Err(anyhow!("Task '{}' already exists", task.id));
        }
        tasks.push(task.clone());
        Ok(task)
    })
}

pub fn update(id: &str, changes: TaskUpdate) -> Result<Task> {
    apply(&store_path(), |tasks| {
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("Task '{id}' not found"))?;

        if let Some(name) = changes.name {
            task.name = name;
        }
        if let Some(schedule) = changes.schedule {
            task.schedule = schedule;
        }
        if let Some(command) = changes.command {
            task.command = command;
        }
        if let Some(active) = changes.active {
            task.active = active;
        }
        if let Some(kind) = changes.kind {
            task.kind = Some(kind);
        }

        Ok(task.clone())
    })
}

pub fn delete(id: &str) -> Result<()> {
    apply(&store_path(), |tasks| {
        let before = tasks.len();
        tasks.retain(|task| task.id != id);
        if tasks.len() == before {
            return Err(anyhow!("Task '{id}' not found"));
        }
        Ok(())
    })
}

pub fn set_active(id: &str, active: bool) -> Result<Task> {
    apply(&store_path(), |tasks| {
        let task = tasks
            .iter_mut()
            .find(|task| task.id == id)
            .ok_or_else(|| anyhow!("Task '{id}' not found"))?;
        task.active = active;
        Ok(task.clone())
    })
}

/// Stamped by the scheduler after each firing.
pub fn record_run(id: &str, ran_at: DateTime<Utc>, next: Option<DateTime<Utc>>, output: Option<String>) -> Result<()> {
    apply(&store_path(), |tasks| {
        if let Some(task) = tasks.iter_mut().find(|task| task.id == id) {
            task.last_run = Some(ran_at);
            task.next_run = next;
            if output.is_some() {
                task.last_run_output = output;
            }
        }
        Ok(())
    })
}

pub fn set_next_run(id: &str, next: Option<DateTime<Utc>>) -> Result<()> {
    apply(&store_path(), |tasks| {
        if let Some(task) = tasks.iter_mut().find(|task| task.id == id) {
            task.next_run = next;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    fn sample(id: &str) -> Task {
        Task {
            id: id.into(),
            name: id.into(),
            schedule: "0 3 * * *".into(),
            command: "echo hi".into(),
            active: true,
            kind: None,
            last_run: None,
            next_run: None,
            last_run_output: None,
        }
    }

    #[test]
    fn test_create_and_get() {
        let scratch = Scratch::new();
        let path = scratch.file("tasks.json");

        create_in(&path, sample("nightly")).unwrap();
        let tasks = load_from(&path).unwrap();
        assert_eq!(tasks[0].schedule, "0 3 * * *");
        assert!(tasks[0].active);
    }

    #[test]
    fn test_duplicate_rejected() {
        let scratch = Scratch::new();
        let path = scratch.file("tasks.json");

        create_in(&path, sample("nightly")).unwrap();
        assert!(create_in(&path, sample("nightly")).is_err());
    }
}
