use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use global_placeholders::global;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use utoipa::ToSchema;

use crate::helpers;

static LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Running,
    Stopped,
    #[default]
    Unknown,
}

/// Commands run through the shell with the project path as working directory.
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct ProjectScripts {
    #[schema(example = "npm run start")]
    pub start: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct Project {
    #[schema(example = "webapp")]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[schema(example = "/srv/webapp")]
    pub path: String,
    #[serde(default)]
    pub autostart: bool,
    /// Autostart launches projects in ascending order
    #[serde(default)]
    pub start_order: u32,
    #[serde(default)]
    pub status: ProjectStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_stop_time: Option<DateTime<Utc>>,
    pub scripts: ProjectScripts,
}

#[derive(Clone, Debug, Default, Deserialize, ToSchema)]
pub struct ProjectUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub path: Option<String>,
    pub autostart: Option<bool>,
    pub start_order: Option<u32>,
    pub scripts: Option<ProjectScripts>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct ProjectsFile {
    projects: Vec<Project>,
}

fn store_path() -> String {
    global!("srvman.store.projects")
}

fn load_from(path: &str) -> Result<Vec<Project>> {
    Ok(super::load::<ProjectsFile>(path)?.projects)
}

fn apply<R>(path: &str, mutate: impl FnOnce(&mut Vec<Project>) -> Result<R>) -> Result<R> {
    let _guard = LOCK.lock().unwrap();
    let mut file: ProjectsFile = super::load(path)?;
    let out = mutate(&mut file.projects)?;
    super::save(path, &file)?;
    Ok(out)
}

pub fn list() -> Result<Vec<Project>> {
    load_from(&store_path())
}

pub fn get(id: &str) -> Result<Option<Project>> {
    Ok(list()?.into_iter().find(|project| project.id == id))
}

pub fn create(project: Project) -> Result<Project> {
    create_in(&store_path(), project)
}

fn create_in(path: &str, project: Project) -> Result<Project> {
    if !helpers::valid_id(&project.id) {
        return Err(anyhow!("Invalid project id '{}'", project.id));
    }

    apply(path, |projects| {
        if projects.iter().any(|existing| existing.id == project.id) {
            return Err(anyhow!("Project '{}' already exists", project.id));
        }
        projects.push(project.clone());
        Ok(project)
    })
}

pub fn update(id: &str, changes: ProjectUpdate) -> Result<Project> {
    update_in(&store_path(), id, changes)
}

fn update_in(path: &str, id: &str, changes: ProjectUpdate) -> Result<Project> {
    apply(path, |projects| {
        let project = projects
            .iter_mut()
            .find(|project| project.id == id)
            .ok_or_else(|| anyhow!("Project '{id}' not found"))?;

        if let Some(name) = changes.name {
            project.name = name;
        }
        if let Some(description) = changes.description {
            project.description = Some(description);
        }
        if let Some(path) = changes.path {
            project.path = path;
        }
        if let Some(autostart) = changes.autostart {
            project.autostart = autostart;
        }
        if let Some(start_order) = changes.start_order {
            project.start_order = start_order;
        }
        if let Some(scripts) = changes.scripts {
            project.scripts = scripts;
        }

        Ok(project.clone())
    })
}

pub fn delete(id: &str) -> Result<()> {
    apply(&store_path(), |projects| {
        let before = projects.len();
        projects.retain(|project| project.id != id);
        if projects.len() == before {
            return Err(anyhow!("Project '{id}' not found"));
        }
        Ok(())
    })
}

pub fn patch_status(id: &str, status: ProjectStatus) -> Result<()> {
    apply(&store_path(), |projects| {
        if let Some(project) = projects.iter_mut().find(|project| project.id == id) {
            project.status = status;
            match status {
                ProjectStatus::Running => project.last_start_time = Some(Utc::now()),
                ProjectStatus::Stopped => project.last_stop_time = Some(Utc::now()),
                ProjectStatus::Unknown => {}
            }
        }
        Ok(())
    })
}

/// Autostart candidates, ascending `start_order`.
pub fn autostart_list() -> Result<Vec<Project>> {
    let mut projects: Vec<Project> = list()?.into_iter().filter(|project| project.autostart).collect();
    projects.sort_by_key(|project| project.start_order);
    Ok(projects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    fn sample(id: &str, order: u32) -> Project {
        Project {
            id: id.into(),
            name: id.into(),
            description: None,
            path: format!("/srv/{id}"),
            autostart: true,
            start_order: order,
            status: ProjectStatus::default(),
            last_start_time: None,
            last_stop_time: None,
            scripts: ProjectScripts { start: "npm run start".into(), stop: None, build: Some("npm run build".into()) },
        }
    }

    #[test]
    fn test_create_and_duplicate() {
        let scratch = Scratch::new();
        let path = scratch.file("projects.json");

        create_in(&path, sample("webapp", 0)).unwrap();
        assert!(create_in(&path, sample("webapp", 0)).is_err());
        assert_eq!(load_from(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_default_status_is_unknown() {
        let scratch = Scratch::new();
        let path = scratch.file("projects.json");
        create_in(&path, sample("webapp", 0)).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"unknown\""));
    }

    #[test]
    fn test_update_scripts() {
        let scratch = Scratch::new();
        let path = scratch.file("projects.json");
        create_in(&path, sample("webapp", 0)).unwrap();

        let changes = ProjectUpdate {
            scripts: Some(ProjectScripts { start: "cargo run".into(), stop: None, build: None }),
            ..Default::default()
        };
        let updated = update_in(&path, "webapp", changes).unwrap();
        assert_eq!(updated.scripts.start, "cargo run");
    }

    #[test]
    fn test_autostart_ordering() {
        let scratch = Scratch::new();
        let path = scratch.file("projects.json");

        create_in(&path, sample("late", 5)).unwrap();
        create_in(&path, sample("early", 1)).unwrap();

        let mut projects = load_from(&path).unwrap();
        projects.retain(|project| project.autostart);
        projects.sort_by_key(|project| project.start_order);

        let ids: Vec<&str> = projects.iter().map(|project| project.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }
}
