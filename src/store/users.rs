use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use global_placeholders::global;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use utoipa::ToSchema;

static LOCK: Lazy<Mutex<()>> = Lazy::new(Mutex::default);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// SHA-256 hex digest
    pub password_hash: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct UsersFile {
    users: Vec<User>,
}

fn store_path() -> String {
    global!("srvman.store.users")
}

fn load_from(path: &str) -> Result<Vec<User>> {
    Ok(super::load::<UsersFile>(path)?.users)
}

fn apply<R>(path: &str, mutate: impl FnOnce(&mut Vec<User>) -> Result<R>) -> Result<R> {
    let _guard = LOCK.lock().unwrap();
    let mut file: UsersFile = super::load(path)?;
    let out = mutate(&mut file.users)?;
    super::save(path, &file)?;
    Ok(out)
}

pub fn list() -> Result<Vec<User>> {
    load_from(&store_path())
}

pub fn find(username: &str) -> Result<Option<User>> {
    Ok(list()?.into_iter().find(|user| user.username == username))
}

pub fn add(user: User) -> Result<User> {
    add_in(&store_path(), user)
}

fn add_in(path: &str, user: User) -> Result<User> {
    if user.username.is_empty() {
        return Err(anyhow!("Username cannot be empty"));
    }

    apply(path, |users| {
        if users.iter().any(|existing| existing.username == user.username) {
            return Err(anyhow!("User '{}' already exists", user.username));
        }
        users.push(user.clone());
        Ok(user)
    })
}

/// The last admin account cannot be removed.
pub fn remove(username: &str) -> Result<()> {
    remove_in(&store_path(), username)
}

fn remove_in(path: &str, username: &str) -> Result<()> {
    apply(path, |users| {
        let target = users
            .iter()
            .find(|user| user.username == username)
            .ok_or_else(|| anyhow!("User '{username}' not found"))?;

        let admins = users.iter().filter(|user| user.role == Role::Admin).count();
        if target.role == Role::Admin && admins <= 1 {
            return Err(anyhow!("Cannot remove the last admin user"));
        }

        users.retain(|user| user.username != username);
        Ok(())
    })
}

pub fn set_password_hash(username: &str, password_hash: &str) -> Result<()> {
    apply(&store_path(), |users| {
        let user = users
            .iter_mut()
            .find(|user| user.username == username)
            .ok_or_else(|| anyhow!("User '{username}' not found"))?;
        user.password_hash = password_hash.into();
        Ok(())
    })
}

pub fn touch_login(username: &str) -> Result<()> {
    apply(&store_path(), |users| {
        if let Some(user) = users.iter_mut().find(|user| user.username == username) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::Scratch;

    fn sample(username: &str, role: Role) -> User {
        User {
            username: username.into(),
            password_hash: "ab".repeat(32),
            role,
            last_login: None,
        }
    }

    #[test]
    fn test_add_and_duplicate() {
        let scratch = Scratch::new();
        let path = scratch.file("users.json");

        add_in(&path, sample("admin", Role::Admin)).unwrap();
        assert!(add_in(&path, sample("admin", Role::Admin)).is_err());
    }

    #[test]
    fn test_last_admin_protected() {
        let scratch = Scratch::new();
        let path = scratch.file("users.json");

        add_in(&path, sample("admin", Role::Admin)).unwrap();
        add_in(&path, sample("viewer", Role::User)).unwrap();

        assert!(remove_in(&path, "admin").is_err());
        remove_in(&path, "viewer").unwrap();

        add_in(&path, sample("admin2", Role::Admin)).unwrap();
        remove_in(&path, "admin").unwrap();
        assert_eq!(load_from(&path).unwrap().len(), 1);
    }
}
