use crate::config;
use crate::store::users::{self, Role, User};

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub const SESSION_TTL_SECS: u64 = 3600;

// token -> session, swept lazily as tokens are looked up
static SESSIONS: Lazy<DashMap<String, Session>> = Lazy::new(DashMap::new);

struct Session {
    username: String,
    role: Role,
    expires: Instant,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid username or password")]
    BadCredentials,
    #[error("{0}")]
    Store(#[from] anyhow::Error),
}

/// Authenticated principal behind a bearer token.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct Identity {
    pub username: String,
    pub role: Role,
}

/// User record with the password hash stripped for API responses.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct UserView {
    pub username: String,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for UserView {
    fn from(user: User) -> Self {
        UserView { username: user.username, role: user.role, last_login: user.last_login }
    }
}

/// SHA-256 hex digest of a password.
pub fn hash_password(password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Checks credentials, stamps `last_login` and opens a one hour session.
pub fn login(username: &str, password: &str) -> Result<(UserView, String), Error> {
    let user = users::find(username)?.ok_or(Error::BadCredentials)?;
    if user.password_hash != hash_password(password) {
        return Err(Error::BadCredentials);
    }

    users::touch_login(username)?;
    let token = Uuid::new_v4().to_string();
    let session = Session {
        username: user.username.clone(),
        role: user.role,
        expires: Instant::now() + Duration::from_secs(SESSION_TTL_SECS),
    };
    SESSIONS.insert(token.clone(), session);

    Ok((UserView::from(user), token))
}

/// Resolves a bearer token to an identity. Expired sessions are dropped on
/// the way through. The static api token from the config acts as a permanent
/// admin credential for programmatic access.
pub fn verify(token: &str) -> Option<Identity> {
    if let Some(session) = SESSIONS.get(token) {
        if session.expires > Instant::now() {
            return Some(Identity { username: session.username.clone(), role: session.role });
        }
        drop(session);
        SESSIONS.remove(token);
        return None;
    }

    match config::read().daemon.web.token {
        Some(api) if !api.is_empty() && api == token => Some(Identity { username: "api".into(), role: Role::Admin }),
        _ => None,
    }
}

/// Forgets a session token. Unknown tokens are ignored.
pub fn logout(token: &str) {
    SESSIONS.remove(token);
}

/// Verifies the current password before storing the replacement hash.
pub fn change_password(username: &str, current: &str, replacement: &str) -> Result<(), Error> {
    let user = users::find(username)?.ok_or(Error::BadCredentials)?;
    if user.password_hash != hash_password(current) {
        return Err(Error::BadCredentials);
    }
    users::set_password_hash(username, &hash_password(replacement))?;
    Ok(())
}

pub fn create_user(username: &str, password: &str, role: Role) -> Result<UserView, Error> {
    let user = User {
        username: username.into(),
        password_hash: hash_password(password),
        role,
        last_login: None,
    };
    Ok(users::add(user)?.into())
}

/// Removes a user and revokes every session they hold.
pub fn remove_user(username: &str) -> Result<(), Error> {
    users::remove(username)?;
    SESSIONS.retain(|_, session| session.username != username);
    Ok(())
}

pub fn list_users() -> Result<Vec<UserView>, Error> {
    Ok(users::list()?.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_is_sha256_hex() {
        let digest = hash_password("password");
        assert_eq!(digest.len(), 64);
        assert_eq!(digest, "5e884898da28047151d0e56f8dc6292773603d0d6aabbdd62a11ef721d1542d8");
        assert_ne!(hash_password("other"), digest);
    }

    #[test]
    fn test_login_and_verify_round_trip() {
        crate::testenv::init();
        create_user("alice", "secret", Role::Admin).unwrap();

        assert!(matches!(login("alice", "wrong"), Err(Error::BadCredentials)));
        assert!(matches!(login("nobody", "secret"), Err(Error::BadCredentials)));

        let (user, token) = login("alice", "secret").unwrap();
        assert_eq!(user.username, "alice");

        let identity = verify(&token).unwrap();
        assert_eq!(identity.username, "alice");
        assert_eq!(identity.role, Role::Admin);

        assert!(verify("not-a-token").is_none());

        logout(&token);
        assert!(verify(&token).is_none());
    }

    #[test]
    fn test_expired_session_is_swept() {
        crate::testenv::init();
        let token = "expired-token".to_string();
        let session = Session {
            username: "ghost".into(),
            role: Role::User,
            expires: Instant::now() - Duration::from_secs(1),
        };
        SESSIONS.insert(token.clone(), session);

        assert!(verify(&token).is_none());
        assert!(!SESSIONS.contains_key(&token));
    }

    #[test]
    fn test_static_api_token_is_admin() {
        crate::testenv::init();
        let identity = verify(crate::testenv::API_TOKEN).unwrap();
        assert_eq!(identity.role, Role::Admin);
    }

    #[test]
    fn test_removed_user_loses_sessions() {
        crate::testenv::init();
        create_user("root-like", "pw", Role::Admin).unwrap();
        create_user("temp", "pw", Role::User).unwrap();

        let (_, token) = login("temp", "pw").unwrap();
        assert!(verify(&token).is_some());

        remove_user("temp").unwrap();
        assert!(verify(&token).is_none());
    }

    #[test]
    fn test_change_password_requires_current() {
        crate::testenv::init();
        create_user("bob", "old-pw", Role::User).unwrap();

        assert!(matches!(change_password("bob", "bad", "new-pw"), Err(Error::BadCredentials)));
        change_password("bob", "old-pw", "new-pw").unwrap();

        assert!(matches!(login("bob", "old-pw"), Err(Error::BadCredentials)));
        login("bob", "new-pw").unwrap();
    }
}
