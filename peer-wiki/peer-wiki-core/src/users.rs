//! User accounts, persisted as `users.json`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, WikiError};
use crate::persist;
use crate::rights::RightRule;

pub const GUEST_EMAIL: &str = "guest";
pub const PORTAL_USER_NAME: &str = "Peer Learner";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Local,
    Hku,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub provider: Provider,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default)]
    pub rights: Vec<RightRule>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    fn new(email: &str, provider: Provider, name: &str, rights: Vec<RightRule>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            provider,
            name: name.to_string(),
            password: None,
            rights,
            created_at: Utc::now(),
            last_login: None,
        }
    }

    pub fn is_guest(&self) -> bool {
        self.provider == Provider::Local && self.email == GUEST_EMAIL
    }
}

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

pub struct UserStore {
    file: PathBuf,
    users: RwLock<BTreeMap<String, User>>,
}

impl UserStore {
    pub fn open(file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        let list: Vec<User> = persist::load_json(&file)?;
        Ok(Self {
            file,
            users: RwLock::new(list.into_iter().map(|u| (u.id.clone(), u)).collect()),
        })
    }

    fn save(&self, users: &BTreeMap<String, User>) -> Result<()> {
        let list: Vec<&User> = users.values().collect();
        persist::save_json(&self.file, &list)
    }

    fn find(users: &BTreeMap<String, User>, email: &str, provider: Provider) -> Option<String> {
        users
            .values()
            .find(|u| u.provider == provider && u.email == email)
            .map(|u| u.id.clone())
    }

    pub fn get(&self, id: &str) -> Option<User> {
        self.users.read().get(id).cloned()
    }

    pub fn find_by_email(&self, email: &str, provider: Provider) -> Option<User> {
        let users = self.users.read();
        Self::find(&users, email, provider).and_then(|id| users.get(&id).cloned())
    }

    /// Create or refresh the guest account. Its read right is denied
    /// unless the wiki is public.
    pub fn ensure_guest(&self, public: bool) -> Result<User> {
        let rights = vec![RightRule {
            deny: !public,
            ..RightRule::allow("read", "/")
        }];
        let mut users = self.users.write();
        let user = match Self::find(&users, GUEST_EMAIL, Provider::Local) {
            Some(id) => {
                let user = users
                    .get_mut(&id)
                    .ok_or_else(|| WikiError::NotFound(id.clone()))?;
                user.rights = rights;
                user.clone()
            }
            None => {
                let user = User::new(GUEST_EMAIL, Provider::Local, "Guest", rights);
                users.insert(user.id.clone(), user.clone());
                user
            }
        };
        self.save(&users)?;
        Ok(user)
    }

    pub fn guest(&self) -> Option<User> {
        self.find_by_email(GUEST_EMAIL, Provider::Local)
    }

    /// Bootstrap administrator; the password is reset on every call.
    pub fn ensure_admin(&self, email: &str, password: &str) -> Result<User> {
        let hash = hash_password(password)?;
        let mut users = self.users.write();
        let user = match Self::find(&users, email, Provider::Local) {
            Some(id) => {
                let user = users
                    .get_mut(&id)
                    .ok_or_else(|| WikiError::NotFound(id.clone()))?;
                user.password = Some(hash);
                user.rights = vec![RightRule::allow("admin", "/")];
                user.clone()
            }
            None => {
                let mut user = User::new(
                    email,
                    Provider::Local,
                    "Administrator",
                    vec![RightRule::allow("admin", "/")],
                );
                user.password = Some(hash);
                info!(email, "created administrator account");
                users.insert(user.id.clone(), user.clone());
                user
            }
        };
        self.save(&users)?;
        Ok(user)
    }

    pub fn create_local(&self, email: &str, name: &str, password: &str, rights: Vec<RightRule>) -> Result<User> {
        let hash = hash_password(password)?;
        let mut users = self.users.write();
        if Self::find(&users, email, Provider::Local).is_some() {
            return Err(WikiError::AlreadyExists(email.to_string()));
        }
        let mut user = User::new(email, Provider::Local, name, rights);
        user.password = Some(hash);
        users.insert(user.id.clone(), user.clone());
        self.save(&users)?;
        Ok(user)
    }

    /// Check local credentials. Every failure looks the same to the caller.
    pub fn verify_local(&self, email: &str, password: &str) -> Result<User> {
        let user = self
            .find_by_email(email, Provider::Local)
            .filter(|u| !u.is_guest())
            .ok_or(WikiError::InvalidLogin)?;
        let hash = user.password.as_deref().ok_or(WikiError::InvalidLogin)?;
        if !verify_password(password, hash) {
            return Err(WikiError::InvalidLogin);
        }
        self.touch_login(&user.id)
    }

    /// Account for a portal-authenticated uid, created on first sight with
    /// write access to the whole wiki.
    pub fn find_or_create_portal_user(&self, uid: &str, domain: &str) -> Result<User> {
        let email = format!("{uid}@{domain}");
        let id = {
            let mut users = self.users.write();
            match Self::find(&users, &email, Provider::Hku) {
                Some(id) => id,
                None => {
                    let user = User::new(
                        &email,
                        Provider::Hku,
                        PORTAL_USER_NAME,
                        vec![RightRule::allow("write", "/")],
                    );
                    info!(%email, "created portal account");
                    let id = user.id.clone();
                    users.insert(id.clone(), user);
                    self.save(&users)?;
                    id
                }
            }
        };
        self.touch_login(&id)
    }

    pub fn touch_login(&self, id: &str) -> Result<User> {
        let mut users = self.users.write();
        let user = users
            .get_mut(id)
            .ok_or_else(|| WikiError::NotFound(id.to_string()))?;
        user.last_login = Some(Utc::now());
        let user = user.clone();
        self.save(&users)?;
        Ok(user)
    }

    pub fn len(&self) -> usize {
        self.users.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.read().is_empty()
    }
}
