//! User directory snapshots: `user id → display name, title, role, team`.
//!
//! Same read-mostly model as the keyword dictionary: lookups take an `Arc`
//! snapshot, reloads swap it wholesale.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::classifier::Team;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    #[default]
    User,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    pub display_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub team: Option<Team>,
}

impl UserRecord {
    /// "Name (Title)" label used in user-facing notifications, falling back
    /// to the name alone when no title is on file.
    pub fn label(&self) -> String {
        if self.title.is_empty() {
            self.display_name.clone()
        } else {
            format!("{} ({})", self.display_name, self.title)
        }
    }
}

/// One consistent view of the directory.
#[derive(Debug, Clone, Default)]
pub struct DirectorySnapshot {
    users: HashMap<String, UserRecord>,
}

impl DirectorySnapshot {
    pub fn from_users(users: HashMap<String, UserRecord>) -> Self {
        Self { users }
    }

    pub fn get(&self, user_id: &str) -> Option<&UserRecord> {
        self.users.get(user_id)
    }

    /// Display name for notifications; unknown users fall back to their id.
    pub fn display_name(&self, user_id: &str) -> String {
        self.get(user_id)
            .map(|u| u.display_name.clone())
            .unwrap_or_else(|| user_id.to_string())
    }

    /// "Name (Title)" label, falling back to the raw id.
    pub fn label(&self, user_id: &str) -> String {
        self.get(user_id)
            .map(UserRecord::label)
            .unwrap_or_else(|| user_id.to_string())
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.get(user_id).map(|u| u.role == Role::Admin).unwrap_or(false)
    }
}

pub struct UserDirectory {
    path: PathBuf,
    current: RwLock<Arc<DirectorySnapshot>>,
}

impl UserDirectory {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let snapshot = Self::read_file(&path);
        Self {
            path,
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    fn read_file(path: &Path) -> DirectorySnapshot {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<HashMap<String, UserRecord>>(&raw) {
                Ok(users) => {
                    info!("user directory loaded: {} user(s)", users.len());
                    DirectorySnapshot::from_users(users)
                }
                Err(e) => {
                    error!("user directory {} is malformed: {e}", path.display());
                    DirectorySnapshot::default()
                }
            },
            Err(e) => {
                error!("could not read user directory {}: {e}", path.display());
                DirectorySnapshot::default()
            }
        }
    }

    pub fn snapshot(&self) -> Arc<DirectorySnapshot> {
        self.current.read().expect("directory lock poisoned").clone()
    }

    pub fn reload(&self) {
        let snapshot = Arc::new(Self::read_file(&self.path));
        *self.current.write().expect("directory lock poisoned") = snapshot;
        info!("user directory reloaded from {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn load_and_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "521111@c.us": {{
                    "display_name": "Carlos",
                    "title": "Gerente IT",
                    "role": "admin",
                    "team": "it"
                }},
                "522222@c.us": {{ "display_name": "Paola" }}
            }}"#
        )
        .unwrap();

        let dir = UserDirectory::load(file.path());
        let snap = dir.snapshot();

        assert!(snap.is_admin("521111@c.us"));
        assert_eq!(snap.get("521111@c.us").unwrap().team, Some(Team::It));
        assert_eq!(snap.label("521111@c.us"), "Carlos (Gerente IT)");
        assert_eq!(snap.label("522222@c.us"), "Paola");
        assert!(!snap.is_admin("522222@c.us"));
    }

    #[test]
    fn unknown_user_falls_back_to_id() {
        let snap = DirectorySnapshot::default();
        assert_eq!(snap.display_name("unknown@c.us"), "unknown@c.us");
        assert!(!snap.is_admin("unknown@c.us"));
    }
}
