use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::models::{TokenPair, User};

/// The persisted client session: the three keys kept between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

impl StoredSession {
    pub fn new(tokens: TokenPair, user: User) -> Self {
        Self {
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            user: Some(user),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none() && self.user.is_none()
    }
}

/// Where a session lives between runs.
pub trait SessionStorage: Send + Sync {
    fn load(&self) -> Result<StoredSession>;
    fn save(&self, session: &StoredSession) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

/// JSON file in the user's data directory, readable only by the owner.
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        let path = match path {
            Some(path) => path,
            None => Self::default_path()?,
        };
        Ok(Self { path })
    }

    pub fn default_path() -> Result<PathBuf> {
        let data_dir = directories::ProjectDirs::from("dev", "docscan", "docscan")
            .context("Failed to get data directory")?
            .data_dir()
            .to_path_buf();

        Ok(data_dir.join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SessionStorage for FileTokenStore {
    fn load(&self) -> Result<StoredSession> {
        if !self.path.exists() {
            return Ok(StoredSession::default());
        }

        let contents = fs::read_to_string(&self.path).context("Failed to read session file")?;

        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create session directory")?;
        }

        let json = serde_json::to_string_pretty(session)?;
        fs::write(&self.path, json).context("Failed to write session file")?;

        // Owner read/write only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(&self.path)?.permissions();
            perms.set_mode(0o600);
            fs::set_permissions(&self.path, perms)?;
        }

        Ok(())
    }

    fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path).context("Failed to remove session file")?;
        }

        Ok(())
    }
}

/// Session storage that never touches disk.
#[derive(Default)]
pub struct MemoryTokenStore {
    session: Mutex<StoredSession>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with_session(session: StoredSession) -> Self {
        Self {
            session: Mutex::new(session),
        }
    }
}

impl SessionStorage for MemoryTokenStore {
    fn load(&self) -> Result<StoredSession> {
        let guard = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("Session lock poisoned"))?;
        Ok(guard.clone())
    }

    fn save(&self, session: &StoredSession) -> Result<()> {
        let mut guard = self
            .session
            .lock()
            .map_err(|_| anyhow::anyhow!("Session lock poisoned"))?;
        *guard = session.clone();
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.save(&StoredSession::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_session() -> StoredSession {
        StoredSession::new(
            TokenPair {
                access_token: "access-1".to_string(),
                refresh_token: "refresh-1".to_string(),
                token_type: "bearer".to_string(),
            },
            User {
                id: 7,
                username: "amina".to_string(),
                first_name: None,
                last_name: None,
                email: Some("amina@example.com".to_string()),
                is_admin: None,
                is_verified: Some(true),
            },
        )
    }

    #[test]
    fn missing_file_loads_empty_session() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(Some(dir.path().join("session.json"))).unwrap();

        let session = store.load().unwrap();
        assert!(session.is_empty());
    }

    #[test]
    fn file_store_persists_all_three_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let store = FileTokenStore::new(Some(path.clone())).unwrap();

        store.save(&sample_session()).unwrap();

        let reopened = FileTokenStore::new(Some(path)).unwrap();
        assert_eq!(reopened.load().unwrap(), sample_session());
    }

    #[cfg(unix)]
    #[test]
    fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(Some(dir.path().join("session.json"))).unwrap();
        store.save(&sample_session()).unwrap();

        let mode = fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn clear_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = FileTokenStore::new(Some(dir.path().join("session.json"))).unwrap();
        store.save(&sample_session()).unwrap();

        store.clear().unwrap();

        assert!(!store.path().exists());
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn memory_store_round_trips() {
        let store = MemoryTokenStore::new();
        store.save(&sample_session()).unwrap();
        assert_eq!(store.load().unwrap().user.unwrap().id, 7);

        store.clear().unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}
