//! Process-wide session shared by every service client.
//!
//! All writes go through [`SessionContext::write`], which bumps a monotonic
//! version. A writer that read the session earlier can make its write
//! conditional on that version so it never overwrites a newer session.

use anyhow::Result;
use tokio::sync::{Mutex, MutexGuard, RwLock};

use super::models::{TokenPair, User};
use super::token_store::{SessionStorage, StoredSession};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub version: u64,
    pub session: StoredSession,
}

impl SessionSnapshot {
    pub fn access_token(&self) -> Option<&str> {
        self.session.access_token.as_deref()
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.session.refresh_token.as_deref()
    }

    pub fn user(&self) -> Option<&User> {
        self.session.user.as_ref()
    }
}

pub struct SessionContext {
    storage: Box<dyn SessionStorage>,
    state: RwLock<SessionSnapshot>,
    refresh_lock: Mutex<()>,
}

impl SessionContext {
    /// Loads the persisted session. An unreadable session file is treated as
    /// logged out rather than as a fatal error.
    pub fn load(storage: impl SessionStorage + 'static) -> Self {
        let session = match storage.load() {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!("Ignoring unreadable session: {:#}", e);
                StoredSession::default()
            }
        };

        Self {
            storage: Box::new(storage),
            state: RwLock::new(SessionSnapshot { version: 0, session }),
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        self.state.read().await.clone()
    }

    /// Replaces the whole session in one write (login).
    pub async fn replace(&self, session: StoredSession) -> Result<u64> {
        let version = self.write(None, move |current| *current = session).await?;
        Ok(version.unwrap_or_default())
    }

    pub async fn set_user(&self, user: User) -> Result<u64> {
        let version = self.write(None, move |current| current.user = Some(user)).await?;
        Ok(version.unwrap_or_default())
    }

    /// Stores refreshed tokens if the session is still the one the refresh
    /// was started from. Returns the new version, or `None` when the tokens
    /// were discarded.
    pub async fn apply_refresh(&self, observed: u64, tokens: &TokenPair) -> Result<Option<u64>> {
        let written = self
            .write(Some(observed), |current| {
                current.access_token = Some(tokens.access_token.clone());
                current.refresh_token = Some(tokens.refresh_token.clone());
            })
            .await?;

        if written.is_none() {
            tracing::warn!("Discarding refreshed tokens: session changed during refresh");
        }
        Ok(written)
    }

    pub async fn clear(&self) -> Result<u64> {
        let version = self
            .write(None, |current| *current = StoredSession::default())
            .await?;
        Ok(version.unwrap_or_default())
    }

    /// Clears the session unless it changed since `observed`.
    pub async fn clear_if_current(&self, observed: u64) -> Result<bool> {
        let written = self
            .write(Some(observed), |current| *current = StoredSession::default())
            .await?;
        Ok(written.is_some())
    }

    /// Serialises token refreshes across all clients sharing this session.
    pub(crate) async fn refresh_guard(&self) -> MutexGuard<'_, ()> {
        self.refresh_lock.lock().await
    }

    /// The single writer. `expected` makes the write conditional on the
    /// current version; `None` means unconditional. Returns the new version,
    /// or `None` if the condition did not hold.
    async fn write<F>(&self, expected: Option<u64>, update: F) -> Result<Option<u64>>
    where
        F: FnOnce(&mut StoredSession),
    {
        let mut state = self.state.write().await;

        if let Some(expected) = expected {
            if state.version != expected {
                return Ok(None);
            }
        }

        let mut next = state.session.clone();
        update(&mut next);

        if next.is_empty() {
            self.storage.clear()?;
        } else {
            self.storage.save(&next)?;
        }

        state.session = next;
        state.version += 1;
        tracing::debug!("Session updated to version {}", state.version);

        Ok(Some(state.version))
    }
}
