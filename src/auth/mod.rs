pub mod client;
pub mod models;
pub mod session;
pub mod token_store;

use std::sync::Arc;

use self::{
    client::AuthClient,
    models::{AuthState, RegisterRequest, User},
    session::SessionContext,
    token_store::StoredSession,
};
use crate::error::ApiError;

/// Owns the sign-in lifecycle of the shared session.
pub struct AuthManager {
    client: AuthClient,
}

impl AuthManager {
    pub fn new(client: AuthClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &AuthClient {
        &self.client
    }

    fn session(&self) -> &Arc<SessionContext> {
        self.client.http().session()
    }

    /// Verifies a persisted session against the auth service. Any failure
    /// (network, 401, unexpected payload) signs the user out.
    pub async fn restore(&self) -> Result<AuthState, ApiError> {
        let snapshot = self.session().snapshot().await;
        if snapshot.user().is_none() || snapshot.access_token().is_none() {
            return Ok(AuthState::LoggedOut);
        }

        match self.client.current_user().await {
            Ok(user) => {
                self.session().set_user(user.clone()).await?;
                tracing::info!("Session restored for {}", user.username);
                Ok(AuthState::Authenticated(user))
            }
            Err(e) => {
                if e.is_unauthenticated() {
                    tracing::info!("Stored session has expired");
                } else {
                    tracing::info!("Could not verify stored session: {}", e);
                }
                self.session().clear().await?;
                Ok(AuthState::LoggedOut)
            }
        }
    }

    /// Signs in and writes tokens and profile in a single session update.
    pub async fn login(&self, username: &str, password: &str) -> Result<User, ApiError> {
        let tokens = self.client.login(username, password).await?;
        let user = self.client.current_user_with(&tokens.access_token).await?;

        self.session()
            .replace(StoredSession::new(tokens, user.clone()))
            .await?;
        tracing::info!("Logged in as {}", user.username);

        Ok(user)
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        self.client.register(request).await
    }

    /// Exchanges the stored refresh token for a new pair. Returns `false`
    /// when the session changed while the refresh was in flight and the
    /// new tokens were discarded.
    pub async fn refresh(&self) -> Result<bool, ApiError> {
        let _guard = self.session().refresh_guard().await;
        let snapshot = self.session().snapshot().await;
        let refresh_token = snapshot.refresh_token().ok_or(ApiError::Unauthenticated)?;

        match self.client.refresh(refresh_token).await {
            Ok(tokens) => Ok(self
                .session()
                .apply_refresh(snapshot.version, &tokens)
                .await?
                .is_some()),
            Err(e) => {
                self.session().clear_if_current(snapshot.version).await?;
                Err(e)
            }
        }
    }

    /// Invalidates the refresh token server-side when possible; the local
    /// session is cleared either way.
    pub async fn logout(&self) -> Result<(), ApiError> {
        let snapshot = self.session().snapshot().await;

        if let Some(refresh_token) = snapshot.refresh_token() {
            if let Err(e) = self.client.logout(refresh_token).await {
                tracing::warn!("Server-side logout failed, clearing local session anyway: {}", e);
            }
        }

        self.session().clear().await?;
        tracing::info!("Logged out");
        Ok(())
    }

    /// The stored state, without asking the server.
    pub async fn state(&self) -> AuthState {
        let snapshot = self.session().snapshot().await;
        match (snapshot.user(), snapshot.access_token()) {
            (Some(user), Some(_)) => AuthState::Authenticated(user.clone()),
            _ => AuthState::LoggedOut,
        }
    }
}
