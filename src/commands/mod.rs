pub mod analyze;
pub mod auth;
pub mod completions;
pub mod config;
pub mod diagnose;
pub mod document;

use anyhow::{bail, Result};
use std::path::Path;

use crate::api::Services;
use crate::auth::models::User;
use crate::config::Config;

/// Configuration plus service clients bound to the stored session.
pub(crate) fn connect(config_path: Option<&Path>) -> Result<(Config, Services)> {
    let config = Config::load(config_path)?;
    let services = Services::from_config(&config)?;
    Ok((config, services))
}

/// The stored user, without contacting the auth service.
pub(crate) async fn require_user(services: &Services) -> Result<User> {
    match services.auth.state().await.user() {
        Some(user) => Ok(user.clone()),
        None => bail!("Not authenticated. Run 'docscan auth login' to sign in"),
    }
}
