use anyhow::{bail, Context, Result};
use colored::*;
use dialoguer::{theme::ColorfulTheme, Input};
use std::path::Path;

use super::connect;
use crate::auth::models::{AuthState, RegisterRequest, User};
use crate::cli::AuthAction;
use crate::utils::progress::create_spinner;

pub async fn execute(action: &AuthAction, config_path: Option<&Path>) -> Result<()> {
    let (_config, services) = connect(config_path)?;
    let auth = &services.auth;

    match action {
        AuthAction::Register {
            username,
            email,
            first_name,
            last_name,
        } => {
            let theme = ColorfulTheme::default();
            let request = RegisterRequest {
                first_name: prompt_missing(&theme, first_name, "First name")?,
                last_name: prompt_missing(&theme, last_name, "Last name")?,
                username: prompt_missing(&theme, username, "Username")?,
                email: match email {
                    Some(email) => email.clone(),
                    None => Input::<String>::with_theme(&theme)
                        .with_prompt("Email")
                        .validate_with(|input: &String| -> Result<(), &str> {
                            if input.contains('@') && input.contains('.') {
                                Ok(())
                            } else {
                                Err("Please enter a valid email address")
                            }
                        })
                        .interact_text()?,
                },
                password: new_password()?,
            };

            auth.register(&request)
                .await
                .context("Registration failed")?;

            println!("{}  Account {} created", "✓".green(), request.username.cyan());
            println!("  Run {} to sign in", "docscan auth login".cyan());
        }
        AuthAction::Login {
            username,
            password_env,
        } => {
            let theme = ColorfulTheme::default();
            let username = prompt_missing(&theme, username, "Username")?;
            let password = match password_env {
                Some(var) => std::env::var(var)
                    .with_context(|| format!("Environment variable {} is not set", var))?,
                None => rpassword::prompt_password("Password: ").context("Failed to read password")?,
            };

            let spinner = create_spinner("Authenticating...");
            let result = auth.login(&username, &password).await;
            spinner.finish_and_clear();

            let user = result?;
            println!("{}  Successfully authenticated!", "✓".green());
            println!("  Welcome, {}", user.display_name().bold());
        }
        AuthAction::Logout => {
            auth.logout().await?;
            println!("{}  Successfully logged out", "✓".green());
        }
        AuthAction::Status { offline } => {
            let state = if *offline {
                auth.state().await
            } else {
                auth.restore().await?
            };

            match state {
                AuthState::Authenticated(user) => {
                    println!(
                        "{}  Authentication Status: {}",
                        "🔐".green(),
                        "AUTHENTICATED".green().bold()
                    );
                    print_user(&user);
                    if *offline {
                        println!("  {}", "(stored session, not verified)".dimmed());
                    }
                }
                AuthState::LoggedOut => {
                    println!(
                        "{}  Authentication Status: {}",
                        "🔐".red(),
                        "NOT AUTHENTICATED".red().bold()
                    );
                    println!("  Run {} to authenticate", "docscan auth login".cyan());
                }
            }
        }
        AuthAction::Refresh => {
            if auth.refresh().await? {
                println!("{}  Session refreshed", "✓".green());
            } else {
                println!(
                    "{}  Session changed during refresh, new tokens were discarded",
                    "⚠".yellow()
                );
            }
        }
    }

    Ok(())
}

fn prompt_missing(theme: &ColorfulTheme, value: &Option<String>, prompt: &str) -> Result<String> {
    match value {
        Some(value) => Ok(value.clone()),
        None => Ok(Input::<String>::with_theme(theme).with_prompt(prompt).interact_text()?),
    }
}

fn new_password() -> Result<String> {
    let password = rpassword::prompt_password("Password: ").context("Failed to read password")?;
    if password.is_empty() {
        bail!("Password must not be empty");
    }

    let confirmation =
        rpassword::prompt_password("Confirm password: ").context("Failed to read password")?;
    if password != confirmation {
        bail!("Passwords do not match");
    }

    Ok(password)
}

fn print_user(user: &User) {
    println!("  {} {}", "User:".white().bold(), user.display_name().yellow());
    println!("  {} {}", "ID:".white().bold(), user.id);
    if let Some(email) = &user.email {
        println!("  {} {}", "Email:".white().bold(), email);
    }
    if user.is_admin == Some(true) {
        println!("  {} {}", "Role:".white().bold(), "admin".magenta());
    }
    if let Some(verified) = user.is_verified {
        println!(
            "  {} {}",
            "Verified:".white().bold(),
            if verified { "yes".green() } else { "no".red() }
        );
    }
}
