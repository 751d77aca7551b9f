use anyhow::{bail, Context, Result};
use colored::*;
use std::fmt::Display;
use std::path::Path;
use std::sync::Arc;

use crate::api::Services;
use crate::auth::models::{RegisterRequest, User};
use crate::auth::session::SessionContext;
use crate::auth::token_store::MemoryTokenStore;
use crate::config::Config;

const TEST_PASSWORD: &str = "testpassword123";

/// Tally of the checks run so far.
#[derive(Default)]
struct Report {
    passed: usize,
    failed: usize,
}

impl Report {
    fn record<T, E: Display>(&mut self, step: &str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => {
                self.passed += 1;
                println!("{}  {}", "✅".green(), step);
                Some(value)
            }
            Err(e) => {
                self.failed += 1;
                println!("{}  {}: {}", "❌".red(), step, e.to_string().red());
                None
            }
        }
    }
}

pub async fn execute(register: bool, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load(config_path)?;
    let mut report = Report::default();

    println!("{}  Checking services", "🩺".cyan());
    println!("  auth:      {}", config.auth_api_url.blue());
    println!("  documents: {}", config.docs_api_url.blue());
    println!("  analysis:  {}\n", config.analysis_api_url.blue());

    let services = if register {
        // Throw-away user, nothing touches the stored session
        let session = Arc::new(SessionContext::load(MemoryTokenStore::new()));
        let services =
            Services::new(&config, session).context("Failed to create HTTP clients")?;
        register_test_user(&services, &mut report).await;
        services
    } else {
        Services::from_config(&config)?
    };

    let user = report.record(
        "Current user",
        services.auth.client().current_user().await.map(|user: User| {
            println!("     signed in as {} (id {})", user.username, user.id);
            user
        }),
    );

    let documents = report.record("List all documents", services.documents.list(0, 10).await);
    if let Some(page) = &documents {
        println!("     {} document(s) visible", page.total);
    }

    if let Some(user) = &user {
        let owned = services.documents.list_by_owner(user.id, 0, 10).await;
        if let Some(page) = report.record("List own documents", owned) {
            println!("     {} document(s) owned", page.total);
        }
    }

    match documents.as_ref().and_then(|page| page.documents.first()) {
        Some(first) => {
            let status = services.analysis.document_status(first.id).await;
            if let Some(status) = report.record("Analysis status of first document", status) {
                println!("     document {} is {}", status.document_id, status.status);
            }
        }
        None => println!("{}  Analysis status: no document to check", "➖".dimmed()),
    }

    println!(
        "\n  {} passed, {} failed",
        report.passed.to_string().green(),
        report.failed.to_string().red()
    );

    if report.failed > 0 {
        bail!("{} of {} checks failed", report.failed, report.passed + report.failed);
    }
    Ok(())
}

async fn register_test_user(services: &Services, report: &mut Report) {
    let username = format!("test_{}", chrono::Utc::now().timestamp_millis());
    let request = RegisterRequest {
        first_name: "Test".to_string(),
        last_name: "User".to_string(),
        username: username.clone(),
        email: format!("{}@example.com", username),
        password: TEST_PASSWORD.to_string(),
    };

    if report
        .record(&format!("Register {}", username), services.auth.register(&request).await)
        .is_some()
    {
        report.record(
            "Log in test user",
            services.auth.login(&username, TEST_PASSWORD).await,
        );
    }
}
