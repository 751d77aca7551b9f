use crate::cli::ConfigAction;
use crate::config::Config;
use anyhow::Result;
use colored::*;
use std::path::Path;

use crate::auth::token_store::FileTokenStore;

pub fn execute(action: &ConfigAction, config_path: Option<&Path>) -> Result<()> {
    let path = match config_path {
        Some(path) => path.to_path_buf(),
        None => Config::get_config_path()?,
    };

    match action {
        ConfigAction::Show => show(&path)?,
        ConfigAction::Set { key, value } => {
            // Environment overrides are never written back
            let mut config = Config::load_file(&path)?;
            config.set(key, value)?;
            config.save_to(&path)?;

            println!(
                "{}  Configuration updated: {} = {}",
                "✓".green(),
                key.cyan(),
                value.yellow()
            );
        }
        ConfigAction::Reset => {
            Config::reset(&path)?;
            println!("{}  Configuration reset to defaults", "✓".green());
        }
    }

    Ok(())
}

fn show(path: &Path) -> Result<()> {
    let config = Config::load(Some(path))?;
    let session_store = FileTokenStore::new(config.session_file.clone())?;

    println!("{}  Current Configuration:", "⚙️".cyan());
    println!();

    let rows = [
        ("Auth API:", config.auth_api_url.clone()),
        ("Documents API:", config.docs_api_url.clone()),
        ("Analysis API:", config.analysis_api_url.clone()),
        ("Request timeout:", format!("{}s", config.request_timeout_secs)),
        ("Default language:", config.default_language.to_string()),
        (
            "Upload polling:",
            describe_polling(
                config.polling.upload_interval_secs,
                config.polling.upload_max_attempts,
            ),
        ),
        (
            "Analysis polling:",
            describe_polling(
                config.polling.analysis_interval_secs,
                config.polling.analysis_max_attempts,
            ),
        ),
    ];
    for (label, value) in rows {
        println!("  {} {}", label.white().bold(), value.yellow());
    }

    println!(
        "  {} {}",
        "Color Output:".white().bold(),
        if config.color_output {
            "enabled".green()
        } else {
            "disabled".red()
        }
    );

    println!("\n  Config file: {}", path.display().to_string().blue());
    println!(
        "  Session file: {}",
        session_store.path().display().to_string().blue()
    );

    Ok(())
}

fn describe_polling(interval_secs: u64, max_attempts: u32) -> String {
    if max_attempts == 0 {
        format!("every {}s, until finished", interval_secs)
    } else {
        format!("every {}s, up to {} checks", interval_secs, max_attempts)
    }
}
