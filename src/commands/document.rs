use anyhow::{bail, Result};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use std::path::Path;

use super::{connect, require_user};
use crate::api::analysis::{AnalysisProgress, DocumentAnalysisStatus};
use crate::api::documents::{Document, UploadOutcome, UploadTaskStatus};
use crate::api::polling::{PollPhase, TaskPoller};
use crate::api::Services;
use crate::cli::DocumentAction;
use crate::config::Config;
use crate::error::ApiError;
use crate::utils::progress::{create_spinner, format_bytes, format_task_state, poll_message};
use crate::utils::{cancel_on_ctrl_c, humanize_timestamp};

pub async fn execute(action: &DocumentAction, config_path: Option<&Path>) -> Result<()> {
    let (config, services) = connect(config_path)?;

    match action {
        DocumentAction::Upload { file, no_wait } => upload(&config, &services, file, *no_wait).await,
        DocumentAction::List { all, skip, limit } => list(&services, *all, *skip, *limit).await,
        DocumentAction::Chunks { id, skip, limit } => {
            let page = services.documents.chunks(*id, *skip, *limit).await?;

            println!(
                "{}  Document {} has {} chunk(s), showing {}",
                "📄".cyan(),
                id.to_string().bold(),
                page.total,
                page.chunks.len()
            );
            for chunk in &page.chunks {
                println!(
                    "\n{} {}",
                    format!("#{}", chunk.chunk_index).yellow().bold(),
                    format!("(chunk {})", chunk.id).dimmed()
                );
                println!("{}", chunk.content.trim());
            }
            Ok(())
        }
        DocumentAction::Task { task_id, wait } => {
            if *wait {
                let user = require_user(&services).await?;
                track(&config, &services, task_id, user.id).await
            } else {
                let status = services.documents.task_status(task_id).await?;
                print_task(&status);
                Ok(())
            }
        }
    }
}

async fn upload(config: &Config, services: &Services, file: &Path, no_wait: bool) -> Result<()> {
    let user = require_user(services).await?;

    let spinner = create_spinner(&format!("Uploading {}...", file.display()));
    let accepted = services.documents.upload(file, user.id).await;
    spinner.finish_and_clear();
    let accepted = accepted?;

    println!(
        "{}  Upload accepted: task {} ({})",
        "📤".cyan(),
        accepted.task_id.yellow(),
        accepted.status
    );
    if !accepted.message.is_empty() {
        println!("  {}", accepted.message);
    }

    if no_wait {
        println!(
            "  Follow it with {}",
            format!("docscan document task {} --wait", accepted.task_id).cyan()
        );
        return Ok(());
    }

    track(config, services, &accepted.task_id, user.id).await
}

async fn track(config: &Config, services: &Services, task_id: &str, owner_id: i64) -> Result<()> {
    let poller = TaskPoller::new(config.upload_polling());
    let _interrupt = cancel_on_ctrl_c(poller.cancellation());

    let spinner = create_spinner("Processing document...");
    let observer = spinner.clone();
    let outcome = services
        .documents
        .track_upload(task_id, owner_id, &poller, move |status, phase| {
            if let PollPhase::Polling { .. } = phase {
                observer.set_message(poll_message(status.state, phase, status.status.as_deref()));
            }
        })
        .await;
    spinner.finish_and_clear();

    match outcome? {
        UploadOutcome::Completed { status, document } => {
            println!("{}  Document processed", "✅".green());
            if let Some(progress) = &status.result {
                if let Some(chunks) = progress.num_chunks {
                    println!("  {} {}", "Chunks:".white().bold(), chunks);
                }
            }
            match document {
                Some(document) => print_document(&document),
                None => {
                    if let Some(id) = status.document_id() {
                        println!("  {} {}", "Document ID:".white().bold(), id);
                    }
                }
            }
            Ok(())
        }
        UploadOutcome::Failed { message } => bail!("Document processing failed: {}", message),
        UploadOutcome::TimedOut { attempts } => bail!(
            "Operation timed out after {} status checks. Check later with 'docscan document task {}'",
            attempts,
            task_id
        ),
        UploadOutcome::Cancelled => {
            println!(
                "{}  Stopped waiting. The document keeps processing on the server (task {})",
                "⚠".yellow(),
                task_id
            );
            Ok(())
        }
    }
}

async fn list(services: &Services, all: bool, skip: u32, limit: u32) -> Result<()> {
    let page = if all {
        services.documents.list(skip, limit).await?
    } else {
        let user = require_user(services).await?;
        services.documents.list_by_owner(user.id, skip, limit).await?
    };

    if page.documents.is_empty() {
        println!("{}  No documents found", "📭".yellow());
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["ID", "Filename", "Status", "Size", "Uploaded", "Analysis"]);

    for document in &page.documents {
        // A failing status lookup only affects its own row
        let analysis = services.analysis.document_status(document.id).await;

        table.add_row(vec![
            Cell::new(document.id),
            Cell::new(&document.filename),
            Cell::new(&document.status),
            Cell::new(document.file_size.map(format_bytes).unwrap_or_else(|| "-".to_string())),
            Cell::new(humanize_timestamp(document.created_at.as_deref())),
            analysis_cell(&analysis),
        ]);
    }

    println!("{table}");
    println!(
        "  Showing {} of {} document(s) (skip {}, limit {})",
        page.documents.len(),
        page.total,
        page.skip,
        page.limit
    );

    Ok(())
}

fn analysis_cell(status: &Result<DocumentAnalysisStatus, ApiError>) -> Cell {
    match status {
        Ok(status) => match status.status {
            AnalysisProgress::Completed => {
                Cell::new(format!("completed, {} issue(s)", status.issues_count)).fg(Color::Green)
            }
            AnalysisProgress::InProgress => Cell::new("in progress").fg(Color::Yellow),
            AnalysisProgress::NotAnalyzed => Cell::new("not analyzed"),
        },
        Err(e) => {
            tracing::debug!("Analysis status lookup failed: {}", e);
            Cell::new("unavailable").fg(Color::DarkGrey)
        }
    }
}

fn print_document(document: &Document) {
    println!("  {} {}", "Document ID:".white().bold(), document.id);
    println!("  {} {}", "Filename:".white().bold(), document.filename);
    println!("  {} {}", "Status:".white().bold(), document.status);
    if let Some(size) = document.file_size {
        println!("  {} {}", "Size:".white().bold(), format_bytes(size));
    }
    println!(
        "  {} {}",
        "Uploaded:".white().bold(),
        humanize_timestamp(document.created_at.as_deref())
    );
}

fn print_task(status: &UploadTaskStatus) {
    println!("{}  Task {}", "📋".cyan(), status.task_id.yellow());
    println!("  {} {}", "State:".white().bold(), format_task_state(status.state));
    if let Some(detail) = &status.status {
        println!("  {} {}", "Status:".white().bold(), detail);
    }
    if let Some(progress) = status.progress() {
        println!("  {} {:.0}%", "Progress:".white().bold(), progress);
    }
    if let Some(id) = status.document_id() {
        println!("  {} {}", "Document ID:".white().bold(), id);
    }
    if let Some(error) = &status.error {
        println!("  {} {}", "Error:".red().bold(), error);
    }
}
