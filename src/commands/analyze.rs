use anyhow::{bail, Result};
use colored::*;
use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};
use std::path::Path;

use super::connect;
use crate::api::analysis::{
    AnalysisOutcome, AnalysisProgress, AnalysisReport, AnalysisTaskStatus, AnalysisTracker,
    DocumentAnalysisStatus, Severity,
};
use crate::api::polling::PollPhase;
use crate::cli::{AnalyzeAction, OutputFormat};
use crate::utils::progress::{create_spinner, format_task_state, poll_message};
use crate::utils::{cancel_on_ctrl_c, humanize_timestamp};

pub async fn execute(action: &AnalyzeAction, config_path: Option<&Path>) -> Result<()> {
    let (config, services) = connect(config_path)?;

    match action {
        AnalyzeAction::Start {
            document_id,
            language,
            retry,
            no_wait,
        } => {
            let language = language.unwrap_or(config.default_language);

            if *no_wait {
                let accepted = services.analysis.start(*document_id, language, *retry).await?;
                println!(
                    "{}  Analysis {}: task {}",
                    "🔍".cyan(),
                    accepted.status,
                    accepted.task_id.yellow()
                );
                if !accepted.message.is_empty() {
                    println!("  {}", accepted.message);
                }
                println!(
                    "  Check it with {}",
                    format!("docscan analyze task {}", accepted.task_id).cyan()
                );
                return Ok(());
            }

            let spinner = create_spinner(&format!(
                "Analyzing document {} ({})...",
                document_id, language
            ));
            let observer = spinner.clone();

            let mut tracker = AnalysisTracker::new(services.analysis.clone(), config.analysis_polling());
            let accepted = tracker
                .start(*document_id, language, *retry, move |status, phase| {
                    if let PollPhase::Polling { .. } = phase {
                        observer.set_message(poll_message(status.task_status, phase, None));
                    }
                })
                .await;
            let accepted = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    spinner.finish_and_clear();
                    return Err(e.into());
                }
            };
            spinner.println(format!(
                "{}  Analysis queued as task {}",
                "🔍".cyan(),
                accepted.task_id.yellow()
            ));

            let _interrupt = tracker.cancellation().map(cancel_on_ctrl_c);
            let outcome = tracker.wait().await;
            spinner.finish_and_clear();

            match outcome? {
                Some(AnalysisOutcome::Completed {
                    task,
                    document,
                    report,
                }) => {
                    println!("{}  Analysis completed (task {})", "✅".green(), task.task_id);
                    match report {
                        Some(report) => print_report(&report),
                        None => print_document_status(&document),
                    }
                }
                Some(AnalysisOutcome::Failed { message }) => {
                    println!(
                        "  Retry with {}",
                        format!("docscan analyze start {} --retry", document_id).cyan()
                    );
                    bail!("Analysis failed: {}", message);
                }
                Some(AnalysisOutcome::TimedOut { attempts }) => bail!(
                    "Operation timed out after {} status checks. Check later with 'docscan analyze task {}'",
                    attempts,
                    accepted.task_id
                ),
                Some(AnalysisOutcome::Cancelled) | None => {
                    println!(
                        "{}  Stopped waiting. The analysis keeps running on the server (task {})",
                        "⚠".yellow(),
                        accepted.task_id
                    );
                }
            }
        }
        AnalyzeAction::Task { task_id } => {
            let status = services.analysis.task_status(task_id).await?;
            print_task(&status);
        }
        AnalyzeAction::Status { document_id } => {
            let status = services.analysis.document_status(*document_id).await?;
            print_document_status(&status);
        }
        AnalyzeAction::Result {
            document_id,
            format,
        } => {
            let report = services.analysis.result(*document_id).await?;
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print_report(&report),
            }
        }
    }

    Ok(())
}

fn severity_color(severity: Severity) -> Color {
    match severity {
        Severity::Critical => Color::Red,
        Severity::Warning => Color::Yellow,
        Severity::Info => Color::Cyan,
    }
}

fn print_report(report: &AnalysisReport) {
    println!(
        "\n{}  Analysis report for document {}",
        "📊".cyan(),
        report.document_id.to_string().bold()
    );
    if let Some(language) = report.language {
        println!("  {} {}", "Language:".white().bold(), language);
    }
    if let Some(summary) = &report.summary {
        println!("  {} {}", "Summary:".white().bold(), summary);
    }

    println!(
        "  {} {} critical, {} warning, {} info",
        "Issues:".white().bold(),
        report.count(Severity::Critical).to_string().red(),
        report.count(Severity::Warning).to_string().yellow(),
        report.count(Severity::Info).to_string().cyan()
    );

    if report.issues.is_empty() {
        println!("\n  {}", "No issues found".green());
        return;
    }

    let mut issues: Vec<_> = report.issues.iter().collect();
    issues.sort_by_key(|issue| issue.severity);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["#", "Severity", "Issue"]);
    for issue in issues {
        table.add_row(vec![
            Cell::new(issue.id),
            Cell::new(issue.severity).fg(severity_color(issue.severity)),
            Cell::new(&issue.issue),
        ]);
    }
    println!("{table}");
}

fn print_document_status(status: &DocumentAnalysisStatus) {
    let label = match status.status {
        AnalysisProgress::Completed => status.status.to_string().green(),
        AnalysisProgress::InProgress => status.status.to_string().yellow(),
        AnalysisProgress::NotAnalyzed => status.status.to_string().white(),
    };

    println!("{}  Document {}", "📄".cyan(), status.document_id.to_string().bold());
    println!("  {} {}", "Analysis:".white().bold(), label);
    println!("  {} {}", "Issues:".white().bold(), status.issues_count);
    println!(
        "  {} {}",
        "Last analyzed:".white().bold(),
        humanize_timestamp(status.last_analyzed.as_deref())
    );

    if let Some(samples) = status.sample_issues.as_ref().filter(|s| !s.is_empty()) {
        println!("  {}", "Sample issues:".white().bold());
        for sample in samples {
            println!("    • {}", sample);
        }
    }
    if status.has_report() {
        println!(
            "  Full report: {}",
            format!("docscan analyze result {}", status.document_id).cyan()
        );
    }
}

fn print_task(status: &AnalysisTaskStatus) {
    println!("{}  Task {}", "📋".cyan(), status.task_id.yellow());
    println!(
        "  {} {}",
        "State:".white().bold(),
        format_task_state(status.task_status)
    );
    if let Some(id) = status.document_id {
        println!("  {} {}", "Document ID:".white().bold(), id);
    }
    if let Some(found) = status.issues_found {
        println!(
            "  {} {}",
            "Issues found:".white().bold(),
            if found { "yes".yellow() } else { "no".green() }
        );
    }
    if let Some(result) = &status.analysis_result {
        println!("  {} {}", "Result:".white().bold(), result);
    }
    if let Some(error) = &status.error {
        println!("  {} {}", "Error:".red().bold(), error);
    }
}
