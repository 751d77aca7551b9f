use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use crate::api::polling::{PollPhase, TaskState};

/// Create a spinner for indeterminate operations
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Format task state for display
pub fn format_task_state(state: TaskState) -> &'static str {
    match state {
        TaskState::Pending => "⏳ Pending",
        TaskState::Received => "📥 Received",
        TaskState::Started => "🚀 Started",
        TaskState::Progress => "⚙️ Processing",
        TaskState::Retry => "🔁 Retrying",
        TaskState::Success => "✅ Completed",
        TaskState::Failure => "❌ Failed",
    }
}

/// Spinner message for a status check that left the loop running.
pub fn poll_message(state: TaskState, phase: &PollPhase, detail: Option<&str>) -> String {
    let attempts = match phase {
        PollPhase::Polling { attempts } | PollPhase::TimedOut { attempts } => *attempts,
        _ => 0,
    };

    match detail {
        Some(detail) if !detail.is_empty() => {
            format!("{} - {} (check {})", format_task_state(state), detail, attempts)
        }
        _ => format!("{} (check {})", format_task_state(state), attempts),
    }
}

/// Format bytes into human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, UNITS[unit_index])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
