pub mod progress;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_humanize::HumanTime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Parses the timestamps the backends emit: RFC 3339, or naive ISO 8601
/// which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

/// `2024-05-01 10:00 (3 days ago)`, or the raw text if it cannot be parsed.
pub fn humanize_timestamp(raw: Option<&str>) -> String {
    match raw {
        None => "-".to_string(),
        Some(raw) => match parse_timestamp(raw) {
            Some(dt) => format!("{} ({})", dt.format("%Y-%m-%d %H:%M"), HumanTime::from(dt)),
            None => raw.to_string(),
        },
    }
}

/// Cancels `token` on Ctrl-C until dropped.
pub struct CtrlCGuard {
    task: JoinHandle<()>,
}

impl Drop for CtrlCGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub fn cancel_on_ctrl_c(token: CancellationToken) -> CtrlCGuard {
    let task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, stopping status checks");
            token.cancel();
        }
    });

    CtrlCGuard { task }
}
