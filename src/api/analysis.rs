use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::polling::{
    PollConfig, PollHandle, PollOutcome, PollPhase, TaskPoller, TaskSlot, TaskState, TaskStatus,
};
use super::{ApiRequest, ServiceClient};
use crate::error::ApiError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Ru,
    En,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Ru => "ru",
            Language::En => "en",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ru" => Ok(Language::Ru),
            "en" => Ok(Language::En),
            other => Err(format!("Unsupported language '{}' (expected ru or en)", other)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisAccepted {
    pub task_id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub document_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisTaskStatus {
    #[serde(default)]
    pub task_id: String,
    pub task_status: TaskState,
    #[serde(default)]
    pub document_id: Option<i64>,
    #[serde(default)]
    pub analysis_result: Option<String>,
    #[serde(default)]
    pub issues_found: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TaskStatus for AnalysisTaskStatus {
    fn state(&self) -> TaskState {
        self.task_status
    }

    fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisProgress {
    NotAnalyzed,
    InProgress,
    Completed,
}

impl fmt::Display for AnalysisProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AnalysisProgress::NotAnalyzed => "not analyzed",
            AnalysisProgress::InProgress => "in progress",
            AnalysisProgress::Completed => "completed",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentAnalysisStatus {
    pub document_id: i64,
    pub analyzed: bool,
    #[serde(default)]
    pub issues_count: u32,
    pub status: AnalysisProgress,
    #[serde(default)]
    pub last_analyzed: Option<String>,
    #[serde(default)]
    pub sample_issues: Option<Vec<String>>,
}

impl DocumentAnalysisStatus {
    /// Whether a report can be fetched for this document.
    pub fn has_report(&self) -> bool {
        self.analyzed && self.status == AnalysisProgress::Completed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::Critical => "critical",
            Severity::Warning => "warning",
            Severity::Info => "info",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<i64>,
    pub issue: String,
    pub severity: Severity,
}

/// `issues` is required and must be a list; anything else fails decoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub document_id: i64,
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl AnalysisReport {
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }
}

#[derive(Debug)]
pub enum AnalysisOutcome {
    Completed {
        task: AnalysisTaskStatus,
        document: DocumentAnalysisStatus,
        /// Present when the document reports a completed analysis.
        report: Option<AnalysisReport>,
    },
    Failed {
        message: String,
    },
    TimedOut {
        attempts: u32,
    },
    Cancelled,
}

pub struct AnalysisClient {
    http: ServiceClient,
}

impl AnalysisClient {
    pub fn new(http: ServiceClient) -> Self {
        Self { http }
    }

    pub async fn start(
        &self,
        document_id: i64,
        language: Language,
        retry: bool,
    ) -> Result<AnalysisAccepted, ApiError> {
        let request = ApiRequest::post(format!("/analyze/{}", document_id))
            .query("language", language)
            .query("retry", retry);

        self.http
            .fetch(request, "POST /analyze/{doc_id}", "Failed to start analysis")
            .await
    }

    pub async fn task_status(&self, task_id: &str) -> Result<AnalysisTaskStatus, ApiError> {
        self.http
            .fetch(
                ApiRequest::get(format!("/analyze/status/{}", task_id)),
                "GET /analyze/status/{task_id}",
                "Failed to get analysis status",
            )
            .await
    }

    pub async fn document_status(&self, document_id: i64) -> Result<DocumentAnalysisStatus, ApiError> {
        self.http
            .fetch(
                ApiRequest::get(format!("/analyze/document/{}/status", document_id)),
                "GET /analyze/document/{doc_id}/status",
                "Failed to get document analysis status",
            )
            .await
    }

    pub async fn result(&self, document_id: i64) -> Result<AnalysisReport, ApiError> {
        self.http
            .fetch(
                ApiRequest::get("/analyze/result").query("doc_id", document_id),
                "GET /analyze/result",
                "Failed to load analysis result",
            )
            .await
    }

    /// Polls `task_id` on a background task.
    pub fn poll_task<O>(
        self: &Arc<Self>,
        task_id: &str,
        poller: TaskPoller,
        observe: O,
    ) -> PollHandle<AnalysisTaskStatus>
    where
        O: FnMut(&AnalysisTaskStatus, &PollPhase) + Send + 'static,
    {
        let client = Arc::clone(self);
        let task_id = task_id.to_string();

        poller.spawn(
            move || {
                let client = Arc::clone(&client);
                let task_id = task_id.clone();
                async move { client.task_status(&task_id).await }
            },
            observe,
        )
    }

    /// Turns a finished poll into an outcome. A successful task is followed
    /// by one document status check and, if that reports a completed
    /// analysis, one report fetch.
    pub async fn conclude(
        &self,
        document_id: i64,
        outcome: PollOutcome<AnalysisTaskStatus>,
    ) -> Result<AnalysisOutcome, ApiError> {
        match outcome {
            PollOutcome::Succeeded(task) => {
                let document = self.document_status(document_id).await?;
                let report = if document.has_report() {
                    Some(self.result(document_id).await?)
                } else {
                    tracing::info!(
                        "Analysis task finished but document {} is {}",
                        document_id,
                        document.status
                    );
                    None
                };
                Ok(AnalysisOutcome::Completed {
                    task,
                    document,
                    report,
                })
            }
            PollOutcome::Failed { message } => Ok(AnalysisOutcome::Failed { message }),
            PollOutcome::TimedOut { attempts } => Ok(AnalysisOutcome::TimedOut { attempts }),
            PollOutcome::Cancelled => Ok(AnalysisOutcome::Cancelled),
        }
    }
}

/// Tracks the analysis of one document at a time. Starting a new analysis
/// (including a retry) stops polling the previous task first.
pub struct AnalysisTracker {
    client: Arc<AnalysisClient>,
    config: PollConfig,
    slot: TaskSlot<AnalysisTaskStatus>,
    document_id: Option<i64>,
}

impl AnalysisTracker {
    pub fn new(client: Arc<AnalysisClient>, config: PollConfig) -> Self {
        Self {
            client,
            config,
            slot: TaskSlot::new(),
            document_id: None,
        }
    }

    pub async fn start<O>(
        &mut self,
        document_id: i64,
        language: Language,
        retry: bool,
        observe: O,
    ) -> Result<AnalysisAccepted, ApiError>
    where
        O: FnMut(&AnalysisTaskStatus, &PollPhase) + Send + 'static,
    {
        if let Some(previous) = self.active_task() {
            tracing::info!("Superseding analysis task {}", previous);
        }
        self.slot.cancel();
        self.document_id = None;

        let accepted = self.client.start(document_id, language, retry).await?;
        tracing::info!(
            "Analysis of document {} queued as task {}",
            document_id,
            accepted.task_id
        );
        if let Some(queued) = accepted.document_id.filter(|id| *id != document_id) {
            tracing::warn!(
                "Analysis service queued document {} instead of {}",
                queued,
                document_id
            );
        }

        self.follow(document_id, &accepted.task_id, observe);
        Ok(accepted)
    }

    /// Starts polling an already queued task.
    pub fn follow<O>(&mut self, document_id: i64, task_id: &str, observe: O)
    where
        O: FnMut(&AnalysisTaskStatus, &PollPhase) + Send + 'static,
    {
        let handle = self
            .client
            .poll_task(task_id, TaskPoller::new(self.config), observe);
        self.slot.occupy(task_id, handle);
        self.document_id = Some(document_id);
    }

    pub fn active_task(&self) -> Option<&str> {
        self.slot.active_task()
    }

    pub fn cancellation(&self) -> Option<CancellationToken> {
        self.slot.cancellation()
    }

    /// Waits for the active task and concludes it. `None` if nothing is
    /// being tracked.
    pub async fn wait(&mut self) -> Result<Option<AnalysisOutcome>, ApiError> {
        let (Some((_, handle)), Some(document_id)) = (self.slot.take(), self.document_id.take())
        else {
            return Ok(None);
        };

        let outcome = handle.outcome().await?;
        self.client.conclude(document_id, outcome).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::session::SessionContext;
    use crate::auth::token_store::{MemoryTokenStore, StoredSession};
    use mockito::{Matcher, Server, ServerGuard};
    use std::time::Duration;

    fn analysis(server: &ServerGuard) -> Arc<AnalysisClient> {
        let session = Arc::new(SessionContext::load(MemoryTokenStore::with_session(
            StoredSession {
                access_token: Some("a1".to_string()),
                refresh_token: Some("r1".to_string()),
                user: None,
            },
        )));
        let http =
            ServiceClient::new(&server.url(), &server.url(), Duration::from_secs(5), session).unwrap();
        Arc::new(AnalysisClient::new(http))
    }

    fn fast() -> PollConfig {
        PollConfig::new(Duration::from_millis(1), Some(200))
    }

    #[test]
    fn report_requires_issue_list() {
        let missing = serde_json::from_str::<AnalysisReport>(r#"{"document_id": 1}"#);
        let wrong = serde_json::from_str::<AnalysisReport>(r#"{"document_id": 1, "issues": "none"}"#);
        assert!(missing.is_err());
        assert!(wrong.is_err());
    }

    #[test]
    fn accepted_document_id_is_optional() {
        let echoed: AnalysisAccepted =
            serde_json::from_str(r#"{"task_id": "a1", "status": "queued", "document_id": 42}"#).unwrap();
        let bare: AnalysisAccepted = serde_json::from_str(r#"{"task_id": "a1"}"#).unwrap();

        assert_eq!(echoed.document_id, Some(42));
        assert_eq!(bare.document_id, None);
        assert!(bare.message.is_empty());
    }

    #[test]
    fn language_parses_case_insensitively() {
        assert_eq!("EN".parse::<Language>().unwrap(), Language::En);
        assert!("de".parse::<Language>().is_err());
    }

    #[tokio::test]
    async fn failed_analysis_surfaces_backend_error() {
        let mut server = Server::new_async().await;
        let start = server
            .mock("POST", "/analyze/42")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("language".into(), "en".into()),
                Matcher::UrlEncoded("retry".into(), "false".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status": "queued", "message": "Analysis started", "document_id": 42, "task_id": "a1"}"#,
            )
            .expect(1)
            .create_async()
            .await;
        server
            .mock("GET", "/analyze/status/a1")
            .with_status(200)
            .with_body(
                r#"{"task_id": "a1", "task_status": "FAILURE", "document_id": 42,
                    "analysis_result": null, "issues_found": null, "error": "OCR failed"}"#,
            )
            .create_async()
            .await;
        let document_status = server
            .mock("GET", "/analyze/document/42/status")
            .expect(0)
            .create_async()
            .await;

        let mut tracker = AnalysisTracker::new(analysis(&server), fast());
        let accepted = tracker.start(42, Language::En, false, |_, _| {}).await.unwrap();
        assert_eq!(accepted.task_id, "a1");
        assert_eq!(tracker.active_task(), Some("a1"));

        match tracker.wait().await.unwrap() {
            Some(AnalysisOutcome::Failed { message }) => assert_eq!(message, "OCR failed"),
            other => panic!("expected failure, got {:?}", other),
        }
        start.assert_async().await;
        document_status.assert_async().await;
    }

    #[tokio::test]
    async fn success_fetches_report_exactly_once() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/analyze/status/a2")
            .with_status(200)
            .with_body(r#"{"task_id": "a2", "task_status": "STARTED"}"#)
            .expect(2)
            .create_async()
            .await;
        server
            .mock("GET", "/analyze/status/a2")
            .with_status(200)
            .with_body(r#"{"task_id": "a2", "task_status": "SUCCESS", "issues_found": true}"#)
            .create_async()
            .await;
        let document_status = server
            .mock("GET", "/analyze/document/42/status")
            .with_status(200)
            .with_body(
                r#"{"document_id": 42, "analyzed": true, "issues_count": 2, "status": "completed",
                    "last_analyzed": "2024-05-01T10:00:00", "sample_issues": ["Missing signature"]}"#,
            )
            .expect(1)
            .create_async()
            .await;
        let result = server
            .mock("GET", "/analyze/result")
            .match_query(Matcher::UrlEncoded("doc_id".into(), "42".into()))
            .with_status(200)
            .with_body(
                r#"{"document_id": 42, "language": "en", "issues": [
                    {"id": 1, "issue": "Missing signature", "severity": "critical"},
                    {"id": 2, "issue": "Date format", "severity": "info"}]}"#,
            )
            .expect(1)
            .create_async()
            .await;

        let mut tracker = AnalysisTracker::new(analysis(&server), fast());
        tracker.follow(42, "a2", |_, _| {});

        match tracker.wait().await.unwrap() {
            Some(AnalysisOutcome::Completed { report, document, .. }) => {
                assert!(document.has_report());
                let report = report.unwrap();
                assert_eq!(report.issues.len(), 2);
                assert_eq!(report.count(Severity::Critical), 1);
                assert_eq!(report.language, Some(Language::En));
            }
            other => panic!("expected completion, got {:?}", other),
        }
        document_status.assert_async().await;
        result.assert_async().await;
        assert!(tracker.wait().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn incomplete_document_skips_report() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/analyze/status/a3")
            .with_status(200)
            .with_body(r#"{"task_id": "a3", "task_status": "SUCCESS"}"#)
            .create_async()
            .await;
        server
            .mock("GET", "/analyze/document/5/status")
            .with_status(200)
            .with_body(r#"{"document_id": 5, "analyzed": false, "issues_count": 0, "status": "in_progress"}"#)
            .create_async()
            .await;
        let result = server
            .mock("GET", "/analyze/result")
            .match_query(Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = analysis(&server);
        let handle = client.poll_task("a3", TaskPoller::new(fast()), |_, _| {});
        let outcome = client.conclude(5, handle.outcome().await.unwrap()).await.unwrap();

        assert!(matches!(outcome, AnalysisOutcome::Completed { report: None, .. }));
        result.assert_async().await;
    }

    #[tokio::test]
    async fn retry_stops_polling_previous_task() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/analyze/status/old")
            .with_status(200)
            .with_body(r#"{"task_id": "old", "task_status": "STARTED"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/analyze/42")
            .match_query(Matcher::UrlEncoded("retry".into(), "true".into()))
            .with_status(200)
            .with_body(r#"{"status": "queued", "message": "", "document_id": 42, "task_id": "new"}"#)
            .create_async()
            .await;

        let slow = PollConfig::new(Duration::from_secs(3600), None);
        let mut tracker = AnalysisTracker::new(analysis(&server), slow);
        tracker.follow(42, "old", |_, _| {});
        let old_token = tracker.cancellation().unwrap();

        tracker.start(42, Language::Ru, true, |_, _| {}).await.unwrap();

        assert!(old_token.is_cancelled());
        assert_eq!(tracker.active_task(), Some("new"));
        tracker.cancellation().unwrap().cancel();
    }

    #[tokio::test]
    async fn dropping_tracker_stops_uncapped_polling() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/analyze/status/a4")
            .with_status(200)
            .with_body(r#"{"task_id": "a4", "task_status": "STARTED"}"#)
            .create_async()
            .await;

        let uncapped = PollConfig::new(Duration::from_millis(1), None);
        let mut tracker = AnalysisTracker::new(analysis(&server), uncapped);
        tracker.follow(7, "a4", |_, _| {});
        let token = tracker.cancellation().unwrap();

        drop(tracker);
        assert!(token.is_cancelled());
    }
}
