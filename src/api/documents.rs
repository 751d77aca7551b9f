use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use super::polling::{PollOutcome, PollPhase, TaskPoller, TaskState, TaskStatus};
use super::{ApiRequest, FilePart, ServiceClient};
use crate::error::ApiError;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;
pub const DEFAULT_SKIP: u32 = 0;
pub const DEFAULT_LIMIT: u32 = 100;

const PDF_MIME: &str = "application/pdf";
const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub filename: String,
    pub owner_id: i64,
    pub status: String,
    #[serde(default, alias = "upload_time")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
    #[serde(default)]
    pub file_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentPage {
    pub documents: Vec<Document>,
    pub total: u64,
    pub skip: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub content: String,
    pub chunk_index: u32,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkPage {
    pub chunks: Vec<Chunk>,
    pub total: u64,
    pub skip: u32,
    pub limit: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadAccepted {
    pub task_id: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

/// Progress details the document worker attaches to a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadProgress {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub progress: Option<f64>,
    #[serde(default)]
    pub document_id: Option<i64>,
    #[serde(default)]
    pub num_chunks: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadTaskStatus {
    #[serde(default)]
    pub task_id: String,
    pub state: TaskState,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub result: Option<UploadProgress>,
    #[serde(default)]
    pub error: Option<String>,
}

impl UploadTaskStatus {
    pub fn document_id(&self) -> Option<i64> {
        self.result.as_ref().and_then(|r| r.document_id)
    }

    pub fn progress(&self) -> Option<f64> {
        self.result.as_ref().and_then(|r| r.progress)
    }
}

impl TaskStatus for UploadTaskStatus {
    fn state(&self) -> TaskState {
        self.state
    }

    fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }
}

#[derive(Debug)]
pub enum UploadOutcome {
    /// The document was processed. `document` is the owner's listing entry
    /// when it could be found.
    Completed {
        status: UploadTaskStatus,
        document: Option<Document>,
    },
    Failed {
        message: String,
    },
    TimedOut {
        attempts: u32,
    },
    Cancelled,
}

pub struct DocumentsClient {
    http: ServiceClient,
}

impl DocumentsClient {
    pub fn new(http: ServiceClient) -> Self {
        Self { http }
    }

    pub async fn upload(&self, path: &Path, owner_id: i64) -> Result<UploadAccepted, ApiError> {
        let part = read_upload(path)?;
        tracing::info!("Uploading {} ({} bytes)", part.file_name, part.bytes.len());

        let request = ApiRequest::post("/api/documents/")
            .query("owner_id", owner_id)
            .file(part);

        self.http
            .fetch(request, "POST /api/documents/", "Failed to upload document")
            .await
    }

    pub async fn list(&self, skip: u32, limit: u32) -> Result<DocumentPage, ApiError> {
        let request = ApiRequest::get("/api/documents/")
            .query("skip", skip)
            .query("limit", limit);

        self.http
            .fetch(request, "GET /api/documents/", "Failed to load documents")
            .await
    }

    pub async fn list_by_owner(
        &self,
        owner_id: i64,
        skip: u32,
        limit: u32,
    ) -> Result<DocumentPage, ApiError> {
        let request = ApiRequest::get(format!("/api/documents/owner/{}", owner_id))
            .query("skip", skip)
            .query("limit", limit);

        self.http
            .fetch(
                request,
                "GET /api/documents/owner/{owner_id}",
                "Failed to load documents",
            )
            .await
    }

    pub async fn chunks(&self, document_id: i64, skip: u32, limit: u32) -> Result<ChunkPage, ApiError> {
        let request = ApiRequest::get(format!("/api/documents/{}/chunks", document_id))
            .query("skip", skip)
            .query("limit", limit);

        self.http
            .fetch(
                request,
                "GET /api/documents/{id}/chunks",
                "Failed to load document chunks",
            )
            .await
    }

    pub async fn task_status(&self, task_id: &str) -> Result<UploadTaskStatus, ApiError> {
        self.http
            .fetch(
                ApiRequest::get(format!("/api/documents/task/{}", task_id)),
                "GET /api/documents/task/{task_id}",
                "Failed to get task status",
            )
            .await
    }

    /// Polls an upload task to completion. On success the processed
    /// document is looked up once in the owner's listing.
    pub async fn track_upload<O>(
        &self,
        task_id: &str,
        owner_id: i64,
        poller: &TaskPoller,
        observe: O,
    ) -> Result<UploadOutcome, ApiError>
    where
        O: FnMut(&UploadTaskStatus, &PollPhase),
    {
        let outcome = poller.run(|| self.task_status(task_id), observe).await?;

        Ok(match outcome {
            PollOutcome::Succeeded(status) => {
                let document = self.find_processed(owner_id, &status).await;
                UploadOutcome::Completed { status, document }
            }
            PollOutcome::Failed { message } => UploadOutcome::Failed { message },
            PollOutcome::TimedOut { attempts } => UploadOutcome::TimedOut { attempts },
            PollOutcome::Cancelled => UploadOutcome::Cancelled,
        })
    }

    async fn find_processed(&self, owner_id: i64, status: &UploadTaskStatus) -> Option<Document> {
        let document_id = status.document_id()?;

        match self.list_by_owner(owner_id, DEFAULT_SKIP, DEFAULT_LIMIT).await {
            Ok(page) => page.documents.into_iter().find(|d| d.id == document_id),
            Err(e) => {
                tracing::warn!("Could not look up processed document {}: {}", document_id, e);
                None
            }
        }
    }
}

/// Checks type and size of a file before it is sent anywhere.
fn read_upload(path: &Path) -> Result<FilePart, ApiError> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ApiError::InvalidInput(format!("Invalid file name: {}", path.display())))?
        .to_string();

    let mime = match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("pdf") => PDF_MIME,
        Some("docx") => DOCX_MIME,
        _ => {
            return Err(ApiError::InvalidInput(format!(
                "Unsupported file type: {} (only PDF and DOCX are accepted)",
                file_name
            )))
        }
    };

    let metadata = fs::metadata(path)
        .map_err(|e| ApiError::InvalidInput(format!("Cannot read {}: {}", path.display(), e)))?;
    if metadata.len() > MAX_UPLOAD_BYTES {
        return Err(ApiError::InvalidInput(format!(
            "{} is too large ({} bytes, limit is 10 MB)",
            file_name,
            metadata.len()
        )));
    }

    let bytes = fs::read(path)
        .map_err(|e| ApiError::InvalidInput(format!("Cannot read {}: {}", path.display(), e)))?;

    Ok(FilePart {
        field: "file",
        file_name,
        mime,
        bytes,
    })
}
