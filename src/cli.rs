use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::api::analysis::Language;
use crate::api::documents::{DEFAULT_LIMIT, DEFAULT_SKIP};
use crate::commands;

#[derive(Parser)]
#[command(
    name = "docscan",
    author = "Docscan Team",
    version,
    about = "Upload documents and run asynchronous document analysis from the terminal",
    long_about = "docscan talks to the auth, document and analysis services.\nUpload PDF or DOCX files, follow their processing and inspect analysis reports."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true, env = "DOCSCAN_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Register, log in and manage the stored session
    Auth {
        #[command(subcommand)]
        action: AuthAction,
    },

    /// Upload documents and browse their chunks
    Document {
        #[command(subcommand)]
        action: DocumentAction,
    },

    /// Start analyses and read their results
    Analyze {
        #[command(subcommand)]
        action: AnalyzeAction,
    },

    /// Configure docscan settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },

    /// Check connectivity and credentials against every service
    Diagnose {
        /// Register and log in a throw-away test user instead of using the stored session
        #[arg(long)]
        register: bool,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (e.g. docs_api_url, polling.upload_max_attempts)
        key: String,
        /// Configuration value
        value: String,
    },
    /// Reset configuration to defaults
    Reset,
}

#[derive(Subcommand)]
pub enum AuthAction {
    /// Create a new account
    Register {
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        first_name: Option<String>,
        #[arg(long)]
        last_name: Option<String>,
    },
    /// Log in and store the session
    Login {
        /// Username (prompted if omitted)
        #[arg(short, long)]
        username: Option<String>,
        /// Read the password from this variable instead of prompting
        #[arg(long, value_name = "VAR")]
        password_env: Option<String>,
    },
    /// Log out and forget the stored session
    Logout,
    /// Check authentication status
    Status {
        /// Only show what is stored, do not contact the auth service
        #[arg(long)]
        offline: bool,
    },
    /// Exchange the stored refresh token for a new token pair
    Refresh,
}

#[derive(Subcommand)]
pub enum DocumentAction {
    /// Upload a PDF or DOCX file and follow its processing
    Upload {
        /// Path to the document to upload
        file: PathBuf,
        /// Return right after the upload is accepted
        #[arg(long)]
        no_wait: bool,
    },
    /// List documents with their analysis status
    List {
        /// List every document instead of only your own
        #[arg(long)]
        all: bool,
        /// Number of documents to skip
        #[arg(long, default_value_t = DEFAULT_SKIP)]
        skip: u32,
        /// Maximum number of documents to show
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,
    },
    /// Show the text chunks extracted from a document
    Chunks {
        /// Document ID
        id: i64,
        #[arg(long, default_value_t = DEFAULT_SKIP)]
        skip: u32,
        #[arg(short, long, default_value_t = DEFAULT_LIMIT)]
        limit: u32,
    },
    /// Show the state of an upload processing task
    Task {
        /// Task ID returned by the upload
        task_id: String,
        /// Keep polling until the task finishes
        #[arg(long)]
        wait: bool,
    },
}

#[derive(Subcommand)]
pub enum AnalyzeAction {
    /// Start analysing a document
    Start {
        /// Document ID
        document_id: i64,
        /// Analysis language (defaults to the configured one)
        #[arg(short = 'L', long, value_enum)]
        language: Option<Language>,
        /// Re-run an analysis that already exists
        #[arg(long)]
        retry: bool,
        /// Return right after the analysis is queued
        #[arg(long)]
        no_wait: bool,
    },
    /// Show the state of an analysis task
    Task {
        /// Task ID returned when the analysis was started
        task_id: String,
    },
    /// Show the analysis status of a document
    Status {
        /// Document ID
        document_id: i64,
    },
    /// Show the analysis report of a document
    Result {
        /// Document ID
        document_id: i64,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

impl Cli {
    pub async fn execute(&self) -> Result<()> {
        let config_path = self.config.as_deref();

        match &self.command {
            Commands::Auth { action } => commands::auth::execute(action, config_path).await,
            Commands::Document { action } => commands::document::execute(action, config_path).await,
            Commands::Analyze { action } => commands::analyze::execute(action, config_path).await,
            Commands::Config { action } => commands::config::execute(action, config_path),
            Commands::Completions { shell } => commands::completions::execute(*shell),
            Commands::Diagnose { register } => {
                commands::diagnose::execute(*register, config_path).await
            }
        }
    }
}
