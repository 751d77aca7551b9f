pub mod analysis;
pub mod documents;
pub mod polling;

use anyhow::Context;
use reqwest::{header, multipart, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::client::AuthClient;
use crate::auth::models::TokenPair;
use crate::auth::session::SessionContext;
use crate::auth::token_store::FileTokenStore;
use crate::auth::AuthManager;
use crate::config::Config;
use crate::error::ApiError;

pub use analysis::AnalysisClient;
pub use documents::DocumentsClient;

/// Which credential a request carries.
#[derive(Debug, Clone)]
pub enum Bearer {
    /// The current session's access token, refreshed once on 401.
    Session,
    /// A fixed token; 401 is returned to the caller untouched.
    Token(String),
    Anonymous,
}

#[derive(Debug, Clone)]
pub struct FilePart {
    pub field: &'static str,
    pub file_name: String,
    pub mime: &'static str,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone)]
pub enum Payload {
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    File(FilePart),
}

/// A request description that can be turned into a `reqwest` request any
/// number of times, so it can be replayed after a token refresh.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    payload: Payload,
    bearer: Bearer,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            payload: Payload::Empty,
            bearer: Bearer::Session,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidInput(format!("Cannot encode request body: {}", e)))?;
        self.payload = Payload::Json(value);
        Ok(self)
    }

    pub fn form(mut self, fields: Vec<(String, String)>) -> Self {
        self.payload = Payload::Form(fields);
        self
    }

    pub fn file(mut self, part: FilePart) -> Self {
        self.payload = Payload::File(part);
        self
    }

    pub fn bearer(mut self, bearer: Bearer) -> Self {
        self.bearer = bearer;
        self
    }

    pub fn anonymous(self) -> Self {
        self.bearer(Bearer::Anonymous)
    }
}

/// HTTP client for one backend service.
///
/// Every request made with [`Bearer::Session`] carries the session's access
/// token. A 401 on such a request triggers exactly one refresh against the
/// auth service followed by one replay; if that also fails the session is
/// cleared and [`ApiError::Unauthenticated`] is returned.
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    base_url: String,
    auth_base_url: String,
    session: Arc<SessionContext>,
}

impl ServiceClient {
    pub fn new(
        base_url: &str,
        auth_base_url: &str,
        timeout: Duration,
        session: Arc<SessionContext>,
    ) -> Result<Self, ApiError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("docscan/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_base_url: auth_base_url.trim_end_matches('/').to_string(),
            session,
        })
    }

    pub fn session(&self) -> &Arc<SessionContext> {
        &self.session
    }

    /// Sends the request and decodes a success body as `T`.
    pub async fn fetch<T: DeserializeOwned>(
        &self,
        request: ApiRequest,
        endpoint: &'static str,
        fallback: &str,
    ) -> Result<T, ApiError> {
        let response = self.send(&request).await?;
        decode(response, endpoint, fallback).await
    }

    /// Sends the request and only checks for a success status.
    pub async fn execute(&self, request: ApiRequest, fallback: &str) -> Result<(), ApiError> {
        let response = self.send(&request).await?;
        expect_success(response, fallback).await
    }

    pub async fn send(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        match &request.bearer {
            Bearer::Anonymous => self.dispatch(request, None).await,
            Bearer::Token(token) => self.dispatch(request, Some(token)).await,
            Bearer::Session => self.send_with_session(request).await,
        }
    }

    async fn send_with_session(&self, request: &ApiRequest) -> Result<Response, ApiError> {
        let snapshot = self.session.snapshot().await;
        let response = self.dispatch(request, snapshot.access_token()).await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::info!("Access token rejected by {}, refreshing session", self.base_url);
        let (token, version) = self.renew(snapshot.version).await?;

        let retried = self.dispatch(request, Some(&token)).await?;
        if retried.status() == StatusCode::UNAUTHORIZED {
            tracing::warn!("Request rejected again after refresh, signing out");
            self.session.clear_if_current(version).await?;
            return Err(ApiError::Unauthenticated);
        }

        Ok(retried)
    }

    /// Obtains a fresh access token for a request that was sent with the
    /// session at `observed`. Returns the token and the session version it
    /// belongs to.
    pub(crate) async fn renew(&self, observed: u64) -> Result<(String, u64), ApiError> {
        let _guard = self.session.refresh_guard().await;
        let current = self.session.snapshot().await;

        // Session changed while the request was in flight; use what it holds now.
        if current.version != observed {
            return match current.access_token() {
                Some(token) => Ok((token.to_string(), current.version)),
                None => Err(ApiError::Unauthenticated),
            };
        }

        let Some(refresh_token) = current.refresh_token() else {
            tracing::info!("No refresh token stored, signing out");
            self.session.clear_if_current(observed).await?;
            return Err(ApiError::Unauthenticated);
        };

        match self.refresh_tokens(refresh_token).await {
            Ok(tokens) => match self.session.apply_refresh(observed, &tokens).await? {
                Some(version) => {
                    tracing::info!("Session refreshed");
                    Ok((tokens.access_token, version))
                }
                None => Err(ApiError::Unauthenticated),
            },
            Err(e) => {
                tracing::warn!("Session refresh failed: {}", e);
                self.session.clear_if_current(observed).await?;
                Err(ApiError::Unauthenticated)
            }
        }
    }

    /// Exchanges a refresh token at the auth service, whichever backend this
    /// client talks to. Never goes through the session refresh itself.
    pub(crate) async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let url = format!("{}/auth/refresh", self.auth_base_url);

        let response = self
            .client
            .post(&url)
            .query(&[("refresh_token", refresh_token)])
            .send()
            .await?;

        decode(response, "POST /auth/refresh", "Failed to refresh session").await
    }

    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<Response, ApiError> {
        tracing::debug!("{} {}{}", request.method, self.base_url, request.path);

        let response = self.build(request, token)?.send().await?;

        tracing::debug!(
            "{} {}{} -> {}",
            request.method,
            self.base_url,
            request.path,
            response.status()
        );
        Ok(response)
    }

    fn build(&self, request: &ApiRequest, token: Option<&str>) -> Result<RequestBuilder, ApiError> {
        let url = format!("{}{}", self.base_url, request.path);
        let mut builder = self.client.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let builder = match &request.payload {
            Payload::Empty => builder,
            Payload::Json(body) => builder.json(body),
            Payload::Form(fields) => builder.form(fields),
            Payload::File(file) => {
                let part = multipart::Part::bytes(file.bytes.clone())
                    .file_name(file.file_name.clone())
                    .mime_str(file.mime)?;
                builder.multipart(multipart::Form::new().part(file.field, part))
            }
        };

        Ok(builder)
    }
}

/// Decodes a response into the endpoint's declared shape. Non-success
/// statuses become [`ApiError::Backend`]; bodies of the wrong shape become
/// [`ApiError::MalformedResponse`].
pub async fn decode<T: DeserializeOwned>(
    response: Response,
    endpoint: &'static str,
    fallback: &str,
) -> Result<T, ApiError> {
    let status = response.status();
    let body = response.text().await?;

    if !status.is_success() {
        return Err(ApiError::from_body(status, &body, fallback));
    }

    serde_json::from_str(&body).map_err(|e| ApiError::MalformedResponse {
        endpoint,
        reason: e.to_string(),
    })
}

pub async fn expect_success(response: Response, fallback: &str) -> Result<(), ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }

    let body = response.text().await.unwrap_or_default();
    Err(ApiError::from_body(status, &body, fallback))
}

/// The three service clients sharing one session.
pub struct Services {
    pub auth: AuthManager,
    pub documents: DocumentsClient,
    pub analysis: Arc<AnalysisClient>,
}

impl Services {
    pub fn new(config: &Config, session: Arc<SessionContext>) -> Result<Self, ApiError> {
        let timeout = config.request_timeout();
        let service = |base_url: &str| {
            ServiceClient::new(base_url, &config.auth_api_url, timeout, session.clone())
        };

        Ok(Self {
            auth: AuthManager::new(AuthClient::new(service(&config.auth_api_url)?)),
            documents: DocumentsClient::new(service(&config.docs_api_url)?),
            analysis: Arc::new(AnalysisClient::new(service(&config.analysis_api_url)?)),
        })
    }

    /// Services backed by the session persisted on disk.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store = FileTokenStore::new(config.session_file.clone())?;
        let session = Arc::new(SessionContext::load(store));
        Services::new(config, session).context("Failed to create HTTP clients")
    }
}
