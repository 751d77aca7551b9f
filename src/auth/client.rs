use super::models::{CurrentUserPayload, RegisterRequest, TokenPair, User};
use crate::api::{ApiRequest, Bearer, ServiceClient};
use crate::error::ApiError;

pub struct AuthClient {
    http: ServiceClient,
}

impl AuthClient {
    pub fn new(http: ServiceClient) -> Self {
        Self { http }
    }

    pub fn http(&self) -> &ServiceClient {
        &self.http
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ApiError> {
        tracing::info!("Registering user {}", request.username);

        let request = ApiRequest::post("/auth/").json(request)?.anonymous();
        self.http.execute(request, "Registration failed").await
    }

    pub async fn login(&self, username: &str, password: &str) -> Result<TokenPair, ApiError> {
        tracing::info!("Attempting login for {}", username);

        let request = ApiRequest::post("/auth/token")
            .form(vec![
                ("username".to_string(), username.to_string()),
                ("password".to_string(), password.to_string()),
                ("grant_type".to_string(), "password".to_string()),
            ])
            .anonymous();

        self.http
            .fetch(request, "POST /auth/token", "Login failed")
            .await
    }

    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        self.http.refresh_tokens(refresh_token).await
    }

    pub async fn current_user(&self) -> Result<User, ApiError> {
        self.read_current_user(Bearer::Session).await
    }

    /// Same as [`current_user`](Self::current_user) but with an explicit
    /// token, used right after login before the session is written.
    pub async fn current_user_with(&self, access_token: &str) -> Result<User, ApiError> {
        self.read_current_user(Bearer::Token(access_token.to_string()))
            .await
    }

    async fn read_current_user(&self, bearer: Bearer) -> Result<User, ApiError> {
        let payload: CurrentUserPayload = self
            .http
            .fetch(
                ApiRequest::get("/auth/read_current_user").bearer(bearer),
                "GET /auth/read_current_user",
                "Failed to load user profile",
            )
            .await?;

        Ok(payload.into())
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("/auth/logout").query("refresh_token", refresh_token);
        self.http.execute(request, "Logout failed").await
    }
}
