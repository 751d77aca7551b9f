use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Body of `POST /auth/token` and `POST /auth/refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_verified: Option<bool>,
}

impl User {
    pub fn display_name(&self) -> String {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => format!("{} {} ({})", first, last, self.username),
            (Some(first), None) => format!("{} ({})", first, self.username),
            _ => self.username.clone(),
        }
    }
}

/// The two payload shapes `GET /auth/read_current_user` is known to return.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum CurrentUserPayload {
    Wrapped {
        #[serde(rename = "User")]
        user: User,
    },
    Bare(User),
}

impl From<CurrentUserPayload> for User {
    fn from(payload: CurrentUserPayload) -> Self {
        match payload {
            CurrentUserPayload::Wrapped { user } | CurrentUserPayload::Bare(user) => user,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    LoggedOut,
    Authenticated(User),
}

impl AuthState {
    pub fn user(&self) -> Option<&User> {
        match self {
            AuthState::Authenticated(user) => Some(user),
            AuthState::LoggedOut => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_user_accepts_wrapped_and_bare_shapes() {
        let wrapped: CurrentUserPayload =
            serde_json::from_str(r#"{"User": {"id": 3, "username": "amina"}}"#).unwrap();
        let bare: CurrentUserPayload =
            serde_json::from_str(r#"{"id": 3, "username": "amina", "is_admin": false}"#).unwrap();

        assert_eq!(User::from(wrapped).id, 3);
        let bare = User::from(bare);
        assert_eq!(bare.username, "amina");
        assert_eq!(bare.is_admin, Some(false));
    }

    #[test]
    fn current_user_rejects_unknown_shape() {
        let parsed = serde_json::from_str::<CurrentUserPayload>(r#"{"user_id": 3}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn token_type_defaults_to_bearer() {
        let pair: TokenPair =
            serde_json::from_str(r#"{"access_token": "a", "refresh_token": "r"}"#).unwrap();
        assert_eq!(pair.token_type, "bearer");
    }
}
