// Authentication types

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthFailure;

/// Username/password pair for the credential grant
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    /// Build credentials only when both parts are non-empty
    pub fn from_parts(username: Option<String>, password: Option<String>) -> Option<Self> {
        match (username, password) {
            (Some(username), Some(password)) if !username.is_empty() && !password.is_empty() => {
                Some(Self { username, password })
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body posted to the token endpoint
#[derive(Serialize, Debug)]
#[serde(tag = "grant_type", rename_all = "snake_case")]
pub enum TokenGrant<'a> {
    ClientCredentials {
        username: &'a str,
        password: &'a str,
    },
    RefreshToken {
        refresh_token: &'a str,
    },
}

impl TokenGrant<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            TokenGrant::ClientCredentials { .. } => "client_credentials",
            TokenGrant::RefreshToken { .. } => "refresh_token",
        }
    }
}

/// Successful token endpoint response
#[derive(Deserialize, Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Error body returned by the token endpoint on 4xx
#[derive(Deserialize, Debug, Default)]
pub struct TokenErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

/// Tokens and last failure held by one pipeline
#[derive(Debug, Clone, Default)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Unknown for pre-seeded tokens
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<AuthFailure>,
}

impl TokenState {
    /// State seeded out-of-band (e.g. by a provisioning step)
    pub fn seeded(access_token: Option<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.filter(|t| !t.is_empty()),
            refresh_token: refresh_token.filter(|t| !t.is_empty()),
            expires_at: None,
            last_error: None,
        }
    }

    /// Store a successful grant and clear the recorded error
    pub fn store(&mut self, response: TokenResponse) {
        self.expires_at = response
            .expires_in
            .and_then(|secs| i64::try_from(secs).ok())
            .and_then(Duration::try_seconds)
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        self.access_token = Some(response.access_token);
        self.refresh_token = response.refresh_token;
        self.last_error = None;
    }

    /// Drop both tokens and record why
    pub fn clear(&mut self, failure: AuthFailure) {
        self.access_token = None;
        self.refresh_token = None;
        self.expires_at = None;
        self.last_error = Some(failure);
    }

    /// Whether the access token is missing or within `threshold_secs` of expiry
    pub fn needs_token(&self, threshold_secs: i64) -> bool {
        match (&self.access_token, self.expires_at) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(_), Some(exp)) => Duration::try_seconds(threshold_secs)
                .and_then(|threshold| Utc::now().checked_add_signed(threshold))
                .map_or(true, |limit| exp <= limit),
        }
    }
}

/// Which operation an in-flight authentication runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOperation {
    /// Credential grant
    Authenticate,
    /// Refresh grant, falling back to the credential grant
    Refresh,
}

/// Observable state of the pipeline's authentication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Neither tokens nor credentials were configured
    NoAuth,
    /// Configured, no valid access token
    Unauthenticated,
    /// Valid access token held
    Authenticated,
    /// An authenticate or refresh call is in flight
    Authenticating,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_require_both_parts() {
        assert!(Credentials::from_parts(Some("user".into()), Some("pass".into())).is_some());
        assert!(Credentials::from_parts(Some("user".into()), None).is_none());
        assert!(Credentials::from_parts(None, Some("pass".into())).is_none());
        assert!(Credentials::from_parts(Some("".into()), Some("pass".into())).is_none());
    }

    #[test]
    fn test_credentials_debug_hides_password() {
        let creds = Credentials::from_parts(Some("user".into()), Some("hunter2".into())).unwrap();
        let debug = format!("{:?}", creds);
        assert!(debug.contains("user"));
        assert!(!debug.contains("hunter2"));
    }

    #[test]
    fn test_grant_serialization() {
        let grant = TokenGrant::ClientCredentials {
            username: "alice",
            password: "secret",
        };
        assert_eq!(
            serde_json::to_value(&grant).unwrap(),
            serde_json::json!({
                "grant_type": "client_credentials",
                "username": "alice",
                "password": "secret",
            })
        );

        let grant = TokenGrant::RefreshToken { refresh_token: "R1" };
        assert_eq!(grant.name(), "refresh_token");
        assert_eq!(
            serde_json::to_value(&grant).unwrap(),
            serde_json::json!({ "grant_type": "refresh_token", "refresh_token": "R1" })
        );
    }

    #[test]
    fn test_token_response_optional_fields() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token":"A1","refresh_token":"R1"}"#).unwrap();
        assert_eq!(resp.access_token, "A1");
        assert_eq!(resp.refresh_token.as_deref(), Some("R1"));
        assert!(resp.expires_in.is_none());
    }

    #[test]
    fn test_seeded_state_ignores_empty_tokens() {
        let state = TokenState::seeded(Some(String::new()), Some("R1".into()));
        assert!(state.access_token.is_none());
        assert_eq!(state.refresh_token.as_deref(), Some("R1"));
    }

    #[test]
    fn test_store_and_clear() {
        let mut state = TokenState::default();
        state.last_error = Some(AuthFailure::RateLimited);
        state.store(TokenResponse {
            access_token: "A1".into(),
            refresh_token: Some("R1".into()),
            token_type: None,
            expires_in: Some(3600),
        });
        assert_eq!(state.access_token.as_deref(), Some("A1"));
        assert!(state.expires_at.is_some());
        assert!(state.last_error.is_none());

        state.clear(AuthFailure::SessionExpired);
        assert!(state.access_token.is_none());
        assert!(state.refresh_token.is_none());
        assert_eq!(state.last_error, Some(AuthFailure::SessionExpired));
    }

    #[test]
    fn test_needs_token() {
        let mut state = TokenState::default();
        assert!(state.needs_token(60));

        // Pre-seeded token with unknown expiry is used until a 401 says otherwise
        state.access_token = Some("A1".into());
        assert!(!state.needs_token(60));

        state.expires_at = Some(Utc::now() + Duration::seconds(600));
        assert!(!state.needs_token(60));

        state.expires_at = Some(Utc::now() + Duration::seconds(30));
        assert!(state.needs_token(60));
    }
}
