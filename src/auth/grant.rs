// Token endpoint calls

use reqwest::{Client, StatusCode};

use super::types::{Credentials, TokenErrorBody, TokenGrant, TokenResponse};
use crate::error::AuthFailure;

/// Detail used when a 401 carries no `error_description`
const DEFAULT_INVALID_CREDENTIALS: &str = "bad username or password";

/// Client for the token-issuing endpoint
///
/// Shares the pipeline's `reqwest::Client`, so grant calls run under the
/// same timeouts as ordinary requests.
#[derive(Clone, Debug)]
pub struct TokenEndpoint {
    client: Client,
    url: String,
}

impl TokenEndpoint {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    /// Full URL of the token endpoint
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Exchange username/password for tokens
    pub async fn credential_grant(&self, creds: &Credentials) -> Result<TokenResponse, AuthFailure> {
        tracing::info!(username = %creds.username, "Authenticating via client_credentials grant...");
        self.exchange(TokenGrant::ClientCredentials {
            username: &creds.username,
            password: &creds.password,
        })
        .await
    }

    /// Exchange a refresh token for a new token pair
    pub async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenResponse, AuthFailure> {
        tracing::info!("Refreshing access token via refresh_token grant...");
        self.exchange(TokenGrant::RefreshToken { refresh_token }).await
    }

    async fn exchange(&self, grant: TokenGrant<'_>) -> Result<TokenResponse, AuthFailure> {
        let grant_type = grant.name();

        let response = self
            .client
            .post(&self.url)
            .json(&grant)
            .send()
            .await
            .map_err(|e| classify_transport_error(&e, &self.url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let failure = classify_status(status, &error_text);
            tracing::warn!(
                grant_type,
                status = status.as_u16(),
                failure = %failure,
                "Token endpoint rejected grant"
            );
            return Err(failure);
        }

        let data: TokenResponse = response.json().await.map_err(|e| {
            AuthFailure::Client(format!("Failed to parse token response: {}", e))
        })?;

        if data.access_token.is_empty() {
            return Err(AuthFailure::Client(
                "Token response does not contain access_token".to_string(),
            ));
        }

        tracing::info!(
            grant_type,
            expires_in = ?data.expires_in,
            "Token grant succeeded"
        );

        Ok(data)
    }
}

/// Classify a non-2xx token endpoint response
pub fn classify_status(status: StatusCode, body: &str) -> AuthFailure {
    match status {
        StatusCode::UNAUTHORIZED => {
            let detail = serde_json::from_str::<TokenErrorBody>(body)
                .ok()
                .and_then(|b| b.error_description.or(b.error))
                .filter(|d| !d.is_empty())
                .unwrap_or_else(|| DEFAULT_INVALID_CREDENTIALS.to_string());
            AuthFailure::InvalidCredentials(detail)
        }
        StatusCode::TOO_MANY_REQUESTS => AuthFailure::RateLimited,
        other => AuthFailure::ServerError(other.as_u16()),
    }
}

/// Classify a failure where no response was obtained
fn classify_transport_error(err: &reqwest::Error, url: &str) -> AuthFailure {
    if err.is_builder() {
        return AuthFailure::Client(err.to_string());
    }

    let error_kind = if err.is_timeout() {
        "timeout"
    } else if err.is_connect() {
        "connection_failed"
    } else if err.is_request() {
        "request_error"
    } else {
        "unknown"
    };

    tracing::warn!(
        error_kind,
        error = %err,
        url = %url,
        "Token endpoint unreachable"
    );

    if err.is_timeout() || err.is_connect() || err.is_request() {
        AuthFailure::Unreachable(url.to_string())
    } else {
        AuthFailure::Client(err.to_string())
    }
}
