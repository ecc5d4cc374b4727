use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::auth::{AuthManager, Credentials, TokenEndpoint, TokenState};
use crate::config::PipelineConfig;
use crate::error::{ApiError, Result};

/// Request sent through the pipeline
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the base URL, or an absolute URL
    pub path: String,
    pub body: Option<Value>,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Attach a JSON body
    pub fn with_json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Add an extra header
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ApiError::InvalidRequest(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ApiError::InvalidRequest(format!("invalid value for header {}: {}", name, e)))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// Response handed back to the caller
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// JSON body; `Null` when empty, a JSON string when not JSON
    pub data: Value,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Deserialize `data` into a typed value
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| ApiError::Internal(anyhow::anyhow!("Failed to parse response: {}", e)))
    }
}

/// The outgoing request plus the marker bounding auth retries to one
struct Envelope {
    request: ApiRequest,
    retried_for_auth: bool,
}

/// HTTP client that attaches bearer tokens and recovers once from 401
pub struct AuthenticatedClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Token state and single-flight authentication
    auth: AuthManager,

    /// API base URL without trailing slash
    base_url: String,
}

impl AuthenticatedClient {
    /// Create a pipeline from configuration
    pub fn new(config: &PipelineConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config.base_url.trim_end_matches('/').to_string();
        let endpoint = TokenEndpoint::new(client.clone(), join_url(&base_url, &config.token_path));
        let credentials =
            Credentials::from_parts(config.username.clone(), config.password.clone());
        let seed = TokenState::seeded(config.access_token.clone(), config.refresh_token.clone());

        let auth = AuthManager::new(endpoint, credentials, seed, config.refresh_threshold);

        Ok(Self {
            client,
            auth,
            base_url,
        })
    }

    /// Send a request through the pipeline
    ///
    /// Non-2xx responses are returned, not raised. Only transport failures
    /// produce an error.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        let mut envelope = Envelope {
            request,
            retried_for_auth: false,
        };
        let mut token = self.auth.ensure_token().await;

        loop {
            let response = self.dispatch(&envelope.request, token.as_deref()).await?;

            if response.status != StatusCode::UNAUTHORIZED || !self.auth.is_configured() {
                return Ok(response);
            }

            if envelope.retried_for_auth {
                tracing::warn!(
                    method = %envelope.request.method,
                    path = %envelope.request.path,
                    "Still unauthorized after re-authentication, giving up"
                );
                return Ok(response);
            }

            tracing::warn!(
                method = %envelope.request.method,
                path = %envelope.request.path,
                "Received 401, re-authenticating and retrying once..."
            );
            envelope.retried_for_auth = true;
            token = self.auth.handle_unauthorized(token.as_deref()).await;
        }
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::GET, path)).await
    }

    pub async fn post<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::POST, path).with_json(to_json(body)?))
            .await
    }

    pub async fn put<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::PUT, path).with_json(to_json(body)?))
            .await
    }

    pub async fn patch<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::PATCH, path).with_json(to_json(body)?))
            .await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.send(ApiRequest::new(Method::DELETE, path)).await
    }

    /// Last authentication failure, for display
    pub async fn current_auth_error(&self) -> Option<String> {
        self.auth.last_error().await.map(|failure| failure.to_string())
    }

    /// `Authorization` header value for requests built outside the pipeline
    ///
    /// Runs the same token ensure step as `send`. `None` when auth is not
    /// configured or no token could be obtained.
    pub async fn auth_header(&self) -> Option<HeaderValue> {
        let token = self.auth.ensure_token().await?;
        bearer_value(&token).ok()
    }

    /// API base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Execute one attempt
    async fn dispatch(&self, request: &ApiRequest, token: Option<&str>) -> Result<ApiResponse> {
        let url = join_url(&self.base_url, &request.path);

        let mut headers = request.headers.clone();
        if let Some(token) = token {
            headers.insert(AUTHORIZATION, bearer_value(token)?);
        }

        tracing::debug!(
            method = %request.method,
            url = %url,
            bearer = token.is_some(),
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let error_kind = if e.is_timeout() {
                    "timeout"
                } else if e.is_connect() {
                    "connection_failed"
                } else if e.is_request() {
                    "request_error"
                } else {
                    "unknown"
                };
                tracing::warn!(
                    error_kind,
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                return Err(ApiError::Transport(e));
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response.bytes().await?;

        tracing::debug!(status = %status, url = %url, "Received HTTP response");

        Ok(ApiResponse {
            status,
            headers,
            data: parse_body(&bytes),
        })
    }
}

/// Join the base URL and a request path; absolute URLs are used as-is
fn join_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn bearer_value(token: &str) -> Result<HeaderValue> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| ApiError::InvalidRequest(format!("invalid bearer token: {}", e)))?;
    value.set_sensitive(true);
    Ok(value)
}

fn to_json<T: Serialize + ?Sized>(body: &T) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))
}

fn parse_body(bytes: &[u8]) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://api", "/fruits"), "http://api/fruits");
        assert_eq!(join_url("http://api/", "fruits"), "http://api/fruits");
        assert_eq!(join_url("http://api/v1", "/auth/token"), "http://api/v1/auth/token");
        assert_eq!(
            join_url("http://api", "https://other.example/health"),
            "https://other.example/health"
        );
    }

    #[test]
    fn test_parse_body() {
        assert_eq!(parse_body(b""), Value::Null);
        assert_eq!(parse_body(br#"{"fruits":[]}"#), json!({"fruits": []}));
        assert_eq!(parse_body(b"plain text"), json!("plain text"));
    }

    #[test]
    fn test_bearer_value_is_sensitive() {
        let value = bearer_value("A1").unwrap();
        assert_eq!(value.to_str().unwrap(), "Bearer A1");
        assert!(value.is_sensitive());
        assert!(bearer_value("bad\ntoken").is_err());
    }

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::new(Method::POST, "/fruits")
            .with_json(json!({"name": "kiwi"}))
            .with_header("x-trace", "abc")
            .unwrap();
        assert_eq!(request.body, Some(json!({"name": "kiwi"})));
        assert_eq!(request.headers.get("x-trace").unwrap(), "abc");

        let err = ApiRequest::new(Method::GET, "/").with_header("bad header", "x");
        assert!(matches!(err, Err(ApiError::InvalidRequest(_))));
    }

    #[test]
    fn test_response_json() {
        #[derive(serde::Deserialize)]
        struct Health {
            status: String,
        }

        let response = ApiResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            data: json!({"status": "ok"}),
        };
        assert!(response.is_success());
        let health: Health = response.json().unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_trailing_slash_trimmed() {
        let config = PipelineConfig {
            base_url: "http://localhost:8000/".to_string(),
            ..PipelineConfig::default()
        };
        let client = AuthenticatedClient::new(&config).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8000");
        assert!(client.current_auth_error().await.is_none());
        assert!(client.auth_header().await.is_none());
    }
}
