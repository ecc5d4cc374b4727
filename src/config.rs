use anyhow::{Context, Result};
use clap::Parser;
use reqwest::{Method, Url};
use serde_json::Value;

/// Authenticated request pipeline - send one request through the pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// HTTP method
    #[arg(default_value = "GET")]
    pub method: String,

    /// Request path relative to the API base URL
    #[arg(default_value = "/health")]
    pub path: String,

    /// JSON request body
    #[arg(short = 'D', long)]
    pub data: Option<String>,

    /// API base URL
    #[arg(short = 'u', long, env = "API_URL", default_value = "http://localhost:8000")]
    pub base_url: String,

    /// Pre-seeded access token
    #[arg(long, env = "AUTH_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Pre-seeded refresh token
    #[arg(long, env = "REFRESH_TOKEN", hide_env_values = true)]
    pub refresh_token: Option<String>,

    /// Username for the client_credentials grant
    #[arg(long, env = "AUTH_USER")]
    pub username: Option<String>,

    /// Password for the client_credentials grant
    #[arg(long, env = "AUTH_PASS", hide_env_values = true)]
    pub password: Option<String>,

    /// Token endpoint path relative to the base URL
    #[arg(long, env = "AUTH_TOKEN_PATH", default_value = "/auth/token")]
    pub token_path: String,

    /// Send through a REMOTE_<NAME>_* server instead of the base URL
    #[arg(short = 'r', long)]
    pub remote: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30")]
    pub http_timeout: u64,

    /// HTTP connect timeout in seconds
    #[arg(long, env = "HTTP_CONNECT_TIMEOUT", default_value = "10")]
    pub connect_timeout: u64,

    /// Refresh tokens this many seconds before they expire
    #[arg(long, env = "TOKEN_REFRESH_THRESHOLD", default_value = "60")]
    pub refresh_threshold: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

/// Settings for one `AuthenticatedClient`
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub base_url: String,
    pub token_path: String,

    // Token-only deployments
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,

    // Credentialed deployments
    pub username: Option<String>,
    pub password: Option<String>,

    // Timeouts (seconds), shared by API requests and token grants
    pub request_timeout: u64,
    pub connect_timeout: u64,

    pub refresh_threshold: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token_path: "/auth/token".to_string(),
            access_token: None,
            refresh_token: None,
            username: None,
            password: None,
            request_timeout: 30,
            connect_timeout: 10,
            refresh_threshold: 60,
        }
    }
}

impl PipelineConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.base_url)
            .with_context(|| format!("API_URL is not a valid URL: {}", self.base_url))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!("API_URL must use http or https: {}", self.base_url);
        }
        if self.token_path.trim().is_empty() {
            anyhow::bail!("AUTH_TOKEN_PATH must not be empty");
        }
        if self.request_timeout == 0 || self.connect_timeout == 0 {
            anyhow::bail!("HTTP timeouts must be greater than zero");
        }
        if self.username.is_some() != self.password.is_some() {
            tracing::warn!("Only one of AUTH_USER/AUTH_PASS is set, credential grant disabled");
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub pipeline: PipelineConfig,

    // Request to send
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub remote: Option<String>,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from all sources with priority: CLI > ENV > defaults
    pub fn load() -> Result<Self> {
        // Load .env file if it exists
        dotenvy::dotenv().ok();

        Self::from_args(CliArgs::parse())
    }

    /// Build configuration from parsed arguments
    pub fn from_args(args: CliArgs) -> Result<Self> {
        let method = Method::from_bytes(args.method.to_uppercase().as_bytes())
            .with_context(|| format!("Invalid HTTP method: {}", args.method))?;

        let body = args
            .data
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .context("Request body (--data) is not valid JSON")?;

        Ok(Config {
            pipeline: PipelineConfig {
                base_url: args.base_url,
                token_path: args.token_path,
                access_token: non_empty(args.access_token),
                refresh_token: non_empty(args.refresh_token),
                username: non_empty(args.username),
                password: non_empty(args.password),
                request_timeout: args.http_timeout,
                connect_timeout: args.connect_timeout,
                refresh_threshold: args.refresh_threshold,
            },
            method,
            path: args.path,
            body,
            remote: args.remote,
            log_level: args.log_level,
            log_format: parse_log_format(&args.log_format),
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.pipeline.validate()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["auth-pipeline"];
        argv.extend_from_slice(args);
        Config::from_args(CliArgs::try_parse_from(argv).unwrap()).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[
            "--base-url",
            "http://localhost:8000",
            "--token-path",
            "/auth/token",
        ]);
        assert_eq!(config.method, Method::GET);
        assert_eq!(config.path, "/health");
        assert!(config.body.is_none());
        assert_eq!(config.pipeline.base_url, "http://localhost:8000");
        assert_eq!(config.pipeline.token_path, "/auth/token");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_method_path_and_body() {
        let config = parse(&["post", "/fruits", "--data", r#"{"name":"kiwi"}"#]);
        assert_eq!(config.method, Method::POST);
        assert_eq!(config.path, "/fruits");
        assert_eq!(config.body, Some(serde_json::json!({"name": "kiwi"})));
    }

    #[test]
    fn test_invalid_body_rejected() {
        let args = CliArgs::try_parse_from(["auth-pipeline", "POST", "/fruits", "-D", "{oops"]).unwrap();
        assert!(Config::from_args(args).is_err());
    }

    #[test]
    fn test_empty_secrets_are_absent() {
        let config = parse(&[
            "--username",
            "",
            "--password",
            "pw",
            "--access-token",
            " ",
        ]);
        assert!(config.pipeline.username.is_none());
        assert_eq!(config.pipeline.password.as_deref(), Some("pw"));
        assert!(config.pipeline.access_token.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_url() {
        let config = PipelineConfig {
            base_url: "not a url".to_string(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());

        let config = PipelineConfig {
            base_url: "ftp://example.com".to_string(),
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = PipelineConfig {
            request_timeout: 0,
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_log_format() {
        assert_eq!(parse_log_format("json"), LogFormat::Json);
        assert_eq!(parse_log_format("JSON"), LogFormat::Json);
        assert_eq!(parse_log_format("text"), LogFormat::Text);
        assert_eq!(parse_log_format(""), LogFormat::Text);
    }
}
