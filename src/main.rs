use anyhow::{Context, Result};

use auth_pipeline::config::{Config, LogFormat};
use auth_pipeline::http_client::{ApiRequest, AuthenticatedClient};
use auth_pipeline::remote::RemoteRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (for log level)
    let config = Config::load()?;

    init_logging(&config);
    config.validate()?;

    // Pick the pipeline: a named remote server or the configured base URL
    let registry;
    let owned;
    let client: &AuthenticatedClient = match &config.remote {
        Some(name) => {
            registry = RemoteRegistry::from_env(&config.pipeline)?;
            tracing::debug!(remotes = ?registry.names(), "Discovered remote servers");
            registry.get(name)?
        }
        None => {
            owned = AuthenticatedClient::new(&config.pipeline)?;
            &owned
        }
    };

    tracing::info!(
        method = %config.method,
        base_url = %client.base_url(),
        path = %config.path,
        "Sending request"
    );

    let mut request = ApiRequest::new(config.method.clone(), config.path.clone());
    if let Some(body) = config.body.clone() {
        request = request.with_json(body);
    }

    let response = client
        .send(request)
        .await
        .with_context(|| format!("{} {} failed", config.method, config.path))?;

    if let Some(auth_error) = client.current_auth_error().await {
        tracing::error!("❌ Auth failed: {}", auth_error);
    }

    if response.is_success() {
        tracing::info!(status = %response.status, "✅ Request succeeded");
    } else {
        tracing::warn!(status = %response.status, "Request returned error status");
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "status": response.status.as_u16(),
            "data": response.data,
        }))?
    );

    if !response.is_success() {
        std::process::exit(1);
    }

    Ok(())
}

/// Initialize logging with the configured level and format
fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}
