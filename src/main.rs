mod api;
mod error;
mod history;
mod media;
mod pipeline;
mod plan;
mod schedule;
mod server;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use api::XClient;
use history::FileHistoryStore;
use pipeline::Pipeline;

#[derive(Debug, Deserialize)]
struct AppConfig {
    #[serde(default = "default_bind")]
    bind: String,
    schedule_path: PathBuf,
    history_path: PathBuf,
    x: api::Config,
}

fn default_bind() -> String {
    "127.0.0.1:8080".into()
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SCHEDULED_POST_X_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/root".into());
    PathBuf::from(home)
        .join(".config")
        .join("scheduled-post-x")
        .join("config.toml")
}

fn load_config() -> anyhow::Result<AppConfig> {
    let path = config_path();
    let content = std::fs::read_to_string(&path).with_context(|| {
        format!(
            "Failed to read config file: {}\n\
             Create it with your X OAuth credentials and file paths.\n\
             Example:\n\n\
             bind = \"127.0.0.1:8080\"\n\
             schedule_path = \"/var/lib/scheduled-post-x/schedule.yaml\"\n\
             history_path = \"/var/lib/scheduled-post-x/history.json\"\n\n\
             [x]\n\
             api_key = \"your-api-key\"\n\
             api_key_secret = \"your-api-key-secret\"\n\
             access_token = \"your-access-token\"\n\
             access_token_secret = \"your-access-token-secret\"\n\n\
             Get credentials at https://developer.x.com/",
            path.display()
        )
    })?;

    let config: AppConfig =
        toml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))?;

    config
        .x
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid config at {}: {e}", path.display()))?;

    tracing::info!("Config loaded and validated from {}", path.display());
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let config = load_config()?;

    let schedule_text = std::fs::read_to_string(&config.schedule_path)
        .with_context(|| format!("Failed to read schedule {}", config.schedule_path.display()))?;

    let pipeline = Arc::new(Pipeline::new(
        &schedule_text,
        Arc::new(XClient::new(config.x.clone())),
        Arc::new(FileHistoryStore::new(config.history_path.clone())),
    ));
    if let Some(e) = pipeline.schedule_error() {
        tracing::warn!("schedule is unusable until fixed: {e}");
    }

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, server::router(pipeline)).await?;
    Ok(())
}
