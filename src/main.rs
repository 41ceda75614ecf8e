use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use docbridge::cgi::{self, CgiEnv};
use docbridge::config::{resolve_base_url, ConfigError, RunConfig, RunMode, Settings, SettingsStore, DEFAULT_PORT};
use docbridge::server::{self, AppState};
use docbridge::storage::DocumentStore;

fn load_settings(store: &SettingsStore) -> Settings {
    match store.load() {
        Ok(s) => s,
        Err(ConfigError::NotFound) => Settings::default(),
        Err(e) => {
            warn!(target: "startup", "Warning: {}, using defaults", e);
            Settings::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr: in CGI mode stdout carries the response
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info")).context("invalid log filter")?;
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let args: Vec<String> = std::env::args().collect();
    let cfg = RunConfig::parse(&args, |k| std::env::var(k).ok())?;

    let settings_store = Arc::new(SettingsStore::from_env());
    let mut settings = load_settings(&settings_store);
    let store = DocumentStore::new(cfg.root.clone(), cfg.max_file_size);

    match cfg.mode {
        RunMode::Server => {
            let base_url = resolve_base_url(cfg.base_url.as_deref(), &settings.base_url, cfg.port);
            let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
            info!(
                target: "startup",
                "docbridge starting in server mode: RUST_LOG='{}', port={}, base_url='{}', root={:?}",
                rust_log, cfg.port, base_url, cfg.root
            );
            if !settings.document_server_url.is_empty() {
                info!(target: "startup", "  Document Server URL: {}", settings.document_server_url);
            }
            info!(target: "startup", "  Signing secret: {}", if settings.has_secret() { "configured" } else { "not configured" });
            if !settings.base_url.is_empty() && cfg.base_url.as_deref().is_some_and(|f| f != settings.base_url) {
                info!(target: "startup", "  Note: --base-url flag overrides BASE_URL");
            }
            settings.base_url = base_url;
            let state = AppState::new(settings, Some(settings_store), store)?;
            server::run_server(cfg.port, state).await
        }
        RunMode::Cgi => {
            // callbacks must reach the long-running listener, not this one-shot process
            settings.base_url = resolve_base_url(cfg.base_url.as_deref(), &settings.base_url, DEFAULT_PORT);
            let env = CgiEnv::from_process();
            if settings.doc_server_path.is_empty() {
                let derived = env.doc_server_path();
                if !derived.is_empty() {
                    info!(target: "cgi", "DocServerPath derived from environment: {}", derived);
                    settings.doc_server_path = derived;
                }
            }
            let state = AppState::new(settings, Some(settings_store), store)?;
            cgi::serve(server::router(state), &env).await.context("CGI serve error")
        }
    }
}
