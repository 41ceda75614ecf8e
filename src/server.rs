//!
//! docbridge HTTP server
//! ---------------------
//! Axum router for the connector. The same router serves a standalone listener
//! (`run_server`) and single CGI invocations (`crate::cgi::serve`).
//!
//! Responsibilities:
//! - Document transport for the document server: `/download` and `/callback`.
//! - Browser pages: `/editor` and `/convert`, plus `POST /convert` for the conversion itself.
//! - Settings API under `/api/settings` and the descriptor API at `/api/editor-config`.
//! - Reverse proxy to the document server under `/doc-svr`.
//!
//! Settings are held as one in-memory snapshot; each request works on a clone, so a
//! settings save mid-request never changes what that request sees.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderMap;
use axum::routing::{any, get, post};
use axum::Router;
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::info;

use crate::callback::CallbackHandler;
use crate::config::{Settings, SettingsStore};
use crate::convert::Converter;
use crate::editor::DescriptorBuilder;
use crate::formats::FormatRegistry;
use crate::proxy;
use crate::remote::{RemoteClient, RemoteError};
use crate::storage::DocumentStore;

pub mod documents;
pub mod pages;
pub mod settings;

/// Shared server state injected into all handlers.
#[derive(Clone)]
pub struct AppState {
    settings: Arc<RwLock<Settings>>,
    /// Where `POST /api/settings` persists; `None` keeps changes in memory only.
    pub settings_store: Option<Arc<SettingsStore>>,
    pub store: DocumentStore,
    pub formats: Arc<FormatRegistry>,
    pub remote: RemoteClient,
    pub callbacks: CallbackHandler,
    pub converter: Converter,
    pub descriptors: DescriptorBuilder,
}

impl AppState {
    pub fn new(settings: Settings, settings_store: Option<Arc<SettingsStore>>, store: DocumentStore) -> Result<Self, RemoteError> {
        let formats = Arc::new(FormatRegistry::standard());
        let remote = RemoteClient::new()?;
        Ok(Self {
            settings: Arc::new(RwLock::new(settings)),
            settings_store,
            callbacks: CallbackHandler::new(store.clone(), remote.clone()),
            converter: Converter::new(store.clone(), formats.clone(), remote.clone()),
            descriptors: DescriptorBuilder::new(formats.clone()),
            store,
            formats,
            remote,
        })
    }

    /// Snapshot of the current settings.
    pub fn settings(&self) -> Settings { self.settings.read().clone() }

    pub fn replace_settings(&self, settings: Settings) { *self.settings.write() = settings; }
}

/// `?path=` on most endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct PathQuery {
    #[serde(default)]
    pub path: Option<String>,
}

impl PathQuery {
    pub fn path(&self) -> Option<&str> { self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) }
}

pub(crate) fn is_htmx(headers: &HeaderMap) -> bool {
    headers.get("hx-request").and_then(|v| v.to_str().ok()) == Some("true")
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(|| async { "docbridge ok" }))
        .route("/healthz", get(|| async { "ok" }))
        .route("/download", get(documents::download))
        .route("/callback", post(documents::callback))
        .route("/convert", get(pages::convert_page).post(documents::convert))
        .route("/editor", get(pages::editor_page))
        .route("/api/editor-config", get(pages::editor_config))
        .route("/api/settings", get(settings::get_settings).post(settings::save_settings))
        .route("/api/settings/generate-key", post(settings::generate_key))
        .route("/api/settings/validate", post(settings::validate))
        .route(proxy::PROXY_PREFIX, any(proxy::proxy_handler))
        .route(&format!("{}/{{*rest}}", proxy::PROXY_PREFIX), any(proxy::proxy_handler))
        .layer(axum::middleware::from_fn(proxy::capture_remote_addr))
        .with_state(state)
}

/// Serve `state` on `0.0.0.0:port` until Ctrl-C or SIGTERM.
pub async fn run_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let addr: SocketAddr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await.with_context(|| format!("Failed to bind {}", addr))?;
    info!(target: "startup", "Server listening on {}", addr);
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!(target: "startup", "Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(target: "startup", "failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                tracing::warn!(target: "startup", "failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target: "startup", "Received Ctrl-C, shutting down..."),
        _ = terminate => info!(target: "startup", "Received SIGTERM, shutting down..."),
    }
}
