//! Settings API: read, save, secret generation and document server probing.
//! Saves and probes reply 200 with a `{success|valid, message}` body; htmx callers get
//! a small HTML fragment instead.

use axum::extract::rejection::FormRejection;
use axum::extract::{Form, FromRequest, Request, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{is_htmx, AppState};
use crate::config::Settings;
use crate::error::{escape_html, AppError, AppResult};
use crate::signing;

/// `GET /api/settings` body. The secret itself is never echoed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsView {
    pub document_server_url: String,
    pub base_url: String,
    pub doc_server_path: String,
    pub has_secret: bool,
}

impl From<&Settings> for SettingsView {
    fn from(s: &Settings) -> Self {
        Self {
            document_server_url: s.document_server_url.clone(),
            base_url: s.base_url.clone(),
            doc_server_path: s.advertised_doc_server_path().to_string(),
            has_secret: s.has_secret(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsForm {
    pub document_server_url: String,
    /// Empty keeps the current secret.
    pub document_server_secret: String,
    pub base_url: String,
    /// `true`/`on`/`1` removes the secret and turns signing off.
    pub clear_secret: String,
}

impl SettingsForm {
    fn clear_secret(&self) -> bool { matches!(self.clear_secret.trim().to_ascii_lowercase().as_str(), "true" | "on" | "1") }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ValidateRequest {
    pub document_server_url: String,
}

fn message_fragment(success: bool, message: &str) -> Response {
    let class = if success { "success" } else { "error" };
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        format!(r#"<div class="message {class}">{}</div>"#, escape_html(message)),
    )
        .into_response()
}

fn save_reply(headers: &HeaderMap, success: bool, message: &str) -> Response {
    if is_htmx(headers) {
        return message_fragment(success, message);
    }
    Json(serde_json::json!({ "success": success, "message": message })).into_response()
}

pub async fn get_settings(State(state): State<AppState>) -> Json<SettingsView> { Json(SettingsView::from(&state.settings())) }

/// `POST /api/settings` (form fields `documentServerUrl`, `documentServerSecret`, `baseUrl`, `clearSecret`).
pub async fn save_settings(State(state): State<AppState>, headers: HeaderMap, form: Result<Form<SettingsForm>, FormRejection>) -> Response {
    let Ok(Form(form)) = form else {
        return save_reply(&headers, false, "Invalid form data");
    };
    let server_url = form.document_server_url.trim().trim_end_matches('/').to_string();
    let base_url = form.base_url.trim().trim_end_matches('/').to_string();
    if server_url.is_empty() {
        return save_reply(&headers, false, "Document Server URL must not be empty");
    }
    if base_url.is_empty() {
        return save_reply(&headers, false, "Callback base URL must not be empty");
    }

    let current = state.settings();
    let secret = match form.document_server_secret.trim() {
        _ if form.clear_secret() => String::new(),
        "" => current.document_server_secret,
        s => s.to_string(),
    };
    let updated = Settings {
        document_server_url: server_url,
        document_server_secret: secret,
        base_url,
        doc_server_path: current.doc_server_path,
    };
    if let Some(store) = &state.settings_store {
        if let Err(e) = store.save(&updated) {
            tracing::error!(target: "settings", "failed to save settings to {}: {}", store.path().display(), e);
            return save_reply(&headers, false, "Failed to save settings");
        }
    }
    tracing::info!(
        target: "settings",
        "settings updated: document server {}, secret {}",
        updated.document_server_url,
        if updated.has_secret() { "configured" } else { "not configured" }
    );
    state.replace_settings(updated);
    save_reply(&headers, true, "Settings saved")
}

/// `POST /api/settings/generate-key`
pub async fn generate_key(headers: HeaderMap) -> Response {
    let secret = signing::generate_secret();
    if is_htmx(&headers) {
        return (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            format!(r#"<input type="text" id="secret" name="documentServerSecret" class="input-field" value="{secret}">"#),
        )
            .into_response();
    }
    Json(serde_json::json!({ "secret": secret })).into_response()
}

/// `POST /api/settings/validate`: JSON or form `documentServerUrl`, falling back to the
/// configured URL.
pub async fn validate(State(state): State<AppState>, req: Request) -> AppResult<Response> {
    let headers = req.headers().clone();
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.contains("application/json"));
    let body = if is_json {
        Json::<ValidateRequest>::from_request(req, &())
            .await
            .map(|Json(b)| b)
            .map_err(|_| AppError::user("invalid_json", "Invalid JSON"))?
    } else {
        Form::<ValidateRequest>::from_request(req, &()).await.map(|Form(b)| b).unwrap_or_default()
    };

    let mut url = body.document_server_url.trim().to_string();
    if url.is_empty() {
        url = state.settings().document_server_url;
    }
    let url = url.trim().trim_end_matches('/').to_string();
    if url.is_empty() {
        return Err(AppError::user("missing_url", "Document Server URL is required"));
    }

    let result = state.remote.check_health(&url).await;
    if let Err(e) = &result {
        tracing::info!(target: "settings", "document server at {} is not reachable: {}", url, e);
    }
    if is_htmx(&headers) {
        return Ok(match result {
            Ok(()) => message_fragment(true, "Connection successful"),
            Err(e) => message_fragment(false, &format!("Connection failed: {e}")),
        });
    }
    let (valid, message) = match result {
        Ok(()) => (true, "Connection successful".to_string()),
        Err(e) => (false, e.to_string()),
    };
    Ok(Json(serde_json::json!({ "valid": valid, "message": message })).into_response())
}
