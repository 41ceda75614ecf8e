//! Browser pages (editor host, conversion prompt) and the descriptor API.

use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use super::AppState;
use crate::config::Settings;
use crate::editor::{DescriptorRequest, SessionDescriptor};
use crate::error::{escape_html, AppError, AppResult};
use crate::storage::{DocumentRef, StoreError};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EditorQuery {
    pub path: Option<String>,
    pub mode: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub lang: Option<String>,
}

impl EditorQuery {
    fn path(&self) -> Option<&str> { self.path.as_deref().map(str::trim).filter(|p| !p.is_empty()) }
    fn view_requested(&self) -> bool { self.mode.as_deref() == Some("view") }
}

fn html(body: String) -> Response { ([(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response() }

/// 302 to `location`.
fn found(location: String) -> Response { (StatusCode::FOUND, [(header::LOCATION, location)]).into_response() }

fn file_error_page(e: StoreError) -> Response {
    let message = match &e {
        StoreError::NotFound => "File does not exist".to_string(),
        other => format!("Unable to read file information: {other}"),
    };
    let status = AppError::from(e).http_status();
    let mut resp = AppError::user("file_error", message.as_str()).into_page("File error");
    *resp.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    resp
}

fn build_descriptor(state: &AppState, settings: &Settings, doc: &DocumentRef, q: &EditorQuery) -> AppResult<SessionDescriptor> {
    let req = DescriptorRequest {
        document: doc,
        user_id: q.user_id.as_deref().unwrap_or(""),
        user_name: q.user_name.as_deref().unwrap_or(""),
        lang: q.lang.as_deref().unwrap_or(""),
        base_url: &settings.base_url,
        secret: settings.secret(),
        view_requested: q.view_requested(),
    };
    Ok(state.descriptors.build(&req)?)
}

/// JSON safe to embed inside a `<script>` element.
pub fn script_json(value: &impl serde::Serialize) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

/// Script base for the browser. A host-qualified prefix (`nas:5666/cgi/.../doc-svr`)
/// becomes protocol-relative.
pub fn script_base(doc_server_path: &str) -> String {
    if doc_server_path.starts_with('/') || doc_server_path.contains("://") {
        doc_server_path.to_string()
    } else {
        format!("//{doc_server_path}")
    }
}

pub fn render_editor(title: &str, doc_server_path: &str, config_json: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>{title} - Editor</title>
    <style>
        html, body {{ height: 100%; margin: 0; overflow: hidden; }}
        #editor-container {{ width: 100%; height: 100%; }}
    </style>
</head>
<body>
    <div id="editor-container"></div>
    <script src="{src}/web-apps/apps/api/documents/api.js"></script>
    <script>new DocsAPI.DocEditor("editor-container", {config_json});</script>
</body>
</html>
"#,
        title = escape_html(title),
        src = escape_html(&script_base(doc_server_path)),
    )
}

pub fn render_convert(name: &str, path: &str, source: &str, target: &str) -> String {
    let encoded = urlencoding::encode(path);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <title>Convert document</title>
    <style>
        body {{ font-family: sans-serif; max-width: 500px; margin: 40px auto; padding: 20px; }}
        .btn {{ display: block; width: 100%; padding: 12px; margin: 10px 0; text-align: center; border: none; border-radius: 4px; cursor: pointer; text-decoration: none; }}
        .btn-primary {{ background: #4a90d9; color: white; }}
        .btn-secondary {{ background: #f0f0f0; color: #333; }}
    </style>
</head>
<body>
    <h1>Convert document</h1>
    <p>File: {name}</p>
    <p>Format: {source} &rarr; {target}</p>
    <div id="error"></div>
    <form id="convert-form" method="post" action="/convert">
        <input type="hidden" name="path" value="{path}">
        <button type="submit" class="btn btn-primary">Convert to {target} and edit</button>
    </form>
    <a href="/editor?path={encoded}&amp;mode=view" class="btn btn-secondary">View read-only</a>
    <script>
    document.getElementById("convert-form").addEventListener("submit", async (ev) => {{
        ev.preventDefault();
        const resp = await fetch("/convert", {{ method: "POST", headers: {{ "HX-Request": "true" }}, body: new URLSearchParams(new FormData(ev.target)) }});
        const next = resp.headers.get("HX-Redirect");
        if (next) {{ window.location.href = next; return; }}
        const body = await resp.json().catch(() => ({{ message: "Conversion failed" }}));
        document.getElementById("error").textContent = body.message;
    }});
    </script>
</body>
</html>
"#,
        name = escape_html(name),
        path = escape_html(path),
        source = escape_html(source),
        target = escape_html(target),
    )
}

/// `GET /editor`: host page for the document server's editor.
///
/// Convertible formats redirect to the conversion prompt unless `mode=view`.
pub async fn editor_page(State(state): State<AppState>, Query(q): Query<EditorQuery>) -> Response {
    let Some(path) = q.path() else {
        return AppError::user("missing_path", "No file path specified").into_page("Invalid request");
    };
    let doc = match state.store.stat(path).await {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(target: "editor", "cannot open {}: {}", path, e);
            return file_error_page(e);
        }
    };

    if state.formats.is_convertible(&doc.extension) && !q.view_requested() {
        return found(format!("/convert?path={}", urlencoding::encode(path)));
    }

    let settings = state.settings();
    let descriptor = match build_descriptor(&state, &settings, &doc, &q) {
        Ok(d) => d,
        Err(e) => {
            tracing::warn!(target: "editor", "cannot build editor config for {}: {}", path, e);
            return e.into_page("Configuration error");
        }
    };
    let config_json = match script_json(&descriptor) {
        Ok(j) => j,
        Err(e) => return AppError::internal("internal", e.to_string().as_str()).into_page("Internal error"),
    };
    tracing::info!(target: "editor", "opening {} in {:?} mode", doc.path, descriptor.editor_config.mode);
    html(render_editor(&doc.name, settings.advertised_doc_server_path(), &config_json))
}

/// `GET /convert`: confirmation page. Formats without a target go straight to the editor.
pub async fn convert_page(State(state): State<AppState>, Query(q): Query<EditorQuery>) -> Response {
    let Some(path) = q.path() else {
        return AppError::user("missing_path", "No file path specified").into_page("Invalid request");
    };
    let doc = match state.store.stat(path).await {
        Ok(d) => d,
        Err(e) => return file_error_page(e),
    };
    match state.formats.conversion_target(&doc.extension) {
        Some(target) => html(render_convert(&doc.name, path, &doc.extension, target)),
        None => found(format!("/editor?path={}", urlencoding::encode(path))),
    }
}

/// `GET /api/editor-config`: the descriptor as JSON.
pub async fn editor_config(State(state): State<AppState>, Query(q): Query<EditorQuery>) -> AppResult<Json<SessionDescriptor>> {
    let path = q.path().ok_or_else(|| AppError::user("missing_path", "File path is required"))?;
    let doc = state.store.stat(path).await?;
    let settings = state.settings();
    Ok(Json(build_descriptor(&state, &settings, &doc, &q)?))
}
