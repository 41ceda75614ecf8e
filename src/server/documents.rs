//! Document transport endpoints used by the document server, and the conversion POST.

use axum::body::{Body, Bytes};
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Form, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use tokio_util::io::ReaderStream;

use super::{is_htmx, AppState, PathQuery};
use crate::callback::{CallbackEvent, CallbackResponse};
use crate::error::{AppError, AppResult};

/// Content type by lowercase extension.
pub fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "pptx" => "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "doc" => "application/msword",
        "xls" => "application/vnd.ms-excel",
        "ppt" => "application/vnd.ms-powerpoint",
        "odt" => "application/vnd.oasis.opendocument.text",
        "ods" => "application/vnd.oasis.opendocument.spreadsheet",
        "odp" => "application/vnd.oasis.opendocument.presentation",
        "pdf" => "application/pdf",
        "rtf" => "application/rtf",
        "txt" => "text/plain",
        "csv" => "text/csv",
        _ => "application/octet-stream",
    }
}

/// `attachment; filename="..."`, with an RFC 5987 `filename*` for non-ASCII names.
pub fn content_disposition(name: &str) -> HeaderValue {
    let ascii: String = name
        .chars()
        .map(|c| if c.is_ascii_graphic() || c == ' ' { c } else { '_' })
        .map(|c| if c == '"' || c == '\\' { '_' } else { c })
        .collect();
    let value = if name.is_ascii() {
        format!("attachment; filename=\"{ascii}\"")
    } else {
        format!("attachment; filename=\"{ascii}\"; filename*=UTF-8''{}", urlencoding::encode(name))
    };
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

/// `GET /download?path=`: stream the stored bytes.
pub async fn download(State(state): State<AppState>, Query(q): Query<PathQuery>) -> AppResult<Response> {
    let path = q.path().ok_or_else(|| AppError::user("missing_path", "File path is required"))?;
    let (doc, file) = state.store.open(path).await.map_err(|e| {
        tracing::warn!(target: "download", "download of {} failed: {}", path, e);
        AppError::from(e)
    })?;
    tracing::debug!(target: "download", "serving {} ({} bytes)", doc.path, doc.size);

    let mut resp = Body::from_stream(ReaderStream::new(file)).into_response();
    let headers = resp.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type_for(&doc.extension)));
    headers.insert(header::CONTENT_DISPOSITION, content_disposition(&doc.name));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(doc.size));
    Ok(resp)
}

/// `POST /callback?path=`: always 200 with `{"error":0|1}`.
pub async fn callback(State(state): State<AppState>, query: Result<Query<PathQuery>, QueryRejection>, body: Bytes) -> Json<CallbackResponse> {
    let q = match query {
        Ok(Query(q)) => q,
        Err(e) => {
            tracing::warn!(target: "callback", "invalid callback query: {}", e);
            return Json(CallbackResponse::FAILED);
        }
    };
    let event: CallbackEvent = match serde_json::from_slice(&body) {
        Ok(ev) => ev,
        Err(e) => {
            tracing::warn!(target: "callback", "invalid callback body: {}", e);
            return Json(CallbackResponse::FAILED);
        }
    };
    let settings = state.settings();
    Json(state.callbacks.handle(q.path(), &event, settings.secret()).await)
}

/// `POST /convert`: path from the query string or a form field.
pub async fn convert(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(q): Query<PathQuery>,
    form: Result<Form<PathQuery>, FormRejection>,
) -> AppResult<Response> {
    let form = form.map(|Form(f)| f).unwrap_or_default();
    let path = q
        .path()
        .or_else(|| form.path())
        .map(str::to_string)
        .ok_or_else(|| AppError::user("missing_path", "File path is required"))?;

    let settings = state.settings();
    let target = state.converter.convert(&path, &settings).await.map_err(|e| {
        tracing::error!(target: "convert", "conversion of {} failed: {}", path, e);
        AppError::from(e)
    })?;

    if is_htmx(&headers) {
        let location = format!("/editor?path={}", urlencoding::encode(&target));
        let mut resp = StatusCode::OK.into_response();
        if let Ok(v) = HeaderValue::from_str(&location) {
            resp.headers_mut().insert("hx-redirect", v);
        }
        return Ok(resp);
    }
    Ok(Json(serde_json::json!({ "success": true, "targetPath": target, "message": "Conversion successful" })).into_response())
}
