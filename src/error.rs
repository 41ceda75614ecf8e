//! Unified application error model for the HTTP surface.
//! Domain errors from storage, signing, conversion and settings map into `AppError`,
//! which renders as JSON for API endpoints or as a short HTML page for browser pages.
//! The callback endpoint does not use it; its reply vocabulary is fixed.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

use crate::config::ConfigError;
use crate::convert::ConvertError;
use crate::editor::DescriptorError;
use crate::storage::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    UserInput { code: String, message: String },
    NotFound { code: String, message: String },
    Forbidden { code: String, message: String },
    TooLarge { code: String, message: String },
    Internal { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::UserInput { code, .. }
            | AppError::NotFound { code, .. }
            | AppError::Forbidden { code, .. }
            | AppError::TooLarge { code, .. }
            | AppError::Internal { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::UserInput { message, .. }
            | AppError::NotFound { message, .. }
            | AppError::Forbidden { message, .. }
            | AppError::TooLarge { message, .. }
            | AppError::Internal { message, .. } => message.as_str(),
        }
    }

    pub fn user<S: Into<String>>(code: S, msg: S) -> Self { AppError::UserInput { code: code.into(), message: msg.into() } }
    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn forbidden<S: Into<String>>(code: S, msg: S) -> Self { AppError::Forbidden { code: code.into(), message: msg.into() } }
    pub fn too_large<S: Into<String>>(code: S, msg: S) -> Self { AppError::TooLarge { code: code.into(), message: msg.into() } }
    pub fn internal<S: Into<String>>(code: S, msg: S) -> Self { AppError::Internal { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::UserInput { .. } => 400,
            AppError::NotFound { .. } => 404,
            AppError::Forbidden { .. } => 403,
            AppError::TooLarge { .. } => 413,
            AppError::Internal { .. } => 500,
        }
    }

    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// `{"error": <status>, "code": ..., "message": ...}`
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({ "error": self.http_status(), "code": self.code_str(), "message": self.message() })
    }

    /// Browser-facing rendition: a minimal HTML page with a title and the message.
    pub fn into_page(self, title: &str) -> Response {
        let status = self.status_code();
        let body = error_page(title, self.message());
        (status, [(header::CONTENT_TYPE, "text/html; charset=utf-8")], body).into_response()
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response { (self.status_code(), axum::Json(self.to_json())).into_response() }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self { AppError::Internal { code: "internal".into(), message: err.to_string() } }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        let message = err.to_string();
        match err {
            StoreError::NotFound => AppError::NotFound { code: "not_found".into(), message },
            StoreError::InvalidPath => AppError::UserInput { code: "invalid_path".into(), message },
            StoreError::PermissionDenied => AppError::Forbidden { code: "permission_denied".into(), message },
            StoreError::TooLarge { .. } => AppError::TooLarge { code: "too_large".into(), message },
            StoreError::SaveFailed(_) => AppError::Internal { code: "save_failed".into(), message },
            StoreError::Io(_) => AppError::Internal { code: "io".into(), message },
        }
    }
}

impl From<DescriptorError> for AppError {
    fn from(err: DescriptorError) -> Self {
        let message = err.to_string();
        match err {
            DescriptorError::UnsupportedFormat(_) => AppError::UserInput { code: "unsupported_format".into(), message },
            DescriptorError::Signing(_) => AppError::Internal { code: "signing".into(), message },
        }
    }
}

impl From<ConvertError> for AppError {
    fn from(err: ConvertError) -> Self {
        let message = err.to_string();
        match err {
            ConvertError::NotConvertible(_) | ConvertError::NoTarget(_) => AppError::UserInput { code: "not_convertible".into(), message },
            ConvertError::NotConfigured => AppError::UserInput { code: "not_configured".into(), message },
            ConvertError::Store(e) => AppError::from(e),
            ConvertError::Failed { .. } => AppError::Internal { code: "conversion_failed".into(), message },
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        let message = err.to_string();
        match err {
            ConfigError::Invalid(_) => AppError::UserInput { code: "invalid_settings".into(), message },
            ConfigError::NotFound | ConfigError::Io(_) => AppError::Internal { code: "settings_io".into(), message },
        }
    }
}

/// Escape text for HTML element content and attribute values.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn error_page(title: &str, message: &str) -> String {
    let title = escape_html(title);
    let message = escape_html(message);
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body><h1>{title}</h1><p>{message}</p></body></html>\n"
    )
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
