//! Session descriptor construction.
//!
//! The descriptor is the JSON object the browser passes to the document server's
//! editor script. When a shared secret is configured the document, document type
//! and editor config are signed and the token rides along; without a secret the
//! descriptor is unsigned and the document server must accept that.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::formats::{DocumentCategory, FormatRegistry};
use crate::signing::{self, Claims, TokenError};
use crate::storage::DocumentRef;

use super::key::compute_key;

pub const ANONYMOUS_USER_ID: &str = "anonymous";
pub const ANONYMOUS_USER_NAME: &str = "Anonymous User";
/// Used when no externally reachable base URL is configured.
pub const DEFAULT_BASE_URL: &str = "http://localhost:10099";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EditMode {
    Edit,
    View,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub edit: bool,
    pub download: bool,
    pub print: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentConfig {
    pub file_type: String,
    pub key: String,
    pub title: String,
    pub url: String,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorConfig {
    pub callback_url: String,
    pub lang: String,
    pub mode: EditMode,
    pub user: UserInfo,
}

/// The signed part of a descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditorClaims {
    pub document: DocumentConfig,
    pub document_type: DocumentCategory,
    pub editor_config: EditorConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub document: DocumentConfig,
    pub document_type: DocumentCategory,
    pub editor_config: EditorConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl SessionDescriptor {
    pub fn claims(&self) -> EditorClaims {
        EditorClaims {
            document: self.document.clone(),
            document_type: self.document_type,
            editor_config: self.editor_config.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("unsupported file format: {0}")]
    UnsupportedFormat(String),
    #[error("failed to sign descriptor: {0}")]
    Signing(#[from] TokenError),
}

/// Inputs for one descriptor build.
#[derive(Debug, Clone)]
pub struct DescriptorRequest<'a> {
    pub document: &'a DocumentRef,
    pub user_id: &'a str,
    pub user_name: &'a str,
    pub lang: &'a str,
    pub base_url: &'a str,
    pub secret: Option<&'a str>,
    pub view_requested: bool,
}

#[derive(Debug, Clone)]
pub struct DescriptorBuilder {
    formats: Arc<FormatRegistry>,
}

impl DescriptorBuilder {
    pub fn new(formats: Arc<FormatRegistry>) -> Self { Self { formats } }

    pub fn build(&self, req: &DescriptorRequest<'_>) -> Result<SessionDescriptor, DescriptorError> {
        let doc = req.document;
        let cap = self
            .formats
            .lookup(&doc.extension)
            .ok_or_else(|| DescriptorError::UnsupportedFormat(doc.extension.clone()))?;

        let can_edit = cap.editable() && !req.view_requested;
        let mode = if can_edit { EditMode::Edit } else { EditMode::View };


        let claims = EditorClaims {
            document: DocumentConfig {
                file_type: doc.extension.clone(),
                key: compute_key(&doc.path, doc.modified),
                title: doc.name.clone(),
                url: download_url(req.base_url, &doc.path),
                permissions: Permissions { edit: can_edit, download: true, print: true },
            },
            document_type: cap.category,
            editor_config: EditorConfig {
                callback_url: callback_url(req.base_url, &doc.path),
                lang: normalize_language(req.lang),
                mode,
                user: UserInfo {
                    id: non_empty_or(req.user_id, ANONYMOUS_USER_ID),
                    name: non_empty_or(req.user_name, ANONYMOUS_USER_NAME),
                },
            },
        };

        let token = match req.secret.filter(|s| !s.is_empty()) {
            Some(secret) => Some(signing::sign(secret, &Claims::Editor(claims.clone()))?),
            None => None,
        };

        Ok(SessionDescriptor {
            document: claims.document,
            document_type: claims.document_type,
            editor_config: claims.editor_config,
            token,
        })
    }
}

/// Two-letter editor language. Empty means English; any Chinese variant collapses to `zh`.
pub fn normalize_language(lang: &str) -> String {
    let lang = lang.trim().to_lowercase();
    if lang.is_empty() {
        return "en".to_string();
    }
    if lang.starts_with("zh") {
        return "zh".to_string();
    }
    lang.chars().take(2).collect()
}

/// `{base}/download?path=...` for a logical path.
pub fn download_url(base_url: &str, path: &str) -> String {
    format!("{}/download?path={}", trimmed_base_url(base_url), urlencoding::encode(path))
}

pub fn callback_url(base_url: &str, path: &str) -> String {
    format!("{}/callback?path={}", trimmed_base_url(base_url), urlencoding::encode(path))
}

fn trimmed_base_url(base_url: &str) -> &str {
    let base = base_url.trim();
    if base.is_empty() { DEFAULT_BASE_URL } else { base.trim_end_matches('/') }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    let v = value.trim();
    if v.is_empty() { fallback.to_string() } else { v.to_string() }
}
