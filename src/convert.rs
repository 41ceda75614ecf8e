//!
//! docbridge conversion pipeline
//! -----------------------------
//! One synchronous round trip per call: post a job to the document server, expect
//! a finished result in the same response, download it, and store it beside the
//! source with the target extension. Asynchronous (`endConvert: false`) replies
//! are failures; there is no polling.
//!
//! Only the local write is atomic. A job the remote side accepted but whose result
//! never got downloaded is not cleaned up remotely.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::Settings;
use crate::editor::{compute_key, download_url};
use crate::formats::FormatRegistry;
use crate::remote::RemoteClient;
use crate::signing::{self, Claims};
use crate::storage::{DocumentStore, StoreError};

/// Fields of a conversion job; also what gets signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversionClaims {
    #[serde(rename = "async")]
    pub is_async: bool,
    pub filetype: String,
    pub key: String,
    pub outputtype: String,
    pub title: String,
    pub url: String,
}

/// Request body for `ConvertService.ashx`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionJob {
    #[serde(flatten)]
    pub claims: ConversionClaims,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConversionResponse {
    pub end_convert: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    pub percent: i64,
    pub error: i64,
}

impl ConversionResponse {
    /// URL of the finished result, or why there is none.
    pub fn result_url(&self) -> Result<&str, ConvertError> {
        if self.error != 0 {
            return Err(ConvertError::failed(format!("conversion error code: {}", self.error)));
        }
        if !self.end_convert {
            return Err(ConvertError::failed("conversion not complete (async mode not supported)"));
        }
        match self.file_url.as_deref() {
            Some(u) if !u.is_empty() => Ok(u),
            _ => Err(ConvertError::failed("no file URL in response")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConvertError {
    #[error("file format is not convertible: {0}")]
    NotConvertible(String),
    #[error("no conversion target for format: {0}")]
    NoTarget(String),
    #[error("document server URL not configured")]
    NotConfigured,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("conversion failed: {cause}")]
    Failed { cause: String },
}

impl ConvertError {
    pub fn failed(cause: impl Into<String>) -> Self { ConvertError::Failed { cause: cause.into() } }
}

/// Same directory and stem, new extension.
pub fn target_path(source: &str, target_ext: &str) -> String {
    let (dir, name) = match source.rfind('/') {
        Some(i) => (&source[..=i], &source[i + 1..]),
        None => ("", source),
    };
    let stem = match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    };
    format!("{dir}{stem}.{target_ext}")
}

/// Job key: unique per call, restricted to the key alphabet the document server accepts.
pub fn job_key(path: &str) -> String { format!("convert_{}", compute_key(path, Utc::now())) }

#[derive(Debug, Clone)]
pub struct Converter {
    store: DocumentStore,
    formats: Arc<FormatRegistry>,
    remote: RemoteClient,
}

impl Converter {
    pub fn new(store: DocumentStore, formats: Arc<FormatRegistry>, remote: RemoteClient) -> Self {
        Self { store, formats, remote }
    }

    /// Build the job for `path`, signed when the settings carry a secret.
    pub async fn prepare(&self, path: &str, settings: &Settings) -> Result<(ConversionJob, String), ConvertError> {
        let doc = self.store.stat(path).await?;
        let cap = self
            .formats
            .lookup(&doc.extension)
            .filter(|c| c.convertible())
            .ok_or_else(|| ConvertError::NotConvertible(doc.extension.clone()))?;
        let target = cap.convert_target().ok_or_else(|| ConvertError::NoTarget(doc.extension.clone()))?;
        if !settings.document_server_configured() {
            return Err(ConvertError::NotConfigured);
        }

        let claims = ConversionClaims {
            is_async: false,
            filetype: doc.extension.clone(),
            key: job_key(&doc.path),
            outputtype: target.to_string(),
            title: doc.name.clone(),
            url: download_url(&settings.base_url, &doc.path),
        };
        let token = match settings.secret() {
            Some(secret) => Some(
                signing::sign(secret, &Claims::Conversion(claims.clone()))
                    .map_err(|e| ConvertError::failed(format!("failed to sign conversion request: {e}")))?,
            ),
            None => None,
        };
        Ok((ConversionJob { claims, token }, target_path(&doc.path, target)))
    }

    /// Convert the document at `path` and return the path of the stored result.
    pub async fn convert(&self, path: &str, settings: &Settings) -> Result<String, ConvertError> {
        let (job, target) = self.prepare(path, settings).await?;
        tracing::info!(target: "convert", "converting {} ({} -> {}) key={}", path, job.claims.filetype, job.claims.outputtype, job.claims.key);

        let resp = self
            .remote
            .convert(&settings.document_server_url, &job)
            .await
            .map_err(|e| ConvertError::failed(e.to_string()))?;
        let file_url = resp.result_url()?;

        let body = self
            .remote
            .download(file_url)
            .await
            .map_err(|e| ConvertError::failed(format!("failed to download converted file: {e}")))?;
        let written = self.store.save(&target, body).await?;
        tracing::info!(target: "convert", "conversion successful: {} -> {} ({} bytes)", path, target, written);
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_path_keeps_directory_and_stem() {
        assert_eq!(target_path("/docs/report.doc", "docx"), "/docs/report.docx");
        assert_eq!(target_path("/a.b/c.d.ods", "xlsx"), "/a.b/c.d.xlsx");
        assert_eq!(target_path("/docs/README", "docx"), "/docs/README.docx");
        assert_eq!(target_path("/docs/.hidden", "docx"), "/docs/.hidden.docx");
        assert_eq!(target_path("notes.txt", "docx"), "notes.docx");
    }

    #[test]
    fn job_keys_are_prefixed_and_distinct() {
        let a = job_key("/docs/a.doc");
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = job_key("/docs/a.doc");
        assert!(a.starts_with("convert_"));
        assert_eq!(a.len(), "convert_".len() + crate::editor::KEY_LEN);
        assert_ne!(a, b);
    }

    #[test]
    fn job_wire_shape() {
        let job = ConversionJob {
            claims: ConversionClaims {
                is_async: false,
                filetype: "doc".into(),
                key: "k".into(),
                outputtype: "docx".into(),
                title: "a.doc".into(),
                url: "http://h/download?path=%2Fa.doc".into(),
            },
            token: None,
        };
        let v = serde_json::to_value(&job).unwrap();
        assert_eq!(v["async"], false);
        assert_eq!(v["outputtype"], "docx");
        assert!(v.get("token").is_none());
        let v = serde_json::to_value(ConversionJob { token: Some("t".into()), ..job }).unwrap();
        assert_eq!(v["token"], "t");
    }

    #[test]
    fn response_checks_in_order() {
        let parse = |s: &str| serde_json::from_str::<ConversionResponse>(s).unwrap();
        assert_eq!(parse(r#"{"endConvert":true,"fileUrl":"http://x/y","percent":100}"#).result_url().unwrap(), "http://x/y");
        assert_eq!(
            parse(r#"{"endConvert":true,"fileUrl":"http://x/y","error":-4}"#).result_url(),
            Err(ConvertError::failed("conversion error code: -4"))
        );
        assert_eq!(
            parse(r#"{"endConvert":false,"percent":40}"#).result_url(),
            Err(ConvertError::failed("conversion not complete (async mode not supported)"))
        );
        assert_eq!(parse(r#"{"endConvert":true,"fileUrl":""}"#).result_url(), Err(ConvertError::failed("no file URL in response")));
    }

    #[tokio::test]
    async fn prepare_checks_preconditions() {
        let tmp = tempfile::tempdir().unwrap();
        let conv = Converter::new(DocumentStore::unrestricted(), Arc::new(FormatRegistry::standard()), RemoteClient::new().unwrap());
        let doc = tmp.path().join("a.doc");
        let docx = tmp.path().join("a.docx");
        std::fs::write(&doc, b"legacy").unwrap();
        std::fs::write(&docx, b"ooxml").unwrap();
        let doc = doc.to_string_lossy().to_string();

        let empty = Settings::default();
        assert_eq!(conv.prepare(&doc, &empty).await.unwrap_err(), ConvertError::NotConfigured);
        assert_eq!(
            conv.prepare(&docx.to_string_lossy(), &empty).await.unwrap_err(),
            ConvertError::NotConvertible("docx".into())
        );

        let settings = Settings {
            document_server_url: "http://ds".into(),
            document_server_secret: "s".into(),
            base_url: "http://nas:10099/".into(),
            ..Settings::default()
        };
        let (job, target) = conv.prepare(&doc, &settings).await.unwrap();
        assert!(target.ends_with("/a.docx"));
        assert_eq!(job.claims.filetype, "doc");
        assert_eq!(job.claims.outputtype, "docx");
        assert!(job.claims.url.starts_with("http://nas:10099/download?path="));
        let token = job.token.unwrap();
        assert_eq!(signing::verify("s", &token).unwrap(), Claims::Conversion(job.claims));
    }
}
