//!
//! docbridge save callback
//! -----------------------
//! The document server reports session status by POSTing to the callback URL
//! embedded in the descriptor. Each call is handled on its own; the only reply
//! vocabulary is `{"error":0}` or `{"error":1}`.
//!
//! Dispatch per status:
//! - 1 editing, 3 save error, 4 closed, 7 force-save error: logged, acknowledged.
//! - 2 saved, 6 force-save: download `url` and store it at the callback's path.
//! - anything else: logged and acknowledged.
//!
//! A missing path fails regardless of status. With a secret configured, a token
//! must be present and verify, even for statuses that change nothing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::remote::RemoteClient;
use crate::signing::{self, Claims, TokenError};
use crate::storage::DocumentStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStatus {
    Editing,
    Saved,
    SaveError,
    Closed,
    ForceSave,
    ForceSaveError,
    Unknown(i64),
}

impl From<i64> for CallbackStatus {
    fn from(code: i64) -> Self {
        match code {
            1 => CallbackStatus::Editing,
            2 => CallbackStatus::Saved,
            3 => CallbackStatus::SaveError,
            4 => CallbackStatus::Closed,
            6 => CallbackStatus::ForceSave,
            7 => CallbackStatus::ForceSaveError,
            other => CallbackStatus::Unknown(other),
        }
    }
}

impl CallbackStatus {
    pub fn code(&self) -> i64 {
        match self {
            CallbackStatus::Editing => 1,
            CallbackStatus::Saved => 2,
            CallbackStatus::SaveError => 3,
            CallbackStatus::Closed => 4,
            CallbackStatus::ForceSave => 6,
            CallbackStatus::ForceSaveError => 7,
            CallbackStatus::Unknown(c) => *c,
        }
    }

    pub fn requires_save(&self) -> bool { matches!(self, CallbackStatus::Saved | CallbackStatus::ForceSave) }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackAction {
    #[serde(rename = "type")]
    pub kind: i64,
    #[serde(default)]
    pub userid: String,
}

/// Body of a callback POST. Also the payload of a callback token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallbackEvent {
    #[serde(default)]
    pub key: String,
    pub status: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<CallbackAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changesurl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filetype: Option<String>,
}

impl CallbackEvent {
    pub fn status(&self) -> CallbackStatus { CallbackStatus::from(self.status) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackResponse {
    pub error: u8,
}

impl CallbackResponse {
    pub const OK: CallbackResponse = CallbackResponse { error: 0 };
    pub const FAILED: CallbackResponse = CallbackResponse { error: 1 };
}

#[derive(Debug, Clone)]
pub struct CallbackHandler {
    store: DocumentStore,
    remote: RemoteClient,
}

impl CallbackHandler {
    pub fn new(store: DocumentStore, remote: RemoteClient) -> Self { Self { store, remote } }

    pub async fn handle(&self, path: Option<&str>, event: &CallbackEvent, secret: Option<&str>) -> CallbackResponse {
        let Some(path) = path.map(str::trim).filter(|p| !p.is_empty()) else {
            tracing::warn!(target: "callback", "callback rejected: missing file path");
            return CallbackResponse::FAILED;
        };
        tracing::info!(target: "callback", "callback received: path={} status={} key={}", path, event.status, event.key);

        let signed;
        let event = match secret.filter(|s| !s.is_empty()) {
            None => event,
            Some(secret) => match authenticate(event, secret) {
                Ok(Some(ev)) => {
                    signed = ev;
                    &signed
                }
                Ok(None) => event,
                Err(e) => {
                    if e == TokenError::ExpiredToken {
                        tracing::warn!(target: "callback", "callback rejected for {}: token has expired", path);
                    } else {
                        tracing::warn!(target: "callback", "callback rejected for {}: {}", path, e);
                    }
                    return CallbackResponse::FAILED;
                }
            },
        };

        match event.status() {
            CallbackStatus::Editing => tracing::info!(target: "callback", "document {} is being edited", path),
            CallbackStatus::Closed => tracing::info!(target: "callback", "document {} closed with no changes", path),
            CallbackStatus::SaveError | CallbackStatus::ForceSaveError => {
                tracing::warn!(target: "callback", "document server reported a save error for {}", path)
            }
            CallbackStatus::Saved | CallbackStatus::ForceSave => {
                let Some(url) = event.url.as_deref().filter(|u| !u.is_empty()) else {
                    tracing::warn!(target: "callback", "callback rejected for {}: missing document URL for save", path);
                    return CallbackResponse::FAILED;
                };
                if let Err(e) = self.save_from(path, url).await {
                    tracing::error!(target: "callback", "failed to save {}: {}", path, e);
                    return CallbackResponse::FAILED;
                }
                tracing::info!(target: "callback", "document {} saved", path);
            }
            CallbackStatus::Unknown(code) => {
                tracing::warn!(target: "callback", "unknown callback status {} for {}", code, path)
            }
        }
        CallbackResponse::OK
    }

    async fn save_from(&self, path: &str, url: &str) -> Result<u64, String> {
        let body = self.remote.download(url).await.map_err(|e| e.to_string())?;
        self.store.save(path, body).await.map_err(|e| e.to_string())
    }
}

/// Verify the event's token. When the token carries a callback payload, that signed
/// payload replaces the unsigned body.
fn authenticate(event: &CallbackEvent, secret: &str) -> Result<Option<CallbackEvent>, TokenError> {
    let token = event.token.as_deref().filter(|t| !t.is_empty()).ok_or(TokenError::InvalidToken)?;
    match signing::verify(secret, token)? {
        Claims::Callback(signed) => Ok(Some(signed)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> CallbackHandler { CallbackHandler::new(DocumentStore::unrestricted(), RemoteClient::new().unwrap()) }

    fn event(status: i64, url: Option<&str>) -> CallbackEvent {
        serde_json::from_value(serde_json::json!({ "key": "k1", "status": status, "url": url })).unwrap()
    }

    fn signed(mut ev: CallbackEvent, secret: &str) -> CallbackEvent {
        ev.token = Some(signing::sign(secret, &Claims::Callback(ev.clone())).unwrap());
        ev
    }

    #[test]
    fn status_codes_round_trip() {
        for code in [1, 2, 3, 4, 6, 7, 0, 5, 42] {
            assert_eq!(CallbackStatus::from(code).code(), code);
        }
        assert!(CallbackStatus::from(2).requires_save());
        assert!(CallbackStatus::from(6).requires_save());
        assert!(!CallbackStatus::from(4).requires_save());
        assert_eq!(CallbackStatus::from(5), CallbackStatus::Unknown(5));
    }

    #[test]
    fn body_parses_with_optional_fields() {
        let ev: CallbackEvent = serde_json::from_str(
            r#"{"key":"abc","status":2,"url":"http://ds/x","users":["u1"],"actions":[{"type":0,"userid":"u1"}],
                "history":{"changes":[]},"filetype":"docx","changesurl":"http://ds/c.zip"}"#,
        )
        .unwrap();
        assert_eq!(ev.status(), CallbackStatus::Saved);
        assert_eq!(ev.actions[0].kind, 0);
        assert_eq!(ev.filetype.as_deref(), Some("docx"));
        assert!(ev.history.is_some());
        assert_eq!(CallbackResponse::FAILED, serde_json::from_str(r#"{"error":1}"#).unwrap());
    }

    #[tokio::test]
    async fn missing_path_fails_for_any_status() {
        let h = handler();
        for status in [1, 2, 4, 99] {
            assert_eq!(h.handle(None, &event(status, None), None).await, CallbackResponse::FAILED);
            assert_eq!(h.handle(Some("  "), &event(status, None), None).await, CallbackResponse::FAILED);
        }
    }

    #[tokio::test]
    async fn informational_statuses_succeed_without_secret() {
        let h = handler();
        for status in [1, 3, 4, 7, 0, 99] {
            assert_eq!(h.handle(Some("/vol1/a.docx"), &event(status, None), None).await, CallbackResponse::OK);
        }
    }

    #[tokio::test]
    async fn save_without_url_fails() {
        let h = handler();
        assert_eq!(h.handle(Some("/vol1/a.docx"), &event(2, None), None).await, CallbackResponse::FAILED);
        assert_eq!(h.handle(Some("/vol1/a.docx"), &event(6, Some("")), None).await, CallbackResponse::FAILED);
    }

    #[tokio::test]
    async fn secret_requires_valid_token() {
        let h = handler();
        let path = Some("/vol1/a.docx");
        for status in [1, 4] {
            assert_eq!(h.handle(path, &event(status, None), Some("s")).await, CallbackResponse::FAILED);
            assert_eq!(h.handle(path, &signed(event(status, None), "s"), Some("s")).await, CallbackResponse::OK);
            assert_eq!(h.handle(path, &signed(event(status, None), "other"), Some("s")).await, CallbackResponse::FAILED);
        }
        // empty secret means signing is off
        assert_eq!(h.handle(path, &event(1, None), Some("")).await, CallbackResponse::OK);
    }

    #[tokio::test]
    async fn expired_and_foreign_tokens() {
        let h = handler();
        let path = Some("/vol1/a.docx");
        let mut ev = event(4, None);
        ev.token = Some(signing::sign_with_expiry("s", &Claims::Callback(event(4, None)), chrono::Duration::seconds(-60)).unwrap());
        assert_eq!(h.handle(path, &ev, Some("s")).await, CallbackResponse::FAILED);

        // verifies, but no known claim shape
        let raw = serde_json::json!({ "hello": "world" });
        let token = jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &raw,
            &jsonwebtoken::EncodingKey::from_secret(b"s"),
        )
        .unwrap();
        let mut ev = event(1, None);
        ev.token = Some(token);
        assert_eq!(h.handle(path, &ev, Some("s")).await, CallbackResponse::FAILED);
    }

    #[tokio::test]
    async fn signed_payload_wins_over_body() {
        let h = handler();
        // token says "closed"; the unsigned body claims "saved" with no URL
        let mut ev = event(2, None);
        ev.token = Some(signing::sign("s", &Claims::Callback(event(4, None))).unwrap());
        assert_eq!(h.handle(Some("/vol1/a.docx"), &ev, Some("s")).await, CallbackResponse::OK);
    }
}
