//!
//! docbridge token signing
//! -----------------------
//! Shared-secret (HS256) tokens exchanged with the document server. The payload
//! is one of a small set of known claim shapes rather than an open map: editor
//! session descriptors, conversion jobs, and the save callback body. Anything
//! that verifies but matches none of them is rejected as `InvalidClaims`.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::callback::CallbackEvent;
use crate::convert::ConversionClaims;
use crate::editor::EditorClaims;

/// Length in bytes of a generated secret (hex doubles it).
pub const SECRET_BYTES: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("invalid token")]
    InvalidToken,
    #[error("token has expired")]
    ExpiredToken,
    #[error("invalid token claims")]
    InvalidClaims,
}

/// Payload shapes carried inside tokens. Order matters for decoding: the most
/// specific shape is tried first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Claims {
    Editor(EditorClaims),
    Conversion(ConversionClaims),
    Callback(CallbackEvent),
}

/// Sign claims without an expiry.
pub fn sign(secret: &str, claims: &Claims) -> Result<String, TokenError> {
    encode_claims(secret, claims, None)
}

/// Sign claims with an `exp` of now + `ttl`. A negative ttl yields an already expired token.
pub fn sign_with_expiry(secret: &str, claims: &Claims, ttl: Duration) -> Result<String, TokenError> {
    let exp = (Utc::now() + ttl).timestamp();
    encode_claims(secret, claims, Some(exp))
}

fn encode_claims(secret: &str, claims: &Claims, exp: Option<i64>) -> Result<String, TokenError> {
    let mut value = serde_json::to_value(claims).map_err(|_| TokenError::InvalidClaims)?;
    if let Some(exp) = exp {
        let Value::Object(map) = &mut value else { return Err(TokenError::InvalidClaims); };
        map.insert("exp".to_string(), Value::from(exp));
    }
    encode(&Header::new(Algorithm::HS256), &value, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|_| TokenError::InvalidClaims)
}

/// Verify a token and decode its claims.
///
/// Wrong secret, bad structure, or an empty token all give `InvalidToken`; an
/// elapsed `exp` gives `ExpiredToken`.
pub fn verify(secret: &str, token: &str) -> Result<Claims, TokenError> {
    if token.trim().is_empty() {
        return Err(TokenError::InvalidToken);
    }
    let mut validation = Validation::new(Algorithm::HS256);
    validation.required_spec_claims.clear();
    validation.validate_aud = false;
    validation.leeway = 0;

    let data = decode::<Value>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::ExpiredToken,
            _ => TokenError::InvalidToken,
        })?;
    serde_json::from_value::<Claims>(data.claims).map_err(|_| TokenError::InvalidClaims)
}

/// Fresh random secret: 32 lowercase hex characters.
pub fn generate_secret() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    if let Err(e) = getrandom::getrandom(&mut buf) {
        tracing::warn!(target: "signing", "getrandom failed ({e}); falling back to uuid entropy");
        buf = *uuid::Uuid::new_v4().as_bytes();
    }
    hex::encode(buf)
}

#[cfg(test)]
#[path = "signing_tests.rs"]
mod signing_tests;
