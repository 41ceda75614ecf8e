use super::*;
use std::collections::HashSet;

use crate::convert::ConversionClaims;

fn job() -> Claims {
    Claims::Conversion(ConversionClaims {
        is_async: false,
        filetype: "doc".into(),
        key: "convert_0123456789abcdef0123".into(),
        outputtype: "docx".into(),
        title: "report.doc".into(),
        url: "http://nas.local:10099/download?path=%2Fdocs%2Freport.doc".into(),
    })
}

#[test]
fn sign_then_verify_round_trips() {
    let token = sign("secret-a", &job()).unwrap();
    assert_eq!(token.split('.').count(), 3);
    assert_eq!(verify("secret-a", &token).unwrap(), job());
}

#[test]
fn wrong_secret_is_invalid_token() {
    let token = sign("secret-a", &job()).unwrap();
    assert_eq!(verify("secret-b", &token), Err(TokenError::InvalidToken));
}

#[test]
fn malformed_tokens_are_invalid() {
    assert_eq!(verify("secret-a", ""), Err(TokenError::InvalidToken));
    assert_eq!(verify("secret-a", "   "), Err(TokenError::InvalidToken));
    assert_eq!(verify("secret-a", "invalid.token.format"), Err(TokenError::InvalidToken));
    assert_eq!(verify("secret-a", "not-a-jwt"), Err(TokenError::InvalidToken));
}

#[test]
fn expiry_is_distinguished() {
    let live = sign_with_expiry("k", &job(), Duration::minutes(5)).unwrap();
    assert_eq!(verify("k", &live).unwrap(), job());

    let stale = sign_with_expiry("k", &job(), Duration::seconds(-120)).unwrap();
    assert_eq!(verify("k", &stale), Err(TokenError::ExpiredToken));
    // wrong secret on an expired token still reports the signature problem
    assert_eq!(verify("other", &stale), Err(TokenError::InvalidToken));
}

#[test]
fn unknown_claim_shape_is_invalid_claims() {
    let raw = serde_json::json!({ "foo": "bar", "n": 1 });
    let token = encode(&Header::new(Algorithm::HS256), &raw, &EncodingKey::from_secret(b"k")).unwrap();
    assert_eq!(verify("k", &token), Err(TokenError::InvalidClaims));
}

#[test]
fn callback_body_decodes_as_callback_claims() {
    let body = serde_json::json!({ "key": "abc", "status": 2, "url": "http://ds/out.docx" });
    let token = encode(&Header::new(Algorithm::HS256), &body, &EncodingKey::from_secret(b"k")).unwrap();
    match verify("k", &token).unwrap() {
        Claims::Callback(ev) => {
            assert_eq!(ev.key, "abc");
            assert_eq!(ev.status, 2);
        }
        other => panic!("unexpected claims {other:?}"),
    }
}

#[test]
fn generated_secrets_are_hex_and_unique() {
    let mut seen = HashSet::new();
    for _ in 0..2_000 {
        let s = generate_secret();
        assert_eq!(s.len(), SECRET_BYTES * 2);
        assert!(s.chars().all(|c| matches!(c, '0'..='9' | 'a'..='f')), "{s}");
        assert!(seen.insert(s));
    }
    assert_ne!(generate_secret(), generate_secret());
}
