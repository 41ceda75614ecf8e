//! Shared helpers for integration tests: throwaway listeners and a stand-in document server.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use axum::{Json, Router};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

use docbridge::config::Settings;
use docbridge::server::{self, AppState};
use docbridge::storage::DocumentStore;

pub async fn bind() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

pub fn serve_on(listener: TcpListener, router: Router) {
    tokio::spawn(async move {
        axum::serve(listener, router.into_make_service_with_connect_info::<SocketAddr>()).await.unwrap();
    });
}

pub async fn spawn(router: Router) -> SocketAddr {
    let (listener, addr) = bind().await;
    serve_on(listener, router);
    addr
}

/// An address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
    let (listener, addr) = bind().await;
    drop(listener);
    addr
}

pub fn settings_for(document_server: &str, secret: &str) -> Settings {
    Settings {
        document_server_url: document_server.to_string(),
        document_server_secret: secret.to_string(),
        base_url: "http://nas.local:10099".to_string(),
        doc_server_path: String::new(),
    }
}

pub fn state(settings: Settings) -> AppState { AppState::new(settings, None, DocumentStore::unrestricted()).unwrap() }

pub fn app(settings: Settings) -> Router { server::router(state(settings)) }

pub async fn send(app: &Router, req: Request) -> Response { app.clone().oneshot(req).await.unwrap() }

pub async fn body_bytes(resp: Response) -> Vec<u8> { axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec() }

pub async fn body_json(resp: Response) -> Value { serde_json::from_slice(&body_bytes(resp).await).unwrap() }

pub async fn body_text(resp: Response) -> String { String::from_utf8(body_bytes(resp).await).unwrap() }

pub fn get(uri: &str) -> Request { Request::builder().uri(uri).body(Body::empty()).unwrap() }

pub fn post_json(uri: &str, body: &Value) -> Request {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn post_form(uri: &str, form: &str) -> Request {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/x-www-form-urlencoded")
        .body(Body::from(form.to_string()))
        .unwrap()
}

pub fn enc(path: &str) -> String { urlencoding::encode(path).into_owned() }

/// Everything the stand-in document server received on `ConvertService.ashx`.
#[derive(Clone, Default)]
pub struct Recorded {
    pub jobs: Arc<Mutex<Vec<Value>>>,
    pub auth: Arc<Mutex<Vec<Option<String>>>>,
}

/// Stand-in document server.
///
/// - `GET /files/{name}` serves `payload`
/// - `GET /missing` is a 404
/// - `POST /ConvertService.ashx` records the job and answers `reply`, with
///   `{files}` in any string replaced by this server's `/files` URL
/// - `GET /healthcheck` answers `true`
pub async fn document_server(payload: Vec<u8>, reply: Value) -> (SocketAddr, Recorded) {
    let (listener, addr) = bind().await;
    let recorded = Recorded::default();
    let files = format!("http://{addr}/files");
    let reply = serde_json::from_str::<Value>(&reply.to_string().replace("{files}", &files)).unwrap();

    let rec = recorded.clone();
    let payload = Arc::new(payload);
    let router = Router::new()
        .route(
            "/files/{name}",
            axum::routing::get(move || {
                let payload = payload.clone();
                async move { payload.as_ref().clone() }
            }),
        )
        .route("/missing", axum::routing::get(|| async { StatusCode::NOT_FOUND }))
        .route("/healthcheck", axum::routing::get(|| async { "true" }))
        .route(
            "/ConvertService.ashx",
            axum::routing::post(move |headers: axum::http::HeaderMap, Json(job): Json<Value>| {
                let rec = rec.clone();
                let reply = reply.clone();
                async move {
                    rec.jobs.lock().push(job);
                    rec.auth.lock().push(headers.get("authorization").and_then(|v| v.to_str().ok()).map(str::to_string));
                    Json(reply)
                }
            }),
        );
    serve_on(listener, router);
    (addr, recorded)
}

/// Reflects method, path, query, headers and body back as JSON.
pub async fn echo(req: Request) -> Json<Value> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    let headers: serde_json::Map<String, Value> = parts
        .headers
        .iter()
        .map(|(k, v)| (k.as_str().to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
        .collect();
    Json(json!({
        "method": parts.method.as_str(),
        "path": parts.uri.path(),
        "query": parts.uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&bytes),
    }))
}

/// Accepts a websocket-style upgrade and echoes raw bytes on the upgraded stream.
pub async fn upgrade_echo(mut req: Request) -> Response {
    let saw_key = req.headers().contains_key("sec-websocket-key");
    let protocol = req.headers().get("sec-websocket-protocol").cloned();
    let on_upgrade = hyper::upgrade::on(&mut req);
    tokio::spawn(async move {
        if let Ok(upgraded) = on_upgrade.await {
            let mut io = TokioIo::new(upgraded);
            let mut buf = [0u8; 256];
            loop {
                match io.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if io.write_all(&buf[..n]).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    });
    let mut builder = Response::builder()
        .status(StatusCode::SWITCHING_PROTOCOLS)
        .header("upgrade", "websocket")
        .header("connection", "Upgrade")
        .header("sec-websocket-accept", "test-accept")
        .header("x-saw-key", saw_key.to_string());
    if let Some(p) = protocol {
        builder = builder.header("sec-websocket-protocol", p);
    }
    builder.body(Body::empty()).unwrap()
}
