//! Reverse proxy over real sockets: prefix stripping, forwarded headers, body
//! streaming, failure statuses, and a spliced upgrade connection.

mod common;

use std::time::Duration;

use axum::Router;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use common::*;

async fn upstream() -> std::net::SocketAddr {
    let router = Router::new()
        .route("/ws", axum::routing::get(upgrade_echo))
        .route(
            "/moved",
            axum::routing::get(|| async { (axum::http::StatusCode::FOUND, [(axum::http::header::LOCATION, "/elsewhere")]) }),
        )
        .fallback(echo);
    spawn(router).await
}

async fn bridge(document_server: &str) -> std::net::SocketAddr { spawn(app(settings_for(document_server, ""))).await }

fn client() -> reqwest::Client { reqwest::Client::builder().redirect(reqwest::redirect::Policy::none()).build().unwrap() }

async fn fetch(url: String, headers: &[(&str, &str)]) -> Value {
    let mut req = client().get(url);
    for (k, v) in headers {
        req = req.header(*k, *v);
    }
    let resp = req.send().await.unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn strips_prefix_and_keeps_query() {
    let up = upstream().await;
    let db = bridge(&format!("http://{up}")).await;

    let v = fetch(format!("http://{db}/doc-svr/web-apps/apps/api/documents/api.js?ver=7.5"), &[]).await;
    assert_eq!(v["path"], "/web-apps/apps/api/documents/api.js");
    assert_eq!(v["query"], "ver=7.5");

    let v = fetch(format!("http://{db}/doc-svr"), &[]).await;
    assert_eq!(v["path"], "/");

    let v = fetch(format!("http://{db}/doc-svr/cache/files/data.json"), &[]).await;
    assert_eq!(v["path"], "/cache/files/data.json");
}

#[tokio::test]
async fn forwarded_headers_describe_the_original_client() {
    let up = upstream().await;
    let db = bridge(&format!("http://{up}")).await;

    let v = fetch(format!("http://{db}/doc-svr/x"), &[]).await;
    assert_eq!(v["headers"]["x-forwarded-for"], "127.0.0.1");
    assert_eq!(v["headers"]["x-forwarded-proto"], "http");
    assert_eq!(v["headers"]["x-forwarded-host"], db.to_string());
    assert_eq!(v["headers"]["host"], up.to_string());

    let v = fetch(
        format!("http://{db}/doc-svr/x"),
        &[("X-Forwarded-For", "203.0.113.50"), ("X-Forwarded-Proto", "https"), ("X-Forwarded-Host", "office.example")],
    )
    .await;
    assert_eq!(v["headers"]["x-forwarded-for"], "203.0.113.50, 127.0.0.1");
    assert_eq!(v["headers"]["x-forwarded-proto"], "https");
    assert_eq!(v["headers"]["x-forwarded-host"], "office.example");
}

#[tokio::test]
async fn request_bodies_and_redirects_pass_through() {
    let up = upstream().await;
    let db = bridge(&format!("http://{up}")).await;

    let resp = client()
        .post(format!("http://{db}/doc-svr/coauthoring/CommandService.ashx"))
        .header("content-type", "application/json")
        .body(r#"{"c":"info"}"#)
        .send()
        .await
        .unwrap();
    let v: Value = resp.json().await.unwrap();
    assert_eq!(v["method"], "POST");
    assert_eq!(v["body"], r#"{"c":"info"}"#);
    assert_eq!(v["headers"]["content-type"], "application/json");

    let resp = client().get(format!("http://{db}/doc-svr/moved")).send().await.unwrap();
    assert_eq!(resp.status(), 302);
    assert_eq!(resp.headers()["location"], "/elsewhere");
}

#[tokio::test]
async fn unconfigured_and_unreachable_upstreams() {
    let app = app(settings_for("", ""));
    let resp = send(&app, get("/doc-svr/web-apps/apps/api/documents/api.js")).await;
    assert_eq!(resp.status(), 500);
    assert_eq!(body_text(resp).await, "Document Server URL not configured");

    let dead = dead_addr().await;
    let db = bridge(&format!("http://{dead}")).await;
    let resp = client().get(format!("http://{db}/doc-svr/healthcheck")).send().await.unwrap();
    assert_eq!(resp.status(), 502);
}

async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert_eq!(n, 1, "connection closed before end of headers");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn websocket_upgrade_is_spliced_through() {
    let up = upstream().await;
    let db = bridge(&format!("http://{up}")).await;

    tokio::time::timeout(Duration::from_secs(10), async {
        let mut stream = TcpStream::connect(db).await.unwrap();
        stream
            .write_all(
                b"GET /doc-svr/ws HTTP/1.1\r\n\
                  Host: office.local\r\n\
                  Upgrade: websocket\r\n\
                  Connection: Upgrade\r\n\
                  Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
                  Sec-WebSocket-Version: 13\r\n\
                  Sec-WebSocket-Protocol: chat\r\n\r\n",
            )
            .await
            .unwrap();

        let head = read_head(&mut stream).await.to_ascii_lowercase();
        docbridge::tprintln!("upgrade response head: {}", head);
        assert!(head.starts_with("http/1.1 101"), "{head}");
        assert!(head.contains("upgrade: websocket"));
        assert!(head.contains("sec-websocket-accept: test-accept"));
        assert!(head.contains("sec-websocket-protocol: chat"));
        assert!(head.contains("x-saw-key: true"));

        stream.write_all(b"ping over the bridge").await.unwrap();
        let mut echoed = [0u8; 20];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"ping over the bridge");
    })
    .await
    .unwrap();
}
