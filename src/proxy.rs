//!
//! docbridge reverse proxy
//! -----------------------
//! Everything under `/doc-svr` is forwarded to the document server with the
//! prefix stripped, so the browser can load the editor assets and open its
//! collaboration sockets through this process.
//!
//! Outbound requests carry `X-Forwarded-Host`, `X-Forwarded-Proto` and
//! `X-Forwarded-For`. Values from an upstream hop win for host and proto; the
//! client address is appended to any existing forwarded-for chain. The address
//! comes from `OriginalRemoteAddr`, recorded before anything else touches the
//! request.
//!
//! WebSocket upgrades keep `Connection` and `Upgrade` and, once the document server
//! answers 101, both upgraded connections are spliced together.

use std::net::SocketAddr;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use hyper_util::rt::TokioIo;

use crate::server::AppState;

pub const PROXY_PREFIX: &str = "/doc-svr";

const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";
const X_FORWARDED_FOR: &str = "x-forwarded-for";

const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Peer address as first seen by this process (`ip:port` or `[v6]:port`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalRemoteAddr(pub String);

/// Marks a request that arrived over TLS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TlsConnection;

/// Middleware: record the socket peer address unless one is already recorded.
pub async fn capture_remote_addr(mut req: Request, next: Next) -> Response {
    if req.extensions().get::<OriginalRemoteAddr>().is_none() {
        let peer = req.extensions().get::<ConnectInfo<SocketAddr>>().map(|ci| ci.0.to_string());
        if let Some(peer) = peer {
            req.extensions_mut().insert(OriginalRemoteAddr(peer));
        }
    }
    next.run(req).await
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// `Upgrade` mentions websocket and `Connection` mentions upgrade, case-insensitively.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let upgrade = header_str(headers, "upgrade").to_ascii_lowercase();
    let connection = header_str(headers, "connection").to_ascii_lowercase();
    upgrade.contains("websocket") && connection.contains("upgrade")
}

/// Bare IP from a `host:port` / `[v6]:port` peer address. Empty in, empty out.
pub fn client_ip(remote_addr: &str) -> String {
    if let Some(rest) = remote_addr.strip_prefix('[') {
        return match rest.rfind("]:") {
            Some(i) => rest[..i].to_string(),
            None => rest.trim_end_matches(']').to_string(),
        };
    }
    match remote_addr.rfind(':') {
        Some(i) => remote_addr[..i].to_string(),
        None => remote_addr.to_string(),
    }
}

/// Scheme the client used: an upstream `X-Forwarded-Proto` wins, then TLS presence.
pub fn request_proto(headers: &HeaderMap, tls: bool) -> String {
    let existing = header_str(headers, X_FORWARDED_PROTO);
    if !existing.is_empty() {
        return existing.to_string();
    }
    if tls { "https".to_string() } else { "http".to_string() }
}

/// Outbound header set for a proxied request.
///
/// Hop-by-hop headers (and any named in `Connection`) are dropped. A WebSocket upgrade
/// keeps `Connection` and `Upgrade`. `Host` is dropped so the client sets the upstream host.
pub fn forwarded_headers(inbound: &HeaderMap, host: Option<&str>, tls: bool, remote_addr: Option<&str>) -> HeaderMap {
    let upgrade = is_websocket_upgrade(inbound);
    let listed: Vec<String> = header_str(inbound, "connection")
        .split(',')
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(inbound.len() + 3);
    for (name, value) in inbound.iter() {
        let n = name.as_str();
        if n == "host" {
            continue;
        }
        let upgrade_header = upgrade && (n == "connection" || n == "upgrade");
        if !upgrade_header && (HOP_BY_HOP.contains(&n) || listed.iter().any(|l| l == n)) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }

    let fwd_host = match header_str(inbound, X_FORWARDED_HOST) {
        "" => host.unwrap_or(""),
        existing => existing,
    };
    set_header(&mut out, X_FORWARDED_HOST, fwd_host);
    set_header(&mut out, X_FORWARDED_PROTO, &request_proto(inbound, tls));

    let ip = remote_addr.map(client_ip).unwrap_or_default();
    if !ip.is_empty() {
        let chain: Vec<&str> = inbound
            .get_all(X_FORWARDED_FOR)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .collect();
        let xff = if chain.is_empty() { ip } else { format!("{}, {}", chain.join(", "), ip) };
        set_header(&mut out, X_FORWARDED_FOR, &xff);
    }
    out
}

fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    if value.is_empty() {
        return;
    }
    if let Ok(v) = HeaderValue::from_str(value) {
        headers.insert(HeaderName::from_static(name), v);
    }
}

/// Path below the proxy prefix; the bare prefix maps to `/`.
pub fn strip_prefix(path: &str) -> &str {
    match path.strip_prefix(PROXY_PREFIX) {
        Some("") | None => "/",
        Some(rest) => rest,
    }
}

/// Upstream URL for an inbound URI under the proxy prefix.
pub fn upstream_url(base_url: &str, uri: &Uri) -> String {
    let mut url = format!("{}{}", base_url.trim_end_matches('/'), strip_prefix(uri.path()));
    if let Some(q) = uri.query() {
        url.push('?');
        url.push_str(q);
    }
    url
}

fn response_headers(upstream: &HeaderMap, keep_upgrade: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream.iter() {
        let n = name.as_str();
        if HOP_BY_HOP.contains(&n) && !(keep_upgrade && (n == "connection" || n == "upgrade")) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

fn has_body(headers: &HeaderMap) -> bool {
    let len = header_str(headers, "content-length").trim().parse::<u64>().unwrap_or(0);
    len > 0 || headers.contains_key(header::TRANSFER_ENCODING)
}

/// Route handler for `/doc-svr` and everything below it.
pub async fn proxy_handler(State(state): State<AppState>, req: Request) -> Response {
    let settings = state.settings();
    forward(state.remote.proxy(), &settings.document_server_url, req).await
}

/// Forward one request to `base_url`. An empty base URL fails fast with 500.
pub async fn forward(client: &reqwest::Client, base_url: &str, mut req: Request) -> Response {
    if base_url.trim().is_empty() {
        return (StatusCode::INTERNAL_SERVER_ERROR, "Document Server URL not configured").into_response();
    }

    let upgrade = is_websocket_upgrade(req.headers());
    let client_side = if upgrade { Some(hyper::upgrade::on(&mut req)) } else { None };

    let (parts, body) = req.into_parts();
    let host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.to_string()));
    let tls = parts.extensions.get::<TlsConnection>().is_some();
    let remote = parts.extensions.get::<OriginalRemoteAddr>().map(|a| a.0.clone());

    let url = upstream_url(base_url, &parts.uri);
    let headers = forwarded_headers(&parts.headers, host.as_deref(), tls, remote.as_deref());
    tracing::debug!(target: "proxy", "{} {} -> {} (upgrade={})", parts.method, parts.uri, url, upgrade);

    let mut outbound = client.request(parts.method.clone(), &url).headers(headers);
    if has_body(&parts.headers) {
        outbound = outbound.body(reqwest::Body::wrap_stream(body.into_data_stream()));
    }

    let upstream = match outbound.send().await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "proxy", "upstream request to {} failed: {}", url, e);
            return (StatusCode::BAD_GATEWAY, "Document Server unreachable").into_response();
        }
    };

    let status = upstream.status();
    let switching = status == StatusCode::SWITCHING_PROTOCOLS;
    let headers = response_headers(upstream.headers(), upgrade && switching);

    let body = match (switching, client_side) {
        (true, Some(client_side)) => {
            tokio::spawn(async move {
                let (client_io, upstream_io) = match (client_side.await, upstream.upgrade().await) {
                    (Ok(c), Ok(u)) => (c, u),
                    (Err(e), _) => {
                        tracing::warn!(target: "proxy", "client upgrade failed: {}", e);
                        return;
                    }
                    (_, Err(e)) => {
                        tracing::warn!(target: "proxy", "upstream upgrade failed: {}", e);
                        return;
                    }
                };
                let mut client_io = TokioIo::new(client_io);
                let mut upstream_io = upstream_io;
                match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
                    Ok((up, down)) => tracing::debug!(target: "proxy", "websocket closed ({} bytes up, {} down)", up, down),
                    Err(e) => tracing::debug!(target: "proxy", "websocket ended: {}", e),
                }
            });
            Body::empty()
        }
        _ => Body::from_stream(upstream.bytes_stream()),
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    response
}
