//!
//! docbridge CGI adapter
//! ---------------------
//! Under a CGI gateway the process runs once per request. The gateway passes the
//! request through environment variables and stdin, and the logical path only
//! survives inside `REQUEST_URI`, after the script name:
//!
//!   /cgi/ThirdParty/app/go-index.cgi/editor?path=/vol1/a.docx
//!
//! `serve` rebuilds one HTTP request from that environment, runs it through the
//! normal router, and writes a CGI response (`Status:` line, headers, blank line,
//! body) to stdout. Logging must stay on stderr in this mode.

use std::collections::HashMap;

use anyhow::Context;
use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Method, Request, Response};
use axum::response::IntoResponse;
use axum::Router;
use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tower::ServiceExt;

use crate::error::AppError;
use crate::proxy::{OriginalRemoteAddr, TlsConnection, PROXY_PREFIX};

/// Script name that precedes the logical path in `REQUEST_URI`.
pub const CGI_MARKER: &str = "go-index.cgi";
/// Alternative script name, only consulted when deriving the prefix.
pub const INDEX_CGI_MARKER: &str = "index.cgi";

/// Logical path and query from a gateway `REQUEST_URI`.
///
/// Without the marker the result is `("/", "")`. An empty or `/` path becomes `/`;
/// a query after it is kept.
pub fn recover_path_and_query(request_uri: &str) -> (String, String) {
    let Some(idx) = request_uri.find(CGI_MARKER) else {
        return ("/".to_string(), String::new());
    };
    let rest = &request_uri[idx + CGI_MARKER.len()..];
    if rest.is_empty() {
        return ("/".to_string(), String::new());
    }
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, q),
        None => (rest, ""),
    };
    let path = if path.is_empty() || path == "/" { "/" } else { path };
    (path.to_string(), query.to_string())
}

/// Portion of `REQUEST_URI` up to and including the script name; empty when absent.
pub fn cgi_prefix(request_uri: &str) -> String {
    let uri = request_uri.split('?').next().unwrap_or("");
    for marker in [CGI_MARKER, INDEX_CGI_MARKER] {
        if let Some(idx) = uri.find(marker) {
            return uri[..idx + marker.len()].to_string();
        }
    }
    String::new()
}

/// Host as the browser addressed it: `HTTP_HOST`, else `SERVER_NAME[:SERVER_PORT]`
/// with the port omitted for 80 and 443.
pub fn http_host<F: Fn(&str) -> Option<String>>(lookup: F) -> String {
    let get = |k: &str| lookup(k).filter(|v| !v.is_empty());
    if let Some(host) = get("HTTP_HOST") {
        return host;
    }
    let Some(name) = get("SERVER_NAME") else {
        return String::new();
    };
    match get("SERVER_PORT") {
        Some(port) if port != "80" && port != "443" => format!("{name}:{port}"),
        _ => name,
    }
}

/// Browser-facing proxy prefix `<host><cgi-prefix>/doc-svr`, or empty when either part is.
pub fn doc_server_path(host: &str, prefix: &str) -> String {
    if host.is_empty() || prefix.is_empty() {
        return String::new();
    }
    format!("{host}{prefix}{PROXY_PREFIX}")
}

/// Snapshot of the gateway environment for one request.
#[derive(Debug, Clone, Default)]
pub struct CgiEnv {
    vars: HashMap<String, String>,
}

impl CgiEnv {
    pub fn from_vars<I: IntoIterator<Item = (String, String)>>(vars: I) -> Self { Self { vars: vars.into_iter().collect() } }

    /// Process environment; entries that are not valid UTF-8 are skipped.
    pub fn from_process() -> Self {
        Self::from_vars(std::env::vars_os().filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))))
    }

    /// Non-empty value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> { self.vars.get(key).map(String::as_str).filter(|v| !v.is_empty()) }

    pub fn request_uri(&self) -> &str { self.get("REQUEST_URI").unwrap_or("") }

    pub fn http_host(&self) -> String { http_host(|k| self.get(k).map(str::to_string)) }

    /// Proxy prefix derived from this request's host and script location.
    pub fn doc_server_path(&self) -> String { doc_server_path(&self.http_host(), &cgi_prefix(self.request_uri())) }

    pub fn content_length(&self) -> Option<u64> { self.get("CONTENT_LENGTH").and_then(|v| v.trim().parse().ok()) }

    fn remote_addr(&self) -> Option<String> {
        let addr = self.get("REMOTE_ADDR")?;
        let bracketed = if addr.contains(':') && !addr.starts_with('[') { format!("[{addr}]") } else { addr.to_string() };
        Some(match self.get("REMOTE_PORT") {
            Some(port) => format!("{bracketed}:{port}"),
            None => bracketed,
        })
    }

    /// Build the HTTP request this gateway invocation describes.
    pub fn to_request(&self, body: Body) -> anyhow::Result<Request<Body>> {
        let method = Method::from_bytes(self.get("REQUEST_METHOD").unwrap_or("GET").as_bytes())
            .context("invalid REQUEST_METHOD")?;
        let (path, query) = recover_path_and_query(self.request_uri());
        let uri = if query.is_empty() { path } else { format!("{path}?{query}") };

        let mut req = Request::builder().method(method).uri(&uri).body(body).with_context(|| format!("invalid request URI '{uri}'"))?;
        let headers = req.headers_mut();
        for (key, value) in &self.vars {
            let name = match key.as_str() {
                "CONTENT_TYPE" => "content-type".to_string(),
                "CONTENT_LENGTH" => "content-length".to_string(),
                // httpoxy: never let a client-supplied Proxy header become an env-style proxy
                "HTTP_PROXY" => continue,
                k => match k.strip_prefix("HTTP_") {
                    Some(rest) => rest.to_ascii_lowercase().replace('_', "-"),
                    None => continue,
                },
            };
            if value.is_empty() {
                continue;
            }
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
                (Ok(n), Ok(v)) => {
                    headers.append(n, v);
                }
                _ => tracing::debug!(target: "cgi", "skipping unrepresentable header {}", key),
            }
        }

        if let Some(addr) = self.remote_addr() {
            req.extensions_mut().insert(OriginalRemoteAddr(addr));
        }
        if self.get("HTTPS").is_some_and(|v| v.eq_ignore_ascii_case("on")) {
            req.extensions_mut().insert(TlsConnection);
        }
        Ok(req)
    }
}

/// Dispatch `req` through `router` and write the CGI response to `out`.
pub async fn respond<W: AsyncWrite + Unpin>(router: Router, req: Request<Body>, out: &mut W) -> anyhow::Result<()> {
    let response = match router.oneshot(req).await {
        Ok(r) => r,
        Err(never) => match never {},
    };
    write_response(response, out).await
}

async fn write_response<W: AsyncWrite + Unpin>(response: Response<Body>, out: &mut W) -> anyhow::Result<()> {
    let (parts, body) = response.into_parts();
    let mut head = format!("Status: {} {}\r\n", parts.status.as_u16(), parts.status.canonical_reason().unwrap_or(""));
    for (name, value) in parts.headers.iter() {
        let Ok(v) = value.to_str() else { continue };
        head.push_str(name.as_str());
        head.push_str(": ");
        head.push_str(v);
        head.push_str("\r\n");
    }
    head.push_str("\r\n");
    out.write_all(head.as_bytes()).await.context("failed to write CGI headers")?;

    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("failed to produce response body")?;
        out.write_all(&chunk).await.context("failed to write CGI body")?;
    }
    out.flush().await.context("failed to flush CGI output")?;
    Ok(())
}

async fn read_body<R: AsyncRead + Unpin>(input: R, length: Option<u64>) -> anyhow::Result<Body> {
    let Some(length) = length.filter(|n| *n > 0) else {
        return Ok(Body::empty());
    };
    let mut buf = Vec::with_capacity(usize::try_from(length).unwrap_or(0).min(1 << 20));
    input.take(length).read_to_end(&mut buf).await.context("failed to read request body")?;
    Ok(Body::from(buf))
}

/// Handle one gateway request from `input` and write the reply to `out`.
pub async fn serve_with<R, W>(router: Router, env: &CgiEnv, input: R, out: &mut W) -> anyhow::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let body = read_body(input, env.content_length()).await?;
    let req = match env.to_request(body) {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(target: "cgi", "rejecting gateway request: {:#}", e);
            let reply = AppError::user("bad_request", format!("{e:#}").as_str()).into_response();
            return write_response(reply, out).await;
        }
    };
    tracing::debug!(target: "cgi", "{} {}", req.method(), req.uri());
    respond(router, req, out).await
}

/// Handle the current process's gateway request on stdin/stdout.
pub async fn serve(router: Router, env: &CgiEnv) -> anyhow::Result<()> {
    let mut stdout = tokio::io::stdout();
    serve_with(router, env, tokio::io::stdin(), &mut stdout).await
}
