//!
//! docbridge remote client
//! -----------------------
//! Outbound HTTP to the document server: fetching result files, posting
//! conversion jobs, probing reachability, and carrying proxied requests.
//!
//! Transfers use a generous fixed timeout so large documents can finish; a
//! timeout is reported like any other failure. Nothing here retries.

use std::pin::Pin;
use std::time::Duration;

use futures_util::TryStreamExt;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;

use crate::convert::{ConversionJob, ConversionResponse};

pub const TRANSFER_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opaque failure talking to the document server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct RemoteError(pub String);

impl RemoteError {
    pub fn new(msg: impl Into<String>) -> Self { RemoteError(msg.into()) }
}

/// Response body as a byte stream, for handing straight to the store.
pub type BodyReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Clone)]
pub struct RemoteClient {
    transfer: reqwest::Client,
    probe: reqwest::Client,
    proxy: reqwest::Client,
}

impl RemoteClient {
    pub fn new() -> Result<Self, RemoteError> {
        let transfer = reqwest::Client::builder()
            .timeout(TRANSFER_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::new(format!("failed to build http client: {e}")))?;
        let probe = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .map_err(|e| RemoteError::new(format!("failed to build http client: {e}")))?;
        // proxied traffic relays redirects to the browser and may hold sockets open indefinitely
        let proxy = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RemoteError::new(format!("failed to build http client: {e}")))?;
        Ok(Self { transfer, probe, proxy })
    }

    /// GET `url`, requiring a 200, and return the body as a stream.
    pub async fn download(&self, url: &str) -> Result<BodyReader, RemoteError> {
        let resp = self
            .transfer
            .get(url)
            .send()
            .await
            .map_err(|e| RemoteError::new(format!("failed to download document: {e}")))?;
        if resp.status() != reqwest::StatusCode::OK {
            return Err(RemoteError::new(format!("document server returned status {}", resp.status().as_u16())));
        }
        let stream = resp.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    /// POST a conversion job to `{base}/ConvertService.ashx` and parse the reply.
    ///
    /// Only transport and HTTP-level failures are reported here; the caller judges
    /// the reply's own error code and completion flag.
    pub async fn convert(&self, base_url: &str, job: &ConversionJob) -> Result<ConversionResponse, RemoteError> {
        let endpoint = format!("{}/ConvertService.ashx", base_url.trim_end_matches('/'));
        let mut req = self
            .transfer
            .post(&endpoint)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json")
            .json(job);
        if let Some(token) = job.token.as_deref() {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(|e| RemoteError::new(format!("failed to send request: {e}")))?;
        let status = resp.status();
        let body = resp.text().await.map_err(|e| RemoteError::new(format!("failed to read response: {e}")))?;
        if status != reqwest::StatusCode::OK {
            return Err(RemoteError::new(format!("server returned status {}: {}", status.as_u16(), body)));
        }
        serde_json::from_str(&body).map_err(|e| RemoteError::new(format!("failed to parse response: {e}")))
    }

    /// Reachability probe: `/healthcheck`, falling back to the editor script when that
    /// cannot be reached at all. Any 2xx or 3xx answer counts as reachable.
    pub async fn check_health(&self, base_url: &str) -> Result<(), RemoteError> {
        let base = base_url.trim_end_matches('/');
        let resp = match self.probe.get(format!("{base}/healthcheck")).send().await {
            Ok(r) => r,
            Err(first) => {
                tracing::debug!(target: "remote", "healthcheck unreachable ({first}); trying api.js");
                self.probe
                    .get(format!("{base}/web-apps/apps/api/documents/api.js"))
                    .send()
                    .await
                    .map_err(|e| RemoteError::new(format!("cannot connect to server: {e}")))?
            }
        };
        let code = resp.status().as_u16();
        if (200..400).contains(&code) {
            Ok(())
        } else {
            Err(RemoteError::new(format!("server returned status {code}")))
        }
    }

    /// Client for proxied traffic: no overall timeout and redirects passed through untouched.
    pub fn proxy(&self) -> &reqwest::Client { &self.proxy }
}
