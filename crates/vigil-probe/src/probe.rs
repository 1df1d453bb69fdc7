//! Timeboxed JSON GET over a raw HTTP/1 connection.

use std::time::Duration;

use http_body_util::BodyExt;
use thiserror::Error;
use tracing::debug;

/// Default timeout for cluster and ordinal probes.
pub const CLUSTER_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default timeout for external hypergraph probes.
pub const HYPERGRAPH_PROBE_TIMEOUT: Duration = Duration::from_secs(8);

/// A failed probe. No retries happen at this layer.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// The endpoint answered with a non-2xx status.
    #[error("endpoint returned status {0}")]
    BadStatus(u16),
    /// Connection failure or timeout.
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// The response body was not valid JSON.
    #[error("response body was not valid JSON")]
    Decode,
}

/// GET `http://{address}{path}` and parse the body as JSON.
///
/// `address` is `host:port`. The whole exchange (connect, request, body)
/// is bounded by `timeout`.
pub async fn probe_json(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<serde_json::Value, ProbeError> {
    let uri = format!("http://{address}{path}");

    match tokio::time::timeout(timeout, request_json(address, &uri)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "probe timed out");
            Err(ProbeError::Unreachable("timeout".to_string()))
        }
    }
}

/// GET an absolute `http://` URL and parse the body as JSON.
///
/// Used for external hypergraph endpoints configured as full URLs.
pub async fn probe_url(url: &str, timeout: Duration) -> Result<serde_json::Value, ProbeError> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| ProbeError::Unreachable(format!("unsupported url scheme: {url}")))?;

    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };

    let address = if authority.contains(':') {
        authority.to_string()
    } else {
        format!("{authority}:80")
    };

    probe_json(&address, path, timeout).await
}

async fn request_json(address: &str, uri: &str) -> Result<serde_json::Value, ProbeError> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| {
            debug!(error = %e, %uri, "probe connection failed");
            ProbeError::Unreachable(e.to_string())
        })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| {
            debug!(error = %e, %uri, "probe handshake failed");
            ProbeError::Unreachable(e.to_string())
        })?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(uri)
        .header("host", address)
        .header("accept", "application/json")
        .header("user-agent", "vigil/0.1")
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| ProbeError::Unreachable(e.to_string()))?;

    let resp = sender.send_request(req).await.map_err(|e| {
        debug!(error = %e, %uri, "probe request failed");
        ProbeError::Unreachable(e.to_string())
    })?;

    let status = resp.status();
    if !status.is_success() {
        debug!(status = %status, %uri, "probe non-2xx");
        return Err(ProbeError::BadStatus(status.as_u16()));
    }

    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| ProbeError::Unreachable(e.to_string()))?
        .to_bytes();

    serde_json::from_slice(&body).map_err(|_| ProbeError::Decode)
}
