//! Minimal HTTP/1 client used for probes, aggregator queries, and commands.
//!
//! Every exchange opens a fresh connection and is bounded end to end
//! (connect, handshake, request, and body) by a single timeout.

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};
use thiserror::Error;
use tracing::debug;

const AGENT: &str = "opsdeck/0.1";

/// A completed HTTP exchange, whatever its status code.
#[derive(Debug, Clone)]
pub struct HttpReply {
    pub status: StatusCode,
    pub body: Bytes,
}

/// Transport-level failures. Any HTTP status is *not* an error here.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect to {address} failed: {message}")]
    Connect { address: String, message: String },

    #[error("http handshake with {address} failed: {message}")]
    Handshake { address: String, message: String },

    #[error("request {uri} failed: {message}")]
    Request { uri: String, message: String },

    #[error("request {uri} timed out after {timeout:?}")]
    Timeout { uri: String, timeout: Duration },
}

/// Perform one request against `address` (`host:port`).
pub async fn send(
    method: Method,
    address: &str,
    path: &str,
    body: Option<Bytes>,
    timeout: Duration,
) -> Result<HttpReply, TransportError> {
    let uri = format!("http://{address}{path}");

    match tokio::time::timeout(timeout, exchange(method, address, path, &uri, body)).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, ?timeout, "request timed out");
            Err(TransportError::Timeout { uri, timeout })
        }
    }
}

/// `GET` convenience wrapper.
pub async fn get(address: &str, path: &str, timeout: Duration) -> Result<HttpReply, TransportError> {
    send(Method::GET, address, path, None, timeout).await
}

async fn exchange(
    method: Method,
    address: &str,
    path: &str,
    uri: &str,
    body: Option<Bytes>,
) -> Result<HttpReply, TransportError> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|e| TransportError::Connect {
            address: address.to_string(),
            message: e.to_string(),
        })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| TransportError::Handshake {
            address: address.to_string(),
            message: e.to_string(),
        })?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header(HOST, address)
        .header(USER_AGENT, AGENT);
    if body.is_some() {
        builder = builder.header(CONTENT_TYPE, "application/json");
    }
    let req = builder
        .body(Full::new(body.unwrap_or_default()))
        .map_err(|e| TransportError::Request {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| TransportError::Request {
            uri: uri.to_string(),
            message: e.to_string(),
        })?;

    let status = resp.status();
    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(|e| TransportError::Request {
            uri: uri.to_string(),
            message: e.to_string(),
        })?
        .to_bytes();

    Ok(HttpReply { status, body })
}
