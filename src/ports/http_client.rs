use std::{error::Error as StdError, io};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Transport-level failure talking to an upstream.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Connecting, writing or reading failed. `kind` is the underlying I/O error kind
    /// when one could be found in the error chain.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        kind: Option<io::ErrorKind>,
    },

    /// The upstream did not answer within the configured timeout.
    #[error("Timeout error after {0} ms")]
    Timeout(u64),

    /// The request could not be built or sent as-is.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Build a connection error, looking through `err`'s source chain for an I/O kind.
    pub fn connection(err: &(dyn StdError + 'static)) -> Self {
        let mut message = err.to_string();
        let mut kind = None;
        let mut current = Some(err);
        while let Some(e) = current {
            if let Some(io_err) = e.downcast_ref::<io::Error>() {
                kind = Some(io_err.kind());
                message = format!("{message}: {io_err}");
                break;
            }
            current = e.source();
        }
        HttpClientError::Connection { message, kind }
    }

    /// Short machine-readable code in the style of socket error names.
    pub fn code(&self) -> &'static str {
        match self {
            HttpClientError::Connection { kind, message } => match kind {
                Some(io::ErrorKind::ConnectionRefused) => "ECONNREFUSED",
                Some(io::ErrorKind::ConnectionReset)
                | Some(io::ErrorKind::ConnectionAborted)
                | Some(io::ErrorKind::BrokenPipe)
                | Some(io::ErrorKind::UnexpectedEof) => "ECONNRESET",
                Some(io::ErrorKind::TimedOut) => "ETIMEDOUT",
                Some(io::ErrorKind::NotFound) => "ENOTFOUND",
                _ if message.contains("dns error") || message.contains("failed to lookup") => {
                    "ENOTFOUND"
                }
                _ => "EPROXY",
            },
            HttpClientError::Timeout(_) => "ETIMEDOUT",
            HttpClientError::InvalidRequest(_) => "EPROXY",
        }
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making HTTP requests to upstreams
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request to an upstream server.
    ///
    /// The request URI must be absolute; headers are forwarded untouched.
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
