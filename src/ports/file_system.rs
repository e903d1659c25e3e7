use std::future::Future;

use axum::body::Body as AxumBody;
use hyper::{Response, http::request::Parts};
use thiserror::Error;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// FileSystem defines the port (interface) for serving the static asset directory.
///
/// Both operations return `Ok(None)` when nothing on disk answers the request so the
/// caller can move on to the next layer.
pub trait FileSystem: Send + Sync + 'static {
    /// Serve the file addressed by the request path.
    fn serve_static(
        &self,
        parts: &Parts,
    ) -> impl Future<Output = FileSystemResult<Option<Response<AxumBody>>>> + Send;

    /// Serve the single-page-application entry document (`index.html`).
    fn serve_index(
        &self,
        parts: &Parts,
    ) -> impl Future<Output = FileSystemResult<Option<Response<AxumBody>>>> + Send;
}
