use std::path::{Component, Path, PathBuf};

use axum::{Json, body::Body as AxumBody, response::IntoResponse};
use http_body_util::BodyExt;
use hyper::{Method, Request, Response, StatusCode, http::request::Parts};
use tower::ServiceExt;
use tower_http::services::{ServeDir, ServeFile, fs::ServeFileSystemResponseBody};

use crate::ports::file_system::{FileSystem, FileSystemError, FileSystemResult};

/// Static asset adapter backed by tower-http's `ServeDir` / `ServeFile`.
#[derive(Debug, Clone)]
pub struct FileSystemAdapter {
    root: PathBuf,
    /// Files under `root` that are never served (server configuration).
    hidden: Vec<PathBuf>,
}

impl FileSystemAdapter {
    pub const INDEX_FILE: &'static str = "index.html";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hidden: Vec::new(),
        }
    }

    /// Never serve `path`, even when it lies inside the static root.
    pub fn hide(mut self, path: impl AsRef<Path>) -> Self {
        self.hidden.push(normalize(path.as_ref()));
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `request_path` addresses one of the hidden files.
    fn is_hidden(&self, request_path: &str) -> bool {
        if self.hidden.is_empty() {
            return false;
        }
        let Ok(decoded) = urlencoding::decode(request_path) else {
            return true;
        };
        let mut candidate = self.root.clone();
        for segment in decoded.split('/').filter(|segment| !segment.is_empty()) {
            candidate.push(segment);
        }
        self.hidden.contains(&normalize(&candidate))
    }

    /// Only safe methods read from disk.
    fn is_readable(method: &Method) -> bool {
        method == Method::GET || method == Method::HEAD
    }

    /// Clone the parts ServeDir looks at into a body-less request.
    fn bodyless(parts: &Parts) -> Request<AxumBody> {
        let mut request = Request::new(AxumBody::empty());
        *request.method_mut() = parts.method.clone();
        *request.uri_mut() = parts.uri.clone();
        *request.headers_mut() = parts.headers.clone();
        request
    }

    fn into_axum(response: Response<ServeFileSystemResponseBody>) -> Option<Response<AxumBody>> {
        if response.status() == StatusCode::NOT_FOUND {
            return None;
        }
        let (parts, body) = response.into_parts();
        let body = AxumBody::new(body.map_err(|e| {
            tracing::error!(error = %e, "Error reading static file body");
            axum::Error::new(e)
        }));
        Some(Response::from_parts(parts, body))
    }
}

impl FileSystem for FileSystemAdapter {
    async fn serve_static(&self, parts: &Parts) -> FileSystemResult<Option<Response<AxumBody>>> {
        if !Self::is_readable(&parts.method) {
            return Ok(None);
        }
        if self.is_hidden(parts.uri.path()) {
            tracing::warn!(path = %parts.uri.path(), "Refusing to serve server configuration file");
            return Ok(None);
        }

        let serve_dir = ServeDir::new(&self.root).append_index_html_on_directories(true);
        let response = match serve_dir.oneshot(Self::bodyless(parts)).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        Ok(Self::into_axum(response))
    }

    async fn serve_index(&self, parts: &Parts) -> FileSystemResult<Option<Response<AxumBody>>> {
        if !Self::is_readable(&parts.method) {
            return Ok(None);
        }

        let index = self.root.join(Self::INDEX_FILE);
        match tokio::fs::metadata(&index).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(FileSystemError::IoError(e)),
        }

        let response = match ServeFile::new(&index).oneshot(Self::bodyless(parts)).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        Ok(Self::into_axum(response))
    }
}

/// Absolute form of `path` with `.` and `..` resolved lexically.
fn normalize(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    normalized
}

/// JSON `404` for requests nothing could answer.
pub fn not_found_response(path: &str) -> Response<AxumBody> {
    let body = serde_json::json!({
        "error": "Not Found",
        "message": format!("No route, proxy rule or static file matches {path}"),
        "path": path,
    });
    (StatusCode::NOT_FOUND, Json(body)).into_response()
}
