// Shared helpers for integration tests.
#![allow(dead_code)]

use std::{net::SocketAddr, path::Path};

use axum::{
    Json, Router,
    body::Body,
    extract::Request,
    http::{HeaderMap, Response},
};
use http_body_util::BodyExt;
use portico::{
    Application, ApplicationParts, ServerSettings, SettingsOverrides, build_application,
};
use tempfile::TempDir;
use tower::ServiceExt;

/// Upstream that echoes what it received as JSON.
pub async fn spawn_echo_upstream(name: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |req: Request| async move {
        let headers: serde_json::Map<String, serde_json::Value> = req
            .headers()
            .iter()
            .map(|(k, v)| {
                (
                    k.as_str().to_string(),
                    serde_json::Value::String(v.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        Json(serde_json::json!({
            "upstream": name,
            "method": req.method().as_str(),
            "uri": req.uri().to_string(),
            "headers": headers,
        }))
    });

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// A port with nothing listening on it.
pub fn unused_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

pub struct TestSite {
    pub dir: TempDir,
}

impl TestSite {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, content: &str) -> &Self {
        let full = self.dir.path().join(relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full, content).unwrap();
        self
    }

    pub fn proxy_config(&self, document: serde_json::Value) -> &Self {
        self.write("proxy.config.json", &document.to_string())
    }

    pub fn settings(&self) -> ServerSettings {
        ServerSettings::load_from(
            &SettingsOverrides {
                static_dir: Some(self.path().to_string_lossy().into_owned()),
                ..SettingsOverrides::default()
            },
            Default::default(),
        )
        .unwrap()
    }

    pub async fn build(&self, parts: ApplicationParts) -> Application {
        build_application(&self.settings(), parts).await.unwrap()
    }

    pub async fn build_with(&self, settings: &ServerSettings, parts: ApplicationParts) -> Application {
        build_application(settings, parts).await.unwrap()
    }
}

pub struct TestResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

pub async fn send(router: &Router, request: axum::http::Request<Body>) -> TestResponse {
    let response: Response<Body> = router.clone().oneshot(request).await.unwrap();
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    TestResponse {
        status,
        headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    }
}

pub async fn get(router: &Router, uri: &str) -> TestResponse {
    send(
        router,
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    )
    .await
}
