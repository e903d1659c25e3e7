// Integration tests for proxy rules against a live upstream on loopback.
mod common;

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use axum::{
        Json,
        body::Body,
        http::{Request, StatusCode, request},
        response::{IntoResponse, Response},
    };
    use portico::{
        ApplicationParts, PluginRegistry, ProxyContext, ProxyObserver,
        ports::http_client::HttpClientError,
    };
    use serde_json::json;

    use crate::common::{TestSite, get, send, spawn_echo_upstream, unused_port};

    fn no_plugins() -> ApplicationParts {
        ApplicationParts {
            plugins: PluginRegistry::new(),
            ..ApplicationParts::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_credentials_reach_upstream() {
        let upstream = spawn_echo_upstream("auth").await;
        let site = TestSite::new();
        site.proxy_config(json!({"proxies": [{
            "path": "/api",
            "target": format!("http://{upstream}"),
            "options": {"headers": {"authorization": "Bearer from-config", "x-team": "edge"}}
        }]}));
        let app = site.build(no_plugins()).await;

        let response = send(
            &app.router,
            Request::builder()
                .uri("/api/me?verbose=1")
                .header("authorization", "Bearer abc123")
                .header("cookie", "session=xyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

        assert_eq!(response.status, 200);
        let echoed = response.json();
        assert_eq!(echoed["uri"], "/api/me?verbose=1");
        // The client's own credentials win over configured headers.
        assert_eq!(echoed["headers"]["authorization"], "Bearer abc123");
        assert_eq!(echoed["headers"]["cookie"], "session=xyz");
        assert_eq!(echoed["headers"]["x-team"], "edge");
        assert_eq!(echoed["headers"]["x-forwarded-proto"], "http");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_strip_prefix_and_change_origin() {
        let upstream = spawn_echo_upstream("svc").await;
        let site = TestSite::new();
        site.proxy_config(json!([
            {
                "path": "/svc",
                "target": format!("http://{upstream}/v1"),
                "options": {"stripPrefix": true, "changeOrigin": true}
            },
            {
                "path": "/raw",
                "target": format!("http://{upstream}"),
                "options": {"changeOrigin": false, "xfwd": false}
            }
        ]));
        let app = site.build(no_plugins()).await;

        let echoed = get(&app.router, "/svc/items/7").await.json();
        assert_eq!(echoed["uri"], "/v1/items/7");
        assert_eq!(echoed["headers"]["host"], upstream.to_string());

        let response = send(
            &app.router,
            Request::builder()
                .uri("/raw/thing")
                .header("host", "front.example")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        let echoed = response.json();
        assert_eq!(echoed["uri"], "/raw/thing");
        assert_eq!(echoed["headers"]["host"], "front.example");
        assert!(echoed["headers"].get("x-forwarded-for").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_unreachable_upstream_returns_502() {
        let site = TestSite::new();
        site.proxy_config(json!({"proxies": [
            {"path": "/api", "target": format!("http://127.0.0.1:{}", unused_port())}
        ]}));
        let app = site.build(no_plugins()).await;

        let response = get(&app.router, "/api/ping").await;
        assert_eq!(response.status, 502);
        let body = response.json();
        assert_eq!(body["error"], "Proxy Error");
        assert_eq!(body["path"], "/api/ping");
        assert_eq!(body["code"], "ECONNREFUSED");
        assert!(body["message"].is_string());
        assert!(body["details"].is_string());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rule_limit_applies_below_global_limit() {
        let upstream = spawn_echo_upstream("limited").await;
        let site = TestSite::new();
        site.proxy_config(json!({"proxies": [{
            "path": "/api",
            "target": format!("http://{upstream}"),
            "rateLimit": {"windowMs": 60000, "max": 2}
        }]}));
        let app = site.build(no_plugins()).await;

        assert_eq!(get(&app.router, "/api/a").await.status, 200);
        assert_eq!(get(&app.router, "/api/b").await.status, 200);

        let response = get(&app.router, "/api/c").await;
        assert_eq!(response.status, 429);
        assert!(response.headers.contains_key("retry-after"));
        let body = response.json();
        assert_eq!(body["tier"], "rule");
        assert_eq!(body["path"], "/api/c");

        // Other routes only see the global budget.
        assert_eq!(get(&app.router, "/health").await.status, 200);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_rule_budgets_are_independent_and_charge_the_global_budget() {
        let upstream = spawn_echo_upstream("tiers").await;
        let site = TestSite::new();
        site.proxy_config(json!({"proxies": [
            {"path": "/a", "target": format!("http://{upstream}"), "rateLimit": {"windowMs": 60000, "max": 1}},
            {"path": "/b", "target": format!("http://{upstream}"), "rateLimit": {"windowMs": 60000, "max": 1}}
        ]}));
        let mut settings = site.settings();
        settings.global_rate_limit.max = 4;
        let app = site.build_with(&settings, no_plugins()).await;

        let mut statuses = Vec::new();
        let mut tiers = Vec::new();
        for path in ["/a", "/a", "/b", "/a", "/health"] {
            let response = get(&app.router, path).await;
            statuses.push(response.status);
            if response.status == 429 {
                tiers.push(response.json()["tier"].as_str().unwrap_or_default().to_string());
            }
        }

        // Exhausting /a leaves /b untouched; the two rule rejections still used
        // global budget, so the fifth request hits the global tier.
        assert_eq!(statuses, vec![200, 429, 200, 429, 429]);
        assert_eq!(tiers, vec!["rule", "rule", "global"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_global_limit_rejects_everything() {
        let site = TestSite::new();
        let mut settings = site.settings();
        settings.global_rate_limit.max = 3;
        let app = site.build_with(&settings, no_plugins()).await;

        for _ in 0..3 {
            assert_eq!(get(&app.router, "/health").await.status, 200);
        }
        let response = get(&app.router, "/health").await;
        assert_eq!(response.status, 429);
        assert_eq!(response.json()["tier"], "global");

        let response = get(&app.router, "/anything").await;
        assert_eq!(response.status, 429);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_malformed_document_disables_proxying() {
        let site = TestSite::new();
        site.write("proxy.config.json", "{ not json").write("index.html", "spa");
        let app = site.build(no_plugins()).await;

        assert!(app.gateway.is_empty());
        assert_eq!(get(&app.router, "/api/x").await.body, "spa");
    }

    struct Maintenance {
        errors: AtomicUsize,
        requests: AtomicUsize,
    }

    impl ProxyObserver for Maintenance {
        fn name(&self) -> &str {
            "maintenance"
        }

        fn on_request(&self, _ctx: &ProxyContext, request: &mut request::Parts) {
            self.requests.fetch_add(1, Ordering::SeqCst);
            request
                .headers
                .insert("x-observed", "yes".parse().unwrap());
        }

        fn on_error(&self, ctx: &ProxyContext, _error: &HttpClientError) -> Option<Response> {
            self.errors.fetch_add(1, Ordering::SeqCst);
            Some(
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"maintenance": true, "rule": ctx.rule_path})),
                )
                    .into_response(),
            )
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_observer_can_rewrite_and_intercept() {
        let upstream = spawn_echo_upstream("observed").await;
        let site = TestSite::new();
        site.proxy_config(json!({"proxies": [
            {"path": "/up", "target": format!("http://{upstream}")},
            {"path": "/down", "target": format!("http://127.0.0.1:{}", unused_port())}
        ]}));

        let observer = Arc::new(Maintenance {
            errors: AtomicUsize::new(0),
            requests: AtomicUsize::new(0),
        });
        let app = site
            .build(ApplicationParts {
                observers: vec![observer.clone()],
                ..no_plugins()
            })
            .await;

        let echoed = get(&app.router, "/up/x").await.json();
        assert_eq!(echoed["headers"]["x-observed"], "yes");

        let response = get(&app.router, "/down/x").await;
        assert_eq!(response.status, 503);
        assert_eq!(response.json()["rule"], "/down");

        assert_eq!(observer.requests.load(Ordering::SeqCst), 2);
        assert_eq!(observer.errors.load(Ordering::SeqCst), 1);
    }
}
