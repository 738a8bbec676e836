#[cfg(test)]
mod tests {
    use axum::http::{Method, StatusCode};
    use tower::ServiceExt;

    use crate::tests::helpers::*;

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let (app, _, _db) = setup_test_app().await;
        let response = app.oneshot(request(Method::GET, "/healthz", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_endpoint() {
        let (app, _, _db) = setup_test_app().await;
        let response = app.oneshot(request(Method::GET, "/readyz", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let (app, _, _db) = setup_test_app().await;
        let response = app.oneshot(request(Method::GET, "/healthz", None, None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers.contains_key("x-content-type-options"));
        assert!(headers.contains_key("x-frame-options"));
        assert!(headers.contains_key("referrer-policy"));
        assert!(headers.contains_key("permissions-policy"));
        assert!(headers.contains_key("cross-origin-opener-policy"));
        assert!(headers.contains_key("cross-origin-resource-policy"));
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let (app, _, _db) = setup_test_app().await;
        let response = app.oneshot(request(Method::GET, "/version", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body["name"].is_string());
        assert!(body["version"].is_string());
    }

    #[tokio::test]
    async fn test_prometheus_metrics_format() {
        let (app, _, _db) = setup_test_app().await;
        let response =
            app.oneshot(request(Method::GET, "/metrics/prometheus", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = http_body_util::BodyExt::collect(response.into_body()).await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("medmarkt_"));
        assert!(text.contains("# TYPE"));
    }

    #[tokio::test]
    async fn test_districts_are_public() {
        let (app, _, _db) = setup_test_app().await;
        let response = app.oneshot(request(Method::GET, "/api/districts", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let items = body["items"].as_array().unwrap();
        assert_eq!(items.len(), 8);
        assert!(items.iter().any(|d| d["name"] == "Hadda"));
    }

    #[tokio::test]
    async fn test_categories_are_public_and_seeded() {
        let (app, _, _db) = setup_test_app().await;
        let response = app.oneshot(request(Method::GET, "/api/categories", None, None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["items"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_protected_routes_require_token() {
        let (app, _, _db) = setup_test_app().await;
        for uri in ["/api/users/me", "/api/cart", "/api/orders", "/api/admin/dashboard"] {
            let response =
                app.clone().oneshot(request(Method::GET, uri, None, None)).await.unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "expected 401 for {}", uri);
        }
    }

    #[tokio::test]
    async fn test_garbage_token_rejected() {
        let (app, _, _db) = setup_test_app().await;
        let response = app
            .oneshot(request(Method::GET, "/api/users/me", Some("not-a-jwt"), None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (app, _, _db) = setup_test_app().await;
        let response = app
            .oneshot(request(Method::GET, "/api/products/..%2F..%2Fetc", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_suggestions_share_the_search_rate_limit() {
        let (app, state, _db) = setup_test_app().await;
        let ip = std::net::IpAddr::from([127, 0, 0, 1]);

        // Burn through the search budget for this client
        for _ in 0..300 {
            let _ = state.rate_limiter.check_endpoint_limit("/api/search", ip).await;
        }

        let response = app
            .oneshot(request(Method::GET, "/api/search/suggestions?q=pa", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
