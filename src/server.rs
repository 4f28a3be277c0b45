use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::middleware::observe;
use crate::AppState;

/// Builds the full Axum `Router` with all routes and the observation middleware.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // ── Auth endpoints ──────────────────────────────────────
        .route(
            "/api/auth",
            post(handlers::auth::register)
                .put(handlers::auth::login)
                .delete(handlers::auth::logout),
        )
        // ── Order endpoints ─────────────────────────────────────
        .route("/api/order/menu", get(handlers::order::get_menu))
        .route("/api/order", post(handlers::order::create_order))
        // ── Metrics ─────────────────────────────────────────────
        .route("/api/metrics/pending", get(handlers::metrics::get_pending))
        // ── Provide shared state to all routes above ────────────
        .with_state(state.clone())
        // ── Global middleware (applied bottom-up) ───────────────
        .layer(axum_mw::from_fn_with_state(state, observe::observe_middleware))
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{MetricsCollector, TrackedMethod};
    use crate::middleware::observe::{ObservationRules, SessionKey};
    use axum::body::Body;
    use axum::http::{header, Method, Request, StatusCode};
    use serde_json::{json, Value};
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    fn state(session_key: SessionKey) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(MetricsCollector::new()),
            ObservationRules {
                auth_prefix: "/api/auth".into(),
                order_prefix: "/api/order".into(),
                session_key,
                max_body_bytes: 64 * 1024,
            },
        ))
    }

    fn json_request(method: Method, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let raw = body.to_string();
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, raw.len());
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::from(raw)).unwrap()
    }

    /// Same as `json_request` but streamed in two frames with no length header.
    fn streamed_request(method: Method, uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let raw = body.to_string().into_bytes();
        let (head, tail) = raw.split_at(raw.len() / 2);
        let frames = futures_util::stream::iter([
            Ok::<_, std::io::Error>(head.to_vec()),
            Ok(tail.to_vec()),
        ]);
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(t) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        builder.body(Body::from_stream(frames)).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    async fn register(app: &Router, email: &str) -> String {
        let (status, body) = send(
            app,
            json_request(
                Method::POST,
                "/api/auth",
                json!({ "name": "diner", "email": email, "password": "pw" }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_owned()
    }

    #[tokio::test]
    async fn every_request_is_counted_by_method() {
        let state = state(SessionKey::Email);
        let app = create_router(state.clone());

        for _ in 0..3 {
            let req = Request::builder().uri("/api/order/menu").body(Body::empty()).unwrap();
            let (status, _) = send(&app, req).await;
            assert_eq!(status, StatusCode::OK);
        }
        // unmatched routes go through the middleware too
        let req = Request::builder()
            .method(Method::DELETE)
            .uri("/api/franchise/1")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let d = state.metrics.drain(Instant::now(), Duration::from_secs(60));
        assert_eq!(d.requests.count(TrackedMethod::Get), 3);
        assert_eq!(d.requests.count(TrackedMethod::Delete), 1);
        assert_eq!(d.requests.latency_ms.len(), 4);
        assert!(d.requests.latency_ms.iter().all(|ms| *ms >= 0.0));
    }

    #[tokio::test]
    async fn auth_attempts_and_email_sessions() {
        let state = state(SessionKey::Email);
        let app = create_router(state.clone());

        register(&app, "a@jwt.com").await;
        let (status, _) = send(
            &app,
            json_request(Method::PUT, "/api/auth", json!({ "email": "a@jwt.com", "password": "pw" }), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            &app,
            json_request(Method::PUT, "/api/auth", json!({ "email": "b@jwt.com", "password": "pw" }), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let d = state.metrics.drain(Instant::now(), Duration::from_secs(3600));
        assert_eq!(d.auth.success, 2);
        assert_eq!(d.auth.failure, 1);
        // a failed login still identifies the caller
        assert_eq!(d.active_sessions, 2);
    }

    #[tokio::test]
    async fn bearer_sessions_and_purchases() {
        let state = state(SessionKey::BearerToken);
        let app = create_router(state.clone());
        let token = register(&app, "c@jwt.com").await;

        let order = json!({
            "franchiseId": 1,
            "storeId": 1,
            "items": [
                { "menuId": 1, "description": "Veggie", "price": 2.5 },
                { "menuId": 2, "description": "Pepperoni", "price": 3.0 }
            ]
        });
        let (status, body) = send(&app, json_request(Method::POST, "/api/order", order.clone(), Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["dinerEmail"], "c@jwt.com");

        let (status, _) = send(&app, json_request(Method::POST, "/api/order", order, Some("bogus"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let d = state.metrics.drain(Instant::now(), Duration::from_secs(600));
        assert_eq!(d.purchases.success, 1);
        assert_eq!(d.purchases.failure, 1);
        assert_eq!(d.purchases.revenue, 5.5);
        assert_eq!(d.purchases.latency_ms.len(), 1);
        assert_eq!(d.requests.post, 3);
        // the valid token and the bogus one
        assert_eq!(d.active_sessions, 2);
    }

    #[tokio::test]
    async fn bodies_without_content_length_are_inspected() {
        let state = state(SessionKey::Email);
        let app = create_router(state.clone());

        let (status, body) = send(
            &app,
            streamed_request(
                Method::POST,
                "/api/auth",
                json!({ "name": "diner", "email": "x@jwt.com", "password": "pw" }),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_owned();

        let order = json!({
            "franchiseId": 1,
            "storeId": 1,
            "items": [
                { "menuId": 1, "description": "Veggie", "price": 2.5 },
                { "menuId": 2, "description": "Pepperoni", "price": 3.0 }
            ]
        });
        let (status, body) = send(&app, streamed_request(Method::POST, "/api/order", order, Some(&token))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["order"]["items"].as_array().map(Vec::len), Some(2));

        let d = state.metrics.drain(Instant::now(), Duration::from_secs(600));
        assert_eq!(d.auth.success, 1);
        assert_eq!(d.purchases.success, 1);
        assert_eq!(d.purchases.revenue, 5.5);
        assert_eq!(d.active_sessions, 1);
    }

    #[tokio::test]
    async fn malformed_body_does_not_change_response() {
        let state = state(SessionKey::Email);
        let app = create_router(state.clone());

        let raw = "{\"items\": [";
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/order")
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::CONTENT_LENGTH, raw.len())
            .body(Body::from(raw))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let d = state.metrics.drain(Instant::now(), Duration::from_secs(60));
        assert_eq!(d.purchases.failure, 1);
        assert_eq!(d.purchases.revenue, 0.0);
    }

    #[tokio::test]
    async fn pending_endpoint_does_not_drain() {
        let state = state(SessionKey::Email);
        let app = create_router(state.clone());

        let req = Request::builder().uri("/api/metrics/pending").body(Body::empty()).unwrap();
        let (status, body) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["requests"]["get"], 0);

        let req = Request::builder().uri("/api/metrics/pending").body(Body::empty()).unwrap();
        let (_, body) = send(&app, req).await;
        assert_eq!(body["requests"]["get"], 1);
        assert_eq!(state.metrics.pending().requests.get, 2);
    }
}
