pub mod health;
pub mod mcp_http;
pub mod mock_sinks;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Every HTTP route, with state applied. Swagger and tracing layers are added by `main`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(mcp_http::router())
        .merge(webhooks::router())
        .merge(mock_sinks::router())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use orchestrator_mcp_runtime::McpServer;
    use orchestrator_mcp_runtime::idempotency::MemoryIdempotencyStore;
    use orchestrator_mcp_runtime::test_support::Fixture;
    use serde_json::Value;
    use sqlx::postgres::PgPoolOptions;
    use tower::ServiceExt;

    use crate::state::AppState;

    /// Full router over the fixture's fakes. The pool is lazy and never touched.
    pub fn app(fixture: &Fixture) -> Router {
        let db = PgPoolOptions::new()
            .connect_lazy("postgres://orchestrator@localhost/orchestrator")
            .expect("lazy pool");
        super::app(AppState {
            db,
            mcp: Arc::new(McpServer::new(Arc::new(fixture.toolbox()))),
            idempotency: Arc::new(MemoryIdempotencyStore::new()),
        })
    }

    pub async fn post_raw(app: Router, path: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::post(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    pub async fn post_json(app: Router, path: &str, body: Value) -> (StatusCode, Value) {
        post_raw(app, path, &body.to_string()).await
    }
}
