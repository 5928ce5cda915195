use axum::body::Bytes;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::state::AppState;

const MCP_PATH: &str = "/mcp";

pub fn router() -> Router<AppState> {
    Router::new().route(MCP_PATH, post(mcp_post))
}

/// JSON-RPC over HTTP. Always 200; protocol errors travel in the envelope.
async fn mcp_post(State(state): State<AppState>, body: Bytes) -> Json<Value> {
    Json(state.mcp.handle_bytes(&body).await)
}
