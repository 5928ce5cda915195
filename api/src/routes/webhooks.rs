use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use orchestrator_mcp_runtime::tools::{DEFAULT_PAYMENT_SOURCE, OrderPaidRequest};
use serde::Deserialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/order-paid", post(order_paid))
}

/// Payment notification from the storefront.
#[derive(Debug, Deserialize, ToSchema)]
pub struct OrderPaidWebhook {
    pub order_id: i64,
    pub secret: String,
    /// Event origin; part of the idempotency key. Defaults to "mcp-tool".
    #[serde(default)]
    pub source: Option<String>,
}

impl OrderPaidWebhook {
    fn into_request(self) -> OrderPaidRequest {
        let source = self
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_PAYMENT_SOURCE.to_string());
        OrderPaidRequest {
            order_id: self.order_id,
            secret: self.secret,
            source,
            session_id: None,
        }
    }
}

/// Mark an order paid and build vendor payloads
///
/// Repeats of the same `source` and `order_id` within one hour are answered
/// with `duplicate_ignored` and cause no side effects. Orders that fail
/// admission checks are still marked paid and come back with `ok: false`.
#[utoipa::path(
    post,
    path = "/webhooks/order-paid",
    request_body = OrderPaidWebhook,
    responses(
        (status = 200, description = "Processed, rejected by validation, or ignored as a duplicate"),
        (status = 400, description = "Malformed body", body = orchestrator_core::error::ApiError),
        (status = 401, description = "Secret mismatch", body = orchestrator_core::error::ApiError),
        (status = 404, description = "Unknown order", body = orchestrator_core::error::ApiError)
    ),
    tag = "webhooks"
)]
pub async fn order_paid(
    State(state): State<AppState>,
    AppJson(webhook): AppJson<OrderPaidWebhook>,
) -> Result<Json<Value>, AppError> {
    let request = webhook.into_request();
    let outcome = state
        .mcp
        .toolbox()
        .order_paid_once(state.idempotency.as_ref(), &request)
        .await?;
    Ok(Json(outcome.to_value()))
}
