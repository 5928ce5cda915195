//! Stand-in receivers for the invoicing and sales-order systems.
//!
//! They enforce the receivers' schema (positive quantities, non-negative
//! amounts) and acknowledge with a fresh id so the full flow can be exercised
//! without vendor accounts.

use axum::routing::post;
use axum::{Json, Router};
use orchestrator_core::transform::{InvoicePayload, SalesOrderPayload};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

use crate::error::AppError;
use crate::extract::AppJson;

pub fn router<S>() -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/mock/odoo/invoices", post(receive_invoice))
        .route("/mock/zoho/salesorders", post(receive_sales_order))
}

/// Acknowledgement returned by the mock receivers.
#[derive(Debug, Serialize, ToSchema)]
pub struct SinkAck {
    pub ok: bool,
    /// Receiver-assigned id
    pub id: String,
    /// Echo of `invoice_ref` or `reference_number`
    pub reference: String,
    pub received_lines: usize,
}

fn out_of_range(field: String, rule: &str, received: Value) -> AppError {
    AppError::Validation {
        message: format!("'{field}' {rule}"),
        field: Some(field),
        received: Some(received),
        docs_hint: None,
    }
}

fn non_negative(field: impl Into<String>, value: Decimal) -> Result<(), AppError> {
    if value.is_sign_negative() && !value.is_zero() {
        let received = value.to_f64().map(Value::from).unwrap_or(Value::Null);
        return Err(out_of_range(field.into(), "must be >= 0", received));
    }
    Ok(())
}

fn at_least_one(field: impl Into<String>, value: i32) -> Result<(), AppError> {
    if value < 1 {
        return Err(out_of_range(field.into(), "must be >= 1", Value::from(value)));
    }
    Ok(())
}

fn check_invoice(payload: &InvoicePayload) -> Result<(), AppError> {
    non_negative("total_expected", payload.total_expected)?;
    for (i, line) in payload.invoice_lines.iter().enumerate() {
        at_least_one(format!("invoice_lines[{i}].quantity"), line.quantity)?;
        non_negative(format!("invoice_lines[{i}].price_unit"), line.price_unit)?;
        non_negative(format!("invoice_lines[{i}].tax_amount"), line.tax_amount)?;
        non_negative(format!("invoice_lines[{i}].subtotal"), line.subtotal)?;
    }
    Ok(())
}

fn check_sales_order(payload: &SalesOrderPayload) -> Result<(), AppError> {
    for (i, line) in payload.line_items.iter().enumerate() {
        non_negative(format!("line_items[{i}].rate"), line.rate)?;
        at_least_one(format!("line_items[{i}].quantity"), line.quantity)?;
        non_negative(format!("line_items[{i}].tax_amount"), line.tax_amount)?;
    }
    Ok(())
}

/// Mock invoicing receiver
#[utoipa::path(
    post,
    path = "/mock/odoo/invoices",
    request_body = InvoicePayload,
    responses(
        (status = 200, description = "Invoice accepted", body = SinkAck),
        (status = 400, description = "Schema violation", body = orchestrator_core::error::ApiError)
    ),
    tag = "mock-sinks"
)]
pub async fn receive_invoice(
    AppJson(payload): AppJson<InvoicePayload>,
) -> Result<Json<SinkAck>, AppError> {
    check_invoice(&payload)?;
    tracing::info!(
        event = "mock_invoice_received",
        invoice_ref = %payload.invoice_ref,
        lines = payload.invoice_lines.len()
    );
    Ok(Json(SinkAck {
        ok: true,
        id: format!("inv_{}", uuid::Uuid::now_v7()),
        reference: payload.invoice_ref,
        received_lines: payload.invoice_lines.len(),
    }))
}

/// Mock sales-order receiver
#[utoipa::path(
    post,
    path = "/mock/zoho/salesorders",
    request_body = SalesOrderPayload,
    responses(
        (status = 200, description = "Sales order accepted", body = SinkAck),
        (status = 400, description = "Schema violation", body = orchestrator_core::error::ApiError)
    ),
    tag = "mock-sinks"
)]
pub async fn receive_sales_order(
    AppJson(payload): AppJson<SalesOrderPayload>,
) -> Result<Json<SinkAck>, AppError> {
    check_sales_order(&payload)?;
    tracing::info!(
        event = "mock_sales_order_received",
        reference_number = %payload.reference_number,
        lines = payload.line_items.len()
    );
    Ok(Json(SinkAck {
        ok: true,
        id: format!("so_{}", uuid::Uuid::now_v7()),
        reference: payload.reference_number,
        received_lines: payload.line_items.len(),
    }))
}
