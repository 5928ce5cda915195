//! Outbound HTTP backends: the language model and the two vendor receivers.
//!
//! One attempt per call with a fixed client timeout. A non-2xx answer is an
//! error carrying the status and body.

use std::time::Duration;

use async_trait::async_trait;
use orchestrator_core::transform::{InvoicePayload, SalesOrderPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MODEL_TIMEOUT: Duration = Duration::from_secs(120);
const SINK_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("{target} request failed: {source}")]
    Transport {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{target} responded with HTTP {status}: {body}")]
    Status {
        target: &'static str,
        status: u16,
        body: String,
    },
    #[error("{target} returned an unreadable body: {source}")]
    Decode {
        target: &'static str,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Single non-streaming completion.
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, UpstreamError>;
}

#[async_trait]
pub trait VendorSink: Send + Sync {
    async fn send_invoice(&self, payload: &InvoicePayload) -> Result<Value, UpstreamError>;
    async fn send_sales_order(&self, payload: &SalesOrderPayload) -> Result<Value, UpstreamError>;
}

fn build_client(timeout: Duration) -> Result<reqwest::Client, UpstreamError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(UpstreamError::Client)
}

/// Ollama-compatible `/api/generate` backend.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

impl OllamaClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(MODEL_TIMEOUT)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl LanguageModel for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str) -> Result<String, UpstreamError> {
        const TARGET: &str = "language model";

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&GenerateRequest {
                model,
                prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(|source| UpstreamError::Transport {
                target: TARGET,
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(event = "model_call_failed", status = status.as_u16(), model);
            return Err(UpstreamError::Status {
                target: TARGET,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: GenerateResponse =
            response
                .json()
                .await
                .map_err(|source| UpstreamError::Decode {
                    target: TARGET,
                    source,
                })?;
        Ok(parsed.response)
    }
}

/// Posts vendor payloads to the configured receiver URLs.
#[derive(Debug, Clone)]
pub struct HttpVendorSink {
    client: reqwest::Client,
    invoice_url: String,
    sales_order_url: String,
}

impl HttpVendorSink {
    pub fn new(
        invoice_url: impl Into<String>,
        sales_order_url: impl Into<String>,
    ) -> Result<Self, UpstreamError> {
        Ok(Self {
            client: build_client(SINK_TIMEOUT)?,
            invoice_url: invoice_url.into(),
            sales_order_url: sales_order_url.into(),
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        target: &'static str,
        url: &str,
        payload: &T,
    ) -> Result<Value, UpstreamError> {
        let response = self
            .client
            .post(url)
            .json(payload)
            .send()
            .await
            .map_err(|source| UpstreamError::Transport { target, source })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|source| UpstreamError::Decode { target, source })?;

        if !status.is_success() {
            tracing::warn!(event = "sink_rejected", target, status = status.as_u16());
            return Err(UpstreamError::Status {
                target,
                status: status.as_u16(),
                body,
            });
        }

        tracing::info!(event = "sink_delivered", target, status = status.as_u16());
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

#[async_trait]
impl VendorSink for HttpVendorSink {
    async fn send_invoice(&self, payload: &InvoicePayload) -> Result<Value, UpstreamError> {
        self.post("invoice sink", &self.invoice_url, payload).await
    }

    async fn send_sales_order(&self, payload: &SalesOrderPayload) -> Result<Value, UpstreamError> {
        self.post("sales-order sink", &self.sales_order_url, payload).await
    }
}

#[cfg(test)]
mod tests {
    use orchestrator_core::transform::{InvoicePayload, to_invoice_payload};
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::test_support::{sample_items, sample_order};

    fn invoice() -> InvoicePayload {
        to_invoice_payload(&sample_order(1024), &sample_items(1024), &Default::default())
    }

    #[tokio::test]
    async fn generate_posts_non_streaming_request_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({ "model": "llama3.1", "stream": false })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "response": "Todo cuadra." })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = OllamaClient::new(format!("{}/", server.uri())).unwrap();
        let text = client.generate("llama3.1", "Analiza").await.unwrap();
        assert_eq!(text, "Todo cuadra.");
    }

    #[tokio::test]
    async fn generate_surfaces_non_success_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model not loaded"))
            .mount(&server)
            .await;

        let client = OllamaClient::new(server.uri()).unwrap();
        let err = client.generate("llama3.1", "Analiza").await.unwrap_err();
        match err {
            UpstreamError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "model not loaded");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn sink_returns_acknowledgement_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mock/odoo/invoices"))
            .and(body_partial_json(json!({ "invoice_ref": "1024" })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "ok": true, "id": "inv-1" })),
            )
            .mount(&server)
            .await;

        let sink = HttpVendorSink::new(
            format!("{}/mock/odoo/invoices", server.uri()),
            format!("{}/mock/zoho/salesorders", server.uri()),
        )
        .unwrap();
        let ack = sink.send_invoice(&invoice()).await.unwrap();
        assert_eq!(ack, json!({ "ok": true, "id": "inv-1" }));
    }

    #[tokio::test]
    async fn sink_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad payload"))
            .mount(&server)
            .await;

        let sink = HttpVendorSink::new(
            format!("{}/invoices", server.uri()),
            format!("{}/salesorders", server.uri()),
        )
        .unwrap();
        let err = sink.send_invoice(&invoice()).await.unwrap_err();
        assert!(matches!(err, UpstreamError::Status { status: 400, .. }));
    }
}
