//! Tool runtime for the order orchestrator.
//!
//! The JSON-RPC router, the tool dispatcher and the stdio framing live here so
//! the stdio binary and the HTTP service serve the exact same capability set.

pub mod config;
pub mod idempotency;
pub mod pg;
pub mod rpc;
pub mod stdio;
pub mod store;
pub mod tools;
pub mod upstream;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

use std::sync::Arc;

use sqlx::PgPool;

pub use config::{RuntimeArgs, RuntimeConfig};
pub use rpc::McpServer;
pub use tools::Toolbox;

use crate::pg::PgStore;
use crate::upstream::{HttpVendorSink, OllamaClient, UpstreamError};

/// Toolbox backed by PostgreSQL, the configured model host and the HTTP sinks.
pub fn postgres_toolbox(config: Arc<RuntimeConfig>, pool: PgPool) -> Result<Toolbox, UpstreamError> {
    let store = Arc::new(PgStore::new(pool, config.tag_entity_table));
    let model = Arc::new(OllamaClient::new(&config.ollama_url)?);
    let sinks = Arc::new(HttpVendorSink::new(
        &config.invoice_sink_url,
        &config.sales_order_sink_url,
    )?);
    Ok(Toolbox::new(config, store.clone(), store, model, sinks))
}
