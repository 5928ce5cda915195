use std::sync::Arc;

use clap::ValueEnum;
use orchestrator_mcp_runtime::McpServer;
use orchestrator_mcp_runtime::idempotency::IdempotencyStore;
use sqlx::PgPool;

/// Backend for the payment-webhook admission gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum IdempotencyBackend {
    /// Shared `idempotency_keys` table; safe across instances.
    Postgres,
    /// Process-local map; single instance only.
    Memory,
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub mcp: Arc<McpServer>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}
