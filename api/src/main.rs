use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use clap::Parser;
use orchestrator_mcp_runtime::idempotency::{
    IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore,
};
use orchestrator_mcp_runtime::tools::validate_catalog;
use orchestrator_mcp_runtime::{McpServer, RuntimeArgs, RuntimeConfig, postgres_toolbox};
use serde::Serialize;
use sqlx::postgres::PgPoolOptions;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod error;
mod extract;
mod routes;
mod state;

use state::{AppState, IdempotencyBackend};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Order Orchestrator API",
        version = "0.1.0",
        description = "Payment webhooks, JSON-RPC tools over HTTP, and mock vendor receivers for the order orchestrator."
    ),
    paths(
        routes::health::health_check,
        routes::webhooks::order_paid,
        routes::mock_sinks::receive_invoice,
        routes::mock_sinks::receive_sales_order,
    ),
    components(schemas(
        HealthResponse,
        orchestrator_core::error::ApiError,
        routes::webhooks::OrderPaidWebhook,
        routes::mock_sinks::SinkAck,
        orchestrator_core::transform::InvoicePayload,
        orchestrator_core::transform::InvoicePartner,
        orchestrator_core::transform::InvoiceAddress,
        orchestrator_core::transform::InvoiceLine,
        orchestrator_core::transform::InvoiceMeta,
        orchestrator_core::transform::SalesOrderPayload,
        orchestrator_core::transform::SalesOrderLine,
        orchestrator_core::transform::ShippingAddress,
        orchestrator_core::transform::CustomField,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
    pub version: String,
}

#[derive(Parser)]
#[command(name = "orchestrator-api", version, about = "Order orchestrator HTTP service")]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Upper bound on pooled connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 20)]
    max_connections: u32,

    /// Listen port
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Where payment-webhook admissions are recorded
    #[arg(long, env = "IDEMPOTENCY_STORE", value_enum, default_value_t = IdempotencyBackend::Postgres)]
    idempotency_store: IdempotencyBackend,

    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "orchestrator_api=info,orchestrator_mcp_runtime=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    validate_catalog().expect("Tool catalog is inconsistent with the dispatcher");

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect(&cli.database_url)
        .await
        .expect("Failed to connect to database");

    // Run migrations
    sqlx::migrate!("../migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    let config = Arc::new(RuntimeConfig::from(cli.runtime));
    let toolbox =
        postgres_toolbox(config, pool.clone()).expect("Failed to build outbound HTTP clients");

    let idempotency: Arc<dyn IdempotencyStore> = match cli.idempotency_store {
        IdempotencyBackend::Postgres => Arc::new(PgIdempotencyStore::new(pool.clone())),
        IdempotencyBackend::Memory => {
            tracing::warn!(
                event = "idempotency_memory_backend",
                "payment dedup is process-local; do not run more than one instance"
            );
            Arc::new(MemoryIdempotencyStore::new())
        }
    };

    let app_state = AppState {
        db: pool,
        mcp: Arc::new(McpServer::new(Arc::new(toolbox))),
        idempotency,
    };

    let app = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::app(app_state))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], cli.port));
    tracing::info!(event = "http_server_started", %addr, version = env!("CARGO_PKG_VERSION"));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(listener, app)
        .await
        .expect("HTTP server terminated");
}
