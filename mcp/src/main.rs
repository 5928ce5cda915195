use std::sync::Arc;

use clap::Parser;
use orchestrator_mcp_runtime::tools::validate_catalog;
use orchestrator_mcp_runtime::{McpServer, RuntimeArgs, RuntimeConfig, postgres_toolbox, stdio};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "orchestrator-mcp",
    version,
    about = "Order orchestrator tools over stdio (Content-Length framed or newline-delimited JSON-RPC)"
)]
struct Cli {
    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// Upper bound on pooled connections
    #[arg(long, env = "DATABASE_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    #[command(flatten)]
    runtime: RuntimeArgs,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    // stdout carries protocol frames; logs go to stderr only.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "orchestrator_mcp=info,orchestrator_mcp_runtime=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    validate_catalog().expect("Tool catalog is inconsistent with the dispatcher");

    let pool = PgPoolOptions::new()
        .max_connections(cli.max_connections)
        .connect_lazy(&cli.database_url)
        .expect("Invalid DATABASE_URL");

    let config = Arc::new(RuntimeConfig::from(cli.runtime));
    let toolbox = postgres_toolbox(config, pool).expect("Failed to build outbound HTTP clients");
    let server = McpServer::new(Arc::new(toolbox));

    tracing::info!(event = "stdio_server_started", version = env!("CARGO_PKG_VERSION"));
    if let Err(err) = stdio::serve_stdio(&server).await {
        tracing::error!(event = "stdio_server_failed", error = %err);
        std::process::exit(1);
    }
}
